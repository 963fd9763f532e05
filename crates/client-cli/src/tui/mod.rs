//! Interactive chat mode
//!
//! The ratatui app runs on its own thread and talks to an async driver that
//! owns the session controller: questions travel one way over a command
//! channel, answers and history refreshes travel back over an event channel
//! the UI polls between frames.

mod app;

pub use app::{App, HistoryEntry, UiCommand, UiEvent};

use crate::api::Backend;
use crate::controller::SessionController;
use anyhow::Result;
use std::sync::mpsc;
use tokio::sync::mpsc as tokio_mpsc;

fn history_entries<B: Backend>(controller: &SessionController<B>) -> Vec<HistoryEntry> {
    controller
        .chat()
        .history()
        .iter()
        .map(|item| HistoryEntry {
            question: item.question.clone(),
            answer: item.answer.clone(),
            sql: item.sql.clone(),
            success: item.success,
        })
        .collect()
}

/// Runs the interactive chat session until the user quits
pub async fn run<B: Backend>(mut controller: SessionController<B>) -> Result<()> {
    let (command_tx, mut command_rx) = tokio_mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::channel();

    let email = controller
        .session()
        .current()
        .map(|identity| identity.user.email.clone())
        .unwrap_or_default();
    let dataset = controller
        .registry()
        .selected()
        .map(|d| d.dataset_name.clone());

    // seed the sidebar with the stored history
    let _ = event_tx.send(UiEvent::History(history_entries(&controller)));

    let mut app = App::new(email, dataset, command_tx, event_rx);
    let ui_thread = std::thread::spawn(move || app.run());

    while let Some(command) = command_rx.recv().await {
        match command {
            UiCommand::Ask(question) => {
                let _ = event_tx.send(UiEvent::Busy(true));
                match controller.ask(&question).await {
                    Ok(response) => {
                        let mut lines = vec![response.answer.clone()];
                        if let Some(sql) = &response.generated_sql {
                            lines.push(format!("  sql: {sql}"));
                        }
                        if response.is_no_data() {
                            lines.push("  (query matched no rows)".to_string());
                        }
                        let _ = event_tx.send(UiEvent::Lines(lines));
                        let _ = event_tx.send(UiEvent::History(history_entries(&controller)));
                    }
                    Err(e) => {
                        let _ = event_tx.send(UiEvent::Error(e.to_string()));
                    }
                }
                let _ = event_tx.send(UiEvent::Busy(false));
            }
            UiCommand::NewChat => {
                controller.new_chat();
                let _ = event_tx.send(UiEvent::Dataset(None));
            }
            UiCommand::Quit => break,
        }
    }

    match ui_thread.join() {
        Ok(result) => result?,
        Err(_) => anyhow::bail!("TUI thread panicked"),
    }
    Ok(())
}
