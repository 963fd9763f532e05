//! TUI application state and event loop for the interactive chat mode

use std::io;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, Paragraph, Wrap},
};
use tokio::sync::mpsc::UnboundedSender;

/// Command sent from the TUI thread to the async driver
#[derive(Debug, Clone)]
pub enum UiCommand {
    Ask(String),
    NewChat,
    Quit,
}

/// Update sent from the async driver to the TUI thread
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// Lines to append to the conversation pane
    Lines(Vec<String>),
    Error(String),
    Busy(bool),
    History(Vec<HistoryEntry>),
    /// Currently selected dataset name, if any
    Dataset(Option<String>),
}

/// History sidebar entry, newest first
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub question: String,
    pub answer: String,
    pub sql: String,
    pub success: bool,
}

/// Focus state for input
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Focus {
    Chat,
    History,
}

/// Main TUI application state
pub struct App {
    /// Conversation pane lines
    conversation: Vec<String>,
    /// History sidebar entries
    history: Vec<HistoryEntry>,
    /// Cursor position in the history sidebar
    history_cursor: usize,
    /// Current input text
    input: String,
    /// Which pane is focused
    focus: Focus,
    /// Scroll offset for the conversation pane
    chat_scroll: u16,
    /// True while a question is being answered
    busy: bool,
    /// Signed-in email for the status bar
    email: String,
    /// Selected dataset name for the status bar
    dataset: Option<String>,
    /// Channel to send commands to the driver
    commands: UnboundedSender<UiCommand>,
    /// Channel to receive updates from the driver
    events: Receiver<UiEvent>,
    /// Whether to quit
    should_quit: bool,
}

impl App {
    pub fn new(
        email: String,
        dataset: Option<String>,
        commands: UnboundedSender<UiCommand>,
        events: Receiver<UiEvent>,
    ) -> Self {
        Self {
            conversation: vec!["[Ask a question about your dataset - Enter to send]".to_string()],
            history: Vec::new(),
            history_cursor: 0,
            input: String::new(),
            focus: Focus::Chat,
            chat_scroll: 0,
            busy: false,
            email,
            dataset,
            commands,
            events,
            should_quit: false,
        }
    }

    /// Run the TUI main loop
    pub fn run(&mut self) -> io::Result<()> {
        // Setup terminal
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        // Main loop
        while !self.should_quit {
            // Process any pending updates from the driver
            self.process_events();

            // Draw UI
            terminal.draw(|f| self.draw(f))?;

            // Handle input with timeout
            if event::poll(Duration::from_millis(50))? {
                if let Event::Key(key) = event::read()? {
                    self.handle_key(key.code, key.modifiers);
                }
            }
        }

        // Restore terminal
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        Ok(())
    }

    /// Drain pending driver updates
    fn process_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            match event {
                UiEvent::Lines(lines) => {
                    self.conversation.extend(lines);
                    self.autoscroll();
                }
                UiEvent::Error(message) => {
                    self.conversation.push(format!("! {message}"));
                    self.autoscroll();
                }
                UiEvent::Busy(busy) => self.busy = busy,
                UiEvent::History(history) => {
                    self.history = history;
                    self.history_cursor = 0;
                }
                UiEvent::Dataset(dataset) => self.dataset = dataset,
            }
        }
    }

    fn autoscroll(&mut self) {
        if self.conversation.len() > 100 {
            self.chat_scroll = (self.conversation.len() - 100) as u16;
        }
    }

    /// Handle keyboard input
    fn handle_key(&mut self, code: KeyCode, modifiers: KeyModifiers) {
        // Global shortcuts
        if modifiers.contains(KeyModifiers::CONTROL) {
            match code {
                KeyCode::Char('c') => {
                    let _ = self.commands.send(UiCommand::Quit);
                    self.should_quit = true;
                }
                KeyCode::Char('h') => {
                    self.focus = match self.focus {
                        Focus::Chat => Focus::History,
                        Focus::History => Focus::Chat,
                    };
                }
                KeyCode::Char('n') => {
                    let _ = self.commands.send(UiCommand::NewChat);
                    self.conversation
                        .push("[New chat - selection cleared]".to_string());
                }
                _ => {}
            }
            return;
        }

        if self.focus == Focus::Chat {
            match code {
                KeyCode::Enter => {
                    if !self.input.is_empty() && !self.busy {
                        let input = std::mem::take(&mut self.input);
                        self.conversation.push(format!("> {input}"));
                        self.autoscroll();
                        let _ = self.commands.send(UiCommand::Ask(input));
                    }
                }
                KeyCode::Char(c) => {
                    self.input.push(c);
                }
                KeyCode::Backspace => {
                    self.input.pop();
                }
                KeyCode::Up => {
                    if self.chat_scroll > 0 {
                        self.chat_scroll -= 1;
                    }
                }
                KeyCode::Down => {
                    self.chat_scroll += 1;
                }
                KeyCode::PageUp => {
                    self.chat_scroll = self.chat_scroll.saturating_sub(20);
                }
                KeyCode::PageDown => {
                    self.chat_scroll += 20;
                }
                KeyCode::Esc => {
                    self.input.clear();
                }
                _ => {}
            }
        } else {
            // History sidebar navigation
            match code {
                KeyCode::Up => {
                    self.history_cursor = self.history_cursor.saturating_sub(1);
                }
                KeyCode::Down => {
                    if self.history_cursor + 1 < self.history.len() {
                        self.history_cursor += 1;
                    }
                }
                KeyCode::Enter => {
                    self.replay_history_item();
                }
                _ => {}
            }
        }
    }

    /// Replays the stored exchange under the cursor into the chat pane
    fn replay_history_item(&mut self) {
        let Some(entry) = self.history.get(self.history_cursor).cloned() else {
            return;
        };
        self.conversation.push(format!("> {}", entry.question));
        self.conversation.push(entry.answer);
        if !entry.sql.is_empty() {
            self.conversation.push(format!("  sql: {}", entry.sql));
        }
        self.autoscroll();
        self.focus = Focus::Chat;
    }

    /// Draw the UI
    fn draw(&self, frame: &mut Frame) {
        let area = frame.area();

        // Split into main content and status bar
        let main_layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(1)])
            .split(area);

        // Split main content into chat pane and history sidebar
        let panes = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(70), Constraint::Percentage(30)])
            .split(main_layout[0]);

        self.draw_chat_pane(frame, panes[0]);
        self.draw_history_pane(frame, panes[1]);
        self.draw_status_bar(frame, main_layout[1]);
    }

    /// Draw the conversation pane with the input box
    fn draw_chat_pane(&self, frame: &mut Frame, area: Rect) {
        let border_style = if self.focus == Focus::Chat {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::Gray)
        };

        let title = if self.busy {
            " Chat (thinking...) "
        } else {
            " Chat "
        };
        let block = Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_style(border_style);

        let inner = block.inner(area);
        frame.render_widget(block, area);

        // Split inner area for output and input
        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(0), Constraint::Length(3)])
            .split(inner);

        let output_text = self.conversation.join("\n");
        let paragraph = Paragraph::new(output_text)
            .wrap(Wrap { trim: false })
            .scroll((self.chat_scroll, 0));
        frame.render_widget(paragraph, layout[0]);

        let input_block = Block::default()
            .title(" Question ")
            .borders(Borders::ALL)
            .border_style(if self.focus == Focus::Chat {
                Style::default().fg(Color::Green)
            } else {
                Style::default().fg(Color::DarkGray)
            });

        let input_inner = input_block.inner(layout[1]);
        frame.render_widget(input_block, layout[1]);

        let input_text = format!("{}_", self.input);
        frame.render_widget(Paragraph::new(input_text), input_inner);
    }

    /// Draw the history sidebar
    fn draw_history_pane(&self, frame: &mut Frame, area: Rect) {
        let border_style = if self.focus == Focus::History {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default().fg(Color::Gray)
        };

        let block = Block::default()
            .title(" History (Ctrl+H) ")
            .borders(Borders::ALL)
            .border_style(border_style);

        let items: Vec<ListItem> = self
            .history
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let marker = if entry.success { "+" } else { "-" };
                let style = if i == self.history_cursor && self.focus == Focus::History {
                    Style::default().bg(Color::DarkGray).fg(Color::White)
                } else {
                    Style::default()
                };
                ListItem::new(format!("{marker} {}", entry.question)).style(style)
            })
            .collect();

        frame.render_widget(List::new(items).block(block), area);
    }

    /// Draw the status bar
    fn draw_status_bar(&self, frame: &mut Frame, area: Rect) {
        let dataset = self.dataset.as_deref().unwrap_or("none");
        let status = format!(
            " {} | Dataset: {} | Ctrl+H: History | Ctrl+N: New chat | Ctrl+C: Quit ",
            self.email, dataset
        );

        let paragraph =
            Paragraph::new(status).style(Style::default().bg(Color::DarkGray).fg(Color::White));
        frame.render_widget(paragraph, area);
    }
}
