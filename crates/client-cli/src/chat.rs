//! Chat controller: question/answer flow against the selected dataset and
//! the locally persisted conversation history.

use crate::api::Backend;
use crate::persistence::{HistoryItem, PersistenceBridge};
use chrono::Utc;
use shared::{ApiError, AskRequest, AskResponse, Dataset};
use uuid::Uuid;

pub struct ChatSession {
    history: Vec<HistoryItem>,
    bridge: PersistenceBridge,
}

impl ChatSession {
    /// Loads any previously stored history from the bridge
    pub fn new(bridge: PersistenceBridge) -> Self {
        let history = bridge.load_history();
        Self { history, bridge }
    }

    /// Newest first
    pub fn history(&self) -> &[HistoryItem] {
        &self.history
    }

    /// Case-insensitive search over question, answer, and generated SQL
    pub fn search(&self, query: &str) -> Vec<&HistoryItem> {
        let needle = query.to_lowercase();
        self.history
            .iter()
            .filter(|item| {
                item.question.to_lowercase().contains(&needle)
                    || item.answer.to_lowercase().contains(&needle)
                    || item.sql.to_lowercase().contains(&needle)
            })
            .collect()
    }

    /// Sends a question about `dataset` and records the exchange.
    ///
    /// A `no_data` status or an error-looking answer is recorded as an
    /// unsuccessful exchange but still returned; transport failures record
    /// nothing.
    pub async fn ask<B: Backend>(
        &mut self,
        backend: &B,
        token: &str,
        dataset: &Dataset,
        question: &str,
    ) -> Result<AskResponse, ApiError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ApiError::Validation("question is empty".to_string()));
        }

        let request = AskRequest {
            question: question.to_string(),
            dataset_id: dataset.id.clone(),
        };
        let response = backend.ask(token, &request).await?;

        let item = HistoryItem {
            id: Uuid::new_v4().to_string(),
            question: question.to_string(),
            answer: response.answer.clone(),
            sql: response.generated_sql.clone().unwrap_or_default(),
            timestamp: Utc::now(),
            success: !response.is_no_data()
                && !response.answer.to_lowercase().contains("error"),
        };
        self.history.insert(0, item);
        if let Err(e) = self.bridge.save_history(&self.history) {
            tracing::warn!("Failed to persist chat history: {e}");
        }

        Ok(response)
    }

    pub fn clear(&mut self) {
        self.history.clear();
        self.bridge.clear_history();
    }
}
