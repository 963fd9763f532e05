//! Persistence bridge: durable client-local state with expiry.
//!
//! Three slices live under the data directory, each its own file:
//! the selection blob (24h expiry, lazily deleted on expired read), the chat
//! history (no expiry, user-clearable), and the dismissed storage-warning
//! flag. Writes are wholesale, last-write-wins; concurrent csvchat processes
//! are not coordinated.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "app_persisted_state.json";
const HISTORY_FILE: &str = "chat_history.json";
const WARNING_FILE: &str = "storage_warning_dismissed";

/// Selection blob restored once at session start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub selected_dataset_id: String,
    pub columns: Vec<String>,
    pub is_uploaded: bool,
    pub last_updated: DateTime<Utc>,
}

impl PersistedState {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_updated >= Duration::hours(24)
    }
}

/// One question/answer exchange, newest first in the stored list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryItem {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub sql: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct PersistenceBridge {
    dir: PathBuf,
}

impl PersistenceBridge {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    fn warning_path(&self) -> PathBuf {
        self.dir.join(WARNING_FILE)
    }

    // === Selection blob ===

    /// Overwrites the selection blob wholesale, stamping `last_updated`
    pub fn save_state(&self, selected_dataset_id: &str, columns: &[String]) -> io::Result<()> {
        let state = PersistedState {
            selected_dataset_id: selected_dataset_id.to_string(),
            columns: columns.to_vec(),
            is_uploaded: true,
            last_updated: Utc::now(),
        };
        write_json(&self.state_path(), &state)
    }

    /// Returns the persisted selection, or `None` if absent, corrupt, or
    /// older than 24 hours. Expired and corrupt entries are deleted eagerly.
    pub fn load_state(&self) -> Option<PersistedState> {
        let state: PersistedState = match read_json(&self.state_path()) {
            ReadOutcome::Value(v) => v,
            ReadOutcome::Missing => return None,
            ReadOutcome::Corrupt => {
                tracing::warn!("Discarding unreadable persisted state");
                self.clear_state();
                return None;
            }
        };

        if state.is_expired(Utc::now()) {
            self.clear_state();
            return None;
        }

        Some(state)
    }

    pub fn clear_state(&self) {
        let _ = std::fs::remove_file(self.state_path());
    }

    // === Chat history ===

    pub fn save_history(&self, history: &[HistoryItem]) -> io::Result<()> {
        write_json(&self.history_path(), &history)
    }

    /// Loads the stored history; a corrupt file is removed and treated as
    /// empty, matching the reset-on-parse-failure behavior of the UI
    pub fn load_history(&self) -> Vec<HistoryItem> {
        match read_json(&self.history_path()) {
            ReadOutcome::Value(v) => v,
            ReadOutcome::Missing => Vec::new(),
            ReadOutcome::Corrupt => {
                tracing::warn!("Discarding unreadable chat history");
                self.clear_history();
                Vec::new()
            }
        }
    }

    pub fn clear_history(&self) {
        let _ = std::fs::remove_file(self.history_path());
    }

    // === Storage warning flag ===

    pub fn is_warning_dismissed(&self) -> bool {
        self.warning_path().exists()
    }

    pub fn dismiss_warning(&self) {
        let _ = std::fs::write(self.warning_path(), b"true");
    }
}

enum ReadOutcome<T> {
    Value(T),
    Missing,
    Corrupt,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> ReadOutcome<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return ReadOutcome::Missing,
        Err(_) => return ReadOutcome::Corrupt,
    };
    match serde_json::from_str(&content) {
        Ok(v) => ReadOutcome::Value(v),
        Err(_) => ReadOutcome::Corrupt,
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let content = serde_json::to_string(value)?;
    std::fs::write(path, content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn bridge() -> (TempDir, PersistenceBridge) {
        let dir = TempDir::new().unwrap();
        let bridge = PersistenceBridge::new(dir.path().to_path_buf());
        (dir, bridge)
    }

    #[test]
    fn test_state_round_trip() {
        let (_dir, bridge) = bridge();
        let columns = vec!["x".to_string(), "y".to_string()];
        bridge.save_state("d1", &columns).unwrap();

        let state = bridge.load_state().unwrap();
        assert_eq!(state.selected_dataset_id, "d1");
        assert_eq!(state.columns, columns);
        assert!(state.is_uploaded);
    }

    #[test]
    fn test_state_expires_after_24h() {
        let (dir, bridge) = bridge();
        let stale = PersistedState {
            selected_dataset_id: "d1".to_string(),
            columns: vec!["x".to_string()],
            is_uploaded: true,
            last_updated: Utc::now() - Duration::hours(25),
        };
        let path = dir.path().join(STATE_FILE);
        std::fs::write(&path, serde_json::to_string(&stale).unwrap()).unwrap();

        assert!(bridge.load_state().is_none());
        assert!(!path.exists(), "expired entry must be deleted on read");
    }

    #[test]
    fn test_state_just_inside_expiry_window_survives() {
        let (dir, bridge) = bridge();
        let recent = PersistedState {
            selected_dataset_id: "d1".to_string(),
            columns: vec![],
            is_uploaded: true,
            last_updated: Utc::now() - Duration::hours(23),
        };
        std::fs::write(
            dir.path().join(STATE_FILE),
            serde_json::to_string(&recent).unwrap(),
        )
        .unwrap();

        assert!(bridge.load_state().is_some());
    }

    #[test]
    fn test_corrupt_state_is_removed() {
        let (dir, bridge) = bridge();
        let path = dir.path().join(STATE_FILE);
        std::fs::write(&path, "{not json").unwrap();

        assert!(bridge.load_state().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn test_clear_state_is_idempotent() {
        let (_dir, bridge) = bridge();
        bridge.clear_state();
        bridge.save_state("d1", &[]).unwrap();
        bridge.clear_state();
        bridge.clear_state();
        assert!(bridge.load_state().is_none());
    }

    #[test]
    fn test_history_round_trip_and_clear() {
        let (_dir, bridge) = bridge();
        assert!(bridge.load_history().is_empty());

        let items = vec![HistoryItem {
            id: "1".to_string(),
            question: "total?".to_string(),
            answer: "42".to_string(),
            sql: "SELECT 42".to_string(),
            timestamp: Utc::now(),
            success: true,
        }];
        bridge.save_history(&items).unwrap();
        assert_eq!(bridge.load_history(), items);

        bridge.clear_history();
        assert!(bridge.load_history().is_empty());
    }

    #[test]
    fn test_corrupt_history_treated_as_empty() {
        let (dir, bridge) = bridge();
        std::fs::write(dir.path().join(HISTORY_FILE), "[{").unwrap();
        assert!(bridge.load_history().is_empty());
        assert!(!dir.path().join(HISTORY_FILE).exists());
    }

    #[test]
    fn test_warning_flag() {
        let (_dir, bridge) = bridge();
        assert!(!bridge.is_warning_dismissed());
        bridge.dismiss_warning();
        assert!(bridge.is_warning_dismissed());
    }
}
