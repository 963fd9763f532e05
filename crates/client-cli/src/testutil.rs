//! In-memory backend used by the state-machine tests.

use crate::api::{Backend, UploadOptions};
use async_trait::async_trait;
use chrono::Utc;
use shared::{ApiError, AskRequest, AskResponse, Dataset, UploadResponse};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn dataset(id: &str, name: &str, columns: &[&str]) -> Dataset {
    Dataset {
        id: id.to_string(),
        dataset_name: name.to_string(),
        original_filename: format!("{name}.csv"),
        table_name: format!("t_{name}"),
        column_names: columns.iter().map(|c| c.to_string()).collect(),
        row_count: 10,
        created_at: Utc::now(),
    }
}

/// Fake backend: holds a mutable server-side dataset list, scripted upload
/// and ask responses, and one-shot failure injection for list/delete.
#[derive(Default)]
pub struct FakeBackend {
    datasets: Mutex<Vec<Dataset>>,
    upload_script: Mutex<VecDeque<Result<UploadResponse, ApiError>>>,
    ask_script: Mutex<VecDeque<Result<AskResponse, ApiError>>>,
    next_list_error: Mutex<Option<ApiError>>,
    next_delete_error: Mutex<Option<ApiError>>,
    upload_gate: Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
    pub list_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub last_upload: Mutex<Option<(String, UploadOptions)>>,
}

impl FakeBackend {
    pub fn with_datasets(datasets: Vec<Dataset>) -> Self {
        let backend = Self::default();
        backend.set_datasets(datasets);
        backend
    }

    pub fn set_datasets(&self, datasets: Vec<Dataset>) {
        *self.datasets.lock().unwrap() = datasets;
    }

    pub fn fail_next_list(&self, error: ApiError) {
        *self.next_list_error.lock().unwrap() = Some(error);
    }

    pub fn fail_next_delete(&self, error: ApiError) {
        *self.next_delete_error.lock().unwrap() = Some(error);
    }

    pub fn script_upload(&self, result: Result<UploadResponse, ApiError>) {
        self.upload_script.lock().unwrap().push_back(result);
    }

    pub fn script_ask(&self, result: Result<AskResponse, ApiError>) {
        self.ask_script.lock().unwrap().push_back(result);
    }

    /// The next upload call blocks until the sender half fires (or drops)
    pub fn gate_next_upload(&self) -> tokio::sync::oneshot::Sender<()> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        *self.upload_gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn completed(dataset_id: &str, reused: bool) -> UploadResponse {
        UploadResponse::Completed {
            success: true,
            dataset_id: Some(dataset_id.to_string()),
            reused,
            message: None,
        }
    }

    pub fn duplicate_of(existing: Dataset) -> UploadResponse {
        UploadResponse::Duplicate {
            duplicate: true,
            existing_dataset: existing,
        }
    }
}

#[async_trait]
impl Backend for FakeBackend {
    async fn list_datasets(&self, _token: &str) -> Result<Vec<Dataset>, ApiError> {
        if let Some(error) = self.next_list_error.lock().unwrap().take() {
            return Err(error);
        }
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.datasets.lock().unwrap().clone())
    }

    async fn upload(
        &self,
        _token: &str,
        filename: &str,
        _bytes: Vec<u8>,
        options: UploadOptions,
    ) -> Result<UploadResponse, ApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_upload.lock().unwrap() = Some((filename.to_string(), options));

        let gate = self.upload_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        self.upload_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ApiError::Api {
                    status: 500,
                    detail: "unscripted upload".to_string(),
                })
            })
    }

    async fn delete_dataset(&self, _token: &str, id: &str) -> Result<(), ApiError> {
        if let Some(error) = self.next_delete_error.lock().unwrap().take() {
            return Err(error);
        }
        let mut datasets = self.datasets.lock().unwrap();
        let before = datasets.len();
        datasets.retain(|d| d.id != id);
        if datasets.len() == before {
            return Err(ApiError::NotFound(format!("dataset {id} not found")));
        }
        Ok(())
    }

    async fn ask(&self, _token: &str, _request: &AskRequest) -> Result<AskResponse, ApiError> {
        self.ask_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ApiError::Api {
                    status: 500,
                    detail: "unscripted ask".to_string(),
                })
            })
    }
}
