//! Upload reconciler: drives one upload attempt through progress,
//! duplicate detection, and resolution.
//!
//! The machine is split-phase: [`UploadReconciler::begin`] stages a file and
//! enters `Uploading`, [`UploadReconciler::complete`] applies the server
//! verdict for a specific [`Attempt`]. Starting a new attempt supersedes the
//! previous one; a verdict carrying a superseded ticket is dropped, never
//! applied. The async `handle_file_upload` / `reuse` / `force_new` drivers
//! compose these primitives with a [`Backend`].
//!
//! Progress is a UX affordance, not transfer measurement: it ticks toward
//! 90 while the server is thinking and jumps to 100 on success.

use crate::api::{Backend, UploadOptions};
use shared::{ApiError, Dataset, UploadResponse};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

const PROGRESS_CAP: u8 = 90;
const PROGRESS_STEP: u8 = 10;
const PROGRESS_TICK: Duration = Duration::from_millis(100);

/// Phase of the current upload attempt
#[derive(Debug, Clone, PartialEq)]
pub enum UploadPhase {
    Idle,
    Uploading,
    /// Server matched the content against an existing dataset; the staged
    /// file is retained until the user resolves the conflict
    DuplicateDetected { existing: Dataset },
    Resolving,
    Done { dataset_id: String, reused: bool },
    Failed { message: String },
}

/// File staged for upload or duplicate resolution
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFile {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Ticket for one attempt; stale tickets make `complete` a no-op
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attempt(u64);

pub struct UploadReconciler {
    phase: UploadPhase,
    progress: Arc<AtomicU8>,
    pending: Option<PendingFile>,
    attempt: u64,
}

impl Default for UploadReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadReconciler {
    pub fn new() -> Self {
        Self {
            phase: UploadPhase::Idle,
            progress: Arc::new(AtomicU8::new(0)),
            pending: None,
            attempt: 0,
        }
    }

    pub fn phase(&self) -> &UploadPhase {
        &self.phase
    }

    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::Relaxed)
    }

    /// Shared progress cell for UIs that render while an attempt is awaited
    pub fn progress_probe(&self) -> Arc<AtomicU8> {
        Arc::clone(&self.progress)
    }

    pub fn pending_file(&self) -> Option<&PendingFile> {
        self.pending.as_ref()
    }

    /// Validates and stages a file, entering `Uploading`. Replaces any
    /// attempt still in flight. The only error is client-side validation
    /// (wrong extension), raised before anything touches the network.
    pub fn begin(&mut self, filename: &str, bytes: &[u8]) -> Result<Attempt, ApiError> {
        if !filename.ends_with(".csv") {
            return Err(ApiError::Validation(
                "Please upload a CSV file".to_string(),
            ));
        }

        self.attempt += 1;
        self.phase = UploadPhase::Uploading;
        self.progress.store(0, Ordering::Relaxed);
        self.pending = Some(PendingFile {
            filename: filename.to_string(),
            bytes: bytes.to_vec(),
        });
        Ok(Attempt(self.attempt))
    }

    /// Applies the server verdict for `attempt`. Verdicts for superseded or
    /// cancelled attempts are dropped. Transport and backend failures become
    /// the `Failed` phase; they are not propagated as errors.
    pub fn complete(
        &mut self,
        attempt: Attempt,
        result: Result<UploadResponse, ApiError>,
    ) -> &UploadPhase {
        if attempt.0 != self.attempt {
            tracing::debug!("Dropping verdict for superseded upload attempt");
            return &self.phase;
        }

        match result {
            Ok(UploadResponse::Duplicate {
                existing_dataset, ..
            }) => {
                self.progress.store(0, Ordering::Relaxed);
                self.phase = UploadPhase::DuplicateDetected {
                    existing: existing_dataset,
                };
            }
            Ok(UploadResponse::Completed {
                success: true,
                dataset_id: Some(dataset_id),
                reused,
                ..
            }) => {
                self.progress.store(100, Ordering::Relaxed);
                self.pending = None;
                self.phase = UploadPhase::Done { dataset_id, reused };
            }
            Ok(UploadResponse::Completed { message, .. }) => {
                self.fail(message.unwrap_or_else(|| "Upload failed".to_string()));
            }
            Err(e) => self.fail(e.to_string()),
        }
        &self.phase
    }

    /// Enters `Resolving`, handing back the staged file for the follow-up
    /// request. Only valid while a duplicate verdict is pending.
    fn resolve(&mut self) -> Result<(Attempt, PendingFile), ApiError> {
        if !matches!(self.phase, UploadPhase::DuplicateDetected { .. }) {
            return Err(ApiError::Validation(
                "no pending duplicate to resolve".to_string(),
            ));
        }
        let Some(file) = self.pending.clone() else {
            return Err(ApiError::Validation(
                "no pending duplicate to resolve".to_string(),
            ));
        };

        self.attempt += 1;
        self.phase = UploadPhase::Resolving;
        self.progress.store(0, Ordering::Relaxed);
        Ok((Attempt(self.attempt), file))
    }

    /// Abandons the attempt: discards the staged file, returns to `Idle`,
    /// and invalidates the in-flight ticket so a late verdict is ignored
    pub fn cancel(&mut self) {
        self.attempt += 1;
        self.phase = UploadPhase::Idle;
        self.progress.store(0, Ordering::Relaxed);
        self.pending = None;
    }

    fn fail(&mut self, message: String) {
        tracing::warn!("Upload failed: {message}");
        self.progress.store(0, Ordering::Relaxed);
        self.pending = None;
        self.phase = UploadPhase::Failed { message };
    }

    fn start_progress_ticker(&self) -> tokio::task::JoinHandle<()> {
        let progress = Arc::clone(&self.progress);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(PROGRESS_TICK).await;
                let current = progress.load(Ordering::Relaxed);
                if current >= PROGRESS_CAP {
                    break;
                }
                progress.store(
                    (current + PROGRESS_STEP).min(PROGRESS_CAP),
                    Ordering::Relaxed,
                );
            }
        })
    }

    // === Async drivers ===

    /// Full upload flow: validate, stage, send, apply the verdict.
    ///
    /// Returns the resulting phase; `Err` is only the pre-network
    /// validation rejection. Check the phase for `DuplicateDetected` and
    /// follow up with [`reuse`](Self::reuse), [`force_new`](Self::force_new)
    /// or [`cancel`](Self::cancel).
    pub async fn handle_file_upload<B: Backend>(
        &mut self,
        backend: &B,
        token: &str,
        filename: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> Result<UploadPhase, ApiError> {
        let attempt = self.begin(filename, &bytes)?;
        let ticker = self.start_progress_ticker();
        let result = backend.upload(token, filename, bytes, options).await;
        ticker.abort();
        Ok(self.complete(attempt, result).clone())
    }

    /// Duplicate resolution: bind the existing dataset (no re-ingest)
    pub async fn reuse<B: Backend>(
        &mut self,
        backend: &B,
        token: &str,
    ) -> Result<UploadPhase, ApiError> {
        self.run_resolution(
            backend,
            token,
            UploadOptions {
                reuse: true,
                force_upload: false,
            },
        )
        .await
    }

    /// Duplicate resolution: ingest a distinct copy anyway
    pub async fn force_new<B: Backend>(
        &mut self,
        backend: &B,
        token: &str,
    ) -> Result<UploadPhase, ApiError> {
        self.run_resolution(
            backend,
            token,
            UploadOptions {
                reuse: false,
                force_upload: true,
            },
        )
        .await
    }

    async fn run_resolution<B: Backend>(
        &mut self,
        backend: &B,
        token: &str,
        options: UploadOptions,
    ) -> Result<UploadPhase, ApiError> {
        let (attempt, file) = self.resolve()?;
        let ticker = self.start_progress_ticker();
        let result = backend
            .upload(token, &file.filename, file.bytes, options)
            .await;
        ticker.abort();
        Ok(self.complete(attempt, result).clone())
    }
}
