//! Session controller: one object owning the session store, dataset
//! registry, upload reconciler, and chat session, wiring their contracts
//! together so every surface (subcommands, interactive mode) gets the same
//! semantics.
//!
//! Cross-component rules enforced here: a finished upload always flows into
//! `load(select_id)` so the new or reused dataset is selected before the
//! operation returns, and signing out invalidates the cached registry state
//! synchronously.

use crate::api::{Backend, UploadOptions};
use crate::chat::ChatSession;
use crate::persistence::PersistenceBridge;
use crate::registry::DatasetRegistry;
use crate::session::{Identity, SessionStore};
use crate::upload::{UploadPhase, UploadReconciler};
use shared::{ApiError, AskResponse, Dataset};

pub struct SessionController<B: Backend> {
    backend: B,
    session: SessionStore,
    registry: DatasetRegistry,
    reconciler: UploadReconciler,
    chat: ChatSession,
}

impl<B: Backend> SessionController<B> {
    pub fn new(backend: B, session: SessionStore, bridge: PersistenceBridge) -> Self {
        Self {
            backend,
            session,
            registry: DatasetRegistry::new(bridge.clone()),
            reconciler: UploadReconciler::new(),
            chat: ChatSession::new(bridge),
        }
    }

    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    pub fn reconciler(&self) -> &UploadReconciler {
        &self.reconciler
    }

    pub fn chat(&self) -> &ChatSession {
        &self.chat
    }

    pub fn chat_mut(&mut self) -> &mut ChatSession {
        &mut self.chat
    }

    pub async fn sign_in(&mut self, email: &str, password: &str) -> Result<Identity, ApiError> {
        let identity = self.session.sign_in(email, password).await?.clone();
        Ok(identity)
    }

    pub async fn sign_up(&mut self, email: &str, password: &str) -> Result<Identity, ApiError> {
        let identity = self.session.sign_up(email, password).await?.clone();
        Ok(identity)
    }

    /// Signs out and synchronously drops everything cached for the previous
    /// user: dataset list, selection, persisted selection blob
    pub fn sign_out(&mut self) {
        self.session.sign_out();
        self.registry.invalidate();
    }

    /// Session start: fetch the dataset list and apply the persisted
    /// selection (at most once per process)
    pub async fn startup(&mut self) -> Result<(), ApiError> {
        let token = self.session.token()?;
        self.registry.load(&self.backend, token, None).await?;
        self.registry.restore_persisted();
        Ok(())
    }

    pub async fn refresh(&mut self, select_id: Option<&str>) -> Result<(), ApiError> {
        let token = self.session.token()?;
        self.registry.load(&self.backend, token, select_id).await
    }

    /// Selects a dataset from the loaded list by id
    pub fn select_by_id(&mut self, id: &str) -> Result<Dataset, ApiError> {
        let dataset = self
            .registry
            .datasets()
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("dataset {id} is not in the loaded list")))?;
        self.registry.select(Some(dataset.clone()))?;
        Ok(dataset)
    }

    pub async fn delete_dataset(&mut self, id: &str) -> Result<(), ApiError> {
        let token = self.session.token()?;
        self.registry.remove(&self.backend, token, id).await
    }

    /// "New chat": clears selection and persisted state, keeps history
    pub fn new_chat(&mut self) {
        self.registry.clear_state();
    }

    /// Uploads a file and, when the attempt completes, reloads the dataset
    /// list with the resulting id selected — callers never see a successful
    /// upload without a matching selection
    pub async fn upload(
        &mut self,
        filename: &str,
        bytes: Vec<u8>,
        options: UploadOptions,
    ) -> Result<UploadPhase, ApiError> {
        let token = self.session.token()?;
        let phase = self
            .reconciler
            .handle_file_upload(&self.backend, token, filename, bytes, options)
            .await?;
        self.finish_upload(phase).await
    }

    /// Resolves a pending duplicate by reusing the existing dataset
    pub async fn resolve_reuse(&mut self) -> Result<UploadPhase, ApiError> {
        let token = self.session.token()?;
        let phase = self.reconciler.reuse(&self.backend, token).await?;
        self.finish_upload(phase).await
    }

    /// Resolves a pending duplicate by ingesting a distinct copy
    pub async fn resolve_force_new(&mut self) -> Result<UploadPhase, ApiError> {
        let token = self.session.token()?;
        let phase = self.reconciler.force_new(&self.backend, token).await?;
        self.finish_upload(phase).await
    }

    /// Abandons a pending duplicate, discarding the staged file
    pub fn cancel_upload(&mut self) {
        self.reconciler.cancel();
    }

    async fn finish_upload(&mut self, phase: UploadPhase) -> Result<UploadPhase, ApiError> {
        if let UploadPhase::Done { dataset_id, .. } = &phase {
            let token = self.session.token()?;
            self.registry
                .load(&self.backend, token, Some(dataset_id))
                .await?;
        }
        Ok(phase)
    }

    /// Asks a question about the selected dataset
    pub async fn ask(&mut self, question: &str) -> Result<AskResponse, ApiError> {
        let token = self.session.token()?;
        let Some(dataset) = self.registry.selected() else {
            return Err(ApiError::Validation(
                "Please upload or select a dataset first".to_string(),
            ));
        };
        self.chat.ask(&self.backend, token, dataset, question).await
    }
}
