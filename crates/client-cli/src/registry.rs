//! Dataset registry: the list of datasets owned by the signed-in user and
//! the single active selection.
//!
//! The backend is the source of truth: every [`DatasetRegistry::load`]
//! replaces the cached list wholesale. The registry enforces the selection
//! invariant — a selection always refers to an id present in the current
//! list — and clears anything dangling after out-of-band deletions.
//!
//! List replacement and selection changes triggered by the same call happen
//! before the call returns; callers never observe a new list paired with a
//! stale selection.

use crate::api::Backend;
use crate::persistence::PersistenceBridge;
use shared::{ApiError, Dataset};

/// One-shot application of the persisted selection at session start.
/// Once the transition to `Restored` has happened, later loads and explicit
/// user selections are never overridden by stale persisted state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Restoration {
    Pending,
    Restored,
}

pub struct DatasetRegistry {
    datasets: Vec<Dataset>,
    selected: Option<Dataset>,
    restoration: Restoration,
    bridge: PersistenceBridge,
}

impl DatasetRegistry {
    pub fn new(bridge: PersistenceBridge) -> Self {
        Self {
            datasets: Vec::new(),
            selected: None,
            restoration: Restoration::Pending,
            bridge,
        }
    }

    pub fn datasets(&self) -> &[Dataset] {
        &self.datasets
    }

    pub fn selected(&self) -> Option<&Dataset> {
        self.selected.as_ref()
    }

    fn find(&self, id: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.id == id)
    }

    /// Fetches the full dataset list and replaces the cache wholesale.
    ///
    /// When `select_id` names a dataset present in the fresh list, it becomes
    /// the selection within the same call. Otherwise the previous selection
    /// is kept if still present (re-pointed at the fresh server copy) and
    /// cleared if the dataset disappeared server-side.
    pub async fn load<B: Backend>(
        &mut self,
        backend: &B,
        token: &str,
        select_id: Option<&str>,
    ) -> Result<(), ApiError> {
        let fetched = backend.list_datasets(token).await?;
        self.datasets = fetched;

        if let Some(id) = select_id {
            if let Some(dataset) = self.find(id).cloned() {
                self.select(Some(dataset))?;
                return Ok(());
            }
        }

        if let Some(previous) = self.selected.take() {
            // refresh or drop the previous selection against the new list
            self.selected = self.find(&previous.id).cloned();
            if self.selected.is_none() {
                tracing::debug!(id = %previous.id, "Selection no longer exists, clearing");
            }
        }

        Ok(())
    }

    /// Sets the selection. A non-null selection must name a dataset in the
    /// current list and is handed to the persistence bridge; selecting
    /// nothing leaves persisted state alone (that is `clear_state`'s job).
    pub fn select(&mut self, dataset: Option<Dataset>) -> Result<(), ApiError> {
        match dataset {
            Some(dataset) => {
                if self.find(&dataset.id).is_none() {
                    return Err(ApiError::NotFound(format!(
                        "dataset {} is not in the loaded list",
                        dataset.id
                    )));
                }
                if let Err(e) = self
                    .bridge
                    .save_state(&dataset.id, &dataset.column_names)
                {
                    tracing::warn!("Failed to persist selection: {e}");
                }
                self.selected = Some(dataset);
            }
            None => self.selected = None,
        }
        Ok(())
    }

    /// Deletes a dataset server-side, reconciling local state on success.
    ///
    /// Deleting the selected dataset clears the selection and the persisted
    /// state before the reload, so no caller observes a list without the
    /// dataset but a selection still pointing at it. A `NotFound` from the
    /// backend means the client was stale; the list is resynchronized and
    /// the error still surfaced. Any other failure leaves list and selection
    /// untouched.
    pub async fn remove<B: Backend>(
        &mut self,
        backend: &B,
        token: &str,
        id: &str,
    ) -> Result<(), ApiError> {
        match backend.delete_dataset(token, id).await {
            Ok(()) => {
                if self.selected.as_ref().is_some_and(|d| d.id == id) {
                    self.selected = None;
                    self.bridge.clear_state();
                }
                self.load(backend, token, None).await
            }
            Err(ApiError::NotFound(detail)) => {
                if let Err(e) = self.load(backend, token, None).await {
                    tracing::warn!("Resynchronizing reload failed: {e}");
                }
                Err(ApiError::NotFound(detail))
            }
            Err(e) => Err(e),
        }
    }

    /// "New chat": forgets selection and persisted state, backend untouched
    pub fn clear_state(&mut self) {
        self.bridge.clear_state();
        self.selected = None;
    }

    /// Applies the persisted selection against the loaded list, at most once
    /// per registry lifetime. Call after the first successful `load`.
    pub fn restore_persisted(&mut self) -> Option<&Dataset> {
        if self.restoration == Restoration::Restored {
            return None;
        }
        self.restoration = Restoration::Restored;

        let state = self.bridge.load_state()?;
        let dataset = self.find(&state.selected_dataset_id).cloned()?;
        tracing::info!(id = %dataset.id, "Restored persisted selection");
        // select() re-persists, refreshing the expiry window
        self.select(Some(dataset)).ok()?;
        self.selected.as_ref()
    }

    /// Sign-out path: drops the cached list, the selection, and the
    /// persisted state so nothing from the previous user survives
    pub fn invalidate(&mut self) {
        self.datasets.clear();
        self.selected = None;
        self.bridge.clear_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{dataset, FakeBackend};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    const TOKEN: &str = "jwt-test";

    fn registry() -> (TempDir, DatasetRegistry) {
        let dir = TempDir::new().unwrap();
        let bridge = PersistenceBridge::new(dir.path().to_path_buf());
        (dir, DatasetRegistry::new(bridge))
    }

    fn bridge_for(dir: &TempDir) -> PersistenceBridge {
        PersistenceBridge::new(dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn test_load_replaces_list_wholesale() {
        let (_dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);

        registry.load(&backend, TOKEN, None).await.unwrap();
        assert_eq!(registry.datasets().len(), 1);

        backend.set_datasets(vec![dataset("d2", "two", &["y"]), dataset("d3", "three", &["z"])]);
        registry.load(&backend, TOKEN, None).await.unwrap();

        let ids: Vec<&str> = registry.datasets().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["d2", "d3"]);
    }

    #[tokio::test]
    async fn test_load_with_select_id_applies_selection_in_same_call() {
        let (_dir, mut registry) = registry();
        let backend =
            FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"]), dataset("d2", "two", &["y"])]);

        registry.load(&backend, TOKEN, Some("d2")).await.unwrap();

        assert_eq!(registry.selected().unwrap().id, "d2");
        assert_eq!(registry.datasets().len(), 2);
    }

    #[tokio::test]
    async fn test_load_with_unknown_select_id_keeps_previous_selection() {
        let (_dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);

        registry.load(&backend, TOKEN, Some("d1")).await.unwrap();
        registry.load(&backend, TOKEN, Some("ghost")).await.unwrap();

        assert_eq!(registry.selected().unwrap().id, "d1");
    }

    #[tokio::test]
    async fn test_load_clears_dangling_selection() {
        let (_dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);

        registry.load(&backend, TOKEN, Some("d1")).await.unwrap();
        assert!(registry.selected().is_some());

        // out-of-band deletion server-side
        backend.set_datasets(vec![dataset("d2", "two", &["y"])]);
        registry.load(&backend, TOKEN, None).await.unwrap();

        assert!(registry.selected().is_none());
    }

    #[tokio::test]
    async fn test_load_refreshes_selected_dataset_from_server_copy() {
        let (_dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);
        registry.load(&backend, TOKEN, Some("d1")).await.unwrap();

        let mut updated = dataset("d1", "one", &["x"]);
        updated.row_count = 999;
        backend.set_datasets(vec![updated]);
        registry.load(&backend, TOKEN, None).await.unwrap();

        assert_eq!(registry.selected().unwrap().row_count, 999);
    }

    #[tokio::test]
    async fn test_load_failure_leaves_state_untouched() {
        let (_dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);
        registry.load(&backend, TOKEN, Some("d1")).await.unwrap();

        backend.fail_next_list(ApiError::Network("boom".to_string()));
        let err = registry.load(&backend, TOKEN, None).await.unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));

        assert_eq!(registry.datasets().len(), 1);
        assert_eq!(registry.selected().unwrap().id, "d1");
    }

    #[tokio::test]
    async fn test_select_persists_state() {
        let (dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x", "y"])]);
        registry.load(&backend, TOKEN, None).await.unwrap();

        let d = registry.datasets()[0].clone();
        registry.select(Some(d)).unwrap();

        let state = bridge_for(&dir).load_state().unwrap();
        assert_eq!(state.selected_dataset_id, "d1");
        assert_eq!(state.columns, vec!["x", "y"]);
        assert!(state.is_uploaded);
    }

    #[tokio::test]
    async fn test_select_unknown_dataset_is_rejected() {
        let (_dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);
        registry.load(&backend, TOKEN, None).await.unwrap();

        let err = registry
            .select(Some(dataset("ghost", "ghost", &["x"])))
            .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(registry.selected().is_none());
    }

    #[tokio::test]
    async fn test_select_none_keeps_persisted_state() {
        let (dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);
        registry.load(&backend, TOKEN, Some("d1")).await.unwrap();

        registry.select(None).unwrap();

        assert!(registry.selected().is_none());
        assert!(bridge_for(&dir).load_state().is_some());
    }

    #[tokio::test]
    async fn test_remove_selected_clears_selection_and_persisted_state() {
        // Sample scenario: selection = d1 with columns [x, y]; remove("d1")
        let (dir, mut registry) = registry();
        let backend =
            FakeBackend::with_datasets(vec![dataset("d1", "one", &["x", "y"]), dataset("d2", "two", &["z"])]);
        registry.load(&backend, TOKEN, Some("d1")).await.unwrap();

        registry.remove(&backend, TOKEN, "d1").await.unwrap();

        assert!(registry.selected().is_none());
        assert!(bridge_for(&dir).load_state().is_none());
        assert!(registry.datasets().iter().all(|d| d.id != "d1"));
    }

    #[tokio::test]
    async fn test_remove_non_selected_leaves_selection() {
        let (_dir, mut registry) = registry();
        let backend =
            FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"]), dataset("d2", "two", &["y"])]);
        registry.load(&backend, TOKEN, Some("d1")).await.unwrap();

        registry.remove(&backend, TOKEN, "d2").await.unwrap();

        assert_eq!(registry.selected().unwrap().id, "d1");
        assert_eq!(registry.datasets().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_backend_failure_leaves_everything_untouched() {
        let (dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);
        registry.load(&backend, TOKEN, Some("d1")).await.unwrap();

        backend.fail_next_delete(ApiError::Api {
            status: 500,
            detail: "boom".to_string(),
        });
        let err = registry.remove(&backend, TOKEN, "d1").await.unwrap_err();
        assert!(matches!(err, ApiError::Api { .. }));

        assert_eq!(registry.selected().unwrap().id, "d1");
        assert_eq!(registry.datasets().len(), 1);
        assert!(bridge_for(&dir).load_state().is_some());
    }

    #[tokio::test]
    async fn test_remove_not_found_resynchronizes() {
        let (_dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);
        registry.load(&backend, TOKEN, Some("d1")).await.unwrap();

        // server already dropped d1; delete-after-delete
        backend.set_datasets(vec![]);
        backend.fail_next_delete(ApiError::NotFound("gone".to_string()));
        let calls_before = backend.list_calls.load(Ordering::SeqCst);

        let err = registry.remove(&backend, TOKEN, "d1").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
        assert!(backend.list_calls.load(Ordering::SeqCst) > calls_before);
        assert!(registry.selected().is_none(), "stale selection reconciled away");
        assert!(registry.datasets().is_empty());
    }

    #[tokio::test]
    async fn test_clear_state_does_not_touch_backend() {
        let (dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);
        registry.load(&backend, TOKEN, Some("d1")).await.unwrap();
        let calls_before = backend.list_calls.load(Ordering::SeqCst);

        registry.clear_state();

        assert!(registry.selected().is_none());
        assert!(bridge_for(&dir).load_state().is_none());
        assert_eq!(backend.list_calls.load(Ordering::SeqCst), calls_before);
        assert_eq!(registry.datasets().len(), 1, "list survives a new chat");
    }

    #[tokio::test]
    async fn test_restore_persisted_applies_exactly_once() {
        let (dir, mut registry) = registry();
        bridge_for(&dir)
            .save_state("d1", &["x".to_string()])
            .unwrap();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);
        registry.load(&backend, TOKEN, None).await.unwrap();

        assert_eq!(registry.restore_persisted().unwrap().id, "d1");

        // user moves on; a second restoration attempt must not fight back
        registry.select(None).unwrap();
        assert!(registry.restore_persisted().is_none());
        assert!(registry.selected().is_none());
    }

    #[tokio::test]
    async fn test_restore_persisted_with_unknown_id_selects_nothing() {
        let (dir, mut registry) = registry();
        bridge_for(&dir)
            .save_state("ghost", &["x".to_string()])
            .unwrap();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);
        registry.load(&backend, TOKEN, None).await.unwrap();

        assert!(registry.restore_persisted().is_none());
        assert!(registry.selected().is_none());

        // restoration is spent even when nothing matched
        registry.select(None).unwrap();
        assert!(registry.restore_persisted().is_none());
    }

    #[tokio::test]
    async fn test_invalidate_clears_everything() {
        let (dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![dataset("d1", "one", &["x"])]);
        registry.load(&backend, TOKEN, Some("d1")).await.unwrap();

        registry.invalidate();

        assert!(registry.datasets().is_empty());
        assert!(registry.selected().is_none());
        assert!(bridge_for(&dir).load_state().is_none());
    }

    /// Selection validity invariant: whatever sequence of load / select /
    /// remove / clear_state runs, and whatever the server does out-of-band,
    /// the selection is always either empty or present in the cached list.
    #[tokio::test]
    async fn test_selection_invariant_under_random_interleavings() {
        let (_dir, mut registry) = registry();
        let backend = FakeBackend::with_datasets(vec![]);
        let mut rng = StdRng::seed_from_u64(0xC5_1C_4A_7);
        let pool: Vec<String> = (0..8).map(|i| format!("d{i}")).collect();

        for _ in 0..300 {
            // server-side churn the client does not know about
            if rng.gen_bool(0.3) {
                let server: Vec<_> = pool
                    .iter()
                    .filter(|_| rng.gen_bool(0.5))
                    .map(|id| dataset(id, id, &["c"]))
                    .collect();
                backend.set_datasets(server);
            }

            let id = pool[rng.gen_range(0..pool.len())].clone();
            match rng.gen_range(0..5) {
                0 => {
                    let _ = registry.load(&backend, TOKEN, None).await;
                }
                1 => {
                    let _ = registry.load(&backend, TOKEN, Some(&id)).await;
                }
                2 => {
                    let pick = registry.find(&id).cloned();
                    let _ = registry.select(pick);
                }
                3 => {
                    let _ = registry.remove(&backend, TOKEN, &id).await;
                }
                _ => registry.clear_state(),
            }

            if let Some(selected) = registry.selected() {
                assert!(
                    registry.datasets().iter().any(|d| d.id == selected.id),
                    "selection {} dangling after operation",
                    selected.id
                );
            }
        }
    }
}
