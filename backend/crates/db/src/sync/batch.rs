use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::sync::models::{SyncState, SyncStatistics, SyncedOrder};
use crate::sync::repositories::SyncStateRepository;
use mirra_common::error::{MirraError, MirraResult};

#[derive(Debug, Clone)]
enum FailedChange {
    Put(Option<String>),
    Remove,
}

#[derive(Debug, Default)]
struct PendingWrites {
    state: Option<SyncState>,
    synced: HashMap<String, SyncedOrder>,
    /// Insertion order is kept so a flush replays failures in the order they happened.
    failed: Vec<(String, FailedChange)>,
}

impl PendingWrites {
    fn is_empty(&self) -> bool {
        self.state.is_none() && self.synced.is_empty() && self.failed.is_empty()
    }

    fn last_failed_change(&self, source_order_id: &str) -> Option<&FailedChange> {
        self.failed
            .iter()
            .rev()
            .find(|(id, _)| id == source_order_id)
            .map(|(_, change)| change)
    }
}

/// Write-behind wrapper around a [`SyncStateRepository`].
///
/// Between [`begin_batch`](Self::begin_batch) and [`end_batch`](Self::end_batch),
/// progress and per-order writes are held in memory; reads through this wrapper
/// see them. Lock operations always go straight to the inner repository.
pub struct BatchedSyncRepository {
    inner: Arc<dyn SyncStateRepository>,
    pending: Mutex<Option<PendingWrites>>,
}

impl BatchedSyncRepository {
    pub fn new(inner: Arc<dyn SyncStateRepository>) -> Self {
        Self {
            inner,
            pending: Mutex::new(None),
        }
    }

    fn pending(&self) -> MirraResult<MutexGuard<'_, Option<PendingWrites>>> {
        self.pending
            .lock()
            .map_err(|_| MirraError::Internal("batch cache poisoned".to_owned()))
    }

    pub fn begin_batch(&self) -> MirraResult<()> {
        let mut pending = self.pending()?;
        if pending.is_none() {
            *pending = Some(PendingWrites::default());
            tracing::debug!("batch mode started, deferring state writes");
        }
        Ok(())
    }

    pub fn in_batch(&self) -> bool {
        self.pending().map(|p| p.is_some()).unwrap_or(false)
    }

    /// Leave batch mode and write everything held so far.
    ///
    /// Every pending write is attempted; the first failure is returned.
    pub async fn end_batch(&self) -> MirraResult<()> {
        let Some(writes) = self.pending()?.take() else {
            return Ok(());
        };
        if writes.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            synced = writes.synced.len(),
            failed = writes.failed.len(),
            state = writes.state.is_some(),
            "flushing batched state writes"
        );

        let mut first_error = None;
        let mut note = |result: MirraResult<()>, what: &str| {
            if let Err(e) = result {
                tracing::error!(error = %e, what, "batched write failed");
                first_error.get_or_insert(e);
            }
        };

        for record in writes.synced.values() {
            note(self.inner.put_synced_order(record).await, "synced order");
        }
        for (id, change) in &writes.failed {
            let result = match change {
                FailedChange::Put(message) => {
                    self.inner.put_failed_order(id, message.as_deref()).await
                }
                FailedChange::Remove => self.inner.remove_failed_order(id).await,
            };
            note(result, "failed order");
        }
        if let Some(state) = &writes.state {
            note(self.inner.write_state(state).await, "sync state");
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SyncStateRepository for BatchedSyncRepository {
    async fn read_state(&self) -> SyncState {
        let mut state = self.inner.read_state().await;
        if let Ok(pending) = self.pending() {
            if let Some(cached) = pending.as_ref().and_then(|p| p.state.as_ref()) {
                state.last_sync_completed_at = cached.last_sync_completed_at;
                state.resume_checkpoint = cached.resume_checkpoint;
            }
        }
        state
    }

    async fn write_state(&self, state: &SyncState) -> MirraResult<()> {
        {
            let mut pending = self.pending()?;
            if let Some(writes) = pending.as_mut() {
                writes.state = Some(state.clone());
                return Ok(());
            }
        }
        self.inner.write_state(state).await
    }

    async fn is_locked(&self) -> MirraResult<bool> {
        self.inner.is_locked().await
    }

    async fn acquire_lock(&self) -> MirraResult<bool> {
        self.inner.acquire_lock().await
    }

    async fn release_lock(&self) -> MirraResult<()> {
        self.inner.release_lock().await
    }

    async fn get_synced_order(&self, source_order_id: &str) -> MirraResult<Option<SyncedOrder>> {
        {
            let pending = self.pending()?;
            if let Some(record) = pending.as_ref().and_then(|p| p.synced.get(source_order_id)) {
                return Ok(Some(record.clone()));
            }
        }
        self.inner.get_synced_order(source_order_id).await
    }

    async fn put_synced_order(&self, record: &SyncedOrder) -> MirraResult<()> {
        record.validate()?;
        {
            let mut pending = self.pending()?;
            if let Some(writes) = pending.as_mut() {
                writes
                    .synced
                    .insert(record.source_order_id.clone(), record.clone());
                return Ok(());
            }
        }
        self.inner.put_synced_order(record).await
    }

    async fn get_failed_orders(&self) -> MirraResult<Vec<String>> {
        let mut failed = self.inner.get_failed_orders().await?;
        let pending = self.pending()?;
        if let Some(writes) = pending.as_ref() {
            failed.retain(|id| !matches!(writes.last_failed_change(id), Some(FailedChange::Remove)));
            for (id, _) in &writes.failed {
                if matches!(writes.last_failed_change(id), Some(FailedChange::Put(_)))
                    && !failed.contains(id)
                {
                    failed.push(id.clone());
                }
            }
        }
        Ok(failed)
    }

    async fn put_failed_order(
        &self,
        source_order_id: &str,
        error_message: Option<&str>,
    ) -> MirraResult<()> {
        {
            let mut pending = self.pending()?;
            if let Some(writes) = pending.as_mut() {
                writes.failed.push((
                    source_order_id.to_owned(),
                    FailedChange::Put(error_message.map(str::to_owned)),
                ));
                return Ok(());
            }
        }
        self.inner
            .put_failed_order(source_order_id, error_message)
            .await
    }

    async fn remove_failed_order(&self, source_order_id: &str) -> MirraResult<()> {
        {
            let mut pending = self.pending()?;
            if let Some(writes) = pending.as_mut() {
                writes
                    .failed
                    .push((source_order_id.to_owned(), FailedChange::Remove));
                return Ok(());
            }
        }
        self.inner.remove_failed_order(source_order_id).await
    }

    async fn statistics(&self) -> MirraResult<SyncStatistics> {
        self.inner.statistics().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::blob::MemoryBlobStore;
    use crate::sync::document::DocumentSyncRepository;
    use chrono::{TimeZone, Utc};

    fn setup() -> (Arc<dyn SyncStateRepository>, BatchedSyncRepository) {
        let inner: Arc<dyn SyncStateRepository> =
            Arc::new(DocumentSyncRepository::new(MemoryBlobStore::new()));
        let batched = BatchedSyncRepository::new(inner.clone());
        (inner, batched)
    }

    fn record(id: &str) -> SyncedOrder {
        SyncedOrder {
            source_order_id: id.to_owned(),
            destination_ids: vec![format!("page-{id}")],
            source_updated_at: None,
        }
    }

    #[tokio::test]
    async fn writes_pass_through_outside_batch_mode() {
        let (inner, batched) = setup();
        batched.put_synced_order(&record("1")).await.unwrap();
        assert!(inner.get_synced_order("1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn batched_writes_are_invisible_until_flush() {
        let (inner, batched) = setup();
        batched.begin_batch().unwrap();

        let checkpoint = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        batched
            .write_state(&SyncState {
                resume_checkpoint: Some(checkpoint),
                ..Default::default()
            })
            .await
            .unwrap();
        batched.put_synced_order(&record("1")).await.unwrap();
        batched.put_failed_order("2", Some("boom")).await.unwrap();

        // Readers through the wrapper see their own writes.
        assert_eq!(batched.read_state().await.resume_checkpoint, Some(checkpoint));
        assert!(batched.get_synced_order("1").await.unwrap().is_some());
        assert_eq!(batched.get_failed_orders().await.unwrap(), vec!["2"]);

        // Other readers do not.
        assert!(inner.read_state().await.resume_checkpoint.is_none());
        assert!(inner.get_synced_order("1").await.unwrap().is_none());
        assert!(inner.get_failed_orders().await.unwrap().is_empty());

        batched.end_batch().await.unwrap();
        assert!(!batched.in_batch());
        assert_eq!(inner.read_state().await.resume_checkpoint, Some(checkpoint));
        assert!(inner.get_synced_order("1").await.unwrap().is_some());
        assert_eq!(inner.get_failed_orders().await.unwrap(), vec!["2"]);
    }

    #[tokio::test]
    async fn lock_operations_bypass_the_batch() {
        let (inner, batched) = setup();
        batched.begin_batch().unwrap();

        assert!(batched.acquire_lock().await.unwrap());
        assert!(inner.is_locked().await.unwrap());

        batched.release_lock().await.unwrap();
        assert!(!inner.is_locked().await.unwrap());
        batched.end_batch().await.unwrap();
    }

    #[tokio::test]
    async fn flushed_state_does_not_clobber_the_lock() {
        let (inner, batched) = setup();
        batched.begin_batch().unwrap();
        assert!(batched.acquire_lock().await.unwrap());
        batched.write_state(&SyncState::default()).await.unwrap();
        batched.end_batch().await.unwrap();

        assert!(inner.is_locked().await.unwrap());
    }

    #[tokio::test]
    async fn removal_in_batch_hides_existing_failure() {
        let (inner, batched) = setup();
        inner.put_failed_order("7", Some("old")).await.unwrap();

        batched.begin_batch().unwrap();
        batched.remove_failed_order("7").await.unwrap();
        assert!(batched.get_failed_orders().await.unwrap().is_empty());
        assert_eq!(inner.get_failed_orders().await.unwrap(), vec!["7"]);

        batched.end_batch().await.unwrap();
        assert!(inner.get_failed_orders().await.unwrap().is_empty());
    }
}
