use async_trait::async_trait;

use crate::sync::models::{SyncState, SyncStatistics, SyncedOrder};
use mirra_common::error::MirraResult;

#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Current singleton state. Returns the zero-value state when nothing is
    /// persisted yet or the store cannot be read (logged, never propagated).
    async fn read_state(&self) -> SyncState;

    /// Persist `last_sync_completed_at` and `resume_checkpoint` atomically.
    /// Lock fields are ignored.
    async fn write_state(&self, state: &SyncState) -> MirraResult<()>;

    /// Fresh read of the lock with the staleness override applied.
    async fn is_locked(&self) -> MirraResult<bool>;

    /// Take the lock unless a live holder exists. Returns `false` when another
    /// run holds it. Never deferred.
    async fn acquire_lock(&self) -> MirraResult<bool>;

    async fn release_lock(&self) -> MirraResult<()>;

    async fn get_synced_order(&self, source_order_id: &str) -> MirraResult<Option<SyncedOrder>>;

    async fn put_synced_order(&self, record: &SyncedOrder) -> MirraResult<()>;

    /// IDs of orders currently in failure state, oldest failure first.
    async fn get_failed_orders(&self) -> MirraResult<Vec<String>>;

    /// Insert a failure, or bump `retry_count` and replace the message if present.
    async fn put_failed_order(
        &self,
        source_order_id: &str,
        error_message: Option<&str>,
    ) -> MirraResult<()>;

    async fn remove_failed_order(&self, source_order_id: &str) -> MirraResult<()>;

    async fn statistics(&self) -> MirraResult<SyncStatistics>;
}
