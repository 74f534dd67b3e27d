use chrono::{DateTime, Duration, Utc};
use mirra_common::error::{MirraError, MirraResult};
use serde::{Deserialize, Serialize};

/// A held lock older than this is presumed abandoned by a crashed run.
pub const LOCK_STALE_AFTER_MINUTES: i64 = 10;

/// Singleton progress record for the whole deployment.
///
/// `lock_held` / `lock_acquired_at` are only ever written by the lock
/// operations of a [`SyncStateRepository`](super::repositories::SyncStateRepository);
/// `write_state` persists the two progress timestamps and nothing else.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub last_sync_completed_at: Option<DateTime<Utc>>,
    pub resume_checkpoint: Option<DateTime<Utc>>,
    pub lock_held: bool,
    pub lock_acquired_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Free,
    Held { since: DateTime<Utc> },
    /// Held on paper, but past the staleness threshold (or missing its timestamp).
    Stale { since: Option<DateTime<Utc>> },
}

impl SyncState {
    pub fn lock_stale_after() -> Duration {
        Duration::minutes(LOCK_STALE_AFTER_MINUTES)
    }

    pub fn lock_status(&self, now: DateTime<Utc>) -> LockStatus {
        if !self.lock_held {
            return LockStatus::Free;
        }
        match self.lock_acquired_at {
            Some(since) if now - since <= Self::lock_stale_after() => LockStatus::Held { since },
            since => LockStatus::Stale { since },
        }
    }

    /// Whether the lock blocks a new run at `now`, with the staleness override applied.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        let status = self.lock_status(now);
        if let LockStatus::Stale { since } = status {
            tracing::warn!(
                acquired_at = ?since,
                "sync lock is stale, treating it as released"
            );
        }
        matches!(status, LockStatus::Held { .. })
    }

    /// Lower bound for an incremental fetch: `max(resume_checkpoint, last_sync_completed_at)`.
    pub fn incremental_lower_bound(&self) -> Option<DateTime<Utc>> {
        match (self.resume_checkpoint, self.last_sync_completed_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Destination records created for one source order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncedOrder {
    pub source_order_id: String,
    /// First entry is the parent (or only) record; the rest are line-item children.
    pub destination_ids: Vec<String>,
    pub source_updated_at: Option<DateTime<Utc>>,
}

impl SyncedOrder {
    pub fn validate(&self) -> MirraResult<()> {
        if self.destination_ids.is_empty() {
            return Err(MirraError::Validation(format!(
                "synced order {} has no destination records",
                self.source_order_id
            )));
        }
        Ok(())
    }
}

/// Read-only summary served by the status endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub last_sync: Option<DateTime<Utc>>,
    pub total_synced_orders: usize,
    pub total_destination_records: usize,
    pub failed_orders_count: usize,
    pub failed_orders: Vec<String>,
    pub resume_checkpoint: Option<DateTime<Utc>>,
    pub sync_in_progress: bool,
    pub sync_started_at: Option<DateTime<Utc>>,
}
