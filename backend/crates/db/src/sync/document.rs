use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::sync::blob::BlobStore;
use crate::sync::legacy::{lenient_timestamp, normalize_destination_ids};
use crate::sync::models::{SyncState, SyncStatistics, SyncedOrder};
use crate::sync::repositories::SyncStateRepository;
use mirra_common::error::{MirraError, MirraResult};

/// The whole sync state as one JSON document.
///
/// The first six keys are the layout older deployments wrote; the two maps
/// after them carry the remaining per-order fields and are optional on read.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default, with = "lenient_timestamp")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Source order ID to destination IDs, in any of the stored shapes.
    #[serde(default)]
    pub synced_orders: BTreeMap<String, Value>,
    #[serde(default)]
    pub failed_orders: Vec<String>,
    #[serde(default, with = "lenient_timestamp")]
    pub last_processed_updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub sync_in_progress: bool,
    #[serde(default, with = "lenient_timestamp")]
    pub sync_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub synced_orders_updated_at: BTreeMap<String, DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failed_order_details: BTreeMap<String, FailedOrderDetail>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedOrderDetail {
    pub error_message: Option<String>,
    pub retry_count: i32,
    pub failed_at: DateTime<Utc>,
}

impl StateDocument {
    pub fn state(&self) -> SyncState {
        SyncState {
            last_sync_completed_at: self.last_sync,
            resume_checkpoint: self.last_processed_updated_at,
            lock_held: self.sync_in_progress,
            lock_acquired_at: self.sync_started_at,
        }
    }

    pub fn synced_order(&self, source_order_id: &str) -> Option<SyncedOrder> {
        let raw = self.synced_orders.get(source_order_id)?;
        let destination_ids = normalize_destination_ids(raw.clone());
        if destination_ids.is_empty() {
            return None;
        }
        Some(SyncedOrder {
            source_order_id: source_order_id.to_owned(),
            destination_ids,
            source_updated_at: self.synced_orders_updated_at.get(source_order_id).copied(),
        })
    }

    fn total_destination_records(&self) -> usize {
        self.synced_orders
            .values()
            .map(|raw| normalize_destination_ids(raw.clone()).len())
            .sum()
    }
}

/// [`SyncStateRepository`] over a single JSON document in a [`BlobStore`].
///
/// Every mutation is a read-modify-write of the full document, serialized by
/// an in-process mutex and the store's own lock.
pub struct DocumentSyncRepository<B> {
    blob: B,
    guard: Mutex<()>,
}

impl<B: BlobStore> DocumentSyncRepository<B> {
    pub fn new(blob: B) -> Self {
        Self {
            blob,
            guard: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> MirraResult<StateDocument> {
        match self.blob.get().await? {
            None => Ok(StateDocument::default()),
            Some(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Ok(StateDocument::default()),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| MirraError::Database(format!("malformed sync state document: {e}"))),
        }
    }

    async fn save(&self, doc: &StateDocument) -> MirraResult<()> {
        let bytes = serde_json::to_vec_pretty(doc)
            .map_err(|e| MirraError::Internal(format!("failed to encode sync state: {e}")))?;
        self.blob.put(&bytes).await
    }

    async fn update<F>(&self, mutate: F) -> MirraResult<()>
    where
        F: FnOnce(&mut StateDocument) + Send,
    {
        let _held = self.guard.lock().await;
        let _store = self.blob.lock().await?;
        let mut doc = self.load().await?;
        mutate(&mut doc);
        self.save(&doc).await
    }
}

#[async_trait]
impl<B: BlobStore> SyncStateRepository for DocumentSyncRepository<B> {
    async fn read_state(&self) -> SyncState {
        match self.load().await {
            Ok(doc) => doc.state(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to read sync state document, using empty state");
                SyncState::default()
            }
        }
    }

    async fn write_state(&self, state: &SyncState) -> MirraResult<()> {
        let state = state.clone();
        self.update(move |doc| {
            doc.last_sync = state.last_sync_completed_at;
            doc.last_processed_updated_at = state.resume_checkpoint;
        })
        .await
    }

    async fn is_locked(&self) -> MirraResult<bool> {
        let doc = self.load().await?;
        Ok(doc.state().is_locked_at(Utc::now()))
    }

    async fn acquire_lock(&self) -> MirraResult<bool> {
        let _held = self.guard.lock().await;
        let _store = self.blob.lock().await?;
        let mut doc = self.load().await?;
        let now = Utc::now();
        if doc.state().is_locked_at(now) {
            return Ok(false);
        }
        doc.sync_in_progress = true;
        doc.sync_started_at = Some(now);
        self.save(&doc).await?;
        tracing::info!(acquired_at = %now, "sync lock acquired");
        Ok(true)
    }

    async fn release_lock(&self) -> MirraResult<()> {
        self.update(|doc| {
            doc.sync_in_progress = false;
            doc.sync_started_at = None;
        })
        .await?;
        tracing::info!("sync lock released");
        Ok(())
    }

    async fn get_synced_order(&self, source_order_id: &str) -> MirraResult<Option<SyncedOrder>> {
        Ok(self.load().await?.synced_order(source_order_id))
    }

    async fn put_synced_order(&self, record: &SyncedOrder) -> MirraResult<()> {
        record.validate()?;
        let record = record.clone();
        self.update(move |doc| {
            let ids = record.destination_ids.iter().cloned().map(Value::String).collect();
            doc.synced_orders
                .insert(record.source_order_id.clone(), Value::Array(ids));
            match record.source_updated_at {
                Some(ts) => {
                    doc.synced_orders_updated_at
                        .insert(record.source_order_id.clone(), ts);
                }
                None => {
                    doc.synced_orders_updated_at.remove(&record.source_order_id);
                }
            }
        })
        .await
    }

    async fn get_failed_orders(&self) -> MirraResult<Vec<String>> {
        Ok(self.load().await?.failed_orders)
    }

    async fn put_failed_order(
        &self,
        source_order_id: &str,
        error_message: Option<&str>,
    ) -> MirraResult<()> {
        let id = source_order_id.to_owned();
        let message = error_message.map(str::to_owned);
        self.update(move |doc| {
            if !doc.failed_orders.contains(&id) {
                doc.failed_orders.push(id.clone());
            }
            let now = Utc::now();
            doc.failed_order_details
                .entry(id)
                .and_modify(|d| {
                    d.retry_count += 1;
                    d.error_message = message.clone();
                    d.failed_at = now;
                })
                .or_insert(FailedOrderDetail {
                    error_message: message.clone(),
                    retry_count: 1,
                    failed_at: now,
                });
        })
        .await
    }

    async fn remove_failed_order(&self, source_order_id: &str) -> MirraResult<()> {
        let id = source_order_id.to_owned();
        self.update(move |doc| {
            doc.failed_orders.retain(|f| f != &id);
            doc.failed_order_details.remove(&id);
        })
        .await
    }

    async fn statistics(&self) -> MirraResult<SyncStatistics> {
        let doc = self.load().await?;
        let state = doc.state();
        Ok(SyncStatistics {
            last_sync: doc.last_sync,
            total_synced_orders: doc.synced_orders.len(),
            total_destination_records: doc.total_destination_records(),
            failed_orders_count: doc.failed_orders.len(),
            failed_orders: doc.failed_orders.clone(),
            resume_checkpoint: doc.last_processed_updated_at,
            sync_in_progress: state.is_locked_at(Utc::now()),
            sync_started_at: doc.sync_started_at,
        })
    }
}
