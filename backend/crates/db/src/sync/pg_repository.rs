use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use crate::sync::legacy::destination_ids_from_text;
use crate::sync::models::{SyncState, SyncStatistics, SyncedOrder};
use crate::sync::repositories::SyncStateRepository;
use mirra_common::error::{MirraError, MirraResult};

const SCHEMA: &[&str] = &[
    "create table if not exists sync_state (
       id integer primary key,
       last_sync timestamptz,
       last_processed_updated_at timestamptz,
       sync_in_progress boolean not null default false,
       sync_started_at timestamptz,
       created_at timestamptz not null default now(),
       updated_at timestamptz not null default now()
     )",
    "insert into sync_state (id) values (1) on conflict (id) do nothing",
    "create table if not exists synced_orders (
       order_id varchar(100) primary key,
       notion_page_ids text not null,
       updated_at timestamptz,
       created_at timestamptz not null default now()
     )",
    "create table if not exists failed_orders (
       order_id varchar(100) primary key,
       error_message text,
       failed_at timestamptz not null default now(),
       retry_count integer not null default 1
     )",
];

#[derive(Clone)]
pub struct PgSyncRepository {
    pool: PgPool,
}

impl PgSyncRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the three state tables and the singleton row if missing.
    pub async fn ensure_schema(&self) -> MirraResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| MirraError::Database(e.to_string()))?;
        }
        Ok(())
    }

    async fn fetch_state(&self) -> MirraResult<SyncState> {
        let row = sqlx::query(
            "select last_sync, last_processed_updated_at, sync_in_progress, sync_started_at
             from sync_state where id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MirraError::Database(e.to_string()))?;

        Ok(match row {
            Some(r) => SyncState {
                last_sync_completed_at: r.get("last_sync"),
                resume_checkpoint: r.get("last_processed_updated_at"),
                lock_held: r.get::<Option<bool>, _>("sync_in_progress").unwrap_or(false),
                lock_acquired_at: r.get("sync_started_at"),
            },
            None => SyncState::default(),
        })
    }
}

#[async_trait]
impl SyncStateRepository for PgSyncRepository {
    async fn read_state(&self) -> SyncState {
        match self.fetch_state().await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "failed to read sync state, using empty state");
                SyncState::default()
            }
        }
    }

    async fn write_state(&self, state: &SyncState) -> MirraResult<()> {
        sqlx::query(
            "insert into sync_state (id, last_sync, last_processed_updated_at)
             values (1, $1, $2)
             on conflict (id) do update set
               last_sync = excluded.last_sync,
               last_processed_updated_at = excluded.last_processed_updated_at,
               updated_at = now()",
        )
        .bind(state.last_sync_completed_at)
        .bind(state.resume_checkpoint)
        .execute(&self.pool)
        .await
        .map_err(|e| MirraError::Database(e.to_string()))?;
        Ok(())
    }

    async fn is_locked(&self) -> MirraResult<bool> {
        Ok(self.fetch_state().await?.is_locked_at(Utc::now()))
    }

    async fn acquire_lock(&self) -> MirraResult<bool> {
        let now = Utc::now();
        let stale_before: DateTime<Utc> = now - SyncState::lock_stale_after();

        sqlx::query("insert into sync_state (id) values (1) on conflict (id) do nothing")
            .execute(&self.pool)
            .await
            .map_err(|e| MirraError::Database(e.to_string()))?;

        // Single conditional update: of two racing callers, only one matches.
        let row = sqlx::query(
            "update sync_state
             set sync_in_progress = true, sync_started_at = $1, updated_at = $1
             where id = 1
               and (sync_in_progress is not true
                    or sync_started_at is null
                    or sync_started_at < $2)
             returning id",
        )
        .bind(now)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MirraError::Database(e.to_string()))?;

        Ok(row.is_some())
    }

    async fn release_lock(&self) -> MirraResult<()> {
        sqlx::query(
            "update sync_state
             set sync_in_progress = false, sync_started_at = null, updated_at = now()
             where id = 1",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MirraError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_synced_order(&self, source_order_id: &str) -> MirraResult<Option<SyncedOrder>> {
        let row = sqlx::query(
            "select order_id, notion_page_ids, updated_at from synced_orders where order_id = $1",
        )
        .bind(source_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| MirraError::Database(e.to_string()))?;

        // A row whose id list decodes to nothing never reached the destination.
        Ok(row
            .map(|r| SyncedOrder {
                source_order_id: r.get("order_id"),
                destination_ids: destination_ids_from_text(r.get::<&str, _>("notion_page_ids")),
                source_updated_at: r.get("updated_at"),
            })
            .filter(|order| !order.destination_ids.is_empty()))
    }

    async fn put_synced_order(&self, record: &SyncedOrder) -> MirraResult<()> {
        record.validate()?;
        let ids = serde_json::to_string(&record.destination_ids)
            .map_err(|e| MirraError::Internal(e.to_string()))?;

        sqlx::query(
            "insert into synced_orders (order_id, notion_page_ids, updated_at)
             values ($1, $2, $3)
             on conflict (order_id) do update set
               notion_page_ids = excluded.notion_page_ids,
               updated_at = excluded.updated_at",
        )
        .bind(&record.source_order_id)
        .bind(ids)
        .bind(record.source_updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| MirraError::Database(e.to_string()))?;
        Ok(())
    }

    async fn get_failed_orders(&self) -> MirraResult<Vec<String>> {
        let rows = sqlx::query("select order_id from failed_orders order by failed_at, order_id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MirraError::Database(e.to_string()))?;
        Ok(rows.iter().map(|r| r.get("order_id")).collect())
    }

    async fn put_failed_order(
        &self,
        source_order_id: &str,
        error_message: Option<&str>,
    ) -> MirraResult<()> {
        sqlx::query(
            "insert into failed_orders (order_id, error_message, failed_at, retry_count)
             values ($1, $2, now(), 1)
             on conflict (order_id) do update set
               error_message = excluded.error_message,
               failed_at = now(),
               retry_count = failed_orders.retry_count + 1",
        )
        .bind(source_order_id)
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| MirraError::Database(e.to_string()))?;
        Ok(())
    }

    async fn remove_failed_order(&self, source_order_id: &str) -> MirraResult<()> {
        sqlx::query("delete from failed_orders where order_id = $1")
            .bind(source_order_id)
            .execute(&self.pool)
            .await
            .map_err(|e| MirraError::Database(e.to_string()))?;
        Ok(())
    }

    async fn statistics(&self) -> MirraResult<SyncStatistics> {
        let state = self.fetch_state().await?;

        let rows = sqlx::query("select notion_page_ids from synced_orders")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MirraError::Database(e.to_string()))?;
        let total_destination_records = rows
            .iter()
            .map(|r| destination_ids_from_text(r.get::<&str, _>("notion_page_ids")).len())
            .sum();

        let failed_orders = self.get_failed_orders().await?;

        Ok(SyncStatistics {
            last_sync: state.last_sync_completed_at,
            total_synced_orders: rows.len(),
            total_destination_records,
            failed_orders_count: failed_orders.len(),
            failed_orders,
            resume_checkpoint: state.resume_checkpoint,
            sync_in_progress: state.is_locked_at(Utc::now()),
            sync_started_at: state.lock_acquired_at,
        })
    }
}
