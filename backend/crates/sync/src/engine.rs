use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::connector::{DestinationWriter, OrderSource};
use crate::shopify::models::SourceOrder;
use crate::transform::{transform, RecordPlan};
use mirra_common::error::{MirraError, MirraResult};
use mirra_db::sync::batch::BatchedSyncRepository;
use mirra_db::sync::models::{SyncState, SyncStatistics, SyncedOrder};
use mirra_db::sync::repositories::SyncStateRepository;

/// What the caller asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Initial sync until one completes, incremental afterwards.
    #[default]
    #[serde(alias = "incremental")]
    Smart,
    /// Re-scan from the oldest order. Unchanged orders are still skipped.
    Initial,
    /// Only retry orders currently marked failed.
    #[serde(rename = "retry", alias = "retry_failed")]
    RetryFailed,
}

impl std::str::FromStr for SyncMode {
    type Err = MirraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_ascii_lowercase()))
            .map_err(|_| MirraError::Validation(format!("unknown sync mode: {s}")))
    }
}

/// What the engine decided to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStrategy {
    Initial,
    Incremental,
    RetryFailed,
}

#[derive(Debug, Clone, Copy)]
pub struct RunRequest {
    pub mode: SyncMode,
    /// Upper bound on orders written from the since-checkpoint listing.
    /// Unchanged orders are paged past without counting.
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub strategy: SyncStrategy,
    pub fetched: usize,
    pub retried: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub records_created: usize,
    pub records_archived: usize,
    pub failed_order_ids: Vec<String>,
    pub checkpoint: Option<DateTime<Utc>>,
    /// The since-checkpoint listing was read to its end.
    pub drained: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    fn new(run_id: Uuid, strategy: SyncStrategy, checkpoint: Option<DateTime<Utc>>) -> Self {
        Self {
            run_id,
            strategy,
            fetched: 0,
            retried: 0,
            processed: 0,
            succeeded: 0,
            skipped: 0,
            records_created: 0,
            records_archived: 0,
            failed_order_ids: Vec::new(),
            checkpoint,
            drained: false,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn status(&self) -> &'static str {
        if !self.failed_order_ids.is_empty() {
            "partial"
        } else if self.processed == 0 {
            "up_to_date"
        } else {
            "completed"
        }
    }
}

#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Another run holds the lock; nothing was touched.
    AlreadyRunning,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionCheck {
    fn from_result(result: MirraResult<String>) -> Self {
        match result {
            Ok(name) => Self {
                connected: true,
                name: Some(name),
                error: None,
            },
            Err(e) => Self {
                connected: false,
                name: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub source: ConnectionCheck,
    pub destination: ConnectionCheck,
}

enum OrderResult {
    Synced { created: usize, archived: usize },
    Skipped,
    Failed { archived: usize },
}

/// Drives one sync run at a time against the shared state repository.
pub struct Reconciler {
    state: Arc<dyn SyncStateRepository>,
    source: Arc<dyn OrderSource>,
    destination: Arc<dyn DestinationWriter>,
    admin_order_url_base: Option<String>,
}

impl Reconciler {
    pub fn new(
        state: Arc<dyn SyncStateRepository>,
        source: Arc<dyn OrderSource>,
        destination: Arc<dyn DestinationWriter>,
        admin_order_url_base: Option<String>,
    ) -> Self {
        Self {
            state,
            source,
            destination,
            admin_order_url_base,
        }
    }

    pub async fn run(&self, request: RunRequest) -> MirraResult<RunOutcome> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("sync_run", %run_id, mode = ?request.mode);
        self.run_locked(run_id, request).instrument(span).await
    }

    async fn run_locked(&self, run_id: Uuid, request: RunRequest) -> MirraResult<RunOutcome> {
        if self.state.is_locked().await? {
            tracing::info!("sync already in progress, skipping run");
            return Ok(RunOutcome::AlreadyRunning);
        }
        if !self.state.acquire_lock().await? {
            tracing::info!("lost the race for the sync lock, skipping run");
            return Ok(RunOutcome::AlreadyRunning);
        }

        let repo = BatchedSyncRepository::new(self.state.clone());
        let result = match repo.begin_batch() {
            Ok(()) => self.execute(&repo, run_id, request).await,
            Err(e) => Err(e),
        };

        // Confirmed per-record state is flushed even when the run failed.
        let flushed = repo.end_batch().await;
        let released = self.state.release_lock().await;

        let mut summary = match result {
            Ok(summary) => summary,
            Err(e) => {
                if let Err(flush_err) = &flushed {
                    tracing::error!(error = %flush_err, "failed to flush state after fatal error");
                }
                if let Err(release_err) = &released {
                    tracing::error!(error = %release_err, "failed to release sync lock");
                }
                tracing::error!(error = %e, "sync run failed");
                return Err(e);
            }
        };
        flushed?;
        released?;

        summary.finished_at = Some(Utc::now());
        tracing::info!(
            strategy = ?summary.strategy,
            fetched = summary.fetched,
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed_order_ids.len(),
            checkpoint = ?summary.checkpoint,
            "sync run finished"
        );
        Ok(RunOutcome::Completed(summary))
    }

    async fn execute(
        &self,
        repo: &BatchedSyncRepository,
        run_id: Uuid,
        request: RunRequest,
    ) -> MirraResult<RunSummary> {
        let mut state = repo.read_state().await;
        let strategy = match request.mode {
            SyncMode::Initial => SyncStrategy::Initial,
            SyncMode::RetryFailed => SyncStrategy::RetryFailed,
            SyncMode::Smart if state.last_sync_completed_at.is_none() => SyncStrategy::Initial,
            SyncMode::Smart => SyncStrategy::Incremental,
        };
        let mut summary = RunSummary::new(run_id, strategy, state.resume_checkpoint);
        tracing::info!(?strategy, checkpoint = ?state.resume_checkpoint, "sync run started");

        let failed_before: HashSet<String> = repo.get_failed_orders().await?.into_iter().collect();
        let mut handled = HashSet::new();

        if strategy != SyncStrategy::Initial && !failed_before.is_empty() {
            self.retry_failed(repo, &failed_before, &mut handled, &mut summary)
                .await?;
        }
        if strategy == SyncStrategy::RetryFailed {
            return Ok(summary);
        }

        let lower_bound = match (request.mode, strategy) {
            (SyncMode::Initial, _) => None,
            (_, SyncStrategy::Incremental) => state.incremental_lower_bound(),
            _ => state.resume_checkpoint,
        };
        // Only written orders count towards the limit; skipped ones are paged past.
        let mut budget = request.limit.max(1);
        let mut after: Option<String> = None;
        'pages: loop {
            let page = self
                .source
                .fetch_page(lower_bound, true, request.limit, after.as_deref())
                .await?;
            summary.fetched += page.orders.len();
            tracing::info!(count = page.orders.len(), lower_bound = ?lower_bound, "fetched orders page");

            for (idx, order) in page.orders.iter().enumerate() {
                let counted = self
                    .reconcile_listed(repo, order, &failed_before, &handled, &mut state, &mut summary)
                    .await?;
                if counted {
                    budget -= 1;
                }
                if budget == 0 {
                    summary.drained = idx + 1 == page.orders.len() && page.next_cursor.is_none();
                    break 'pages;
                }
            }

            match page.next_cursor {
                Some(cursor) if !page.orders.is_empty() => after = Some(cursor),
                _ => {
                    summary.drained = true;
                    break;
                }
            }
        }

        if summary.drained {
            state.last_sync_completed_at = Some(summary.started_at);
            repo.write_state(&state).await?;
        }
        summary.checkpoint = state.resume_checkpoint;
        Ok(summary)
    }

    /// Handle one order from the since-checkpoint listing and advance the
    /// checkpoint past it unless it failed. Returns whether it was written.
    async fn reconcile_listed(
        &self,
        repo: &BatchedSyncRepository,
        order: &SourceOrder,
        failed_before: &HashSet<String>,
        handled: &HashSet<String>,
        state: &mut SyncState,
        summary: &mut RunSummary,
    ) -> MirraResult<bool> {
        let source_id = order.source_id();
        let mut counted = false;
        if handled.contains(&source_id) {
            // Already written by the retry step; only its checkpoint is pending.
            if summary.failed_order_ids.contains(&source_id) {
                return Ok(false);
            }
        } else {
            let skip_unchanged = !failed_before.contains(&source_id);
            match self.sync_order(repo, order, skip_unchanged).await? {
                OrderResult::Synced { created, archived } => {
                    summary.processed += 1;
                    summary.succeeded += 1;
                    summary.records_created += created;
                    summary.records_archived += archived;
                    counted = true;
                }
                OrderResult::Skipped => summary.skipped += 1,
                OrderResult::Failed { archived } => {
                    summary.processed += 1;
                    summary.records_archived += archived;
                    summary.failed_order_ids.push(source_id);
                    return Ok(true);
                }
            }
        }

        if let Some(updated_at) = order.updated_at {
            if state.resume_checkpoint.map_or(true, |cp| updated_at > cp) {
                state.resume_checkpoint = Some(updated_at);
                repo.write_state(state).await?;
            }
        }
        Ok(counted)
    }

    async fn retry_failed(
        &self,
        repo: &BatchedSyncRepository,
        failed: &HashSet<String>,
        handled: &mut HashSet<String>,
        summary: &mut RunSummary,
    ) -> MirraResult<()> {
        let mut ids: Vec<String> = failed.iter().cloned().collect();
        ids.sort();
        tracing::info!(count = ids.len(), "retrying failed orders");

        let orders = self.source.fetch_by_ids(&ids).await?;
        summary.fetched += orders.len();
        if orders.len() < ids.len() {
            tracing::warn!(
                requested = ids.len(),
                found = orders.len(),
                "some failed orders were not returned by the source"
            );
        }

        for order in &orders {
            let source_id = order.source_id();
            if !handled.insert(source_id.clone()) {
                continue;
            }
            summary.retried += 1;
            summary.processed += 1;
            match self.sync_order(repo, order, false).await? {
                OrderResult::Synced { created, archived } => {
                    summary.succeeded += 1;
                    summary.records_created += created;
                    summary.records_archived += archived;
                }
                OrderResult::Failed { archived } => {
                    summary.records_archived += archived;
                    summary.failed_order_ids.push(source_id);
                }
                OrderResult::Skipped => {}
            }
        }
        Ok(())
    }

    /// Mirror one order. Destination errors are recorded and reported as
    /// [`OrderResult::Failed`]; state repository errors propagate.
    async fn sync_order(
        &self,
        repo: &BatchedSyncRepository,
        order: &SourceOrder,
        skip_unchanged: bool,
    ) -> MirraResult<OrderResult> {
        let normalized = transform(order, self.admin_order_url_base.as_deref());
        let source_id = normalized.source_order_id.clone();
        let existing = repo.get_synced_order(&source_id).await?;

        if let Some(existing) = &existing {
            if skip_unchanged
                && existing.source_updated_at.is_some()
                && existing.source_updated_at == normalized.source_updated_at
            {
                tracing::debug!(order_id = %source_id, "order unchanged, skipping");
                return Ok(OrderResult::Skipped);
            }
        }

        let mut archived = 0;
        if let Some(existing) = &existing {
            archived += self.archive_all(&existing.destination_ids).await;
        }

        let plan = normalized.plan();
        let mut created = Vec::with_capacity(plan.len());
        match self.create_plan(&plan, &mut created).await {
            Ok(()) => {
                let record = SyncedOrder {
                    source_order_id: source_id.clone(),
                    destination_ids: created.clone(),
                    source_updated_at: normalized.source_updated_at,
                };
                repo.put_synced_order(&record).await?;
                repo.remove_failed_order(&source_id).await?;
                tracing::debug!(
                    order_id = %source_id,
                    name = %normalized.display_name,
                    records = created.len(),
                    "order synced"
                );
                Ok(OrderResult::Synced {
                    created: created.len(),
                    archived,
                })
            }
            Err(e) => {
                tracing::warn!(order_id = %source_id, error = %e, "failed to sync order");
                archived += self.archive_all(&created).await;
                repo.put_failed_order(&source_id, Some(&e.to_string()))
                    .await?;
                Ok(OrderResult::Failed { archived })
            }
        }
    }

    /// Create the primary record, then each child pointing at it.
    /// IDs are pushed to `created` as they come back so a caller can clean up.
    async fn create_plan(&self, plan: &RecordPlan, created: &mut Vec<String>) -> MirraResult<()> {
        let parent_id = self.destination.create(&plan.primary).await?;
        created.push(parent_id.clone());

        for child in &plan.children {
            let mut child = child.clone();
            child.parent_id = Some(parent_id.clone());
            created.push(self.destination.create(&child).await?);
        }
        Ok(())
    }

    /// Best-effort archive; returns how many succeeded.
    async fn archive_all(&self, destination_ids: &[String]) -> usize {
        let mut archived = 0;
        for id in destination_ids {
            match self.destination.archive(id).await {
                Ok(()) => archived += 1,
                Err(e) => {
                    tracing::warn!(destination_id = %id, error = %e, "failed to archive record")
                }
            }
        }
        archived
    }

    /// Statistics straight from the state repository.
    pub async fn statistics(&self) -> MirraResult<SyncStatistics> {
        self.state.statistics().await
    }

    /// Probe both ends. Failures are reported, never propagated.
    pub async fn check_connections(&self) -> ConnectionReport {
        let (source, destination) = tokio::join!(
            self.source.check_connection(),
            self.destination.check_connection()
        );
        ConnectionReport {
            source: ConnectionCheck::from_result(source),
            destination: ConnectionCheck::from_result(destination),
        }
    }

    pub fn state(&self) -> &Arc<dyn SyncStateRepository> {
        &self.state
    }
}
