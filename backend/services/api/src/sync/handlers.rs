use axum::extract::State;
use axum::Json;
use chrono::Utc;
use mirra_common::error::MirraError;
use mirra_sync::{RunOutcome, RunRequest};

use crate::error::ApiError;
use crate::extractors::LenientJson;
use crate::sync::requests::TriggerSyncRequest;
use crate::sync::responses::{
    ConnectionsData, ConnectionsResponse, SyncStatusResponse, TriggerSyncResponse,
};
use crate::AppState;

pub async fn trigger_sync(
    State(state): State<AppState>,
    LenientJson(body): LenientJson<TriggerSyncRequest>,
) -> Result<Json<TriggerSyncResponse>, ApiError> {
    let limit = body.limit.unwrap_or(state.batch_limit);
    if limit == 0 {
        return Err(MirraError::Validation("limit must be greater than zero".to_string()).into());
    }

    let outcome = state
        .reconciler
        .run(RunRequest {
            mode: body.mode,
            limit,
        })
        .await?;

    let response = match outcome {
        RunOutcome::Completed(summary) => TriggerSyncResponse {
            status: summary.status(),
            message: None,
            data: Some(summary),
            timestamp: Utc::now(),
        },
        RunOutcome::AlreadyRunning => TriggerSyncResponse {
            status: "already_running",
            message: Some("a sync is already in progress".to_string()),
            data: None,
            timestamp: Utc::now(),
        },
    };
    Ok(Json(response))
}

pub async fn get_sync_status(
    State(state): State<AppState>,
) -> Result<Json<SyncStatusResponse>, ApiError> {
    let data = state.reconciler.statistics().await?;
    Ok(Json(SyncStatusResponse { data }))
}

pub async fn check_connections(State(state): State<AppState>) -> Json<ConnectionsResponse> {
    let report = state.reconciler.check_connections().await;
    Json(ConnectionsResponse {
        data: ConnectionsData {
            shopify: report.source,
            notion: report.destination,
        },
        timestamp: Utc::now(),
    })
}
