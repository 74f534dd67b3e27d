use chrono::{DateTime, Utc};
use mirra_db::sync::models::SyncStatistics;
use mirra_sync::{ConnectionCheck, RunSummary};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct TriggerSyncResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<RunSummary>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SyncStatusResponse {
    pub data: SyncStatistics,
}

#[derive(Debug, Serialize)]
pub struct ConnectionsData {
    pub shopify: ConnectionCheck,
    pub notion: ConnectionCheck,
}

#[derive(Debug, Serialize)]
pub struct ConnectionsResponse {
    pub data: ConnectionsData,
    pub timestamp: DateTime<Utc>,
}
