use mirra_sync::SyncMode;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct TriggerSyncRequest {
    #[serde(default)]
    pub mode: SyncMode,
    pub limit: Option<usize>,
}
