use std::process::ExitCode;
use std::sync::Arc;

use mirra_common::error::MirraResult;
use mirra_config::{init_tracing, AppConfig};
use mirra_sync::{ConnectorSettings, Reconciler, RunOutcome, RunRequest, SyncMode};

/// `SYNC_MODE` when set, otherwise smart.
fn mode_from_env(raw: Option<String>) -> MirraResult<SyncMode> {
    match raw.filter(|v| !v.trim().is_empty()) {
        Some(v) => v.parse(),
        None => Ok(SyncMode::default()),
    }
}

async fn run_once(config: &AppConfig, mode: SyncMode) -> MirraResult<RunOutcome> {
    let connectors = ConnectorSettings::from_env()?.connect()?;
    let state_repo =
        mirra_db::open_state_repository(config.database_url.as_deref(), &config.state_path)
            .await?;
    let reconciler = Reconciler::new(
        state_repo,
        connectors.source,
        connectors.destination,
        connectors.admin_order_url_base,
    );
    reconciler
        .run(RunRequest {
            mode,
            limit: config.batch_limit,
        })
        .await
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            tracing::error!(error = %e, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.log_level);
    tracing::info!(service = "mirra-ingest", "starting");

    let mode = match mode_from_env(std::env::var("SYNC_MODE").ok()) {
        Ok(mode) => mode,
        Err(e) => {
            tracing::error!(error = %e, "invalid SYNC_MODE");
            return ExitCode::FAILURE;
        }
    };

    match run_once(&config, mode).await {
        Ok(RunOutcome::Completed(summary)) => {
            tracing::info!(
                status = summary.status(),
                strategy = ?summary.strategy,
                processed = summary.processed,
                failed = summary.failed_order_ids.len(),
                "sync completed"
            );
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::AlreadyRunning) => {
            tracing::info!("another sync is in progress, nothing to do");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "sync failed");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_mode_is_smart() {
        assert_eq!(mode_from_env(None).unwrap(), SyncMode::Smart);
        assert_eq!(mode_from_env(Some("  ".into())).unwrap(), SyncMode::Smart);
    }

    #[test]
    fn named_modes_parse() {
        assert_eq!(mode_from_env(Some("initial".into())).unwrap(), SyncMode::Initial);
        assert_eq!(mode_from_env(Some("retry".into())).unwrap(), SyncMode::RetryFailed);
        assert!(mode_from_env(Some("everything".into())).is_err());
    }
}
