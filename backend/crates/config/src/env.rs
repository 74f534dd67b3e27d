use mirra_common::error::{MirraError, MirraResult};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_BATCH_LIMIT: usize = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// When set, sync state lives in Postgres tables; otherwise in a JSON document.
    pub database_url: Option<String>,
    pub state_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub batch_limit: usize,
}

impl AppConfig {
    /// Load configuration from environment variables.
    /// Loads `.env` file if present; every variable has a default.
    pub fn from_env() -> MirraResult<Self> {
        // Best-effort .env load; ignore if missing
        let _ = dotenvy::dotenv();

        let batch_limit: usize = get_var_or("SYNC_BATCH_LIMIT", &DEFAULT_BATCH_LIMIT.to_string())
            .parse()
            .map_err(|e| MirraError::Config(format!("invalid SYNC_BATCH_LIMIT: {e}")))?;
        if batch_limit == 0 {
            return Err(MirraError::Config(
                "SYNC_BATCH_LIMIT must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty()),
            state_path: PathBuf::from(get_var_or("SYNC_STATE_PATH", "sync-state.json")),
            host: get_var_or("HOST", "0.0.0.0"),
            port: get_var_or("PORT", "8080")
                .parse()
                .map_err(|e| MirraError::Config(format!("invalid PORT: {e}")))?,
            log_level: get_var_or("LOG_LEVEL", "info"),
            batch_limit,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Read a required variable, collecting its name into `missing` when absent or blank.
pub fn require_var(key: &str, missing: &mut Vec<String>) -> String {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => {
            missing.push(key.to_owned());
            String::new()
        }
    }
}

/// Turn collected missing variable names into a single configuration error.
pub fn ensure_present(missing: &[String]) -> MirraResult<()> {
    if missing.is_empty() {
        return Ok(());
    }
    Err(MirraError::Config(format!(
        "missing environment variables: {}",
        missing.join(", ")
    )))
}

pub fn get_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn config_from_env_uses_defaults() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        env::remove_var("DATABASE_URL");
        env::remove_var("SYNC_STATE_PATH");
        env::remove_var("SYNC_BATCH_LIMIT");
        env::remove_var("PORT");

        let cfg = AppConfig::from_env().expect("should parse config");
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.state_path, PathBuf::from("sync-state.json"));
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.batch_limit, DEFAULT_BATCH_LIMIT);
    }

    #[test]
    fn config_from_env_reads_database_url() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        env::set_var("DATABASE_URL", "postgres://localhost/mirra_test");
        let cfg = AppConfig::from_env().expect("should parse config");
        assert_eq!(
            cfg.database_url.as_deref(),
            Some("postgres://localhost/mirra_test")
        );
        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn config_from_env_rejects_zero_batch_limit() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        env::set_var("SYNC_BATCH_LIMIT", "0");
        let result = AppConfig::from_env();
        env::remove_var("SYNC_BATCH_LIMIT");
        assert!(result.is_err());
    }

    #[test]
    fn require_var_collects_missing_names() {
        let _guard = ENV_LOCK.lock().expect("env lock poisoned");

        env::set_var("_MIRRA_PRESENT", "value");
        env::remove_var("_MIRRA_ABSENT");
        let mut missing = Vec::new();
        let present = require_var("_MIRRA_PRESENT", &mut missing);
        let absent = require_var("_MIRRA_ABSENT", &mut missing);
        assert_eq!(present, "value");
        assert!(absent.is_empty());
        assert_eq!(missing, vec!["_MIRRA_ABSENT".to_owned()]);
        let err = ensure_present(&missing).unwrap_err();
        assert!(err.to_string().contains("_MIRRA_ABSENT"), "got: {err}");
        env::remove_var("_MIRRA_PRESENT");
    }

    #[test]
    fn bind_addr_formats_correctly() {
        let cfg = AppConfig {
            database_url: None,
            state_path: PathBuf::from("state.json"),
            host: "127.0.0.1".to_owned(),
            port: 3000,
            log_level: "debug".to_owned(),
            batch_limit: 10,
        };
        assert_eq!(cfg.bind_addr(), "127.0.0.1:3000");
    }
}
