pub mod sync;

use std::path::Path;
use std::sync::Arc;

use mirra_common::error::{MirraError, MirraResult};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::sync::blob::FileBlobStore;
use crate::sync::document::DocumentSyncRepository;
use crate::sync::pg_repository::PgSyncRepository;
use crate::sync::repositories::SyncStateRepository;

/// Create a Postgres connection pool from a database URL.
pub async fn create_pool(database_url: &str) -> MirraResult<PgPool> {
    tracing::info!("connecting to database");
    PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await
        .map_err(|e| MirraError::Database(e.to_string()))
}

/// Pick the state backend: Postgres when a database URL is configured,
/// otherwise a JSON document at `state_path`.
pub async fn open_state_repository(
    database_url: Option<&str>,
    state_path: &Path,
) -> MirraResult<Arc<dyn SyncStateRepository>> {
    match database_url {
        Some(url) => {
            let repo = PgSyncRepository::new(create_pool(url).await?);
            repo.ensure_schema().await?;
            tracing::info!("using postgres sync state backend");
            Ok(Arc::new(repo))
        }
        None => {
            tracing::info!(path = %state_path.display(), "using file sync state backend");
            Ok(Arc::new(DocumentSyncRepository::new(FileBlobStore::new(
                state_path,
            ))))
        }
    }
}
