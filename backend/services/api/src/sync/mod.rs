pub mod handlers;
pub mod requests;
pub mod responses;

use axum::routing::{get, post};
use axum::Router;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sync", post(handlers::trigger_sync))
        .route("/sync/status", get(handlers::get_sync_status))
        .route("/sync/connections", get(handlers::check_connections))
}
