mod error;
mod extractors;
mod sync;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    http::{header, Method},
    routing::get,
    Json, Router,
};
use mirra_common::types::ServiceInfo;
use mirra_config::{init_tracing, AppConfig};
use mirra_sync::{ConnectorSettings, Reconciler};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub reconciler: Arc<Reconciler>,
    /// Used when a trigger request does not name a limit.
    pub batch_limit: usize,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn info() -> Json<ServiceInfo> {
    Json(ServiceInfo::new("mirra-api"))
}

fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .merge(sync::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    let config = AppConfig::from_env().expect("failed to load config");
    init_tracing(&config.log_level);
    tracing::info!(service = "mirra-api", "starting");

    let connectors = ConnectorSettings::from_env()
        .and_then(|settings| settings.connect())
        .expect("failed to configure connectors");
    let state_repo =
        mirra_db::open_state_repository(config.database_url.as_deref(), &config.state_path)
            .await
            .expect("failed to open sync state");

    let state = AppState {
        reconciler: Arc::new(Reconciler::new(
            state_repo,
            connectors.source,
            connectors.destination,
            connectors.admin_order_url_base,
        )),
        batch_limit: config.batch_limit,
    };

    let app = build_router(state);
    let addr: SocketAddr = config.bind_addr().parse().expect("invalid bind address");

    tracing::info!(%addr, "listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
