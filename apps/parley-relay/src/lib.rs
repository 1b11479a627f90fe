//! Parley relay: tracks which users are connected, pushes the online set to
//! every client and forwards call negotiation messages between two peers
//! without interpreting them. Also serves the chat message routes.

pub mod chat;
pub mod cli;
pub mod config;
pub mod handlers;
pub mod presence;
pub mod registry;
pub mod router;
pub mod session;
pub mod state;
pub mod telemetry;
pub mod upload;
pub mod websocket;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    http::HeaderValue,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use parley_proto::SOCKET_PATH;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::chat::MemoryStore;
use crate::config::Config;
use crate::handlers::AppState;
use crate::state::RelayState;
use crate::upload::{DisabledUploader, HttpUploader, MediaUploader};

pub fn build_router(state: AppState, cors_origin: Option<&str>) -> Router {
    let cors = match cors_origin.map(HeaderValue::from_str) {
        Some(Ok(origin)) => CorsLayer::new()
            .allow_origin(origin)
            .allow_methods(Any)
            .allow_headers(Any),
        Some(Err(err)) => {
            warn!(error = %err, "invalid CORS origin; allowing any origin");
            CorsLayer::permissive()
        }
        None => CorsLayer::permissive(),
    };

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/online", get(handlers::online_users))
        .route("/metrics", get(handlers::metrics))
        .route("/api/messages/users", get(handlers::list_contacts))
        .route("/api/messages/:id", get(handlers::get_messages))
        .route("/api/messages/send/:id", post(handlers::send_message))
        .route(SOCKET_PATH, get(websocket::websocket_handler))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Runs the relay until `shutdown` resolves, then clears the registry.
pub async fn serve(
    config: Config,
    metrics: Option<PrometheusHandle>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let uploader: Arc<dyn MediaUploader> = match &config.upload_url {
        Some(url) => Arc::new(HttpUploader::new(url.clone())),
        None => {
            warn!("PARLEY_UPLOAD_URL not set; media messages will be rejected");
            Arc::new(DisabledUploader)
        }
    };
    let relay = Arc::new(RelayState::new(Arc::new(MemoryStore::new()), uploader));
    let app = build_router(
        AppState {
            relay: relay.clone(),
            metrics,
        },
        config.cors_origin.as_deref(),
    );

    let addr = config.listen_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("parley relay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("server shutdown with error")?;

    relay.shutdown();
    info!("shutdown complete");
    Ok(())
}
