//! # fdc3-server
//!
//! WebSocket server hosting one interop broker per user session. Apps
//! connect to `/ws`, complete the hello handshake, and exchange wire
//! requests and broker events over the socket. `/health` and `/metrics`
//! serve liveness and Prometheus text.

#![deny(unsafe_code)]

pub mod directory;
pub mod handler;
pub mod launcher;
pub mod metrics;
pub mod resolver;
pub mod sessions;
pub mod transport;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::routing::get;
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::sessions::SessionRegistry;
use crate::transport::WsTransport;

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    /// Per-session brokers.
    pub sessions: Arc<SessionRegistry>,
    /// Outbound event delivery, shared by every broker.
    pub transport: Arc<WsTransport>,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
}

/// Build the server router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn render_metrics(State(state): State<AppState>) -> String {
    metrics::render(&state.metrics)
}
