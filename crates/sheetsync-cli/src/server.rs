//! HTTP server for health and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use sheetsync_core::health::{ComponentStatus, HealthStatus};
use sheetsync_core::{LifecycleState, TableSync};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

/// Shared state for HTTP endpoints.
pub struct ServerState {
    pub sync: Arc<TableSync>,
}

/// Health response structure.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub ready: bool,
    pub state: LifecycleState,
    pub pending_writes: usize,
    pub components: BTreeMap<String, ComponentStatus>,
}

impl HealthResponse {
    fn collect(sync: &TableSync) -> Self {
        let report = sync.health().report();
        Self {
            status: report.status,
            ready: report.ready,
            state: sync.state(),
            pending_writes: sync.writer().pending_len(),
            components: report.components,
        }
    }
}

fn router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve health and metrics until the engine begins draining.
pub async fn start_server(
    state: Arc<ServerState>,
    port: u16,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, port, "Failed to bind health server");
            return;
        }
    };

    info!(port, "Health and metrics server started");

    let server = async {
        axum::serve(listener, router(state))
            .await
            .map_err(|e| error!(error = %e, "Health server error"))
    };

    tokio::select! {
        _ = server => {}
        _ = shutdown_rx.recv() => {
            info!("Health server shutting down");
        }
    }
}

/// Health endpoint handler.
async fn health_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let response = HealthResponse::collect(&state.sync);

    let status_code = match response.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(response))
}

/// Liveness handler.
async fn healthz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.sync.health().is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Readiness handler: accepting operations.
async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.sync.health().is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus metrics endpoint handler.
async fn metrics_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.sync.export_metrics(),
    )
}
