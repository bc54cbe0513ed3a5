use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the database is reachable.
    pub db_healthy: bool,
    /// Projects with a live supervisor.
    pub active_simulations: usize,
    pub websocket_connections: usize,
}

/// GET /health -- returns service, database and engine health.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = iotsim_db::health_check(&state.pool).await.is_ok();
    let status = if db_healthy { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        active_simulations: state.registry.active_project_ids().await.len(),
        websocket_connections: state.ws_manager.connection_count().await,
    })
}

/// Mount health check routes (root-level, not under `/api`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
