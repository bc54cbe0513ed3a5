//! Route definitions for `/simulation`.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::simulation;
use crate::state::AppState;

/// Routes mounted at `/simulation`.
///
/// ```text
/// GET    /status             -> global_status
/// GET    /logs               -> logs (?project_id=&limit=)
/// POST   /emergency-stop     -> emergency_stop
/// POST   /{id}/start         -> start
/// POST   /{id}/stop          -> stop
/// GET    /{id}/status        -> status
/// DELETE /{id}/logs          -> clear_logs
/// ```
///
/// The per-project WebSocket `GET /simulation/{id}/logs` is mounted at the
/// root by [`super::ws_routes`].
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(simulation::global_status))
        .route("/logs", get(simulation::logs))
        .route("/emergency-stop", post(simulation::emergency_stop))
        .route("/{id}/start", post(simulation::start))
        .route("/{id}/stop", post(simulation::stop))
        .route("/{id}/status", get(simulation::status))
        .route("/{id}/logs", delete(simulation::clear_logs))
}
