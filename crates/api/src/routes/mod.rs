pub mod device;
pub mod health;
pub mod payload;
pub mod project;
pub mod simulation;
pub mod target_system;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api` route tree.
///
/// ```text
/// /projects                               list, create
/// /projects/{id}                          get, update, delete
/// /projects/{id}/validation               device readiness report
/// /projects/{id}/export                   json or html attachment
///
/// /devices                                list (?project_id=), create
/// /devices/{id}                           get, update (incl. move), delete
/// /devices/{id}/toggle                    flip is_enabled (PATCH)
/// /devices/{id}/test                      one-shot generate and send (POST)
///
/// /payloads                               list, create
/// /payloads/validate                      validate a definition (POST)
/// /payloads/test-python                   run unsaved code (POST)
/// /payloads/{id}                          get, update, delete
/// /payloads/{id}/generate                 preview (POST)
///
/// /target-systems                         list, create
/// /target-systems/types                   supported types
/// /target-systems/types/{type}/schema     config schema
/// /target-systems/test-connection-config  probe unsaved config (POST)
/// /target-systems/{id}                    get, update, delete
/// /target-systems/{id}/test-connection    probe (POST)
///
/// /simulation/status                      all running projects
/// /simulation/logs                        retained log entries
/// /simulation/emergency-stop              stop everything (POST)
/// /simulation/{id}/start                  start (POST)
/// /simulation/{id}/stop                   stop (POST)
/// /simulation/{id}/status                 project status
/// /simulation/{id}/logs                   clear retained logs (DELETE)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/projects", project::router())
        .nest("/devices", device::router())
        .nest("/payloads", payload::router())
        .nest("/target-systems", target_system::router())
        .nest("/simulation", simulation::router())
}

/// WebSocket endpoints, mounted at the root.
///
/// ```text
/// /ws/simulation                  every project
/// /simulation/{project_id}/logs   one project, with history replay
/// ```
pub fn ws_routes() -> Router<AppState> {
    Router::new()
        .route("/ws/simulation", get(ws::global_ws_handler))
        .route("/simulation/{project_id}/logs", get(ws::project_logs_ws_handler))
}
