//! Handlers for `/simulation`: start, stop, status, logs and the
//! emergency stop.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use iotsim_core::types::DbId;
use iotsim_db::repositories::DeviceRepo;
use iotsim_engine::{
    EmergencyStopReport, ProjectSimulationStatus, SimulationOverview, StartReport, StopReport,
};
use iotsim_events::SimulationEvent;
use serde::Serialize;

use crate::error::AppResult;
use crate::handlers::project::find_project;
use crate::plan::load_plan;
use crate::query::LogsParams;
use crate::state::AppState;
use crate::ws::StatusPublisher;

/// Default number of entries returned by `GET /simulation/logs`.
const DEFAULT_LOG_LIMIT: usize = 100;

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub message: String,
    #[serde(flatten)]
    pub report: StartReport,
}

#[derive(Debug, Serialize)]
pub struct StopResponse {
    pub message: String,
    #[serde(flatten)]
    pub report: StopReport,
}

/// Current status, or an idle status when nothing is running.
async fn project_status(state: &AppState, project_id: DbId) -> AppResult<ProjectSimulationStatus> {
    if let Some(status) = state.registry.status(project_id).await {
        return Ok(status);
    }
    let project = find_project(state, project_id).await?;
    let total = DeviceRepo::list_by_project(&state.pool, project_id).await?.len();
    Ok(ProjectSimulationStatus::idle(project_id, project.name, total))
}

/// POST /api/simulation/{id}/start
///
/// Starts every simulation-ready device. Fails with 409 when the project is
/// already running or has no ready device.
pub async fn start(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<StartResponse>> {
    let project = find_project(&state, id).await?;
    let plan = load_plan(&state.pool, &project).await?;
    let report = state.registry.start(plan).await?;

    let message = format!(
        "Simulation started: {} of {} devices running",
        report.started, report.total_devices
    );
    tracing::info!(
        project_id = id,
        started = report.started,
        failed = report.failed.len(),
        skipped = report.skipped.len(),
        "Simulation start requested"
    );

    StatusPublisher::publish_project(&state.ws_manager, project_status(&state, id).await?).await;
    Ok(Json(StartResponse { message, report }))
}

/// POST /api/simulation/{id}/stop
///
/// Stopping a project that is not running succeeds with `was_running: false`.
pub async fn stop(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<StopResponse>> {
    find_project(&state, id).await?;
    let report = state.registry.stop(id).await;

    let message = if !report.was_running {
        "Simulation was not running".to_string()
    } else if report.is_clean() {
        format!("Simulation stopped: {} devices", report.stopped_devices)
    } else {
        format!(
            "Simulation stopped with {} device failures",
            report.failures.len()
        )
    };

    StatusPublisher::publish_project(&state.ws_manager, project_status(&state, id).await?).await;
    Ok(Json(StopResponse { message, report }))
}

/// GET /api/simulation/{id}/status
pub async fn status(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<ProjectSimulationStatus>> {
    Ok(Json(project_status(&state, id).await?))
}

/// GET /api/simulation/status
pub async fn global_status(State(state): State<AppState>) -> Json<SimulationOverview> {
    Json(state.registry.overview().await)
}

/// GET /api/simulation/logs?project_id=&limit=
///
/// Most recent retained log entries, oldest first.
pub async fn logs(
    State(state): State<AppState>,
    Query(params): Query<LogsParams>,
) -> Json<Vec<SimulationEvent>> {
    let limit = Some(params.limit.unwrap_or(DEFAULT_LOG_LIMIT));
    let entries = match params.project_id {
        Some(project_id) => state.log_history.project(project_id, limit),
        None => state.log_history.all(limit),
    };
    Json(entries)
}

/// DELETE /api/simulation/{id}/logs
pub async fn clear_logs(State(state): State<AppState>, Path(id): Path<DbId>) -> StatusCode {
    state.log_history.clear_project(id);
    StatusCode::NO_CONTENT
}

/// POST /api/simulation/emergency-stop
///
/// Stops every running project. Per-project failures are listed in the
/// report rather than failing the request.
pub async fn emergency_stop(State(state): State<AppState>) -> Json<EmergencyStopReport> {
    tracing::warn!("Emergency stop requested");
    let report = state.registry.emergency_stop_all().await;
    StatusPublisher::publish(&state.ws_manager, &state.registry).await;
    Json(report)
}
