//! Handlers for the `/projects` resource.

use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use iotsim_core::device::{evaluate_readiness, DeviceReadiness};
use iotsim_core::types::DbId;
use iotsim_db::models::project::{CreateProject, Project, ProjectWithCounts, UpdateProject};
use iotsim_db::repositories::{DeviceRepo, ProjectRepo};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::export::ProjectExport;
use crate::handlers::require_name;
use crate::query::{ExportFormat, ExportParams};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ProjectSummary {
    #[serde(flatten)]
    pub project: ProjectWithCounts,
    pub is_running: bool,
}

#[derive(Debug, Serialize)]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub device_count: usize,
    pub is_running: bool,
}

#[derive(Debug, Serialize)]
pub struct DeviceValidation {
    pub device_id: DbId,
    pub device_name: String,
    pub readiness: DeviceReadiness,
}

/// `GET /projects/{id}/validation` response.
#[derive(Debug, Serialize)]
pub struct ProjectValidation {
    pub project_id: DbId,
    pub total_devices: usize,
    pub ready_devices: usize,
    pub error_devices: usize,
    pub warning_devices: usize,
    /// True when at least one device can be started.
    pub can_start: bool,
    pub devices: Vec<DeviceValidation>,
}

pub(crate) async fn find_project(state: &AppState, id: DbId) -> AppResult<Project> {
    ProjectRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Project", id))
}

/// GET /api/projects
pub async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<ProjectSummary>>> {
    let projects = ProjectRepo::list_with_counts(&state.pool).await?;
    let running = state.registry.active_project_ids().await;
    let summaries = projects
        .into_iter()
        .map(|project| ProjectSummary {
            is_running: running.contains(&project.id),
            project,
        })
        .collect();
    Ok(Json(summaries))
}

/// POST /api/projects
pub async fn create(
    State(state): State<AppState>,
    Json(mut input): Json<CreateProject>,
) -> AppResult<(StatusCode, Json<Project>)> {
    input.name = require_name(&input.name)?;
    let project = ProjectRepo::create(&state.pool, &input).await?;
    tracing::info!(project_id = project.id, name = %project.name, "Project created");
    Ok((StatusCode::CREATED, Json(project)))
}

/// GET /api/projects/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<ProjectDetail>> {
    let project = find_project(&state, id).await?;
    let device_count = DeviceRepo::list_by_project(&state.pool, id).await?.len();
    Ok(Json(ProjectDetail {
        project,
        device_count,
        is_running: state.registry.is_running(id).await,
    }))
}

/// PUT /api/projects/{id}
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(mut input): Json<UpdateProject>,
) -> AppResult<Json<Project>> {
    if let Some(name) = &input.name {
        input.name = Some(require_name(name)?);
    }
    let project = ProjectRepo::update(&state.pool, id, &input)
        .await?
        .ok_or_else(|| AppError::not_found("Project", id))?;
    Ok(Json(project))
}

/// DELETE /api/projects/{id}
///
/// The project's supervisor, running or crashed, is stopped and unregistered
/// before the project and its devices are removed.
pub async fn delete(State(state): State<AppState>, Path(id): Path<DbId>) -> AppResult<StatusCode> {
    find_project(&state, id).await?;

    let report = state.registry.stop(id).await;
    if report.was_running {
        tracing::info!(
            project_id = id,
            stopped = report.stopped_devices,
            "Stopped simulation before deleting project"
        );
    }
    state.log_history.clear_project(id);

    if ProjectRepo::delete(&state.pool, id).await? {
        tracing::info!(project_id = id, "Project deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Project", id))
    }
}

/// GET /api/projects/{id}/validation
///
/// Readiness of every device in the project.
pub async fn validation(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<ProjectValidation>> {
    find_project(&state, id).await?;
    let devices = DeviceRepo::list_by_project(&state.pool, id).await?;

    let devices: Vec<DeviceValidation> = devices
        .iter()
        .map(|d| DeviceValidation {
            device_id: d.id,
            device_name: d.name.clone(),
            readiness: evaluate_readiness(&d.config(), d.has_metadata()),
        })
        .collect();

    let ready_devices = devices.iter().filter(|d| d.readiness.is_simulation_ready).count();
    let error_devices = devices.iter().filter(|d| d.readiness.critical_count() > 0).count();
    let warning_devices = devices
        .iter()
        .filter(|d| d.readiness.critical_count() == 0 && d.readiness.warning_count() > 0)
        .count();

    Ok(Json(ProjectValidation {
        project_id: id,
        total_devices: devices.len(),
        ready_devices,
        error_devices,
        warning_devices,
        can_start: ready_devices > 0,
        devices,
    }))
}

/// GET /api/projects/{id}/export?format=json|html
pub async fn export(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<ExportParams>,
) -> AppResult<Response> {
    let project = find_project(&state, id).await?;
    let export = ProjectExport::load(&state.pool, project).await?;
    let stem = export.file_stem();

    let (content_type, extension, body) = match params.format {
        ExportFormat::Json => (
            "application/json",
            "json",
            serde_json::to_string_pretty(&export)
                .map_err(|e| AppError::InternalError(format!("Export serialization failed: {e}")))?,
        ),
        ExportFormat::Html => ("text/html; charset=utf-8", "html", export.render_html()),
    };

    let disposition = format!("attachment; filename=\"{stem}.{extension}\"");
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}
