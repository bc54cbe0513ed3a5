//! Handlers for the `/devices` resource.
//!
//! Moving, disabling or deleting a device stops its runner first so a
//! running device never keeps reporting with stale configuration.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use iotsim_core::device::{
    evaluate_readiness, validate_device_name, validate_send_interval, DeviceReadiness,
};
use iotsim_core::error::{CoreError, FieldError};
use iotsim_core::payload::{GenerationContext, PayloadGenerator};
use iotsim_core::types::{DbId, Timestamp};
use iotsim_db::models::device::{CreateDevice, Device, UpdateDevice};
use iotsim_db::repositories::{DeviceRepo, PayloadRepo, ProjectRepo, TargetSystemRepo};
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::plan::PlanResolver;
use crate::query::DeviceListParams;
use crate::state::AppState;

/// A device with its readiness evaluation and live running flag.
#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    #[serde(flatten)]
    pub device: Device,
    pub readiness: DeviceReadiness,
    pub is_simulation_ready: bool,
    pub is_running: bool,
}

impl DeviceResponse {
    async fn build(state: &AppState, device: Device) -> Self {
        let readiness = evaluate_readiness(&device.config(), device.has_metadata());
        let is_running = state
            .registry
            .device_state(device.id)
            .await
            .is_some_and(|s| s.is_running);
        Self {
            is_simulation_ready: readiness.is_simulation_ready,
            readiness,
            is_running,
            device,
        }
    }
}

/// `POST /devices/{id}/test` response.
#[derive(Debug, Serialize)]
pub struct DeviceTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_info: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: Timestamp,
}

impl DeviceTestResult {
    fn failed(error: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            success: false,
            payload,
            target_info: None,
            error: Some(error.into()),
            timestamp: chrono::Utc::now(),
        }
    }
}

async fn find_device(state: &AppState, id: DbId) -> AppResult<Device> {
    DeviceRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Device", id))
}

/// Check that referenced rows exist, reporting every missing one.
async fn check_references(
    state: &AppState,
    project_id: Option<DbId>,
    payload_id: Option<DbId>,
    target_system_id: Option<DbId>,
) -> AppResult<()> {
    let mut errors = Vec::new();
    if let Some(id) = project_id {
        if ProjectRepo::find_by_id(&state.pool, id).await?.is_none() {
            errors.push(FieldError::new("project_id", format!("project {id} does not exist")));
        }
    }
    if let Some(id) = payload_id {
        if PayloadRepo::find_by_id(&state.pool, id).await?.is_none() {
            errors.push(FieldError::new("payload_id", format!("payload {id} does not exist")));
        }
    }
    if let Some(id) = target_system_id {
        if TargetSystemRepo::find_by_id(&state.pool, id).await?.is_none() {
            errors.push(FieldError::new(
                "target_system_id",
                format!("target system {id} does not exist"),
            ));
        }
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(CoreError::InvalidFields(errors).into())
    }
}

fn check_metadata(metadata: Option<&Value>) -> Result<(), CoreError> {
    match metadata {
        Some(v) if !v.is_object() => Err(CoreError::InvalidFields(vec![FieldError::new(
            "metadata",
            "must be a JSON object",
        )])),
        _ => Ok(()),
    }
}

/// Stop the device's runner if one is active. Failures are logged; the
/// runner is force-stopped by the engine either way.
async fn stop_runner(state: &AppState, device_id: DbId, reason: &str) {
    match state.registry.stop_device(device_id).await {
        Some(Ok(())) => {
            tracing::info!(device_id, reason, "Stopped device runner");
        }
        Some(Err(e)) => {
            tracing::warn!(device_id, reason, error = %e, "Device runner did not stop cleanly");
        }
        None => {}
    }
}

/// GET /api/devices?project_id=
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<DeviceListParams>,
) -> AppResult<Json<Vec<DeviceResponse>>> {
    let devices = DeviceRepo::list(&state.pool, params.project_id).await?;
    let mut out = Vec::with_capacity(devices.len());
    for device in devices {
        out.push(DeviceResponse::build(&state, device).await);
    }
    Ok(Json(out))
}

/// POST /api/devices
pub async fn create(
    State(state): State<AppState>,
    Json(mut input): Json<CreateDevice>,
) -> AppResult<(StatusCode, Json<DeviceResponse>)> {
    validate_device_name(&input.name)?;
    input.name = input.name.trim().to_string();
    if let Some(interval) = input.send_interval {
        validate_send_interval(interval)?;
    }
    check_metadata(input.metadata.as_ref())?;
    check_references(
        &state,
        Some(input.project_id),
        input.payload_id,
        input.target_system_id,
    )
    .await?;

    let device = DeviceRepo::create(&state.pool, &input).await?;
    tracing::info!(device_id = device.id, project_id = device.project_id, "Device created");
    Ok((StatusCode::CREATED, Json(DeviceResponse::build(&state, device).await)))
}

/// GET /api/devices/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DeviceResponse>> {
    let device = find_device(&state, id).await?;
    Ok(Json(DeviceResponse::build(&state, device).await))
}

/// PUT /api/devices/{id}
///
/// A change of `project_id` moves the device; its runner in the old
/// project's simulation is stopped before the row is updated.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(mut input): Json<UpdateDevice>,
) -> AppResult<Json<DeviceResponse>> {
    let current = find_device(&state, id).await?;

    if let Some(name) = &input.name {
        validate_device_name(name)?;
        input.name = Some(name.trim().to_string());
    }
    if let Some(interval) = input.send_interval {
        validate_send_interval(interval)?;
    }
    check_metadata(input.metadata.as_ref())?;

    let moving = input.project_id.filter(|p| *p != current.project_id);
    check_references(&state, moving, input.payload_id, input.target_system_id).await?;

    if let Some(to) = moving {
        stop_runner(&state, id, "moved to another project").await;
        tracing::info!(device_id = id, from = current.project_id, to, "Moving device");
    } else if input.is_enabled == Some(false) && current.is_enabled {
        stop_runner(&state, id, "disabled").await;
    }

    let device = DeviceRepo::update(&state.pool, id, &input)
        .await?
        .ok_or_else(|| AppError::not_found("Device", id))?;
    Ok(Json(DeviceResponse::build(&state, device).await))
}

/// PATCH /api/devices/{id}/toggle
///
/// Flip `is_enabled`. Disabling a running device stops its runner.
pub async fn toggle(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DeviceResponse>> {
    let current = find_device(&state, id).await?;
    let enabled = !current.is_enabled;
    if !enabled {
        stop_runner(&state, id, "disabled").await;
    }
    let device = DeviceRepo::set_enabled(&state.pool, id, enabled)
        .await?
        .ok_or_else(|| AppError::not_found("Device", id))?;
    Ok(Json(DeviceResponse::build(&state, device).await))
}

/// DELETE /api/devices/{id}
pub async fn delete(State(state): State<AppState>, Path(id): Path<DbId>) -> AppResult<StatusCode> {
    find_device(&state, id).await?;
    stop_runner(&state, id, "deleted").await;

    if DeviceRepo::delete(&state.pool, id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Device", id))
    }
}

/// POST /api/devices/{id}/test
///
/// Generate one payload and deliver it to the device's target system
/// outside of any simulation. Failures are reported in the body.
pub async fn test(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DeviceTestResult>> {
    let device = find_device(&state, id).await?;
    let spec = PlanResolver::default().resolve(&state.pool, &device).await?;

    if let Some(error) = spec.resolution_error {
        return Ok(Json(DeviceTestResult::failed(error, None)));
    }
    let Some(definition) = spec.payload else {
        return Ok(Json(DeviceTestResult::failed("Device has no payload assigned", None)));
    };

    let ctx = GenerationContext::new(device.id, device.name.clone(), spec.metadata);
    let mut generator = PayloadGenerator::new(definition, state.sandbox.clone());
    let payload = match generator.generate(&ctx).await {
        Ok(p) => p,
        Err(e) => {
            return Ok(Json(DeviceTestResult::failed(
                format!("Payload generation failed: {e}"),
                None,
            )))
        }
    };

    let Some(settings) = spec.target else {
        return Ok(Json(DeviceTestResult::failed(
            "Device has no target system assigned",
            Some(payload),
        )));
    };

    let result = iotsim_connectors::send_once(state.connectors.as_ref(), &settings, &payload).await;
    tracing::info!(device_id = id, success = result.success, "Device test finished");

    Ok(Json(DeviceTestResult {
        success: result.success,
        payload: Some(payload),
        target_info: Some(json!({
            "type": settings.system_type(),
            "target": result.target,
            "message": result.message,
            "duration_ms": result.duration_ms,
        })),
        error: result.error,
        timestamp: chrono::Utc::now(),
    }))
}
