//! Handlers for the `/target-systems` resource.
//!
//! Configs are checked against the type's published schema and stored in
//! normalized form (defaults filled in, numbers coerced).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use iotsim_connectors::{test_connection_config, ConnectionTestResult};
use iotsim_core::error::CoreError;
use iotsim_core::target_system::schema::{config_schema, normalize_config};
use iotsim_core::target_system::{list_types, TargetSystemType, TargetTypeInfo};
use iotsim_core::types::DbId;
use iotsim_db::models::target_system::{CreateTargetSystem, TargetSystem, UpdateTargetSystem};
use iotsim_db::repositories::TargetSystemRepo;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::handlers::require_name;
use crate::state::AppState;

/// Optional body of `POST /target-systems/{id}/test-connection`.
#[derive(Debug, Default, Deserialize)]
pub struct TestConnectionRequest {
    pub sample_payload: Option<Value>,
}

/// Body of `POST /target-systems/test-connection-config`.
#[derive(Debug, Deserialize)]
pub struct TestConfigRequest {
    pub system_type: TargetSystemType,
    pub config: Value,
    pub sample_payload: Option<Value>,
}

fn normalized(system_type: TargetSystemType, config: &Value) -> Result<Value, CoreError> {
    normalize_config(system_type, config)
        .map(Value::Object)
        .map_err(CoreError::InvalidFields)
}

async fn find_target(state: &AppState, id: DbId) -> AppResult<TargetSystem> {
    TargetSystemRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("TargetSystem", id))
}

/// GET /api/target-systems
pub async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<TargetSystem>>> {
    Ok(Json(TargetSystemRepo::list(&state.pool).await?))
}

/// GET /api/target-systems/types
pub async fn types() -> Json<Vec<TargetTypeInfo>> {
    Json(list_types())
}

/// GET /api/target-systems/types/{type}/schema
pub async fn type_schema(Path(system_type): Path<String>) -> AppResult<Json<Value>> {
    let kind = TargetSystemType::from_str_value(&system_type)?;
    Ok(Json(config_schema(kind)))
}

/// POST /api/target-systems
pub async fn create(
    State(state): State<AppState>,
    Json(mut input): Json<CreateTargetSystem>,
) -> AppResult<(StatusCode, Json<TargetSystem>)> {
    input.name = require_name(&input.name)?;
    input.config = normalized(input.system_type, &input.config)?;

    let target = TargetSystemRepo::create(&state.pool, &input).await?;
    tracing::info!(
        target_system_id = target.id,
        system_type = %target.system_type,
        "Target system created"
    );
    Ok((StatusCode::CREATED, Json(target)))
}

/// GET /api/target-systems/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<TargetSystem>> {
    Ok(Json(find_target(&state, id).await?))
}

/// PUT /api/target-systems/{id}
///
/// A type change without a new config re-validates the stored config
/// against the new type.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(mut input): Json<UpdateTargetSystem>,
) -> AppResult<Json<TargetSystem>> {
    let current = find_target(&state, id).await?;
    if let Some(name) = &input.name {
        input.name = Some(require_name(name)?);
    }

    if input.system_type.is_some() || input.config.is_some() {
        let kind = match input.system_type {
            Some(k) => k,
            None => current.kind()?,
        };
        let config = input.config.as_ref().unwrap_or(&current.config.0);
        input.config = Some(normalized(kind, config)?);
    }

    let target = TargetSystemRepo::update(&state.pool, id, &input)
        .await?
        .ok_or_else(|| AppError::not_found("TargetSystem", id))?;
    Ok(Json(target))
}

/// DELETE /api/target-systems/{id}
///
/// Devices that used the target system keep existing without one.
pub async fn delete(State(state): State<AppState>, Path(id): Path<DbId>) -> AppResult<StatusCode> {
    let references = TargetSystemRepo::count_device_references(&state.pool, id).await?;
    if TargetSystemRepo::delete(&state.pool, id).await? {
        tracing::info!(target_system_id = id, detached_devices = references, "Target system deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("TargetSystem", id))
    }
}

/// POST /api/target-systems/{id}/test-connection
///
/// Connection failures are reported in the body with `success: false`.
pub async fn test_connection(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    body: Option<Json<TestConnectionRequest>>,
) -> AppResult<Json<ConnectionTestResult>> {
    let target = find_target(&state, id).await?;
    let kind = target.kind()?;
    let sample = body.and_then(|Json(r)| r.sample_payload);

    let result =
        test_connection_config(state.connectors.as_ref(), kind, &target.config.0, sample).await;
    tracing::info!(
        target_system_id = id,
        success = result.success,
        duration_ms = result.duration_ms,
        "Connection test finished"
    );
    Ok(Json(result))
}

/// POST /api/target-systems/test-connection-config
///
/// Probe a configuration before it is saved.
pub async fn test_config(
    State(state): State<AppState>,
    Json(input): Json<TestConfigRequest>,
) -> AppResult<Json<ConnectionTestResult>> {
    let result = test_connection_config(
        state.connectors.as_ref(),
        input.system_type,
        &input.config,
        input.sample_payload,
    )
    .await;
    Ok(Json(result))
}
