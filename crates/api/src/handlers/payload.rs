//! Handlers for the `/payloads` resource.
//!
//! Definitions are validated before they are stored: visual schemas
//! structurally, Python code statically and with a compile-only sandbox run.
//! Preview generation never fails the request; generator errors are
//! reported in the body with their kind.

use std::time::Instant;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use iotsim_core::error::{CoreError, FieldError};
use iotsim_core::payload::schema::{check_schema, parse_schema};
use iotsim_core::payload::{
    GenerationContext, GeneratorError, PayloadDefinition, PayloadGenerator, PayloadType,
};
use iotsim_core::types::{DbId, Timestamp};
use iotsim_db::models::payload::{CreatePayload, Payload, UpdatePayload};
use iotsim_db::repositories::PayloadRepo;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AppError, AppResult};
use crate::handlers::require_name;
use crate::state::AppState;

/// Device identity used when previewing without a real device.
const PREVIEW_DEVICE_ID: DbId = 0;
const PREVIEW_DEVICE_NAME: &str = "preview-device";

/// Body of `POST /payloads/validate`.
#[derive(Debug, Deserialize)]
pub struct ValidatePayloadRequest {
    pub payload_type: PayloadType,
    pub schema: Option<Value>,
    pub python_code: Option<String>,
}

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<FieldError>,
    pub warnings: Vec<FieldError>,
}

/// Optional body of `POST /payloads/{id}/generate`.
#[derive(Debug, Default, Deserialize)]
pub struct GenerateRequest {
    pub device_id: Option<DbId>,
    pub device_name: Option<String>,
    pub metadata: Option<Value>,
}

/// Body of `POST /payloads/test-python`.
#[derive(Debug, Deserialize)]
pub struct TestPythonRequest {
    pub python_code: String,
    pub metadata: Option<Value>,
}

/// Outcome of a preview generation.
#[derive(Debug, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    pub duration_ms: u64,
    pub timestamp: Timestamp,
}

impl GenerationResult {
    fn from_outcome(outcome: Result<Value, GeneratorError>, started: Instant) -> Self {
        let duration_ms = started.elapsed().as_millis() as u64;
        let timestamp = chrono::Utc::now();
        match outcome {
            Ok(payload) => Self {
                success: true,
                payload: Some(payload),
                error: None,
                error_kind: None,
                duration_ms,
                timestamp,
            },
            Err(e) => Self {
                success: false,
                payload: None,
                error: Some(e.to_string()),
                error_kind: Some(e.kind()),
                duration_ms,
                timestamp,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a payload definition without storing it.
pub(crate) async fn validate_definition(
    state: &AppState,
    payload_type: PayloadType,
    schema: Option<&Value>,
    python_code: Option<&str>,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    match payload_type {
        PayloadType::Visual => match schema {
            None => report
                .errors
                .push(FieldError::new("schema", "is required for visual payloads")),
            Some(raw) => match parse_schema(raw) {
                Ok(fields) => {
                    let checked = check_schema(&fields);
                    report.errors.extend(checked.errors);
                    report.warnings.extend(checked.warnings);
                }
                Err(e) => report.errors.push(FieldError::new("schema", e.to_string())),
            },
        },
        PayloadType::Python => match python_code.filter(|c| !c.trim().is_empty()) {
            None => report
                .errors
                .push(FieldError::new("python_code", "is required for python payloads")),
            Some(code) => match state.sandbox.validate(code).await {
                Ok(()) => {}
                // Without an interpreter the syntax cannot be checked; the
                // static checks already ran.
                Err(GeneratorError::Sandbox(msg)) => report.warnings.push(FieldError::new(
                    "python_code",
                    format!("syntax could not be verified: {msg}"),
                )),
                Err(e) => report.errors.push(FieldError::new("python_code", e.to_string())),
            },
        },
    }

    report.valid = report.errors.is_empty();
    report
}

async fn find_payload(state: &AppState, id: DbId) -> AppResult<Payload> {
    PayloadRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or_else(|| AppError::not_found("Payload", id))
}

// ---------------------------------------------------------------------------
// CRUD
// ---------------------------------------------------------------------------

/// GET /api/payloads
pub async fn list(State(state): State<AppState>) -> AppResult<Json<Vec<Payload>>> {
    Ok(Json(PayloadRepo::list(&state.pool).await?))
}

/// POST /api/payloads
pub async fn create(
    State(state): State<AppState>,
    Json(mut input): Json<CreatePayload>,
) -> AppResult<(StatusCode, Json<Payload>)> {
    input.name = require_name(&input.name)?;
    let report = validate_definition(
        &state,
        input.payload_type,
        input.schema.as_ref(),
        input.python_code.as_deref(),
    )
    .await;
    if !report.valid {
        return Err(CoreError::InvalidFields(report.errors).into());
    }

    let payload = PayloadRepo::create(&state.pool, &input).await?;
    tracing::info!(payload_id = payload.id, kind = %payload.payload_type, "Payload created");
    Ok((StatusCode::CREATED, Json(payload)))
}

/// GET /api/payloads/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<Payload>> {
    Ok(Json(find_payload(&state, id).await?))
}

/// PUT /api/payloads/{id}
///
/// The merged definition (stored values overlaid with the request) must be
/// valid. Running simulations keep the definition they started with.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(mut input): Json<UpdatePayload>,
) -> AppResult<Json<Payload>> {
    let current = find_payload(&state, id).await?;
    if let Some(name) = &input.name {
        input.name = Some(require_name(name)?);
    }

    let payload_type = match input.payload_type {
        Some(t) => t,
        None => current.kind()?,
    };
    let schema = input.schema.as_ref().or(current.schema.as_ref().map(|j| &j.0));
    let code = input.python_code.as_deref().or(current.python_code.as_deref());

    let report = validate_definition(&state, payload_type, schema, code).await;
    if !report.valid {
        return Err(CoreError::InvalidFields(report.errors).into());
    }

    let payload = PayloadRepo::update(&state.pool, id, &input)
        .await?
        .ok_or_else(|| AppError::not_found("Payload", id))?;
    Ok(Json(payload))
}

/// DELETE /api/payloads/{id}
///
/// Devices that used the payload keep existing without one.
pub async fn delete(State(state): State<AppState>, Path(id): Path<DbId>) -> AppResult<StatusCode> {
    let references = PayloadRepo::count_device_references(&state.pool, id).await?;
    if PayloadRepo::delete(&state.pool, id).await? {
        tracing::info!(payload_id = id, detached_devices = references, "Payload deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::not_found("Payload", id))
    }
}

// ---------------------------------------------------------------------------
// Previews
// ---------------------------------------------------------------------------

/// POST /api/payloads/{id}/generate
pub async fn generate(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    body: Option<Json<GenerateRequest>>,
) -> AppResult<Json<GenerationResult>> {
    let payload = find_payload(&state, id).await?;
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let started = Instant::now();

    let definition = match payload.definition() {
        Ok(d) => d,
        Err(e) => {
            return Ok(Json(GenerationResult::from_outcome(
                Err(GeneratorError::InvalidSchema(e.to_string())),
                started,
            )))
        }
    };

    let ctx = GenerationContext::new(
        request.device_id.unwrap_or(PREVIEW_DEVICE_ID),
        request
            .device_name
            .unwrap_or_else(|| PREVIEW_DEVICE_NAME.to_string()),
        metadata_map(request.metadata),
    );
    let outcome = PayloadGenerator::new(definition, state.sandbox.clone())
        .generate(&ctx)
        .await;
    Ok(Json(GenerationResult::from_outcome(outcome, started)))
}

/// POST /api/payloads/validate
pub async fn validate(
    State(state): State<AppState>,
    Json(input): Json<ValidatePayloadRequest>,
) -> AppResult<Json<ValidationReport>> {
    let report = validate_definition(
        &state,
        input.payload_type,
        input.schema.as_ref(),
        input.python_code.as_deref(),
    )
    .await;
    Ok(Json(report))
}

/// POST /api/payloads/test-python
///
/// Run unsaved code once in the sandbox.
pub async fn test_python(
    State(state): State<AppState>,
    Json(input): Json<TestPythonRequest>,
) -> AppResult<Json<GenerationResult>> {
    let started = Instant::now();
    let definition = PayloadDefinition::Python(input.python_code);
    let ctx = GenerationContext::new(
        PREVIEW_DEVICE_ID,
        PREVIEW_DEVICE_NAME,
        metadata_map(input.metadata),
    );
    let outcome = PayloadGenerator::new(definition, state.sandbox.clone())
        .generate(&ctx)
        .await;
    if let Err(e) = &outcome {
        tracing::debug!(kind = e.kind(), error = %e, "Python test run failed");
    }
    Ok(Json(GenerationResult::from_outcome(outcome, started)))
}

fn metadata_map(metadata: Option<Value>) -> Map<String, Value> {
    match metadata {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}
