//! Payload generation: one JSON object per call, from a visual schema or
//! from sandboxed Python code.

pub mod python;
pub mod schema;
pub mod visual;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

pub use python::{PythonSandbox, SandboxConfig};
pub use schema::{FieldSpec, FieldType, GeneratorSpec};
pub use visual::VisualGenerator;

// ---------------------------------------------------------------------------
// Payload type
// ---------------------------------------------------------------------------

pub const PAYLOAD_TYPE_VISUAL: &str = "visual";
pub const PAYLOAD_TYPE_PYTHON: &str = "python";

/// All valid payload type strings.
pub const VALID_PAYLOAD_TYPES: &[&str] = &[PAYLOAD_TYPE_VISUAL, PAYLOAD_TYPE_PYTHON];

/// How a payload's content is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    Visual,
    Python,
}

impl PayloadType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visual => PAYLOAD_TYPE_VISUAL,
            Self::Python => PAYLOAD_TYPE_PYTHON,
        }
    }

    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        match s {
            PAYLOAD_TYPE_VISUAL => Ok(Self::Visual),
            PAYLOAD_TYPE_PYTHON => Ok(Self::Python),
            _ => Err(CoreError::Validation(format!(
                "Invalid payload type '{s}'. Must be one of: {}",
                VALID_PAYLOAD_TYPES.join(", ")
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure to produce a payload.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GeneratorError {
    #[error("Syntax error{}: {message}", .line.map(|l| format!(" on line {l}")).unwrap_or_default())]
    SyntaxError { message: String, line: Option<u32> },

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Missing result: {0}")]
    MissingResult(String),

    #[error("Runtime failure: {0}")]
    RuntimeFailure(String),

    #[error("Generation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Sandbox unavailable: {0}")]
    Sandbox(String),
}

impl GeneratorError {
    /// Stable snake_case identifier exposed to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SyntaxError { .. } => "syntax_error",
            Self::SecurityViolation(_) => "security_violation",
            Self::MissingResult(_) => "missing_result",
            Self::RuntimeFailure(_) => "runtime_failure",
            Self::Timeout { .. } => "timeout",
            Self::SerializationError(_) => "serialization_error",
            Self::InvalidSchema(_) => "invalid_schema",
            Self::Sandbox(_) => "sandbox_unavailable",
        }
    }
}

// ---------------------------------------------------------------------------
// Generation context
// ---------------------------------------------------------------------------

/// Per-device values visible to generators.
#[derive(Debug, Clone, Default)]
pub struct GenerationContext {
    pub device_id: DbId,
    pub device_name: String,
    pub metadata: Map<String, Value>,
}

impl GenerationContext {
    pub fn new(device_id: DbId, device_name: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            metadata,
        }
    }

    /// Build a context from an arbitrary JSON value; non-objects yield empty metadata.
    pub fn from_metadata_value(device_id: DbId, device_name: impl Into<String>, metadata: &Value) -> Self {
        let metadata = metadata.as_object().cloned().unwrap_or_default();
        Self::new(device_id, device_name, metadata)
    }

    pub fn now(&self) -> Timestamp {
        chrono::Utc::now()
    }

    /// Resolve a template key. Dotted keys walk nested metadata objects.
    pub fn lookup(&self, key: &str) -> Option<Value> {
        match key {
            "device_id" => Some(Value::from(self.device_id)),
            "device_name" => Some(Value::String(self.device_name.clone())),
            _ => {
                let mut parts = key.split('.');
                let mut current = self.metadata.get(parts.next()?)?;
                for part in parts {
                    current = current.get(part)?;
                }
                Some(current.clone())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions and generators
// ---------------------------------------------------------------------------

/// A validated payload definition, ready to build a generator from.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadDefinition {
    Visual(Vec<FieldSpec>),
    Python(String),
}

impl PayloadDefinition {
    /// Build a definition from stored columns, checking that the matching
    /// column is present for the payload type.
    pub fn from_parts(
        payload_type: PayloadType,
        schema: Option<&Value>,
        python_code: Option<&str>,
    ) -> Result<Self, CoreError> {
        match payload_type {
            PayloadType::Visual => {
                let raw = schema.ok_or_else(|| {
                    CoreError::Validation("Visual payloads require a schema".to_string())
                })?;
                let fields = schema::parse_schema(raw)?;
                schema::validate_schema(&fields)?;
                Ok(Self::Visual(fields))
            }
            PayloadType::Python => {
                let code = python_code
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| {
                        CoreError::Validation("Python payloads require python_code".to_string())
                    })?;
                Ok(Self::Python(code.to_string()))
            }
        }
    }
}

/// Stateful generator owned by a single Device Runner.
pub enum PayloadGenerator {
    Visual(VisualGenerator),
    Python {
        code: String,
        sandbox: Arc<PythonSandbox>,
    },
}

impl PayloadGenerator {
    pub fn new(definition: PayloadDefinition, sandbox: Arc<PythonSandbox>) -> Self {
        match definition {
            PayloadDefinition::Visual(fields) => Self::Visual(VisualGenerator::new(fields)),
            PayloadDefinition::Python(code) => Self::Python { code, sandbox },
        }
    }

    /// Produce one payload object.
    pub async fn generate(&mut self, ctx: &GenerationContext) -> Result<Value, GeneratorError> {
        match self {
            Self::Visual(generator) => generator.generate(ctx),
            Self::Python { code, sandbox } => sandbox.generate(code, &ctx.metadata).await,
        }
    }
}

impl std::fmt::Debug for PayloadGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Visual(g) => f.debug_tuple("Visual").field(&g.fields().len()).finish(),
            Self::Python { code, .. } => f.debug_struct("Python").field("code_len", &code.len()).finish(),
        }
    }
}
