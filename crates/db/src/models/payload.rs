//! Payload entity model and DTOs.

use iotsim_core::error::CoreError;
use iotsim_core::payload::{PayloadDefinition, PayloadType};
use iotsim_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

/// A payload row from the `payloads` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Payload {
    pub id: DbId,
    pub name: String,
    pub description: Option<String>,
    /// `visual` or `python`.
    pub payload_type: String,
    /// Ordered field specs when `payload_type` is `visual`.
    pub schema: Option<Json<Value>>,
    /// Source code when `payload_type` is `python`.
    pub python_code: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Payload {
    pub fn kind(&self) -> Result<PayloadType, CoreError> {
        PayloadType::from_str_value(&self.payload_type)
    }

    /// Parse the stored columns into a generator definition.
    pub fn definition(&self) -> Result<PayloadDefinition, CoreError> {
        PayloadDefinition::from_parts(
            self.kind()?,
            self.schema.as_ref().map(|j| &j.0),
            self.python_code.as_deref(),
        )
    }
}

/// DTO for creating a new payload.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePayload {
    pub name: String,
    pub description: Option<String>,
    pub payload_type: PayloadType,
    pub schema: Option<Value>,
    pub python_code: Option<String>,
}

/// DTO for updating an existing payload. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePayload {
    pub name: Option<String>,
    pub description: Option<String>,
    pub payload_type: Option<PayloadType>,
    pub schema: Option<Value>,
    pub python_code: Option<String>,
}
