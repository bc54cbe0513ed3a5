//! Target system entity model and DTOs.

use iotsim_core::error::CoreError;
use iotsim_core::target_system::{TargetSettings, TargetSystemType};
use iotsim_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

/// A target system row from the `target_systems` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct TargetSystem {
    pub id: DbId,
    pub name: String,
    /// One of `http`, `mqtt`, `kafka`, `websocket`, `ftp`, `pubsub`.
    pub system_type: String,
    /// Protocol-specific settings, normalized against the type schema.
    pub config: Json<Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TargetSystem {
    pub fn kind(&self) -> Result<TargetSystemType, CoreError> {
        TargetSystemType::from_str_value(&self.system_type)
    }

    /// Convert the stored config into typed settings.
    pub fn settings(&self) -> Result<TargetSettings, CoreError> {
        TargetSettings::from_config(self.kind()?, &self.config.0)
    }
}

/// DTO for creating a new target system.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTargetSystem {
    pub name: String,
    pub system_type: TargetSystemType,
    pub config: Value,
}

/// DTO for updating an existing target system. All fields are optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTargetSystem {
    pub name: Option<String>,
    pub system_type: Option<TargetSystemType>,
    pub config: Option<Value>,
}
