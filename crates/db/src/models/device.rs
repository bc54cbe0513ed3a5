//! Device entity model and DTOs.

use iotsim_core::device::DeviceConfig;
use iotsim_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::FromRow;

/// A device row from the `devices` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Device {
    pub id: DbId,
    pub project_id: DbId,
    pub name: String,
    pub description: Option<String>,
    pub device_type: String,
    /// Seconds between sends, 1..=3600.
    pub send_interval: i64,
    pub payload_id: Option<DbId>,
    pub target_system_id: Option<DbId>,
    pub is_enabled: bool,
    /// Arbitrary key/value map used as payload template context.
    pub metadata: Json<Value>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Device {
    /// The subset of fields that decides simulation readiness.
    pub fn config(&self) -> DeviceConfig {
        DeviceConfig {
            payload_id: self.payload_id,
            target_system_id: self.target_system_id,
            send_interval: self.send_interval,
            is_enabled: self.is_enabled,
        }
    }

    pub fn has_metadata(&self) -> bool {
        self.metadata.0.as_object().is_some_and(|m| !m.is_empty())
    }
}

/// DTO for creating a new device.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDevice {
    pub project_id: DbId,
    pub name: String,
    pub description: Option<String>,
    /// Defaults to `sensor` if omitted.
    pub device_type: Option<String>,
    /// Defaults to 10 seconds if omitted.
    pub send_interval: Option<i64>,
    pub payload_id: Option<DbId>,
    pub target_system_id: Option<DbId>,
    /// Defaults to `true` if omitted.
    pub is_enabled: Option<bool>,
    pub metadata: Option<Value>,
}

/// DTO for updating an existing device. All fields are optional.
///
/// A changed `project_id` is a move to another project.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateDevice {
    pub project_id: Option<DbId>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub device_type: Option<String>,
    pub send_interval: Option<i64>,
    pub payload_id: Option<DbId>,
    pub target_system_id: Option<DbId>,
    pub is_enabled: Option<bool>,
    pub metadata: Option<Value>,
}
