//! Inputs for starting a project simulation.
//!
//! The API layer resolves database rows into a [`SimulationPlan`]; the
//! engine never touches persistence.

use iotsim_core::device::{is_simulation_ready, DeviceConfig};
use iotsim_core::payload::PayloadDefinition;
use iotsim_core::target_system::TargetSettings;
use iotsim_core::types::DbId;
use serde::Serialize;
use serde_json::{Map, Value};

/// One device, with its payload and target already resolved.
#[derive(Debug, Clone)]
pub struct DeviceSpec {
    pub device_id: DbId,
    pub name: String,
    pub config: DeviceConfig,
    pub metadata: Map<String, Value>,
    /// `None` when unassigned or when the stored definition is invalid.
    pub payload: Option<PayloadDefinition>,
    /// `None` when unassigned or when the stored config is invalid.
    pub target: Option<TargetSettings>,
    /// Why resolution failed, if it did.
    pub resolution_error: Option<String>,
}

impl DeviceSpec {
    /// Reason this device will not be started, or `None` if it can run.
    pub fn skip_reason(&self) -> Option<String> {
        if !is_simulation_ready(&self.config) {
            let reason = if !self.config.is_enabled {
                "device is disabled"
            } else if self.config.payload_id.is_none() {
                "no payload assigned"
            } else if self.config.target_system_id.is_none() {
                "no target system assigned"
            } else {
                "send interval out of range"
            };
            return Some(reason.to_string());
        }
        if let Some(err) = &self.resolution_error {
            return Some(err.clone());
        }
        if self.payload.is_none() {
            return Some("payload could not be loaded".to_string());
        }
        if self.target.is_none() {
            return Some("target system could not be loaded".to_string());
        }
        None
    }
}

/// A device that was not started, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedDevice {
    pub device_id: DbId,
    pub device_name: String,
    pub reason: String,
}

/// Everything needed to start one project.
#[derive(Debug, Clone)]
pub struct SimulationPlan {
    pub project_id: DbId,
    pub project_name: String,
    pub devices: Vec<DeviceSpec>,
}

impl SimulationPlan {
    /// Split devices into startable specs and skipped entries.
    pub fn partition(self) -> (Vec<ReadyDevice>, Vec<SkippedDevice>) {
        let mut ready = Vec::new();
        let mut skipped = Vec::new();
        for spec in self.devices {
            match (spec.skip_reason(), spec.payload, spec.target) {
                (None, Some(payload), Some(target)) => ready.push(ReadyDevice {
                    device_id: spec.device_id,
                    name: spec.name,
                    send_interval: spec.config.send_interval,
                    metadata: spec.metadata,
                    payload,
                    target,
                }),
                (reason, _, _) => skipped.push(SkippedDevice {
                    device_id: spec.device_id,
                    device_name: spec.name,
                    reason: reason.unwrap_or_else(|| "not simulation-ready".to_string()),
                }),
            }
        }
        (ready, skipped)
    }
}

/// A device that passed readiness checks.
#[derive(Debug, Clone)]
pub struct ReadyDevice {
    pub device_id: DbId,
    pub name: String,
    pub send_interval: i64,
    pub metadata: Map<String, Value>,
    pub payload: PayloadDefinition,
    pub target: TargetSettings,
}
