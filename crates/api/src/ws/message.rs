//! Outbound `{type, data}` envelopes.

use axum::extract::ws::Message;
use iotsim_core::types::{DbId, Timestamp};
use iotsim_engine::{DeviceRunnerState, ProjectSimulationStatus, SimulationOverview};
use iotsim_events::SimulationEvent;
use serde::Serialize;

/// Every message pushed to browser clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WsEvent {
    SimulationLog(SimulationEvent),
    ProjectStatusUpdate(ProjectSimulationStatus),
    SimulationStatusUpdate(SimulationOverview),
    DeviceStatusUpdate(DeviceStatusUpdate),
    ActiveProjectsUpdate(ActiveProjects),
}

/// A runner changed phase.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusUpdate {
    pub project_id: DbId,
    pub device_id: DbId,
    pub device_name: String,
    /// The lifecycle event that triggered the update.
    pub event_type: String,
    /// Live runner state; absent once the runner has left the registry.
    pub state: Option<DeviceRunnerState>,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveProjects {
    pub project_ids: Vec<DbId>,
    pub count: usize,
    pub timestamp: Timestamp,
}

impl ActiveProjects {
    pub fn new(project_ids: Vec<DbId>) -> Self {
        Self {
            count: project_ids.len(),
            project_ids,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl WsEvent {
    /// Serialize into a text frame. Serialization of these types cannot
    /// fail in practice; if it does the error is logged and `None` returned.
    pub fn to_message(&self) -> Option<Message> {
        match serde_json::to_string(self) {
            Ok(text) => Some(Message::Text(text.into())),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize WebSocket event");
                None
            }
        }
    }
}
