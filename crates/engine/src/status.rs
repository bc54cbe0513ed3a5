//! Runtime status types. Nothing here is persisted.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use iotsim_core::types::{DbId, Timestamp};
use serde::Serialize;

use crate::plan::SkippedDevice;

// ---------------------------------------------------------------------------
// Runner phase
// ---------------------------------------------------------------------------

/// Lifecycle phase of a Device Runner.
///
/// `Stopped -> Starting -> Running -> (Stopping -> Stopped | Crashed)`;
/// a failed connect goes straight from `Starting` to `Crashed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerPhase {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl RunnerPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        }
    }

    /// Whether the runner counts towards a project's active devices.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }

    /// Whether the runner will not change phase again on its own.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Crashed)
    }
}

// ---------------------------------------------------------------------------
// Device runner state
// ---------------------------------------------------------------------------

/// Live counters for one Device Runner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceRunnerState {
    pub device_id: DbId,
    pub device_name: String,
    pub project_id: DbId,
    pub phase: RunnerPhase,
    pub is_running: bool,
    pub messages_sent: u64,
    pub consecutive_errors: u32,
    pub total_errors: u64,
    pub last_error: Option<String>,
    pub last_message_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    /// Why the runner left the running phase, e.g. "max errors reached".
    pub stop_reason: Option<String>,
    pub send_interval: i64,
    /// Credential-free target description.
    pub target: String,
}

impl DeviceRunnerState {
    pub fn new(
        project_id: DbId,
        device_id: DbId,
        device_name: impl Into<String>,
        send_interval: i64,
        target: impl Into<String>,
    ) -> Self {
        Self {
            device_id,
            device_name: device_name.into(),
            project_id,
            phase: RunnerPhase::Starting,
            is_running: true,
            messages_sent: 0,
            consecutive_errors: 0,
            total_errors: 0,
            last_error: None,
            last_message_at: None,
            started_at: None,
            stop_reason: None,
            send_interval,
            target: target.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Error history
// ---------------------------------------------------------------------------

/// One recorded failure, shown in the project's error feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationError {
    pub device_id: DbId,
    pub device_name: String,
    /// Snake_case failure class (`timeout`, `auth_error`, `missing_result`, ...).
    pub kind: String,
    pub message: String,
    pub timestamp: Timestamp,
}

/// Bounded list of recent errors shared by a project's runners.
#[derive(Debug)]
pub struct ErrorHistory {
    capacity: usize,
    entries: Mutex<VecDeque<SimulationError>>,
    total: Mutex<u64>,
}

impl ErrorHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Mutex::new(VecDeque::new()),
            total: Mutex::new(0),
        }
    }

    pub fn push(&self, error: SimulationError) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(error);
        *self.total.lock().unwrap_or_else(|e| e.into_inner()) += 1;
    }

    /// Recent errors, oldest first.
    pub fn recent(&self) -> Vec<SimulationError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    /// Errors recorded since creation, including evicted ones.
    pub fn total(&self) -> u64 {
        *self.total.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Project status
// ---------------------------------------------------------------------------

/// Aggregated status of one project's simulation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSimulationStatus {
    pub project_id: DbId,
    pub project_name: String,
    pub is_running: bool,
    /// Every device in the project when the simulation started, ready or not.
    pub total_devices: usize,
    pub active_devices: usize,
    pub messages_sent: u64,
    pub error_count: u64,
    pub errors: Vec<SimulationError>,
    pub last_activity: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub devices: Vec<DeviceRunnerState>,
    pub skipped_devices: Vec<SkippedDevice>,
}

impl ProjectSimulationStatus {
    /// Status for a project with no supervisor.
    pub fn idle(project_id: DbId, project_name: impl Into<String>, total_devices: usize) -> Self {
        Self {
            project_id,
            project_name: project_name.into(),
            is_running: false,
            total_devices,
            active_devices: 0,
            messages_sent: 0,
            error_count: 0,
            errors: Vec::new(),
            last_activity: None,
            started_at: None,
            devices: Vec::new(),
            skipped_devices: Vec::new(),
        }
    }

    /// Build from runner snapshots.
    pub fn aggregate(
        project_id: DbId,
        project_name: &str,
        total_devices: usize,
        started_at: Timestamp,
        devices: Vec<DeviceRunnerState>,
        errors: &ErrorHistory,
        skipped_devices: Vec<SkippedDevice>,
    ) -> Self {
        let active_devices = devices.iter().filter(|d| d.phase.is_active()).count();
        let messages_sent = devices.iter().map(|d| d.messages_sent).sum();
        let recent = errors.recent();
        let last_error_at = recent.last().map(|e| e.timestamp);
        let last_message_at = devices.iter().filter_map(|d| d.last_message_at).max();

        Self {
            project_id,
            project_name: project_name.to_string(),
            is_running: active_devices > 0,
            total_devices,
            active_devices,
            messages_sent,
            error_count: errors.total(),
            errors: recent,
            last_activity: last_message_at.max(last_error_at),
            started_at: Some(started_at),
            devices,
            skipped_devices,
        }
    }
}

// ---------------------------------------------------------------------------
// Operation reports
// ---------------------------------------------------------------------------

/// A runner that failed to reach `running`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStartFailure {
    pub device_id: DbId,
    pub device_name: String,
    pub error: String,
}

/// Outcome of starting a project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StartReport {
    pub project_id: DbId,
    pub started: usize,
    pub failed: Vec<DeviceStartFailure>,
    pub skipped: Vec<SkippedDevice>,
    pub total_devices: usize,
}

/// A runner that did not shut down cleanly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceStopFailure {
    pub device_id: DbId,
    pub device_name: String,
    pub error: String,
}

/// Outcome of stopping a project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopReport {
    pub project_id: DbId,
    /// False when nothing was running.
    pub was_running: bool,
    pub stopped_devices: usize,
    pub failures: Vec<DeviceStopFailure>,
}

impl StopReport {
    pub fn not_running(project_id: DbId) -> Self {
        Self {
            project_id,
            was_running: false,
            stopped_devices: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// A project that did not stop cleanly during emergency stop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectStopFailure {
    pub project_id: DbId,
    pub error: String,
}

/// Outcome of stopping every project.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmergencyStopReport {
    pub stopped_projects: Vec<DbId>,
    pub failed_projects: Vec<ProjectStopFailure>,
    pub stopped_devices: usize,
    pub duration_ms: u64,
    pub timestamp: Timestamp,
}

impl EmergencyStopReport {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            stopped_projects: Vec::new(),
            failed_projects: Vec::new(),
            stopped_devices: 0,
            duration_ms,
            timestamp: Utc::now(),
        }
    }
}

/// Registry-wide summary for the global status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationOverview {
    pub active_projects: usize,
    pub active_devices: usize,
    pub total_messages_sent: u64,
    pub total_errors: u64,
    pub projects: Vec<ProjectSimulationStatus>,
    pub timestamp: Timestamp,
}

impl SimulationOverview {
    pub fn from_projects(projects: Vec<ProjectSimulationStatus>) -> Self {
        Self {
            active_projects: projects.iter().filter(|p| p.is_running).count(),
            active_devices: projects.iter().map(|p| p.active_devices).sum(),
            total_messages_sent: projects.iter().map(|p| p.messages_sent).sum(),
            total_errors: projects.iter().map(|p| p.error_count).sum(),
            projects,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn error(device_id: DbId, message: &str) -> SimulationError {
        SimulationError {
            device_id,
            device_name: format!("d{device_id}"),
            kind: "timeout".into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn phase_classification() {
        assert!(RunnerPhase::Running.is_active());
        assert!(RunnerPhase::Starting.is_active());
        assert!(!RunnerPhase::Crashed.is_active());
        assert!(RunnerPhase::Crashed.is_terminal());
        assert!(!RunnerPhase::Stopping.is_terminal());
        assert_eq!(RunnerPhase::Stopping.as_str(), "stopping");
    }

    #[test]
    fn error_history_is_bounded_but_counts_all() {
        let history = ErrorHistory::new(2);
        for i in 0..5 {
            history.push(error(1, &format!("e{i}")));
        }
        let recent: Vec<_> = history.recent().into_iter().map(|e| e.message).collect();
        assert_eq!(recent, vec!["e3", "e4"]);
        assert_eq!(history.total(), 5);
    }

    #[test]
    fn aggregate_counts_active_and_messages() {
        let mut running = DeviceRunnerState::new(1, 1, "a", 5, "t");
        running.phase = RunnerPhase::Running;
        running.messages_sent = 3;
        let mut crashed = DeviceRunnerState::new(1, 2, "b", 5, "t");
        crashed.phase = RunnerPhase::Crashed;
        crashed.is_running = false;
        crashed.messages_sent = 2;

        let history = ErrorHistory::new(10);
        history.push(error(2, "down"));

        let status = ProjectSimulationStatus::aggregate(
            1,
            "plant",
            3,
            Utc::now(),
            vec![running, crashed],
            &history,
            Vec::new(),
        );
        assert!(status.is_running);
        assert_eq!(status.active_devices, 1);
        assert_eq!(status.messages_sent, 5);
        assert_eq!(status.total_devices, 3);
        assert_eq!(status.error_count, 1);
        assert!(status.last_activity.is_some());
    }

    #[test]
    fn idle_status_is_not_running() {
        let status = ProjectSimulationStatus::idle(4, "idle", 2);
        assert!(!status.is_running);
        assert_eq!(status.total_devices, 2);
        assert!(status.devices.is_empty());
    }
}
