use iotsim_core::types::DbId;

use crate::plan::SkippedDevice;

/// Errors raised by Supervisor and Registry operations.
///
/// Individual runner failures never surface here; they are reported
/// through status snapshots and events.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No device in the project can be started.
    #[error("Project {project_id} has no simulation-ready devices")]
    NotSimulationReady {
        project_id: DbId,
        skipped: Vec<SkippedDevice>,
    },

    /// A simulation for the project is already active.
    #[error("Simulation for project {0} is already running")]
    AlreadyRunning(DbId),
}
