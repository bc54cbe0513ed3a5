//! Simulation engine: Device Runners, per-project Supervisors and the
//! process-wide Simulation Registry.
//!
//! Control flows Registry -> Supervisor -> Runner -> Connector/Generator.
//! Runners publish their events on the shared
//! [`EventBus`](iotsim_events::EventBus); status is read back up through
//! cheap synchronous snapshots.

pub mod config;
pub mod context;
pub mod error;
pub mod plan;
pub mod registry;
pub mod runner;
pub mod status;
pub mod supervisor;

pub use config::EngineConfig;
pub use context::EngineContext;
pub use error::EngineError;
pub use plan::{DeviceSpec, SimulationPlan, SkippedDevice};
pub use registry::SimulationRegistry;
pub use status::{
    DeviceRunnerState, EmergencyStopReport, ProjectSimulationStatus, RunnerPhase, SimulationError,
    SimulationOverview, StartReport, StopReport,
};
pub use supervisor::ProjectSupervisor;
