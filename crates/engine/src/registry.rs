//! Process-wide Simulation Registry.
//!
//! [`SimulationRegistry`] maps project ids to their running
//! [`ProjectSupervisor`]. It is created once at application startup and
//! shared with request handlers behind an `Arc`. At most one supervisor
//! exists per project; a second start while one is active is rejected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use iotsim_core::types::DbId;
use tokio::sync::RwLock;

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::plan::SimulationPlan;
use crate::status::{
    DeviceRunnerState, EmergencyStopReport, ProjectSimulationStatus, ProjectStopFailure,
    SimulationOverview, StartReport, StopReport,
};
use crate::supervisor::ProjectSupervisor;

pub struct SimulationRegistry {
    /// Supervisors indexed by `project_id`.
    supervisors: RwLock<HashMap<DbId, Arc<ProjectSupervisor>>>,
    ctx: EngineContext,
}

impl SimulationRegistry {
    pub fn new(ctx: EngineContext) -> Self {
        Self {
            supervisors: RwLock::new(HashMap::new()),
            ctx,
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Start a project simulation and wait for its runners to settle.
    ///
    /// A supervisor left over from a simulation whose runners all crashed
    /// is replaced.
    pub async fn start(&self, plan: SimulationPlan) -> Result<StartReport, EngineError> {
        let project_id = plan.project_id;
        let (supervisor, stale) = {
            let mut supervisors = self.supervisors.write().await;
            if supervisors.get(&project_id).is_some_and(|s| s.is_running()) {
                return Err(EngineError::AlreadyRunning(project_id));
            }
            let supervisor = Arc::new(ProjectSupervisor::launch(plan, &self.ctx)?);
            let stale = supervisors.insert(project_id, Arc::clone(&supervisor));
            (supervisor, stale)
        };

        if let Some(stale) = stale {
            stale.stop().await;
        }

        Ok(supervisor.await_startup().await)
    }

    /// Stop a project simulation. Stopping an idle project is a no-op.
    pub async fn stop(&self, project_id: DbId) -> StopReport {
        let supervisor = self.supervisors.write().await.remove(&project_id);
        match supervisor {
            Some(supervisor) => supervisor.stop().await,
            None => StopReport::not_running(project_id),
        }
    }

    /// Stop one device's runner wherever it is running.
    ///
    /// Returns `None` when no simulation contains the device.
    pub async fn stop_device(&self, device_id: DbId) -> Option<Result<(), String>> {
        let supervisor = self
            .supervisors
            .read()
            .await
            .values()
            .find(|s| s.has_device(device_id))
            .cloned()?;
        supervisor.stop_device(device_id).await
    }

    pub async fn is_running(&self, project_id: DbId) -> bool {
        self.supervisors
            .read()
            .await
            .get(&project_id)
            .is_some_and(|s| s.is_running())
    }

    /// Status of a project with a supervisor, running or crashed.
    pub async fn status(&self, project_id: DbId) -> Option<ProjectSimulationStatus> {
        self.supervisors
            .read()
            .await
            .get(&project_id)
            .map(|s| s.status())
    }

    pub async fn statuses(&self) -> Vec<ProjectSimulationStatus> {
        let mut statuses: Vec<_> = self
            .supervisors
            .read()
            .await
            .values()
            .map(|s| s.status())
            .collect();
        statuses.sort_by_key(|s| s.project_id);
        statuses
    }

    pub async fn overview(&self) -> SimulationOverview {
        SimulationOverview::from_projects(self.statuses().await)
    }

    /// Projects with at least one active runner.
    pub async fn active_project_ids(&self) -> Vec<DbId> {
        let mut ids: Vec<_> = self
            .supervisors
            .read()
            .await
            .values()
            .filter(|s| s.is_running())
            .map(|s| s.project_id())
            .collect();
        ids.sort_unstable();
        ids
    }

    pub async fn device_state(&self, device_id: DbId) -> Option<DeviceRunnerState> {
        self.supervisors
            .read()
            .await
            .values()
            .find_map(|s| s.device_state(device_id))
    }

    /// Stop every project concurrently, each bounded by the emergency
    /// stop timeout. Always returns a report; never fails as a whole.
    pub async fn emergency_stop_all(&self) -> EmergencyStopReport {
        let started = Instant::now();
        let drained: Vec<_> = self
            .supervisors
            .write()
            .await
            .drain()
            .map(|(_, s)| s)
            .collect();

        tracing::warn!(projects = drained.len(), "Emergency stop of all simulations");

        let limit = self.ctx.config.emergency_stop_timeout;
        let outcomes = join_all(drained.iter().map(|s| async move {
            (s.project_id(), tokio::time::timeout(limit, s.stop()).await)
        }))
        .await;

        let mut report = EmergencyStopReport::new(0);
        for (project_id, outcome) in outcomes {
            match outcome {
                Ok(stop) => {
                    report.stopped_devices += stop.stopped_devices;
                    if stop.is_clean() {
                        report.stopped_projects.push(project_id);
                    } else {
                        let error = stop
                            .failures
                            .iter()
                            .map(|f| format!("{}: {}", f.device_name, f.error))
                            .collect::<Vec<_>>()
                            .join("; ");
                        report
                            .failed_projects
                            .push(ProjectStopFailure { project_id, error });
                    }
                }
                Err(_) => report.failed_projects.push(ProjectStopFailure {
                    project_id,
                    error: format!("did not stop within {}s", limit.as_secs()),
                }),
            }
        }
        report.stopped_projects.sort_unstable();
        report.failed_projects.sort_by_key(|f| f.project_id);
        report.duration_ms = started.elapsed().as_millis() as u64;

        tracing::warn!(
            stopped = report.stopped_projects.len(),
            failed = report.failed_projects.len(),
            devices = report.stopped_devices,
            duration_ms = report.duration_ms,
            "Emergency stop complete",
        );
        report
    }

    /// Stop everything before the process exits.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down simulation registry");
        self.emergency_stop_all().await;
        tracing::info!("Simulation registry shut down complete");
    }
}
