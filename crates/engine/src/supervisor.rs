//! Project Supervisor: owns the Device Runners of one running project.
//!
//! A supervisor is created by [`launch`](ProjectSupervisor::launch), which
//! spawns one runner per ready device and returns immediately. Startup
//! outcomes are collected by [`await_startup`](ProjectSupervisor::await_startup).
//! Runners are independent: one crashing never affects its siblings.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use iotsim_core::types::{DbId, Timestamp};
use tokio_util::sync::CancellationToken;

use crate::context::EngineContext;
use crate::error::EngineError;
use crate::plan::{SimulationPlan, SkippedDevice};
use crate::runner::DeviceRunner;
use crate::status::{
    DeviceRunnerState, DeviceStartFailure, DeviceStopFailure, ErrorHistory,
    ProjectSimulationStatus, StartReport, StopReport,
};

/// Slack on top of the connect timeout before a starting runner is abandoned.
const STARTUP_GRACE: Duration = Duration::from_secs(1);

pub struct ProjectSupervisor {
    project_id: DbId,
    project_name: String,
    total_devices: usize,
    started_at: Timestamp,
    runners: Vec<DeviceRunner>,
    skipped: Vec<SkippedDevice>,
    errors: Arc<ErrorHistory>,
    cancel: CancellationToken,
    ctx: EngineContext,
}

impl ProjectSupervisor {
    /// Spawn a runner for every simulation-ready device in `plan`.
    ///
    /// Fails with [`EngineError::NotSimulationReady`] when no device can run.
    pub fn launch(plan: SimulationPlan, ctx: &EngineContext) -> Result<Self, EngineError> {
        let project_id = plan.project_id;
        let project_name = plan.project_name.clone();
        let total_devices = plan.devices.len();
        let (ready, skipped) = plan.partition();

        if ready.is_empty() {
            return Err(EngineError::NotSimulationReady { project_id, skipped });
        }

        for device in &skipped {
            tracing::info!(
                project_id,
                device_id = device.device_id,
                reason = %device.reason,
                "Skipping device that is not simulation-ready",
            );
        }

        let cancel = CancellationToken::new();
        let errors = Arc::new(ErrorHistory::new(ctx.config.error_history));
        let runners = ready
            .into_iter()
            .map(|device| {
                DeviceRunner::spawn(
                    project_id,
                    device,
                    ctx,
                    Arc::clone(&errors),
                    cancel.child_token(),
                )
            })
            .collect::<Vec<_>>();

        tracing::info!(
            project_id,
            runners = runners.len(),
            skipped = skipped.len(),
            "Project simulation launched",
        );

        Ok(Self {
            project_id,
            project_name,
            total_devices,
            started_at: Utc::now(),
            runners,
            skipped,
            errors,
            cancel,
            ctx: ctx.clone(),
        })
    }

    pub fn project_id(&self) -> DbId {
        self.project_id
    }

    pub fn project_name(&self) -> &str {
        &self.project_name
    }

    /// Wait for every runner to reach `running` or `crashed`.
    pub async fn await_startup(&self) -> StartReport {
        let limit = self.ctx.config.start_timeout + STARTUP_GRACE;
        let outcomes = join_all(self.runners.iter().map(|r| async move {
            (r, r.wait_started(limit).await)
        }))
        .await;

        let mut started = 0;
        let mut failed = Vec::new();
        for (runner, outcome) in outcomes {
            match outcome {
                Ok(()) => started += 1,
                Err(error) => failed.push(DeviceStartFailure {
                    device_id: runner.device_id(),
                    device_name: runner.device_name().to_string(),
                    error,
                }),
            }
        }

        tracing::info!(
            project_id = self.project_id,
            started,
            failed = failed.len(),
            "Project simulation startup settled",
        );

        StartReport {
            project_id: self.project_id,
            started,
            failed,
            skipped: self.skipped.clone(),
            total_devices: self.total_devices,
        }
    }

    /// Whether any runner is still starting or running.
    pub fn is_running(&self) -> bool {
        self.runners.iter().any(|r| r.phase().is_active())
    }

    pub fn has_device(&self, device_id: DbId) -> bool {
        self.runners.iter().any(|r| r.device_id() == device_id)
    }

    pub fn device_state(&self, device_id: DbId) -> Option<DeviceRunnerState> {
        self.runners
            .iter()
            .find(|r| r.device_id() == device_id)
            .map(DeviceRunner::state)
    }

    pub fn status(&self) -> ProjectSimulationStatus {
        ProjectSimulationStatus::aggregate(
            self.project_id,
            &self.project_name,
            self.total_devices,
            self.started_at,
            self.runners.iter().map(DeviceRunner::state).collect(),
            &self.errors,
            self.skipped.clone(),
        )
    }

    /// Stop every runner concurrently. Safe to call more than once.
    pub async fn stop(&self) -> StopReport {
        let was_running = self.is_running();
        self.cancel.cancel();

        let drain = self.ctx.config.drain_timeout;
        let outcomes = join_all(
            self.runners
                .iter()
                .map(|r| async move { (r, r.stop(drain).await) }),
        )
        .await;

        let mut stopped_devices = 0;
        let mut failures = Vec::new();
        for (runner, outcome) in outcomes {
            match outcome {
                Ok(()) => stopped_devices += 1,
                Err(error) => failures.push(DeviceStopFailure {
                    device_id: runner.device_id(),
                    device_name: runner.device_name().to_string(),
                    error,
                }),
            }
        }

        if failures.is_empty() {
            tracing::info!(project_id = self.project_id, stopped_devices, "Project simulation stopped");
        } else {
            tracing::warn!(
                project_id = self.project_id,
                stopped_devices,
                failures = failures.len(),
                "Project simulation stopped with failures",
            );
        }

        StopReport {
            project_id: self.project_id,
            was_running,
            stopped_devices,
            failures,
        }
    }

    /// Stop a single device's runner, leaving the others untouched.
    ///
    /// Returns `None` when the device is not part of this simulation.
    pub async fn stop_device(&self, device_id: DbId) -> Option<Result<(), String>> {
        let runner = self.runners.iter().find(|r| r.device_id() == device_id)?;
        let outcome = runner.stop(self.ctx.config.drain_timeout).await;
        tracing::info!(
            project_id = self.project_id,
            device_id,
            ok = outcome.is_ok(),
            "Stopped single device runner",
        );
        Some(outcome)
    }
}
