//! Device Runner: the per-device unit of concurrency.
//!
//! Each runner is one Tokio task owning its own connector session and
//! payload generator. On every tick of its interval timer it generates a
//! payload, sends it, updates its counters and publishes an event. Ticks
//! are strictly sequential; a slow send delays the next tick rather than
//! overlapping it.
//!
//! Failures inside a tick, including panics, are contained here and turned
//! into `error` events. After more than `max_consecutive_errors` failures in
//! a row the runner crashes with "max errors reached" and does not restart.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use iotsim_connectors::retry::{reconnect_loop, send_with_retry, RetryPolicy};
use iotsim_connectors::{Ack, Connector, ConnectorError, Session};
use iotsim_core::device::{RECOMMENDED_MAX_INTERVAL, RECOMMENDED_MIN_INTERVAL};
use iotsim_core::payload::{GenerationContext, GeneratorError, PayloadGenerator};
use iotsim_core::target_system::TargetSettings;
use iotsim_core::types::DbId;
use iotsim_events::{SimulationEvent, SimulationEventType};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::context::EngineContext;
use crate::plan::ReadyDevice;
use crate::status::{DeviceRunnerState, ErrorHistory, RunnerPhase, SimulationError};

/// Stop reason recorded when the consecutive error limit is exceeded.
pub const MAX_ERRORS_REACHED: &str = "max errors reached";

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// State shared between the runner task and its handle.
struct RunnerShared {
    state: Mutex<DeviceRunnerState>,
    phase: watch::Sender<RunnerPhase>,
}

impl RunnerShared {
    fn update<R>(&self, f: impl FnOnce(&mut DeviceRunnerState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }

    fn snapshot(&self) -> DeviceRunnerState {
        self.update(|s| s.clone())
    }

    fn set_phase(&self, phase: RunnerPhase, reason: Option<String>) {
        self.update(|s| {
            s.phase = phase;
            s.is_running = phase.is_active();
            if reason.is_some() {
                s.stop_reason = reason;
            }
        });
        self.phase.send_replace(phase);
    }
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Handle to a spawned Device Runner task.
pub struct DeviceRunner {
    project_id: DbId,
    device_id: DbId,
    device_name: String,
    shared: Arc<RunnerShared>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
    bus: Arc<iotsim_events::EventBus>,
}

impl DeviceRunner {
    /// Spawn a runner task for a device that passed readiness checks.
    ///
    /// The runner starts in [`RunnerPhase::Starting`]; use
    /// [`wait_started`](Self::wait_started) to wait for it to settle.
    pub fn spawn(
        project_id: DbId,
        device: ReadyDevice,
        ctx: &EngineContext,
        errors: Arc<ErrorHistory>,
        cancel: CancellationToken,
    ) -> Self {
        let state = DeviceRunnerState::new(
            project_id,
            device.device_id,
            device.name.clone(),
            device.send_interval,
            device.target.describe(),
        );
        let (phase_tx, _) = watch::channel(RunnerPhase::Starting);
        let shared = Arc::new(RunnerShared {
            state: Mutex::new(state),
            phase: phase_tx,
        });

        let task = RunnerTask {
            project_id,
            device_id: device.device_id,
            device_name: device.name.clone(),
            send_interval: device.send_interval,
            gen_ctx: GenerationContext::new(device.device_id, device.name.clone(), device.metadata),
            generator: PayloadGenerator::new(device.payload, Arc::clone(&ctx.sandbox)),
            target: device.target,
            policy: ctx.config.retry_policy(),
            ctx: ctx.clone(),
            shared: Arc::clone(&shared),
            errors,
            cancel: cancel.clone(),
        };

        tracing::info!(project_id, device_id = device.device_id, "Spawning device runner");
        let handle = tokio::spawn(task.run());

        Self {
            project_id,
            device_id: device.device_id,
            device_name: device.name,
            shared,
            cancel,
            handle: Mutex::new(Some(handle)),
            bus: Arc::clone(&ctx.bus),
        }
    }

    pub fn device_id(&self) -> DbId {
        self.device_id
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn phase(&self) -> RunnerPhase {
        *self.shared.phase.borrow()
    }

    pub fn state(&self) -> DeviceRunnerState {
        self.shared.snapshot()
    }

    /// Wait until the runner is `running` or has crashed.
    ///
    /// A runner still starting after `timeout` is aborted and marked crashed.
    pub async fn wait_started(&self, timeout: Duration) -> Result<(), String> {
        let mut rx = self.shared.phase.subscribe();
        let settled = tokio::time::timeout(timeout, async {
            match rx.wait_for(|p| *p != RunnerPhase::Starting).await {
                Ok(phase) => *phase,
                Err(_) => RunnerPhase::Crashed,
            }
        })
        .await;

        match settled {
            Ok(RunnerPhase::Running) => Ok(()),
            Ok(_) => Err(self
                .state()
                .last_error
                .unwrap_or_else(|| "runner failed to start".to_string())),
            Err(_) => {
                let reason = format!("did not start within {}s", timeout.as_secs());
                self.cancel.cancel();
                self.abort_task();
                self.force_crash(&reason);
                Err(reason)
            }
        }
    }

    /// Stop the runner, waiting up to `drain` for it to exit.
    ///
    /// The pending timer is cancelled at once; an in-flight send may finish.
    /// Idempotent: stopping an already stopped runner returns `Ok`.
    pub async fn stop(&self, drain: Duration) -> Result<(), String> {
        self.cancel.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(mut handle) = handle else {
            return Ok(());
        };

        match tokio::time::timeout(drain, &mut handle).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                let reason = format!("runner task failed: {e}");
                self.force_crash(&reason);
                Err(reason)
            }
            Err(_) => {
                handle.abort();
                let reason = format!("did not stop within {}s", drain.as_secs());
                tracing::warn!(
                    project_id = self.project_id,
                    device_id = self.device_id,
                    "Device runner {reason}, aborted",
                );
                self.force_crash(&reason);
                Err(reason)
            }
        }
    }

    fn abort_task(&self) {
        if let Some(handle) = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
    }

    /// Mark the runner crashed from outside its task.
    fn force_crash(&self, reason: &str) {
        self.shared.update(|s| s.last_error = Some(reason.to_string()));
        self.shared.set_phase(RunnerPhase::Crashed, Some(reason.to_string()));
        self.bus.publish(SimulationEvent::new(
            self.project_id,
            self.device_id,
            self.device_name.clone(),
            SimulationEventType::Error,
            format!("Device runner {reason}"),
        ));
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Why the run loop exited.
enum LoopExit {
    Cancelled,
    MaxErrors,
}

/// A failed tick, ready to be recorded.
struct TickFailure {
    kind: &'static str,
    message: String,
}

impl From<GeneratorError> for TickFailure {
    fn from(e: GeneratorError) -> Self {
        Self {
            kind: e.kind(),
            message: format!("Payload generation failed: {e}"),
        }
    }
}

impl From<ConnectorError> for TickFailure {
    fn from(e: ConnectorError) -> Self {
        Self {
            kind: e.kind(),
            message: format!("Send failed: {e}"),
        }
    }
}

struct RunnerTask {
    project_id: DbId,
    device_id: DbId,
    device_name: String,
    send_interval: i64,
    gen_ctx: GenerationContext,
    generator: PayloadGenerator,
    target: TargetSettings,
    policy: RetryPolicy,
    ctx: EngineContext,
    shared: Arc<RunnerShared>,
    errors: Arc<ErrorHistory>,
    cancel: CancellationToken,
}

impl RunnerTask {
    async fn run(mut self) {
        let tag = format!("device-{}", self.device_id);
        let connector = match self.ctx.factory.create(&self.target, &tag) {
            Ok(c) => c,
            Err(e) => return self.crash_on_start(&e),
        };

        let start_timeout = self.ctx.config.start_timeout;
        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                self.shared.set_phase(RunnerPhase::Stopped, Some("stopped before connecting".into()));
                return;
            }
            result = tokio::time::timeout(start_timeout, connector.connect()) => {
                result.unwrap_or_else(|_| Err(ConnectorError::timeout(start_timeout)))
            }
        };
        let session = match connected {
            Ok(s) => s,
            Err(e) => return self.crash_on_start(&e),
        };

        self.emit(
            SimulationEventType::Connected,
            format!("Connected to {}", connector.describe()),
        );
        self.shared.update(|s| s.started_at = Some(Utc::now()));
        self.shared.set_phase(RunnerPhase::Running, None);
        self.emit(
            SimulationEventType::Started,
            format!("Simulation started, sending every {}s", self.send_interval),
        );
        if !(RECOMMENDED_MIN_INTERVAL..=RECOMMENDED_MAX_INTERVAL).contains(&self.send_interval) {
            self.emit(
                SimulationEventType::Warning,
                format!(
                    "Send interval {}s is outside the recommended {RECOMMENDED_MIN_INTERVAL}-{RECOMMENDED_MAX_INTERVAL}s range",
                    self.send_interval
                ),
            );
        }
        tracing::info!(
            project_id = self.project_id,
            device_id = self.device_id,
            target = %connector.describe(),
            "Device runner running",
        );

        let mut session = Some(session);
        match self.run_loop(connector.as_ref(), &mut session).await {
            LoopExit::Cancelled => self.shutdown(session).await,
            LoopExit::MaxErrors => self.crash(session).await,
        }
    }

    async fn run_loop(
        &mut self,
        connector: &dyn Connector,
        session: &mut Option<Box<dyn Session>>,
    ) -> LoopExit {
        let period = Duration::from_secs(self.send_interval.max(1) as u64);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let max_errors = self.ctx.config.max_consecutive_errors;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return LoopExit::Cancelled,
                _ = ticker.tick() => {}
            }

            let outcome = AssertUnwindSafe(self.tick(connector, session))
                .catch_unwind()
                .await;
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(failure)) => failure,
                Err(panic) => TickFailure {
                    kind: "internal_error",
                    message: format!("Unexpected failure during tick: {}", panic_message(&*panic)),
                },
            };

            if self.record_failure(failure) > max_errors {
                return LoopExit::MaxErrors;
            }
        }
    }

    /// Generate one payload and deliver it.
    async fn tick(
        &mut self,
        connector: &dyn Connector,
        session: &mut Option<Box<dyn Session>>,
    ) -> Result<(), TickFailure> {
        let payload = self.generator.generate(&self.gen_ctx).await?;
        let ack = self.deliver(connector, session, &payload).await?;

        let now = Utc::now();
        self.shared.update(|s| {
            s.messages_sent += 1;
            s.consecutive_errors = 0;
            s.last_message_at = Some(now);
        });
        self.ctx.bus.publish(
            self.event(
                SimulationEventType::MessageSent,
                format!("Message sent ({}, {} bytes)", ack.detail, ack.bytes),
            )
            .with_payload(payload),
        );
        Ok(())
    }

    /// Send with retries; on a lost connection reconnect once and resend.
    async fn deliver(
        &self,
        connector: &dyn Connector,
        session: &mut Option<Box<dyn Session>>,
        payload: &Value,
    ) -> Result<Ack, ConnectorError> {
        if session.is_none() {
            *session = self.reconnect(connector).await;
        }
        let Some(active) = session.as_mut() else {
            return Err(ConnectorError::ConnectionLost("not connected to target".into()));
        };

        match self.send(&mut **active, payload).await {
            Err(e) if e.needs_reconnect() => {
                self.emit(
                    SimulationEventType::Warning,
                    format!("Connection lost ({e}), reconnecting"),
                );
                if let Some(stale) = session.take() {
                    stale.disconnect().await;
                }
                *session = self.reconnect(connector).await;
                match session.as_mut() {
                    Some(fresh) => self.send(&mut **fresh, payload).await,
                    None => Err(e),
                }
            }
            other => other,
        }
    }

    async fn send(&self, session: &mut dyn Session, payload: &Value) -> Result<Ack, ConnectorError> {
        let limit = self.ctx.config.send_timeout;
        tokio::time::timeout(limit, send_with_retry(session, payload, &self.policy, &self.cancel))
            .await
            .unwrap_or_else(|_| Err(ConnectorError::timeout(limit)))
    }

    async fn reconnect(&self, connector: &dyn Connector) -> Option<Box<dyn Session>> {
        let attempts = self.policy.max_retries + 1;
        let session = reconnect_loop(connector, &self.policy.backoff, attempts, &self.cancel).await;
        if session.is_some() {
            self.emit(
                SimulationEventType::Connected,
                format!("Reconnected to {}", connector.describe()),
            );
        }
        session
    }

    /// Record a failed tick. Returns the new consecutive error count.
    fn record_failure(&self, failure: TickFailure) -> u32 {
        let consecutive = self.shared.update(|s| {
            s.consecutive_errors += 1;
            s.total_errors += 1;
            s.last_error = Some(failure.message.clone());
            s.consecutive_errors
        });
        tracing::warn!(
            project_id = self.project_id,
            device_id = self.device_id,
            kind = failure.kind,
            consecutive,
            "{}",
            failure.message,
        );
        self.errors.push(SimulationError {
            device_id: self.device_id,
            device_name: self.device_name.clone(),
            kind: failure.kind.to_string(),
            message: failure.message.clone(),
            timestamp: Utc::now(),
        });
        self.emit(SimulationEventType::Error, failure.message);
        consecutive
    }

    fn crash_on_start(&self, err: &ConnectorError) {
        let message = format!("Failed to connect: {err}");
        self.record_failure(TickFailure {
            kind: err.kind(),
            message: message.clone(),
        });
        self.shared.set_phase(RunnerPhase::Crashed, Some(message));
        tracing::error!(
            project_id = self.project_id,
            device_id = self.device_id,
            error = %err,
            "Device runner crashed while starting",
        );
    }

    async fn shutdown(&self, session: Option<Box<dyn Session>>) {
        self.shared.set_phase(RunnerPhase::Stopping, None);
        self.disconnect(session).await;
        self.shared.set_phase(RunnerPhase::Stopped, Some("stopped".into()));
        self.emit(SimulationEventType::Stopped, "Simulation stopped");
        tracing::info!(
            project_id = self.project_id,
            device_id = self.device_id,
            "Device runner stopped",
        );
    }

    async fn crash(&self, session: Option<Box<dyn Session>>) {
        self.disconnect(session).await;
        self.shared
            .set_phase(RunnerPhase::Crashed, Some(MAX_ERRORS_REACHED.to_string()));
        self.emit(
            SimulationEventType::Stopped,
            format!(
                "Device stopped: {MAX_ERRORS_REACHED} ({} consecutive errors)",
                self.shared.update(|s| s.consecutive_errors)
            ),
        );
        tracing::error!(
            project_id = self.project_id,
            device_id = self.device_id,
            "Device runner crashed: {MAX_ERRORS_REACHED}",
        );
    }

    async fn disconnect(&self, session: Option<Box<dyn Session>>) {
        if let Some(session) = session {
            session.disconnect().await;
            self.emit(SimulationEventType::Disconnected, "Disconnected from target");
        }
    }

    fn event(&self, event_type: SimulationEventType, message: impl Into<String>) -> SimulationEvent {
        SimulationEvent::new(
            self.project_id,
            self.device_id,
            self.device_name.clone(),
            event_type,
            message,
        )
    }

    fn emit(&self, event_type: SimulationEventType, message: impl Into<String>) {
        self.ctx.bus.publish(self.event(event_type, message));
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
