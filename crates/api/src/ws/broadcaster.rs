//! Background services feeding the WebSocket manager.

use std::sync::Arc;
use std::time::Duration;

use iotsim_engine::{ProjectSimulationStatus, SimulationRegistry};
use iotsim_events::SimulationEvent;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::ws::manager::WsManager;
use crate::ws::message::{ActiveProjects, DeviceStatusUpdate, WsEvent};

// ---------------------------------------------------------------------------
// EventForwarder
// ---------------------------------------------------------------------------

/// Forwards bus events to WebSocket clients as `simulation_log`, adding a
/// `device_status_update` for lifecycle events.
pub struct EventForwarder;

impl EventForwarder {
    /// Run until `cancel` fires or the bus closes.
    pub async fn run(
        ws_manager: Arc<WsManager>,
        registry: Arc<SimulationRegistry>,
        mut receiver: broadcast::Receiver<SimulationEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = receiver.recv() => received,
            };

            match received {
                Ok(event) => Self::forward(&ws_manager, &registry, event).await,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "WebSocket forwarder lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, WebSocket forwarder shutting down");
                    break;
                }
            }
        }
    }

    async fn forward(ws_manager: &WsManager, registry: &SimulationRegistry, event: SimulationEvent) {
        let project_id = event.project_id;

        let status_update = if event.event_type.is_lifecycle() {
            Some(DeviceStatusUpdate {
                project_id,
                device_id: event.device_id,
                device_name: event.device_name.clone(),
                event_type: event.event_type.as_str().to_string(),
                state: registry.device_state(event.device_id).await,
                timestamp: event.timestamp,
            })
        } else {
            None
        };

        if let Some(msg) = WsEvent::SimulationLog(event).to_message() {
            ws_manager.send_to_project(project_id, msg).await;
        }
        if let Some(update) = status_update {
            if let Some(msg) = WsEvent::DeviceStatusUpdate(update).to_message() {
                ws_manager.send_to_project(project_id, msg).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StatusPublisher
// ---------------------------------------------------------------------------

/// Periodically pushes registry snapshots.
///
/// Global subscribers get `simulation_status_update` and
/// `active_projects_update`; project subscribers get their project's
/// `project_status_update`.
pub struct StatusPublisher;

impl StatusPublisher {
    pub async fn run(
        ws_manager: Arc<WsManager>,
        registry: Arc<SimulationRegistry>,
        every: Duration,
        cancel: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if ws_manager.connection_count().await > 0 {
                        Self::publish(&ws_manager, &registry).await;
                    }
                }
            }
        }
        tracing::info!("Status publisher stopped");
    }

    /// Push one round of status messages.
    pub async fn publish(ws_manager: &WsManager, registry: &SimulationRegistry) {
        let overview = registry.overview().await;
        let active = ActiveProjects::new(overview.projects.iter().map(|p| p.project_id).collect());

        for status in &overview.projects {
            if let Some(msg) = WsEvent::ProjectStatusUpdate(status.clone()).to_message() {
                ws_manager.send_to_project_only(status.project_id, msg).await;
            }
        }
        if let Some(msg) = WsEvent::ActiveProjectsUpdate(active).to_message() {
            ws_manager.send_global(msg).await;
        }
        if let Some(msg) = WsEvent::SimulationStatusUpdate(overview).to_message() {
            ws_manager.send_global(msg).await;
        }
    }

    /// Push one project's status to its subscribers right after a start or
    /// stop, without waiting for the next tick.
    pub async fn publish_project(ws_manager: &WsManager, status: ProjectSimulationStatus) {
        let project_id = status.project_id;
        if let Some(msg) = WsEvent::ProjectStatusUpdate(status).to_message() {
            ws_manager.send_to_project(project_id, msg).await;
        }
    }
}
