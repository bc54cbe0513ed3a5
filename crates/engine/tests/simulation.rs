//! End-to-end engine tests against in-memory connectors.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use iotsim_connectors::{Ack, Connector, ConnectorError, ConnectorFactory, Session};
use iotsim_core::device::DeviceConfig;
use iotsim_core::payload::schema::parse_schema;
use iotsim_core::payload::{PayloadDefinition, PythonSandbox};
use iotsim_core::target_system::{TargetSettings, TargetSystemType};
use iotsim_core::types::DbId;
use iotsim_engine::runner::MAX_ERRORS_REACHED;
use iotsim_engine::{
    DeviceSpec, EngineConfig, EngineContext, EngineError, RunnerPhase, SimulationPlan,
    SimulationRegistry,
};
use iotsim_events::{EventBus, SimulationEvent, SimulationEventType};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// Mock connectors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
enum Behavior {
    #[default]
    Healthy,
    RefuseConnect,
    RejectSends,
    HangOnDisconnect,
}

type Sent = Arc<Mutex<Vec<(DbId, Value)>>>;

#[derive(Default)]
struct MockFactory {
    behaviors: HashMap<DbId, Behavior>,
    sent: Sent,
}

impl MockFactory {
    fn with(mut self, device_id: DbId, behavior: Behavior) -> Self {
        self.behaviors.insert(device_id, behavior);
        self
    }
}

impl ConnectorFactory for MockFactory {
    fn create(
        &self,
        _settings: &TargetSettings,
        client_tag: &str,
    ) -> Result<Box<dyn Connector>, ConnectorError> {
        let device_id: DbId = client_tag
            .strip_prefix("device-")
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| ConnectorError::Config(format!("unexpected tag {client_tag}")))?;
        Ok(Box::new(MockConnector {
            device_id,
            behavior: self.behaviors.get(&device_id).copied().unwrap_or_default(),
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct MockConnector {
    device_id: DbId,
    behavior: Behavior,
    sent: Sent,
}

#[async_trait]
impl Connector for MockConnector {
    fn system_type(&self) -> TargetSystemType {
        TargetSystemType::Http
    }

    fn describe(&self) -> String {
        format!("mock target for device {}", self.device_id)
    }

    async fn connect(&self) -> Result<Box<dyn Session>, ConnectorError> {
        if let Behavior::RefuseConnect = self.behavior {
            return Err(ConnectorError::TransientNetwork("connection refused".into()));
        }
        Ok(Box::new(MockSession {
            device_id: self.device_id,
            behavior: self.behavior,
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct MockSession {
    device_id: DbId,
    behavior: Behavior,
    sent: Sent,
}

#[async_trait]
impl Session for MockSession {
    async fn send(&mut self, payload: &Value) -> Result<Ack, ConnectorError> {
        if let Behavior::RejectSends = self.behavior {
            return Err(ConnectorError::Protocol("HTTP 422: rejected".into()));
        }
        self.sent.lock().unwrap().push((self.device_id, payload.clone()));
        Ok(Ack::new("accepted", 0))
    }

    async fn disconnect(self: Box<Self>) {
        if let Behavior::HangOnDisconnect = self.behavior {
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn registry(factory: MockFactory, config: EngineConfig) -> (SimulationRegistry, Arc<EventBus>, Sent) {
    let bus = Arc::new(EventBus::default());
    let sent = Arc::clone(&factory.sent);
    let ctx = EngineContext::new(
        Arc::clone(&bus),
        Arc::new(factory),
        Arc::new(PythonSandbox::default()),
        config,
    );
    (SimulationRegistry::new(ctx), bus, sent)
}

fn temperature_payload() -> PayloadDefinition {
    let fields = parse_schema(&json!([
        {"name": "temperature", "type": "number",
         "generator": {"kind": "random_float", "min": 18, "max": 25, "decimals": 1}}
    ]))
    .unwrap();
    PayloadDefinition::Visual(fields)
}

fn device(id: DbId, interval: i64, payload: PayloadDefinition) -> DeviceSpec {
    DeviceSpec {
        device_id: id,
        name: format!("sensor-{id}"),
        config: DeviceConfig {
            payload_id: Some(1),
            target_system_id: Some(1),
            send_interval: interval,
            is_enabled: true,
        },
        metadata: Map::new(),
        payload: Some(payload),
        target: Some(
            TargetSettings::from_config(TargetSystemType::Http, &json!({"url": "http://mock/"}))
                .unwrap(),
        ),
        resolution_error: None,
    }
}

fn plan(project_id: DbId, devices: Vec<DeviceSpec>) -> SimulationPlan {
    SimulationPlan {
        project_id,
        project_name: format!("project-{project_id}"),
        devices,
    }
}

fn drain(rx: &mut broadcast::Receiver<SimulationEvent>) -> Vec<SimulationEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn runs_visual_payload_on_interval() {
    let (registry, bus, sent) = registry(MockFactory::default(), EngineConfig::default());
    let mut rx = bus.subscribe();

    let report = registry
        .start(plan(1, vec![device(10, 1, temperature_payload())]))
        .await
        .unwrap();
    assert_eq!(report.started, 1);
    assert!(report.failed.is_empty());

    tokio::time::sleep(Duration::from_secs(3)).await;

    let status = registry.status(1).await.unwrap();
    assert!(status.is_running);
    assert_eq!(status.active_devices, 1);
    assert!(status.messages_sent >= 2, "sent {}", status.messages_sent);

    for (_, payload) in sent.lock().unwrap().iter() {
        let t = payload["temperature"].as_f64().unwrap();
        assert!((18.0..=25.0).contains(&t));
        assert_eq!((t * 10.0).round() / 10.0, t);
    }

    let kinds: Vec<_> = drain(&mut rx).into_iter().map(|e| e.event_type).collect();
    assert_eq!(kinds[0], SimulationEventType::Connected);
    assert_eq!(kinds[1], SimulationEventType::Started);
    // Interval of 1s is below the recommended window.
    assert!(kinds.contains(&SimulationEventType::Warning));
    assert!(kinds.contains(&SimulationEventType::MessageSent));

    let stop = registry.stop(1).await;
    assert!(stop.was_running);
    assert!(stop.is_clean());
    let tail: Vec<_> = drain(&mut rx).into_iter().map(|e| e.event_type).collect();
    assert_eq!(
        tail,
        vec![SimulationEventType::Disconnected, SimulationEventType::Stopped]
    );
}

#[tokio::test(start_paused = true)]
async fn message_sent_events_carry_payload() {
    let (registry, bus, _) = registry(MockFactory::default(), EngineConfig::default());
    let mut rx = bus.subscribe();
    registry
        .start(plan(1, vec![device(1, 5, temperature_payload())]))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sent = drain(&mut rx)
        .into_iter()
        .find(|e| e.event_type == SimulationEventType::MessageSent)
        .expect("first tick fires immediately");
    assert_eq!(sent.device_name, "sensor-1");
    assert!(sent.payload.unwrap()["temperature"].is_number());
    registry.stop(1).await;
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected_while_running() {
    let (registry, _, _) = registry(MockFactory::default(), EngineConfig::default());
    registry
        .start(plan(1, vec![device(1, 5, temperature_payload())]))
        .await
        .unwrap();

    let again = registry
        .start(plan(1, vec![device(1, 5, temperature_payload())]))
        .await;
    assert_matches!(again, Err(EngineError::AlreadyRunning(1)));
    registry.stop(1).await;
}

#[tokio::test(start_paused = true)]
async fn project_without_ready_devices_is_rejected() {
    let (registry, _, _) = registry(MockFactory::default(), EngineConfig::default());
    let mut disabled = device(1, 5, temperature_payload());
    disabled.config.is_enabled = false;

    let result = registry.start(plan(1, vec![disabled])).await;
    assert_matches!(
        result,
        Err(EngineError::NotSimulationReady { project_id: 1, ref skipped }) if skipped.len() == 1
    );
    assert!(registry.status(1).await.is_none());
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let (registry, _, _) = registry(MockFactory::default(), EngineConfig::default());
    registry
        .start(plan(1, vec![device(1, 5, temperature_payload())]))
        .await
        .unwrap();

    let first = registry.stop(1).await;
    assert!(first.was_running);
    assert_eq!(first.stopped_devices, 1);

    let second = registry.stop(1).await;
    assert!(!second.was_running);
    assert!(second.is_clean());
    assert!(!registry.is_running(1).await);
}

#[tokio::test(start_paused = true)]
async fn skipped_devices_are_reported() {
    let (registry, _, _) = registry(MockFactory::default(), EngineConfig::default());
    let mut unassigned = device(2, 5, temperature_payload());
    unassigned.config.target_system_id = None;

    let report = registry
        .start(plan(1, vec![device(1, 5, temperature_payload()), unassigned]))
        .await
        .unwrap();
    assert_eq!(report.started, 1);
    assert_eq!(report.total_devices, 2);
    assert_eq!(report.skipped[0].device_id, 2);
    assert_eq!(report.skipped[0].reason, "no target system assigned");
    registry.stop(1).await;
}

// ---------------------------------------------------------------------------
// Failure isolation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn refused_connection_crashes_only_that_runner() {
    let factory = MockFactory::default().with(2, Behavior::RefuseConnect);
    let (registry, _, _) = registry(factory, EngineConfig::default());

    let report = registry
        .start(plan(
            1,
            vec![device(1, 5, temperature_payload()), device(2, 5, temperature_payload())],
        ))
        .await
        .unwrap();
    assert_eq!(report.started, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].device_id, 2);
    assert!(report.failed[0].error.contains("connection refused"));

    let crashed = registry.device_state(2).await.unwrap();
    assert_eq!(crashed.phase, RunnerPhase::Crashed);
    assert!(crashed.started_at.is_none());
    assert_eq!(registry.device_state(1).await.unwrap().phase, RunnerPhase::Running);
    registry.stop(1).await;
}

#[tokio::test(start_paused = true)]
async fn runner_crashes_after_too_many_consecutive_errors() {
    let factory = MockFactory::default().with(2, Behavior::RejectSends);
    let config = EngineConfig {
        max_consecutive_errors: 3,
        ..Default::default()
    };
    let (registry, _, _) = registry(factory, config);
    registry
        .start(plan(
            1,
            vec![device(1, 1, temperature_payload()), device(2, 1, temperature_payload())],
        ))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;

    let failing = registry.device_state(2).await.unwrap();
    assert_eq!(failing.phase, RunnerPhase::Crashed);
    assert_eq!(failing.stop_reason.as_deref(), Some(MAX_ERRORS_REACHED));
    assert_eq!(failing.consecutive_errors, 4);
    assert_eq!(failing.messages_sent, 0);

    let healthy = registry.device_state(1).await.unwrap();
    assert_eq!(healthy.phase, RunnerPhase::Running);
    assert!(healthy.messages_sent >= 5);

    let status = registry.status(1).await.unwrap();
    assert!(status.is_running);
    assert_eq!(status.active_devices, 1);
    assert_eq!(status.error_count, 4);
    assert!(status.errors.iter().all(|e| e.kind == "protocol_error"));
    registry.stop(1).await;
}

#[tokio::test(start_paused = true)]
async fn emergency_stop_reports_hung_project() {
    let factory = MockFactory::default().with(30, Behavior::HangOnDisconnect);
    let (registry, _, _) = registry(factory, EngineConfig::default());
    for project_id in [1, 2, 3] {
        registry
            .start(plan(
                project_id,
                vec![device(project_id * 10, 5, temperature_payload())],
            ))
            .await
            .unwrap();
    }
    assert_eq!(registry.active_project_ids().await, vec![1, 2, 3]);

    let report = registry.emergency_stop_all().await;
    assert_eq!(report.stopped_projects, vec![1, 2]);
    assert_eq!(report.failed_projects.len(), 1);
    assert_eq!(report.failed_projects[0].project_id, 3);
    assert!(report.failed_projects[0].error.contains("did not stop within"));
    assert!(registry.active_project_ids().await.is_empty());
    assert!(registry.statuses().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stopping_one_device_leaves_siblings_running() {
    let (registry, _, _) = registry(MockFactory::default(), EngineConfig::default());
    registry
        .start(plan(
            1,
            vec![device(1, 5, temperature_payload()), device(2, 5, temperature_payload())],
        ))
        .await
        .unwrap();

    assert_matches!(registry.stop_device(2).await, Some(Ok(())));
    assert_eq!(registry.device_state(2).await.unwrap().phase, RunnerPhase::Stopped);
    assert_eq!(registry.device_state(1).await.unwrap().phase, RunnerPhase::Running);
    assert!(registry.is_running(1).await);
    assert!(registry.stop_device(99).await.is_none());
    registry.stop(1).await;
}

// ---------------------------------------------------------------------------
// Python payloads
// ---------------------------------------------------------------------------

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

#[tokio::test]
async fn python_without_result_records_errors_and_keeps_running() {
    if !python_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let (registry, _, sent) = registry(MockFactory::default(), EngineConfig::default());
    let code = PayloadDefinition::Python("x = 1 + 1".into());
    registry.start(plan(1, vec![device(1, 1, code)])).await.unwrap();

    tokio::time::sleep(Duration::from_millis(2500)).await;

    let status = registry.status(1).await.unwrap();
    assert!(status.is_running);
    assert_eq!(status.messages_sent, 0);
    assert!(!status.errors.is_empty());
    assert!(status.errors.iter().all(|e| e.kind == "missing_result"));
    assert!(sent.lock().unwrap().is_empty());
    registry.stop(1).await;
}
