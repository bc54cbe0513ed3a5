//! Shared harness for API integration tests.
//!
//! [`TestApp`] owns one [`AppState`] so simulation state survives across
//! requests; each call to [`TestApp::router`] builds the production router
//! around that state. Connectors are in-memory: any target whose
//! description contains `unreachable` refuses connections.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use iotsim_connectors::{Ack, Connector, ConnectorError, ConnectorFactory, Session};
use iotsim_core::payload::PythonSandbox;
use iotsim_core::target_system::{TargetSettings, TargetSystemType};
use iotsim_engine::{EngineConfig, EngineContext, SimulationRegistry};
use iotsim_events::{EventBus, LogHistory, LogRecorder};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tower::ServiceExt;

use iotsim_api::config::ServerConfig;
use iotsim_api::router::build_app_router;
use iotsim_api::state::AppState;

// ---------------------------------------------------------------------------
// In-memory connectors
// ---------------------------------------------------------------------------

pub type Sent = Arc<Mutex<Vec<Value>>>;

#[derive(Default)]
pub struct MockFactory {
    pub sent: Sent,
}

impl ConnectorFactory for MockFactory {
    fn create(
        &self,
        settings: &TargetSettings,
        _client_tag: &str,
    ) -> Result<Box<dyn Connector>, ConnectorError> {
        Ok(Box::new(MockConnector {
            system_type: settings.system_type(),
            target: settings.describe(),
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct MockConnector {
    system_type: TargetSystemType,
    target: String,
    sent: Sent,
}

#[async_trait]
impl Connector for MockConnector {
    fn system_type(&self) -> TargetSystemType {
        self.system_type
    }

    fn describe(&self) -> String {
        self.target.clone()
    }

    async fn connect(&self) -> Result<Box<dyn Session>, ConnectorError> {
        if self.target.contains("unreachable") {
            return Err(ConnectorError::TransientNetwork(format!(
                "connection refused by {}",
                self.target
            )));
        }
        Ok(Box::new(MockSession {
            sent: Arc::clone(&self.sent),
        }))
    }
}

struct MockSession {
    sent: Sent,
}

#[async_trait]
impl Session for MockSession {
    async fn send(&mut self, payload: &Value) -> Result<Ack, ConnectorError> {
        self.sent.lock().unwrap().push(payload.clone());
        Ok(Ack::new("accepted", 0))
    }

    async fn disconnect(self: Box<Self>) {}
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        database_url: "sqlite::memory:".to_string(),
        status_broadcast_interval_secs: 2,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub sent: Sent,
}

impl TestApp {
    pub fn new(pool: SqlitePool) -> Self {
        let factory = MockFactory::default();
        let sent = Arc::clone(&factory.sent);

        let bus = Arc::new(EventBus::default());
        let log_history = Arc::new(LogHistory::new(500));
        tokio::spawn(LogRecorder::run(Arc::clone(&log_history), bus.subscribe()));

        let ctx = EngineContext::new(
            bus,
            Arc::new(factory),
            Arc::new(PythonSandbox::default()),
            EngineConfig::default(),
        );
        let registry = Arc::new(SimulationRegistry::new(ctx));
        let state = AppState::new(pool, test_config(), registry, log_history);
        Self { state, sent }
    }

    /// The production router around this app's state.
    pub fn router(&self) -> Router {
        build_app_router(self.state.clone(), &test_config())
    }
}

/// Router for tests that need a single request.
pub fn build_test_app(pool: SqlitePool) -> Router {
    TestApp::new(pool).router()
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn body_text(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri, None).await
}

pub async fn post(app: Router, uri: &str) -> Response {
    send(app, Method::POST, uri, None).await
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn put_json(app: Router, uri: &str, body: Value) -> Response {
    send(app, Method::PUT, uri, Some(body)).await
}

pub async fn patch(app: Router, uri: &str) -> Response {
    send(app, Method::PATCH, uri, None).await
}

pub async fn delete(app: Router, uri: &str) -> Response {
    send(app, Method::DELETE, uri, None).await
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// POST and return the created row's id, asserting 201.
pub async fn create(app: &TestApp, uri: &str, body: Value) -> i64 {
    let response = post_json(app.router(), uri, body).await;
    assert_eq!(response.status(), StatusCode::CREATED, "POST {uri} failed");
    body_json(response).await["id"].as_i64().unwrap()
}

pub async fn create_project(app: &TestApp, name: &str) -> i64 {
    create(app, "/api/projects", json!({ "name": name })).await
}

/// Visual payload with one bounded integer field.
pub async fn create_payload(app: &TestApp, name: &str) -> i64 {
    create(
        app,
        "/api/payloads",
        json!({
            "name": name,
            "payload_type": "visual",
            "schema": [
                {"name": "level", "type": "number",
                 "generator": {"kind": "random_int", "min": 1, "max": 9}}
            ]
        }),
    )
    .await
}

pub async fn create_http_target(app: &TestApp, name: &str, url: &str) -> i64 {
    create(
        app,
        "/api/target-systems",
        json!({ "name": name, "system_type": "http", "config": { "url": url } }),
    )
    .await
}

/// A simulation-ready device.
pub async fn create_ready_device(
    app: &TestApp,
    project_id: i64,
    name: &str,
    payload_id: i64,
    target_id: i64,
) -> i64 {
    create(
        app,
        "/api/devices",
        json!({
            "project_id": project_id,
            "name": name,
            "send_interval": 10,
            "payload_id": payload_id,
            "target_system_id": target_id,
            "metadata": {"site": "lab"}
        }),
    )
    .await
}
