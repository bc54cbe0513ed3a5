//! Standalone connection probe for target-system configurations.
//!
//! [`test_connection`] never fails: every outcome, including timeouts and
//! panics inside a connector, is folded into a [`ConnectionTestResult`].

use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use iotsim_core::target_system::{TargetSettings, TargetSystemType};
use serde::Serialize;
use serde_json::{json, Value};

use crate::connector::ConnectorFactory;
use crate::error::ConnectorError;

/// Extra time granted on top of the target's own timeout, covering
/// multi-step handshakes (e.g. HEAD then OPTIONS).
const PROBE_GRACE: Duration = Duration::from_secs(2);

/// Outcome of a connection probe.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTestResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Snake_case failure class, see [`ConnectorError::kind`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_payload: Option<Value>,
    /// Credential-free destination description.
    pub target: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl ConnectionTestResult {
    fn ok(target: String, message: String, sample: Value, elapsed: Duration) -> Self {
        Self {
            success: true,
            message: Some(message),
            error: None,
            error_kind: None,
            sample_payload: Some(sample),
            target,
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }

    fn failed(target: String, error: &ConnectorError, elapsed: Duration) -> Self {
        Self {
            success: false,
            message: None,
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            sample_payload: None,
            target,
            duration_ms: elapsed.as_millis() as u64,
            timestamp: Utc::now(),
        }
    }
}

/// Sample document used when the caller supplies none.
pub fn sample_payload() -> Value {
    json!({
        "device_id": "connection-test",
        "message": "IoT simulator connection test",
        "value": 42,
        "timestamp": Utc::now().to_rfc3339(),
    })
}

/// Probe a target described by typed settings.
///
/// Bounded by the target's configured timeout plus a small grace period.
pub async fn test_connection(
    factory: &dyn ConnectorFactory,
    settings: &TargetSettings,
    sample: Option<Value>,
) -> ConnectionTestResult {
    let started = Instant::now();
    let target = settings.describe();
    let sample = sample.unwrap_or_else(sample_payload);

    let connector = match factory.create(settings, "connection-test") {
        Ok(c) => c,
        Err(e) => return ConnectionTestResult::failed(target, &e, started.elapsed()),
    };

    let limit = settings.timeout() + PROBE_GRACE;
    let outcome = tokio::time::timeout(
        limit,
        AssertUnwindSafe(connector.probe(&sample)).catch_unwind(),
    )
    .await;

    let result = match outcome {
        Ok(Ok(Ok(message))) => {
            return ConnectionTestResult::ok(target, message, sample, started.elapsed());
        }
        Ok(Ok(Err(e))) => e,
        Ok(Err(_panic)) => ConnectorError::Protocol("connector panicked during probe".into()),
        Err(_) => ConnectorError::timeout(limit),
    };

    tracing::debug!(target_system = %target, error = %result, "Connection test failed");
    ConnectionTestResult::failed(target, &result, started.elapsed())
}

/// Deliver one payload through a fresh session: connect, send, disconnect.
///
/// Unlike [`test_connection`], which may use a read-only check, this always
/// hands `payload` to the target. Bounded the same way.
pub async fn send_once(
    factory: &dyn ConnectorFactory,
    settings: &TargetSettings,
    payload: &Value,
) -> ConnectionTestResult {
    let started = Instant::now();
    let target = settings.describe();

    let connector = match factory.create(settings, "device-test") {
        Ok(c) => c,
        Err(e) => return ConnectionTestResult::failed(target, &e, started.elapsed()),
    };

    let limit = settings.timeout() + PROBE_GRACE;
    let delivery = async {
        let mut session = connector.connect().await?;
        let result = session.send(payload).await;
        session.disconnect().await;
        result
    };
    let outcome = tokio::time::timeout(limit, AssertUnwindSafe(delivery).catch_unwind()).await;

    let result = match outcome {
        Ok(Ok(Ok(ack))) => {
            let message = format!("Delivered to {target} ({}, {} bytes)", ack.detail, ack.bytes);
            return ConnectionTestResult::ok(target, message, payload.clone(), started.elapsed());
        }
        Ok(Ok(Err(e))) => e,
        Ok(Err(_panic)) => ConnectorError::Protocol("connector panicked during send".into()),
        Err(_) => ConnectorError::timeout(limit),
    };

    tracing::debug!(target_system = %target, error = %result, "One-shot send failed");
    ConnectionTestResult::failed(target, &result, started.elapsed())
}

/// Probe a raw, not yet persisted configuration.
///
/// Invalid configurations are reported as a failed result rather than an
/// error so callers can render them the same way as network failures.
pub async fn test_connection_config(
    factory: &dyn ConnectorFactory,
    system_type: TargetSystemType,
    config: &Value,
    sample: Option<Value>,
) -> ConnectionTestResult {
    match TargetSettings::from_config(system_type, config) {
        Ok(settings) => test_connection(factory, &settings, sample).await,
        Err(e) => ConnectionTestResult::failed(
            format!("{system_type} target"),
            &ConnectorError::Config(e.to_string()),
            Duration::ZERO,
        ),
    }
}
