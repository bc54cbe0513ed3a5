//! Connector and session traits plus the factory that maps settings to
//! concrete protocol implementations.

use std::time::Instant;

use async_trait::async_trait;
use iotsim_core::target_system::{TargetSettings, TargetSystemType};
use serde::Serialize;
use serde_json::Value;

use crate::error::ConnectorError;
use crate::ftp::FtpConnector;
use crate::http::HttpConnector;
use crate::kafka::KafkaConnector;
use crate::mqtt::MqttConnector;
use crate::pubsub::PubSubConnector;
use crate::websocket::WebSocketConnector;

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Delivery confirmation returned by a successful send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    /// Protocol-specific confirmation, e.g. `HTTP 201` or `offset 17`.
    pub detail: String,
    /// Encoded payload size in bytes.
    pub bytes: usize,
}

impl Ack {
    pub fn new(detail: impl Into<String>, bytes: usize) -> Self {
        Self {
            detail: detail.into(),
            bytes,
        }
    }
}

/// A live connection to one target, owned by exactly one Device Runner.
///
/// Sends are issued sequentially; a session never sees two concurrent
/// `send` calls.
#[async_trait]
pub trait Session: Send {
    /// Deliver one JSON document.
    async fn send(&mut self, payload: &Value) -> Result<Ack, ConnectorError>;

    /// Close the connection. Never fails; errors are logged and swallowed.
    async fn disconnect(self: Box<Self>);
}

/// Builds sessions against one configured target.
#[async_trait]
pub trait Connector: Send + Sync {
    fn system_type(&self) -> TargetSystemType;

    /// Credential-free destination string for logs.
    fn describe(&self) -> String;

    /// Open a new session.
    async fn connect(&self) -> Result<Box<dyn Session>, ConnectorError>;

    /// Check that the target is reachable and accepts traffic.
    ///
    /// The default runs a full connect, send, disconnect cycle with
    /// `sample`. Protocols where sending test data would be persisted
    /// override this with a read-only check.
    async fn probe(&self, sample: &Value) -> Result<String, ConnectorError> {
        let started = Instant::now();
        let mut session = self.connect().await?;
        let result = session.send(sample).await;
        session.disconnect().await;
        let ack = result?;
        Ok(format!(
            "Sent test message to {} ({}, {}ms)",
            self.describe(),
            ack.detail,
            started.elapsed().as_millis()
        ))
    }
}

/// Creates connectors from typed settings.
///
/// The engine receives this as a trait object so tests can substitute
/// in-memory connectors.
pub trait ConnectorFactory: Send + Sync {
    /// `client_tag` identifies the sending device and is used where a
    /// protocol needs a unique client id (MQTT).
    fn create(
        &self,
        settings: &TargetSettings,
        client_tag: &str,
    ) -> Result<Box<dyn Connector>, ConnectorError>;
}

// ---------------------------------------------------------------------------
// Default factory
// ---------------------------------------------------------------------------

/// Factory producing the real network connectors.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultConnectorFactory;

impl ConnectorFactory for DefaultConnectorFactory {
    fn create(
        &self,
        settings: &TargetSettings,
        client_tag: &str,
    ) -> Result<Box<dyn Connector>, ConnectorError> {
        Ok(match settings {
            TargetSettings::Http(s) => Box::new(HttpConnector::new(s.clone())?),
            TargetSettings::Mqtt(s) => Box::new(MqttConnector::new(s.clone(), client_tag)),
            TargetSettings::Kafka(s) => Box::new(KafkaConnector::new(s.clone())?),
            TargetSettings::WebSocket(s) => Box::new(WebSocketConnector::new(s.clone())?),
            TargetSettings::Ftp(s) => Box::new(FtpConnector::new(s.clone(), client_tag)),
            TargetSettings::PubSub(s) => Box::new(PubSubConnector::new(s.clone())?),
        })
    }
}

/// Encode a payload as compact JSON bytes.
pub(crate) fn encode(payload: &Value) -> Result<Vec<u8>, ConnectorError> {
    serde_json::to_vec(payload).map_err(|e| ConnectorError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn factory_builds_every_type() {
        let factory = DefaultConnectorFactory;
        let configs = [
            (TargetSystemType::Http, json!({"url": "http://localhost:9/in"})),
            (TargetSystemType::Mqtt, json!({"host": "localhost", "topic": "t"})),
            (TargetSystemType::Kafka, json!({"bootstrap_servers": "localhost:9092", "topic": "t"})),
            (TargetSystemType::WebSocket, json!({"url": "ws://localhost:9/ws"})),
            (TargetSystemType::Ftp, json!({"host": "localhost"})),
            (TargetSystemType::PubSub, json!({"provider": "generic", "topic": "t", "endpoint": "http://localhost:9/p"})),
        ];
        for (ty, config) in configs {
            let settings = TargetSettings::from_config(ty, &config).unwrap();
            let connector = factory.create(&settings, "device-1").unwrap();
            assert_eq!(connector.system_type(), ty);
            assert!(!connector.describe().is_empty());
        }
    }

    #[test]
    fn encode_is_compact() {
        assert_eq!(encode(&json!({"a": 1, "b": "x"})).unwrap(), br#"{"a":1,"b":"x"}"#.to_vec());
    }
}
