//! Target system types and their configuration.
//!
//! Each type publishes a JSON-Schema-like description of its config map
//! ([`schema`]). Raw maps are checked against it and then converted into a
//! strongly typed [`settings::TargetSettings`] before any connector sees them.

pub mod schema;
pub mod settings;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub use settings::{
    FtpSettings, HttpMethod, HttpSettings, KafkaSettings, MqttSettings, PubSubProvider,
    PubSubSettings, TargetSettings, WebSocketSettings,
};

// ---------------------------------------------------------------------------
// Type enum
// ---------------------------------------------------------------------------

pub const TYPE_HTTP: &str = "http";
pub const TYPE_MQTT: &str = "mqtt";
pub const TYPE_KAFKA: &str = "kafka";
pub const TYPE_WEBSOCKET: &str = "websocket";
pub const TYPE_FTP: &str = "ftp";
pub const TYPE_PUBSUB: &str = "pubsub";

/// All valid target system type strings.
pub const VALID_TARGET_TYPES: &[&str] = &[
    TYPE_HTTP,
    TYPE_MQTT,
    TYPE_KAFKA,
    TYPE_WEBSOCKET,
    TYPE_FTP,
    TYPE_PUBSUB,
];

/// Wire protocol of a target system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetSystemType {
    Http,
    Mqtt,
    Kafka,
    #[serde(rename = "websocket")]
    WebSocket,
    Ftp,
    #[serde(rename = "pubsub")]
    PubSub,
}

impl TargetSystemType {
    pub const ALL: [Self; 6] = [
        Self::Http,
        Self::Mqtt,
        Self::Kafka,
        Self::WebSocket,
        Self::Ftp,
        Self::PubSub,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => TYPE_HTTP,
            Self::Mqtt => TYPE_MQTT,
            Self::Kafka => TYPE_KAFKA,
            Self::WebSocket => TYPE_WEBSOCKET,
            Self::Ftp => TYPE_FTP,
            Self::PubSub => TYPE_PUBSUB,
        }
    }

    pub fn from_str_value(s: &str) -> Result<Self, CoreError> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Invalid target system type '{s}'. Must be one of: {}",
                    VALID_TARGET_TYPES.join(", ")
                ))
            })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Http => "HTTP / REST",
            Self::Mqtt => "MQTT",
            Self::Kafka => "Apache Kafka",
            Self::WebSocket => "WebSocket",
            Self::Ftp => "FTP",
            Self::PubSub => "Pub/Sub",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Http => "Send each payload as an HTTP request body",
            Self::Mqtt => "Publish each payload to an MQTT topic",
            Self::Kafka => "Produce each payload as a record on a Kafka topic",
            Self::WebSocket => "Send each payload as a text frame on a persistent socket",
            Self::Ftp => "Upload each payload as a timestamped JSON file",
            Self::PubSub => "Publish each payload to a cloud Pub/Sub topic",
        }
    }
}

impl std::fmt::Display for TargetSystemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Entry in the `GET /target-systems/types` listing.
#[derive(Debug, Clone, Serialize)]
pub struct TargetTypeInfo {
    #[serde(rename = "type")]
    pub system_type: TargetSystemType,
    pub label: &'static str,
    pub description: &'static str,
}

/// Describe every supported target system type.
pub fn list_types() -> Vec<TargetTypeInfo> {
    TargetSystemType::ALL
        .into_iter()
        .map(|t| TargetTypeInfo {
            system_type: t,
            label: t.label(),
            description: t.description(),
        })
        .collect()
}
