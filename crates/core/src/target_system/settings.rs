//! Strongly typed per-protocol settings.
//!
//! Built from a raw config map only after [`super::schema::normalize_config`]
//! has accepted it, so every default is already present.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::schema::normalize_config;
use super::TargetSystemType;
use crate::error::CoreError;

/// Settings for one target system, one variant per wire protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TargetSettings {
    Http(HttpSettings),
    Mqtt(MqttSettings),
    Kafka(KafkaSettings),
    #[serde(rename = "websocket")]
    WebSocket(WebSocketSettings),
    Ftp(FtpSettings),
    #[serde(rename = "pubsub")]
    PubSub(PubSubSettings),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Put,
    Patch,
    Get,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Get => "GET",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpSettings {
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub timeout: u64,
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub topic: String,
    pub qos: u8,
    pub retain: bool,
    pub use_tls: bool,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    pub keep_alive: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KafkaSettings {
    pub bootstrap_servers: String,
    pub topic: String,
    pub partition: i32,
    #[serde(default)]
    pub key_field: Option<String>,
    pub timeout: u64,
}

impl KafkaSettings {
    /// Broker addresses split from the comma-separated setting.
    pub fn brokers(&self) -> Vec<String> {
        self.bootstrap_servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebSocketSettings {
    pub url: String,
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtpSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    pub directory: String,
    pub file_prefix: String,
    pub timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PubSubProvider {
    /// Google Cloud Pub/Sub REST `topics.publish`.
    Gcp,
    /// Any HTTP endpoint accepting the same message envelope.
    Generic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PubSubSettings {
    pub provider: PubSubProvider,
    pub topic: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub timeout: u64,
}

impl TargetSettings {
    /// Validate `config` against the type's schema and convert it.
    pub fn from_config(system_type: TargetSystemType, config: &Value) -> Result<Self, CoreError> {
        let normalized = Value::Object(
            normalize_config(system_type, config).map_err(CoreError::InvalidFields)?,
        );
        let invalid = |e: serde_json::Error| {
            CoreError::Validation(format!("Invalid {system_type} configuration: {e}"))
        };

        Ok(match system_type {
            TargetSystemType::Http => Self::Http(serde_json::from_value(normalized).map_err(invalid)?),
            TargetSystemType::Mqtt => Self::Mqtt(serde_json::from_value(normalized).map_err(invalid)?),
            TargetSystemType::Kafka => Self::Kafka(serde_json::from_value(normalized).map_err(invalid)?),
            TargetSystemType::WebSocket => {
                Self::WebSocket(serde_json::from_value(normalized).map_err(invalid)?)
            }
            TargetSystemType::Ftp => Self::Ftp(serde_json::from_value(normalized).map_err(invalid)?),
            TargetSystemType::PubSub => {
                Self::PubSub(serde_json::from_value(normalized).map_err(invalid)?)
            }
        })
    }

    pub fn system_type(&self) -> TargetSystemType {
        match self {
            Self::Http(_) => TargetSystemType::Http,
            Self::Mqtt(_) => TargetSystemType::Mqtt,
            Self::Kafka(_) => TargetSystemType::Kafka,
            Self::WebSocket(_) => TargetSystemType::WebSocket,
            Self::Ftp(_) => TargetSystemType::Ftp,
            Self::PubSub(_) => TargetSystemType::PubSub,
        }
    }

    /// Per-operation timeout configured for the target.
    pub fn timeout(&self) -> Duration {
        let secs = match self {
            Self::Http(s) => s.timeout,
            Self::Mqtt(_) => 30,
            Self::Kafka(s) => s.timeout,
            Self::WebSocket(s) => s.timeout,
            Self::Ftp(s) => s.timeout,
            Self::PubSub(s) => s.timeout,
        };
        Duration::from_secs(secs.max(1))
    }

    /// Human-readable destination, free of credentials.
    pub fn describe(&self) -> String {
        match self {
            Self::Http(s) => format!("{} {}", s.method.as_str(), s.url),
            Self::Mqtt(s) => {
                let scheme = if s.use_tls { "mqtts" } else { "mqtt" };
                format!("{scheme}://{}:{}/{} (qos {})", s.host, s.port, s.topic, s.qos)
            }
            Self::Kafka(s) => format!("kafka://{}/{}[{}]", s.bootstrap_servers, s.topic, s.partition),
            Self::WebSocket(s) => s.url.clone(),
            Self::Ftp(s) => format!("ftp://{}:{}{}", s.host, s.port, s.directory),
            Self::PubSub(s) => match s.provider {
                PubSubProvider::Gcp => format!(
                    "gcp pubsub projects/{}/topics/{}",
                    s.project_id.as_deref().unwrap_or("?"),
                    s.topic
                ),
                PubSubProvider::Generic => format!(
                    "pubsub {} topic {}",
                    s.endpoint.as_deref().unwrap_or("?"),
                    s.topic
                ),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn http_settings_with_defaults() {
        let s = TargetSettings::from_config(TargetSystemType::Http, &json!({"url": "http://localhost:9000/in"}))
            .unwrap();
        let TargetSettings::Http(http) = &s else {
            panic!("expected http settings");
        };
        assert_eq!(http.method, HttpMethod::Post);
        assert_eq!(http.timeout, 30);
        assert!(http.headers.is_empty());
        assert_eq!(s.describe(), "POST http://localhost:9000/in");
    }

    #[test]
    fn mqtt_settings_typed() {
        let s = TargetSettings::from_config(
            TargetSystemType::Mqtt,
            &json!({"host": "broker", "topic": "devices/t", "qos": 1, "use_tls": true, "port": 8883}),
        )
        .unwrap();
        assert_matches!(&s, TargetSettings::Mqtt(m) if m.qos == 1 && m.use_tls && m.port == 8883);
        assert_eq!(s.system_type(), TargetSystemType::Mqtt);
        assert!(s.describe().starts_with("mqtts://broker:8883"));
    }

    #[test]
    fn kafka_brokers_split() {
        let s = TargetSettings::from_config(
            TargetSystemType::Kafka,
            &json!({"bootstrap_servers": "k1:9092, k2:9093", "topic": "telemetry"}),
        )
        .unwrap();
        let TargetSettings::Kafka(k) = s else {
            panic!("expected kafka settings");
        };
        assert_eq!(k.brokers(), vec!["k1:9092", "k2:9093"]);
        assert_eq!(k.partition, 0);
    }

    #[test]
    fn ftp_defaults() {
        let s = TargetSettings::from_config(TargetSystemType::Ftp, &json!({"host": "files"})).unwrap();
        assert_matches!(s, TargetSettings::Ftp(f) if f.username == "anonymous" && f.port == 21 && f.directory == "/");
    }

    #[test]
    fn invalid_config_surfaces_field_errors() {
        let err = TargetSettings::from_config(TargetSystemType::WebSocket, &json!({"timeout": 0})).unwrap_err();
        assert_matches!(err, CoreError::InvalidFields(ref fields) if fields.len() == 2);
    }

    #[test]
    fn pubsub_gcp_describe() {
        let s = TargetSettings::from_config(
            TargetSystemType::PubSub,
            &json!({"provider": "gcp", "topic": "telemetry", "project_id": "demo"}),
        )
        .unwrap();
        assert_eq!(s.describe(), "gcp pubsub projects/demo/topics/telemetry");
    }
}
