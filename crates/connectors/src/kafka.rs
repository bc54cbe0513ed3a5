//! Kafka connector built on `rskafka`.
//!
//! A session holds a partition client for the configured topic and
//! partition. Each payload is produced as a single uncompressed record.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use iotsim_core::target_system::{KafkaSettings, TargetSystemType};
use rskafka::client::error::Error as KafkaError;
use rskafka::client::partition::{Compression, PartitionClient, UnknownTopicHandling};
use rskafka::client::{Client, ClientBuilder};
use rskafka::record::Record;
use serde_json::Value;

use crate::connector::{encode, Ack, Connector, Session};
use crate::error::ConnectorError;

pub struct KafkaConnector {
    settings: KafkaSettings,
    brokers: Vec<String>,
}

impl KafkaConnector {
    pub fn new(settings: KafkaSettings) -> Result<Self, ConnectorError> {
        let brokers = settings.brokers();
        if brokers.is_empty() {
            return Err(ConnectorError::Config("No bootstrap servers configured".into()));
        }
        Ok(Self { settings, brokers })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout.max(1))
    }

    async fn client(&self) -> Result<Client, ConnectorError> {
        let timeout = self.timeout();
        tokio::time::timeout(timeout, ClientBuilder::new(self.brokers.clone()).build())
            .await
            .map_err(|_| ConnectorError::timeout(timeout))?
            .map_err(classify)
    }
}

fn classify(err: KafkaError) -> ConnectorError {
    match err {
        KafkaError::Connection(e) => ConnectorError::ConnectionLost(e.to_string()),
        e @ KafkaError::ServerError { .. } => ConnectorError::Protocol(e.to_string()),
        other => ConnectorError::TransientNetwork(other.to_string()),
    }
}

/// Record key taken from a top-level payload field, if configured.
fn record_key(payload: &Value, key_field: Option<&str>) -> Option<Vec<u8>> {
    let value = payload.get(key_field?)?;
    Some(match value {
        Value::String(s) => s.as_bytes().to_vec(),
        Value::Null => return None,
        other => other.to_string().into_bytes(),
    })
}

#[async_trait]
impl Connector for KafkaConnector {
    fn system_type(&self) -> TargetSystemType {
        TargetSystemType::Kafka
    }

    fn describe(&self) -> String {
        format!(
            "kafka://{}/{}[{}]",
            self.brokers.join(","),
            self.settings.topic,
            self.settings.partition
        )
    }

    async fn connect(&self) -> Result<Box<dyn Session>, ConnectorError> {
        let client = self.client().await?;
        let timeout = self.timeout();
        let partition = tokio::time::timeout(
            timeout,
            client.partition_client(
                self.settings.topic.clone(),
                self.settings.partition,
                UnknownTopicHandling::Retry,
            ),
        )
        .await
        .map_err(|_| ConnectorError::timeout(timeout))?
        .map_err(classify)?;

        Ok(Box::new(KafkaSession {
            partition,
            key_field: self.settings.key_field.clone(),
            timeout,
        }))
    }

    /// Metadata lookup only, so probing never writes to the topic.
    async fn probe(&self, _sample: &Value) -> Result<String, ConnectorError> {
        let client = self.client().await?;
        let timeout = self.timeout();
        let topics = tokio::time::timeout(timeout, client.list_topics())
            .await
            .map_err(|_| ConnectorError::timeout(timeout))?
            .map_err(classify)?;

        match topics.iter().find(|t| t.name == self.settings.topic) {
            Some(topic) => Ok(format!(
                "Connected to {}; topic '{}' has {} partition(s)",
                self.brokers.join(","),
                topic.name,
                topic.partitions.len()
            )),
            None => Err(ConnectorError::Protocol(format!(
                "Topic '{}' does not exist",
                self.settings.topic
            ))),
        }
    }
}

struct KafkaSession {
    partition: PartitionClient,
    key_field: Option<String>,
    timeout: Duration,
}

#[async_trait]
impl Session for KafkaSession {
    async fn send(&mut self, payload: &Value) -> Result<Ack, ConnectorError> {
        let value = encode(payload)?;
        let bytes = value.len();
        let record = Record {
            key: record_key(payload, self.key_field.as_deref()),
            value: Some(value),
            headers: BTreeMap::from([(
                "content-type".to_string(),
                b"application/json".to_vec(),
            )]),
            timestamp: chrono::Utc::now(),
        };

        let offsets = tokio::time::timeout(
            self.timeout,
            self.partition.produce(vec![record], Compression::NoCompression),
        )
        .await
        .map_err(|_| ConnectorError::timeout(self.timeout))?
        .map_err(classify)?;

        let detail = offsets
            .first()
            .map(|o| format!("offset {o}"))
            .unwrap_or_else(|| "produced".into());
        Ok(Ack::new(detail, bytes))
    }

    async fn disconnect(self: Box<Self>) {}
}
