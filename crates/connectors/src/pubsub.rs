//! Pub/Sub connector, parameterized by provider.
//!
//! Both providers publish over HTTPS using the Google Pub/Sub message
//! envelope: `{"messages": [{"data": <base64 JSON>, "attributes": {..}}]}`.
//! `gcp` targets `topics.publish` on the Google API; `generic` posts the
//! same envelope (plus the topic name) to a configured endpoint.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use iotsim_core::target_system::{PubSubProvider, PubSubSettings, TargetSystemType};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::connector::{encode, Ack, Connector, Session};
use crate::error::ConnectorError;
use crate::http::{build_client, probe_endpoint};

/// Google Pub/Sub REST base URL.
pub const GCP_PUBSUB_BASE_URL: &str = "https://pubsub.googleapis.com/v1";

pub struct PubSubConnector {
    settings: PubSubSettings,
    client: Client,
    headers: HeaderMap,
    publish_url: String,
}

impl PubSubConnector {
    pub fn new(settings: PubSubSettings) -> Result<Self, ConnectorError> {
        let publish_url = publish_url(&settings)?;
        let mut headers = HeaderMap::new();
        if let Some(token) = settings.access_token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ConnectorError::Config("Invalid access token".into()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        Ok(Self {
            client: build_client(settings.timeout)?,
            settings,
            headers,
            publish_url,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout.max(1))
    }

    /// Resource URL of the topic (GCP only).
    fn topic_url(&self) -> Option<String> {
        match self.settings.provider {
            PubSubProvider::Gcp => self
                .publish_url
                .strip_suffix(":publish")
                .map(String::from),
            PubSubProvider::Generic => None,
        }
    }
}

fn publish_url(settings: &PubSubSettings) -> Result<String, ConnectorError> {
    match settings.provider {
        PubSubProvider::Gcp => {
            let project = settings
                .project_id
                .as_deref()
                .filter(|p| !p.is_empty())
                .ok_or_else(|| ConnectorError::Config("GCP Pub/Sub requires project_id".into()))?;
            let base = settings
                .endpoint
                .as_deref()
                .filter(|e| !e.is_empty())
                .unwrap_or(GCP_PUBSUB_BASE_URL)
                .trim_end_matches('/');
            Ok(format!(
                "{base}/projects/{project}/topics/{}:publish",
                settings.topic
            ))
        }
        PubSubProvider::Generic => settings
            .endpoint
            .clone()
            .filter(|e| !e.is_empty())
            .ok_or_else(|| ConnectorError::Config("Generic Pub/Sub requires endpoint".into())),
    }
}

/// Build the publish request body for one payload.
fn envelope(provider: PubSubProvider, topic: &str, data: &[u8]) -> Value {
    let message = json!({
        "data": BASE64.encode(data),
        "attributes": {"content-type": "application/json"},
    });
    match provider {
        PubSubProvider::Gcp => json!({"messages": [message]}),
        PubSubProvider::Generic => json!({"topic": topic, "messages": [message]}),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[async_trait]
impl Connector for PubSubConnector {
    fn system_type(&self) -> TargetSystemType {
        TargetSystemType::PubSub
    }

    fn describe(&self) -> String {
        match self.settings.provider {
            PubSubProvider::Gcp => format!(
                "gcp pubsub projects/{}/topics/{}",
                self.settings.project_id.as_deref().unwrap_or("?"),
                self.settings.topic
            ),
            PubSubProvider::Generic => {
                format!("pubsub {} topic {}", self.publish_url, self.settings.topic)
            }
        }
    }

    async fn connect(&self) -> Result<Box<dyn Session>, ConnectorError> {
        Ok(Box::new(PubSubSession {
            client: self.client.clone(),
            headers: self.headers.clone(),
            url: self.publish_url.clone(),
            provider: self.settings.provider,
            topic: self.settings.topic.clone(),
            timeout: self.timeout(),
        }))
    }

    /// GCP: fetch the topic resource. Generic: HEAD/OPTIONS the endpoint.
    async fn probe(&self, _sample: &Value) -> Result<String, ConnectorError> {
        let Some(topic_url) = self.topic_url() else {
            return probe_endpoint(&self.client, &self.publish_url, &self.headers, self.timeout())
                .await;
        };
        let response = self
            .client
            .request(Method::GET, &topic_url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| ConnectorError::from_reqwest(e, self.timeout()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(format!("Topic reachable: {}", self.describe()));
        }
        let body = response.text().await.unwrap_or_default();
        Err(ConnectorError::from_status(status.as_u16(), &body))
    }
}

struct PubSubSession {
    client: Client,
    headers: HeaderMap,
    url: String,
    provider: PubSubProvider,
    topic: String,
    timeout: Duration,
}

#[async_trait]
impl Session for PubSubSession {
    async fn send(&mut self, payload: &Value) -> Result<Ack, ConnectorError> {
        let data = encode(payload)?;
        let body = envelope(self.provider, &self.topic, &data);

        let response = self
            .client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| ConnectorError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ConnectorError::from_status(status.as_u16(), &text));
        }

        // Generic endpoints may answer with an empty or non-JSON body.
        let text = response.text().await.unwrap_or_default();
        let detail = serde_json::from_str::<PublishResponse>(&text)
            .ok()
            .and_then(|r| r.message_ids.into_iter().next())
            .map(|id| format!("message id {id}"))
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
        Ok(Ack::new(detail, data.len()))
    }

    async fn disconnect(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::routing::post;
    use axum::Router;

    fn gcp(endpoint: Option<String>) -> PubSubSettings {
        PubSubSettings {
            provider: PubSubProvider::Gcp,
            topic: "telemetry".into(),
            project_id: Some("demo".into()),
            access_token: Some("tok".into()),
            endpoint,
            timeout: 2,
        }
    }

    #[test]
    fn gcp_publish_url() {
        let connector = PubSubConnector::new(gcp(None)).unwrap();
        assert_eq!(
            connector.publish_url,
            "https://pubsub.googleapis.com/v1/projects/demo/topics/telemetry:publish"
        );
        assert_eq!(
            connector.topic_url().as_deref(),
            Some("https://pubsub.googleapis.com/v1/projects/demo/topics/telemetry")
        );
    }

    #[test]
    fn generic_requires_endpoint() {
        let settings = PubSubSettings {
            provider: PubSubProvider::Generic,
            topic: "t".into(),
            project_id: None,
            access_token: None,
            endpoint: None,
            timeout: 2,
        };
        assert!(matches!(PubSubConnector::new(settings), Err(ConnectorError::Config(_))));
    }

    #[test]
    fn envelope_base64_encodes_data() {
        let body = envelope(PubSubProvider::Generic, "t", br#"{"a":1}"#);
        assert_eq!(body["topic"], "t");
        let data = body["messages"][0]["data"].as_str().unwrap();
        assert_eq!(BASE64.decode(data).unwrap(), br#"{"a":1}"#.to_vec());
    }

    #[tokio::test]
    async fn publishes_to_overridden_gcp_endpoint() {
        let seen: Arc<Mutex<Vec<(String, Value)>>> = Arc::default();
        let router = Router::new()
            .route(
                "/v1/projects/demo/topics/{topic}",
                post(
                    |State(seen): State<Arc<Mutex<Vec<(String, Value)>>>>,
                     headers: axum::http::HeaderMap,
                     axum::Json(body): axum::Json<Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        seen.lock().unwrap().push((auth, body));
                        axum::Json(json!({"messageIds": ["42"]}))
                    },
                ),
            )
            .with_state(Arc::clone(&seen));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let connector = PubSubConnector::new(gcp(Some(format!("http://{addr}/v1")))).unwrap();
        let mut session = connector.connect().await.unwrap();
        let ack = session.send(&json!({"t": 1})).await.unwrap();

        assert_eq!(ack.detail, "message id 42");
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "Bearer tok");
        let data = seen[0].1["messages"][0]["data"].as_str().unwrap();
        assert_eq!(BASE64.decode(data).unwrap(), br#"{"t":1}"#.to_vec());
    }
}
