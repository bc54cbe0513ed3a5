//! HTTP connector: one request per payload using the configured method.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use iotsim_core::target_system::{HttpMethod, HttpSettings, TargetSystemType};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

use crate::connector::{encode, Ack, Connector, Session};
use crate::error::ConnectorError;

/// Sends each payload as a JSON request body.
///
/// HTTP is connectionless from the runner's point of view: `connect`
/// only builds the client, and connection pooling is left to `reqwest`.
pub struct HttpConnector {
    settings: HttpSettings,
    client: Client,
    headers: HeaderMap,
}

impl HttpConnector {
    pub fn new(settings: HttpSettings) -> Result<Self, ConnectorError> {
        let headers = build_headers(&settings)?;
        let client = build_client(settings.timeout)?;
        Ok(Self {
            settings,
            client,
            headers,
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout.max(1))
    }
}

pub(crate) fn build_client(timeout_secs: u64) -> Result<Client, ConnectorError> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .connect_timeout(Duration::from_secs(timeout_secs.clamp(1, 10)))
        .build()
        .map_err(|e| ConnectorError::Config(e.to_string()))
}

fn build_headers(settings: &HttpSettings) -> Result<HeaderMap, ConnectorError> {
    let mut headers = HeaderMap::new();
    for (name, value) in &settings.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ConnectorError::Config(format!("Invalid header name: {name}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ConnectorError::Config(format!("Invalid value for header {name}")))?;
        headers.insert(name, value);
    }
    if let Some(token) = settings.auth_token.as_deref().filter(|t| !t.is_empty()) {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| ConnectorError::Config("Invalid auth token".into()))?;
        value.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, value);
    }
    Ok(headers)
}

fn method(m: HttpMethod) -> Method {
    match m {
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Get => Method::GET,
    }
}

#[async_trait]
impl Connector for HttpConnector {
    fn system_type(&self) -> TargetSystemType {
        TargetSystemType::Http
    }

    fn describe(&self) -> String {
        format!("{} {}", self.settings.method.as_str(), self.settings.url)
    }

    async fn connect(&self) -> Result<Box<dyn Session>, ConnectorError> {
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            url: self.settings.url.clone(),
            method: self.settings.method,
            headers: self.headers.clone(),
            timeout: self.timeout(),
        }))
    }

    /// HEAD, falling back to OPTIONS, so probing never submits data.
    async fn probe(&self, _sample: &Value) -> Result<String, ConnectorError> {
        probe_endpoint(&self.client, &self.settings.url, &self.headers, self.timeout()).await
    }
}

/// Reachability check for an HTTP endpoint without sending a body.
///
/// Any answer below 500 other than 401/403/404 counts as reachable;
/// servers commonly reject HEAD on ingest routes with 405.
pub(crate) async fn probe_endpoint(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    timeout: Duration,
) -> Result<String, ConnectorError> {
    let started = Instant::now();
    let mut status = head_or_options(client, Method::HEAD, url, headers, timeout).await?;
    if status == StatusCode::METHOD_NOT_ALLOWED || status == StatusCode::NOT_IMPLEMENTED {
        status = head_or_options(client, Method::OPTIONS, url, headers, timeout).await?;
    }

    let code = status.as_u16();
    match code {
        401 | 403 => Err(ConnectorError::Auth(format!("HTTP {code}"))),
        404 => Err(ConnectorError::Protocol(format!("Endpoint not found (HTTP {code})"))),
        500..=599 => Err(ConnectorError::from_status(code, "")),
        _ => Ok(format!(
            "Endpoint reachable: HTTP {code} in {}ms",
            started.elapsed().as_millis()
        )),
    }
}

async fn head_or_options(
    client: &Client,
    method: Method,
    url: &str,
    headers: &HeaderMap,
    timeout: Duration,
) -> Result<StatusCode, ConnectorError> {
    client
        .request(method, url)
        .headers(headers.clone())
        .send()
        .await
        .map(|r| r.status())
        .map_err(|e| ConnectorError::from_reqwest(e, timeout))
}

struct HttpSession {
    client: Client,
    url: String,
    method: HttpMethod,
    headers: HeaderMap,
    timeout: Duration,
}

#[async_trait]
impl Session for HttpSession {
    async fn send(&mut self, payload: &Value) -> Result<Ack, ConnectorError> {
        let body = encode(payload)?;
        let bytes = body.len();

        let request = self
            .client
            .request(method(self.method), &self.url)
            .headers(self.headers.clone());
        let request = if self.method == HttpMethod::Get {
            // GET carries the document as a `payload` query parameter.
            let text = String::from_utf8_lossy(&body).into_owned();
            request.query(&[("payload", text)])
        } else {
            request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
        };

        let response = request
            .send()
            .await
            .map_err(|e| ConnectorError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if status.is_success() {
            return Ok(Ack::new(format!("HTTP {}", status.as_u16()), bytes));
        }
        let body = response.text().await.unwrap_or_default();
        Err(ConnectorError::from_status(status.as_u16(), &body))
    }

    async fn disconnect(self: Box<Self>) {}
}
