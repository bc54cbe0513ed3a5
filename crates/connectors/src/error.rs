//! Send failure taxonomy shared by all connectors.

use std::time::Duration;

/// Why a connect or send failed.
///
/// Retry policy keys off [`is_retryable`](Self::is_retryable) and
/// [`needs_reconnect`](Self::needs_reconnect); the remaining variants are
/// surfaced to the caller immediately.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    /// Network hiccup or temporary server condition. Retryable.
    #[error("Transient network error: {0}")]
    TransientNetwork(String),

    /// Credentials were rejected. Never retried.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The peer answered with something malformed or unexpected. Never retried.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The operation did not finish in time. Retryable up to the cap.
    #[error("Timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The session is no longer usable and must be re-established.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// The settings cannot be used to build a client.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The payload could not be encoded for the wire.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl ConnectorError {
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout {
            after_ms: after.as_millis() as u64,
        }
    }

    /// Whether the same send may be attempted again on the same session.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientNetwork(_) | Self::Timeout { .. })
    }

    /// Whether the session must be replaced before the next send.
    pub fn needs_reconnect(&self) -> bool {
        matches!(self, Self::ConnectionLost(_))
    }

    /// Stable snake_case identifier exposed to API clients.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TransientNetwork(_) => "transient_network_error",
            Self::Auth(_) => "auth_error",
            Self::Protocol(_) => "protocol_error",
            Self::Timeout { .. } => "timeout",
            Self::ConnectionLost(_) => "connection_lost",
            Self::Config(_) => "config_error",
            Self::Serialization(_) => "serialization_error",
        }
    }

    /// Classify a [`reqwest::Error`] raised before a response arrived.
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::timeout(timeout)
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            Self::TransientNetwork(err.to_string())
        } else if err.is_decode() {
            Self::Protocol(err.to_string())
        } else {
            Self::TransientNetwork(err.to_string())
        }
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = if body.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {}", truncate(body, 200))
        };
        match status {
            401 | 403 => Self::Auth(detail),
            408 | 425 | 429 | 500..=599 => Self::TransientNetwork(detail),
            _ => Self::Protocol(detail),
        }
    }

    /// Classify an I/O error on an established stream.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => Self::TransientNetwork(err.to_string()),
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof
            | ErrorKind::NotConnected => Self::ConnectionLost(err.to_string()),
            _ => Self::TransientNetwork(err.to_string()),
        }
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
