//! Exponential-backoff retry for sends and reconnection for lost sessions.
//!
//! [`send_with_retry`] retries retryable failures on the same session.
//! When a session reports [`ConnectorError::ConnectionLost`], the runner
//! calls [`reconnect_loop`] to obtain a fresh one.

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::connector::{Ack, Connector, Session};
use crate::error::ConnectorError;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`BackoffConfig::max_delay`].
pub fn next_delay(current: Duration, config: &BackoffConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Retry policy for a single send.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub max_retries: u32,
    pub backoff: BackoffConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Send `payload`, retrying retryable failures with backoff.
///
/// Non-retryable errors and `ConnectionLost` are returned immediately.
/// Cancellation stops further retries but never interrupts an attempt
/// already in flight.
pub async fn send_with_retry(
    session: &mut dyn Session,
    payload: &Value,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Ack, ConnectorError> {
    let mut delay = policy.backoff.initial_delay;
    let mut attempt = 0u32;

    loop {
        let err = match session.send(payload).await {
            Ok(ack) => return Ok(ack),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => e,
            Err(e) => return Err(e),
        };
        attempt += 1;
        tracing::debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Retrying send",
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(err),
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, &policy.backoff);
    }
}

/// Reconnect with exponential backoff.
///
/// Returns `Some(session)` once a connection succeeds, or `None` if the
/// `cancel` token fires, `max_attempts` are exhausted, or the connector
/// reports a non-retryable failure such as rejected credentials.
pub async fn reconnect_loop(
    connector: &dyn Connector,
    config: &BackoffConfig,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> Option<Box<dyn Session>> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tracing::info!(
            target_system = %connector.describe(),
            attempt,
            "Reconnecting to target",
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!(target_system = %connector.describe(), "Reconnect cancelled");
                return None;
            }
            result = connector.connect() => {
                match result {
                    Ok(session) => {
                        tracing::info!(
                            target_system = %connector.describe(),
                            attempt,
                            "Reconnected to target",
                        );
                        return Some(session);
                    }
                    Err(e) if e.is_retryable() || e.needs_reconnect() => {
                        tracing::warn!(
                            target_system = %connector.describe(),
                            error = %e,
                            "Reconnect attempt {attempt} failed",
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            target_system = %connector.describe(),
                            error = %e,
                            "Reconnect aborted",
                        );
                        return None;
                    }
                }
            }
        }

        if attempt >= max_attempts {
            return None;
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, config);
    }
}
