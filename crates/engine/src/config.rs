use std::time::Duration;

use iotsim_connectors::retry::{BackoffConfig, RetryPolicy};

/// Tunables for the simulation engine, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// A runner crashes once its consecutive failures exceed this value.
    pub max_consecutive_errors: u32,
    /// Upper bound for a runner to reach `running` or `crashed`.
    pub start_timeout: Duration,
    /// Upper bound for one send including retries.
    pub send_timeout: Duration,
    /// Upper bound for a runner to exit after stop is requested.
    pub drain_timeout: Duration,
    /// Upper bound for stopping every project at once.
    pub emergency_stop_timeout: Duration,
    /// Retries for a retryable send failure.
    pub max_send_retries: u32,
    /// Recent errors kept per project.
    pub error_history: usize,
    /// Log entries kept per project for replay.
    pub log_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 10,
            start_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(15),
            drain_timeout: Duration::from_secs(5),
            emergency_stop_timeout: Duration::from_secs(15),
            max_send_retries: 2,
            error_history: 50,
            log_history: 500,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default |
    /// |-----------------------------------|---------|
    /// | `SIM_MAX_CONSECUTIVE_ERRORS`      | `10`    |
    /// | `SIM_START_TIMEOUT_SECS`          | `10`    |
    /// | `SIM_SEND_TIMEOUT_SECS`           | `15`    |
    /// | `SIM_DRAIN_TIMEOUT_SECS`          | `5`     |
    /// | `SIM_EMERGENCY_STOP_TIMEOUT_SECS` | `15`    |
    /// | `SIM_MAX_SEND_RETRIES`            | `2`     |
    /// | `SIM_ERROR_HISTORY`               | `50`    |
    /// | `SIM_LOG_HISTORY`                 | `500`   |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_consecutive_errors: env_or("SIM_MAX_CONSECUTIVE_ERRORS", defaults.max_consecutive_errors),
            start_timeout: secs_or("SIM_START_TIMEOUT_SECS", defaults.start_timeout),
            send_timeout: secs_or("SIM_SEND_TIMEOUT_SECS", defaults.send_timeout),
            drain_timeout: secs_or("SIM_DRAIN_TIMEOUT_SECS", defaults.drain_timeout),
            emergency_stop_timeout: secs_or(
                "SIM_EMERGENCY_STOP_TIMEOUT_SECS",
                defaults.emergency_stop_timeout,
            ),
            max_send_retries: env_or("SIM_MAX_SEND_RETRIES", defaults.max_send_retries),
            error_history: env_or("SIM_ERROR_HISTORY", defaults.error_history),
            log_history: env_or("SIM_LOG_HISTORY", defaults.log_history),
        }
    }

    /// Per-send retry policy derived from this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_send_retries,
            backoff: BackoffConfig::default(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}

fn secs_or(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}
