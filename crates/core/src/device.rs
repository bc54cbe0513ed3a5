//! Device simulation readiness.
//!
//! A device is *simulation-ready* when it has a payload, a target system,
//! is enabled, and its send interval is inside the hard range. Readiness is
//! evaluated against plain values so the API and the engine share one rule.

use serde::Serialize;

use crate::error::CoreError;
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Smallest accepted send interval in seconds.
pub const MIN_SEND_INTERVAL: i64 = 1;

/// Largest accepted send interval in seconds.
pub const MAX_SEND_INTERVAL: i64 = 3600;

/// Lower bound of the recommended interval window. Below this only a warning is raised.
pub const RECOMMENDED_MIN_INTERVAL: i64 = 5;

/// Upper bound of the recommended interval window.
pub const RECOMMENDED_MAX_INTERVAL: i64 = 300;

/// Send interval applied when a device is created without one.
pub const DEFAULT_SEND_INTERVAL: i64 = 10;

/// Maximum length of a device name.
pub const MAX_DEVICE_NAME_LENGTH: usize = 200;

// ---------------------------------------------------------------------------
// Readiness
// ---------------------------------------------------------------------------

/// The configuration fields that decide whether a device may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceConfig {
    pub payload_id: Option<DbId>,
    pub target_system_id: Option<DbId>,
    pub send_interval: i64,
    pub is_enabled: bool,
}

/// Whether a device with this configuration can be started.
pub fn is_simulation_ready(config: &DeviceConfig) -> bool {
    config.payload_id.is_some()
        && config.target_system_id.is_some()
        && config.is_enabled
        && (MIN_SEND_INTERVAL..=MAX_SEND_INTERVAL).contains(&config.send_interval)
}

/// Validate that a send interval is inside the hard range.
pub fn validate_send_interval(seconds: i64) -> Result<(), CoreError> {
    if !(MIN_SEND_INTERVAL..=MAX_SEND_INTERVAL).contains(&seconds) {
        return Err(CoreError::Validation(format!(
            "send_interval must be between {MIN_SEND_INTERVAL} and {MAX_SEND_INTERVAL} seconds (got {seconds})"
        )));
    }
    Ok(())
}

/// Validate a device name: non-empty after trimming and within length limit.
pub fn validate_device_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::Validation(
            "Device name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_DEVICE_NAME_LENGTH {
        return Err(CoreError::Validation(format!(
            "Device name exceeds maximum length of {MAX_DEVICE_NAME_LENGTH} characters (got {})",
            name.len()
        )));
    }
    Ok(())
}

/// How serious a readiness issue is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// Blocks the device from starting.
    Critical,
    /// Reported to the user but does not block starting.
    Warning,
}

/// Overall badge shown for a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessStatus {
    Ready,
    Warning,
    Error,
}

/// One problem found while evaluating a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReadinessIssue {
    pub severity: IssueSeverity,
    pub code: &'static str,
    pub message: String,
}

/// Result of [`evaluate_readiness`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceReadiness {
    pub status: ReadinessStatus,
    pub is_simulation_ready: bool,
    pub issues: Vec<ReadinessIssue>,
}

impl DeviceReadiness {
    pub fn critical_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Critical)
            .count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues.len() - self.critical_count()
    }
}

/// Evaluate a device and split its problems into critical issues and warnings.
///
/// `has_metadata` is false when the device carries no metadata keys; a
/// template payload then has nothing to substitute, which is worth a warning.
pub fn evaluate_readiness(config: &DeviceConfig, has_metadata: bool) -> DeviceReadiness {
    let mut issues = Vec::new();

    if config.payload_id.is_none() {
        issues.push(ReadinessIssue {
            severity: IssueSeverity::Critical,
            code: "missing_payload",
            message: "No payload assigned".to_string(),
        });
    }
    if config.target_system_id.is_none() {
        issues.push(ReadinessIssue {
            severity: IssueSeverity::Critical,
            code: "missing_target_system",
            message: "No target system assigned".to_string(),
        });
    }
    if !config.is_enabled {
        issues.push(ReadinessIssue {
            severity: IssueSeverity::Critical,
            code: "disabled",
            message: "Device is disabled".to_string(),
        });
    }

    let interval = config.send_interval;
    if !(MIN_SEND_INTERVAL..=MAX_SEND_INTERVAL).contains(&interval) {
        issues.push(ReadinessIssue {
            severity: IssueSeverity::Critical,
            code: "invalid_interval",
            message: format!(
                "Send interval {interval}s is outside {MIN_SEND_INTERVAL}..={MAX_SEND_INTERVAL}s"
            ),
        });
    } else if !(RECOMMENDED_MIN_INTERVAL..=RECOMMENDED_MAX_INTERVAL).contains(&interval) {
        issues.push(ReadinessIssue {
            severity: IssueSeverity::Warning,
            code: "interval_out_of_recommended_range",
            message: format!(
                "Send interval {interval}s is outside the recommended {RECOMMENDED_MIN_INTERVAL}-{RECOMMENDED_MAX_INTERVAL}s range"
            ),
        });
    }

    if !has_metadata {
        issues.push(ReadinessIssue {
            severity: IssueSeverity::Warning,
            code: "empty_metadata",
            message: "Device has no metadata for payload templates".to_string(),
        });
    }

    let ready = is_simulation_ready(config);
    let status = if !ready {
        ReadinessStatus::Error
    } else if issues.is_empty() {
        ReadinessStatus::Ready
    } else {
        ReadinessStatus::Warning
    };

    DeviceReadiness {
        status,
        is_simulation_ready: ready,
        issues,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
