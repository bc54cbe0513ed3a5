//! Shared query parameter types for API handlers.

use iotsim_core::types::DbId;
use serde::Deserialize;

/// `GET /devices?project_id=`
#[derive(Debug, Deserialize)]
pub struct DeviceListParams {
    pub project_id: Option<DbId>,
}

/// `GET /simulation/logs?project_id=&limit=`
#[derive(Debug, Deserialize)]
pub struct LogsParams {
    pub project_id: Option<DbId>,
    pub limit: Option<usize>,
}

/// Output format for `GET /projects/{id}/export`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Html,
}

#[derive(Debug, Deserialize)]
pub struct ExportParams {
    #[serde(default)]
    pub format: ExportFormat,
}
