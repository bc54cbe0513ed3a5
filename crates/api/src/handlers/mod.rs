//! Request handlers.
//!
//! Each submodule provides async handler functions for a single resource.
//! Handlers delegate to the repositories in `iotsim_db` and to the
//! [`SimulationRegistry`](iotsim_engine::SimulationRegistry), and map errors
//! via [`AppError`](crate::error::AppError).

pub mod device;
pub mod payload;
pub mod project;
pub mod simulation;
pub mod target_system;

use iotsim_core::error::CoreError;

/// Reject blank names, returning the trimmed value.
pub(crate) fn require_name(name: &str) -> Result<String, CoreError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation("Name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}
