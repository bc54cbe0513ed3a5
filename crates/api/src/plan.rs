//! Resolve database rows into engine inputs.
//!
//! The engine never reads the database. Before a start, every device of the
//! project is joined with its payload and target system here; rows that
//! cannot be parsed are kept with a `resolution_error` so they show up as
//! skipped rather than failing the whole start.

use std::collections::HashMap;

use iotsim_core::payload::PayloadDefinition;
use iotsim_core::target_system::TargetSettings;
use iotsim_core::types::DbId;
use iotsim_db::models::device::Device;
use iotsim_db::models::project::Project;
use iotsim_db::repositories::{DeviceRepo, PayloadRepo, TargetSystemRepo};
use iotsim_db::DbPool;
use iotsim_engine::{DeviceSpec, SimulationPlan};

/// Caches payload and target lookups across the devices of one plan.
#[derive(Default)]
pub struct PlanResolver {
    payloads: HashMap<DbId, Result<PayloadDefinition, String>>,
    targets: HashMap<DbId, Result<TargetSettings, String>>,
}

impl PlanResolver {
    /// Resolve one device's references.
    pub async fn resolve(&mut self, pool: &DbPool, device: &Device) -> Result<DeviceSpec, sqlx::Error> {
        let mut errors = Vec::new();

        let payload = match device.payload_id {
            Some(id) => match self.payload(pool, id).await? {
                Ok(definition) => Some(definition),
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
            None => None,
        };

        let target = match device.target_system_id {
            Some(id) => match self.target(pool, id).await? {
                Ok(settings) => Some(settings),
                Err(e) => {
                    errors.push(e);
                    None
                }
            },
            None => None,
        };

        Ok(DeviceSpec {
            device_id: device.id,
            name: device.name.clone(),
            config: device.config(),
            metadata: device.metadata.0.as_object().cloned().unwrap_or_default(),
            payload,
            target,
            resolution_error: (!errors.is_empty()).then(|| errors.join("; ")),
        })
    }

    async fn payload(
        &mut self,
        pool: &DbPool,
        id: DbId,
    ) -> Result<Result<PayloadDefinition, String>, sqlx::Error> {
        if let Some(cached) = self.payloads.get(&id) {
            return Ok(cached.clone());
        }
        let resolved = match PayloadRepo::find_by_id(pool, id).await? {
            Some(payload) => payload
                .definition()
                .map_err(|e| format!("payload '{}' is invalid: {e}", payload.name)),
            None => Err(format!("payload {id} not found")),
        };
        self.payloads.insert(id, resolved.clone());
        Ok(resolved)
    }

    async fn target(
        &mut self,
        pool: &DbPool,
        id: DbId,
    ) -> Result<Result<TargetSettings, String>, sqlx::Error> {
        if let Some(cached) = self.targets.get(&id) {
            return Ok(cached.clone());
        }
        let resolved = match TargetSystemRepo::find_by_id(pool, id).await? {
            Some(target) => target
                .settings()
                .map_err(|e| format!("target system '{}' is invalid: {e}", target.name)),
            None => Err(format!("target system {id} not found")),
        };
        self.targets.insert(id, resolved.clone());
        Ok(resolved)
    }
}

/// Build the start plan for a project from its current devices.
pub async fn load_plan(pool: &DbPool, project: &Project) -> Result<SimulationPlan, sqlx::Error> {
    let devices = DeviceRepo::list_by_project(pool, project.id).await?;
    let mut resolver = PlanResolver::default();
    let mut specs = Vec::with_capacity(devices.len());
    for device in &devices {
        specs.push(resolver.resolve(pool, device).await?);
    }
    Ok(SimulationPlan {
        project_id: project.id,
        project_name: project.name.clone(),
        devices: specs,
    })
}
