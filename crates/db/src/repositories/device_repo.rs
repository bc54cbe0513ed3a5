//! Repository for the `devices` table.

use iotsim_core::types::DbId;
use serde_json::{json, Value};
use sqlx::types::Json;
use sqlx::SqlitePool;

use crate::models::device::{CreateDevice, Device, UpdateDevice};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, project_id, name, description, device_type, send_interval, \
    payload_id, target_system_id, is_enabled, metadata, created_at, updated_at";

/// Provides CRUD operations for devices.
pub struct DeviceRepo;

impl DeviceRepo {
    /// Insert a new device, returning the created row.
    ///
    /// Omitted fields default to type `sensor`, a 10 second interval,
    /// enabled, and empty metadata.
    pub async fn create(pool: &SqlitePool, input: &CreateDevice) -> Result<Device, sqlx::Error> {
        let query = format!(
            "INSERT INTO devices (project_id, name, description, device_type, send_interval,
                                  payload_id, target_system_id, is_enabled, metadata,
                                  created_at, updated_at)
             VALUES (?1, ?2, ?3, COALESCE(?4, 'sensor'), COALESCE(?5, 10), ?6, ?7,
                     COALESCE(?8, 1), ?9, ?10, ?10)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Device>(&query)
            .bind(input.project_id)
            .bind(&input.name)
            .bind(&input.description)
            .bind(&input.device_type)
            .bind(input.send_interval)
            .bind(input.payload_id)
            .bind(input.target_system_id)
            .bind(input.is_enabled)
            .bind(Json(input.metadata.clone().unwrap_or_else(|| json!({}))))
            .bind(chrono::Utc::now())
            .fetch_one(pool)
            .await
    }

    /// Find a device by its internal ID.
    pub async fn find_by_id(pool: &SqlitePool, id: DbId) -> Result<Option<Device>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM devices WHERE id = ?1");
        sqlx::query_as::<_, Device>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List devices, optionally restricted to one project, in creation order.
    pub async fn list(
        pool: &SqlitePool,
        project_id: Option<DbId>,
    ) -> Result<Vec<Device>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM devices
             WHERE (?1 IS NULL OR project_id = ?1)
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, Device>(&query)
            .bind(project_id)
            .fetch_all(pool)
            .await
    }

    /// List all devices that belong to a project.
    pub async fn list_by_project(
        pool: &SqlitePool,
        project_id: DbId,
    ) -> Result<Vec<Device>, sqlx::Error> {
        Self::list(pool, Some(project_id)).await
    }

    /// Update a device. Only non-`None` fields in `input` are applied.
    ///
    /// Returns `None` if no row with the given `id` exists.
    pub async fn update(
        pool: &SqlitePool,
        id: DbId,
        input: &UpdateDevice,
    ) -> Result<Option<Device>, sqlx::Error> {
        let query = format!(
            "UPDATE devices SET
                project_id = COALESCE(?2, project_id),
                name = COALESCE(?3, name),
                description = COALESCE(?4, description),
                device_type = COALESCE(?5, device_type),
                send_interval = COALESCE(?6, send_interval),
                payload_id = COALESCE(?7, payload_id),
                target_system_id = COALESCE(?8, target_system_id),
                is_enabled = COALESCE(?9, is_enabled),
                metadata = COALESCE(?10, metadata),
                updated_at = ?11
             WHERE id = ?1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Device>(&query)
            .bind(id)
            .bind(input.project_id)
            .bind(&input.name)
            .bind(&input.description)
            .bind(&input.device_type)
            .bind(input.send_interval)
            .bind(input.payload_id)
            .bind(input.target_system_id)
            .bind(input.is_enabled)
            .bind(input.metadata.clone().map(Json::<Value>))
            .bind(chrono::Utc::now())
            .fetch_optional(pool)
            .await
    }

    /// Set the enabled flag. Returns `None` if the device does not exist.
    pub async fn set_enabled(
        pool: &SqlitePool,
        id: DbId,
        is_enabled: bool,
    ) -> Result<Option<Device>, sqlx::Error> {
        let query = format!(
            "UPDATE devices SET is_enabled = ?2, updated_at = ?3 WHERE id = ?1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Device>(&query)
            .bind(id)
            .bind(is_enabled)
            .bind(chrono::Utc::now())
            .fetch_optional(pool)
            .await
    }

    /// Move a device to another project in a single statement.
    pub async fn move_to_project(
        pool: &SqlitePool,
        id: DbId,
        project_id: DbId,
    ) -> Result<Option<Device>, sqlx::Error> {
        let query = format!(
            "UPDATE devices SET project_id = ?2, updated_at = ?3 WHERE id = ?1 RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Device>(&query)
            .bind(id)
            .bind(project_id)
            .bind(chrono::Utc::now())
            .fetch_optional(pool)
            .await
    }

    /// Permanently delete a device. Returns `true` if a row was removed.
    pub async fn delete(pool: &SqlitePool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM devices WHERE id = ?1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
