//! Repository for the `target_systems` table.

use iotsim_core::types::DbId;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::SqlitePool;

use crate::models::target_system::{CreateTargetSystem, TargetSystem, UpdateTargetSystem};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str = "id, name, system_type, config, created_at, updated_at";

/// Provides CRUD operations for target systems.
pub struct TargetSystemRepo;

impl TargetSystemRepo {
    /// Insert a new target system, returning the created row.
    ///
    /// The caller is expected to have normalized `config` against the type schema.
    pub async fn create(
        pool: &SqlitePool,
        input: &CreateTargetSystem,
    ) -> Result<TargetSystem, sqlx::Error> {
        let query = format!(
            "INSERT INTO target_systems (name, system_type, config, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TargetSystem>(&query)
            .bind(&input.name)
            .bind(input.system_type.as_str())
            .bind(Json(input.config.clone()))
            .bind(chrono::Utc::now())
            .fetch_one(pool)
            .await
    }

    /// Find a target system by its internal ID.
    pub async fn find_by_id(
        pool: &SqlitePool,
        id: DbId,
    ) -> Result<Option<TargetSystem>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM target_systems WHERE id = ?1");
        sqlx::query_as::<_, TargetSystem>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List all target systems ordered by name.
    pub async fn list(pool: &SqlitePool) -> Result<Vec<TargetSystem>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM target_systems ORDER BY name ASC");
        sqlx::query_as::<_, TargetSystem>(&query).fetch_all(pool).await
    }

    /// Update a target system. Only non-`None` fields in `input` are applied.
    ///
    /// Returns `None` if no row with the given `id` exists.
    pub async fn update(
        pool: &SqlitePool,
        id: DbId,
        input: &UpdateTargetSystem,
    ) -> Result<Option<TargetSystem>, sqlx::Error> {
        let query = format!(
            "UPDATE target_systems SET
                name = COALESCE(?2, name),
                system_type = COALESCE(?3, system_type),
                config = COALESCE(?4, config),
                updated_at = ?5
             WHERE id = ?1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, TargetSystem>(&query)
            .bind(id)
            .bind(&input.name)
            .bind(input.system_type.map(|t| t.as_str()))
            .bind(input.config.clone().map(Json::<Value>))
            .bind(chrono::Utc::now())
            .fetch_optional(pool)
            .await
    }

    /// Number of devices that reference this target system.
    pub async fn count_device_references(pool: &SqlitePool, id: DbId) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM devices WHERE target_system_id = ?1")
                .bind(id)
                .fetch_one(pool)
                .await?;
        Ok(count)
    }

    /// Permanently delete a target system. Referencing devices keep existing
    /// with a cleared `target_system_id`. Returns `true` if a row was removed.
    pub async fn delete(pool: &SqlitePool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM target_systems WHERE id = ?1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
