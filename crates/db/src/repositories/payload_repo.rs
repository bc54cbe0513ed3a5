//! Repository for the `payloads` table.

use iotsim_core::types::DbId;
use serde_json::Value;
use sqlx::types::Json;
use sqlx::SqlitePool;

use crate::models::payload::{CreatePayload, Payload, UpdatePayload};

/// Column list shared across queries to avoid repetition.
const COLUMNS: &str =
    "id, name, description, payload_type, schema, python_code, created_at, updated_at";

/// Provides CRUD operations for payloads.
pub struct PayloadRepo;

impl PayloadRepo {
    /// Insert a new payload, returning the created row.
    pub async fn create(pool: &SqlitePool, input: &CreatePayload) -> Result<Payload, sqlx::Error> {
        let query = format!(
            "INSERT INTO payloads (name, description, payload_type, schema, python_code,
                                   created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Payload>(&query)
            .bind(&input.name)
            .bind(&input.description)
            .bind(input.payload_type.as_str())
            .bind(input.schema.clone().map(Json::<Value>))
            .bind(&input.python_code)
            .bind(chrono::Utc::now())
            .fetch_one(pool)
            .await
    }

    /// Find a payload by its internal ID.
    pub async fn find_by_id(pool: &SqlitePool, id: DbId) -> Result<Option<Payload>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM payloads WHERE id = ?1");
        sqlx::query_as::<_, Payload>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List all payloads ordered by name.
    pub async fn list(pool: &SqlitePool) -> Result<Vec<Payload>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM payloads ORDER BY name ASC");
        sqlx::query_as::<_, Payload>(&query).fetch_all(pool).await
    }

    /// Update a payload. Only non-`None` fields in `input` are applied.
    ///
    /// Returns `None` if no row with the given `id` exists.
    pub async fn update(
        pool: &SqlitePool,
        id: DbId,
        input: &UpdatePayload,
    ) -> Result<Option<Payload>, sqlx::Error> {
        let query = format!(
            "UPDATE payloads SET
                name = COALESCE(?2, name),
                description = COALESCE(?3, description),
                payload_type = COALESCE(?4, payload_type),
                schema = COALESCE(?5, schema),
                python_code = COALESCE(?6, python_code),
                updated_at = ?7
             WHERE id = ?1
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Payload>(&query)
            .bind(id)
            .bind(&input.name)
            .bind(&input.description)
            .bind(input.payload_type.map(|t| t.as_str()))
            .bind(input.schema.clone().map(Json::<Value>))
            .bind(&input.python_code)
            .bind(chrono::Utc::now())
            .fetch_optional(pool)
            .await
    }

    /// Number of devices that reference this payload.
    pub async fn count_device_references(pool: &SqlitePool, id: DbId) -> Result<i64, sqlx::Error> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM devices WHERE payload_id = ?1")
            .bind(id)
            .fetch_one(pool)
            .await?;
        Ok(count)
    }

    /// Permanently delete a payload. Referencing devices keep existing with
    /// a cleared `payload_id`. Returns `true` if a row was removed.
    pub async fn delete(pool: &SqlitePool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM payloads WHERE id = ?1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
