//! Repository for the append-only `audit_log` table.

use brm_core::audit::AuditEntry;
use brm_core::types::DbId;
use sqlx::PgPool;

use crate::models::audit::AuditLogRow;

const COLUMNS: &str = "id, action, entity, entity_id, actor, old_state, new_state, created_at";

pub struct AuditLogRepo;

impl AuditLogRepo {
    pub async fn insert(pool: &PgPool, entry: &AuditEntry) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO audit_log (action, entity, entity_id, actor, old_state, new_state) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING id",
        )
        .bind(&entry.action)
        .bind(&entry.entity)
        .bind(entry.entity_id)
        .bind(&entry.actor)
        .bind(&entry.old_state)
        .bind(&entry.new_state)
        .fetch_one(pool)
        .await
    }

    /// Entries for one entity, oldest first.
    pub async fn list_for_entity(
        pool: &PgPool,
        entity: &str,
        entity_id: DbId,
    ) -> Result<Vec<AuditLogRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM audit_log WHERE entity = $1 AND entity_id = $2 ORDER BY id"
        );
        sqlx::query_as::<_, AuditLogRow>(&query)
            .bind(entity)
            .bind(entity_id)
            .fetch_all(pool)
            .await
    }
}
