//! Audit log rows. Immutable once written.

use brm_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `audit_log` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditLogRow {
    pub id: DbId,
    pub action: String,
    pub entity: String,
    pub entity_id: Option<DbId>,
    pub actor: String,
    pub old_state: Option<serde_json::Value>,
    pub new_state: Option<serde_json::Value>,
    pub created_at: Timestamp,
}
