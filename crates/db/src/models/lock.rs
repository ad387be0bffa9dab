//! Lock lease rows.

use brm_core::lock::RuleLock;
use brm_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `rule_locks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct RuleLockRow {
    pub rule_id: DbId,
    pub locked_by: String,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
    pub is_forced: bool,
}

impl From<RuleLockRow> for RuleLock {
    fn from(row: RuleLockRow) -> Self {
        RuleLock {
            rule_id: row.rule_id,
            locked_by: row.locked_by,
            acquired_at: row.acquired_at,
            expires_at: row.expires_at,
            is_forced: row.is_forced,
        }
    }
}
