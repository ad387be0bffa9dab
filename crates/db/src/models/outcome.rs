//! Execution outcome rows. Append-only: there is no update DTO.

use brm_core::outcome::Outcome;
use brm_core::types::{DbId, RunId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `rule_execution_outcomes` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ExecutionOutcomeRow {
    pub id: DbId,
    pub rule_id: DbId,
    pub run_id: RunId,
    pub executed_at: Timestamp,
    pub passed: bool,
    pub message: String,
    pub affected_rows: i64,
    pub is_dry_run: bool,
    pub duration_ms: i64,
}

impl From<ExecutionOutcomeRow> for Outcome {
    fn from(row: ExecutionOutcomeRow) -> Self {
        Outcome {
            rule_id: row.rule_id,
            run_id: row.run_id,
            executed_at: row.executed_at,
            passed: row.passed,
            message: row.message,
            affected_rows: row.affected_rows,
            is_dry_run: row.is_dry_run,
            duration_ms: row.duration_ms,
        }
    }
}
