//! Repository for the append-only `rule_execution_outcomes` table.

use brm_core::outcome::Outcome;
use brm_core::types::{DbId, RunId};
use sqlx::PgPool;

use crate::models::outcome::ExecutionOutcomeRow;

const COLUMNS: &str = "\
    id, rule_id, run_id, executed_at, passed, message, affected_rows, is_dry_run, duration_ms";

pub struct ExecutionOutcomeRepo;

impl ExecutionOutcomeRepo {
    /// Append an outcome, returning the generated id.
    pub async fn insert(pool: &PgPool, outcome: &Outcome) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO rule_execution_outcomes \
                (rule_id, run_id, executed_at, passed, message, affected_rows, is_dry_run, \
                 duration_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING id",
        )
        .bind(outcome.rule_id)
        .bind(outcome.run_id)
        .bind(outcome.executed_at)
        .bind(outcome.passed)
        .bind(&outcome.message)
        .bind(outcome.affected_rows)
        .bind(outcome.is_dry_run)
        .bind(outcome.duration_ms)
        .fetch_one(pool)
        .await
    }

    /// Outcomes of one run in execution order.
    pub async fn list_for_run(
        pool: &PgPool,
        run_id: RunId,
    ) -> Result<Vec<ExecutionOutcomeRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM rule_execution_outcomes WHERE run_id = $1 ORDER BY id"
        );
        sqlx::query_as::<_, ExecutionOutcomeRow>(&query)
            .bind(run_id)
            .fetch_all(pool)
            .await
    }

    /// Most recent outcomes of a rule, newest first.
    pub async fn list_for_rule(
        pool: &PgPool,
        rule_id: DbId,
        limit: i64,
    ) -> Result<Vec<ExecutionOutcomeRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM rule_execution_outcomes WHERE rule_id = $1 \
             ORDER BY executed_at DESC, id DESC LIMIT $2"
        );
        sqlx::query_as::<_, ExecutionOutcomeRow>(&query)
            .bind(rule_id)
            .bind(limit.clamp(1, 500))
            .fetch_all(pool)
            .await
    }
}
