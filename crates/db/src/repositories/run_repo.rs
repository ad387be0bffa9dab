//! Repository for the `traversal_runs` table.

use brm_core::types::{DbId, RunId, Timestamp};
use sqlx::PgPool;

use crate::models::run::TraversalRun;

const COLUMNS: &str = "run_id, started_by, dry_run, seed_rule_ids, started_at, finished_at, report";

pub struct TraversalRunRepo;

impl TraversalRunRepo {
    pub async fn start(
        pool: &PgPool,
        run_id: RunId,
        started_by: &str,
        dry_run: bool,
        seed_rule_ids: &[DbId],
        started_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO traversal_runs (run_id, started_by, dry_run, seed_rule_ids, started_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(run_id)
        .bind(started_by)
        .bind(dry_run)
        .bind(seed_rule_ids)
        .bind(started_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Store the final report and finish time.
    pub async fn finish(
        pool: &PgPool,
        run_id: RunId,
        report: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE traversal_runs SET finished_at = NOW(), report = $2 WHERE run_id = $1")
            .bind(run_id)
            .bind(report)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn find(pool: &PgPool, run_id: RunId) -> Result<Option<TraversalRun>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM traversal_runs WHERE run_id = $1");
        sqlx::query_as::<_, TraversalRun>(&query)
            .bind(run_id)
            .fetch_optional(pool)
            .await
    }
}
