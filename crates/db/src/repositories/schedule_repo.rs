//! Repository for the `rule_schedules` table.

use brm_core::types::{DbId, RunId, Timestamp};
use chrono::Duration;
use sqlx::PgPool;

use crate::models::schedule::{schedule_status, RuleSchedule};

const COLUMNS: &str =
    "id, rule_id, scheduled_for, status, run_id, claimed_at, executed_at, created_at";

pub struct ScheduleRepo;

impl ScheduleRepo {
    pub async fn create(
        pool: &PgPool,
        rule_id: DbId,
        scheduled_for: Timestamp,
    ) -> Result<RuleSchedule, sqlx::Error> {
        let query = format!(
            "INSERT INTO rule_schedules (rule_id, scheduled_for) VALUES ($1, $2) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RuleSchedule>(&query)
            .bind(rule_id)
            .bind(scheduled_for)
            .fetch_one(pool)
            .await
    }

    /// Atomically claim the oldest due schedule.
    ///
    /// A row is due when it is `Scheduled` for `now` or earlier, or when it
    /// has been `Running` since before `now - stale_after` (its worker died).
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so concurrent workers never
    /// claim the same row.
    pub async fn claim_due(
        pool: &PgPool,
        now: Timestamp,
        stale_after: Duration,
    ) -> Result<Option<RuleSchedule>, sqlx::Error> {
        let query = format!(
            "UPDATE rule_schedules SET status = $1, claimed_at = $3 \
             WHERE id = ( \
                 SELECT id FROM rule_schedules \
                 WHERE (status = $2 AND scheduled_for <= $3) \
                    OR (status = $1 AND claimed_at <= $4) \
                 ORDER BY scheduled_for ASC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RuleSchedule>(&query)
            .bind(schedule_status::RUNNING)
            .bind(schedule_status::SCHEDULED)
            .bind(now)
            .bind(now - stale_after)
            .fetch_optional(pool)
            .await
    }

    /// Record the terminal status of a claimed schedule.
    pub async fn mark_finished(
        pool: &PgPool,
        id: DbId,
        status: &str,
        run_id: Option<RunId>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE rule_schedules SET status = $2, run_id = $3, executed_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(run_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Move a claimed row to `Failed` unless its result was already
    /// recorded. Returns whether the row changed.
    pub async fn fail_if_running(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE rule_schedules SET status = $2, executed_at = NOW() \
             WHERE id = $1 AND status = $3",
        )
        .bind(id)
        .bind(schedule_status::FAILED)
        .bind(schedule_status::RUNNING)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find(pool: &PgPool, id: DbId) -> Result<Option<RuleSchedule>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM rule_schedules WHERE id = $1");
        sqlx::query_as::<_, RuleSchedule>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
