//! Repository for the `engine_events` table.

use brm_core::types::{DbId, RunId, Timestamp};
use sqlx::PgPool;

use crate::models::event::EngineEventRow;

const COLUMNS: &str = "id, event_type, rule_id, run_id, payload, created_at";

pub struct EventRepo;

impl EventRepo {
    /// Insert an event row stamped with its publish time, returning the id.
    pub async fn insert(
        pool: &PgPool,
        event_type: &str,
        rule_id: Option<DbId>,
        run_id: Option<RunId>,
        payload: &serde_json::Value,
        created_at: Timestamp,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO engine_events (event_type, rule_id, run_id, payload, created_at) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(event_type)
        .bind(rule_id)
        .bind(run_id)
        .bind(payload)
        .bind(created_at)
        .fetch_one(pool)
        .await
    }

    /// List recent events ordered newest-first.
    pub async fn list_recent(
        pool: &PgPool,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EngineEventRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM engine_events \
             ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2"
        );
        sqlx::query_as::<_, EngineEventRow>(&query)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    pub async fn list_for_run(
        pool: &PgPool,
        run_id: RunId,
    ) -> Result<Vec<EngineEventRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM engine_events WHERE run_id = $1 ORDER BY id");
        sqlx::query_as::<_, EngineEventRow>(&query)
            .bind(run_id)
            .fetch_all(pool)
            .await
    }
}
