//! Repository for `rule_conflicts`, `rule_critical_links` and `composite_rules`.

use brm_core::types::DbId;
use sqlx::PgPool;

use crate::models::relation::{CompositeRuleRow, CriticalLinkRow, RuleConflictRow};

const COMPOSITE_COLUMNS: &str = "id, name, logic_expr, action_on_pass, created_at";

/// Reads and writes the graph relation tables.
pub struct RelationRepo;

impl RelationRepo {
    pub async fn list_conflicts(pool: &PgPool) -> Result<Vec<RuleConflictRow>, sqlx::Error> {
        sqlx::query_as::<_, RuleConflictRow>(
            "SELECT rule_id, conflict_rule_id, priority FROM rule_conflicts \
             ORDER BY rule_id, conflict_rule_id",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn list_critical_links(pool: &PgPool) -> Result<Vec<CriticalLinkRow>, sqlx::Error> {
        sqlx::query_as::<_, CriticalLinkRow>(
            "SELECT source_rule_id, target_rule_id FROM rule_critical_links \
             ORDER BY source_rule_id, target_rule_id",
        )
        .fetch_all(pool)
        .await
    }

    pub async fn list_composites(pool: &PgPool) -> Result<Vec<CompositeRuleRow>, sqlx::Error> {
        let query = format!("SELECT {COMPOSITE_COLUMNS} FROM composite_rules ORDER BY id");
        sqlx::query_as::<_, CompositeRuleRow>(&query)
            .fetch_all(pool)
            .await
    }

    /// Record `rule_id`'s priority against `conflict_rule_id`, replacing any
    /// existing value for the pair.
    pub async fn upsert_conflict(
        pool: &PgPool,
        rule_id: DbId,
        conflict_rule_id: DbId,
        priority: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO rule_conflicts (rule_id, conflict_rule_id, priority) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (rule_id, conflict_rule_id) DO UPDATE SET priority = EXCLUDED.priority",
        )
        .bind(rule_id)
        .bind(conflict_rule_id)
        .bind(priority)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn add_critical_link(
        pool: &PgPool,
        source_rule_id: DbId,
        target_rule_id: DbId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO rule_critical_links (source_rule_id, target_rule_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(source_rule_id)
        .bind(target_rule_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn create_composite(
        pool: &PgPool,
        name: &str,
        logic_expr: &str,
        action_on_pass: Option<&str>,
    ) -> Result<CompositeRuleRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO composite_rules (name, logic_expr, action_on_pass) \
             VALUES ($1, $2, $3) RETURNING {COMPOSITE_COLUMNS}"
        );
        sqlx::query_as::<_, CompositeRuleRow>(&query)
            .bind(name)
            .bind(logic_expr)
            .bind(action_on_pass)
            .fetch_one(pool)
            .await
    }
}
