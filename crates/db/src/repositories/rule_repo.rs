//! Repository for the `rules`, `decision_tables` and rule group tables.

use brm_core::types::DbId;
use sqlx::PgPool;

use crate::models::rule::{CreateRule, DecisionTable, RuleGroup, RuleRow};

/// Column list for `rules` queries.
const COLUMNS: &str = "\
    id, name, operation_type, rule_sql, decision_table_id, parent_rule_id, \
    status, is_critical, is_global, owner_group, created_at, updated_at";

const DECISION_TABLE_COLUMNS: &str = "id, name, decision_query, created_at";

// ---------------------------------------------------------------------------
// RuleRepo
// ---------------------------------------------------------------------------

/// Provides reads over rule definitions and group membership.
pub struct RuleRepo;

impl RuleRepo {
    /// Insert a rule, returning the created row.
    pub async fn create(pool: &PgPool, input: &CreateRule) -> Result<RuleRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO rules \
                (name, operation_type, rule_sql, decision_table_id, parent_rule_id, \
                 status, is_critical, is_global, owner_group) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, RuleRow>(&query)
            .bind(&input.name)
            .bind(input.operation_type.as_str())
            .bind(&input.rule_sql)
            .bind(input.decision_table_id)
            .bind(input.parent_rule_id)
            .bind(input.status.as_str())
            .bind(input.is_critical)
            .bind(input.is_global)
            .bind(&input.owner_group)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<RuleRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM rules WHERE id = $1");
        sqlx::query_as::<_, RuleRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Every rule, ascending by id.
    pub async fn list_all(pool: &PgPool) -> Result<Vec<RuleRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM rules ORDER BY id");
        sqlx::query_as::<_, RuleRow>(&query).fetch_all(pool).await
    }

    /// Ids of rules without a parent, ascending.
    pub async fn list_root_ids(pool: &PgPool) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar("SELECT id FROM rules WHERE parent_rule_id IS NULL ORDER BY id")
            .fetch_all(pool)
            .await
    }

    /// Update a rule's lifecycle status.
    pub async fn set_status(pool: &PgPool, id: DbId, status: &str) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE rules SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(id)
                .bind(status)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_group(
        pool: &PgPool,
        group_id: DbId,
    ) -> Result<Option<RuleGroup>, sqlx::Error> {
        sqlx::query_as::<_, RuleGroup>("SELECT id, name, created_at FROM rule_groups WHERE id = $1")
            .bind(group_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn create_group(pool: &PgPool, name: &str) -> Result<RuleGroup, sqlx::Error> {
        sqlx::query_as::<_, RuleGroup>(
            "INSERT INTO rule_groups (name) VALUES ($1) RETURNING id, name, created_at",
        )
        .bind(name)
        .fetch_one(pool)
        .await
    }

    /// Add a rule to a group. Adding an existing member is a no-op.
    pub async fn add_group_member(
        pool: &PgPool,
        group_id: DbId,
        rule_id: DbId,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO rule_group_members (group_id, rule_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(group_id)
        .bind(rule_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Member rule ids of a group, ascending.
    pub async fn list_group_member_ids(
        pool: &PgPool,
        group_id: DbId,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT rule_id FROM rule_group_members WHERE group_id = $1 ORDER BY rule_id",
        )
        .bind(group_id)
        .fetch_all(pool)
        .await
    }
}

// ---------------------------------------------------------------------------
// DecisionTableRepo
// ---------------------------------------------------------------------------

pub struct DecisionTableRepo;

impl DecisionTableRepo {
    pub async fn create(
        pool: &PgPool,
        name: &str,
        decision_query: &str,
    ) -> Result<DecisionTable, sqlx::Error> {
        let query = format!(
            "INSERT INTO decision_tables (name, decision_query) VALUES ($1, $2) \
             RETURNING {DECISION_TABLE_COLUMNS}"
        );
        sqlx::query_as::<_, DecisionTable>(&query)
            .bind(name)
            .bind(decision_query)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<DecisionTable>, sqlx::Error> {
        let query = format!("SELECT {DECISION_TABLE_COLUMNS} FROM decision_tables WHERE id = $1");
        sqlx::query_as::<_, DecisionTable>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
