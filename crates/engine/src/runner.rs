//! Transactional rule runner.
//!
//! Each rule runs in its own transaction. Any error becomes a failed
//! classification and the transaction is rolled back; nothing is retried.
//! The transaction commits only for a live run that passed.

use std::time::Duration;

use brm_core::error::CoreError;
use brm_core::outcome::{classify, should_commit, Classification, StatementResult};
use brm_core::rule::{detect_statement_kind, Rule, RuleLogic};
use brm_core::types::DbId;
use brm_db::repositories::DecisionTableRepo;
use futures::TryStreamExt;
use sqlx::{Either, PgConnection, PgPool, Row};

/// Failure while running a rule's logic. Always converted into a failed
/// outcome by [`TransactionalRuleRunner::run`].
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Database(#[from] sqlx::Error),

    #[error("Decision table {table_id} referenced by rule {rule_id} does not exist")]
    MissingDecisionTable { rule_id: DbId, table_id: DbId },

    #[error(transparent)]
    InvalidRule(#[from] CoreError),
}

#[derive(Debug, Clone)]
pub struct TransactionalRuleRunner {
    pool: PgPool,
    statement_timeout: Option<Duration>,
}

impl TransactionalRuleRunner {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            statement_timeout: None,
        }
    }

    /// Apply `SET LOCAL statement_timeout` inside every rule transaction.
    /// A zero duration disables it.
    pub fn with_statement_timeout(mut self, timeout: Duration) -> Self {
        self.statement_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Run one rule and classify the result. Never fails.
    pub async fn run(&self, rule: &Rule, dry_run: bool) -> Classification {
        match self.try_run(rule, dry_run).await {
            Ok(classification) => classification,
            Err(e) => {
                tracing::warn!(rule_id = rule.id, dry_run, error = %e, "Rule execution error");
                Classification::error(e.to_string())
            }
        }
    }

    async fn try_run(&self, rule: &Rule, dry_run: bool) -> Result<Classification, ExecutionError> {
        let logic = rule.logic()?;
        let mut tx = self.pool.begin().await?;

        if let Some(timeout) = self.statement_timeout {
            // SET does not take bind parameters; the value is an integer.
            sqlx::query(&format!("SET LOCAL statement_timeout = {}", timeout.as_millis()))
                .execute(&mut *tx)
                .await?;
        }

        let sql = match logic {
            RuleLogic::Sql(sql) => sql.to_string(),
            RuleLogic::DecisionTable(table_id) => {
                let table = DecisionTableRepo::find_by_id(&self.pool, table_id)
                    .await?
                    .ok_or(ExecutionError::MissingDecisionTable {
                        rule_id: rule.id,
                        table_id,
                    })?;
                table.decision_query
            }
        };

        let result = match execute_statement(&mut tx, &sql).await {
            Ok(result) => result,
            Err(e) => {
                tx.rollback().await?;
                return Err(e.into());
            }
        };

        let classification = classify(&result);
        if should_commit(dry_run, classification.passed) {
            tx.commit().await?;
        } else {
            tx.rollback().await?;
        }
        tracing::debug!(
            rule_id = rule.id,
            dry_run,
            passed = classification.passed,
            committed = should_commit(dry_run, classification.passed),
            "Rule transaction finished"
        );
        Ok(classification)
    }
}

/// Execute opaque statement text and reduce what it produced.
///
/// Uses the simple query protocol, so every column arrives as text and the
/// first column can be read as a string whatever its SQL type.
async fn execute_statement(
    conn: &mut PgConnection,
    sql: &str,
) -> Result<StatementResult, sqlx::Error> {
    let mut first_value: Option<Option<String>> = None;
    let mut row_count: i64 = 0;
    let mut rows_affected: u64 = 0;

    {
        let mut stream = sqlx::raw_sql(sql).fetch_many(&mut *conn);
        while let Some(item) = stream.try_next().await? {
            match item {
                Either::Left(done) => rows_affected += done.rows_affected(),
                Either::Right(row) => {
                    if first_value.is_none() {
                        first_value = Some(if row.columns().is_empty() {
                            None
                        } else {
                            row.try_get_unchecked::<Option<String>, _>(0)?
                        });
                    }
                    row_count += 1;
                }
            }
        }
    }

    if row_count > 0 || detect_statement_kind(sql).returns_rows() {
        Ok(StatementResult::Rows {
            first_value: first_value.flatten(),
            row_count,
        })
    } else {
        Ok(StatementResult::Mutation {
            rows_affected: i64::try_from(rows_affected).unwrap_or(i64::MAX),
        })
    }
}
