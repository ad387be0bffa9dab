//! Validation Gate: pre-flight data checks against the live store.
//!
//! Every check is independent. A definition that cannot be parsed or a
//! query that errors yields a failed [`ValidationResult`] carrying the error
//! text; the remaining checks still run.

use brm_core::validation::{BindValue, ValidationCheck, ValidationDefinition, ValidationResult};
use brm_db::repositories::ValidationRepo;
use sqlx::PgPool;

use crate::error::EngineResult;

#[derive(Debug, Clone)]
pub struct ValidationGate {
    pool: PgPool,
}

impl ValidationGate {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run every active validation, or only those on `tables` when given.
    ///
    /// Only loading the definitions can fail; individual checks never do.
    pub async fn run_validations(
        &self,
        tables: Option<&[String]>,
    ) -> EngineResult<Vec<ValidationResult>> {
        let rows = match tables {
            Some(tables) => ValidationRepo::list_active_for_tables(&self.pool, tables).await?,
            None => ValidationRepo::list_active(&self.pool).await?,
        };

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let def = ValidationDefinition::from(row);
            let result = self.run_one(&def).await;
            if result.passed {
                tracing::debug!(
                    validation_id = def.id,
                    table = %def.table_name,
                    "Validation passed"
                );
            } else {
                tracing::warn!(
                    validation_id = def.id,
                    table = %def.table_name,
                    column = %def.column_name,
                    message = %result.message,
                    "Validation failed"
                );
            }
            results.push(result);
        }
        Ok(results)
    }

    async fn run_one(&self, def: &ValidationDefinition) -> ValidationResult {
        let planned = ValidationCheck::from_definition(def).and_then(|check| {
            let query = check.query()?;
            Ok((check, query))
        });
        let (check, query) = match planned {
            Ok(planned) => planned,
            Err(e) => return ValidationResult::errored(def, e),
        };

        let mut q = sqlx::query_scalar::<_, i64>(&query.sql);
        for bind in query.binds {
            q = match bind {
                BindValue::Float(v) => q.bind(v),
                BindValue::Text(v) => q.bind(v),
                BindValue::TextArray(v) => q.bind(v),
            };
        }
        match q.fetch_one(&self.pool).await {
            Ok(violations) => ValidationResult::from_count(&check, violations),
            Err(e) => ValidationResult::errored(def, e),
        }
    }
}
