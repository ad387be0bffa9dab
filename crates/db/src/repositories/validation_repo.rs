//! Repository for the `data_validations` table.

use sqlx::PgPool;

use crate::models::validation::{CreateDataValidation, DataValidationRow};

const COLUMNS: &str = "\
    id, table_name, column_name, validation_type, params, description, is_active, created_at";

pub struct ValidationRepo;

impl ValidationRepo {
    /// Active validations, ascending by id.
    pub async fn list_active(pool: &PgPool) -> Result<Vec<DataValidationRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM data_validations WHERE is_active ORDER BY id");
        sqlx::query_as::<_, DataValidationRow>(&query)
            .fetch_all(pool)
            .await
    }

    /// Active validations on the given tables.
    pub async fn list_active_for_tables(
        pool: &PgPool,
        tables: &[String],
    ) -> Result<Vec<DataValidationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM data_validations \
             WHERE is_active AND table_name = ANY($1) ORDER BY id"
        );
        sqlx::query_as::<_, DataValidationRow>(&query)
            .bind(tables)
            .fetch_all(pool)
            .await
    }

    pub async fn create(
        pool: &PgPool,
        input: &CreateDataValidation,
    ) -> Result<DataValidationRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO data_validations \
                (table_name, column_name, validation_type, params, description) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DataValidationRow>(&query)
            .bind(&input.table_name)
            .bind(&input.column_name)
            .bind(&input.validation_type)
            .bind(&input.params)
            .bind(&input.description)
            .fetch_one(pool)
            .await
    }
}
