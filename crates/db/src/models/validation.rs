//! Data validation definition rows.

use brm_core::types::{DbId, Timestamp};
use brm_core::validation::ValidationDefinition;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `data_validations` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DataValidationRow {
    pub id: DbId,
    pub table_name: String,
    pub column_name: String,
    pub validation_type: String,
    pub params: serde_json::Value,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: Timestamp,
}

impl From<DataValidationRow> for ValidationDefinition {
    fn from(row: DataValidationRow) -> Self {
        ValidationDefinition {
            id: row.id,
            table_name: row.table_name,
            column_name: row.column_name,
            validation_type: row.validation_type,
            params: row.params,
            description: row.description,
            is_active: row.is_active,
        }
    }
}

/// DTO for inserting a validation.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateDataValidation {
    pub table_name: String,
    pub column_name: String,
    pub validation_type: String,
    pub params: serde_json::Value,
    pub description: Option<String>,
}
