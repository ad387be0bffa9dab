/// All database primary keys are PostgreSQL BIGSERIAL.
pub type DbId = i64;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Identifier shared by every outcome written during one traversal or single-rule run.
pub type RunId = uuid::Uuid;
