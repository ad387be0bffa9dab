use brm_core::error::CoreError;
use brm_core::graph::GraphLoadError;
use brm_core::lock::LockedError;
use brm_core::types::DbId;
use brm_core::validation::ValidationResult;

/// Errors that abort an engine operation before or around a traversal.
///
/// Rule execution failures never appear here; they become failed outcomes.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A domain-level error from `brm_core` (graph load, lock, not found).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Validations failed and the engine is configured to abort on that.
    #[error("Pre-flight validations failed: {failed:?}")]
    ValidationGate {
        failed: Vec<DbId>,
        results: Vec<ValidationResult>,
    },
}

impl EngineError {
    /// The lock conflict behind this error, if that is what it is.
    pub fn as_locked(&self) -> Option<&LockedError> {
        match self {
            EngineError::Core(CoreError::Locked(e)) => Some(e),
            _ => None,
        }
    }
}

impl From<LockedError> for EngineError {
    fn from(e: LockedError) -> Self {
        EngineError::Core(CoreError::Locked(e))
    }
}

impl From<GraphLoadError> for EngineError {
    fn from(e: GraphLoadError) -> Self {
        EngineError::Core(CoreError::GraphLoad(e))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
