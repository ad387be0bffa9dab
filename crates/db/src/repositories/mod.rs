//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that
//! accept `&PgPool` as the first argument.

pub mod audit_repo;
pub mod event_repo;
pub mod outcome_repo;
pub mod relation_repo;
pub mod rule_lock_repo;
pub mod rule_repo;
pub mod run_repo;
pub mod schedule_repo;
pub mod validation_repo;

pub use audit_repo::AuditLogRepo;
pub use event_repo::EventRepo;
pub use outcome_repo::ExecutionOutcomeRepo;
pub use relation_repo::RelationRepo;
pub use rule_lock_repo::{LockAttempt, RuleLockRepo};
pub use rule_repo::{DecisionTableRepo, RuleRepo};
pub use run_repo::TraversalRunRepo;
pub use schedule_repo::ScheduleRepo;
pub use validation_repo::ValidationRepo;
