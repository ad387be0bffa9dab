//! Background services for the rule engine: the schedule poller and the
//! expired-lock sweep.

pub mod lock_sweep;
pub mod scheduler;

pub use scheduler::Scheduler;
