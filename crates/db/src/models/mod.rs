//! Row models for every engine table.

pub mod audit;
pub mod event;
pub mod lock;
pub mod outcome;
pub mod relation;
pub mod rule;
pub mod run;
pub mod schedule;
pub mod validation;
