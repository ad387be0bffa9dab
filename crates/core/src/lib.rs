//! Business rule engine domain logic.
//!
//! Everything here is pure: no database access and no async. The store layer
//! (`brm-db`) and the engine (`brm-engine`) build on these types.
//!
//! - [`rule`]: rule model, status lifecycle, statement kind detection.
//! - [`graph`]: dependency graph construction and relation indexes.
//! - [`traversal`]: the breadth-first execution state machine.
//! - [`composite`]: composite expression language.
//! - [`lock`]: lease records and grant decisions.
//! - [`outcome`]: pass/fail classification.
//! - [`validation`]: data validation planning.

pub mod audit;
pub mod composite;
pub mod config;
pub mod error;
pub mod graph;
pub mod lock;
pub mod outcome;
pub mod rule;
pub mod traversal;
pub mod types;
pub mod validation;
