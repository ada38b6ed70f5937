//! Repository implementations for database access.
//!
//! This module provides repository structs for each major entity in the
//! system. Repositories follow a consistent pattern:
//!
//! - Wrap a SQLx connection or transaction
//! - Provide strongly-typed operations over one table family
//! - Return domain models from [`crate::db::models`]
//! - Open their own transaction for multi-statement operations, so callers
//!   already inside a transaction compose via savepoints
//!
//! # Available Repositories
//!
//! - [`Jobs`]: job lifecycle, call recording, completion and credit settlement
//! - [`LlmCalls`]: recorded upstream calls and per-job aggregates
//! - [`ModelGroups`]: routing groups, entries, and name resolution
//! - [`Credits`]: the per-team ledger and its audit log

pub mod credits;
pub mod jobs;
pub mod llm_calls;
pub mod model_groups;
pub mod repository;

pub use credits::Credits;
pub use jobs::{JobFilter, Jobs};
pub use llm_calls::{CallAggregates, LlmCalls};
pub use model_groups::{ModelGroupFilter, ModelGroups};
pub use repository::Repository;
