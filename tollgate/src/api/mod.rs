//! The thin HTTP layer.
//!
//! Handlers here only call the engine's exposed operations (job lifecycle,
//! call proxying, group resolution, ledger mutations); they never touch the
//! underlying rows directly.

pub mod handlers;
pub mod models;
