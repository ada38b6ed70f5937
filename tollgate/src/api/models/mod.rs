//! API request/response schemas for the thin HTTP layer.

pub mod credits;
pub mod jobs;
pub mod model_groups;
pub mod proxy;
