//! HTTP request handlers, one module per resource family.

pub mod credits;
pub mod jobs;
pub mod model_groups;
pub mod proxy;
