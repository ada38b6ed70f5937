//! Database models for model groups and their prioritized entries.

use crate::types::ModelGroupId;
use chrono::{DateTime, Utc};

/// Database request for creating a model group
#[derive(Debug, Clone, bon::Builder)]
pub struct ModelGroupCreateDBRequest {
    pub name: String,
    pub description: Option<String>,
}

/// Database request for updating a model group
#[derive(Debug, Clone, Default)]
pub struct ModelGroupUpdateDBRequest {
    pub name: Option<String>,
    /// `Some(None)` clears the description, `None` leaves it untouched.
    pub description: Option<Option<String>>,
}

/// One candidate model inside a group. Lower priority values are tried
/// first; inactive entries are skipped by resolution.
#[derive(Debug, Clone)]
pub struct ModelGroupEntrySpec {
    pub model_name: String,
    pub priority: i32,
    pub active: bool,
}

/// Database response for a model group
#[derive(Debug, Clone)]
pub struct ModelGroupDBResponse {
    pub id: ModelGroupId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Database response for a group entry
#[derive(Debug, Clone)]
pub struct ModelGroupEntryDBResponse {
    pub id: uuid::Uuid,
    pub group_id: ModelGroupId,
    pub model_name: String,
    pub priority: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}
