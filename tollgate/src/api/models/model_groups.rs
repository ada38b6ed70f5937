//! API request/response models for model groups.

use crate::db::models::model_groups::{ModelGroupDBResponse, ModelGroupEntryDBResponse, ModelGroupEntrySpec};
use crate::types::ModelGroupId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

fn default_active() -> bool {
    true
}

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelGroupEntryCreate {
    /// Concrete upstream model name
    pub model_name: String,
    /// Lower values are tried first; values need not be contiguous
    #[serde(default)]
    pub priority: i32,
    /// Inactive entries are skipped by resolution
    #[serde(default = "default_active")]
    pub active: bool,
}

impl From<ModelGroupEntryCreate> for ModelGroupEntrySpec {
    fn from(entry: ModelGroupEntryCreate) -> Self {
        Self {
            model_name: entry.model_name,
            priority: entry.priority,
            active: entry.active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelGroupCreate {
    /// Unique group name callers route by
    pub name: String,
    pub description: Option<String>,
    /// Initial candidate entries
    #[serde(default)]
    pub entries: Vec<ModelGroupEntryCreate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelGroupUpdate {
    /// New unique name
    pub name: Option<String>,
    /// New description; omit to leave unchanged
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelGroupEntriesUpdate {
    /// Replaces the group's entire entry list
    pub entries: Vec<ModelGroupEntryCreate>,
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelGroupEntryResponse {
    pub model_name: String,
    pub priority: i32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<ModelGroupEntryDBResponse> for ModelGroupEntryResponse {
    fn from(entry: ModelGroupEntryDBResponse) -> Self {
        Self {
            model_name: entry.model_name,
            priority: entry.priority,
            active: entry.active,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ModelGroupResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ModelGroupId,
    pub name: String,
    pub description: Option<String>,
    pub entries: Vec<ModelGroupEntryResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModelGroupResponse {
    pub fn from_parts(group: ModelGroupDBResponse, entries: Vec<ModelGroupEntryDBResponse>) -> Self {
        Self {
            id: group.id,
            name: group.name,
            description: group.description,
            entries: entries.into_iter().map(ModelGroupEntryResponse::from).collect(),
            created_at: group.created_at,
            updated_at: group.updated_at,
        }
    }
}

/// Resolution result: candidate model names in fallback order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResolutionResponse {
    pub group: String,
    pub candidates: Vec<String>,
}

/// Query parameters for listing model groups
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListModelGroupsQuery {
    /// Substring match on name or description
    pub search: Option<String>,
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "super::jobs::default_limit")]
    pub limit: i64,
}
