//! Database models for jobs and their completion summaries.

use crate::types::{JobId, TeamId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Job status enum stored as TEXT in database
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    /// Terminal statuses reject any further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InProgress => write!(f, "in_progress"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Database request for creating a new job
#[derive(Debug, Clone, bon::Builder)]
pub struct JobCreateDBRequest {
    pub team_id: TeamId,
    pub user_id: Option<UserId>,
    pub job_type: String,
    /// Arbitrary key-value metadata attached at creation; merged (keys
    /// overwrite) with any patch supplied at completion.
    pub metadata: Option<serde_json::Value>,
}

/// Terminal status requested by the caller when completing a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Completed,
    Failed,
}

impl From<CompletionStatus> for JobStatus {
    fn from(status: CompletionStatus) -> Self {
        match status {
            CompletionStatus::Completed => JobStatus::Completed,
            CompletionStatus::Failed => JobStatus::Failed,
        }
    }
}

/// Database request for completing a job
#[derive(Debug, Clone, bon::Builder)]
pub struct JobCompleteDBRequest {
    pub status: CompletionStatus,
    /// Merged into the job's existing metadata; colliding keys overwrite.
    pub metadata_patch: Option<serde_json::Value>,
    pub error_message: Option<String>,
}

/// Database response for a job
#[derive(Debug, Clone)]
pub struct JobDBResponse {
    pub id: JobId,
    pub team_id: TeamId,
    pub user_id: Option<UserId>,
    pub job_type: String,
    pub status: JobStatus,
    pub metadata: serde_json::Value,
    pub error_message: Option<String>,
    pub model_groups_used: Vec<String>,
    pub credit_applied: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Aggregate view over a job's recorded calls plus the outcome of the
/// conditional credit deduction. Completing an already-terminal job returns
/// the same summary again without touching the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_calls: i64,
    pub successful_calls: i64,
    pub failed_calls: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: Decimal,
    pub avg_latency_ms: Option<f64>,
    pub credit_applied: bool,
    /// Balance after this job's deduction, when one was applied. `None`
    /// when no credit was deducted (failed calls, failed status, or
    /// insufficient credit).
    pub credits_remaining: Option<i64>,
    pub error_message: Option<String>,
}
