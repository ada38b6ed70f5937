//! API request/response models for jobs.

use crate::db::models::{
    jobs::{CompletionStatus, CompletionSummary, JobDBResponse, JobStatus},
    llm_calls::LlmCallDBResponse,
};
use crate::types::{JobId, LlmCallId, TeamId, UserId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobCreate {
    /// Owning team (required - UUID format)
    #[schema(value_type = String, format = "uuid")]
    pub team_id: TeamId,
    /// Acting user, when the caller attributes the job to one
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
    /// Free-form job type tag, e.g. "chat", "summarize"
    pub job_type: String,
    /// Arbitrary metadata attached at creation
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobComplete {
    /// Terminal status to settle the job with
    pub status: CompletionStatus,
    /// Merged into the job's metadata; colliding keys overwrite
    #[schema(value_type = Option<Object>)]
    pub metadata: Option<serde_json::Value>,
    /// Error message to store on the job
    pub error_message: Option<String>,
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct JobResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: JobId,
    #[schema(value_type = String, format = "uuid")]
    pub team_id: TeamId,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub user_id: Option<UserId>,
    pub job_type: String,
    pub status: JobStatus,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub error_message: Option<String>,
    /// Group names this job has called so far, in first-use order
    pub model_groups_used: Vec<String>,
    pub credit_applied: bool,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<JobDBResponse> for JobResponse {
    fn from(job: JobDBResponse) -> Self {
        Self {
            id: job.id,
            team_id: job.team_id,
            user_id: job.user_id,
            job_type: job.job_type,
            status: job.status,
            metadata: job.metadata,
            error_message: job.error_message,
            model_groups_used: job.model_groups_used,
            credit_applied: job.credit_applied,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompletionSummaryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub job_id: JobId,
    pub status: JobStatus,
    pub total_calls: i64,
    pub successful_calls: i64,
    pub failed_calls: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    /// Total upstream cost (returned as string to preserve precision)
    #[schema(value_type = String)]
    pub total_cost: Decimal,
    pub avg_latency_ms: Option<f64>,
    pub credit_applied: bool,
    /// Team balance after this job's deduction, when one was applied
    pub credits_remaining: Option<i64>,
    pub error_message: Option<String>,
}

impl From<CompletionSummary> for CompletionSummaryResponse {
    fn from(summary: CompletionSummary) -> Self {
        Self {
            job_id: summary.job_id,
            status: summary.status,
            total_calls: summary.total_calls,
            successful_calls: summary.successful_calls,
            failed_calls: summary.failed_calls,
            prompt_tokens: summary.prompt_tokens,
            completion_tokens: summary.completion_tokens,
            total_tokens: summary.total_tokens,
            total_cost: summary.total_cost,
            avg_latency_ms: summary.avg_latency_ms,
            credit_applied: summary.credit_applied,
            credits_remaining: summary.credits_remaining,
            error_message: summary.error_message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LlmCallResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: LlmCallId,
    #[schema(value_type = String, format = "uuid")]
    pub job_id: JobId,
    pub model_group: String,
    pub resolved_model: Option<String>,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    /// Cost (returned as string to preserve precision)
    #[schema(value_type = String)]
    pub cost: Decimal,
    pub latency_ms: i64,
    pub purpose: Option<String>,
    pub succeeded: bool,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<LlmCallDBResponse> for LlmCallResponse {
    fn from(call: LlmCallDBResponse) -> Self {
        Self {
            id: call.id,
            job_id: call.job_id,
            model_group: call.model_group,
            resolved_model: call.resolved_model,
            prompt_tokens: call.prompt_tokens,
            completion_tokens: call.completion_tokens,
            total_tokens: call.total_tokens,
            cost: call.cost,
            latency_ms: call.latency_ms,
            purpose: call.purpose,
            succeeded: call.succeeded,
            error_message: call.error_message,
            created_at: call.created_at,
        }
    }
}

/// Query parameters for listing jobs
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListJobsQuery {
    /// Filter by owning team
    #[param(value_type = Option<String>, format = "uuid")]
    pub team_id: Option<TeamId>,
    /// Filter by status
    pub status: Option<JobStatus>,
    /// Number of items to skip
    #[serde(default)]
    pub skip: i64,
    /// Maximum items to return
    #[serde(default = "default_limit")]
    pub limit: i64,
}

pub(crate) fn default_limit() -> i64 {
    50
}
