//! Database models for recorded upstream LLM calls.
//!
//! Calls are written the instant the upstream attempt returns, success or
//! failure, and are never updated afterwards.

use crate::types::{JobId, LlmCallId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

/// Database request for recording one upstream call attempt
#[derive(Debug, Clone, bon::Builder)]
pub struct LlmCallCreateDBRequest {
    /// Logical group the caller asked for.
    pub model_group: String,
    /// Concrete model that served (or failed) the attempt. `None` when every
    /// candidate was exhausted before any model answered.
    pub resolved_model: Option<String>,
    #[builder(default = 0)]
    pub prompt_tokens: i32,
    #[builder(default = 0)]
    pub completion_tokens: i32,
    #[builder(default = 0)]
    pub total_tokens: i32,
    /// Cost in provider currency units, as reported by the upstream
    /// collaborator. The engine never computes pricing itself.
    #[builder(default = Decimal::ZERO)]
    pub cost: Decimal,
    #[builder(default = 0)]
    pub latency_ms: i64,
    pub purpose: Option<String>,
    pub succeeded: bool,
    pub error_message: Option<String>,
    pub request_snapshot: Option<serde_json::Value>,
    pub response_snapshot: Option<serde_json::Value>,
}

/// Database response for a recorded call
#[derive(Debug, Clone)]
pub struct LlmCallDBResponse {
    pub id: LlmCallId,
    pub job_id: JobId,
    pub model_group: String,
    pub resolved_model: Option<String>,
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
    pub cost: Decimal,
    pub latency_ms: i64,
    pub purpose: Option<String>,
    pub succeeded: bool,
    pub error_message: Option<String>,
    pub request_snapshot: Option<serde_json::Value>,
    pub response_snapshot: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}
