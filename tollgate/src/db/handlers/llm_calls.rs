//! Database repository for recorded upstream calls.
//!
//! Rows are inserted through [`crate::db::handlers::Jobs::record_call`],
//! which owns the job-status transition; this repository covers the
//! append itself plus the read side (listing and the per-job aggregates
//! consumed by job completion).

use crate::db::{
    errors::Result,
    models::llm_calls::{LlmCallCreateDBRequest, LlmCallDBResponse},
};
use crate::types::{JobId, LlmCallId, abbrev_uuid};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgConnection};
use tracing::instrument;

// Database entity model for a recorded call
#[derive(Debug, Clone, FromRow)]
struct LlmCallRow {
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

impl From<LlmCallRow> for LlmCallDBResponse {
    fn from(row: LlmCallRow) -> Self {
        Self {
            id: row.id,
            job_id: row.job_id,
            model_group: row.model_group,
            resolved_model: row.resolved_model,
            prompt_tokens: row.prompt_tokens,
            completion_tokens: row.completion_tokens,
            total_tokens: row.total_tokens,
            cost: row.cost,
            latency_ms: row.latency_ms,
            purpose: row.purpose,
            succeeded: row.succeeded,
            error_message: row.error_message,
            request_snapshot: row.request_snapshot,
            response_snapshot: row.response_snapshot,
            created_at: row.created_at,
        }
    }
}

/// Aggregate counts over one job's recorded calls.
#[derive(Debug, Clone, FromRow)]
pub struct CallAggregates {
    pub total_calls: i64,
    pub successful_calls: i64,
    pub failed_calls: i64,
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: Decimal,
    pub avg_latency_ms: Option<f64>,
}

pub struct LlmCalls<'c> {
    db: &'c mut PgConnection,
}

impl<'c> LlmCalls<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Append one recorded attempt. Callers are responsible for the job
    /// status transition; see [`crate::db::handlers::Jobs::record_call`].
    pub(crate) async fn append(&mut self, job_id: JobId, request: &LlmCallCreateDBRequest) -> Result<LlmCallDBResponse> {
        let row: LlmCallRow = sqlx::query_as(
            r#"
            INSERT INTO llm_calls
                (job_id, model_group, resolved_model, prompt_tokens, completion_tokens, total_tokens,
                 cost, latency_ms, purpose, succeeded, error_message, request_snapshot, response_snapshot)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(&request.model_group)
        .bind(request.resolved_model.as_deref())
        .bind(request.prompt_tokens)
        .bind(request.completion_tokens)
        .bind(request.total_tokens)
        .bind(request.cost)
        .bind(request.latency_ms)
        .bind(request.purpose.as_deref())
        .bind(request.succeeded)
        .bind(request.error_message.as_deref())
        .bind(request.request_snapshot.as_ref())
        .bind(request.response_snapshot.as_ref())
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row.into())
    }

    /// All recorded calls for a job, oldest first.
    #[instrument(skip(self), fields(job_id = %abbrev_uuid(&job_id)), err)]
    pub async fn list_for_job(&mut self, job_id: JobId) -> Result<Vec<LlmCallDBResponse>> {
        let rows: Vec<LlmCallRow> = sqlx::query_as("SELECT * FROM llm_calls WHERE job_id = $1 ORDER BY created_at, id")
            .bind(job_id)
            .fetch_all(&mut *self.db)
            .await?;

        Ok(rows.into_iter().map(LlmCallDBResponse::from).collect())
    }

    /// Aggregate counts, token sums, cost sum, and average latency over a
    /// job's calls. Failed calls count toward tokens and cost: upstream
    /// spend happened whether or not the attempt succeeded.
    #[instrument(skip(self), fields(job_id = %abbrev_uuid(&job_id)), err)]
    pub async fn aggregates(&mut self, job_id: JobId) -> Result<CallAggregates> {
        let aggregates: CallAggregates = sqlx::query_as(
            r#"
            SELECT COUNT(*) AS total_calls,
                   COUNT(*) FILTER (WHERE succeeded) AS successful_calls,
                   COUNT(*) FILTER (WHERE NOT succeeded) AS failed_calls,
                   COALESCE(SUM(prompt_tokens), 0)::BIGINT AS prompt_tokens,
                   COALESCE(SUM(completion_tokens), 0)::BIGINT AS completion_tokens,
                   COALESCE(SUM(total_tokens), 0)::BIGINT AS total_tokens,
                   COALESCE(SUM(cost), 0)::NUMERIC AS total_cost,
                   AVG(latency_ms)::DOUBLE PRECISION AS avg_latency_ms
            FROM llm_calls
            WHERE job_id = $1
            "#,
        )
        .bind(job_id)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(aggregates)
    }

}
