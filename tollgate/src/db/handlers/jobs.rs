//! Database repository for the job lifecycle.
//!
//! Jobs move `pending → in_progress → {completed, failed}`. Both mutation
//! paths (`record_call`, `complete`) take the job's row lock first, which is
//! the per-job mutual-exclusion boundary: concurrent completions serialize
//! there, so the `credit_applied` read-then-write guard can never double
//! deduct.

use crate::db::{
    errors::{DbError, Result},
    handlers::{credits::Credits, llm_calls::{CallAggregates, LlmCalls}},
    models::{
        jobs::{CompletionSummary, JobCompleteDBRequest, JobCreateDBRequest, JobDBResponse, JobStatus},
        llm_calls::{LlmCallCreateDBRequest, LlmCallDBResponse},
    },
};
use crate::types::{JobId, TeamId, UserId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, PgConnection, query_builder::QueryBuilder};
use tracing::instrument;

/// Filter options for listing jobs
#[derive(Debug, Clone)]
pub struct JobFilter {
    pub skip: i64,
    pub limit: i64,
    pub team_id: Option<TeamId>,
    pub status: Option<JobStatus>,
}

impl JobFilter {
    pub fn new(skip: i64, limit: i64) -> Self {
        Self {
            skip,
            limit,
            team_id: None,
            status: None,
        }
    }

    pub fn with_team(mut self, team_id: TeamId) -> Self {
        self.team_id = Some(team_id);
        self
    }

    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }
}

// Database entity model
#[derive(Debug, Clone, FromRow)]
struct JobRow {
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

impl From<JobRow> for JobDBResponse {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            team_id: row.team_id,
            user_id: row.user_id,
            job_type: row.job_type,
            status: row.status,
            metadata: row.metadata,
            error_message: row.error_message,
            model_groups_used: row.model_groups_used,
            credit_applied: row.credit_applied,
            created_at: row.created_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        }
    }
}

pub struct Jobs<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Jobs<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Open a new job in `pending` with no credit applied.
    #[instrument(skip(self, request), fields(team_id = %abbrev_uuid(&request.team_id), job_type = %request.job_type), err)]
    pub async fn create(&mut self, request: &JobCreateDBRequest) -> Result<JobDBResponse> {
        if request.job_type.trim().is_empty() {
            return Err(DbError::InvalidModelField { field: "job_type" });
        }

        let row: JobRow = sqlx::query_as(
            r#"
            INSERT INTO jobs (team_id, user_id, job_type, metadata)
            VALUES ($1, $2, $3, COALESCE($4, '{}'::jsonb))
            RETURNING *
            "#,
        )
        .bind(request.team_id)
        .bind(request.user_id)
        .bind(request.job_type.trim())
        .bind(request.metadata.as_ref())
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row.into())
    }

    #[instrument(skip(self), fields(job_id = %abbrev_uuid(&id)), err)]
    pub async fn get_by_id(&mut self, id: JobId) -> Result<Option<JobDBResponse>> {
        let row: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(row.map(JobDBResponse::from))
    }

    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    pub async fn list(&mut self, filter: &JobFilter) -> Result<Vec<JobDBResponse>> {
        let mut query = QueryBuilder::new("SELECT * FROM jobs WHERE 1=1");

        if let Some(team_id) = filter.team_id {
            query.push(" AND team_id = ");
            query.push_bind(team_id);
        }

        if let Some(status) = filter.status {
            query.push(" AND status = ");
            query.push_bind(status);
        }

        query.push(" ORDER BY created_at DESC LIMIT ");
        query.push_bind(filter.limit);
        query.push(" OFFSET ");
        query.push_bind(filter.skip);

        let rows = query.build_query_as::<JobRow>().fetch_all(&mut *self.db).await?;

        Ok(rows.into_iter().map(JobDBResponse::from).collect())
    }

    /// Record one upstream call attempt against a job.
    ///
    /// Transitions `pending → in_progress` on the first recorded call and
    /// appends the requested group name to `model_groups_used` if new. The
    /// attempt itself may have failed upstream; it is recorded either way.
    /// Fails with [`DbError::JobAlreadyTerminal`] once the job is terminal.
    #[instrument(skip(self, request), fields(job_id = %abbrev_uuid(&job_id), model_group = %request.model_group, succeeded = request.succeeded), err)]
    pub async fn record_call(&mut self, job_id: JobId, request: &LlmCallCreateDBRequest) -> Result<LlmCallDBResponse> {
        let mut tx = self.db.begin().await?;

        let job: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(job) = job else {
            return Err(DbError::NotFound);
        };

        if job.status.is_terminal() {
            return Err(DbError::JobAlreadyTerminal {
                job_id,
                status: job.status,
            });
        }

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = CASE WHEN status = 'pending' THEN 'in_progress' ELSE status END,
                started_at = COALESCE(started_at, NOW()),
                model_groups_used = CASE WHEN $2 = ANY(model_groups_used) THEN model_groups_used
                                         ELSE array_append(model_groups_used, $2) END
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(&request.model_group)
        .execute(&mut *tx)
        .await?;

        let call = {
            let mut calls = LlmCalls::new(&mut tx);
            calls.append(job_id, request).await?
        };

        tx.commit().await?;
        Ok(call)
    }

    /// Complete a job with a terminal status and settle its credit.
    ///
    /// Already-terminal jobs are not an error: the previously computed
    /// summary is returned again and the ledger is left alone. Otherwise the
    /// job is finalized and, iff the status is `completed` with zero failed
    /// calls and no credit applied yet, exactly one credit is deducted from
    /// the owning team inside the same transaction. A deduction rejected for
    /// insufficient credit is reported through the summary, never retried,
    /// and does not block completion.
    #[instrument(skip(self, request), fields(job_id = %abbrev_uuid(&job_id), status = ?request.status), err)]
    pub async fn complete(&mut self, job_id: JobId, request: &JobCompleteDBRequest) -> Result<CompletionSummary> {
        let mut tx = self.db.begin().await?;

        let job: Option<JobRow> = sqlx::query_as("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(job) = job else {
            return Err(DbError::NotFound);
        };

        let aggregates = {
            let mut calls = LlmCalls::new(&mut tx);
            calls.aggregates(job_id).await?
        };

        if job.status.is_terminal() {
            // Idempotent replay. The call rows are append-only and the job
            // is frozen, so the aggregates are identical to the first
            // completion; the balance comes from the original deduction's
            // audit row rather than the live ledger.
            let deduction = {
                let mut credits = Credits::new(&mut tx);
                credits.deduction_for_job(job_id).await?
            };
            tx.commit().await?;
            let remaining = if job.credit_applied {
                deduction.map(|t| t.remaining_after)
            } else {
                None
            };
            return Ok(Self::summary(&job, &aggregates, job.credit_applied, remaining));
        }

        let status: JobStatus = request.status.into();
        let updated: JobRow = sqlx::query_as(
            r#"
            UPDATE jobs
            SET status = $2,
                completed_at = NOW(),
                metadata = metadata || COALESCE($3, '{}'::jsonb),
                error_message = COALESCE($4, error_message)
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(status)
        .bind(request.metadata_patch.as_ref())
        .bind(request.error_message.as_deref())
        .fetch_one(&mut *tx)
        .await?;

        let mut credit_applied = false;
        let mut remaining = None;
        if status == JobStatus::Completed && aggregates.failed_calls == 0 && !job.credit_applied {
            let deduction = {
                let mut credits = Credits::new(&mut tx);
                credits
                    .deduct(job.team_id, 1, Some(job_id), Some("job completion"))
                    .await
            };
            match deduction {
                Ok(transaction) => {
                    sqlx::query("UPDATE jobs SET credit_applied = TRUE WHERE id = $1")
                        .bind(job_id)
                        .execute(&mut *tx)
                        .await?;
                    credit_applied = true;
                    remaining = Some(transaction.remaining_after);
                }
                Err(DbError::InsufficientCredit {
                    remaining: have,
                    requested,
                    ..
                }) => {
                    // The job still completes; the shortfall is reported in
                    // the summary and left for the billing surface to act on.
                    tracing::warn!(
                        team_id = %abbrev_uuid(&job.team_id),
                        have,
                        requested,
                        "completed job without credit deduction: insufficient credit"
                    );
                }
                Err(other) => return Err(other),
            }
        }

        tx.commit().await?;
        Ok(Self::summary(&updated, &aggregates, credit_applied, remaining))
    }

    fn summary(
        job: &JobRow,
        aggregates: &CallAggregates,
        credit_applied: bool,
        credits_remaining: Option<i64>,
    ) -> CompletionSummary {
        CompletionSummary {
            job_id: job.id,
            status: job.status,
            total_calls: aggregates.total_calls,
            successful_calls: aggregates.successful_calls,
            failed_calls: aggregates.failed_calls,
            prompt_tokens: aggregates.prompt_tokens,
            completion_tokens: aggregates.completion_tokens,
            total_tokens: aggregates.total_tokens,
            total_cost: aggregates.total_cost,
            avg_latency_ms: aggregates.avg_latency_ms,
            credit_applied,
            credits_remaining,
            error_message: job.error_message.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::jobs::CompletionStatus;
    use rust_decimal::Decimal;
    use sqlx::PgPool;
    use uuid::Uuid;

    async fn create_job(pool: &PgPool, team_id: TeamId) -> JobDBResponse {
        let mut conn = pool.acquire().await.unwrap();
        let request = JobCreateDBRequest::builder()
            .team_id(team_id)
            .job_type("chat".to_string())
            .build();
        Jobs::new(&mut conn).create(&request).await.unwrap()
    }

    async fn allocate(pool: &PgPool, team_id: TeamId, amount: i64) {
        let mut conn = pool.acquire().await.unwrap();
        Credits::new(&mut conn).allocate(team_id, amount, None).await.unwrap();
    }

    fn successful_call(prompt: i32, completion: i32, cost: &str) -> LlmCallCreateDBRequest {
        LlmCallCreateDBRequest::builder()
            .model_group("default".to_string())
            .resolved_model("upstream-model".to_string())
            .prompt_tokens(prompt)
            .completion_tokens(completion)
            .total_tokens(prompt + completion)
            .cost(cost.parse::<Decimal>().unwrap())
            .latency_ms(120)
            .succeeded(true)
            .build()
    }

    fn failed_call() -> LlmCallCreateDBRequest {
        LlmCallCreateDBRequest::builder()
            .model_group("default".to_string())
            .resolved_model("upstream-model".to_string())
            .succeeded(false)
            .error_message("upstream returned status 500".to_string())
            .build()
    }

    fn complete_request(status: CompletionStatus) -> JobCompleteDBRequest {
        JobCompleteDBRequest::builder().status(status).build()
    }

    #[sqlx::test]
    #[test_log::test]
    async fn create_initializes_pending_without_credit(pool: PgPool) {
        let job = create_job(&pool, Uuid::new_v4()).await;
        assert_eq!(job.status, JobStatus::Pending);
        assert!(!job.credit_applied);
        assert!(job.started_at.is_none());
        assert!(job.model_groups_used.is_empty());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn record_call_starts_job_and_tracks_groups(pool: PgPool) {
        let job = create_job(&pool, Uuid::new_v4()).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        jobs.record_call(job.id, &successful_call(10, 20, "0.01")).await.unwrap();
        let mut second = successful_call(5, 5, "0.002");
        second.model_group = "cheap".to_string();
        jobs.record_call(job.id, &second).await.unwrap();
        // Same group again: no duplicate entry.
        jobs.record_call(job.id, &successful_call(1, 1, "0.001")).await.unwrap();

        let job = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::InProgress);
        assert!(job.started_at.is_some());
        assert_eq!(job.model_groups_used, vec!["default".to_string(), "cheap".to_string()]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn record_call_keeps_failed_attempts(pool: PgPool) {
        let job = create_job(&pool, Uuid::new_v4()).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        jobs.record_call(job.id, &failed_call()).await.unwrap();

        let mut calls = LlmCalls::new(&mut conn);
        let recorded = calls.list_for_job(job.id).await.unwrap();
        assert_eq!(recorded.len(), 1);
        assert!(!recorded[0].succeeded);
        assert_eq!(recorded[0].error_message.as_deref(), Some("upstream returned status 500"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn record_call_rejected_once_terminal(pool: PgPool) {
        let team_id = Uuid::new_v4();
        allocate(&pool, team_id, 10).await;
        let job = create_job(&pool, team_id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        jobs.record_call(job.id, &successful_call(1, 1, "0.001")).await.unwrap();
        jobs.complete(job.id, &complete_request(CompletionStatus::Completed)).await.unwrap();

        let err = jobs.record_call(job.id, &successful_call(1, 1, "0.001")).await.unwrap_err();
        assert!(matches!(
            err,
            DbError::JobAlreadyTerminal {
                status: JobStatus::Completed,
                ..
            }
        ));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn completed_clean_job_deducts_exactly_one_credit(pool: PgPool) {
        let team_id = Uuid::new_v4();
        allocate(&pool, team_id, 100).await;
        let job = create_job(&pool, team_id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        jobs.record_call(job.id, &successful_call(10, 20, "0.01")).await.unwrap();
        let summary = jobs.complete(job.id, &complete_request(CompletionStatus::Completed)).await.unwrap();

        assert_eq!(summary.total_calls, 1);
        assert_eq!(summary.successful_calls, 1);
        assert_eq!(summary.failed_calls, 0);
        assert_eq!(summary.prompt_tokens, 10);
        assert_eq!(summary.completion_tokens, 20);
        assert_eq!(summary.total_tokens, 30);
        assert_eq!(summary.total_cost, "0.01".parse::<Decimal>().unwrap());
        assert!(summary.credit_applied);
        assert_eq!(summary.credits_remaining, Some(99));

        let job = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.credit_applied);
        assert!(job.completed_at.is_some());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn any_failed_call_withholds_credit(pool: PgPool) {
        let team_id = Uuid::new_v4();
        allocate(&pool, team_id, 100).await;
        let job = create_job(&pool, team_id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        jobs.record_call(job.id, &successful_call(10, 20, "0.01")).await.unwrap();
        jobs.record_call(job.id, &failed_call()).await.unwrap();
        let summary = jobs.complete(job.id, &complete_request(CompletionStatus::Completed)).await.unwrap();

        assert_eq!(summary.failed_calls, 1);
        assert!(!summary.credit_applied);
        assert_eq!(summary.credits_remaining, None);

        // Balance untouched.
        let account = Credits::new(&mut conn).balance(team_id).await.unwrap().unwrap();
        assert_eq!(account.remaining(), 100);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn failed_status_never_deducts(pool: PgPool) {
        let team_id = Uuid::new_v4();
        allocate(&pool, team_id, 100).await;
        let job = create_job(&pool, team_id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        jobs.record_call(job.id, &successful_call(10, 20, "0.01")).await.unwrap();
        let request = JobCompleteDBRequest::builder()
            .status(CompletionStatus::Failed)
            .error_message("downstream validation failed".to_string())
            .build();
        let summary = jobs.complete(job.id, &request).await.unwrap();

        assert_eq!(summary.status, JobStatus::Failed);
        assert!(!summary.credit_applied);
        assert_eq!(summary.error_message.as_deref(), Some("downstream validation failed"));

        let account = Credits::new(&mut conn).balance(team_id).await.unwrap().unwrap();
        assert_eq!(account.remaining(), 100);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn insufficient_credit_still_completes(pool: PgPool) {
        let team_id = Uuid::new_v4();
        // No allocation: remaining balance is zero.
        let job = create_job(&pool, team_id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        jobs.record_call(job.id, &successful_call(10, 20, "0.01")).await.unwrap();
        let summary = jobs.complete(job.id, &complete_request(CompletionStatus::Completed)).await.unwrap();

        assert!(!summary.credit_applied);
        assert_eq!(summary.credits_remaining, None);

        let job = jobs.get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(!job.credit_applied);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn completion_is_idempotent(pool: PgPool) {
        let team_id = Uuid::new_v4();
        allocate(&pool, team_id, 100).await;
        let job = create_job(&pool, team_id).await;
        let mut conn = pool.acquire().await.unwrap();
        let mut jobs = Jobs::new(&mut conn);

        jobs.record_call(job.id, &successful_call(10, 20, "0.01")).await.unwrap();
        let first = jobs.complete(job.id, &complete_request(CompletionStatus::Completed)).await.unwrap();
        let second = jobs.complete(job.id, &complete_request(CompletionStatus::Completed)).await.unwrap();

        assert_eq!(first, second);

        // Exactly one deduction ever happened.
        let mut credits = Credits::new(&mut conn);
        let account = credits.balance(team_id).await.unwrap().unwrap();
        assert_eq!(account.remaining(), 99);
        let deduction = credits.deduction_for_job(job.id).await.unwrap();
        assert!(deduction.is_some());
    }

    #[sqlx::test]
    #[test_log::test]
    async fn metadata_patch_overwrites_colliding_keys(pool: PgPool) {
        let team_id = Uuid::new_v4();
        let mut conn = pool.acquire().await.unwrap();
        let request = JobCreateDBRequest::builder()
            .team_id(team_id)
            .job_type("chat".to_string())
            .metadata(serde_json::json!({"source": "api", "attempt": 1}))
            .build();
        let job = Jobs::new(&mut conn).create(&request).await.unwrap();

        let complete = JobCompleteDBRequest::builder()
            .status(CompletionStatus::Failed)
            .metadata_patch(serde_json::json!({"attempt": 2, "reviewed": true}))
            .build();
        Jobs::new(&mut conn).complete(job.id, &complete).await.unwrap();

        let job = Jobs::new(&mut conn).get_by_id(job.id).await.unwrap().unwrap();
        assert_eq!(
            job.metadata,
            serde_json::json!({"source": "api", "attempt": 2, "reviewed": true})
        );
    }

    #[sqlx::test]
    #[test_log::test]
    async fn concurrent_recorded_calls_are_never_lost(pool: PgPool) {
        let job = create_job(&pool, Uuid::new_v4()).await;

        let mut handles = Vec::new();
        for i in 0..16 {
            let pool = pool.clone();
            let job_id = job.id;
            handles.push(tokio::spawn(async move {
                let mut conn = pool.acquire().await.unwrap();
                let call = successful_call(i, i, "0.001");
                Jobs::new(&mut conn).record_call(job_id, &call).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let mut conn = pool.acquire().await.unwrap();
        let calls = LlmCalls::new(&mut conn).list_for_job(job.id).await.unwrap();
        assert_eq!(calls.len(), 16);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn racing_completions_deduct_once(pool: PgPool) {
        let team_id = Uuid::new_v4();
        allocate(&pool, team_id, 100).await;
        let job = create_job(&pool, team_id).await;
        {
            let mut conn = pool.acquire().await.unwrap();
            Jobs::new(&mut conn)
                .record_call(job.id, &successful_call(10, 20, "0.01"))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let job_id = job.id;
            handles.push(tokio::spawn(async move {
                let mut conn = pool.acquire().await.unwrap();
                Jobs::new(&mut conn)
                    .complete(job_id, &complete_request(CompletionStatus::Completed))
                    .await
            }));
        }

        let mut summaries = Vec::new();
        for handle in handles {
            summaries.push(handle.await.unwrap().unwrap());
        }

        // Every racer saw the same settled summary.
        for summary in &summaries {
            assert_eq!(summary, &summaries[0]);
            assert!(summary.credit_applied);
            assert_eq!(summary.credits_remaining, Some(99));
        }

        // And exactly one deduction audit row exists.
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM credit_transactions WHERE job_id = $1 AND transaction_type = 'deduction'",
        )
        .bind(job.id)
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 1);

        let account = {
            let mut conn = pool.acquire().await.unwrap();
            Credits::new(&mut conn).balance(team_id).await.unwrap().unwrap()
        };
        assert_eq!(account.remaining(), 99);
    }
}
