//! HTTP handlers for the job lifecycle.

use crate::{
    AppState,
    api::models::jobs::{CompletionSummaryResponse, JobComplete, JobCreate, JobResponse, ListJobsQuery, LlmCallResponse},
    db::{
        handlers::{JobFilter, Jobs, LlmCalls},
        models::jobs::{JobCompleteDBRequest, JobCreateDBRequest},
    },
    errors::{Error, Result},
    types::JobId,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

/// Open a new job
#[utoipa::path(
    post,
    path = "/jobs",
    tag = "jobs",
    summary = "Create a job",
    description = "Open a new billable unit of work for a team. The job starts in `pending` with no credit applied.",
    request_body = JobCreate,
    responses(
        (status = 201, description = "Job created", body = JobResponse),
        (status = 400, description = "Bad request - missing or invalid fields"),
        (status = 403, description = "Team is suspended or unknown"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_job(State(state): State<AppState>, Json(data): Json<JobCreate>) -> Result<(StatusCode, Json<JobResponse>)> {
    if !state.team_gate.is_active(data.team_id).await? {
        return Err(Error::TeamInactive { team_id: data.team_id });
    }

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut jobs = Jobs::new(&mut conn);

    let request = JobCreateDBRequest::builder()
        .team_id(data.team_id)
        .maybe_user_id(data.user_id)
        .job_type(data.job_type)
        .maybe_metadata(data.metadata)
        .build();

    let job = jobs.create(&request).await?;
    Ok((StatusCode::CREATED, Json(JobResponse::from(job))))
}

/// Get a job by ID
#[utoipa::path(
    get,
    path = "/jobs/{job_id}",
    tag = "jobs",
    summary = "Get a job",
    params(("job_id" = String, Path, format = "uuid", description = "Job ID")),
    responses(
        (status = 200, description = "Job details", body = JobResponse),
        (status = 404, description = "Job not found"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<JobId>) -> Result<Json<JobResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut jobs = Jobs::new(&mut conn);

    let job = jobs.get_by_id(job_id).await?.ok_or_else(|| Error::NotFound {
        resource: "Job".to_string(),
        id: job_id.to_string(),
    })?;

    Ok(Json(JobResponse::from(job)))
}

/// List jobs
#[utoipa::path(
    get,
    path = "/jobs",
    tag = "jobs",
    summary = "List jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "Jobs, newest first", body = Vec<JobResponse>),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_jobs(State(state): State<AppState>, Query(query): Query<ListJobsQuery>) -> Result<Json<Vec<JobResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut jobs = Jobs::new(&mut conn);

    let mut filter = JobFilter::new(query.skip, query.limit);
    if let Some(team_id) = query.team_id {
        filter = filter.with_team(team_id);
    }
    if let Some(status) = query.status {
        filter = filter.with_status(status);
    }

    let listed = jobs.list(&filter).await?;
    Ok(Json(listed.into_iter().map(JobResponse::from).collect()))
}

/// List a job's recorded calls
#[utoipa::path(
    get,
    path = "/jobs/{job_id}/calls",
    tag = "jobs",
    summary = "List a job's recorded upstream calls",
    params(("job_id" = String, Path, format = "uuid", description = "Job ID")),
    responses(
        (status = 200, description = "Recorded calls, oldest first", body = Vec<LlmCallResponse>),
        (status = 404, description = "Job not found"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_job_calls(State(state): State<AppState>, Path(job_id): Path<JobId>) -> Result<Json<Vec<LlmCallResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;

    let job = Jobs::new(&mut conn).get_by_id(job_id).await?;
    if job.is_none() {
        return Err(Error::NotFound {
            resource: "Job".to_string(),
            id: job_id.to_string(),
        });
    }

    let calls = LlmCalls::new(&mut conn).list_for_job(job_id).await?;
    Ok(Json(calls.into_iter().map(LlmCallResponse::from).collect()))
}

/// Complete a job
#[utoipa::path(
    post,
    path = "/jobs/{job_id}/completion",
    tag = "jobs",
    summary = "Complete a job",
    description = "Settle a job with a terminal status. Completing a clean `completed` job deducts exactly one credit \
                   from the owning team; repeating the call returns the same summary without a second deduction.",
    params(("job_id" = String, Path, format = "uuid", description = "Job ID")),
    request_body = JobComplete,
    responses(
        (status = 200, description = "Completion summary", body = CompletionSummaryResponse),
        (status = 404, description = "Job not found"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn complete_job(
    State(state): State<AppState>,
    Path(job_id): Path<JobId>,
    Json(data): Json<JobComplete>,
) -> Result<Json<CompletionSummaryResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut jobs = Jobs::new(&mut conn);

    let request = JobCompleteDBRequest::builder()
        .status(data.status)
        .maybe_metadata_patch(data.metadata)
        .maybe_error_message(data.error_message)
        .build();

    let summary = jobs.complete(job_id, &request).await?;
    Ok(Json(CompletionSummaryResponse::from(summary)))
}
