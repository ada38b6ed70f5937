//! HTTP handlers for the credit ledger.

use crate::{
    AppState,
    api::models::credits::{
        AdjustmentCreate, AllocationCreate, BalanceResponse, CreditTransactionResponse, DeductionCreate,
        ListTransactionsQuery, RefillPolicyUpdate, RefundCreate,
    },
    db::{handlers::Credits, models::credits::CreditTransactionFilter},
    errors::{Error, Result},
    types::TeamId,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

/// Get a team's balance
#[utoipa::path(
    get,
    path = "/teams/{team_id}/credits",
    tag = "credits",
    summary = "Get a team's credit balance",
    description = "Remaining is always computed as allocated minus used. Teams that were never allocated anything read as zero.",
    params(("team_id" = String, Path, format = "uuid", description = "Team ID")),
    responses(
        (status = 200, description = "Balance", body = BalanceResponse),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_balance(State(state): State<AppState>, Path(team_id): Path<TeamId>) -> Result<Json<BalanceResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let account = Credits::new(&mut conn).balance(team_id).await?;

    Ok(Json(
        account.map(BalanceResponse::from).unwrap_or_else(|| BalanceResponse::empty(team_id)),
    ))
}

/// Allocate credits
#[utoipa::path(
    post,
    path = "/teams/{team_id}/credits/allocations",
    tag = "credits",
    summary = "Grant credits to a team",
    params(("team_id" = String, Path, format = "uuid", description = "Team ID")),
    request_body = AllocationCreate,
    responses(
        (status = 201, description = "Allocation recorded", body = CreditTransactionResponse),
        (status = 400, description = "Amount must be positive"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_allocation(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    Json(data): Json<AllocationCreate>,
) -> Result<(StatusCode, Json<CreditTransactionResponse>)> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transaction = Credits::new(&mut conn)
        .allocate(team_id, data.amount, data.description.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(CreditTransactionResponse::from(transaction))))
}

/// Deduct credits
#[utoipa::path(
    post,
    path = "/teams/{team_id}/credits/deductions",
    tag = "credits",
    summary = "Consume credits from a team's balance",
    description = "Administrative deduction outside the job flow. Fails with 402 when the remaining balance \
                   cannot cover the amount and no hard limit permits the overdraft.",
    params(("team_id" = String, Path, format = "uuid", description = "Team ID")),
    request_body = DeductionCreate,
    responses(
        (status = 201, description = "Deduction recorded", body = CreditTransactionResponse),
        (status = 400, description = "Amount must be positive"),
        (status = 402, description = "Insufficient credit"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_deduction(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    Json(data): Json<DeductionCreate>,
) -> Result<(StatusCode, Json<CreditTransactionResponse>)> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transaction = Credits::new(&mut conn)
        .deduct(team_id, data.amount, data.job_id, data.description.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(CreditTransactionResponse::from(transaction))))
}

/// Refund credits
#[utoipa::path(
    post,
    path = "/teams/{team_id}/credits/refunds",
    tag = "credits",
    summary = "Return previously-used credits to a team",
    params(("team_id" = String, Path, format = "uuid", description = "Team ID")),
    request_body = RefundCreate,
    responses(
        (status = 201, description = "Refund recorded", body = CreditTransactionResponse),
        (status = 400, description = "Amount must be positive"),
        (status = 404, description = "Team has no ledger account"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_refund(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    Json(data): Json<RefundCreate>,
) -> Result<(StatusCode, Json<CreditTransactionResponse>)> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transaction = Credits::new(&mut conn)
        .refund(team_id, data.amount, data.job_id, data.description.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(CreditTransactionResponse::from(transaction))))
}

/// Adjust allocated credits
#[utoipa::path(
    post,
    path = "/teams/{team_id}/credits/adjustments",
    tag = "credits",
    summary = "Administratively adjust a team's allocated total",
    params(("team_id" = String, Path, format = "uuid", description = "Team ID")),
    request_body = AdjustmentCreate,
    responses(
        (status = 201, description = "Adjustment recorded", body = CreditTransactionResponse),
        (status = 400, description = "Delta must be non-zero and keep the allocation non-negative"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_adjustment(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    Json(data): Json<AdjustmentCreate>,
) -> Result<(StatusCode, Json<CreditTransactionResponse>)> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transaction = Credits::new(&mut conn)
        .adjust(team_id, data.delta, data.description.as_deref())
        .await?;

    Ok((StatusCode::CREATED, Json(CreditTransactionResponse::from(transaction))))
}

/// Set or clear a team's auto-refill policy
#[utoipa::path(
    put,
    path = "/teams/{team_id}/credits/refill-policy",
    tag = "credits",
    summary = "Set or clear a team's periodic auto-refill policy",
    params(("team_id" = String, Path, format = "uuid", description = "Team ID")),
    request_body = RefillPolicyUpdate,
    responses(
        (status = 200, description = "Balance with the new policy", body = BalanceResponse),
        (status = 400, description = "Amount and period must be set together"),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn set_refill_policy(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    Json(data): Json<RefillPolicyUpdate>,
) -> Result<Json<BalanceResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let account = Credits::new(&mut conn)
        .set_refill_policy(team_id, data.amount, data.period.map(|p| p.as_secs() as i64))
        .await?;

    Ok(Json(BalanceResponse::from(account)))
}

/// List a team's transactions
#[utoipa::path(
    get,
    path = "/teams/{team_id}/transactions",
    tag = "credits",
    summary = "List a team's credit transactions, newest first",
    params(
        ("team_id" = String, Path, format = "uuid", description = "Team ID"),
        ListTransactionsQuery,
    ),
    responses(
        (status = 200, description = "Audit entries", body = Vec<CreditTransactionResponse>),
        (status = 500, description = "Internal server error"),
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_team_transactions(
    State(state): State<AppState>,
    Path(team_id): Path<TeamId>,
    Query(query): Query<ListTransactionsQuery>,
) -> Result<Json<Vec<CreditTransactionResponse>>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let transactions = Credits::new(&mut conn)
        .list_transactions(&CreditTransactionFilter::new(Some(team_id), query.skip, query.limit))
        .await?;

    Ok(Json(transactions.into_iter().map(CreditTransactionResponse::from).collect()))
}
