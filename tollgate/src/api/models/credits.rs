//! API request/response models for the credit ledger.

use crate::db::models::credits::{CreditTransactionDBResponse, CreditTransactionType, TeamCreditDBResponse};
use crate::types::{JobId, TeamId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::{IntoParams, ToSchema};

// Request models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AllocationCreate {
    /// Credits to grant (positive)
    pub amount: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DeductionCreate {
    /// Credits to consume (positive)
    pub amount: i64,
    /// Job this deduction relates to, for the audit trail
    #[schema(value_type = Option<String>, format = "uuid")]
    pub job_id: Option<JobId>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundCreate {
    /// Credits to return (positive; clamped to what was actually used)
    pub amount: i64,
    /// Job this refund relates to, for the audit trail
    #[schema(value_type = Option<String>, format = "uuid")]
    pub job_id: Option<JobId>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AdjustmentCreate {
    /// Signed change to the allocated total
    pub delta: i64,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefillPolicyUpdate {
    /// Credits granted per period; omit both fields to clear the policy
    pub amount: Option<i64>,
    /// Refill period (e.g. "1day", "12h")
    #[serde(default, with = "humantime_serde")]
    #[schema(value_type = Option<String>)]
    pub period: Option<Duration>,
}

// Response models
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    #[schema(value_type = String, format = "uuid")]
    pub team_id: TeamId,
    pub credits_allocated: i64,
    pub credits_used: i64,
    /// Always `allocated - used`; never stored independently
    pub credits_remaining: i64,
    pub hard_limit: Option<i64>,
    pub auto_refill_amount: Option<i64>,
    pub auto_refill_period_secs: Option<i64>,
}

impl BalanceResponse {
    /// Balance view for a team without a ledger account yet: all zeroes.
    pub fn empty(team_id: TeamId) -> Self {
        Self {
            team_id,
            credits_allocated: 0,
            credits_used: 0,
            credits_remaining: 0,
            hard_limit: None,
            auto_refill_amount: None,
            auto_refill_period_secs: None,
        }
    }
}

impl From<TeamCreditDBResponse> for BalanceResponse {
    fn from(account: TeamCreditDBResponse) -> Self {
        Self {
            team_id: account.team_id,
            credits_allocated: account.credits_allocated,
            credits_used: account.credits_used,
            credits_remaining: account.remaining(),
            hard_limit: account.hard_limit,
            auto_refill_amount: account.auto_refill_amount,
            auto_refill_period_secs: account.auto_refill_period_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreditTransactionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: TransactionId,
    #[schema(value_type = String, format = "uuid")]
    pub team_id: TeamId,
    pub transaction_type: CreditTransactionType,
    pub amount: i64,
    pub remaining_before: i64,
    pub remaining_after: i64,
    #[schema(value_type = Option<String>, format = "uuid")]
    pub job_id: Option<JobId>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<CreditTransactionDBResponse> for CreditTransactionResponse {
    fn from(tx: CreditTransactionDBResponse) -> Self {
        Self {
            id: tx.id,
            team_id: tx.team_id,
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            remaining_before: tx.remaining_before,
            remaining_after: tx.remaining_after,
            job_id: tx.job_id,
            description: tx.description,
            created_at: tx.created_at,
        }
    }
}

/// Query parameters for listing transactions
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListTransactionsQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "super::jobs::default_limit")]
    pub limit: i64,
}
