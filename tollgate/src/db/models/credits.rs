//! Database models for the per-team credit ledger and its audit log.

use crate::types::{JobId, TeamId, TransactionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Credit transaction type enum stored as TEXT in database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, ToSchema)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditTransactionType {
    Allocation,
    Deduction,
    Refund,
    Adjustment,
}

/// Snapshot of one team's ledger account. `remaining` is always computed
/// from allocated/used at read time; there is no stored column for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamCreditDBResponse {
    pub team_id: TeamId,
    pub credits_allocated: i64,
    pub credits_used: i64,
    /// Overdraft bound: when set, deductions may drive the balance down to
    /// `-hard_limit` instead of failing at zero.
    pub hard_limit: Option<i64>,
    pub auto_refill_amount: Option<i64>,
    pub auto_refill_period_secs: Option<i64>,
    pub last_refill_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TeamCreditDBResponse {
    pub fn remaining(&self) -> i64 {
        self.credits_allocated - self.credits_used
    }
}

/// Database response for one audit log entry
#[derive(Debug, Clone)]
pub struct CreditTransactionDBResponse {
    pub id: TransactionId,
    pub team_id: TeamId,
    pub transaction_type: CreditTransactionType,
    pub amount: i64,
    pub remaining_before: i64,
    pub remaining_after: i64,
    pub job_id: Option<JobId>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Filter for listing credit transactions
#[derive(Debug, Clone)]
pub struct CreditTransactionFilter {
    pub team_id: Option<TeamId>,
    pub skip: i64,
    pub limit: i64,
}

impl CreditTransactionFilter {
    pub fn new(team_id: Option<TeamId>, skip: i64, limit: i64) -> Self {
        Self { team_id, skip, limit }
    }
}
