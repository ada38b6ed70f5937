//! Database repository for the per-team credit ledger.
//!
//! Every balance mutation runs in its own transaction on the wrapped
//! connection and appends exactly one audit row before committing. Callers
//! that are already inside a transaction (job completion) get savepoint
//! semantics: a failed deduction rolls back only itself.

use crate::db::{
    errors::{DbError, Result},
    models::credits::{
        CreditTransactionDBResponse, CreditTransactionFilter, CreditTransactionType, TeamCreditDBResponse,
    },
};
use crate::types::{JobId, TeamId, TransactionId, abbrev_uuid};
use chrono::{DateTime, Utc};
use sqlx::{Connection, FromRow, PgConnection};
use tracing::instrument;

// Database entity model for a ledger account row
#[derive(Debug, Clone, FromRow)]
struct TeamCreditRow {
    pub team_id: TeamId,
    pub credits_allocated: i64,
    pub credits_used: i64,
    pub hard_limit: Option<i64>,
    pub auto_refill_amount: Option<i64>,
    pub auto_refill_period_secs: Option<i64>,
    pub last_refill_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<TeamCreditRow> for TeamCreditDBResponse {
    fn from(row: TeamCreditRow) -> Self {
        Self {
            team_id: row.team_id,
            credits_allocated: row.credits_allocated,
            credits_used: row.credits_used,
            hard_limit: row.hard_limit,
            auto_refill_amount: row.auto_refill_amount,
            auto_refill_period_secs: row.auto_refill_period_secs,
            last_refill_at: row.last_refill_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

// Database entity model for an audit log row
#[derive(Debug, Clone, FromRow)]
struct CreditTransactionRow {
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

impl From<CreditTransactionRow> for CreditTransactionDBResponse {
    fn from(row: CreditTransactionRow) -> Self {
        Self {
            id: row.id,
            team_id: row.team_id,
            transaction_type: row.transaction_type,
            amount: row.amount,
            remaining_before: row.remaining_before,
            remaining_after: row.remaining_after,
            job_id: row.job_id,
            description: row.description,
            created_at: row.created_at,
        }
    }
}

pub struct Credits<'c> {
    db: &'c mut PgConnection,
}

impl<'c> Credits<'c> {
    pub fn new(db: &'c mut PgConnection) -> Self {
        Self { db }
    }

    /// Grant credits to a team, creating the ledger account on first use.
    #[instrument(skip(self, description), fields(team_id = %abbrev_uuid(&team_id), amount), err)]
    pub async fn allocate(
        &mut self,
        team_id: TeamId,
        amount: i64,
        description: Option<&str>,
    ) -> Result<CreditTransactionDBResponse> {
        if amount <= 0 {
            return Err(DbError::InvalidModelField { field: "amount" });
        }

        let mut tx = self.db.begin().await?;

        // The upsert takes the row lock itself, so before/after are consistent
        // with concurrent mutations on the same team.
        let row: TeamCreditRow = sqlx::query_as(
            r#"
            INSERT INTO team_credits (team_id, credits_allocated)
            VALUES ($1, $2)
            ON CONFLICT (team_id) DO UPDATE
                SET credits_allocated = team_credits.credits_allocated + EXCLUDED.credits_allocated,
                    updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(amount)
        .fetch_one(&mut *tx)
        .await?;

        let after = row.credits_allocated - row.credits_used;
        let transaction = Self::append_transaction(
            &mut tx,
            team_id,
            CreditTransactionType::Allocation,
            amount,
            after - amount,
            after,
            None,
            description,
        )
        .await?;

        tx.commit().await?;
        Ok(transaction)
    }

    /// Consume credits from a team's balance.
    ///
    /// Fails with [`DbError::InsufficientCredit`] when the remaining balance
    /// cannot cover `amount`; a configured `hard_limit` extends the floor to
    /// `-hard_limit`. The balance change and its audit row commit together.
    #[instrument(skip(self, description), fields(team_id = %abbrev_uuid(&team_id), amount), err)]
    pub async fn deduct(
        &mut self,
        team_id: TeamId,
        amount: i64,
        job_id: Option<JobId>,
        description: Option<&str>,
    ) -> Result<CreditTransactionDBResponse> {
        if amount <= 0 {
            return Err(DbError::InvalidModelField { field: "amount" });
        }

        let mut tx = self.db.begin().await?;

        // Row lock: mutations on the same team serialize here.
        let row: Option<TeamCreditRow> = sqlx::query_as("SELECT * FROM team_credits WHERE team_id = $1 FOR UPDATE")
            .bind(team_id)
            .fetch_optional(&mut *tx)
            .await?;

        let (remaining, floor) = match &row {
            Some(row) => (row.credits_allocated - row.credits_used, -row.hard_limit.unwrap_or(0)),
            // A team without a ledger account has nothing to spend.
            None => (0, 0),
        };

        if remaining - amount < floor {
            return Err(DbError::InsufficientCredit {
                team_id,
                remaining,
                requested: amount,
            });
        }

        sqlx::query("UPDATE team_credits SET credits_used = credits_used + $2, updated_at = NOW() WHERE team_id = $1")
            .bind(team_id)
            .bind(amount)
            .execute(&mut *tx)
            .await?;

        let transaction = Self::append_transaction(
            &mut tx,
            team_id,
            CreditTransactionType::Deduction,
            amount,
            remaining,
            remaining - amount,
            job_id,
            description,
        )
        .await?;

        tx.commit().await?;
        Ok(transaction)
    }

    /// Return previously-deducted credits to a team.
    ///
    /// The applied amount is clamped so `credits_used` never goes negative;
    /// the audit row records what was actually applied.
    #[instrument(skip(self, description), fields(team_id = %abbrev_uuid(&team_id), amount), err)]
    pub async fn refund(
        &mut self,
        team_id: TeamId,
        amount: i64,
        job_id: Option<JobId>,
        description: Option<&str>,
    ) -> Result<CreditTransactionDBResponse> {
        if amount <= 0 {
            return Err(DbError::InvalidModelField { field: "amount" });
        }

        let mut tx = self.db.begin().await?;

        let row: Option<TeamCreditRow> = sqlx::query_as("SELECT * FROM team_credits WHERE team_id = $1 FOR UPDATE")
            .bind(team_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(row) = row else {
            return Err(DbError::NotFound);
        };

        let remaining = row.credits_allocated - row.credits_used;
        let applied = amount.min(row.credits_used);

        sqlx::query("UPDATE team_credits SET credits_used = credits_used - $2, updated_at = NOW() WHERE team_id = $1")
            .bind(team_id)
            .bind(applied)
            .execute(&mut *tx)
            .await?;

        let transaction = Self::append_transaction(
            &mut tx,
            team_id,
            CreditTransactionType::Refund,
            applied,
            remaining,
            remaining + applied,
            job_id,
            description,
        )
        .await?;

        tx.commit().await?;
        Ok(transaction)
    }

    /// Administrative adjustment of the allocated total by `delta` (which
    /// may be negative). The only operation that can leave `used > allocated`
    /// aside from hard-limit deductions.
    #[instrument(skip(self, description), fields(team_id = %abbrev_uuid(&team_id), delta), err)]
    pub async fn adjust(
        &mut self,
        team_id: TeamId,
        delta: i64,
        description: Option<&str>,
    ) -> Result<CreditTransactionDBResponse> {
        if delta == 0 {
            return Err(DbError::InvalidModelField { field: "delta" });
        }

        let mut tx = self.db.begin().await?;

        // Negative adjustments below zero allocated trip the table's check
        // constraint and surface as DbError::CheckViolation.
        let row: TeamCreditRow = sqlx::query_as(
            r#"
            INSERT INTO team_credits (team_id, credits_allocated)
            VALUES ($1, $2)
            ON CONFLICT (team_id) DO UPDATE
                SET credits_allocated = team_credits.credits_allocated + $2,
                    updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(delta)
        .fetch_one(&mut *tx)
        .await?;

        let after = row.credits_allocated - row.credits_used;
        let transaction = Self::append_transaction(
            &mut tx,
            team_id,
            CreditTransactionType::Adjustment,
            delta,
            after - delta,
            after,
            None,
            description,
        )
        .await?;

        tx.commit().await?;
        Ok(transaction)
    }

    /// Pure read of a team's ledger account. `None` for teams that have
    /// never been allocated anything (their balance is zero).
    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn balance(&mut self, team_id: TeamId) -> Result<Option<TeamCreditDBResponse>> {
        let row: Option<TeamCreditRow> = sqlx::query_as("SELECT * FROM team_credits WHERE team_id = $1")
            .bind(team_id)
            .fetch_optional(&mut *self.db)
            .await?;

        Ok(row.map(TeamCreditDBResponse::from))
    }

    /// Configure (or clear) a team's periodic auto-refill policy.
    #[instrument(skip(self), fields(team_id = %abbrev_uuid(&team_id)), err)]
    pub async fn set_refill_policy(
        &mut self,
        team_id: TeamId,
        amount: Option<i64>,
        period_secs: Option<i64>,
    ) -> Result<TeamCreditDBResponse> {
        if amount.is_some() != period_secs.is_some() {
            return Err(DbError::InvalidModelField { field: "auto_refill" });
        }

        let row: TeamCreditRow = sqlx::query_as(
            r#"
            INSERT INTO team_credits (team_id, auto_refill_amount, auto_refill_period_secs)
            VALUES ($1, $2, $3)
            ON CONFLICT (team_id) DO UPDATE
                SET auto_refill_amount = $2,
                    auto_refill_period_secs = $3,
                    updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(amount)
        .bind(period_secs)
        .fetch_one(&mut *self.db)
        .await?;

        Ok(row.into())
    }

    /// Apply auto-refill allocations to every team whose period has elapsed.
    ///
    /// Rows already locked by a concurrent sweeper are skipped rather than
    /// waited on, so overlapping sweeps never double-refill.
    #[instrument(skip(self), err)]
    pub async fn run_due_refills(&mut self) -> Result<Vec<CreditTransactionDBResponse>> {
        let mut tx = self.db.begin().await?;

        let due: Vec<TeamCreditRow> = sqlx::query_as(
            r#"
            SELECT * FROM team_credits
            WHERE auto_refill_amount IS NOT NULL
              AND auto_refill_period_secs IS NOT NULL
              AND (last_refill_at IS NULL
                   OR last_refill_at + make_interval(secs => auto_refill_period_secs::double precision) <= NOW())
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_all(&mut *tx)
        .await?;

        let mut applied = Vec::with_capacity(due.len());
        for row in due {
            let amount = row.auto_refill_amount.unwrap_or(0);
            sqlx::query(
                r#"
                UPDATE team_credits
                SET credits_allocated = credits_allocated + $2,
                    last_refill_at = NOW(),
                    updated_at = NOW()
                WHERE team_id = $1
                "#,
            )
            .bind(row.team_id)
            .bind(amount)
            .execute(&mut *tx)
            .await?;

            let after = row.credits_allocated + amount - row.credits_used;
            let transaction = Self::append_transaction(
                &mut tx,
                row.team_id,
                CreditTransactionType::Allocation,
                amount,
                after - amount,
                after,
                None,
                Some("auto refill"),
            )
            .await?;
            applied.push(transaction);
        }

        tx.commit().await?;
        Ok(applied)
    }

    /// The deduction recorded for a given job, if one was ever applied.
    pub async fn deduction_for_job(&mut self, job_id: JobId) -> Result<Option<CreditTransactionDBResponse>> {
        let row: Option<CreditTransactionRow> = sqlx::query_as(
            r#"
            SELECT * FROM credit_transactions
            WHERE job_id = $1 AND transaction_type = 'deduction'
            ORDER BY created_at, id
            LIMIT 1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&mut *self.db)
        .await?;

        Ok(row.map(CreditTransactionDBResponse::from))
    }

    /// List audit entries, newest first, optionally scoped to one team.
    #[instrument(skip(self, filter), fields(limit = filter.limit, skip = filter.skip), err)]
    pub async fn list_transactions(&mut self, filter: &CreditTransactionFilter) -> Result<Vec<CreditTransactionDBResponse>> {
        let rows: Vec<CreditTransactionRow> = sqlx::query_as(
            r#"
            SELECT * FROM credit_transactions
            WHERE ($1::uuid IS NULL OR team_id = $1)
            ORDER BY created_at DESC, id DESC
            OFFSET $2
            LIMIT $3
            "#,
        )
        .bind(filter.team_id)
        .bind(filter.skip)
        .bind(filter.limit)
        .fetch_all(&mut *self.db)
        .await?;

        Ok(rows.into_iter().map(CreditTransactionDBResponse::from).collect())
    }

    #[allow(clippy::too_many_arguments)]
    async fn append_transaction(
        tx: &mut PgConnection,
        team_id: TeamId,
        transaction_type: CreditTransactionType,
        amount: i64,
        remaining_before: i64,
        remaining_after: i64,
        job_id: Option<JobId>,
        description: Option<&str>,
    ) -> Result<CreditTransactionDBResponse> {
        let row: CreditTransactionRow = sqlx::query_as(
            r#"
            INSERT INTO credit_transactions
                (team_id, transaction_type, amount, remaining_before, remaining_after, job_id, description)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(team_id)
        .bind(&transaction_type)
        .bind(amount)
        .bind(remaining_before)
        .bind(remaining_after)
        .bind(job_id)
        .bind(description)
        .fetch_one(&mut *tx)
        .await?;

        Ok(row.into())
    }
}
