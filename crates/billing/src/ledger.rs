//! Credit ledger engine.
//!
//! The ledger is the ONLY writer of the balance columns on `accounts`.
//! Nothing else in the codebase gets a handle capable of touching those
//! fields; webhook handlers, the plan-change flow, and the dispute flow all
//! go through the operations here. Every balance mutation and its audit row
//! commit in the same database transaction, with the account row locked
//! (`SELECT ... FOR UPDATE`) so concurrent mutations for one user serialize.
//!
//! Credits live in two pools: subscription-granted and directly purchased.
//! Consumption and automatic clawback drain the subscription pool first,
//! then the purchased pool.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Target pool for a grant or refund.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditPool {
    Subscription,
    Purchased,
}

/// Pool selection for clawbacks. `Auto` drains subscription first, then
/// purchased, mirroring consumption order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClawbackPool {
    Subscription,
    Purchased,
    Auto,
}

/// Pool recorded on a ledger row. `Mixed` marks a single logical operation
/// that drew from both pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerPool {
    Subscription,
    Purchased,
    Mixed,
}

impl LedgerPool {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerPool::Subscription => "subscription",
            LedgerPool::Purchased => "purchased",
            LedgerPool::Mixed => "mixed",
        }
    }
}

/// Why credits moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionType {
    Subscription,
    Purchase,
    Usage,
    Refund,
    Clawback,
    Trial,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Subscription => "subscription",
            TransactionType::Purchase => "purchase",
            TransactionType::Usage => "usage",
            TransactionType::Refund => "refund",
            TransactionType::Clawback => "clawback",
            TransactionType::Trial => "trial",
        }
    }
}

/// Outcome of a grant or refund.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct GrantOutcome {
    pub requested: i64,
    /// Amount actually added after rollover capping. Zero means the pool
    /// was already at its cap and nothing was logged.
    pub applied: i64,
    pub new_balance: i64,
}

/// Outcome of a consumption.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ConsumeOutcome {
    pub from_subscription: i64,
    pub from_purchased: i64,
    pub subscription_balance: i64,
    pub purchased_balance: i64,
}

/// Outcome of a clawback. `applied()` may be less than `requested` when the
/// account lacked sufficient balance; balances never go negative.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ClawbackOutcome {
    pub requested: i64,
    pub from_subscription: i64,
    pub from_purchased: i64,
    pub subscription_balance: i64,
    pub purchased_balance: i64,
}

impl ClawbackOutcome {
    pub fn applied(&self) -> i64 {
        self.from_subscription + self.from_purchased
    }
}

/// Point-in-time view of an account's two pools.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct Balance {
    pub subscription: i64,
    pub purchased: i64,
}

impl Balance {
    pub fn total(&self) -> i64 {
        self.subscription + self.purchased
    }
}

/// One row of the append-only transaction log.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub amount: i64,
    pub transaction_type: String,
    pub credit_pool: String,
    pub reference_id: String,
    pub description: String,
    pub created_at: OffsetDateTime,
}

// =============================================================================
// Pure split/cap math
// =============================================================================
// Kept as free functions so the money arithmetic is testable without a
// database. The service methods below only move the results into SQL.

/// Amount a capped grant actually applies. Grants never raise a balance
/// above the cap; an account already at or over its cap receives zero.
pub fn apply_rollover_cap(current_balance: i64, amount: i64, max_rollover: Option<i64>) -> i64 {
    match max_rollover {
        Some(cap) => amount.min(cap - current_balance).max(0),
        None => amount,
    }
}

/// How much each pool contributes to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolDraw {
    pub from_subscription: i64,
    pub from_purchased: i64,
}

impl PoolDraw {
    pub fn total(&self) -> i64 {
        self.from_subscription + self.from_purchased
    }

    /// Pool label for the ledger row, or `None` when nothing was drawn.
    pub fn ledger_pool(&self) -> Option<LedgerPool> {
        match (self.from_subscription > 0, self.from_purchased > 0) {
            (true, true) => Some(LedgerPool::Mixed),
            (true, false) => Some(LedgerPool::Subscription),
            (false, true) => Some(LedgerPool::Purchased),
            (false, false) => None,
        }
    }
}

/// Split a consumption across pools, subscription first. Errs with the
/// available total when the combined balance cannot cover the amount; no
/// partial deduction is ever planned.
pub fn plan_consume(
    subscription_balance: i64,
    purchased_balance: i64,
    amount: i64,
) -> Result<PoolDraw, i64> {
    let available = subscription_balance + purchased_balance;
    if available < amount {
        return Err(available);
    }
    let from_subscription = amount.min(subscription_balance);
    Ok(PoolDraw {
        from_subscription,
        from_purchased: amount - from_subscription,
    })
}

/// Split a clawback across pools. Unlike consumption, a clawback is capped
/// at whatever is available rather than failing: the caller learns the
/// shortfall from the draw totals.
pub fn plan_clawback(
    subscription_balance: i64,
    purchased_balance: i64,
    amount: i64,
    pool: ClawbackPool,
) -> PoolDraw {
    match pool {
        ClawbackPool::Subscription => PoolDraw {
            from_subscription: amount.min(subscription_balance),
            from_purchased: 0,
        },
        ClawbackPool::Purchased => PoolDraw {
            from_subscription: 0,
            from_purchased: amount.min(purchased_balance),
        },
        ClawbackPool::Auto => {
            let from_subscription = amount.min(subscription_balance);
            PoolDraw {
                from_subscription,
                from_purchased: (amount - from_subscription).min(purchased_balance),
            }
        }
    }
}

// =============================================================================
// Ledger service
// =============================================================================

/// The credit ledger service. Cheap to clone; holds only the pool.
#[derive(Clone)]
pub struct CreditLedger {
    pool: PgPool,
}

impl CreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Increase one pool's balance.
    ///
    /// `max_rollover` (subscription grants only) caps the resulting balance:
    /// the applied amount is `min(amount, cap - current)`, floored at zero.
    /// A fully capped grant is a no-op and writes no ledger row.
    pub async fn grant_to_pool(
        &self,
        user_id: Uuid,
        amount: i64,
        pool: CreditPool,
        transaction_type: TransactionType,
        reference_id: &str,
        description: &str,
        max_rollover: Option<i64>,
    ) -> BillingResult<GrantOutcome> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(amount));
        }

        let mut tx = self.pool.begin().await?;
        let (subscription_balance, purchased_balance) =
            lock_account(&mut tx, user_id).await?;

        let current = match pool {
            CreditPool::Subscription => subscription_balance,
            CreditPool::Purchased => purchased_balance,
        };
        let applied = apply_rollover_cap(current, amount, max_rollover);
        let new_balance = current + applied;

        if applied > 0 {
            apply_pool_delta(&mut tx, user_id, pool, applied).await?;
            insert_transaction(
                &mut tx,
                user_id,
                applied,
                transaction_type,
                match pool {
                    CreditPool::Subscription => LedgerPool::Subscription,
                    CreditPool::Purchased => LedgerPool::Purchased,
                },
                reference_id,
                description,
            )
            .await?;
        }
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            requested = amount,
            applied = applied,
            new_balance = new_balance,
            pool = ?pool,
            transaction_type = transaction_type.as_str(),
            reference_id = %reference_id,
            "Credit grant"
        );

        Ok(GrantOutcome {
            requested: amount,
            applied,
            new_balance,
        })
    }

    /// Deduct credits for usage, subscription pool first, purchased second.
    ///
    /// Fails with `InsufficientCredits` and deducts nothing when the
    /// combined balance cannot cover the amount.
    pub async fn consume(
        &self,
        user_id: Uuid,
        amount: i64,
        reference_id: &str,
        description: &str,
    ) -> BillingResult<ConsumeOutcome> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(amount));
        }

        let mut tx = self.pool.begin().await?;
        let (subscription_balance, purchased_balance) =
            lock_account(&mut tx, user_id).await?;

        let draw = plan_consume(subscription_balance, purchased_balance, amount).map_err(
            |available| BillingError::InsufficientCredits {
                requested: amount,
                available,
            },
        )?;

        apply_draw(&mut tx, user_id, draw).await?;
        // Unwrap is safe in spirit: amount > 0 guarantees a non-empty draw,
        // but route through Internal to keep the deny(unwrap) lint honest.
        let ledger_pool = draw
            .ledger_pool()
            .ok_or_else(|| BillingError::Internal("empty consume draw".to_string()))?;
        insert_transaction(
            &mut tx,
            user_id,
            -amount,
            TransactionType::Usage,
            ledger_pool,
            reference_id,
            description,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            from_subscription = draw.from_subscription,
            from_purchased = draw.from_purchased,
            reference_id = %reference_id,
            "Credits consumed"
        );

        Ok(ConsumeOutcome {
            from_subscription: draw.from_subscription,
            from_purchased: draw.from_purchased,
            subscription_balance: subscription_balance - draw.from_subscription,
            purchased_balance: purchased_balance - draw.from_purchased,
        })
    }

    /// Restore credits to a specific pool, uncapped. Used to reverse a
    /// prior consumption when the downstream work failed; refunds are
    /// exempt from rollover caps.
    pub async fn refund_to_pool(
        &self,
        user_id: Uuid,
        amount: i64,
        pool: CreditPool,
        reference_id: &str,
        description: &str,
    ) -> BillingResult<GrantOutcome> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(amount));
        }

        let mut tx = self.pool.begin().await?;
        let (subscription_balance, purchased_balance) =
            lock_account(&mut tx, user_id).await?;
        let current = match pool {
            CreditPool::Subscription => subscription_balance,
            CreditPool::Purchased => purchased_balance,
        };

        apply_pool_delta(&mut tx, user_id, pool, amount).await?;
        insert_transaction(
            &mut tx,
            user_id,
            amount,
            TransactionType::Refund,
            match pool {
                CreditPool::Subscription => LedgerPool::Subscription,
                CreditPool::Purchased => LedgerPool::Purchased,
            },
            reference_id,
            description,
        )
        .await?;
        tx.commit().await?;

        tracing::info!(
            user_id = %user_id,
            amount = amount,
            pool = ?pool,
            reference_id = %reference_id,
            "Credits refunded"
        );

        Ok(GrantOutcome {
            requested: amount,
            applied: amount,
            new_balance: current + amount,
        })
    }

    /// Remove previously granted credits, capped at what the account holds.
    ///
    /// Never drives a balance negative: when the requested amount exceeds
    /// the available credits, everything available is clawed and the
    /// shortfall shows up in the returned draw amounts.
    pub async fn clawback(
        &self,
        user_id: Uuid,
        amount: i64,
        pool: ClawbackPool,
        reference_id: &str,
        reason: &str,
    ) -> BillingResult<ClawbackOutcome> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(amount));
        }

        let mut tx = self.pool.begin().await?;
        let (subscription_balance, purchased_balance) =
            lock_account(&mut tx, user_id).await?;

        let draw = plan_clawback(subscription_balance, purchased_balance, amount, pool);
        if let Some(ledger_pool) = draw.ledger_pool() {
            apply_draw(&mut tx, user_id, draw).await?;
            insert_transaction(
                &mut tx,
                user_id,
                -draw.total(),
                TransactionType::Clawback,
                ledger_pool,
                reference_id,
                reason,
            )
            .await?;
        }
        tx.commit().await?;

        tracing::warn!(
            user_id = %user_id,
            requested = amount,
            applied = draw.total(),
            from_subscription = draw.from_subscription,
            from_purchased = draw.from_purchased,
            reference_id = %reference_id,
            "Credits clawed back"
        );

        Ok(ClawbackOutcome {
            requested: amount,
            from_subscription: draw.from_subscription,
            from_purchased: draw.from_purchased,
            subscription_balance: subscription_balance - draw.from_subscription,
            purchased_balance: purchased_balance - draw.from_purchased,
        })
    }

    /// Claw back an earlier grant identified by its reference id, from the
    /// pool it was granted into and for the amount it granted.
    pub async fn clawback_by_reference(
        &self,
        user_id: Uuid,
        original_reference_id: &str,
        reason: &str,
    ) -> BillingResult<ClawbackOutcome> {
        let original: Option<(i64, String)> = sqlx::query_as(
            r#"
            SELECT amount, credit_pool FROM credit_transactions
            WHERE user_id = $1 AND reference_id = $2 AND amount > 0
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(original_reference_id)
        .fetch_optional(&self.pool)
        .await?;

        let (amount, pool_str) = original
            .ok_or_else(|| BillingError::NoCreditsFound(original_reference_id.to_string()))?;

        let pool = match pool_str.as_str() {
            "subscription" => ClawbackPool::Subscription,
            "purchased" => ClawbackPool::Purchased,
            // A mixed grant doesn't occur today, but fall back to the
            // consumption ordering rather than refusing.
            _ => ClawbackPool::Auto,
        };

        self.clawback(user_id, amount, pool, original_reference_id, reason)
            .await
    }

    /// Whether any ledger row exists for this reference id. Handlers use
    /// this to keep fixed-reference grants (trial credits, conversion
    /// top-ups) idempotent across distinct event ids.
    pub async fn has_transaction(&self, user_id: Uuid, reference_id: &str) -> BillingResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM credit_transactions \
             WHERE user_id = $1 AND reference_id = $2)",
        )
        .bind(user_id)
        .bind(reference_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Current balances, creating the account row on first touch.
    pub async fn balance(&self, user_id: Uuid) -> BillingResult<Balance> {
        let row: Option<(i64, i64)> = sqlx::query_as(
            "SELECT subscription_credits_balance, purchased_credits_balance \
             FROM accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let (subscription, purchased) = row.unwrap_or((0, 0));
        Ok(Balance {
            subscription,
            purchased,
        })
    }

    /// Recent ledger rows, newest first.
    pub async fn history(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> BillingResult<Vec<LedgerEntry>> {
        let rows: Vec<LedgerEntry> = sqlx::query_as(
            r#"
            SELECT id, amount, transaction_type, credit_pool, reference_id,
                   description, created_at
            FROM credit_transactions
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit.clamp(1, 100))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

/// Create the account row if missing, then lock it and read both balances.
/// Every mutation path starts here, which is what serializes concurrent
/// operations for one user.
async fn lock_account(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
) -> BillingResult<(i64, i64)> {
    sqlx::query("INSERT INTO accounts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(&mut **tx)
        .await?;

    let row: (i64, i64) = sqlx::query_as(
        "SELECT subscription_credits_balance, purchased_credits_balance \
         FROM accounts WHERE user_id = $1 FOR UPDATE",
    )
    .bind(user_id)
    .fetch_one(&mut **tx)
    .await?;

    Ok(row)
}

async fn apply_pool_delta(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    pool: CreditPool,
    delta: i64,
) -> BillingResult<()> {
    let query = match pool {
        CreditPool::Subscription => {
            "UPDATE accounts SET \
             subscription_credits_balance = subscription_credits_balance + $1, \
             updated_at = NOW() WHERE user_id = $2"
        }
        CreditPool::Purchased => {
            "UPDATE accounts SET \
             purchased_credits_balance = purchased_credits_balance + $1, \
             updated_at = NOW() WHERE user_id = $2"
        }
    };
    sqlx::query(query)
        .bind(delta)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn apply_draw(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    draw: PoolDraw,
) -> BillingResult<()> {
    sqlx::query(
        "UPDATE accounts SET \
         subscription_credits_balance = subscription_credits_balance - $1, \
         purchased_credits_balance = purchased_credits_balance - $2, \
         updated_at = NOW() WHERE user_id = $3",
    )
    .bind(draw.from_subscription)
    .bind(draw.from_purchased)
    .bind(user_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn insert_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    amount: i64,
    transaction_type: TransactionType,
    pool: LedgerPool,
    reference_id: &str,
    description: &str,
) -> BillingResult<()> {
    sqlx::query(
        r#"
        INSERT INTO credit_transactions
            (user_id, amount, transaction_type, credit_pool, reference_id, description)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(user_id)
    .bind(amount)
    .bind(transaction_type.as_str())
    .bind(pool.as_str())
    .bind(reference_id)
    .bind(description)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rollover_cap_limits_grant_to_cap() {
        // 1100 held, 300 granted, cap 1200: only 100 applies
        assert_eq!(apply_rollover_cap(1100, 300, Some(1200)), 100);
    }

    #[test]
    fn rollover_cap_noop_at_cap() {
        assert_eq!(apply_rollover_cap(1200, 300, Some(1200)), 0);
        assert_eq!(apply_rollover_cap(1500, 300, Some(1200)), 0);
    }

    #[test]
    fn uncapped_grant_applies_fully() {
        assert_eq!(apply_rollover_cap(1_000_000, 300, None), 300);
    }

    #[test]
    fn consume_drains_subscription_pool_first() {
        let draw = plan_consume(30, 50, 50).unwrap();
        assert_eq!(draw.from_subscription, 30);
        assert_eq!(draw.from_purchased, 20);
        assert_eq!(draw.ledger_pool(), Some(LedgerPool::Mixed));
    }

    #[test]
    fn consume_from_single_pool_is_not_mixed() {
        let draw = plan_consume(100, 50, 40).unwrap();
        assert_eq!(draw.from_subscription, 40);
        assert_eq!(draw.from_purchased, 0);
        assert_eq!(draw.ledger_pool(), Some(LedgerPool::Subscription));

        let draw = plan_consume(0, 50, 40).unwrap();
        assert_eq!(draw.ledger_pool(), Some(LedgerPool::Purchased));
    }

    #[test]
    fn consume_fails_whole_when_short() {
        // 30 + 50 held, 81 requested: no partial deduction
        assert_eq!(plan_consume(30, 50, 81), Err(80));
    }

    #[test]
    fn consume_exact_balance_succeeds() {
        let draw = plan_consume(30, 50, 80).unwrap();
        assert_eq!(draw.total(), 80);
    }

    #[test]
    fn auto_clawback_mirrors_consume_order() {
        let draw = plan_clawback(30, 20, 50, ClawbackPool::Auto);
        assert_eq!(draw.from_subscription, 30);
        assert_eq!(draw.from_purchased, 20);
    }

    #[test]
    fn clawback_never_exceeds_available() {
        let draw = plan_clawback(30, 20, 100, ClawbackPool::Auto);
        assert_eq!(draw.total(), 50);
        assert_eq!(draw.from_subscription, 30);
        assert_eq!(draw.from_purchased, 20);
    }

    #[test]
    fn single_pool_clawback_caps_at_that_pool() {
        let draw = plan_clawback(30, 500, 100, ClawbackPool::Subscription);
        assert_eq!(draw.from_subscription, 30);
        assert_eq!(draw.from_purchased, 0);

        let draw = plan_clawback(500, 30, 100, ClawbackPool::Purchased);
        assert_eq!(draw.from_subscription, 0);
        assert_eq!(draw.from_purchased, 30);
    }

    #[test]
    fn clawback_on_empty_account_draws_nothing() {
        let draw = plan_clawback(0, 0, 100, ClawbackPool::Auto);
        assert_eq!(draw.total(), 0);
        assert_eq!(draw.ledger_pool(), None);
    }
}
