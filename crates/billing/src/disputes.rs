//! Chargeback dispute handling.
//!
//! A dispute places a best-effort credit hold: we convert the disputed
//! amount to credits and claw back up to that many, draining the
//! subscription pool first. The hold is never released, not even when the
//! dispute resolves in our favor; resolution only moves status fields.

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::ledger::{ClawbackPool, CreditLedger};
use crate::plans::credits_for_cents;

/// Stored dispute record.
#[derive(Debug, Clone, serde::Serialize, sqlx::FromRow)]
pub struct DisputeRecord {
    pub id: Uuid,
    pub stripe_dispute_id: String,
    pub user_id: Uuid,
    pub stripe_charge_id: String,
    pub amount_cents: i64,
    pub credits_held: i64,
    pub status: String,
    pub reason: Option<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct DisputeService {
    pool: PgPool,
    ledger: CreditLedger,
}

impl DisputeService {
    pub fn new(pool: PgPool, ledger: CreditLedger) -> Self {
        Self { pool, ledger }
    }

    /// React to a newly created dispute: record it, flag the account, and
    /// place the credit hold.
    ///
    /// The hold may claw less than the converted amount when the account
    /// lacks balance; the ledger rows carry what was actually taken.
    pub async fn open_dispute(&self, user_id: Uuid, dispute: &stripe::Dispute) -> BillingResult<()> {
        let dispute_id = dispute.id.to_string();
        let charge_id = dispute.charge.id().to_string();
        let credits_held = credits_for_cents(dispute.amount);
        let reason = format!("{:?}", dispute.reason);

        let inserted: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO disputes
                (stripe_dispute_id, user_id, stripe_charge_id, amount_cents,
                 credits_held, status, reason)
            VALUES ($1, $2, $3, $4, $5, 'created', $6)
            ON CONFLICT (stripe_dispute_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&dispute_id)
        .bind(user_id)
        .bind(&charge_id)
        .bind(dispute.amount)
        .bind(credits_held)
        .bind(&reason)
        .fetch_optional(&self.pool)
        .await?;

        if inserted.is_none() {
            tracing::info!(
                dispute_id = %dispute_id,
                "Dispute already recorded, not repeating the credit hold"
            );
            return Ok(());
        }

        sqlx::query(
            "UPDATE accounts SET dispute_status = 'pending', updated_at = NOW() \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let outcome = self
            .ledger
            .clawback(
                user_id,
                credits_held,
                ClawbackPool::Auto,
                &dispute_id,
                &format!("Credit hold for disputed charge {}", charge_id),
            )
            .await?;

        tracing::warn!(
            user_id = %user_id,
            dispute_id = %dispute_id,
            charge_id = %charge_id,
            amount_cents = dispute.amount,
            credits_requested = credits_held,
            credits_clawed = outcome.applied(),
            "Dispute opened, credit hold placed"
        );
        Ok(())
    }

    /// React to a dispute resolution. Either way the hold stands; a lost
    /// dispute's account handling beyond the status flag happens out of
    /// band.
    pub async fn resolve_dispute(&self, dispute: &stripe::Dispute) -> BillingResult<()> {
        let dispute_id = dispute.id.to_string();
        let status = match dispute.status {
            stripe::DisputeStatus::Won => "won",
            stripe::DisputeStatus::Lost => "lost",
            other => {
                tracing::info!(
                    dispute_id = %dispute_id,
                    status = ?other,
                    "Dispute closed with non-terminal status, ignoring"
                );
                return Ok(());
            }
        };

        let user_id: Option<Uuid> = sqlx::query_scalar(
            "UPDATE disputes SET status = $1, updated_at = NOW() \
             WHERE stripe_dispute_id = $2 RETURNING user_id",
        )
        .bind(status)
        .bind(&dispute_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(user_id) = user_id else {
            tracing::warn!(
                dispute_id = %dispute_id,
                "Resolution for unknown dispute, nothing to update"
            );
            return Ok(());
        };

        sqlx::query(
            "UPDATE accounts SET dispute_status = 'resolved', updated_at = NOW() \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            dispute_id = %dispute_id,
            resolution = status,
            "Dispute resolved; credit hold stands"
        );
        Ok(())
    }

    /// Disputes on file for an account, newest first.
    pub async fn list_for_user(&self, user_id: Uuid) -> BillingResult<Vec<DisputeRecord>> {
        let rows: Vec<DisputeRecord> = sqlx::query_as(
            r#"
            SELECT id, stripe_dispute_id, user_id, stripe_charge_id, amount_cents,
                   credits_held, status, reason, created_at
            FROM disputes
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
