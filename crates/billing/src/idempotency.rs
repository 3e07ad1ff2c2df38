//! Webhook event idempotency gate.
//!
//! Stripe delivers events at least once, and concurrent redeliveries are
//! normal. The gate turns that into at-most-once processing: claiming is an
//! `INSERT ... ON CONFLICT DO NOTHING RETURNING` against a unique event id,
//! so exactly one concurrent claimant wins and everyone else sees
//! `AlreadyProcessed` and must return success without reprocessing.
//!
//! A crash between claim and a terminal mark leaves the row in
//! `processing`. Such rows are surfaced by the invariant checker rather
//! than silently re-claimed.

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::BillingResult;

/// Result of attempting to claim an event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// This caller holds exclusive processing rights.
    Claimed,
    /// Another delivery already claimed or finished this event id.
    AlreadyProcessed,
}

/// Idempotency record as stored.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ProcessedEvent {
    pub id: Uuid,
    pub stripe_event_id: String,
    pub event_type: String,
    pub status: String,
    pub error_message: Option<String>,
}

#[derive(Clone)]
pub struct EventGate {
    pool: PgPool,
}

impl EventGate {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Atomically claim an event id for processing.
    pub async fn claim(&self, event_id: &str, event_type: &str) -> BillingResult<Claim> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events (stripe_event_id, event_type, status)
            VALUES ($1, $2, 'processing')
            ON CONFLICT (stripe_event_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .fetch_optional(&self.pool)
        .await?;

        if claimed.is_some() {
            Ok(Claim::Claimed)
        } else {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type,
                "Duplicate webhook delivery, skipping"
            );
            Ok(Claim::AlreadyProcessed)
        }
    }

    /// Record successful handling.
    pub async fn mark_completed(&self, event_id: &str) -> BillingResult<()> {
        sqlx::query(
            "UPDATE stripe_webhook_events \
             SET status = 'success', completed_at = NOW() \
             WHERE stripe_event_id = $1",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record a handler failure. The event stays consumed; Stripe gets a
    /// success response either way, so the failure is visible only here.
    pub async fn mark_failed(&self, event_id: &str, reason: &str) -> BillingResult<()> {
        sqlx::query(
            "UPDATE stripe_webhook_events \
             SET status = 'error', error_message = $2, completed_at = NOW() \
             WHERE stripe_event_id = $1",
        )
        .bind(event_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Look up an idempotency record, mainly for diagnostics.
    pub async fn get(&self, event_id: &str) -> BillingResult<Option<ProcessedEvent>> {
        let row: Option<ProcessedEvent> = sqlx::query_as(
            "SELECT id, stripe_event_id, event_type, status, error_message \
             FROM stripe_webhook_events WHERE stripe_event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
