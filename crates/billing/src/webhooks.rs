//! Stripe webhook handling.
//!
//! Every event passes through the idempotency gate before any handler
//! runs, so at-least-once delivery (including concurrent redelivery of the
//! same event id) results in at most one set of ledger operations. Handler
//! failures after a successful claim are recorded on the idempotency row
//! and swallowed: Stripe retries on non-2xx, and a retry would be refused
//! by the gate anyway, so propagating the failure buys nothing.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{Event, EventObject, EventType, Invoice, Subscription, Webhook};
use uuid::Uuid;

use crate::client::StripeClient;
use crate::disputes::DisputeService;
use crate::error::{BillingError, BillingResult};
use crate::idempotency::{Claim, EventGate};
use crate::ledger::{CreditLedger, CreditPool, TransactionType};
use crate::subscriptions::SubscriptionService;

type HmacSha256 = Hmac<Sha256>;

/// Seconds a signature timestamp may lag or lead before we refuse it.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Credits a trial-to-active conversion should add: the gap between the
/// plan's monthly allotment and what the subscription pool already holds.
/// An account already holding the full allotment gets nothing.
pub fn trial_conversion_grant(monthly_credits: i64, subscription_balance: i64) -> i64 {
    (monthly_credits - subscription_balance).max(0)
}

/// Verify a Stripe signature header against a payload.
///
/// The header carries `t=<unix>,v1=<hex hmac>`; the signed message is
/// `"{t}.{payload}"` keyed with the webhook signing secret. Split out from
/// the handler so the arithmetic is testable without the Stripe types.
pub fn verify_signature(
    payload: &str,
    signature_header: &str,
    secret: &str,
    now: i64,
) -> BillingResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<String> = None;

    for part in signature_header.split(',') {
        let kv: Vec<&str> = part.splitn(2, '=').collect();
        if kv.len() == 2 {
            match kv[0] {
                "t" => timestamp = kv[1].parse().ok(),
                "v1" => v1_signature = Some(kv[1].to_string()),
                _ => {}
            }
        }
    }

    let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
    let v1_signature = v1_signature.ok_or(BillingError::WebhookSignatureInvalid)?;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(BillingError::WebhookSignatureInvalid);
    }

    let signed_payload = format!("{}.{}", timestamp, payload);
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| BillingError::WebhookSignatureInvalid)?;
    mac.update(signed_payload.as_bytes());
    let computed = hex::encode(mac.finalize().into_bytes());

    if computed != v1_signature {
        return Err(BillingError::WebhookSignatureInvalid);
    }
    Ok(())
}

/// Webhook handler for Stripe events.
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
    gate: EventGate,
    ledger: CreditLedger,
    subscriptions: SubscriptionService,
    disputes: DisputeService,
}

impl WebhookHandler {
    pub fn new(
        stripe: StripeClient,
        pool: PgPool,
        ledger: CreditLedger,
        subscriptions: SubscriptionService,
        disputes: DisputeService,
    ) -> Self {
        let gate = EventGate::new(pool.clone());
        Self {
            stripe,
            pool,
            gate,
            ledger,
            subscriptions,
            disputes,
        }
    }

    pub fn gate(&self) -> &EventGate {
        &self.gate
    }

    /// Verify and parse a Stripe webhook event.
    ///
    /// Tries async-stripe's built-in verification first and falls back to
    /// manual verification, which tolerates newer Stripe API versions the
    /// library's parser rejects.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        verify_signature(payload, signature, webhook_secret, now)?;

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Manual webhook verification succeeded"
        );
        Ok(event)
    }

    /// Handle a verified Stripe event.
    ///
    /// Returns an error only when the idempotency claim itself fails (the
    /// caller should 500 so Stripe redelivers). Handler failures after the
    /// claim are marked on the event record and reported as success.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type = event.type_.to_string();

        if self.gate.claim(&event_id, &event_type).await? == Claim::AlreadyProcessed {
            return Ok(());
        }

        tracing::info!(
            event_type = %event_type,
            event_id = %event_id,
            "Processing Stripe webhook event"
        );

        match self.process_event_internal(&event).await {
            Ok(()) => {
                self.gate.mark_completed(&event_id).await?;
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    event_id = %event_id,
                    event_type = %event_type,
                    error = %e,
                    "Webhook handler failed; event marked failed and will not be retried"
                );
                if let Err(mark_err) = self.gate.mark_failed(&event_id, &e.to_string()).await {
                    tracing::error!(
                        event_id = %event_id,
                        error = %mark_err,
                        "Failed to record webhook failure; event stuck in processing state"
                    );
                }
                Ok(())
            }
        }
    }

    async fn process_event_internal(&self, event: &Event) -> BillingResult<()> {
        let event_owned = event.clone();

        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event_owned).await?;
            }

            EventType::CustomerSubscriptionCreated | EventType::CustomerSubscriptionUpdated => {
                self.handle_subscription_upsert(event_owned).await?;
            }
            EventType::CustomerSubscriptionDeleted => {
                self.handle_subscription_deleted(event_owned).await?;
            }

            EventType::InvoicePaid => {
                self.handle_invoice_paid(event_owned).await?;
            }
            EventType::InvoicePaymentFailed => {
                self.handle_invoice_payment_failed(event_owned).await?;
            }

            EventType::SubscriptionScheduleCompleted => {
                self.handle_schedule_completed(event_owned).await?;
            }

            EventType::ChargeDisputeCreated => {
                self.handle_dispute_created(event_owned).await?;
            }
            EventType::ChargeDisputeClosed => {
                self.handle_dispute_closed(event_owned).await?;
            }

            _ => {
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
            }
        }

        Ok(())
    }

    /// One-time credit pack purchase.
    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<()> {
        let session = match event.data.object {
            EventObject::CheckoutSession(session) => session,
            _ => {
                return Err(BillingError::WebhookEventNotSupported(
                    "Expected CheckoutSession".to_string(),
                ))
            }
        };
        let session_id = session.id.to_string();

        let Some(metadata) = &session.metadata else {
            tracing::warn!(session_id = %session_id, "Checkout session has no metadata, skipping");
            return Ok(());
        };

        let user_id = metadata.get("user_id").and_then(|s| Uuid::parse_str(s).ok());
        let credits: Option<i64> = metadata.get("credits").and_then(|s| s.parse().ok());

        let (Some(user_id), Some(credits)) = (user_id, credits) else {
            // A retry cannot fix missing metadata, so accept and move on.
            tracing::warn!(
                session_id = %session_id,
                "Checkout session missing user_id or credits metadata, skipping"
            );
            return Ok(());
        };
        if credits <= 0 {
            tracing::warn!(session_id = %session_id, credits = credits, "Non-positive credit amount, skipping");
            return Ok(());
        }

        self.ledger
            .grant_to_pool(
                user_id,
                credits,
                CreditPool::Purchased,
                TransactionType::Purchase,
                &session_id,
                "Credit pack purchase",
                None,
            )
            .await?;

        tracing::info!(
            user_id = %user_id,
            session_id = %session_id,
            credits = credits,
            "Purchased credits granted from checkout"
        );
        Ok(())
    }

    async fn handle_subscription_upsert(&self, event: Event) -> BillingResult<()> {
        let subscription = self.extract_subscription(event)?;
        let user_id = self.get_user_id_from_metadata(&subscription.metadata)?;

        let sync = self
            .subscriptions
            .sync_subscription(user_id, &subscription)
            .await?;

        let plan = crate::subscriptions::subscription_price_id(&subscription)
            .and_then(|p| self.subscriptions.catalog().by_price_id(&p).cloned());
        let Some(plan) = plan else {
            tracing::warn!(
                user_id = %user_id,
                subscription_id = %subscription.id,
                "Subscription price not in catalog, no credit decisions made"
            );
            return Ok(());
        };

        use pixlift_shared::SubscriptionStatus;
        match sync.status {
            SubscriptionStatus::Trialing if plan.trial_credits > 0 => {
                // Keyed by subscription id, not event id: created and
                // updated events both report trialing and must not stack.
                let reference_id = format!("trial:{}", subscription.id);
                if !self.ledger.has_transaction(user_id, &reference_id).await? {
                    self.ledger
                        .grant_to_pool(
                            user_id,
                            plan.trial_credits,
                            CreditPool::Subscription,
                            TransactionType::Trial,
                            &reference_id,
                            &format!("Trial credits ({})", plan.tier),
                            None,
                        )
                        .await?;
                }
            }
            SubscriptionStatus::Active if sync.previous_status.as_deref() == Some("trialing") => {
                // Top up to the plan allotment instead of granting it in
                // full; the trial credits already in the pool count.
                let reference_id = format!("trial_conversion:{}", subscription.id);
                if !self.ledger.has_transaction(user_id, &reference_id).await? {
                    let balance = self.ledger.balance(user_id).await?;
                    let top_up = trial_conversion_grant(plan.monthly_credits, balance.subscription);
                    if top_up > 0 {
                        self.ledger
                            .grant_to_pool(
                                user_id,
                                top_up,
                                CreditPool::Subscription,
                                TransactionType::Subscription,
                                &reference_id,
                                &format!("Trial converted to {}", plan.tier),
                                Some(plan.rollover_cap),
                            )
                            .await?;
                    }
                }
            }
            _ => {}
        }

        tracing::info!(
            user_id = %user_id,
            subscription_id = %subscription.id,
            status = %sync.status,
            "Subscription synced"
        );
        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: Event) -> BillingResult<()> {
        let subscription = self.extract_subscription(event)?;
        let user_id = self
            .subscriptions
            .mark_canceled(subscription.id.as_str())
            .await?;

        tracing::info!(
            user_id = ?user_id,
            subscription_id = %subscription.id,
            "Subscription cancelled"
        );
        Ok(())
    }

    /// Renewal payment: the sole place recurring credits are granted.
    async fn handle_invoice_paid(&self, event: Event) -> BillingResult<()> {
        let invoice = self.extract_invoice(event)?;
        let invoice_id = invoice.id.to_string();

        // Proration invoices from mid-cycle plan updates must not grant:
        // the upgrade path already topped the account up.
        let grants_credits = matches!(
            invoice.billing_reason,
            Some(stripe::InvoiceBillingReason::SubscriptionCycle)
                | Some(stripe::InvoiceBillingReason::SubscriptionCreate)
        );
        if !grants_credits {
            tracing::info!(
                invoice_id = %invoice_id,
                billing_reason = ?invoice.billing_reason,
                "Invoice paid with non-renewal billing reason, no credits granted"
            );
            return Ok(());
        }

        let user_id = self.get_user_id_from_customer(&invoice.customer).await?;

        let price_id = invoice
            .lines
            .as_ref()
            .and_then(|lines| lines.data.iter().find_map(|line| line.price.as_ref()))
            .map(|price| price.id.to_string());
        let Some(plan) = price_id
            .as_deref()
            .and_then(|p| self.subscriptions.catalog().by_price_id(p))
            .cloned()
        else {
            tracing::warn!(
                user_id = %user_id,
                invoice_id = %invoice_id,
                price_id = ?price_id,
                "Paid invoice price not in catalog, no credits granted"
            );
            return Ok(());
        };

        let outcome = self
            .ledger
            .grant_to_pool(
                user_id,
                plan.monthly_credits,
                CreditPool::Subscription,
                TransactionType::Subscription,
                &invoice_id,
                &format!("Monthly {} credits", plan.tier),
                Some(plan.rollover_cap),
            )
            .await?;

        // A paid renewal also clears past_due standing.
        sqlx::query(
            "UPDATE accounts SET subscription_status = 'active', updated_at = NOW() \
             WHERE user_id = $1 AND subscription_status = 'past_due'",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            invoice_id = %invoice_id,
            tier = plan.tier,
            applied = outcome.applied,
            new_balance = outcome.new_balance,
            "Renewal credits granted"
        );
        Ok(())
    }

    async fn handle_invoice_payment_failed(&self, event: Event) -> BillingResult<()> {
        let invoice = self.extract_invoice(event)?;
        let user_id = self.get_user_id_from_customer(&invoice.customer).await?;

        sqlx::query(
            "UPDATE accounts SET subscription_status = 'past_due', updated_at = NOW() \
             WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if let Some(subscription) = &invoice.subscription {
            sqlx::query(
                "UPDATE subscriptions SET status = 'past_due', updated_at = NOW() \
                 WHERE stripe_subscription_id = $1",
            )
            .bind(subscription.id().as_str())
            .execute(&self.pool)
            .await?;
        }

        tracing::warn!(
            user_id = %user_id,
            invoice_id = %invoice.id,
            amount_due = ?invoice.amount_due,
            "Invoice payment failed, account past due"
        );
        Ok(())
    }

    /// A scheduled downgrade reached its boundary. Only the recorded tier
    /// and price move; credits arrive with the next renewal invoice.
    async fn handle_schedule_completed(&self, event: Event) -> BillingResult<()> {
        let schedule = match event.data.object {
            EventObject::SubscriptionSchedule(schedule) => schedule,
            _ => {
                return Err(BillingError::WebhookEventNotSupported(
                    "Expected SubscriptionSchedule".to_string(),
                ))
            }
        };

        let Some(subscription) = &schedule.subscription else {
            tracing::warn!(
                schedule_id = %schedule.id,
                "Completed schedule carries no subscription, skipping"
            );
            return Ok(());
        };

        self.subscriptions
            .complete_scheduled_change(subscription.id().as_str())
            .await?;
        Ok(())
    }

    async fn handle_dispute_created(&self, event: Event) -> BillingResult<()> {
        let dispute = self.extract_dispute(event)?;
        let charge_id = dispute.charge.id().to_string();
        let user_id = self.get_user_id_from_charge(&charge_id).await?;
        self.disputes.open_dispute(user_id, &dispute).await
    }

    async fn handle_dispute_closed(&self, event: Event) -> BillingResult<()> {
        let dispute = self.extract_dispute(event)?;
        self.disputes.resolve_dispute(&dispute).await
    }

    fn extract_subscription(&self, event: Event) -> BillingResult<Subscription> {
        match event.data.object {
            EventObject::Subscription(subscription) => Ok(subscription),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected Subscription".to_string(),
            )),
        }
    }

    fn extract_invoice(&self, event: Event) -> BillingResult<Invoice> {
        match event.data.object {
            EventObject::Invoice(invoice) => Ok(invoice),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected Invoice".to_string(),
            )),
        }
    }

    fn extract_dispute(&self, event: Event) -> BillingResult<stripe::Dispute> {
        match event.data.object {
            EventObject::Dispute(dispute) => Ok(dispute),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected Dispute".to_string(),
            )),
        }
    }

    fn get_user_id_from_metadata(
        &self,
        metadata: &std::collections::HashMap<String, String>,
    ) -> BillingResult<Uuid> {
        metadata
            .get("user_id")
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| BillingError::Internal("user_id not found in metadata".to_string()))
    }

    async fn get_user_id_from_customer(
        &self,
        customer: &Option<stripe::Expandable<stripe::Customer>>,
    ) -> BillingResult<Uuid> {
        let customer_id = match customer {
            Some(stripe::Expandable::Id(id)) => id.to_string(),
            Some(stripe::Expandable::Object(c)) => c.id.to_string(),
            None => return Err(BillingError::Internal("No customer on invoice".to_string())),
        };

        let result: Option<(Uuid,)> =
            sqlx::query_as("SELECT user_id FROM accounts WHERE stripe_customer_id = $1")
                .bind(&customer_id)
                .fetch_optional(&self.pool)
                .await?;

        result
            .map(|(id,)| id)
            .ok_or(BillingError::CustomerNotFound(customer_id))
    }

    /// Resolve the account behind a charge by asking Stripe for the
    /// charge's customer.
    async fn get_user_id_from_charge(&self, charge_id: &str) -> BillingResult<Uuid> {
        let charge_id: stripe::ChargeId = charge_id
            .parse()
            .map_err(|e| BillingError::StripeApi(format!("invalid charge id: {}", e)))?;
        let charge = stripe::Charge::retrieve(self.stripe.inner(), &charge_id, &[]).await?;
        self.get_user_id_from_customer(&charge.customer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={},v1={}", timestamp, sig)
    }

    #[test]
    fn valid_signature_is_accepted() {
        let payload = r#"{"id":"evt_1"}"#;
        let secret = "whsec_test_secret";
        let now = 1_700_000_000;
        let header = sign(payload, secret, now);
        assert!(verify_signature(payload, &header, secret, now).is_ok());
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let secret = "whsec_test_secret";
        let now = 1_700_000_000;
        let header = sign(r#"{"id":"evt_1"}"#, secret, now);
        assert!(verify_signature(r#"{"id":"evt_2"}"#, &header, secret, now).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let now = 1_700_000_000;
        let header = sign(payload, "whsec_a", now);
        assert!(verify_signature(payload, &header, "whsec_b", now).is_err());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let secret = "whsec_test_secret";
        let now = 1_700_000_000;
        // 300s old is inside tolerance, 301s is out
        let header = sign(payload, secret, now - 300);
        assert!(verify_signature(payload, &header, secret, now).is_ok());
        let header = sign(payload, secret, now - 301);
        assert!(verify_signature(payload, &header, secret, now).is_err());
    }

    #[test]
    fn malformed_header_is_rejected() {
        let payload = r#"{"id":"evt_1"}"#;
        let secret = "whsec_test_secret";
        let now = 1_700_000_000;
        assert!(verify_signature(payload, "", secret, now).is_err());
        assert!(verify_signature(payload, "t=abc,v1=def", secret, now).is_err());
        assert!(verify_signature(payload, "v1=deadbeef", secret, now).is_err());
        assert!(verify_signature(payload, &format!("t={}", now), secret, now).is_err());
    }

    #[test]
    fn trial_conversion_tops_up_to_allotment() {
        // Trial granted 25, plan allots 300: conversion adds 275
        assert_eq!(trial_conversion_grant(300, 25), 275);
    }

    #[test]
    fn trial_conversion_adds_nothing_when_full() {
        assert_eq!(trial_conversion_grant(300, 300), 0);
        assert_eq!(trial_conversion_grant(300, 450), 0);
    }
}
