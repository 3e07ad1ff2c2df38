//! Subscription management and plan changes.
//!
//! Upgrades take effect immediately (prorated, credits topped up through
//! the ledger); downgrades are represented as data and executed by Stripe's
//! own subscription schedule at the period boundary. The user keeps their
//! current tier until then, and credits for the new tier follow from the
//! next renewal invoice, never from the schedule transition itself.

use sqlx::PgPool;
use stripe::{Subscription, SubscriptionId, UpdateSubscription, UpdateSubscriptionItems};
// Import the proration behavior enum from the subscription module (not subscription_item)
use stripe::generated::billing::subscription::SubscriptionProrationBehavior;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};
use crate::ledger::{CreditLedger, CreditPool, TransactionType};
use crate::plans::{Plan, PlanCatalog};

/// Subscription schedule parameters for the raw form-encoded API.
/// async-stripe 0.39 does not expose the schedule mutation endpoints, so
/// these go through `Client::post_form` directly.
#[derive(Debug, serde::Serialize)]
struct CreateScheduleFromSubscription<'a> {
    from_subscription: &'a str,
}

#[derive(Debug, serde::Serialize)]
struct SchedulePhaseItemParams<'a> {
    price: &'a str,
    quantity: u64,
}

#[derive(Debug, serde::Serialize)]
struct SchedulePhaseParams<'a> {
    items: Vec<SchedulePhaseItemParams<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_date: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date: Option<i64>,
    proration_behavior: &'a str,
}

#[derive(Debug, serde::Serialize)]
struct UpdateSchedulePhases<'a> {
    end_behavior: &'a str,
    phases: Vec<SchedulePhaseParams<'a>>,
}

/// Locally tracked subscription row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub stripe_subscription_id: String,
    pub status: String,
    pub stripe_price_id: Option<String>,
    pub scheduled_price_id: Option<String>,
    pub scheduled_change_at: Option<OffsetDateTime>,
    pub stripe_schedule_id: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
}

/// What a plan change did, with enough detail for the caller to render it.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanChangeOutcome {
    /// Upgrade applied now with proration.
    Immediate {
        tier: String,
        price_id: String,
        credits_granted: i64,
        current_period_end: Option<OffsetDateTime>,
    },
    /// Downgrade scheduled for the period boundary.
    Scheduled {
        tier: String,
        price_id: String,
        schedule_id: String,
        effective_at: Option<OffsetDateTime>,
    },
}

/// Read model for the account page.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriptionView {
    pub status: String,
    pub tier: Option<String>,
    pub price_id: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub scheduled_tier: Option<String>,
    pub scheduled_change_at: Option<OffsetDateTime>,
}

/// Result of syncing a Stripe subscription into the local record.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    /// Local status before this sync, if the record already existed.
    pub previous_status: Option<String>,
    pub status: pixlift_shared::SubscriptionStatus,
}

// =============================================================================
// Pure decision logic
// =============================================================================

/// Credits to grant on an immediate upgrade: the difference between the
/// plans' monthly allotments, withheld entirely when the account already
/// sits at or above the new plan's rollover cap (bouncing down and back up
/// must not farm a second full grant).
pub fn upgrade_grant_amount(
    new_monthly: i64,
    old_monthly: i64,
    combined_balance: i64,
    new_rollover_cap: i64,
) -> i64 {
    if combined_balance >= new_rollover_cap {
        return 0;
    }
    (new_monthly - old_monthly).max(0)
}

/// Estimate the current period end from the billing anchor and interval,
/// used when the snapshot carries no usable period end: the first interval
/// boundary after `now`.
pub fn estimate_period_end(billing_cycle_anchor: i64, interval_seconds: i64, now: i64) -> i64 {
    if interval_seconds <= 0 {
        return now;
    }
    if billing_cycle_anchor > now {
        return billing_cycle_anchor;
    }
    let elapsed_periods = (now - billing_cycle_anchor) / interval_seconds + 1;
    billing_cycle_anchor + elapsed_periods * interval_seconds
}

/// Seconds per billing interval, approximating months and years the way a
/// period-end estimate can afford to.
pub fn interval_seconds(interval: stripe::RecurringInterval, count: u64) -> i64 {
    let unit: i64 = match interval {
        stripe::RecurringInterval::Day => 86_400,
        stripe::RecurringInterval::Week => 7 * 86_400,
        stripe::RecurringInterval::Month => 30 * 86_400,
        stripe::RecurringInterval::Year => 365 * 86_400,
    };
    unit * count.max(1) as i64
}

/// The current price id on a subscription snapshot.
pub fn subscription_price_id(subscription: &Subscription) -> Option<String> {
    subscription
        .items
        .data
        .first()
        .and_then(|item| item.price.as_ref())
        .map(|price| price.id.to_string())
}

fn local_status(status: stripe::SubscriptionStatus) -> pixlift_shared::SubscriptionStatus {
    use pixlift_shared::SubscriptionStatus as Local;
    match status {
        stripe::SubscriptionStatus::Trialing => Local::Trialing,
        stripe::SubscriptionStatus::Active => Local::Active,
        stripe::SubscriptionStatus::PastDue => Local::PastDue,
        stripe::SubscriptionStatus::Canceled => Local::Canceled,
        _ => Local::None,
    }
}

// =============================================================================
// Service
// =============================================================================

/// Subscription service for plan changes and Stripe record sync.
#[derive(Clone)]
pub struct SubscriptionService {
    stripe: StripeClient,
    pool: PgPool,
    ledger: CreditLedger,
    catalog: PlanCatalog,
}

impl SubscriptionService {
    pub fn new(stripe: StripeClient, pool: PgPool, ledger: CreditLedger) -> Self {
        let catalog = PlanCatalog::new(&stripe.config().price_ids);
        Self {
            stripe,
            pool,
            ledger,
            catalog,
        }
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    /// Switch the user's subscription to a new plan.
    ///
    /// Upgrades apply immediately with proration and a ledger top-up;
    /// downgrades become a two-phase Stripe schedule that flips the price
    /// at period end. Local state changes only after the provider call
    /// succeeds, so an aborted change leaves nothing half-applied.
    pub async fn change_plan(
        &self,
        user_id: Uuid,
        target_price_id: &str,
    ) -> BillingResult<PlanChangeOutcome> {
        let target_plan = self
            .catalog
            .by_price_id(target_price_id)
            .ok_or_else(|| BillingError::InvalidPriceId(target_price_id.to_string()))?
            .clone();

        let customer: Option<(Option<String>,)> =
            sqlx::query_as("SELECT stripe_customer_id FROM accounts WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        match customer {
            Some((Some(_),)) => {}
            _ => return Err(BillingError::CustomerNotFound(user_id.to_string())),
        }

        let record = self
            .active_record(user_id)
            .await?
            .ok_or(BillingError::NoActiveSubscription)?;
        let current_price_id = record
            .stripe_price_id
            .clone()
            .ok_or(BillingError::NoActiveSubscription)?;
        if current_price_id == target_price_id {
            return Err(BillingError::SamePlan);
        }
        let current_plan = self
            .catalog
            .by_price_id(&current_price_id)
            .ok_or_else(|| BillingError::InvalidPriceId(current_price_id.clone()))?
            .clone();

        // Fresh snapshot straight from Stripe, not the local cache. The
        // user may have changed billing through the self-service portal
        // since we last synced; a price mismatch means our view is stale
        // and the caller must reload and retry.
        let sub_id: SubscriptionId = record
            .stripe_subscription_id
            .parse()
            .map_err(|e| BillingError::StripeApi(format!("invalid subscription id: {}", e)))?;
        let snapshot = Subscription::retrieve(self.stripe.inner(), &sub_id, &[]).await?;

        let snapshot_price = subscription_price_id(&snapshot);
        if snapshot_price.as_deref() != Some(current_price_id.as_str()) {
            tracing::warn!(
                user_id = %user_id,
                local_price = %current_price_id,
                stripe_price = ?snapshot_price,
                "Subscription modified out of band, aborting plan change"
            );
            return Err(BillingError::SubscriptionModified);
        }

        if target_plan.monthly_credits > current_plan.monthly_credits {
            self.apply_upgrade(
                user_id,
                &record,
                &sub_id,
                &snapshot,
                &current_plan,
                &target_plan,
            )
            .await
        } else {
            self.schedule_downgrade(user_id, &record, &snapshot, &current_plan, &target_plan)
                .await
        }
    }

    async fn apply_upgrade(
        &self,
        user_id: Uuid,
        record: &SubscriptionRecord,
        sub_id: &SubscriptionId,
        snapshot: &Subscription,
        current_plan: &Plan,
        target_plan: &Plan,
    ) -> BillingResult<PlanChangeOutcome> {
        // A pending downgrade schedule must not survive an upgrade: release
        // it first so Stripe doesn't flip the price back at period end.
        let pending_schedule = record
            .stripe_schedule_id
            .clone()
            .or_else(|| snapshot.schedule.as_ref().map(|s| s.id().to_string()));
        if let Some(schedule_id) = pending_schedule {
            self.release_schedule(&schedule_id).await?;
            tracing::info!(
                user_id = %user_id,
                schedule_id = %schedule_id,
                "Released pending downgrade schedule before upgrade"
            );
        }

        let item_id = snapshot
            .items
            .data
            .first()
            .map(|item| item.id.to_string())
            .ok_or_else(|| BillingError::Internal("subscription has no items".to_string()))?;

        let params = UpdateSubscription {
            items: Some(vec![UpdateSubscriptionItems {
                id: Some(item_id),
                price: Some(target_plan.stripe_price_id.clone()),
                ..Default::default()
            }]),
            // Charge the prorated difference for the rest of the period
            proration_behavior: Some(SubscriptionProrationBehavior::CreateProrations),
            ..Default::default()
        };
        let updated = Subscription::update(self.stripe.inner(), sub_id, params).await?;

        let reference_id = format!("plan_change:{}", Uuid::new_v4());
        let balance = self.ledger.balance(user_id).await?;
        let grant = upgrade_grant_amount(
            target_plan.monthly_credits,
            current_plan.monthly_credits,
            balance.total(),
            target_plan.rollover_cap,
        );
        let mut credits_granted = 0;
        if grant > 0 {
            let outcome = self
                .ledger
                .grant_to_pool(
                    user_id,
                    grant,
                    CreditPool::Subscription,
                    TransactionType::Subscription,
                    &reference_id,
                    &format!("Upgrade to {}", target_plan.tier),
                    Some(target_plan.rollover_cap),
                )
                .await?;
            credits_granted = outcome.applied;
        } else {
            tracing::info!(
                user_id = %user_id,
                combined_balance = balance.total(),
                rollover_cap = target_plan.rollover_cap,
                "Upgrade credit grant withheld, balance already at cap"
            );
        }

        let period_start = timestamp(updated.current_period_start);
        let period_end = timestamp(updated.current_period_end);
        sqlx::query(
            r#"
            UPDATE subscriptions SET
                stripe_price_id = $1,
                scheduled_price_id = NULL,
                scheduled_change_at = NULL,
                stripe_schedule_id = NULL,
                current_period_start = $2,
                current_period_end = $3,
                updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(&target_plan.stripe_price_id)
        .bind(period_start)
        .bind(period_end)
        .bind(record.id)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE accounts SET subscription_tier = $1, updated_at = NOW() WHERE user_id = $2",
        )
        .bind(target_plan.tier)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            from_tier = current_plan.tier,
            to_tier = target_plan.tier,
            credits_granted = credits_granted,
            "Plan upgraded"
        );

        Ok(PlanChangeOutcome::Immediate {
            tier: target_plan.tier.to_string(),
            price_id: target_plan.stripe_price_id.clone(),
            credits_granted,
            current_period_end: period_end,
        })
    }

    async fn schedule_downgrade(
        &self,
        user_id: Uuid,
        record: &SubscriptionRecord,
        snapshot: &Subscription,
        current_plan: &Plan,
        target_plan: &Plan,
    ) -> BillingResult<PlanChangeOutcome> {
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let period_end = if snapshot.current_period_end > now {
            snapshot.current_period_end
        } else {
            // Snapshot came back without a usable period end; estimate the
            // boundary from the billing anchor and the price interval.
            let seconds = snapshot
                .items
                .data
                .first()
                .and_then(|item| item.price.as_ref())
                .and_then(|price| price.recurring.as_ref())
                .map(|r| interval_seconds(r.interval, r.interval_count))
                .unwrap_or(30 * 86_400);
            estimate_period_end(snapshot.billing_cycle_anchor, seconds, now)
        };

        let schedule_id = match record
            .stripe_schedule_id
            .clone()
            .or_else(|| snapshot.schedule.as_ref().map(|s| s.id().to_string()))
        {
            Some(existing) => existing,
            None => {
                let created: stripe::SubscriptionSchedule = self
                    .stripe
                    .inner()
                    .post_form(
                        "/subscription_schedules",
                        CreateScheduleFromSubscription {
                            from_subscription: &record.stripe_subscription_id,
                        },
                    )
                    .await?;
                created.id.to_string()
            }
        };

        // Phase 1 keeps the current price through period end with no
        // proration; phase 2 switches to the target. Release afterward so
        // the subscription returns to normal unscheduled operation.
        let phases = UpdateSchedulePhases {
            end_behavior: "release",
            phases: vec![
                SchedulePhaseParams {
                    items: vec![SchedulePhaseItemParams {
                        price: &current_plan.stripe_price_id,
                        quantity: 1,
                    }],
                    start_date: Some(snapshot.current_period_start),
                    end_date: Some(period_end),
                    proration_behavior: "none",
                },
                SchedulePhaseParams {
                    items: vec![SchedulePhaseItemParams {
                        price: &target_plan.stripe_price_id,
                        quantity: 1,
                    }],
                    start_date: None,
                    end_date: None,
                    proration_behavior: "none",
                },
            ],
        };
        let _: stripe::SubscriptionSchedule = self
            .stripe
            .inner()
            .post_form(&format!("/subscription_schedules/{}", schedule_id), phases)
            .await?;

        let effective_at = timestamp(period_end);
        sqlx::query(
            r#"
            UPDATE subscriptions SET
                scheduled_price_id = $1,
                scheduled_change_at = $2,
                stripe_schedule_id = $3,
                updated_at = NOW()
            WHERE id = $4
            "#,
        )
        .bind(&target_plan.stripe_price_id)
        .bind(effective_at)
        .bind(&schedule_id)
        .bind(record.id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            from_tier = current_plan.tier,
            to_tier = target_plan.tier,
            schedule_id = %schedule_id,
            effective_at = ?effective_at,
            "Plan downgrade scheduled for period end"
        );

        Ok(PlanChangeOutcome::Scheduled {
            tier: target_plan.tier.to_string(),
            price_id: target_plan.stripe_price_id.clone(),
            schedule_id,
            effective_at,
        })
    }

    /// Release a subscription schedule back to a plain subscription.
    async fn release_schedule(&self, schedule_id: &str) -> BillingResult<()> {
        let _: stripe::SubscriptionSchedule = self
            .stripe
            .inner()
            .post(&format!("/subscription_schedules/{}/release", schedule_id))
            .await?;
        Ok(())
    }

    /// Upsert the local record from a Stripe subscription payload and keep
    /// the account's status/tier columns in sync. Grants nothing; the
    /// webhook handlers own all credit decisions.
    pub async fn sync_subscription(
        &self,
        user_id: Uuid,
        subscription: &Subscription,
    ) -> BillingResult<SyncOutcome> {
        let previous_status: Option<String> =
            sqlx::query_scalar("SELECT status FROM subscriptions WHERE stripe_subscription_id = $1")
                .bind(subscription.id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        let status = local_status(subscription.status);
        let price_id = subscription_price_id(subscription);
        let tier = price_id
            .as_deref()
            .and_then(|p| self.catalog.by_price_id(p))
            .map(|plan| plan.tier);

        sqlx::query(
            r#"
            INSERT INTO subscriptions
                (user_id, stripe_subscription_id, status, stripe_price_id,
                 current_period_start, current_period_end)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (stripe_subscription_id) DO UPDATE SET
                status = EXCLUDED.status,
                stripe_price_id = EXCLUDED.stripe_price_id,
                current_period_start = EXCLUDED.current_period_start,
                current_period_end = EXCLUDED.current_period_end,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(subscription.id.as_str())
        .bind(status.as_str())
        .bind(&price_id)
        .bind(timestamp(subscription.current_period_start))
        .bind(timestamp(subscription.current_period_end))
        .execute(&self.pool)
        .await?;

        let customer_id = subscription.customer.id().to_string();
        sqlx::query("INSERT INTO accounts (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        sqlx::query(
            r#"
            UPDATE accounts SET
                subscription_status = $1,
                subscription_tier = $2,
                stripe_customer_id = COALESCE(stripe_customer_id, $3),
                updated_at = NOW()
            WHERE user_id = $4
            "#,
        )
        .bind(status.as_str())
        .bind(tier)
        .bind(&customer_id)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        Ok(SyncOutcome {
            previous_status,
            status,
        })
    }

    /// Mark the subscription canceled and clear the account's tier.
    pub async fn mark_canceled(&self, stripe_subscription_id: &str) -> BillingResult<Option<Uuid>> {
        let user_id: Option<Uuid> = sqlx::query_scalar(
            "UPDATE subscriptions SET status = 'canceled', updated_at = NOW() \
             WHERE stripe_subscription_id = $1 RETURNING user_id",
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(user_id) = user_id {
            sqlx::query(
                "UPDATE accounts SET subscription_status = 'canceled', \
                 subscription_tier = NULL, updated_at = NOW() WHERE user_id = $1",
            )
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(user_id)
    }

    /// Apply a completed schedule transition: flip the recorded price and
    /// tier to the scheduled target and clear the scheduled fields.
    ///
    /// Deliberately touches no balances. Credits for the new tier arrive
    /// with the next renewal invoice; granting here as well is exactly the
    /// double-grant this handler once shipped with.
    pub async fn complete_scheduled_change(
        &self,
        stripe_subscription_id: &str,
    ) -> BillingResult<Option<String>> {
        let row: Option<(Uuid, Uuid, Option<String>)> = sqlx::query_as(
            "SELECT id, user_id, scheduled_price_id FROM subscriptions \
             WHERE stripe_subscription_id = $1",
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((record_id, user_id, Some(scheduled_price_id))) = row else {
            tracing::info!(
                subscription_id = %stripe_subscription_id,
                "Schedule completed with no pending local change, nothing to apply"
            );
            return Ok(None);
        };

        let tier = self
            .catalog
            .by_price_id(&scheduled_price_id)
            .map(|plan| plan.tier);

        sqlx::query(
            r#"
            UPDATE subscriptions SET
                stripe_price_id = $1,
                scheduled_price_id = NULL,
                scheduled_change_at = NULL,
                stripe_schedule_id = NULL,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(&scheduled_price_id)
        .bind(record_id)
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE accounts SET subscription_tier = $1, updated_at = NOW() WHERE user_id = $2",
        )
        .bind(tier)
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %user_id,
            subscription_id = %stripe_subscription_id,
            new_tier = ?tier,
            "Scheduled plan change completed"
        );

        Ok(tier.map(str::to_string))
    }

    /// The user's current entitling subscription record, if any.
    pub async fn active_record(&self, user_id: Uuid) -> BillingResult<Option<SubscriptionRecord>> {
        let record: Option<SubscriptionRecord> = sqlx::query_as(
            r#"
            SELECT id, user_id, stripe_subscription_id, status, stripe_price_id,
                   scheduled_price_id, scheduled_change_at, stripe_schedule_id,
                   current_period_start, current_period_end
            FROM subscriptions
            WHERE user_id = $1 AND status IN ('active', 'trialing', 'past_due')
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(record)
    }

    /// Read model for the account page: plan, period bounds, pending change.
    pub async fn current_subscription(
        &self,
        user_id: Uuid,
    ) -> BillingResult<Option<SubscriptionView>> {
        let Some(record) = self.active_record(user_id).await? else {
            return Ok(None);
        };

        let tier = record
            .stripe_price_id
            .as_deref()
            .and_then(|p| self.catalog.by_price_id(p))
            .map(|plan| plan.tier.to_string());
        let scheduled_tier = record
            .scheduled_price_id
            .as_deref()
            .and_then(|p| self.catalog.by_price_id(p))
            .map(|plan| plan.tier.to_string());

        Ok(Some(SubscriptionView {
            status: record.status,
            tier,
            price_id: record.stripe_price_id,
            current_period_start: record.current_period_start,
            current_period_end: record.current_period_end,
            scheduled_tier,
            scheduled_change_at: record.scheduled_change_at,
        }))
    }
}

fn timestamp(unix: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(unix).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_grants_the_difference() {
        // starter (100) to pro (300) with a modest balance
        assert_eq!(upgrade_grant_amount(300, 100, 150, 1200), 200);
    }

    #[test]
    fn upgrade_grant_withheld_at_cap() {
        // Bouncing down and back up with a full balance farms nothing
        assert_eq!(upgrade_grant_amount(300, 100, 1200, 1200), 0);
        assert_eq!(upgrade_grant_amount(300, 100, 5000, 1200), 0);
    }

    #[test]
    fn upgrade_grant_just_under_cap_still_applies() {
        assert_eq!(upgrade_grant_amount(300, 100, 1199, 1200), 200);
    }

    #[test]
    fn equal_or_lower_allotment_grants_nothing() {
        assert_eq!(upgrade_grant_amount(100, 300, 0, 400), 0);
        assert_eq!(upgrade_grant_amount(300, 300, 0, 1200), 0);
    }

    #[test]
    fn period_end_estimate_lands_after_now() {
        let anchor = 1_700_000_000;
        let month = 30 * 86_400;
        let now = anchor + month * 3 + 12_345;
        let end = estimate_period_end(anchor, month, now);
        assert!(end > now);
        assert_eq!(end, anchor + month * 4);
    }

    #[test]
    fn period_end_estimate_with_future_anchor() {
        let now = 1_700_000_000;
        assert_eq!(estimate_period_end(now + 500, 86_400, now), now + 500);
    }

    #[test]
    fn period_end_estimate_degenerate_interval() {
        let now = 1_700_000_000;
        assert_eq!(estimate_period_end(now - 100, 0, now), now);
    }

    #[test]
    fn interval_seconds_scales_by_count() {
        assert_eq!(
            interval_seconds(stripe::RecurringInterval::Month, 1),
            30 * 86_400
        );
        assert_eq!(
            interval_seconds(stripe::RecurringInterval::Week, 2),
            14 * 86_400
        );
        // A zero count is treated as one interval
        assert_eq!(interval_seconds(stripe::RecurringInterval::Day, 0), 86_400);
    }
}
