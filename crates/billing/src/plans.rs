//! Subscription plan catalog.
//!
//! Plans are defined in code; only their Stripe price ids come from
//! configuration. Upgrade vs downgrade is decided purely by monthly credit
//! allotment, so a future plan with the same allotment at a different price
//! classifies as a downgrade (no extra credits are handed out).

use crate::client::PriceIds;

/// Price of one credit in cents, used to convert disputed charge amounts
/// into credit holds.
pub const CENTS_PER_CREDIT: i64 = 10;

/// Credits to hold for a disputed charge amount, rounded up so a dispute
/// never holds less than the charge was worth.
pub fn credits_for_cents(amount_cents: i64) -> i64 {
    if amount_cents <= 0 {
        return 0;
    }
    (amount_cents + CENTS_PER_CREDIT - 1) / CENTS_PER_CREDIT
}

/// Subscription plan configuration.
#[derive(Debug, Clone)]
pub struct Plan {
    pub tier: &'static str,
    pub stripe_price_id: String,
    /// Credits granted on each paid renewal invoice.
    pub monthly_credits: i64,
    /// Hard ceiling the subscription pool may reach through grants.
    pub rollover_cap: i64,
    /// Credits granted when a trial starts on this plan.
    pub trial_credits: i64,
}

impl Plan {
    /// Starter: 100 credits/month, rolls over up to 4 months.
    pub fn starter(price_id: &str) -> Self {
        Self {
            tier: "starter",
            stripe_price_id: price_id.to_string(),
            monthly_credits: 100,
            rollover_cap: 400,
            trial_credits: 25,
        }
    }

    /// Pro: 300 credits/month.
    pub fn pro(price_id: &str) -> Self {
        Self {
            tier: "pro",
            stripe_price_id: price_id.to_string(),
            monthly_credits: 300,
            rollover_cap: 1_200,
            trial_credits: 25,
        }
    }

    /// Studio: 1000 credits/month.
    pub fn studio(price_id: &str) -> Self {
        Self {
            tier: "studio",
            stripe_price_id: price_id.to_string(),
            monthly_credits: 1_000,
            rollover_cap: 4_000,
            trial_credits: 25,
        }
    }
}

/// Lookup table over the configured plans.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<Plan>,
}

impl PlanCatalog {
    pub fn new(price_ids: &PriceIds) -> Self {
        Self {
            plans: vec![
                Plan::starter(&price_ids.starter),
                Plan::pro(&price_ids.pro),
                Plan::studio(&price_ids.studio),
            ],
        }
    }

    pub fn by_price_id(&self, price_id: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.stripe_price_id == price_id)
    }

    pub fn by_tier(&self, tier: &str) -> Option<&Plan> {
        self.plans.iter().find(|p| p.tier == tier)
    }

    pub fn plans(&self) -> &[Plan] {
        &self.plans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> PlanCatalog {
        PlanCatalog::new(&PriceIds {
            starter: "price_starter".into(),
            pro: "price_pro".into(),
            studio: "price_studio".into(),
        })
    }

    #[test]
    fn lookup_by_price_and_tier_agree() {
        let catalog = catalog();
        let pro = catalog.by_price_id("price_pro").unwrap();
        assert_eq!(pro.tier, "pro");
        assert_eq!(catalog.by_tier("pro").unwrap().stripe_price_id, "price_pro");
    }

    #[test]
    fn unknown_price_id_is_none() {
        assert!(catalog().by_price_id("price_nope").is_none());
    }

    #[test]
    fn rollover_caps_are_four_months() {
        for plan in catalog().plans() {
            assert_eq!(plan.rollover_cap, plan.monthly_credits * 4);
        }
    }

    #[test]
    fn dispute_credit_conversion_rounds_up() {
        // 995 cents at 10 cents/credit is 99.5 credits, held as 100
        assert_eq!(credits_for_cents(995), 100);
        assert_eq!(credits_for_cents(1000), 100);
        assert_eq!(credits_for_cents(1001), 101);
        assert_eq!(credits_for_cents(1), 1);
        assert_eq!(credits_for_cents(0), 0);
        assert_eq!(credits_for_cents(-500), 0);
    }
}
