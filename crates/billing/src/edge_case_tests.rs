// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing System
//!
//! Tests critical boundary conditions in:
//! - Ledger pool math (LEDG-01 to LEDG-12)
//! - Rollover caps (CAP-01 to CAP-05)
//! - Plan changes (PLAN-01 to PLAN-06)
//! - Disputes (DISP-01 to DISP-04)
//! - Webhook verification (WH-01 to WH-03)

#[cfg(test)]
mod ledger_pool_tests {
    use crate::ledger::*;

    // =========================================================================
    // LEDG-01: Consume 50 from sub=30/pur=50 - subscription drains first
    // =========================================================================
    #[test]
    fn test_consume_subscription_first() {
        let draw = plan_consume(30, 50, 50).unwrap();
        assert_eq!(draw.from_subscription, 30, "Subscription pool drains first");
        assert_eq!(draw.from_purchased, 20);
        assert_eq!(
            draw.ledger_pool(),
            Some(LedgerPool::Mixed),
            "Both pools contributed, logged as mixed"
        );
    }

    // =========================================================================
    // LEDG-02: Consume exactly the combined balance - succeeds, both at zero
    // =========================================================================
    #[test]
    fn test_consume_exact_combined_balance() {
        let draw = plan_consume(30, 50, 80).unwrap();
        assert_eq!(draw.from_subscription, 30);
        assert_eq!(draw.from_purchased, 50);
    }

    // =========================================================================
    // LEDG-03: Consume one more than available - whole operation fails
    // =========================================================================
    #[test]
    fn test_consume_one_over_fails_whole() {
        assert_eq!(
            plan_consume(30, 50, 81),
            Err(80),
            "No partial deduction on shortfall"
        );
    }

    // =========================================================================
    // LEDG-04: Consume from empty account
    // =========================================================================
    #[test]
    fn test_consume_from_empty_account() {
        assert_eq!(plan_consume(0, 0, 1), Err(0));
    }

    // =========================================================================
    // LEDG-05: Consume covered by subscription pool alone - not mixed
    // =========================================================================
    #[test]
    fn test_single_pool_consume_label() {
        let draw = plan_consume(100, 100, 100).unwrap();
        assert_eq!(draw.from_purchased, 0);
        assert_eq!(draw.ledger_pool(), Some(LedgerPool::Subscription));
    }

    // =========================================================================
    // LEDG-10: Auto clawback of 50 from sub=30/pur=20 - drains both fully
    // =========================================================================
    #[test]
    fn test_auto_clawback_drains_in_order() {
        let draw = plan_clawback(30, 20, 50, ClawbackPool::Auto);
        assert_eq!(draw.from_subscription, 30);
        assert_eq!(draw.from_purchased, 20);
        assert_eq!(draw.total(), 50);
    }

    // =========================================================================
    // LEDG-11: Auto clawback of 100 from sub=30/pur=20 - claws only 50
    // =========================================================================
    #[test]
    fn test_clawback_capped_at_available() {
        let draw = plan_clawback(30, 20, 100, ClawbackPool::Auto);
        assert_eq!(draw.total(), 50, "Clawback never drives a balance negative");
    }

    // =========================================================================
    // LEDG-12: Targeted clawback ignores the other pool entirely
    // =========================================================================
    #[test]
    fn test_targeted_clawback_single_pool() {
        let draw = plan_clawback(10, 1_000, 100, ClawbackPool::Subscription);
        assert_eq!(draw.from_subscription, 10);
        assert_eq!(draw.from_purchased, 0, "Purchased pool untouched");
    }
}

#[cfg(test)]
mod rollover_cap_tests {
    use crate::ledger::apply_rollover_cap;

    // =========================================================================
    // CAP-01: Grant 300 at balance 1100 with cap 1200 - applies only 100
    // =========================================================================
    #[test]
    fn test_partial_grant_at_cap_boundary() {
        assert_eq!(apply_rollover_cap(1100, 300, Some(1200)), 100);
    }

    // =========================================================================
    // CAP-02: Grant at exactly the cap - zero applied
    // =========================================================================
    #[test]
    fn test_grant_at_cap_is_noop() {
        assert_eq!(apply_rollover_cap(1200, 300, Some(1200)), 0);
    }

    // =========================================================================
    // CAP-03: Balance already over cap (cap was lowered) - never negative
    // =========================================================================
    #[test]
    fn test_grant_over_cap_never_negative() {
        assert_eq!(apply_rollover_cap(2000, 300, Some(1200)), 0);
    }

    // =========================================================================
    // CAP-04: Grant landing exactly on the cap applies fully
    // =========================================================================
    #[test]
    fn test_grant_landing_on_cap() {
        assert_eq!(apply_rollover_cap(900, 300, Some(1200)), 300);
    }

    // =========================================================================
    // CAP-05: Refund-style uncapped grant ignores any balance
    // =========================================================================
    #[test]
    fn test_uncapped_grant_applies_fully() {
        assert_eq!(apply_rollover_cap(10_000, 300, None), 300);
    }
}

#[cfg(test)]
mod plan_change_tests {
    use crate::client::PriceIds;
    use crate::plans::PlanCatalog;
    use crate::subscriptions::upgrade_grant_amount;

    fn catalog() -> PlanCatalog {
        PlanCatalog::new(&PriceIds {
            starter: "price_starter".into(),
            pro: "price_pro".into(),
            studio: "price_studio".into(),
        })
    }

    // =========================================================================
    // PLAN-01: Upgrade classification is by monthly credits
    // =========================================================================
    #[test]
    fn test_upgrade_is_more_monthly_credits() {
        let catalog = catalog();
        let starter = catalog.by_tier("starter").unwrap();
        let pro = catalog.by_tier("pro").unwrap();
        assert!(pro.monthly_credits > starter.monthly_credits);
    }

    // =========================================================================
    // PLAN-02: Upgrade grant is the plan difference
    // =========================================================================
    #[test]
    fn test_upgrade_grant_is_difference() {
        // starter 100/mo to studio 1000/mo
        assert_eq!(upgrade_grant_amount(1000, 100, 0, 4000), 900);
    }

    // =========================================================================
    // PLAN-03: Balance at the new plan's cap farms nothing
    // =========================================================================
    #[test]
    fn test_upgrade_grant_withheld_when_balance_high() {
        assert_eq!(upgrade_grant_amount(1000, 100, 4000, 4000), 0);
        assert_eq!(upgrade_grant_amount(1000, 100, 9999, 4000), 0);
    }

    // =========================================================================
    // PLAN-04: One credit under the cap still receives the difference
    // =========================================================================
    #[test]
    fn test_upgrade_grant_just_under_cap() {
        assert_eq!(upgrade_grant_amount(1000, 100, 3999, 4000), 900);
    }

    // =========================================================================
    // PLAN-05: Downgrade direction never grants
    // =========================================================================
    #[test]
    fn test_downgrade_never_grants() {
        assert_eq!(upgrade_grant_amount(100, 1000, 0, 400), 0);
    }

    // =========================================================================
    // PLAN-06: Same allotment is not an upgrade
    // =========================================================================
    #[test]
    fn test_equal_plans_grant_nothing() {
        assert_eq!(upgrade_grant_amount(300, 300, 0, 1200), 0);
    }
}

#[cfg(test)]
mod dispute_tests {
    use crate::plans::{credits_for_cents, CENTS_PER_CREDIT};

    // =========================================================================
    // DISP-01: Hold amount rounds up to whole credits
    // =========================================================================
    #[test]
    fn test_hold_rounds_up() {
        assert_eq!(credits_for_cents(CENTS_PER_CREDIT + 1), 2);
        assert_eq!(credits_for_cents(2 * CENTS_PER_CREDIT - 1), 2);
    }

    // =========================================================================
    // DISP-02: Exact multiples don't over-hold
    // =========================================================================
    #[test]
    fn test_exact_multiple_holds_exactly() {
        assert_eq!(credits_for_cents(5 * CENTS_PER_CREDIT), 5);
    }

    // =========================================================================
    // DISP-03: A one-cent dispute still holds one credit
    // =========================================================================
    #[test]
    fn test_minimum_hold_is_one_credit() {
        assert_eq!(credits_for_cents(1), 1);
    }

    // =========================================================================
    // DISP-04: Zero or refunded amounts hold nothing
    // =========================================================================
    #[test]
    fn test_zero_amount_holds_nothing() {
        assert_eq!(credits_for_cents(0), 0);
        assert_eq!(credits_for_cents(-100), 0);
    }
}

#[cfg(test)]
mod webhook_tests {
    use crate::webhooks::trial_conversion_grant;

    // =========================================================================
    // WH-01: Trial conversion where trial credits remain - tops up only
    // =========================================================================
    #[test]
    fn test_conversion_tops_up() {
        // 25 trial credits still held, plan allots 300
        assert_eq!(trial_conversion_grant(300, 25), 275);
    }

    // =========================================================================
    // WH-02: Account already holds the full allotment - zero grant
    // =========================================================================
    #[test]
    fn test_conversion_idempotent_at_full_allotment() {
        assert_eq!(
            trial_conversion_grant(300, 300),
            0,
            "Conversion is a top-up, never a second full grant"
        );
    }

    // =========================================================================
    // WH-03: Trial credits fully spent - conversion grants the allotment
    // =========================================================================
    #[test]
    fn test_conversion_after_spending_trial() {
        assert_eq!(trial_conversion_grant(300, 0), 300);
    }
}
