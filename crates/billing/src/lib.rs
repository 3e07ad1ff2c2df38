// Billing crate clippy configuration
#![allow(clippy::too_many_arguments)] // Ledger operations carry full audit context
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Pixlift Billing Module
//!
//! Handles the credit ledger and Stripe integration for subscriptions.
//!
//! ## Features
//!
//! - **Credit Ledger**: dual-pool balances (subscription vs purchased) with
//!   an append-only transaction log; the sole writer of balance fields
//! - **Webhooks**: idempotent handling of Stripe events
//! - **Plan Changes**: immediate prorated upgrades, scheduled downgrades
//!   via Stripe subscription schedules
//! - **Disputes**: chargeback credit holds and resolution tracking
//! - **Invariants**: runnable consistency checks over billing state

pub mod client;
pub mod disputes;
pub mod error;
pub mod idempotency;
pub mod invariants;
pub mod ledger;
pub mod plans;
pub mod subscriptions;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Disputes
pub use disputes::{DisputeRecord, DisputeService};

// Error
pub use error::{BillingError, BillingResult};

// Idempotency
pub use idempotency::{Claim, EventGate, ProcessedEvent};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::{
    Balance, ClawbackOutcome, ClawbackPool, ConsumeOutcome, CreditLedger, CreditPool,
    GrantOutcome, LedgerEntry, LedgerPool, TransactionType,
};

// Plans
pub use plans::{credits_for_cents, Plan, PlanCatalog, CENTS_PER_CREDIT};

// Subscriptions
pub use subscriptions::{
    PlanChangeOutcome, SubscriptionRecord, SubscriptionService, SubscriptionView,
};

// Webhooks
pub use webhooks::WebhookHandler;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub ledger: CreditLedger,
    pub subscriptions: SubscriptionService,
    pub disputes: DisputeService,
    pub webhooks: WebhookHandler,
    pub invariants: InvariantChecker,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::new(stripe, pool))
    }

    /// Create a new billing service with an explicit Stripe client
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let ledger = CreditLedger::new(pool.clone());
        let subscriptions = SubscriptionService::new(stripe.clone(), pool.clone(), ledger.clone());
        let disputes = DisputeService::new(pool.clone(), ledger.clone());
        let webhooks = WebhookHandler::new(
            stripe,
            pool.clone(),
            ledger.clone(),
            subscriptions.clone(),
            disputes.clone(),
        );

        Self {
            ledger,
            subscriptions,
            disputes,
            webhooks,
            invariants: InvariantChecker::new(pool),
        }
    }
}
