//! Stripe client wrapper and configuration.

use crate::error::{BillingError, BillingResult};

/// Stripe price ids for the subscription plans, loaded from environment.
#[derive(Debug, Clone)]
pub struct PriceIds {
    pub starter: String,
    pub pro: String,
    pub studio: String,
}

/// Stripe configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub price_ids: PriceIds,
}

impl StripeConfig {
    pub fn from_env() -> BillingResult<Self> {
        let require = |name: &str| {
            std::env::var(name).map_err(|_| BillingError::Config(format!("{} must be set", name)))
        };

        Ok(Self {
            secret_key: require("STRIPE_SECRET_KEY")?,
            webhook_secret: require("STRIPE_WEBHOOK_SECRET")?,
            price_ids: PriceIds {
                starter: require("STRIPE_PRICE_STARTER")?,
                pro: require("STRIPE_PRICE_PRO")?,
                studio: require("STRIPE_PRICE_STUDIO")?,
            },
        })
    }
}

/// Thin wrapper around the async-stripe client that carries our config.
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self { client, config }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// The underlying async-stripe client, for generated API calls.
    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
