//! Billing error taxonomy.
//!
//! Errors carry enough structure for the API layer to map them to stable
//! machine-readable codes and HTTP statuses without string matching.

use thiserror::Error;
use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    #[error("database error: {0}")]
    Database(String),

    #[error("stripe api error: {0}")]
    StripeApi(String),

    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    #[error("unsupported webhook payload: {0}")]
    WebhookEventNotSupported(String),

    #[error("unknown price id: {0}")]
    InvalidPriceId(String),

    #[error("subscription is already on the requested plan")]
    SamePlan,

    #[error("no active subscription for this account")]
    NoActiveSubscription,

    #[error("stripe customer not found: {0}")]
    CustomerNotFound(String),

    #[error("subscription was modified out of band; reload and retry")]
    SubscriptionModified,

    #[error("insufficient credits: requested {requested}, available {available}")]
    InsufficientCredits { requested: i64, available: i64 },

    #[error("no grant transaction found for reference {0}")]
    NoCreditsFound(String),

    #[error("amount must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal billing error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(e: stripe::StripeError) -> Self {
        BillingError::StripeApi(e.to_string())
    }
}
