//! API error types and HTTP mapping.
//!
//! Every error leaving a handler becomes a JSON body with a stable
//! machine-readable code; clients branch on the code, never the message.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pixlift_billing::BillingError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("{message}")]
    BadRequest { code: &'static str, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Status code and stable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::BadRequest { code, .. } => (StatusCode::BAD_REQUEST, code),
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::Billing(e) => match e {
                BillingError::InvalidPriceId(_) => (StatusCode::BAD_REQUEST, "INVALID_PRICE_ID"),
                BillingError::SamePlan => (StatusCode::BAD_REQUEST, "SAME_PLAN"),
                BillingError::NoActiveSubscription => {
                    (StatusCode::BAD_REQUEST, "NO_ACTIVE_SUBSCRIPTION")
                }
                BillingError::CustomerNotFound(_) => {
                    (StatusCode::NOT_FOUND, "STRIPE_CUSTOMER_NOT_FOUND")
                }
                // Retryable by the caller after refetching their state
                BillingError::SubscriptionModified => {
                    (StatusCode::CONFLICT, "SUBSCRIPTION_MODIFIED")
                }
                BillingError::InsufficientCredits { .. } => {
                    (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_CREDITS")
                }
                BillingError::NoCreditsFound(_) => (StatusCode::NOT_FOUND, "NO_CREDITS_FOUND"),
                BillingError::InvalidAmount(_) => (StatusCode::BAD_REQUEST, "INVALID_AMOUNT"),
                BillingError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "ACCOUNT_NOT_FOUND"),
                BillingError::WebhookSignatureInvalid
                | BillingError::WebhookEventNotSupported(_) => {
                    (StatusCode::BAD_REQUEST, "WEBHOOK_INVALID")
                }
                BillingError::StripeApi(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STRIPE_ERROR"),
                BillingError::Database(_)
                | BillingError::Config(_)
                | BillingError::Internal(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
            },
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // 5xx details stay in the logs, not the response body
        let message = if status.is_server_error() {
            tracing::error!(error = %self, code = code, "Request failed");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_change_conflicts_are_409() {
        let (status, code) = ApiError::Billing(BillingError::SubscriptionModified).status_and_code();
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, "SUBSCRIPTION_MODIFIED");
    }

    #[test]
    fn insufficient_credits_is_402() {
        let err = ApiError::Billing(BillingError::InsufficientCredits {
            requested: 10,
            available: 4,
        });
        let (status, code) = err.status_and_code();
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(code, "INSUFFICIENT_CREDITS");
    }

    #[test]
    fn stripe_failures_are_masked_500s() {
        let (status, code) =
            ApiError::Billing(BillingError::StripeApi("boom".into())).status_and_code();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(code, "STRIPE_ERROR");
    }

    #[test]
    fn validation_errors_are_400() {
        let (status, code) =
            ApiError::Billing(BillingError::InvalidPriceId("price_x".into())).status_and_code();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "INVALID_PRICE_ID");

        let (status, code) = ApiError::Billing(BillingError::SamePlan).status_and_code();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "SAME_PLAN");
    }
}
