//! Stripe webhook intake.

use axum::{extract::State, http::HeaderMap, http::StatusCode};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `POST /api/webhooks/stripe`
///
/// Signature or parse failures reject with 400. Everything after a
/// successful claim returns 200, including handler failures: Stripe
/// retries on non-2xx, and a retry of a claimed event would be refused by
/// the idempotency gate anyway. Unknown event types are accepted and
/// ignored.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<StatusCode> {
    let signature = headers
        .get("Stripe-Signature")
        .and_then(|v| v.to_str().ok())
        .ok_or(ApiError::BadRequest {
            code: "MISSING_SIGNATURE",
            message: "Stripe-Signature header is required".to_string(),
        })?;

    let event = state.billing.webhooks.verify_event(&body, signature)?;
    state.billing.webhooks.handle_event(event).await?;

    Ok(StatusCode::OK)
}
