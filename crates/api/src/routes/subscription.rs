//! Subscription routes: current plan and plan changes.

use axum::{
    extract::{Extension, State},
    Json,
};
use pixlift_billing::{PlanChangeOutcome, SubscriptionView};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `GET /api/billing/subscription`
pub async fn get_subscription(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<SubscriptionView>> {
    let view = state
        .billing
        .subscriptions
        .current_subscription(user.user_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("no active subscription".to_string()))?;

    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
pub struct ChangePlanRequest {
    pub price_id: String,
}

/// `POST /api/billing/subscription/change-plan`
///
/// Upgrades apply immediately; downgrades come back as a scheduled change.
/// A 409 means the subscription changed out of band and the client should
/// refetch and retry.
pub async fn change_plan(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<ChangePlanRequest>,
) -> ApiResult<Json<PlanChangeOutcome>> {
    let outcome = state
        .billing
        .subscriptions
        .change_plan(user.user_id, &req.price_id)
        .await?;

    Ok(Json(outcome))
}
