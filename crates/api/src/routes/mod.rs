//! HTTP routes.

pub mod credits;
pub mod subscription;
pub mod webhooks;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::auth::require_auth;
use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let authed = Router::new()
        .route("/api/billing/subscription", get(subscription::get_subscription))
        .route(
            "/api/billing/subscription/change-plan",
            post(subscription::change_plan),
        )
        .route("/api/credits", get(credits::get_balance))
        .route("/api/credits/history", get(credits::get_history))
        .route("/api/credits/consume", post(credits::consume))
        .route("/api/credits/refund", post(credits::refund))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .route("/health", get(health))
        // Webhook intake authenticates by signature, not by session
        .route("/api/webhooks/stripe", post(webhooks::stripe_webhook))
        .merge(authed)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
