//! Credit routes: balance, history, and the consume/refund entry points
//! used by the image-processing pipeline.
//!
//! The pipeline calls `consume` before doing paid work and `refund` with
//! the same reference if the work fails. Those two operations are the
//! entirety of its contract with billing.

use axum::{
    extract::{Extension, Query, State},
    Json,
};
use pixlift_billing::{Balance, ConsumeOutcome, CreditPool, GrantOutcome, LedgerEntry};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// `GET /api/credits`
pub async fn get_balance(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
) -> ApiResult<Json<Balance>> {
    let balance = state.billing.ledger.balance(user.user_id).await?;
    Ok(Json(balance))
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// `GET /api/credits/history`
pub async fn get_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<LedgerEntry>>> {
    let rows = state
        .billing
        .ledger
        .history(
            user.user_id,
            query.limit.unwrap_or(50),
            query.offset.unwrap_or(0),
        )
        .await?;
    Ok(Json(rows))
}

#[derive(Debug, Deserialize)]
pub struct ConsumeRequest {
    pub amount: i64,
    pub reference_id: String,
    pub description: Option<String>,
}

/// `POST /api/credits/consume`
///
/// Returns 402 with `INSUFFICIENT_CREDITS` when the combined balance
/// cannot cover the amount; nothing is deducted in that case.
pub async fn consume(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<ConsumeRequest>,
) -> ApiResult<Json<ConsumeOutcome>> {
    let outcome = state
        .billing
        .ledger
        .consume(
            user.user_id,
            req.amount,
            &req.reference_id,
            req.description.as_deref().unwrap_or("Image processing"),
        )
        .await?;
    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub amount: i64,
    pub pool: String,
    pub reference_id: String,
    pub description: Option<String>,
}

/// `POST /api/credits/refund`
pub async fn refund(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(req): Json<RefundRequest>,
) -> ApiResult<Json<GrantOutcome>> {
    let pool = match req.pool.as_str() {
        "subscription" => CreditPool::Subscription,
        "purchased" => CreditPool::Purchased,
        other => {
            return Err(ApiError::BadRequest {
                code: "INVALID_POOL",
                message: format!("unknown credit pool '{}'", other),
            })
        }
    };

    let outcome = state
        .billing
        .ledger
        .refund_to_pool(
            user.user_id,
            req.amount,
            pool,
            &req.reference_id,
            req.description.as_deref().unwrap_or("Processing refund"),
        )
        .await?;
    Ok(Json(outcome))
}
