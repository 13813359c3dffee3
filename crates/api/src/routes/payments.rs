//! Web payment verification and cancellation endpoints.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use salonpass_ledger::{CancelRequest, LedgerError};
use salonpass_shared::{PlanTier, Product};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentRequest {
    pub payment_id: String,
    pub plan_key: String,
    pub user_id: String,
    pub user_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyPaymentResponse {
    pub success: bool,
    pub tokens: i64,
    pub new_balance: i64,
    pub plan: PlanTier,
    #[serde(with = "time::serde::rfc3339::option")]
    pub plan_expires_at: Option<OffsetDateTime>,
}

/// `POST /payments/verify` — verify a gateway payment and credit the
/// account, exactly once per payment id.
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(request): Json<VerifyPaymentRequest>,
) -> ApiResult<Json<VerifyPaymentResponse>> {
    let product = Product::by_key(&request.plan_key)
        .ok_or_else(|| ApiError::Ledger(LedgerError::UnknownProduct(request.plan_key.clone())))?;

    let verified = state
        .ledger
        .gateway_verifier
        .verify(&request.payment_id, product)
        .await?;

    let outcome = state
        .ledger
        .charger
        .charge(
            &request.user_id,
            &verified,
            request.user_name.as_deref(),
            OffsetDateTime::now_utc(),
        )
        .await?;

    Ok(Json(VerifyPaymentResponse {
        success: true,
        tokens: outcome.tokens_granted,
        new_balance: outcome.new_balance,
        plan: outcome.plan,
        plan_expires_at: outcome.plan_expires_at,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelPaymentRequest {
    pub payment_id: String,
    pub reason: Option<String>,
    pub user_id: Option<String>,
    /// Admin session token; its validity, not a client-side flag, is what
    /// grants admin cancellation rights.
    pub session_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CancelPaymentResponse {
    pub success: bool,
    pub restored: RestoredState,
}

#[derive(Debug, Serialize)]
pub struct RestoredState {
    pub tokens: i64,
    pub plan: PlanTier,
}

/// `POST /payments/cancel` — reverse a payment through the gateway and
/// restore the account from the stored snapshot.
pub async fn cancel_payment(
    State(state): State<AppState>,
    Json(request): Json<CancelPaymentRequest>,
) -> ApiResult<Json<CancelPaymentResponse>> {
    let now = OffsetDateTime::now_utc();

    let is_admin = match &request.session_token {
        Some(token) => state.admin.validate_session(token, now).await.is_ok(),
        None => false,
    };

    let requested_by = request.user_id.clone().unwrap_or_default();
    if requested_by.is_empty() && !is_admin {
        return Err(ApiError::Validation(
            "userId or a valid admin session is required".into(),
        ));
    }

    let outcome = state
        .ledger
        .cancellation
        .cancel(
            &CancelRequest {
                payment_id: request.payment_id,
                requested_by,
                is_admin,
                reason: request.reason,
            },
            now,
        )
        .await?;

    Ok(Json(CancelPaymentResponse {
        success: true,
        restored: RestoredState {
            tokens: outcome.restored_tokens,
            plan: outcome.restored_plan,
        },
    }))
}
