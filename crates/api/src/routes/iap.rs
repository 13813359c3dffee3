//! App Store in-app purchase verification endpoint.

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use salonpass_ledger::LedgerError;
use salonpass_shared::{PlanTier, Product};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IapVerifyRequest {
    pub product_id: String,
    pub receipt: Option<String>,
    #[allow(dead_code)]
    pub platform: Option<String>,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IapVerifyResponse {
    pub success: bool,
    pub tokens: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_balance: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanTier>,
    #[serde(skip_serializing_if = "Option::is_none", with = "time::serde::rfc3339::option")]
    pub plan_expires_at: Option<OffsetDateTime>,
}

/// `POST /iap/verify` — validate an App Store receipt and credit the
/// account through the same charge path as web payments. Without a
/// `userId` the receipt is only validated, nothing is credited.
pub async fn verify_receipt(
    State(state): State<AppState>,
    Json(request): Json<IapVerifyRequest>,
) -> ApiResult<Json<IapVerifyResponse>> {
    let product = Product::by_store_product_id(&request.product_id)
        .ok_or_else(|| ApiError::Ledger(LedgerError::UnknownProduct(request.product_id.clone())))?;

    let receipt = request.receipt.as_deref().unwrap_or_default();
    let verified = state.ledger.iap_verifier.verify(receipt, product).await?;

    let Some(user_id) = request.user_id.as_deref().filter(|id| !id.is_empty()) else {
        return Ok(Json(IapVerifyResponse {
            success: true,
            tokens: product.tokens,
            new_balance: None,
            plan: None,
            plan_expires_at: None,
        }));
    };

    let outcome = state
        .ledger
        .charger
        .charge(user_id, &verified, None, OffsetDateTime::now_utc())
        .await?;

    Ok(Json(IapVerifyResponse {
        success: true,
        tokens: outcome.tokens_granted,
        new_balance: Some(outcome.new_balance),
        plan: Some(outcome.plan),
        plan_expires_at: outcome.plan_expires_at,
    }))
}
