//! Feature metering endpoints: balance, charge, refund.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use salonpass_ledger::{Feature, LedgerError};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn parse_feature(raw: &str) -> Result<Feature, ApiError> {
    Feature::parse(raw).ok_or_else(|| ApiError::Ledger(LedgerError::UnknownFeature(raw.to_string())))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub token_balance: i64,
}

/// `GET /tokens/balance/{user_id}` — current balance; creates the account
/// with the signup grant on first touch.
pub async fn balance(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<BalanceResponse>> {
    let balance = state
        .ledger
        .meter
        .balance(&user_id, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(BalanceResponse {
        token_balance: balance,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChargeTokensRequest {
    pub user_id: String,
    pub feature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeterResponse {
    pub success: bool,
    pub new_balance: i64,
}

/// `POST /tokens/charge` — deduct the feature cost before running it.
pub async fn charge(
    State(state): State<AppState>,
    Json(request): Json<ChargeTokensRequest>,
) -> ApiResult<Json<MeterResponse>> {
    let feature = parse_feature(&request.feature)?;
    let outcome = state
        .ledger
        .meter
        .charge(&request.user_id, feature, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(MeterResponse {
        success: true,
        new_balance: outcome.new_balance,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundTokensRequest {
    pub user_id: String,
    pub feature: String,
    pub reason: Option<String>,
}

/// `POST /tokens/refund` — return a deducted cost after the downstream
/// step failed.
pub async fn refund(
    State(state): State<AppState>,
    Json(request): Json<RefundTokensRequest>,
) -> ApiResult<Json<MeterResponse>> {
    let feature = parse_feature(&request.feature)?;
    let reason = request.reason.as_deref().unwrap_or("processing failed");
    let outcome = state
        .ledger
        .meter
        .refund(&request.user_id, feature, reason, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(MeterResponse {
        success: true,
        new_balance: outcome.new_balance,
    }))
}
