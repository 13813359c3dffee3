//! Admin authentication endpoints and the manual sweep trigger.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use salonpass_ledger::SweepStats;

use crate::auth::{AdminProfile, AuthError, LoginSuccess};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// `POST /admin/auth/login`
pub async fn login(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> ApiResult<Json<LoginSuccess>> {
    let success = state
        .admin
        .login(&request.email, &request.password, OffsetDateTime::now_utc())
        .await?;
    Ok(Json(success))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: Option<String>,
    /// Required once at least one admin exists.
    pub session_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub admin: AdminProfile,
}

/// `POST /admin/auth/register` — bootstrap-register the first admin, or
/// add one on behalf of an existing admin session.
pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<Json<RegisterResponse>> {
    let admin = state
        .admin
        .register(
            &request.email,
            &request.password,
            request.name.as_deref(),
            request.session_token.as_deref(),
            OffsetDateTime::now_utc(),
        )
        .await?;
    Ok(Json(RegisterResponse {
        success: true,
        admin,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub email: String,
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
}

/// `POST /admin/auth/change-password`
pub async fn change_password(
    State(state): State<AppState>,
    Json(request): Json<ChangePasswordRequest>,
) -> ApiResult<Json<OkResponse>> {
    state
        .admin
        .change_password(
            &request.email,
            &request.current_password,
            &request.new_password,
            OffsetDateTime::now_utc(),
        )
        .await?;
    Ok(Json(OkResponse { success: true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteRequest {
    pub email: String,
    pub session_token: String,
}

/// `POST /admin/auth/delete` — session-guarded.
pub async fn delete(
    State(state): State<AppState>,
    Json(request): Json<DeleteRequest>,
) -> ApiResult<Json<OkResponse>> {
    state
        .admin
        .validate_session(&request.session_token, OffsetDateTime::now_utc())
        .await
        .map_err(|_| ApiError::Auth(AuthError::SessionRequired))?;

    state.admin.delete(&request.email).await?;
    Ok(Json(OkResponse { success: true }))
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub success: bool,
    pub admins: Vec<AdminProfile>,
}

/// `GET /admin/auth/list` — session-guarded via `Authorization: Bearer`.
pub async fn list(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ListResponse>> {
    let token = bearer_token(&headers).ok_or(ApiError::Auth(AuthError::SessionRequired))?;
    state
        .admin
        .validate_session(token, OffsetDateTime::now_utc())
        .await
        .map_err(|_| ApiError::Auth(AuthError::SessionRequired))?;

    let admins = state.admin.list().await?;
    Ok(Json(ListResponse {
        success: true,
        admins,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepRequest {
    pub session_token: String,
}

#[derive(Debug, Serialize)]
pub struct SweepResponse {
    pub success: bool,
    pub stats: SweepStats,
}

/// `POST /admin/sweep` — manual trigger for the daily expiration sweep.
/// Safe to run alongside the scheduled job: notification dedup absorbs
/// same-day re-runs.
pub async fn trigger_sweep(
    State(state): State<AppState>,
    Json(request): Json<SweepRequest>,
) -> ApiResult<Json<SweepResponse>> {
    let now = OffsetDateTime::now_utc();
    state
        .admin
        .validate_session(&request.session_token, now)
        .await
        .map_err(|_| ApiError::Auth(AuthError::SessionRequired))?;

    let stats = state.ledger.sweeper.run(now).await?;
    Ok(Json(SweepResponse {
        success: true,
        stats,
    }))
}
