//! API error type and HTTP status mapping.
//!
//! Validation and business-rule failures map to 4xx with the message in
//! the body; infrastructure failures map to 5xx with a generic message
//! (the operation is safe to retry thanks to charge idempotency).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use salonpass_ledger::LedgerError;

use crate::auth::AuthError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{0}")]
    Validation(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Validation(message) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": message }),
            ),
            ApiError::Ledger(err) => ledger_response(err),
            ApiError::Auth(err) => auth_response(err),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "Request failed");
        } else {
            tracing::warn!(error = %self, status = %status, "Request rejected");
        }

        (status, Json(body)).into_response()
    }
}

fn ledger_response(err: &LedgerError) -> (StatusCode, serde_json::Value) {
    match err {
        LedgerError::Validation(_)
        | LedgerError::UnknownProduct(_)
        | LedgerError::UnknownFeature(_)
        | LedgerError::NotPaid(_)
        | LedgerError::AmountMismatch { .. }
        | LedgerError::ReceiptInvalid(_)
        | LedgerError::AlreadyCancelled(_)
        | LedgerError::GatewayRejected(_) => {
            (StatusCode::BAD_REQUEST, json!({ "error": err.to_string() }))
        }
        LedgerError::InsufficientTokens {
            required,
            balance,
            shortfall,
        } => (
            StatusCode::BAD_REQUEST,
            json!({
                "error": err.to_string(),
                "code": "INSUFFICIENT_TOKENS",
                "required": required,
                "balance": balance,
                "shortfall": shortfall,
            }),
        ),
        LedgerError::Unauthorized => (
            StatusCode::FORBIDDEN,
            json!({ "error": err.to_string() }),
        ),
        LedgerError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            json!({ "error": err.to_string() }),
        ),
        LedgerError::VerificationUnavailable(_) => (
            StatusCode::BAD_GATEWAY,
            json!({ "error": "payment verification is temporarily unavailable, please retry" }),
        ),
        LedgerError::ConcurrentModification
        | LedgerError::DuplicatePayment(_)
        | LedgerError::CorruptAccount(_)
        | LedgerError::Database(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({ "error": "internal error, please try again" }),
        ),
    }
}

fn auth_response(err: &AuthError) -> (StatusCode, serde_json::Value) {
    let status = match err {
        AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
        // Missing and expired sessions are indistinguishable to callers.
        AuthError::SessionNotFound | AuthError::SessionExpired => StatusCode::UNAUTHORIZED,
        AuthError::SessionRequired => StatusCode::FORBIDDEN,
        AuthError::AdminAlreadyExists => StatusCode::CONFLICT,
        AuthError::AdminNotFound => StatusCode::NOT_FOUND,
        AuthError::WeakPassword | AuthError::Validation(_) => StatusCode::BAD_REQUEST,
        AuthError::Hashing | AuthError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let message = if status.is_server_error() {
        "internal error, please try again".to_string()
    } else {
        err.to_string()
    };
    (status, json!({ "error": message }))
}
