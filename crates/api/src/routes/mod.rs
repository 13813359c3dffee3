//! HTTP route table.

mod admin;
mod iap;
mod payments;
mod tokens;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Payments (web gateway)
        .route("/payments/verify", post(payments::verify_payment))
        .route("/payments/cancel", post(payments::cancel_payment))
        // In-app purchases
        .route("/iap/verify", post(iap::verify_receipt))
        // Feature metering
        .route("/tokens/balance/{user_id}", get(tokens::balance))
        .route("/tokens/charge", post(tokens::charge))
        .route("/tokens/refund", post(tokens::refund))
        // Admin auth + operations
        .route("/admin/auth/login", post(admin::login))
        .route("/admin/auth/register", post(admin::register))
        .route("/admin/auth/change-password", post(admin::change_password))
        .route("/admin/auth/delete", post(admin::delete))
        .route("/admin/auth/list", get(admin::list))
        .route("/admin/sweep", post(admin::trigger_sweep))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
