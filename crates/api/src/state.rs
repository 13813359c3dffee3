//! Application state.
//!
//! Everything is constructed explicitly here and injected into handlers;
//! there are no global singletons, so tests can assemble the same shape
//! over in-memory doubles.

use std::sync::Arc;

use sqlx::PgPool;

use salonpass_ledger::{
    AppleReceiptVerifier, ExpiryEmailService, HttpPaymentGateway, LedgerService, PgLedgerStore,
};

use crate::auth::{PgAdminDirectory, SessionAuthenticator};
use crate::config::Config;

/// The production ledger wiring: Postgres store, HTTP payment gateway.
pub type AppLedger = LedgerService<PgLedgerStore, HttpPaymentGateway>;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub ledger: Arc<AppLedger>,
    pub admin: SessionAuthenticator<PgAdminDirectory>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let store = Arc::new(PgLedgerStore::new(pool.clone()));
        let gateway = Arc::new(HttpPaymentGateway::new(
            config.gateway_base_url.clone(),
            config.gateway_api_secret.clone(),
        ));

        let email = ExpiryEmailService::from_env();
        if email.is_enabled() {
            tracing::info!("Expiry email notifications enabled");
        } else {
            tracing::warn!("Expiry email notifications not configured (missing RESEND_API_KEY)");
        }

        let iap_verifier = AppleReceiptVerifier::new(config.apple_shared_secret.clone());

        let ledger = Arc::new(LedgerService::new(store, gateway, email, iap_verifier));
        let admin = SessionAuthenticator::new(Arc::new(PgAdminDirectory::new(pool.clone())));

        Self {
            pool,
            config,
            ledger,
            admin,
        }
    }
}
