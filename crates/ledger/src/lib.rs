// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Salonpass token/credit ledger.
//!
//! The one subsystem where correctness is non-negotiable: money maps to
//! tokens exactly once per payment, plan state transitions correctly under
//! expiration, concurrent feature usage cannot overdraw a balance, and the
//! daily sweep enforces expiry without double-notifying anyone.
//!
//! ## Components
//!
//! - **Store** ([`store`]): transactional accessor over the account
//!   documents; Postgres in production, in-memory for tests.
//! - **Verification** ([`verify`], [`gateway`]): per-channel payment
//!   verification (web gateway, App Store receipts).
//! - **Charging** ([`charger`]): idempotent application of a verified
//!   payment — plan upgrades reset the balance, token packs add to it.
//! - **Cancellation** ([`cancel`]): snapshot-based reversal.
//! - **Metering** ([`meter`]): per-feature token deduction with explicit
//!   refund compensation.
//! - **Sweep** ([`sweep`]): daily expiration enforcement with graduated
//!   warnings.
//! - **Notifications** ([`notify`], [`email`]): idempotent in-app rows
//!   plus Resend-backed emails.

pub mod cancel;
pub mod charger;
pub mod email;
pub mod error;
pub mod gateway;
pub mod meter;
pub mod notify;
pub mod store;
pub mod sweep;
pub mod types;
pub mod verify;

#[cfg(test)]
mod edge_case_tests;

pub use cancel::{CancelOutcome, CancelRequest, CancellationHandler};
pub use charger::{ChargeOutcome, LedgerCharger};
pub use email::{EmailOutcome, ExpiryEmailService};
pub use error::{LedgerError, LedgerResult};
pub use gateway::{GatewayPayment, HttpPaymentGateway, PaymentGateway};
pub use meter::{Feature, FeatureMeter, MeterOutcome};
pub use notify::{DispatchResult, NotificationDispatcher};
pub use store::{AccountLedgerStore, MemoryLedgerStore, PgLedgerStore};
pub use sweep::{days_remaining, ExpirationSweeper, SweepStats};
pub use types::{
    Account, AccountSnapshot, CreditAction, CreditLogEntry, Notification, NotificationKind,
    PaymentChannel, PaymentRecord, PaymentStatus, PlanState, SavedCard,
};
pub use verify::{AppleReceiptVerifier, GatewayVerifier, VerifiedPayment};

use std::sync::Arc;

/// The assembled ledger: every service wired to one store and one gateway.
///
/// Built once at startup and injected into handlers; tests assemble the
/// same struct over the in-memory store.
pub struct LedgerService<S, G> {
    pub charger: LedgerCharger<S>,
    pub cancellation: CancellationHandler<S, Arc<G>>,
    pub meter: FeatureMeter<S>,
    pub notifications: NotificationDispatcher<S>,
    pub sweeper: ExpirationSweeper<S>,
    pub gateway_verifier: GatewayVerifier<Arc<G>>,
    pub iap_verifier: AppleReceiptVerifier,
    pub store: Arc<S>,
}

impl<S: AccountLedgerStore, G: PaymentGateway> LedgerService<S, G> {
    pub fn new(
        store: Arc<S>,
        gateway: Arc<G>,
        email: ExpiryEmailService,
        iap_verifier: AppleReceiptVerifier,
    ) -> Self {
        let notifications = NotificationDispatcher::new(store.clone(), email);
        Self {
            charger: LedgerCharger::new(store.clone()),
            cancellation: CancellationHandler::new(store.clone(), gateway.clone()),
            meter: FeatureMeter::new(store.clone()),
            sweeper: ExpirationSweeper::new(store.clone(), notifications.clone()),
            notifications,
            gateway_verifier: GatewayVerifier::new(gateway),
            iap_verifier,
            store,
        }
    }
}
