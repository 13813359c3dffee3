// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge case tests for the ledger core, run against the in-memory store:
//! charge idempotency, cancellation reversibility, overdraw prevention,
//! expiration sweeps and notification dedup.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

use salonpass_shared::{PaidPlan, PlanTier, Product};

use crate::cancel::{CancelRequest, CancellationHandler};
use crate::charger::LedgerCharger;
use crate::email::ExpiryEmailService;
use crate::error::{LedgerError, LedgerResult};
use crate::gateway::{GatewayPayment, PaymentGateway};
use crate::meter::{Feature, FeatureMeter};
use crate::notify::NotificationDispatcher;
use crate::store::{AccountLedgerStore, MemoryLedgerStore};
use crate::sweep::ExpirationSweeper;
use crate::types::{
    Account, CreditAction, NotificationKind, PaymentChannel, PaymentStatus, PlanState,
};
use crate::verify::VerifiedPayment;

fn now() -> OffsetDateTime {
    datetime!(2025-06-15 09:00 UTC)
}

fn verified_web(payment_id: &str, product_key: &str) -> VerifiedPayment {
    let product = Product::by_key(product_key).unwrap();
    VerifiedPayment {
        payment_id: payment_id.to_string(),
        channel: PaymentChannel::Web,
        product,
        amount: product.price_krw,
    }
}

fn paid_account(id: &str, plan: PaidPlan, balance: i64, expires_at: OffsetDateTime) -> Account {
    Account {
        id: id.to_string(),
        email: None,
        display_name: None,
        token_balance: balance,
        state: PlanState::Paid {
            plan,
            started_at: expires_at - Duration::days(30),
            expires_at,
        },
        previous_plan: None,
        previous_token_balance: None,
        billing_key: None,
        saved_card: None,
        version: 1,
        created_at: expires_at - Duration::days(30),
        updated_at: expires_at - Duration::days(30),
    }
}

fn free_account(id: &str, balance: i64) -> Account {
    Account {
        id: id.to_string(),
        email: None,
        display_name: None,
        token_balance: balance,
        state: PlanState::Free,
        previous_plan: None,
        previous_token_balance: None,
        billing_key: None,
        saved_card: None,
        version: 1,
        created_at: now(),
        updated_at: now(),
    }
}

/// Gateway double: counts cancel calls, optionally rejects them.
struct StubGateway {
    cancel_calls: AtomicUsize,
    fail_cancel: Option<String>,
}

impl StubGateway {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            cancel_calls: AtomicUsize::new(0),
            fail_cancel: None,
        })
    }

    fn rejecting(message: &str) -> Arc<Self> {
        Arc::new(Self {
            cancel_calls: AtomicUsize::new(0),
            fail_cancel: Some(message.to_string()),
        })
    }

    fn calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn fetch_payment(&self, payment_id: &str) -> LedgerResult<GatewayPayment> {
        Err(LedgerError::NotFound(format!("payment {payment_id}")))
    }

    async fn cancel_payment(&self, _payment_id: &str, _reason: &str) -> LedgerResult<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        match &self.fail_cancel {
            Some(message) => Err(LedgerError::GatewayRejected(message.clone())),
            None => Ok(()),
        }
    }
}

fn sweeper(store: &Arc<MemoryLedgerStore>) -> ExpirationSweeper<MemoryLedgerStore> {
    let dispatcher = NotificationDispatcher::new(store.clone(), ExpiryEmailService::disabled());
    ExpirationSweeper::new(store.clone(), dispatcher)
}

// =========================================================================
// Charging
// =========================================================================
mod charger_tests {
    use super::*;

    #[tokio::test]
    async fn same_payment_id_credits_exactly_once() {
        let store = Arc::new(MemoryLedgerStore::new());
        let charger = LedgerCharger::new(store.clone());
        let payment = verified_web("pay_dup", "basic");

        let first = charger.charge("u1", &payment, None, now()).await.unwrap();
        let second = charger.charge("u1", &payment, None, now()).await.unwrap();

        assert!(!first.already_processed);
        assert!(second.already_processed);
        assert_eq!(first.new_balance, second.new_balance);
        assert_eq!(first.new_balance, 10_000);

        // One credit, one record, one log entry.
        let account = store.account("u1").await.unwrap().unwrap();
        assert_eq!(account.token_balance, 10_000);
        let logs = store.credit_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, CreditAction::Purchase);
    }

    #[tokio::test]
    async fn plan_purchase_resets_balance_and_sets_expiry() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.put_account(free_account("u1", 4_321)).await;
        let charger = LedgerCharger::new(store.clone());

        let outcome = charger
            .charge("u1", &verified_web("pay_1", "pro"), None, now())
            .await
            .unwrap();

        // Reset, not accumulate.
        assert_eq!(outcome.new_balance, 18_000);
        assert_eq!(outcome.plan, PlanTier::Pro);

        let account = store.account("u1").await.unwrap().unwrap();
        assert_eq!(
            account.state.expires_at(),
            Some(now() + Duration::days(30))
        );
    }

    #[tokio::test]
    async fn token_pack_adds_and_leaves_plan_untouched() {
        let store = Arc::new(MemoryLedgerStore::new());
        let expires = now() + Duration::days(12);
        store
            .put_account(paid_account("u1", PaidPlan::Basic, 1_500, expires))
            .await;
        let charger = LedgerCharger::new(store.clone());

        let outcome = charger
            .charge("u1", &verified_web("pay_pack", "tokens_5000"), None, now())
            .await
            .unwrap();

        assert_eq!(outcome.new_balance, 6_500);
        let account = store.account("u1").await.unwrap().unwrap();
        assert_eq!(account.state.tier(), PlanTier::Basic);
        assert_eq!(account.state.expires_at(), Some(expires));
    }

    #[tokio::test]
    async fn first_touch_creates_account_with_signup_grant() {
        let store = Arc::new(MemoryLedgerStore::new());
        let meter = FeatureMeter::new(store.clone());
        assert_eq!(meter.balance("fresh", now()).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn charge_snapshot_captures_pre_charge_state() {
        let store = Arc::new(MemoryLedgerStore::new());
        let expires = now() + Duration::days(5);
        store
            .put_account(paid_account("u1", PaidPlan::Basic, 777, expires))
            .await;
        let charger = LedgerCharger::new(store.clone());

        charger
            .charge("u1", &verified_web("pay_up", "business"), None, now())
            .await
            .unwrap();

        let record = store.payment("pay_up").await.unwrap().unwrap();
        assert_eq!(record.previous_state.plan, PlanTier::Basic);
        assert_eq!(record.previous_state.token_balance, 777);
        assert_eq!(record.previous_state.plan_expires_at, Some(expires));
        assert_eq!(record.status, PaymentStatus::Completed);
    }
}

// =========================================================================
// Cancellation
// =========================================================================
mod cancel_tests {
    use super::*;

    async fn charged_store(balance_before: i64) -> (Arc<MemoryLedgerStore>, Arc<StubGateway>) {
        let store = Arc::new(MemoryLedgerStore::new());
        store.put_account(free_account("u1", balance_before)).await;
        let charger = LedgerCharger::new(store.clone());
        charger
            .charge("u1", &verified_web("pay_c", "basic"), None, now())
            .await
            .unwrap();
        (store, StubGateway::ok())
    }

    fn request(requested_by: &str, is_admin: bool) -> CancelRequest {
        CancelRequest {
            payment_id: "pay_c".to_string(),
            requested_by: requested_by.to_string(),
            is_admin,
            reason: Some("changed my mind".to_string()),
        }
    }

    #[tokio::test]
    async fn cancel_restores_pre_charge_state_when_nothing_spent() {
        let (store, gateway) = charged_store(0).await;
        let handler = CancellationHandler::new(store.clone(), gateway.clone());

        let outcome = handler.cancel(&request("u1", false), now()).await.unwrap();

        assert_eq!(outcome.restored_plan, PlanTier::Free);
        assert_eq!(outcome.restored_tokens, 0);
        let account = store.account("u1").await.unwrap().unwrap();
        assert_eq!(account.state, PlanState::Free);
        assert_eq!(account.token_balance, 0);
        assert_eq!(gateway.calls(), 1);

        let record = store.payment("pay_c").await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Cancelled);
        assert!(record.cancelled_at.is_some());
    }

    #[tokio::test]
    async fn partial_spend_cancellation_floors_at_zero() {
        let (store, gateway) = charged_store(0).await;
        let meter = FeatureMeter::new(store.clone());

        // Spend 4,000 of the 10,000 granted tokens.
        for _ in 0..20 {
            meter.charge("u1", Feature::Lookbook, now()).await.unwrap();
        }
        assert_eq!(
            store.account("u1").await.unwrap().unwrap().token_balance,
            6_000
        );

        let handler = CancellationHandler::new(store.clone(), gateway);
        let outcome = handler.cancel(&request("u1", false), now()).await.unwrap();

        // max(0, 6000 - 10000), never negative.
        assert_eq!(outcome.restored_tokens, 0);
        assert_eq!(
            store.account("u1").await.unwrap().unwrap().token_balance,
            0
        );
    }

    #[tokio::test]
    async fn cancel_by_non_owner_is_unauthorized_and_mutates_nothing() {
        let (store, gateway) = charged_store(0).await;
        let handler = CancellationHandler::new(store.clone(), gateway.clone());

        let err = handler
            .cancel(&request("someone_else", false), now())
            .await
            .unwrap_err();

        assert!(matches!(err, LedgerError::Unauthorized));
        // The gateway was never asked to reverse anything.
        assert_eq!(gateway.calls(), 0);
        let record = store.payment("pay_c").await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Completed);
    }

    #[tokio::test]
    async fn admin_may_cancel_on_behalf_of_user() {
        let (store, gateway) = charged_store(0).await;
        let handler = CancellationHandler::new(store.clone(), gateway);
        handler
            .cancel(&request("admin@salon.example", true), now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn second_cancel_fails_without_touching_gateway_again() {
        let (store, gateway) = charged_store(0).await;
        let handler = CancellationHandler::new(store.clone(), gateway.clone());

        handler.cancel(&request("u1", false), now()).await.unwrap();
        let err = handler.cancel(&request("u1", false), now()).await.unwrap_err();

        assert!(matches!(err, LedgerError::AlreadyCancelled(_)));
        assert_eq!(gateway.calls(), 1);
    }

    #[tokio::test]
    async fn gateway_rejection_leaves_ledger_untouched() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.put_account(free_account("u1", 0)).await;
        let charger = LedgerCharger::new(store.clone());
        charger
            .charge("u1", &verified_web("pay_c", "basic"), None, now())
            .await
            .unwrap();

        let gateway = StubGateway::rejecting("settlement already batched");
        let handler = CancellationHandler::new(store.clone(), gateway);

        let err = handler.cancel(&request("u1", false), now()).await.unwrap_err();
        match err {
            LedgerError::GatewayRejected(msg) => assert_eq!(msg, "settlement already batched"),
            other => panic!("expected GatewayRejected, got {other:?}"),
        }

        // Still completed, balance still granted.
        let record = store.payment("pay_c").await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Completed);
        assert_eq!(
            store.account("u1").await.unwrap().unwrap().token_balance,
            10_000
        );
    }
}

// =========================================================================
// Metering
// =========================================================================
mod meter_tests {
    use super::*;

    #[tokio::test]
    async fn overdraw_fails_with_shortfall_and_no_mutation() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.put_account(free_account("u1", 100)).await;
        let meter = FeatureMeter::new(store.clone());

        let err = meter.charge("u1", Feature::Lookbook, now()).await.unwrap_err();

        match err {
            LedgerError::InsufficientTokens {
                required,
                balance,
                shortfall,
            } => {
                assert_eq!(required, 200);
                assert_eq!(balance, 100);
                assert_eq!(shortfall, 100);
            }
            other => panic!("expected InsufficientTokens, got {other:?}"),
        }

        assert_eq!(
            store.account("u1").await.unwrap().unwrap().token_balance,
            100
        );
        assert!(store.credit_logs().await.is_empty());
    }

    #[tokio::test]
    async fn deduct_then_refund_round_trips_the_balance() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.put_account(free_account("u1", 1_000)).await;
        let meter = FeatureMeter::new(store.clone());

        let charged = meter.charge("u1", Feature::HairTry, now()).await.unwrap();
        assert_eq!(charged.new_balance, 700);

        // Downstream processing failed; compensate.
        let refunded = meter
            .refund("u1", Feature::HairTry, "generation failed", now())
            .await
            .unwrap();
        assert_eq!(refunded.new_balance, 1_000);

        let logs = store.credit_logs().await;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action, CreditAction::Deduct);
        assert_eq!(logs[0].delta, -300);
        assert_eq!(logs[1].action, CreditAction::Refund);
        assert_eq!(logs[1].delta, 300);
    }

    #[tokio::test]
    async fn exact_balance_spends_to_zero() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.put_account(free_account("u1", 200)).await;
        let meter = FeatureMeter::new(store.clone());

        let outcome = meter.charge("u1", Feature::Lookbook, now()).await.unwrap();
        assert_eq!(outcome.new_balance, 0);
    }

    #[tokio::test]
    async fn concurrent_spends_never_overdraw() {
        let store = Arc::new(MemoryLedgerStore::new());
        store.put_account(free_account("u1", 500)).await;
        let meter = FeatureMeter::new(store.clone());

        // 500 tokens cover two hair-try charges; the third must fail.
        let mut handles = Vec::new();
        for _ in 0..3 {
            let meter = meter.clone();
            handles.push(tokio::spawn(async move {
                meter.charge("u1", Feature::HairTry, now()).await
            }));
        }

        let mut ok = 0;
        let mut short = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => ok += 1,
                Err(LedgerError::InsufficientTokens { .. }) => short += 1,
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(short, 2);
        assert_eq!(
            store.account("u1").await.unwrap().unwrap().token_balance,
            200
        );
    }
}

// =========================================================================
// Expiration sweep
// =========================================================================
mod sweep_tests {
    use super::*;

    #[tokio::test]
    async fn expired_plan_downgrades_with_one_log_and_one_notification() {
        let store = Arc::new(MemoryLedgerStore::new());
        let yesterday = now() - Duration::days(1);
        store
            .put_account(paid_account("u1", PaidPlan::Pro, 5_000, yesterday))
            .await;

        let stats = sweeper(&store).run(now()).await.unwrap();

        assert_eq!(stats.checked, 1);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.errors, 0);

        let account = store.account("u1").await.unwrap().unwrap();
        assert_eq!(account.state, PlanState::Free);
        assert_eq!(account.token_balance, 0);
        assert_eq!(account.previous_plan, Some(PlanTier::Pro));
        assert_eq!(account.previous_token_balance, Some(5_000));

        let logs = store.credit_logs().await;
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].action, CreditAction::PlanExpired);
        assert_eq!(logs[0].previous_balance, 5_000);
        assert_eq!(logs[0].new_balance, 0);

        let notifications = store.notifications().await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::PlanExpired);
    }

    #[tokio::test]
    async fn downgraded_account_is_not_processed_again() {
        let store = Arc::new(MemoryLedgerStore::new());
        store
            .put_account(paid_account("u1", PaidPlan::Pro, 5_000, now() - Duration::days(1)))
            .await;

        let sweeper = sweeper(&store);
        sweeper.run(now()).await.unwrap();
        let second = sweeper.run(now() + Duration::days(1)).await.unwrap();

        // Free accounts are outside the sweep's input set.
        assert_eq!(second.checked, 0);
        assert_eq!(store.credit_logs().await.len(), 1);
        assert_eq!(store.notifications().await.len(), 1);
    }

    #[tokio::test]
    async fn warning_is_not_duplicated_within_a_day() {
        let store = Arc::new(MemoryLedgerStore::new());
        store
            .put_account(paid_account("u1", PaidPlan::Basic, 1_000, now() + Duration::days(3)))
            .await;

        let sweeper = sweeper(&store);
        let first = sweeper.run(now()).await.unwrap();
        let second = sweeper.run(now() + Duration::hours(2)).await.unwrap();

        assert_eq!(first.warned_3days, 1);
        assert_eq!(second.warned_3days, 0);

        let notifications = store.notifications().await;
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationKind::PlanExpiring3Days);
    }

    #[tokio::test]
    async fn warnings_fire_only_at_defined_day_marks() {
        let store = Arc::new(MemoryLedgerStore::new());
        store
            .put_account(paid_account("u7", PaidPlan::Pro, 1, now() + Duration::days(7)))
            .await;
        store
            .put_account(paid_account("u5", PaidPlan::Pro, 1, now() + Duration::days(5)))
            .await;
        store
            .put_account(paid_account("u1", PaidPlan::Pro, 1, now() + Duration::days(1)))
            .await;

        let stats = sweeper(&store).run(now()).await.unwrap();

        assert_eq!(stats.checked, 3);
        assert_eq!(stats.warned_7days, 1);
        assert_eq!(stats.warned_3days, 0);
        assert_eq!(stats.warned_1day, 1);
        assert_eq!(store.notifications().await.len(), 2);
    }

    #[tokio::test]
    async fn next_day_repeats_the_warning() {
        let store = Arc::new(MemoryLedgerStore::new());
        // Expires in exactly 2 days: warns at the 1-day mark tomorrow.
        store
            .put_account(paid_account("u1", PaidPlan::Basic, 1_000, now() + Duration::days(2)))
            .await;

        let sweeper = sweeper(&store);
        let today = sweeper.run(now()).await.unwrap();
        assert_eq!(today.warned_1day, 0);

        let tomorrow = sweeper.run(now() + Duration::days(1)).await.unwrap();
        assert_eq!(tomorrow.warned_1day, 1);
    }

    #[tokio::test]
    async fn mixed_population_sweeps_in_one_pass() {
        let store = Arc::new(MemoryLedgerStore::new());
        store
            .put_account(paid_account("expired", PaidPlan::Business, 9_000, now() - Duration::hours(1)))
            .await;
        store
            .put_account(paid_account("warning", PaidPlan::Basic, 100, now() + Duration::days(3)))
            .await;
        store
            .put_account(paid_account("healthy", PaidPlan::Pro, 100, now() + Duration::days(20)))
            .await;

        let stats = sweeper(&store).run(now()).await.unwrap();

        assert_eq!(stats.checked, 3);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.warned_3days, 1);
        assert_eq!(stats.errors, 0);
    }
}
