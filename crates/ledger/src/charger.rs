//! Applies a verified payment to an account.
//!
//! The payment id is the idempotency anchor: webhook duplicates and client
//! retries of the same id return the originally recorded result without
//! touching the balance. The account mutation, the payment record and the
//! credit-log entry are committed as one atomic unit.

use std::sync::Arc;

use serde_json::json;
use time::{Duration, OffsetDateTime};

use salonpass_shared::{PlanTier, ProductKind, PLAN_VALIDITY_DAYS};

use crate::error::{LedgerError, LedgerResult};
use crate::store::AccountLedgerStore;
use crate::types::{
    CreditAction, CreditLogEntry, PaymentChannel, PaymentRecord, PaymentStatus, PlanState,
};
use crate::verify::VerifiedPayment;

/// Attempts before giving up on optimistic-concurrency conflicts. The
/// operation is idempotent, so the caller may also simply retry.
const CAS_ATTEMPTS: u32 = 3;

/// Result of applying (or replaying) a charge.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChargeOutcome {
    pub payment_id: String,
    pub user_id: String,
    pub product_key: String,
    pub tokens_granted: i64,
    pub new_balance: i64,
    pub plan: PlanTier,
    #[serde(with = "time::serde::rfc3339::option")]
    pub plan_expires_at: Option<OffsetDateTime>,
    /// True when this call replayed an already-applied payment.
    pub already_processed: bool,
}

pub struct LedgerCharger<S> {
    store: Arc<S>,
}

impl<S: AccountLedgerStore> LedgerCharger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Apply a verified payment to `user_id`'s account.
    pub async fn charge(
        &self,
        user_id: &str,
        verified: &VerifiedPayment,
        user_name: Option<&str>,
        now: OffsetDateTime,
    ) -> LedgerResult<ChargeOutcome> {
        if user_id.trim().is_empty() {
            return Err(LedgerError::Validation("userId is required".into()));
        }

        let mut attempts = 0;
        loop {
            // Idempotency check before any mutation.
            if let Some(record) = self.store.payment(&verified.payment_id).await? {
                tracing::info!(
                    payment_id = %verified.payment_id,
                    user_id = %record.user_id,
                    "Payment already processed, replaying recorded result"
                );
                return Ok(Self::replay(&record));
            }

            let account = self.store.ensure_account(user_id, now).await?;
            let snapshot = account.snapshot();

            let mut updated = account.clone();
            match verified.product.kind {
                ProductKind::PlanTier(plan) => {
                    // Plan purchase: balance resets to the allotment.
                    updated.token_balance = verified.product.tokens;
                    updated.state = PlanState::Paid {
                        plan,
                        started_at: now,
                        expires_at: now + Duration::days(PLAN_VALIDITY_DAYS),
                    };
                }
                ProductKind::TokenPack => {
                    // Extra tokens: additive, plan state untouched.
                    updated.token_balance = account.token_balance + verified.product.tokens;
                }
            }

            let record = PaymentRecord {
                payment_id: verified.payment_id.clone(),
                user_id: user_id.to_string(),
                user_name: user_name.map(str::to_string),
                product_key: verified.product.key.to_string(),
                channel: verified.channel,
                amount_charged: verified.amount,
                tokens_granted: verified.product.tokens,
                new_balance: updated.token_balance,
                status: PaymentStatus::Completed,
                previous_state: snapshot,
                created_at: now,
                cancelled_at: None,
                cancel_reason: None,
            };

            let action = match verified.channel {
                PaymentChannel::Web => CreditAction::Purchase,
                PaymentChannel::AppStore => CreditAction::IapPurchase,
            };
            let log = CreditLogEntry::new(
                user_id,
                action,
                account.token_balance,
                updated.token_balance,
                json!({
                    "paymentId": verified.payment_id,
                    "productKey": verified.product.key,
                    "amount": verified.amount,
                    "channel": verified.channel.as_str(),
                }),
                now,
            );

            match self.store.commit_charge(&updated, &record, &log).await {
                Ok(()) => {
                    tracing::info!(
                        payment_id = %verified.payment_id,
                        user_id = %user_id,
                        product = %verified.product.key,
                        tokens = verified.product.tokens,
                        new_balance = updated.token_balance,
                        "Charge applied"
                    );
                    return Ok(Self::outcome(&record, false));
                }
                Err(LedgerError::DuplicatePayment(_)) => {
                    // Lost the race against a concurrent submission of the
                    // same payment; its result is the authoritative one.
                    if let Some(record) = self.store.payment(&verified.payment_id).await? {
                        return Ok(Self::replay(&record));
                    }
                    return Err(LedgerError::DuplicatePayment(verified.payment_id.clone()));
                }
                Err(LedgerError::ConcurrentModification) if attempts + 1 < CAS_ATTEMPTS => {
                    attempts += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn replay(record: &PaymentRecord) -> ChargeOutcome {
        Self::outcome(record, true)
    }

    fn outcome(record: &PaymentRecord, already_processed: bool) -> ChargeOutcome {
        // The resulting plan is a function of the product: tier purchases
        // moved the account onto that tier, packs left the snapshot plan.
        let (plan, plan_expires_at) = match salonpass_shared::Product::by_key(&record.product_key)
            .map(|p| p.kind)
        {
            Some(ProductKind::PlanTier(plan)) => (
                plan.into(),
                Some(record.created_at + Duration::days(PLAN_VALIDITY_DAYS)),
            ),
            _ => (
                record.previous_state.plan,
                record.previous_state.plan_expires_at,
            ),
        };

        ChargeOutcome {
            payment_id: record.payment_id.clone(),
            user_id: record.user_id.clone(),
            product_key: record.product_key.clone(),
            tokens_granted: record.tokens_granted,
            new_balance: record.new_balance,
            plan,
            plan_expires_at,
            already_processed,
        }
    }
}

impl<S> Clone for LedgerCharger<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}
