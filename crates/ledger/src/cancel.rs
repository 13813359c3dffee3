//! Payment cancellation.
//!
//! Reverses a previously applied charge using the snapshot stored on the
//! payment record. The gateway reverses the money first; only then is the
//! local ledger touched. The restored balance floors at zero so tokens
//! spent between charge and cancellation are not conjured back.

use std::sync::Arc;

use serde_json::json;
use time::OffsetDateTime;

use salonpass_shared::PlanTier;

use crate::error::{LedgerError, LedgerResult};
use crate::gateway::PaymentGateway;
use crate::store::AccountLedgerStore;
use crate::types::{CreditAction, CreditLogEntry, PaymentStatus, PlanState};

const CAS_ATTEMPTS: u32 = 3;

/// Who is asking for the cancellation.
#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub payment_id: String,
    pub requested_by: String,
    /// Set only after the caller validated an admin session.
    pub is_admin: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CancelOutcome {
    pub payment_id: String,
    pub restored_plan: PlanTier,
    pub restored_tokens: i64,
}

pub struct CancellationHandler<S, G> {
    store: Arc<S>,
    gateway: G,
}

impl<S: AccountLedgerStore, G: PaymentGateway> CancellationHandler<S, G> {
    pub fn new(store: Arc<S>, gateway: G) -> Self {
        Self { store, gateway }
    }

    pub async fn cancel(
        &self,
        request: &CancelRequest,
        now: OffsetDateTime,
    ) -> LedgerResult<CancelOutcome> {
        let record = self
            .store
            .payment(&request.payment_id)
            .await?
            .ok_or_else(|| LedgerError::NotFound(format!("payment {}", request.payment_id)))?;

        if !request.is_admin && request.requested_by != record.user_id {
            tracing::warn!(
                payment_id = %request.payment_id,
                requested_by = %request.requested_by,
                "Rejected cancellation by non-owner"
            );
            return Err(LedgerError::Unauthorized);
        }

        if record.status == PaymentStatus::Cancelled {
            return Err(LedgerError::AlreadyCancelled(request.payment_id.clone()));
        }

        // The gateway must actually reverse the charge before anything is
        // recorded locally; its rejection propagates untouched.
        let reason = request.reason.as_deref().unwrap_or("requested cancellation");
        self.gateway
            .cancel_payment(&request.payment_id, reason)
            .await?;

        let mut attempts = 0;
        loop {
            let account = self
                .store
                .account(&record.user_id)
                .await?
                .ok_or_else(|| LedgerError::NotFound(format!("account {}", record.user_id)))?;

            let snapshot = record.previous_state;
            let restored_tokens = (account.token_balance - record.tokens_granted).max(0);

            let mut restored = account.clone();
            restored.token_balance = restored_tokens;
            restored.state = PlanState::from_columns(
                snapshot.plan.as_str(),
                None,
                snapshot.plan_expires_at,
            )?;

            let log = CreditLogEntry::new(
                &record.user_id,
                CreditAction::PaymentCancelled,
                account.token_balance,
                restored_tokens,
                json!({
                    "paymentId": record.payment_id,
                    "reason": reason,
                    "restoredPlan": snapshot.plan.as_str(),
                    "tokensGranted": record.tokens_granted,
                }),
                now,
            );

            match self
                .store
                .commit_cancellation(&restored, &record.payment_id, now, Some(reason), &log)
                .await
            {
                Ok(()) => {
                    tracing::info!(
                        payment_id = %record.payment_id,
                        user_id = %record.user_id,
                        restored_plan = %snapshot.plan,
                        restored_tokens = restored_tokens,
                        "Payment cancelled and account restored"
                    );
                    return Ok(CancelOutcome {
                        payment_id: record.payment_id.clone(),
                        restored_plan: snapshot.plan,
                        restored_tokens,
                    });
                }
                Err(LedgerError::ConcurrentModification) if attempts + 1 < CAS_ATTEMPTS => {
                    attempts += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<S, G: Clone> Clone for CancellationHandler<S, G> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            gateway: self.gateway.clone(),
        }
    }
}
