//! Feature metering: deduct tokens before work, refund when the work
//! fails downstream.
//!
//! The AI steps behind a feature cannot be undone, so the compensation
//! runs the other way: tokens are deducted up front and returned by an
//! explicit `refund` when processing fails after the deduction.

use std::sync::Arc;

use serde_json::json;
use time::OffsetDateTime;

use crate::error::{LedgerError, LedgerResult};
use crate::store::AccountLedgerStore;
use crate::types::{CreditAction, CreditLogEntry};

const CAS_ATTEMPTS: u32 = 3;

/// Metered features and their fixed token costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Lookbook,
    HairTry,
    Chatbot,
}

impl Feature {
    pub fn cost(&self) -> i64 {
        match self {
            Feature::Lookbook => 200,
            Feature::HairTry => 300,
            Feature::Chatbot => 10,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::Lookbook => "lookbook",
            Feature::HairTry => "hair_try",
            Feature::Chatbot => "chatbot",
        }
    }

    /// Parse a feature key. `hairTry` is accepted for older mobile
    /// clients.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "lookbook" => Some(Feature::Lookbook),
            "hair_try" | "hairTry" => Some(Feature::HairTry),
            "chatbot" => Some(Feature::Chatbot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MeterOutcome {
    pub new_balance: i64,
}

pub struct FeatureMeter<S> {
    store: Arc<S>,
}

impl<S: AccountLedgerStore> FeatureMeter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Current balance, creating the account with the signup grant on
    /// first touch.
    pub async fn balance(&self, user_id: &str, now: OffsetDateTime) -> LedgerResult<i64> {
        Ok(self.store.ensure_account(user_id, now).await?.token_balance)
    }

    /// Deduct the feature's cost. Fails with `InsufficientTokens` (and no
    /// mutation) when the balance cannot cover it.
    pub async fn charge(
        &self,
        user_id: &str,
        feature: Feature,
        now: OffsetDateTime,
    ) -> LedgerResult<MeterOutcome> {
        let cost = feature.cost();
        let mut attempts = 0;
        loop {
            let account = self.store.ensure_account(user_id, now).await?;

            if account.token_balance < cost {
                return Err(LedgerError::InsufficientTokens {
                    required: cost,
                    balance: account.token_balance,
                    shortfall: cost - account.token_balance,
                });
            }

            let mut updated = account.clone();
            updated.token_balance = account.token_balance - cost;

            let log = CreditLogEntry::new(
                user_id,
                CreditAction::Deduct,
                account.token_balance,
                updated.token_balance,
                json!({ "feature": feature.as_str(), "cost": cost }),
                now,
            );

            match self.store.commit_account(&updated, Some(&log)).await {
                Ok(()) => {
                    tracing::info!(
                        user_id = %user_id,
                        feature = feature.as_str(),
                        cost = cost,
                        new_balance = updated.token_balance,
                        "Tokens deducted"
                    );
                    return Ok(MeterOutcome {
                        new_balance: updated.token_balance,
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

    /// Return the feature's cost to the balance. Always succeeds; this is
    /// the compensation for a failed downstream step.
    pub async fn refund(
        &self,
        user_id: &str,
        feature: Feature,
        reason: &str,
        now: OffsetDateTime,
    ) -> LedgerResult<MeterOutcome> {
        let cost = feature.cost();
        let mut attempts = 0;
        loop {
            let account = self.store.ensure_account(user_id, now).await?;

            let mut updated = account.clone();
            updated.token_balance = account.token_balance + cost;

            let log = CreditLogEntry::new(
                user_id,
                CreditAction::Refund,
                account.token_balance,
                updated.token_balance,
                json!({ "feature": feature.as_str(), "cost": cost, "reason": reason }),
                now,
            );

            match self.store.commit_account(&updated, Some(&log)).await {
                Ok(()) => {
                    tracing::info!(
                        user_id = %user_id,
                        feature = feature.as_str(),
                        refunded = cost,
                        reason = reason,
                        new_balance = updated.token_balance,
                        "Tokens refunded"
                    );
                    return Ok(MeterOutcome {
                        new_balance: updated.token_balance,
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

impl<S> Clone for FeatureMeter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}
