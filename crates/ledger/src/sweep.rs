//! Daily plan-expiration sweep.
//!
//! Walks every paid account sequentially: expired plans are downgraded to
//! free (exactly once — a downgraded account leaves the paid set) and
//! accounts approaching expiry get graduated warnings at 7, 3 and 1 days
//! out. One account's failure never aborts the rest of the sweep.

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use time::OffsetDateTime;

use crate::email::EmailOutcome;
use crate::error::{LedgerError, LedgerResult};
use crate::notify::NotificationDispatcher;
use crate::store::AccountLedgerStore;
use crate::types::{Account, CreditAction, CreditLogEntry, NotificationKind, PlanState};

const CAS_ATTEMPTS: u32 = 3;

/// Aggregate sweep statistics, returned to the scheduler and the manual
/// trigger endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepStats {
    pub checked: u64,
    pub expired: u64,
    pub warned_7days: u64,
    pub warned_3days: u64,
    pub warned_1day: u64,
    pub emails_sent: u64,
    pub emails_failed: u64,
    pub errors: u64,
}

impl SweepStats {
    fn count_email(&mut self, outcome: EmailOutcome) {
        match outcome {
            EmailOutcome::Sent => self.emails_sent += 1,
            EmailOutcome::Failed => self.emails_failed += 1,
            EmailOutcome::Skipped => {}
        }
    }
}

/// Whole days until expiry, rounded up. Zero or negative means expired.
pub fn days_remaining(expires_at: OffsetDateTime, now: OffsetDateTime) -> i64 {
    // Equivalent to i64::div_ceil(86_400), which is still unstable for signed
    // integers. For a positive divisor this rounds toward positive infinity.
    let secs = (expires_at - now).whole_seconds();
    let days = secs / 86_400;
    if secs % 86_400 > 0 {
        days + 1
    } else {
        days
    }
}

pub struct ExpirationSweeper<S> {
    store: Arc<S>,
    dispatcher: NotificationDispatcher<S>,
}

impl<S: AccountLedgerStore> ExpirationSweeper<S> {
    pub fn new(store: Arc<S>, dispatcher: NotificationDispatcher<S>) -> Self {
        Self { store, dispatcher }
    }

    /// Run one sweep pass. Errors inside a single account are counted and
    /// logged; only a failure to list the accounts aborts the run.
    pub async fn run(&self, now: OffsetDateTime) -> LedgerResult<SweepStats> {
        let accounts = self.store.paid_accounts().await?;
        let mut stats = SweepStats::default();

        tracing::info!(paid_accounts = accounts.len(), "Starting expiration sweep");

        for account in accounts {
            stats.checked += 1;
            if let Err(e) = self.process_account(&account, now, &mut stats).await {
                stats.errors += 1;
                tracing::error!(
                    user_id = %account.id,
                    error = %e,
                    "Sweep failed for account, continuing"
                );
            }
        }

        tracing::info!(
            checked = stats.checked,
            expired = stats.expired,
            warned_7days = stats.warned_7days,
            warned_3days = stats.warned_3days,
            warned_1day = stats.warned_1day,
            emails_sent = stats.emails_sent,
            emails_failed = stats.emails_failed,
            errors = stats.errors,
            "Expiration sweep complete"
        );

        Ok(stats)
    }

    async fn process_account(
        &self,
        account: &Account,
        now: OffsetDateTime,
        stats: &mut SweepStats,
    ) -> LedgerResult<()> {
        let PlanState::Paid { expires_at, .. } = account.state else {
            // paid_accounts() should not hand us free accounts.
            return Ok(());
        };

        let remaining = days_remaining(expires_at, now);

        if remaining <= 0 {
            let Some(downgraded) = self.downgrade(account, expires_at, now).await? else {
                // Renewed by a concurrent charge; nothing expired after all.
                return Ok(());
            };
            stats.expired += 1;

            let result = self
                .dispatcher
                .dispatch(&downgraded, NotificationKind::PlanExpired, now)
                .await?;
            stats.count_email(result.email);
            return Ok(());
        }

        if let Some(kind) = NotificationKind::for_days_remaining(remaining) {
            let result = self.dispatcher.dispatch(account, kind, now).await?;
            if result.created {
                match kind {
                    NotificationKind::PlanExpiring7Days => stats.warned_7days += 1,
                    NotificationKind::PlanExpiring3Days => stats.warned_3days += 1,
                    NotificationKind::PlanExpiring1Day => stats.warned_1day += 1,
                    NotificationKind::PlanExpired => {}
                }
                stats.count_email(result.email);
            }
        }

        Ok(())
    }

    /// Move an expired account to the free plan, clearing the balance and
    /// keeping the prior plan/balance for display. Returns `None` when a
    /// concurrent charge renewed the plan before the downgrade committed.
    async fn downgrade(
        &self,
        account: &Account,
        expired_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> LedgerResult<Option<Account>> {
        let mut attempts = 0;
        let mut current = account.clone();
        loop {
            let prior_tier = current.state.tier();
            let prior_balance = current.token_balance;

            let mut downgraded = current.clone();
            downgraded.state = PlanState::Free;
            downgraded.token_balance = 0;
            downgraded.previous_plan = Some(prior_tier);
            downgraded.previous_token_balance = Some(prior_balance);

            let log = CreditLogEntry::new(
                &current.id,
                CreditAction::PlanExpired,
                prior_balance,
                0,
                json!({
                    "reason": "scheduled_expiration_check",
                    "previousPlan": prior_tier.as_str(),
                    "expiredAt": expired_at.unix_timestamp(),
                }),
                now,
            );

            match self.store.commit_account(&downgraded, Some(&log)).await {
                Ok(()) => {
                    tracing::info!(
                        user_id = %current.id,
                        previous_plan = %prior_tier,
                        cleared_tokens = prior_balance,
                        "Plan expired, account downgraded to free"
                    );
                    downgraded.version += 1;
                    return Ok(Some(downgraded));
                }
                Err(LedgerError::ConcurrentModification) if attempts + 1 < CAS_ATTEMPTS => {
                    attempts += 1;
                    current = self
                        .store
                        .account(&current.id)
                        .await?
                        .ok_or_else(|| LedgerError::NotFound(format!("account {}", current.id)))?;
                    // The concurrent writer may have renewed the plan.
                    match current.state {
                        PlanState::Paid { expires_at, .. }
                            if days_remaining(expires_at, now) <= 0 => {}
                        _ => return Ok(None),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl<S> Clone for ExpirationSweeper<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn days_remaining_rounds_up() {
        let now = datetime!(2025-06-15 09:00 UTC);
        // A second into tomorrow still counts as one day out.
        assert_eq!(days_remaining(now + time::Duration::seconds(1), now), 1);
        assert_eq!(days_remaining(now + time::Duration::days(1), now), 1);
        assert_eq!(
            days_remaining(now + time::Duration::days(3) - time::Duration::hours(1), now),
            3
        );
        assert_eq!(days_remaining(now + time::Duration::days(7), now), 7);
    }

    #[test]
    fn days_remaining_expired_is_zero_or_negative() {
        let now = datetime!(2025-06-15 09:00 UTC);
        assert_eq!(days_remaining(now, now), 0);
        assert!(days_remaining(now - time::Duration::days(1), now) <= 0);
        assert!(days_remaining(now - time::Duration::seconds(30), now) <= 0);
    }
}
