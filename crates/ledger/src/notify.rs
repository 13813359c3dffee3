//! Notification dispatch: in-app rows plus expiry emails.
//!
//! Dispatch is idempotent per `(user, kind)` per UTC calendar day, which
//! makes sweep re-runs and manual sweep triggers safe.

use std::sync::Arc;

use serde_json::json;
use time::OffsetDateTime;
use uuid::Uuid;

use salonpass_shared::PlanTier;

use crate::email::{EmailOutcome, ExpiryEmailService};
use crate::error::LedgerResult;
use crate::store::AccountLedgerStore;
use crate::types::{Account, Notification, NotificationKind};

#[derive(Debug, Clone, Copy)]
pub struct DispatchResult {
    /// False when the same-day duplicate guard suppressed the
    /// notification.
    pub created: bool,
    pub email: EmailOutcome,
}

pub struct NotificationDispatcher<S> {
    store: Arc<S>,
    email: ExpiryEmailService,
}

fn start_of_utc_day(now: OffsetDateTime) -> OffsetDateTime {
    now.date().midnight().assume_utc()
}

fn plan_display_name(tier: PlanTier) -> &'static str {
    tier.paid().map(|p| p.display_name()).unwrap_or("Free")
}

impl<S: AccountLedgerStore> NotificationDispatcher<S> {
    pub fn new(store: Arc<S>, email: ExpiryEmailService) -> Self {
        Self { store, email }
    }

    /// Create the in-app notification (unless one of this kind already
    /// exists today) and send the matching email.
    pub async fn dispatch(
        &self,
        account: &Account,
        kind: NotificationKind,
        now: OffsetDateTime,
    ) -> LedgerResult<DispatchResult> {
        let day_start = start_of_utc_day(now);
        if self
            .store
            .notification_exists_since(&account.id, kind, day_start)
            .await?
        {
            tracing::debug!(
                user_id = %account.id,
                kind = kind.as_str(),
                "Notification already sent today, skipping"
            );
            return Ok(DispatchResult {
                created: false,
                email: EmailOutcome::Skipped,
            });
        }

        let notification = self.build(account, kind, now);
        self.store.insert_notification(&notification).await?;
        tracing::info!(
            user_id = %account.id,
            kind = kind.as_str(),
            "Notification created"
        );

        let email = self.send_email(account, kind).await;
        Ok(DispatchResult {
            created: true,
            email,
        })
    }

    fn build(&self, account: &Account, kind: NotificationKind, now: OffsetDateTime) -> Notification {
        let (title, message, data) = match kind {
            NotificationKind::PlanExpired => {
                // At dispatch time the downgrade already ran; the prior
                // plan and balance live in the previous_* fields.
                let plan = account.previous_plan.unwrap_or(PlanTier::Free);
                let lost = account.previous_token_balance.unwrap_or(0);
                (
                    "Plan expired".to_string(),
                    format!(
                        "Your {} plan expired and your account was moved to the free plan. \
                         {lost} tokens were cleared.",
                        plan_display_name(plan),
                    ),
                    json!({ "previousPlan": plan.as_str(), "previousTokens": lost }),
                )
            }
            warning => {
                let days = match warning {
                    NotificationKind::PlanExpiring7Days => 7,
                    NotificationKind::PlanExpiring3Days => 3,
                    _ => 1,
                };
                let plan = plan_display_name(account.state.tier());
                (
                    format!("Plan expires in {days} day(s)"),
                    format!(
                        "Your {plan} plan expires in {days} day(s). Your remaining {} tokens \
                         will be lost unless you renew.",
                        account.token_balance,
                    ),
                    json!({ "daysRemaining": days, "tokenBalance": account.token_balance }),
                )
            }
        };

        Notification {
            id: Uuid::new_v4(),
            user_id: account.id.clone(),
            kind,
            title,
            message,
            read: false,
            data,
            created_at: now,
        }
    }

    async fn send_email(&self, account: &Account, kind: NotificationKind) -> EmailOutcome {
        let Some(to) = account.email.as_deref() else {
            return EmailOutcome::Skipped;
        };
        let name = account.display_name.as_deref();

        match kind {
            NotificationKind::PlanExpired => {
                let plan = account.previous_plan.unwrap_or(PlanTier::Free);
                self.email
                    .send_plan_expired(
                        to,
                        name,
                        plan_display_name(plan),
                        account.previous_token_balance.unwrap_or(0),
                    )
                    .await
            }
            NotificationKind::PlanExpiring7Days => {
                self.send_warning_email(account, to, name, 7).await
            }
            NotificationKind::PlanExpiring3Days => {
                self.send_warning_email(account, to, name, 3).await
            }
            NotificationKind::PlanExpiring1Day => self.send_warning_email(account, to, name, 1).await,
        }
    }

    async fn send_warning_email(
        &self,
        account: &Account,
        to: &str,
        name: Option<&str>,
        days: i64,
    ) -> EmailOutcome {
        self.email
            .send_plan_expiring(
                to,
                name,
                plan_display_name(account.state.tier()),
                days,
                account.token_balance,
            )
            .await
    }
}

impl<S> Clone for NotificationDispatcher<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            email: self.email.clone(),
        }
    }
}
