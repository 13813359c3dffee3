//! In-memory ledger store.
//!
//! Backs the test suite and local development without Postgres. One mutex
//! over the whole state gives the same serialization the Postgres store
//! gets from transactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use salonpass_shared::TOKEN_SIGNUP_GRANT;

use crate::error::{LedgerError, LedgerResult};
use crate::store::AccountLedgerStore;
use crate::types::{
    Account, CreditLogEntry, Notification, NotificationKind, PaymentRecord, PaymentStatus,
    PlanState,
};

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<String, Account>,
    payments: HashMap<String, PaymentRecord>,
    credit_logs: Vec<CreditLogEntry>,
    notifications: Vec<Notification>,
}

#[derive(Clone, Default)]
pub struct MemoryLedgerStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account directly, bypassing the signup path. Test helper.
    pub async fn put_account(&self, account: Account) {
        let mut state = self.state.lock().await;
        state.accounts.insert(account.id.clone(), account);
    }

    /// All credit-log entries, in append order. Test helper.
    pub async fn credit_logs(&self) -> Vec<CreditLogEntry> {
        self.state.lock().await.credit_logs.clone()
    }

    /// All notifications, in append order. Test helper.
    pub async fn notifications(&self) -> Vec<Notification> {
        self.state.lock().await.notifications.clone()
    }

    fn check_version(existing: &Account, incoming: &Account) -> LedgerResult<()> {
        if existing.version != incoming.version {
            return Err(LedgerError::ConcurrentModification);
        }
        Ok(())
    }

    fn committed(mut account: Account, now: OffsetDateTime) -> Account {
        account.version += 1;
        account.updated_at = now;
        account
    }
}

#[async_trait]
impl AccountLedgerStore for MemoryLedgerStore {
    async fn account(&self, user_id: &str) -> LedgerResult<Option<Account>> {
        Ok(self.state.lock().await.accounts.get(user_id).cloned())
    }

    async fn ensure_account(&self, user_id: &str, now: OffsetDateTime) -> LedgerResult<Account> {
        let mut state = self.state.lock().await;
        let account = state
            .accounts
            .entry(user_id.to_string())
            .or_insert_with(|| Account {
                id: user_id.to_string(),
                email: None,
                display_name: None,
                token_balance: TOKEN_SIGNUP_GRANT,
                state: PlanState::Free,
                previous_plan: None,
                previous_token_balance: None,
                billing_key: None,
                saved_card: None,
                version: 1,
                created_at: now,
                updated_at: now,
            });
        Ok(account.clone())
    }

    async fn payment(&self, payment_id: &str) -> LedgerResult<Option<PaymentRecord>> {
        Ok(self.state.lock().await.payments.get(payment_id).cloned())
    }

    async fn commit_account(
        &self,
        account: &Account,
        log: Option<&CreditLogEntry>,
    ) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        let existing = state
            .accounts
            .get(&account.id)
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", account.id)))?;
        Self::check_version(existing, account)?;

        let now = account.updated_at;
        state
            .accounts
            .insert(account.id.clone(), Self::committed(account.clone(), now));
        if let Some(log) = log {
            state.credit_logs.push(log.clone());
        }
        Ok(())
    }

    async fn commit_charge(
        &self,
        account: &Account,
        record: &PaymentRecord,
        log: &CreditLogEntry,
    ) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        if state.payments.contains_key(&record.payment_id) {
            return Err(LedgerError::DuplicatePayment(record.payment_id.clone()));
        }
        let existing = state
            .accounts
            .get(&account.id)
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", account.id)))?;
        Self::check_version(existing, account)?;

        let now = record.created_at;
        state
            .accounts
            .insert(account.id.clone(), Self::committed(account.clone(), now));
        state
            .payments
            .insert(record.payment_id.clone(), record.clone());
        state.credit_logs.push(log.clone());
        Ok(())
    }

    async fn commit_cancellation(
        &self,
        account: &Account,
        payment_id: &str,
        cancelled_at: OffsetDateTime,
        reason: Option<&str>,
        log: &CreditLogEntry,
    ) -> LedgerResult<()> {
        let mut state = self.state.lock().await;
        let record = state
            .payments
            .get(payment_id)
            .ok_or_else(|| LedgerError::NotFound(format!("payment {payment_id}")))?;
        if record.status == PaymentStatus::Cancelled {
            return Err(LedgerError::AlreadyCancelled(payment_id.to_string()));
        }
        let existing = state
            .accounts
            .get(&account.id)
            .ok_or_else(|| LedgerError::NotFound(format!("account {}", account.id)))?;
        Self::check_version(existing, account)?;

        state
            .accounts
            .insert(account.id.clone(), Self::committed(account.clone(), cancelled_at));
        if let Some(record) = state.payments.get_mut(payment_id) {
            record.status = PaymentStatus::Cancelled;
            record.cancelled_at = Some(cancelled_at);
            record.cancel_reason = reason.map(str::to_string);
        }
        state.credit_logs.push(log.clone());
        Ok(())
    }

    async fn paid_accounts(&self) -> LedgerResult<Vec<Account>> {
        let state = self.state.lock().await;
        let mut accounts: Vec<Account> = state
            .accounts
            .values()
            .filter(|a| !matches!(a.state, PlanState::Free))
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(accounts)
    }

    async fn notification_exists_since(
        &self,
        user_id: &str,
        kind: NotificationKind,
        day_start: OffsetDateTime,
    ) -> LedgerResult<bool> {
        let state = self.state.lock().await;
        Ok(state
            .notifications
            .iter()
            .any(|n| n.user_id == user_id && n.kind == kind && n.created_at >= day_start))
    }

    async fn insert_notification(&self, notification: &Notification) -> LedgerResult<()> {
        self.state
            .lock()
            .await
            .notifications
            .push(notification.clone());
        Ok(())
    }
}
