//! Storage abstraction for the ledger.
//!
//! All writers go through this trait; its commit methods are the
//! transaction boundary. Accounts carry an optimistic version counter:
//! every commit takes the account *as read* (its `version` field is the
//! expected value), persists the new state with `version + 1`, and fails
//! with `ConcurrentModification` when another writer got there first. No
//! caller reads an account, computes, and writes outside this scheme.

mod memory;
mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::error::LedgerResult;
use crate::types::{Account, CreditLogEntry, Notification, NotificationKind, PaymentRecord};

#[async_trait]
pub trait AccountLedgerStore: Send + Sync + 'static {
    /// Fetch an account, if it exists.
    async fn account(&self, user_id: &str) -> LedgerResult<Option<Account>>;

    /// Fetch an account, creating it with the free-plan signup grant on
    /// first touch.
    async fn ensure_account(&self, user_id: &str, now: OffsetDateTime) -> LedgerResult<Account>;

    /// Fetch a payment record, if it exists.
    async fn payment(&self, payment_id: &str) -> LedgerResult<Option<PaymentRecord>>;

    /// Atomically write a mutated account plus an optional credit-log
    /// entry. `account.version` is the version that was read; a mismatch
    /// aborts with `ConcurrentModification`.
    async fn commit_account(
        &self,
        account: &Account,
        log: Option<&CreditLogEntry>,
    ) -> LedgerResult<()>;

    /// Atomically write a mutated account, a brand-new completed payment
    /// record, and a credit-log entry. A duplicate `payment_id` aborts
    /// with `DuplicatePayment` (the caller resolves it by re-reading).
    async fn commit_charge(
        &self,
        account: &Account,
        record: &PaymentRecord,
        log: &CreditLogEntry,
    ) -> LedgerResult<()>;

    /// Atomically write a restored account, flip the payment record to
    /// `cancelled`, and append a credit-log entry.
    async fn commit_cancellation(
        &self,
        account: &Account,
        payment_id: &str,
        cancelled_at: OffsetDateTime,
        reason: Option<&str>,
        log: &CreditLogEntry,
    ) -> LedgerResult<()>;

    /// All accounts currently on a paid plan, for the expiration sweep.
    async fn paid_accounts(&self) -> LedgerResult<Vec<Account>>;

    /// Whether a notification of this kind was already created for the
    /// user at or after `day_start`.
    async fn notification_exists_since(
        &self,
        user_id: &str,
        kind: NotificationKind,
        day_start: OffsetDateTime,
    ) -> LedgerResult<bool>;

    async fn insert_notification(&self, notification: &Notification) -> LedgerResult<()>;
}
