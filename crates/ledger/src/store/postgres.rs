//! Postgres-backed ledger store.
//!
//! Every commit runs inside a single transaction with a versioned UPDATE
//! on `users`; zero rows affected means another writer won the race.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use time::OffsetDateTime;

use salonpass_shared::{PlanTier, TOKEN_SIGNUP_GRANT};

use crate::error::{LedgerError, LedgerResult};
use crate::store::AccountLedgerStore;
use crate::types::{
    Account, AccountSnapshot, CreditLogEntry, Notification, NotificationKind, PaymentChannel,
    PaymentRecord, PaymentStatus, PlanState, SavedCard,
};

#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: String,
    email: Option<String>,
    display_name: Option<String>,
    plan: String,
    token_balance: i64,
    plan_started_at: Option<OffsetDateTime>,
    plan_expires_at: Option<OffsetDateTime>,
    previous_plan: Option<String>,
    previous_token_balance: Option<i64>,
    billing_key: Option<String>,
    card_last4: Option<String>,
    card_brand: Option<String>,
    version: i64,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl AccountRow {
    fn into_account(self) -> LedgerResult<Account> {
        let state =
            PlanState::from_columns(&self.plan, self.plan_started_at, self.plan_expires_at)?;
        let saved_card = match (self.card_last4, self.card_brand) {
            (Some(last4), Some(brand)) => Some(SavedCard { last4, brand }),
            _ => None,
        };
        Ok(Account {
            id: self.id,
            email: self.email,
            display_name: self.display_name,
            token_balance: self.token_balance,
            state,
            previous_plan: self.previous_plan.as_deref().and_then(PlanTier::parse),
            previous_token_balance: self.previous_token_balance,
            billing_key: self.billing_key,
            saved_card,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    payment_id: String,
    user_id: String,
    user_name: Option<String>,
    product_key: String,
    channel: String,
    amount_charged: i64,
    tokens_granted: i64,
    new_balance: i64,
    status: String,
    prev_plan: String,
    prev_token_balance: i64,
    prev_plan_expires_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    cancelled_at: Option<OffsetDateTime>,
    cancel_reason: Option<String>,
}

impl PaymentRow {
    fn into_record(self) -> LedgerResult<PaymentRecord> {
        let channel = PaymentChannel::parse(&self.channel).ok_or_else(|| {
            LedgerError::CorruptAccount(format!("unknown payment channel '{}'", self.channel))
        })?;
        let status = PaymentStatus::parse(&self.status).ok_or_else(|| {
            LedgerError::CorruptAccount(format!("unknown payment status '{}'", self.status))
        })?;
        let prev_plan = PlanTier::parse(&self.prev_plan).ok_or_else(|| {
            LedgerError::CorruptAccount(format!("unknown snapshot plan '{}'", self.prev_plan))
        })?;
        Ok(PaymentRecord {
            payment_id: self.payment_id,
            user_id: self.user_id,
            user_name: self.user_name,
            product_key: self.product_key,
            channel,
            amount_charged: self.amount_charged,
            tokens_granted: self.tokens_granted,
            new_balance: self.new_balance,
            status,
            previous_state: AccountSnapshot {
                plan: prev_plan,
                token_balance: self.prev_token_balance,
                plan_expires_at: self.prev_plan_expires_at,
            },
            created_at: self.created_at,
            cancelled_at: self.cancelled_at,
            cancel_reason: self.cancel_reason,
        })
    }
}

const SELECT_ACCOUNT: &str = r#"
    SELECT id, email, display_name, plan, token_balance, plan_started_at, plan_expires_at,
           previous_plan, previous_token_balance, billing_key,
           card_last4, card_brand, version, created_at, updated_at
    FROM users
    WHERE id = $1
"#;

const SELECT_PAYMENT: &str = r#"
    SELECT payment_id, user_id, user_name, product_key, channel,
           amount_charged, tokens_granted, new_balance, status,
           prev_plan, prev_token_balance, prev_plan_expires_at,
           created_at, cancelled_at, cancel_reason
    FROM payments
    WHERE payment_id = $1
"#;

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Versioned account UPDATE inside an open transaction. Zero rows
    /// affected surfaces as `ConcurrentModification`.
    async fn update_account_versioned(
        tx: &mut Transaction<'_, Postgres>,
        account: &Account,
    ) -> LedgerResult<()> {
        let (last4, brand) = match &account.saved_card {
            Some(card) => (Some(card.last4.as_str()), Some(card.brand.as_str())),
            None => (None, None),
        };
        let started_at = match account.state {
            PlanState::Paid { started_at, .. } => Some(started_at),
            PlanState::Free => None,
        };

        let rows = sqlx::query(
            r#"
            UPDATE users SET
                plan = $1,
                token_balance = $2,
                plan_started_at = $3,
                plan_expires_at = $4,
                previous_plan = $5,
                previous_token_balance = $6,
                billing_key = $7,
                card_last4 = $8,
                card_brand = $9,
                version = version + 1,
                updated_at = NOW()
            WHERE id = $10 AND version = $11
            "#,
        )
        .bind(account.state.tier().as_str())
        .bind(account.token_balance)
        .bind(started_at)
        .bind(account.state.expires_at())
        .bind(account.previous_plan.map(|p| p.as_str()))
        .bind(account.previous_token_balance)
        .bind(&account.billing_key)
        .bind(last4)
        .bind(brand)
        .bind(&account.id)
        .bind(account.version)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(LedgerError::ConcurrentModification);
        }
        Ok(())
    }

    async fn insert_log(
        tx: &mut Transaction<'_, Postgres>,
        log: &CreditLogEntry,
    ) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO credit_logs
                (id, user_id, action, delta, previous_balance, new_balance, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(log.id)
        .bind(&log.user_id)
        .bind(log.action.as_str())
        .bind(log.delta)
        .bind(log.previous_balance)
        .bind(log.new_balance)
        .bind(&log.metadata)
        .bind(log.created_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl AccountLedgerStore for PgLedgerStore {
    async fn account(&self, user_id: &str) -> LedgerResult<Option<Account>> {
        let row: Option<AccountRow> = sqlx::query_as(SELECT_ACCOUNT)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(AccountRow::into_account).transpose()
    }

    async fn ensure_account(&self, user_id: &str, now: OffsetDateTime) -> LedgerResult<Account> {
        // Insert-if-missing, then read back; races collapse on the PK.
        sqlx::query(
            r#"
            INSERT INTO users (id, plan, token_balance, version, created_at, updated_at)
            VALUES ($1, 'free', $2, 1, $3, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .bind(TOKEN_SIGNUP_GRANT)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row: AccountRow = sqlx::query_as(SELECT_ACCOUNT)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        row.into_account()
    }

    async fn payment(&self, payment_id: &str) -> LedgerResult<Option<PaymentRecord>> {
        let row: Option<PaymentRow> = sqlx::query_as(SELECT_PAYMENT)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(PaymentRow::into_record).transpose()
    }

    async fn commit_account(
        &self,
        account: &Account,
        log: Option<&CreditLogEntry>,
    ) -> LedgerResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::update_account_versioned(&mut tx, account).await?;
        if let Some(log) = log {
            Self::insert_log(&mut tx, log).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn commit_charge(
        &self,
        account: &Account,
        record: &PaymentRecord,
        log: &CreditLogEntry,
    ) -> LedgerResult<()> {
        let mut tx = self.pool.begin().await?;
        Self::update_account_versioned(&mut tx, account).await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO payments
                (payment_id, user_id, user_name, product_key, channel,
                 amount_charged, tokens_granted, new_balance, status,
                 prev_plan, prev_token_balance, prev_plan_expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (payment_id) DO NOTHING
            "#,
        )
        .bind(&record.payment_id)
        .bind(&record.user_id)
        .bind(&record.user_name)
        .bind(&record.product_key)
        .bind(record.channel.as_str())
        .bind(record.amount_charged)
        .bind(record.tokens_granted)
        .bind(record.new_balance)
        .bind(record.status.as_str())
        .bind(record.previous_state.plan.as_str())
        .bind(record.previous_state.token_balance)
        .bind(record.previous_state.plan_expires_at)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            // Someone else applied this payment concurrently; roll back the
            // account mutation and let the caller return the prior result.
            tx.rollback().await?;
            return Err(LedgerError::DuplicatePayment(record.payment_id.clone()));
        }

        Self::insert_log(&mut tx, log).await?;
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        Self::update_account_versioned(&mut tx, account).await?;

        let rows = sqlx::query(
            r#"
            UPDATE payments
            SET status = 'cancelled', cancelled_at = $2, cancel_reason = $3
            WHERE payment_id = $1 AND status = 'completed'
            "#,
        )
        .bind(payment_id)
        .bind(cancelled_at)
        .bind(reason)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows == 0 {
            tx.rollback().await?;
            return Err(LedgerError::AlreadyCancelled(payment_id.to_string()));
        }

        Self::insert_log(&mut tx, log).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn paid_accounts(&self) -> LedgerResult<Vec<Account>> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, email, display_name, plan, token_balance, plan_started_at, plan_expires_at,
                   previous_plan, previous_token_balance, billing_key,
                   card_last4, card_brand, version, created_at, updated_at
            FROM users
            WHERE plan IN ('basic', 'pro', 'business')
            ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AccountRow::into_account).collect()
    }

    async fn notification_exists_since(
        &self,
        user_id: &str,
        kind: NotificationKind,
        day_start: OffsetDateTime,
    ) -> LedgerResult<bool> {
        let row: Option<(bool,)> = sqlx::query_as(
            r#"
            SELECT TRUE FROM notifications
            WHERE user_id = $1 AND kind = $2 AND created_at >= $3
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(kind.as_str())
        .bind(day_start)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn insert_notification(&self, notification: &Notification) -> LedgerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications (id, user_id, kind, title, message, read, data, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(notification.id)
        .bind(&notification.user_id)
        .bind(notification.kind.as_str())
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(notification.read)
        .bind(&notification.data)
        .bind(notification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
