//! Admin record storage.
//!
//! A small trait so the authenticator can run against Postgres in
//! production and an in-memory double in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use super::AuthError;

/// One row of `admin_users`. Sessions live on the admin record: issuing a
/// new token overwrites the previous one, so each admin has at most one
/// active session.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AdminRecord {
    pub email_key: String,
    pub email: String,
    pub name: String,
    /// Argon2 hash. Absent only for records that predate the migration.
    pub password_hash: Option<String>,
    /// Legacy rolling-hash hex; deleted on first successful login.
    pub legacy_password: Option<String>,
    pub session_token: Option<String>,
    pub session_expires_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub last_login_at: Option<OffsetDateTime>,
    pub migrated_at: Option<OffsetDateTime>,
}

#[async_trait]
pub trait AdminDirectory: Send + Sync + 'static {
    async fn find(&self, email_key: &str) -> Result<Option<AdminRecord>, AuthError>;

    async fn find_by_session_token(&self, token: &str) -> Result<Option<AdminRecord>, AuthError>;

    async fn count(&self) -> Result<i64, AuthError>;

    /// Insert a new admin; fails with `AdminAlreadyExists` on a key clash.
    async fn insert(&self, record: &AdminRecord) -> Result<(), AuthError>;

    /// Store the modern hash and drop the legacy field in one update.
    async fn migrate_password(
        &self,
        email_key: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> Result<(), AuthError>;

    async fn set_password(
        &self,
        email_key: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> Result<(), AuthError>;

    /// Overwrite the session token and expiry, stamping the login time.
    async fn set_session(
        &self,
        email_key: &str,
        token: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<(), AuthError>;

    async fn delete(&self, email_key: &str) -> Result<bool, AuthError>;

    async fn list(&self) -> Result<Vec<AdminRecord>, AuthError>;
}

const SELECT_ADMIN: &str = r#"
    SELECT email_key, email, name, password_hash, legacy_password,
           session_token, session_expires_at, created_at, last_login_at, migrated_at
    FROM admin_users
"#;

#[derive(Clone)]
pub struct PgAdminDirectory {
    pool: PgPool,
}

impl PgAdminDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AdminDirectory for PgAdminDirectory {
    async fn find(&self, email_key: &str) -> Result<Option<AdminRecord>, AuthError> {
        let record = sqlx::query_as(&format!("{SELECT_ADMIN} WHERE email_key = $1"))
            .bind(email_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn find_by_session_token(&self, token: &str) -> Result<Option<AdminRecord>, AuthError> {
        let record = sqlx::query_as(&format!("{SELECT_ADMIN} WHERE session_token = $1"))
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn count(&self) -> Result<i64, AuthError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM admin_users")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    async fn insert(&self, record: &AdminRecord) -> Result<(), AuthError> {
        let rows = sqlx::query(
            r#"
            INSERT INTO admin_users (email_key, email, name, password_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $5)
            ON CONFLICT (email_key) DO NOTHING
            "#,
        )
        .bind(&record.email_key)
        .bind(&record.email)
        .bind(&record.name)
        .bind(&record.password_hash)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(AuthError::AdminAlreadyExists);
        }
        Ok(())
    }

    async fn migrate_password(
        &self,
        email_key: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            UPDATE admin_users
            SET password_hash = $2, legacy_password = NULL, migrated_at = $3, updated_at = $3
            WHERE email_key = $1
            "#,
        )
        .bind(email_key)
        .bind(password_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_password(
        &self,
        email_key: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            UPDATE admin_users
            SET password_hash = $2, legacy_password = NULL, updated_at = $3
            WHERE email_key = $1
            "#,
        )
        .bind(email_key)
        .bind(password_hash)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_session(
        &self,
        email_key: &str,
        token: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            UPDATE admin_users
            SET session_token = $2, session_expires_at = $3, last_login_at = $4, updated_at = $4
            WHERE email_key = $1
            "#,
        )
        .bind(email_key)
        .bind(token)
        .bind(expires_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, email_key: &str) -> Result<bool, AuthError> {
        let rows = sqlx::query("DELETE FROM admin_users WHERE email_key = $1")
            .bind(email_key)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(rows > 0)
    }

    async fn list(&self) -> Result<Vec<AdminRecord>, AuthError> {
        let records = sqlx::query_as(&format!("{SELECT_ADMIN} ORDER BY created_at"))
            .fetch_all(&self.pool)
            .await?;
        Ok(records)
    }
}

/// In-memory directory for tests and local development.
#[derive(Clone, Default)]
pub struct MemoryAdminDirectory {
    records: Arc<Mutex<HashMap<String, AdminRecord>>>,
}

impl MemoryAdminDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record directly. Test helper.
    pub async fn put(&self, record: AdminRecord) {
        self.records
            .lock()
            .await
            .insert(record.email_key.clone(), record);
    }
}

#[async_trait]
impl AdminDirectory for MemoryAdminDirectory {
    async fn find(&self, email_key: &str) -> Result<Option<AdminRecord>, AuthError> {
        Ok(self.records.lock().await.get(email_key).cloned())
    }

    async fn find_by_session_token(&self, token: &str) -> Result<Option<AdminRecord>, AuthError> {
        let records = self.records.lock().await;
        Ok(records
            .values()
            .find(|r| {
                r.session_token
                    .as_deref()
                    .map(|stored| stored.as_bytes().ct_eq(token.as_bytes()).into())
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn count(&self) -> Result<i64, AuthError> {
        Ok(self.records.lock().await.len() as i64)
    }

    async fn insert(&self, record: &AdminRecord) -> Result<(), AuthError> {
        let mut records = self.records.lock().await;
        if records.contains_key(&record.email_key) {
            return Err(AuthError::AdminAlreadyExists);
        }
        records.insert(record.email_key.clone(), record.clone());
        Ok(())
    }

    async fn migrate_password(
        &self,
        email_key: &str,
        password_hash: &str,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(email_key).ok_or(AuthError::AdminNotFound)?;
        record.password_hash = Some(password_hash.to_string());
        record.legacy_password = None;
        record.migrated_at = Some(now);
        Ok(())
    }

    async fn set_password(
        &self,
        email_key: &str,
        password_hash: &str,
        _now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(email_key).ok_or(AuthError::AdminNotFound)?;
        record.password_hash = Some(password_hash.to_string());
        record.legacy_password = None;
        Ok(())
    }

    async fn set_session(
        &self,
        email_key: &str,
        token: &str,
        expires_at: OffsetDateTime,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        let mut records = self.records.lock().await;
        let record = records.get_mut(email_key).ok_or(AuthError::AdminNotFound)?;
        record.session_token = Some(token.to_string());
        record.session_expires_at = Some(expires_at);
        record.last_login_at = Some(now);
        Ok(())
    }

    async fn delete(&self, email_key: &str) -> Result<bool, AuthError> {
        Ok(self.records.lock().await.remove(email_key).is_some())
    }

    async fn list(&self) -> Result<Vec<AdminRecord>, AuthError> {
        let mut records: Vec<AdminRecord> =
            self.records.lock().await.values().cloned().collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }
}
