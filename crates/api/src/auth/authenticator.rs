//! Credential verification and session issuance.
//!
//! Passwords verify against the argon2 hash; records that still carry only
//! the legacy rolling hash are migrated in place on their first successful
//! login. Sessions are opaque 64-character tokens with a 24-hour TTL, one
//! active token per admin.

use std::sync::Arc;

use argon2::password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use time::{Duration, OffsetDateTime};

use super::directory::{AdminDirectory, AdminRecord};
use super::AuthError;

pub const SESSION_TTL_HOURS: i64 = 24;
const SESSION_TOKEN_LEN: usize = 64;

/// Hash of the pre-migration password scheme: a 32-bit rolling hash over
/// UTF-16 code units, formatted as (possibly negative) hex. Kept only to
/// verify old records before migrating them.
pub fn legacy_simple_hash(input: &str) -> String {
    let mut hash: i32 = 0;
    for unit in input.encode_utf16() {
        hash = hash
            .wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32);
    }
    if hash < 0 {
        format!("-{:x}", hash.unsigned_abs())
    } else {
        format!("{:x}", hash)
    }
}

fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::Hashing)
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn generate_session_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_TOKEN_LEN)
        .map(char::from)
        .collect()
}

/// Admin password policy: exactly six digits.
fn check_password_policy(password: &str) -> Result<(), AuthError> {
    if password.len() == 6 && password.chars().all(|c| c.is_ascii_digit()) {
        Ok(())
    } else {
        Err(AuthError::WeakPassword)
    }
}

/// Document key for an admin email.
pub fn email_key(email: &str) -> String {
    email.replace(['@', '.'], "_")
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminProfile {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSuccess {
    pub admin: AdminProfile,
    pub session_token: String,
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

pub struct SessionAuthenticator<D> {
    directory: Arc<D>,
}

impl<D: AdminDirectory> SessionAuthenticator<D> {
    pub fn new(directory: Arc<D>) -> Self {
        Self { directory }
    }

    /// Verify credentials and issue a fresh session token.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        now: OffsetDateTime,
    ) -> Result<LoginSuccess, AuthError> {
        if email.is_empty() || password.is_empty() {
            return Err(AuthError::Validation(
                "email and password are required".into(),
            ));
        }

        let key = email_key(email);
        let record = self
            .directory
            .find(&key)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        let mut valid = false;

        if let Some(hash) = &record.password_hash {
            valid = verify_password(password, hash);
        }

        if !valid {
            if let Some(legacy) = &record.legacy_password {
                if *legacy == legacy_simple_hash(password) {
                    valid = true;
                    // Migrate in place: store the modern hash and drop the
                    // legacy field in the same update.
                    tracing::info!(email = %email, "Migrating legacy password hash");
                    let new_hash = hash_password(password)?;
                    self.directory.migrate_password(&key, &new_hash, now).await?;
                }
            }
        }

        if !valid {
            return Err(AuthError::InvalidCredentials);
        }

        let token = generate_session_token();
        let expires_at = now + Duration::hours(SESSION_TTL_HOURS);
        self.directory
            .set_session(&key, &token, expires_at, now)
            .await?;

        tracing::info!(email = %email, "Admin login");

        Ok(LoginSuccess {
            admin: AdminProfile {
                email: record.email,
                name: record.name,
            },
            session_token: token,
            expires_at,
        })
    }

    /// Resolve a session token to its admin. Missing and expired sessions
    /// are distinct errors but callers treat both as a reject.
    pub async fn validate_session(
        &self,
        token: &str,
        now: OffsetDateTime,
    ) -> Result<AdminRecord, AuthError> {
        if token.is_empty() {
            return Err(AuthError::SessionNotFound);
        }

        let record = self
            .directory
            .find_by_session_token(token)
            .await?
            .ok_or(AuthError::SessionNotFound)?;

        match record.session_expires_at {
            Some(expires_at) if expires_at > now => Ok(record),
            _ => Err(AuthError::SessionExpired),
        }
    }

    /// Register a new admin. The very first admin may self-register; every
    /// later registration needs a valid session from an existing admin.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<&str>,
        session_token: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<AdminProfile, AuthError> {
        if email.is_empty() {
            return Err(AuthError::Validation("email is required".into()));
        }
        check_password_policy(password)?;

        if self.directory.count().await? > 0 {
            let token = session_token.ok_or(AuthError::SessionRequired)?;
            self.validate_session(token, now)
                .await
                .map_err(|_| AuthError::SessionRequired)?;
        }

        let record = AdminRecord {
            email_key: email_key(email),
            email: email.to_string(),
            name: name.unwrap_or("Administrator").to_string(),
            password_hash: Some(hash_password(password)?),
            legacy_password: None,
            session_token: None,
            session_expires_at: None,
            created_at: now,
            last_login_at: None,
            migrated_at: None,
        };
        self.directory.insert(&record).await?;

        tracing::info!(email = %email, "Admin registered");

        Ok(AdminProfile {
            email: record.email,
            name: record.name,
        })
    }

    /// Change a password after verifying the current one; also migrates
    /// legacy records off the old scheme.
    pub async fn change_password(
        &self,
        email: &str,
        current_password: &str,
        new_password: &str,
        now: OffsetDateTime,
    ) -> Result<(), AuthError> {
        check_password_policy(new_password)?;

        let key = email_key(email);
        let record = self
            .directory
            .find(&key)
            .await?
            .ok_or(AuthError::AdminNotFound)?;

        let valid = match (&record.password_hash, &record.legacy_password) {
            (Some(hash), _) => verify_password(current_password, hash),
            (None, Some(legacy)) => *legacy == legacy_simple_hash(current_password),
            (None, None) => false,
        };
        if !valid {
            return Err(AuthError::InvalidCredentials);
        }

        let new_hash = hash_password(new_password)?;
        self.directory.set_password(&key, &new_hash, now).await?;

        tracing::info!(email = %email, "Admin password changed");
        Ok(())
    }

    pub async fn delete(&self, email: &str) -> Result<(), AuthError> {
        if self.directory.delete(&email_key(email)).await? {
            tracing::info!(email = %email, "Admin deleted");
            Ok(())
        } else {
            Err(AuthError::AdminNotFound)
        }
    }

    pub async fn list(&self) -> Result<Vec<AdminProfile>, AuthError> {
        Ok(self
            .directory
            .list()
            .await?
            .into_iter()
            .map(|r| AdminProfile {
                email: r.email,
                name: r.name,
            })
            .collect())
    }
}

impl<D> Clone for SessionAuthenticator<D> {
    fn clone(&self) -> Self {
        Self {
            directory: self.directory.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::super::directory::MemoryAdminDirectory;
    use super::*;
    use time::macros::datetime;

    fn now() -> OffsetDateTime {
        datetime!(2025-06-15 09:00 UTC)
    }

    fn auth() -> (SessionAuthenticator<MemoryAdminDirectory>, Arc<MemoryAdminDirectory>) {
        let directory = Arc::new(MemoryAdminDirectory::new());
        (SessionAuthenticator::new(directory.clone()), directory)
    }

    async fn seed_legacy(directory: &MemoryAdminDirectory, email: &str, password: &str) {
        directory
            .put(AdminRecord {
                email_key: email_key(email),
                email: email.to_string(),
                name: "Owner".to_string(),
                password_hash: None,
                legacy_password: Some(legacy_simple_hash(password)),
                session_token: None,
                session_expires_at: None,
                created_at: now() - Duration::days(400),
                last_login_at: None,
                migrated_at: None,
            })
            .await;
    }

    #[test]
    fn legacy_hash_matches_known_values() {
        // Matches the 32-bit rolling hash the old client computed.
        assert_eq!(legacy_simple_hash(""), "0");
        assert_eq!(legacy_simple_hash("a"), "61");
        assert_eq!(legacy_simple_hash("123456"), "56760663");
        // Long inputs overflow into the negative range.
        assert!(legacy_simple_hash("this is a much longer password 12345").len() > 1);
    }

    #[tokio::test]
    async fn legacy_login_migrates_to_modern_hash() {
        let (auth, directory) = auth();
        seed_legacy(&directory, "owner@salon.example", "123456").await;

        auth.login("owner@salon.example", "123456", now())
            .await
            .unwrap();

        let record = directory
            .find(&email_key("owner@salon.example"))
            .await
            .unwrap()
            .unwrap();
        assert!(record.legacy_password.is_none());
        assert!(record.migrated_at.is_some());
        let hash = record.password_hash.unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("123456", &hash));

        // Second login succeeds through the modern path only.
        auth.login("owner@salon.example", "123456", now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn wrong_password_rejected_without_migration() {
        let (auth, directory) = auth();
        seed_legacy(&directory, "owner@salon.example", "123456").await;

        let err = auth
            .login("owner@salon.example", "654321", now())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        let record = directory
            .find(&email_key("owner@salon.example"))
            .await
            .unwrap()
            .unwrap();
        assert!(record.legacy_password.is_some());
        assert!(record.password_hash.is_none());
    }

    #[tokio::test]
    async fn session_tokens_expire_after_ttl() {
        let (auth, _) = auth();
        auth.register("owner@salon.example", "123456", None, None, now())
            .await
            .unwrap();
        let login = auth
            .login("owner@salon.example", "123456", now())
            .await
            .unwrap();

        // Valid within the TTL.
        auth.validate_session(&login.session_token, now() + Duration::hours(23))
            .await
            .unwrap();

        let err = auth
            .validate_session(&login.session_token, now() + Duration::hours(25))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SessionExpired));

        let err = auth
            .validate_session("nonexistent-token", now())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SessionNotFound));
    }

    #[tokio::test]
    async fn relogin_overwrites_the_previous_session() {
        let (auth, _) = auth();
        auth.register("owner@salon.example", "123456", None, None, now())
            .await
            .unwrap();

        let first = auth
            .login("owner@salon.example", "123456", now())
            .await
            .unwrap();
        let second = auth
            .login("owner@salon.example", "123456", now())
            .await
            .unwrap();

        assert_ne!(first.session_token, second.session_token);
        assert!(auth
            .validate_session(&first.session_token, now())
            .await
            .is_err());
        auth.validate_session(&second.session_token, now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn first_admin_bootstraps_then_registration_needs_a_session() {
        let (auth, _) = auth();

        // Bootstrap: no session needed while the directory is empty.
        auth.register("first@salon.example", "111111", Some("First"), None, now())
            .await
            .unwrap();

        // A second self-registration is refused.
        let err = auth
            .register("second@salon.example", "222222", None, None, now())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SessionRequired));

        // With a session from the existing admin it goes through.
        let login = auth
            .login("first@salon.example", "111111", now())
            .await
            .unwrap();
        auth.register(
            "second@salon.example",
            "222222",
            None,
            Some(&login.session_token),
            now(),
        )
        .await
        .unwrap();

        assert_eq!(auth.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn password_policy_is_six_digits() {
        let (auth, _) = auth();
        for bad in ["12345", "1234567", "abcdef", "12345a", ""] {
            let err = auth
                .register("owner@salon.example", bad, None, None, now())
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::WeakPassword), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn change_password_verifies_current_and_migrates() {
        let (auth, directory) = auth();
        seed_legacy(&directory, "owner@salon.example", "123456").await;

        let err = auth
            .change_password("owner@salon.example", "000000", "777777", now())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));

        auth.change_password("owner@salon.example", "123456", "777777", now())
            .await
            .unwrap();

        let record = directory
            .find(&email_key("owner@salon.example"))
            .await
            .unwrap()
            .unwrap();
        assert!(record.legacy_password.is_none());
        auth.login("owner@salon.example", "777777", now())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let (auth, _) = auth();
        auth.register("owner@salon.example", "123456", None, None, now())
            .await
            .unwrap();
        let login = auth
            .login("owner@salon.example", "123456", now())
            .await
            .unwrap();
        let err = auth
            .register(
                "owner@salon.example",
                "123456",
                None,
                Some(&login.session_token),
                now(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::AdminAlreadyExists));
    }
}
