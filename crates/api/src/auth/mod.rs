//! Admin authentication: credential verification with legacy-hash
//! migration, and single-active-session tokens.

mod authenticator;
mod directory;

pub use authenticator::{
    email_key, legacy_simple_hash, AdminProfile, LoginSuccess, SessionAuthenticator,
    SESSION_TTL_HOURS,
};
pub use directory::{AdminDirectory, AdminRecord, MemoryAdminDirectory, PgAdminDirectory};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("session not found")]
    SessionNotFound,

    #[error("session expired")]
    SessionExpired,

    #[error("a valid admin session is required")]
    SessionRequired,

    #[error("an administrator with this email already exists")]
    AdminAlreadyExists,

    #[error("administrator not found")]
    AdminNotFound,

    #[error("password must be exactly six digits")]
    WeakPassword,

    #[error("{0}")]
    Validation(String),

    #[error("password hashing failed")]
    Hashing,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
