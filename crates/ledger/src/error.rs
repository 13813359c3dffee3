//! Ledger error taxonomy.
//!
//! Four families: validation (bad input, 400, not retried), gateway
//! (payment authority said no, surfaced verbatim), business rule
//! (deterministic rejections), infrastructure (store/network, retryable —
//! every mutating operation is idempotent).

use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    // Validation
    #[error("missing or malformed input: {0}")]
    Validation(String),

    #[error("unknown plan or product: {0}")]
    UnknownProduct(String),

    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    // Gateway / verification
    #[error("payment gateway rejected the request: {0}")]
    GatewayRejected(String),

    #[error("payment not completed (gateway status: {0})")]
    NotPaid(String),

    #[error("payment amount mismatch: expected {expected}, gateway reports {actual}")]
    AmountMismatch { expected: i64, actual: i64 },

    #[error("receipt invalid: {0}")]
    ReceiptInvalid(String),

    #[error("payment verification unavailable: {0}")]
    VerificationUnavailable(String),

    // Business rules
    #[error("insufficient tokens: need {required}, have {balance}")]
    InsufficientTokens {
        required: i64,
        balance: i64,
        shortfall: i64,
    },

    #[error("payment {0} is already cancelled")]
    AlreadyCancelled(String),

    #[error("not authorized to perform this operation")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    // Infrastructure
    #[error("account was modified concurrently, retry the operation")]
    ConcurrentModification,

    #[error("payment {0} was applied concurrently")]
    DuplicatePayment(String),

    #[error("account record is inconsistent: {0}")]
    CorruptAccount(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl LedgerError {
    /// Whether a caller may safely retry the whole operation. Only
    /// infrastructure failures qualify; everything else is deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::VerificationUnavailable(_)
                | LedgerError::ConcurrentModification
                | LedgerError::Database(_)
        )
    }
}
