//! Core ledger records: accounts, payment records, credit logs and
//! notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use salonpass_shared::{PaidPlan, PlanTier};

use crate::error::{LedgerError, LedgerResult};

/// Saved payment card summary, for display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCard {
    pub last4: String,
    pub brand: String,
}

/// Plan state of an account. Free accounts cannot carry an expiry and paid
/// accounts always have one; the inconsistent combinations do not exist in
/// this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanState {
    Free,
    Paid {
        plan: PaidPlan,
        started_at: OffsetDateTime,
        expires_at: OffsetDateTime,
    },
}

impl PlanState {
    pub fn tier(&self) -> PlanTier {
        match self {
            PlanState::Free => PlanTier::Free,
            PlanState::Paid { plan, .. } => (*plan).into(),
        }
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        match self {
            PlanState::Free => None,
            PlanState::Paid { expires_at, .. } => Some(*expires_at),
        }
    }

    /// Reconstruct from the loose column triple; rejects rows that violate
    /// the plan/expiry invariant instead of guessing.
    pub fn from_columns(
        plan: &str,
        started_at: Option<OffsetDateTime>,
        expires_at: Option<OffsetDateTime>,
    ) -> LedgerResult<Self> {
        match PlanTier::parse(plan) {
            Some(PlanTier::Free) => match expires_at {
                None => Ok(PlanState::Free),
                Some(_) => Err(LedgerError::CorruptAccount(
                    "free plan with an expiry date".into(),
                )),
            },
            Some(tier) => {
                let plan = match tier.paid() {
                    Some(p) => p,
                    None => {
                        return Err(LedgerError::CorruptAccount(format!(
                            "unreachable tier {tier}"
                        )))
                    }
                };
                let expires_at = expires_at.ok_or_else(|| {
                    LedgerError::CorruptAccount(format!("paid plan {plan} without an expiry date"))
                })?;
                Ok(PlanState::Paid {
                    plan,
                    started_at: started_at.unwrap_or(expires_at - Duration::days(30)),
                    expires_at,
                })
            }
            None => Err(LedgerError::CorruptAccount(format!("unknown plan '{plan}'"))),
        }
    }
}

/// One account per user; the unit of mutual exclusion for every balance
/// mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: String,
    /// Contact address for expiry emails; accounts created through token
    /// endpoints may not have one yet.
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub token_balance: i64,
    pub state: PlanState,
    /// Plan held before the last expiration downgrade, for display.
    pub previous_plan: Option<PlanTier>,
    pub previous_token_balance: Option<i64>,
    pub billing_key: Option<String>,
    pub saved_card: Option<SavedCard>,
    /// Optimistic-concurrency counter; bumped on every committed write.
    pub version: i64,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Account {
    /// Snapshot of the mutable state, taken before applying a charge.
    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            plan: self.state.tier(),
            token_balance: self.token_balance,
            plan_expires_at: self.state.expires_at(),
        }
    }
}

/// Pre-charge account state stored on a payment record and used to reverse
/// the charge on cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub plan: PlanTier,
    pub token_balance: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub plan_expires_at: Option<OffsetDateTime>,
}

/// Payment channel a charge arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentChannel {
    Web,
    AppStore,
}

impl PaymentChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentChannel::Web => "web",
            PaymentChannel::AppStore => "app_store",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "web" => Some(PaymentChannel::Web),
            "app_store" => Some(PaymentChannel::AppStore),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Completed,
    Cancelled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Completed => "completed",
            PaymentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(PaymentStatus::Completed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            _ => None,
        }
    }
}

/// The idempotency anchor: one record per payment identifier, written at
/// most once in `completed` state, flipped to `cancelled` at most once,
/// never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRecord {
    pub payment_id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub product_key: String,
    pub channel: PaymentChannel,
    pub amount_charged: i64,
    pub tokens_granted: i64,
    /// Balance right after the charge; replays return this verbatim.
    pub new_balance: i64,
    pub status: PaymentStatus,
    pub previous_state: AccountSnapshot,
    pub created_at: OffsetDateTime,
    pub cancelled_at: Option<OffsetDateTime>,
    pub cancel_reason: Option<String>,
}

/// Actions recorded in the append-only credit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditAction {
    Purchase,
    IapPurchase,
    Deduct,
    Refund,
    PlanExpired,
    PaymentCancelled,
}

impl CreditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditAction::Purchase => "purchase",
            CreditAction::IapPurchase => "iap_purchase",
            CreditAction::Deduct => "deduct",
            CreditAction::Refund => "refund",
            CreditAction::PlanExpired => "plan_expired",
            CreditAction::PaymentCancelled => "payment_cancelled",
        }
    }
}

/// One append-only audit entry per state-changing operation.
#[derive(Debug, Clone)]
pub struct CreditLogEntry {
    pub id: Uuid,
    pub user_id: String,
    pub action: CreditAction,
    pub delta: i64,
    pub previous_balance: i64,
    pub new_balance: i64,
    pub metadata: Value,
    pub created_at: OffsetDateTime,
}

impl CreditLogEntry {
    pub fn new(
        user_id: &str,
        action: CreditAction,
        previous_balance: i64,
        new_balance: i64,
        metadata: Value,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            action,
            delta: new_balance - previous_balance,
            previous_balance,
            new_balance,
            metadata,
            created_at: now,
        }
    }
}

/// Graduated expiry notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    PlanExpiring7Days,
    PlanExpiring3Days,
    PlanExpiring1Day,
    PlanExpired,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PlanExpiring7Days => "plan_expiring_7days",
            NotificationKind::PlanExpiring3Days => "plan_expiring_3days",
            NotificationKind::PlanExpiring1Day => "plan_expiring_1day",
            NotificationKind::PlanExpired => "plan_expired",
        }
    }

    /// The warning kind for a days-remaining value, if one is defined.
    pub fn for_days_remaining(days: i64) -> Option<Self> {
        match days {
            7 => Some(NotificationKind::PlanExpiring7Days),
            3 => Some(NotificationKind::PlanExpiring3Days),
            1 => Some(NotificationKind::PlanExpiring1Day),
            _ => None,
        }
    }
}

/// An in-app notification row.
#[derive(Debug, Clone)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub read: bool,
    pub data: Value,
    pub created_at: OffsetDateTime,
}
