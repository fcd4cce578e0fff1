use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    None,
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::None => "none",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "none" => PaymentStatus::None,
            "pending" => PaymentStatus::Pending,
            "paid" => PaymentStatus::Paid,
            "failed" => PaymentStatus::Failed,
            "refunded" => PaymentStatus::Refunded,
            other => anyhow::bail!("unknown payment status: {other}"),
        })
    }
}

/// Per-member confirmation record, created when a group enters pending
/// confirmation and mutated exactly once by the token holder's reply (or by
/// the reaper on expiry).
#[derive(Clone, Debug)]
pub struct MemberConfirmation {
    pub id: Uuid,
    pub group_id: Uuid,
    pub interest_id: Uuid,

    /// Single-use URL-safe token, 256 bits of entropy.
    pub token: String,

    /// None = pending, Some(true) = accepted, Some(false) = declined.
    pub confirmed: Option<bool>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,

    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    /// Provider transaction id, recorded on capture; refunds key off this.
    pub payment_tx_id: Option<String>,

    /// Deposit owed: party_size x final price x deposit fraction.
    pub amount_due: f64,

    pub decline_reason: Option<String>,

    /// Bounded refund retry bookkeeping.
    pub refund_attempts: u32,
    pub refund_next_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl MemberConfirmation {
    /// Expiry is a derived state: unanswered past the deadline.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.confirmed.is_none() && now > self.expires_at
    }

    /// Still awaiting a reply and not yet expired.
    pub fn is_pending(&self, now: DateTime<Utc>) -> bool {
        self.confirmed.is_none() && now <= self.expires_at
    }

    pub fn accepted(&self) -> bool {
        self.confirmed == Some(true)
    }

    pub fn declined(&self) -> bool {
        self.confirmed == Some(false)
    }
}
