use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Group lifecycle.
///
/// `Full` is reached when an admit pass fills a forming group to capacity;
/// it behaves like `Forming` for workflow initiation and is excluded from
/// further admits and merges. `Confirmed`, `Cancelled` and `Merged` are
/// terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    Forming,
    PendingConfirmation,
    Confirmed,
    Full,
    Cancelled,
    Merged,
}

impl GroupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupStatus::Forming => "forming",
            GroupStatus::PendingConfirmation => "pending_confirmation",
            GroupStatus::Confirmed => "confirmed",
            GroupStatus::Full => "full",
            GroupStatus::Cancelled => "cancelled",
            GroupStatus::Merged => "merged",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "forming" => GroupStatus::Forming,
            "pending_confirmation" => GroupStatus::PendingConfirmation,
            "confirmed" => GroupStatus::Confirmed,
            "full" => GroupStatus::Full,
            "cancelled" => GroupStatus::Cancelled,
            "merged" => GroupStatus::Merged,
            other => anyhow::bail!("unknown group status: {other}"),
        })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GroupStatus::Confirmed | GroupStatus::Cancelled | GroupStatus::Merged
        )
    }

    /// States from which the confirmation workflow may be initiated.
    pub fn can_initiate(&self) -> bool {
        matches!(self, GroupStatus::Forming | GroupStatus::Full)
    }
}

/// A forming-or-confirmed bundle of interests for one destination and date
/// envelope, priced as a unit.
///
/// Size semantics: `current_size` is the total traveler count (sum of member
/// party sizes) and is what `max_size` caps; discount tiers and confirmation
/// thresholds count member interests, derived by reverse query.
#[derive(Clone, Debug)]
pub struct Group {
    pub id: Uuid,
    pub destination_id: Uuid,
    pub name: String,

    /// Widest envelope over member date windows.
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,

    pub min_size: u32,
    pub max_size: u32,
    pub current_size: u32,

    pub base_price: f64,
    pub final_price_per_person: f64,

    /// Pricing audit trail; one entry appended per recomputation.
    pub price_calc: serde_json::Value,

    pub status: GroupStatus,

    /// Set when the group enters pending confirmation; the scheduler's
    /// one-shot timers are reconstructed from this on boot.
    pub confirmation_deadline: Option<DateTime<Utc>>,

    pub auto_confirm_enabled: bool,
    pub minimum_confirmation_rate: f64,

    /// Operator-facing audit trail (merge notes, cancellation reasons).
    pub admin_notes: String,

    pub created_at: DateTime<Utc>,
}

impl Group {
    /// Remaining traveler capacity.
    pub fn remaining_capacity(&self) -> u32 {
        self.max_size.saturating_sub(self.current_size)
    }

    pub fn has_room(&self) -> bool {
        self.remaining_capacity() > 0
    }

    /// Per-person savings against the undiscounted price.
    pub fn savings_per_person(&self) -> f64 {
        (self.base_price - self.final_price_per_person).max(0.0)
    }

    pub fn push_note(&mut self, note: &str) {
        if self.admin_notes.is_empty() {
            self.admin_notes = note.to_string();
        } else {
            self.admin_notes.push('\n');
            self.admin_notes.push_str(note);
        }
    }
}
