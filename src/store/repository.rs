use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{Destination, Group, GroupStatus, Interest, InterestStatus, MemberConfirmation};

/// Half-open date filter used for clustering windows and admit scans.
#[derive(Clone, Copy, Debug)]
pub struct DateWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at <= self.to
    }
}

/// One interest mutation inside an atomic group transition.
#[derive(Clone, Debug)]
pub struct InterestUpdate {
    pub interest_id: Uuid,
    pub status: InterestStatus,
    pub group_id: Option<Uuid>,
}

/// Transactional persistence port.
///
/// There is no cross-call transaction handle: every compound operation below
/// is atomic on its own, and implementations wrap each in one transaction.
/// Guarded writes (member still open, group still initiable) fail the whole
/// operation so callers can abandon and retry on the next cycle.
#[async_trait]
pub trait Store: Send + Sync {
    // ---- destinations ----

    async fn insert_destination(&self, destination: &Destination) -> Result<()>;

    async fn load_destination(&self, id: Uuid) -> Result<Option<Destination>>;

    // ---- interests ----

    async fn insert_interest(&self, interest: &Interest) -> Result<()>;

    async fn load_interest(&self, id: Uuid) -> Result<Option<Interest>>;

    /// Open interests for one destination whose `date_from` falls inside the
    /// window, in insertion order.
    async fn load_open_interests(
        &self,
        destination_id: Uuid,
        window: &DateWindow,
    ) -> Result<Vec<Interest>>;

    /// Current members of a group (reverse query over the back reference).
    async fn list_members(&self, group_id: Uuid) -> Result<Vec<Interest>>;

    async fn set_interest_status(
        &self,
        interest_id: Uuid,
        status: InterestStatus,
        group_id: Option<Uuid>,
    ) -> Result<()>;

    /// Destinations that currently have open interests; drives the periodic
    /// clustering job.
    async fn destinations_with_open_interests(&self) -> Result<Vec<Uuid>>;

    // ---- groups ----

    /// Atomic cluster creation: persist the group and flip every member to
    /// matched. Fails (and persists nothing) if any member is no longer
    /// open.
    async fn create_group_with_members(&self, group: &Group, member_ids: &[Uuid]) -> Result<()>;

    async fn update_group(&self, group: &Group) -> Result<()>;

    async fn load_group(&self, id: Uuid) -> Result<Option<Group>>;

    async fn load_groups_by_status(&self, status: GroupStatus) -> Result<Vec<Group>>;

    /// Non-terminal groups carrying a confirmation deadline; the boot-time
    /// timer re-arm scan.
    async fn load_groups_with_deadline(&self) -> Result<Vec<Group>>;

    /// Atomic admit: persist the re-priced group and flip the admitted
    /// interests to matched. Fails whole if any admitted interest is no
    /// longer open.
    async fn admit_members(&self, group: &Group, admitted_ids: &[Uuid]) -> Result<()>;

    /// Atomic merge: persist both group rows and repoint the moved members
    /// at the survivor.
    async fn merge_groups(&self, survivor: &Group, merged: &Group, moved_ids: &[Uuid])
    -> Result<()>;

    // ---- confirmations ----

    /// Atomic workflow initiation: flip the group to pending confirmation
    /// and insert one confirmation per member. Fails whole if the group has
    /// left an initiable state.
    async fn begin_confirmation_round(
        &self,
        group: &Group,
        confirmations: &[MemberConfirmation],
    ) -> Result<()>;

    async fn load_confirmation_by_token(&self, token: &str) -> Result<Option<MemberConfirmation>>;

    async fn load_confirmation_by_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<MemberConfirmation>>;

    async fn load_confirmations(&self, group_id: Uuid) -> Result<Vec<MemberConfirmation>>;

    async fn update_confirmation(&self, confirmation: &MemberConfirmation) -> Result<()>;

    /// Unanswered confirmations past their expiry.
    async fn load_expired_confirmations(&self, now: DateTime<Utc>)
    -> Result<Vec<MemberConfirmation>>;

    /// Paid confirmations of cancelled groups with a refund attempt due:
    /// attempts in `1..max_attempts` and `refund_next_at <= now`.
    async fn load_refundable_confirmations(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<MemberConfirmation>>;

    /// Atomic workflow transition: group row, interest releases/conversions,
    /// and confirmation updates land together or not at all.
    async fn apply_group_transition(
        &self,
        group: &Group,
        interest_updates: &[InterestUpdate],
        confirmation_updates: &[MemberConfirmation],
    ) -> Result<()>;
}
