//! In-memory Store used by tests and local development.
//!
//! One lock over the whole state makes every compound operation atomic by
//! construction, which mirrors the transactional guarantees of the sqlx
//! implementation closely enough for workflow and clustering tests.

use std::collections::HashMap;

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::model::{
    Destination, Group, GroupStatus, Interest, InterestStatus, MemberConfirmation, PaymentStatus,
};
use crate::store::repository::{DateWindow, InterestUpdate, Store};

#[derive(Default)]
struct Inner {
    destinations: HashMap<Uuid, Destination>,
    interests: HashMap<Uuid, Interest>,
    /// Insertion order of interests; clustering scans in this order.
    interest_order: Vec<Uuid>,
    groups: HashMap<Uuid, Group>,
    confirmations: HashMap<Uuid, MemberConfirmation>,
    confirmation_order: Vec<Uuid>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_destination(&self, destination: &Destination) -> Result<()> {
        self.inner
            .lock()
            .destinations
            .insert(destination.id, destination.clone());
        Ok(())
    }

    async fn load_destination(&self, id: Uuid) -> Result<Option<Destination>> {
        Ok(self.inner.lock().destinations.get(&id).cloned())
    }

    async fn insert_interest(&self, interest: &Interest) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.interests.insert(interest.id, interest.clone()).is_none() {
            inner.interest_order.push(interest.id);
        }
        Ok(())
    }

    async fn load_interest(&self, id: Uuid) -> Result<Option<Interest>> {
        Ok(self.inner.lock().interests.get(&id).cloned())
    }

    async fn load_open_interests(
        &self,
        destination_id: Uuid,
        window: &DateWindow,
    ) -> Result<Vec<Interest>> {
        let inner = self.inner.lock();
        Ok(inner
            .interest_order
            .iter()
            .filter_map(|id| inner.interests.get(id))
            .filter(|i| {
                i.destination_id == destination_id
                    && i.status == InterestStatus::Open
                    && window.contains(i.date_from)
            })
            .cloned()
            .collect())
    }

    async fn list_members(&self, group_id: Uuid) -> Result<Vec<Interest>> {
        let inner = self.inner.lock();
        Ok(inner
            .interest_order
            .iter()
            .filter_map(|id| inner.interests.get(id))
            .filter(|i| i.group_id == Some(group_id))
            .cloned()
            .collect())
    }

    async fn set_interest_status(
        &self,
        interest_id: Uuid,
        status: InterestStatus,
        group_id: Option<Uuid>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(interest) = inner.interests.get_mut(&interest_id) else {
            bail!("interest not found: {interest_id}");
        };
        interest.status = status;
        interest.group_id = group_id;
        Ok(())
    }

    async fn destinations_with_open_interests(&self) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock();
        let mut out = Vec::new();
        for id in &inner.interest_order {
            if let Some(i) = inner.interests.get(id) {
                if i.status == InterestStatus::Open && !out.contains(&i.destination_id) {
                    out.push(i.destination_id);
                }
            }
        }
        Ok(out)
    }

    async fn create_group_with_members(&self, group: &Group, member_ids: &[Uuid]) -> Result<()> {
        let mut inner = self.inner.lock();

        // Guard before mutating anything: the whole operation aborts if any
        // member was taken since the cluster was computed.
        for id in member_ids {
            match inner.interests.get(id) {
                Some(i) if i.status == InterestStatus::Open => {}
                Some(_) => bail!("interest {id} no longer open; abandoning cluster"),
                None => bail!("interest not found: {id}"),
            }
        }

        inner.groups.insert(group.id, group.clone());
        for id in member_ids {
            let interest = inner.interests.get_mut(id).unwrap();
            interest.status = InterestStatus::Matched;
            interest.group_id = Some(group.id);
        }
        Ok(())
    }

    async fn update_group(&self, group: &Group) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.groups.contains_key(&group.id) {
            bail!("group not found: {}", group.id);
        }
        inner.groups.insert(group.id, group.clone());
        Ok(())
    }

    async fn load_group(&self, id: Uuid) -> Result<Option<Group>> {
        Ok(self.inner.lock().groups.get(&id).cloned())
    }

    async fn load_groups_by_status(&self, status: GroupStatus) -> Result<Vec<Group>> {
        let inner = self.inner.lock();
        let mut out: Vec<Group> = inner
            .groups
            .values()
            .filter(|g| g.status == status)
            .cloned()
            .collect();
        out.sort_by_key(|g| g.created_at);
        Ok(out)
    }

    async fn load_groups_with_deadline(&self) -> Result<Vec<Group>> {
        let inner = self.inner.lock();
        Ok(inner
            .groups
            .values()
            .filter(|g| !g.status.is_terminal() && g.confirmation_deadline.is_some())
            .cloned()
            .collect())
    }

    async fn admit_members(&self, group: &Group, admitted_ids: &[Uuid]) -> Result<()> {
        let mut inner = self.inner.lock();

        for id in admitted_ids {
            match inner.interests.get(id) {
                Some(i) if i.status == InterestStatus::Open => {}
                _ => bail!("interest {id} no longer open; abandoning admit"),
            }
        }

        inner.groups.insert(group.id, group.clone());
        for id in admitted_ids {
            let interest = inner.interests.get_mut(id).unwrap();
            interest.status = InterestStatus::Matched;
            interest.group_id = Some(group.id);
        }
        Ok(())
    }

    async fn merge_groups(
        &self,
        survivor: &Group,
        merged: &Group,
        moved_ids: &[Uuid],
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        for id in moved_ids {
            match inner.interests.get(id) {
                Some(i) if i.group_id == Some(merged.id) => {}
                _ => bail!("interest {id} not owned by merged group; abandoning merge"),
            }
        }

        inner.groups.insert(survivor.id, survivor.clone());
        inner.groups.insert(merged.id, merged.clone());
        for id in moved_ids {
            inner.interests.get_mut(id).unwrap().group_id = Some(survivor.id);
        }
        Ok(())
    }

    async fn begin_confirmation_round(
        &self,
        group: &Group,
        confirmations: &[MemberConfirmation],
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        match inner.groups.get(&group.id) {
            Some(existing) if existing.status.can_initiate() => {}
            Some(existing) => bail!(
                "group {} not initiable from {}",
                group.id,
                existing.status.as_str()
            ),
            None => bail!("group not found: {}", group.id),
        }

        inner.groups.insert(group.id, group.clone());
        for c in confirmations {
            if inner.confirmations.insert(c.id, c.clone()).is_none() {
                inner.confirmation_order.push(c.id);
            }
        }
        Ok(())
    }

    async fn load_confirmation_by_token(&self, token: &str) -> Result<Option<MemberConfirmation>> {
        let inner = self.inner.lock();
        Ok(inner
            .confirmations
            .values()
            .find(|c| c.token == token)
            .cloned())
    }

    async fn load_confirmation_by_intent(
        &self,
        intent_id: &str,
    ) -> Result<Option<MemberConfirmation>> {
        let inner = self.inner.lock();
        Ok(inner
            .confirmations
            .values()
            .find(|c| c.payment_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn load_confirmations(&self, group_id: Uuid) -> Result<Vec<MemberConfirmation>> {
        let inner = self.inner.lock();
        Ok(inner
            .confirmation_order
            .iter()
            .filter_map(|id| inner.confirmations.get(id))
            .filter(|c| c.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn update_confirmation(&self, confirmation: &MemberConfirmation) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.confirmations.contains_key(&confirmation.id) {
            bail!("confirmation not found: {}", confirmation.id);
        }
        inner.confirmations.insert(confirmation.id, confirmation.clone());
        Ok(())
    }

    async fn load_expired_confirmations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemberConfirmation>> {
        let inner = self.inner.lock();
        Ok(inner
            .confirmation_order
            .iter()
            .filter_map(|id| inner.confirmations.get(id))
            .filter(|c| c.is_expired(now))
            .cloned()
            .collect())
    }

    async fn load_refundable_confirmations(
        &self,
        now: DateTime<Utc>,
        max_attempts: u32,
    ) -> Result<Vec<MemberConfirmation>> {
        let inner = self.inner.lock();
        Ok(inner
            .confirmation_order
            .iter()
            .filter_map(|id| inner.confirmations.get(id))
            .filter(|c| {
                c.payment_status == PaymentStatus::Paid
                    && c.refund_attempts >= 1
                    && c.refund_attempts < max_attempts
                    && c.refund_next_at.is_some_and(|at| at <= now)
                    && inner
                        .groups
                        .get(&c.group_id)
                        .is_some_and(|g| g.status == GroupStatus::Cancelled)
            })
            .cloned()
            .collect())
    }

    async fn apply_group_transition(
        &self,
        group: &Group,
        interest_updates: &[InterestUpdate],
        confirmation_updates: &[MemberConfirmation],
    ) -> Result<()> {
        let mut inner = self.inner.lock();

        if !inner.groups.contains_key(&group.id) {
            bail!("group not found: {}", group.id);
        }
        for u in interest_updates {
            if !inner.interests.contains_key(&u.interest_id) {
                bail!("interest not found: {}", u.interest_id);
            }
        }
        for c in confirmation_updates {
            if !inner.confirmations.contains_key(&c.id) {
                bail!("confirmation not found: {}", c.id);
            }
        }

        inner.groups.insert(group.id, group.clone());
        for u in interest_updates {
            let interest = inner.interests.get_mut(&u.interest_id).unwrap();
            interest.status = u.status;
            interest.group_id = u.group_id;
        }
        for c in confirmation_updates {
            inner.confirmations.insert(c.id, c.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Contact;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, d, 0, 0, 0).unwrap()
    }

    fn mk_interest(dest: Uuid) -> Interest {
        Interest {
            id: Uuid::new_v4(),
            destination_id: dest,
            contact: Contact {
                name: "t".to_string(),
                email: "t@example.com".to_string(),
                phone: None,
            },
            party_size: 2,
            date_from: day(10),
            date_to: day(17),
            budget_min: None,
            budget_max: None,
            status: InterestStatus::Open,
            group_id: None,
            created_at: day(1),
        }
    }

    fn mk_group(dest: Uuid) -> Group {
        Group {
            id: Uuid::new_v4(),
            destination_id: dest,
            name: "g".to_string(),
            date_from: day(10),
            date_to: day(17),
            min_size: 4,
            max_size: 20,
            current_size: 0,
            base_price: 40_000.0,
            final_price_per_person: 40_000.0,
            price_calc: serde_json::Value::Null,
            status: GroupStatus::Forming,
            confirmation_deadline: None,
            auto_confirm_enabled: true,
            minimum_confirmation_rate: 0.75,
            admin_notes: String::new(),
            created_at: day(1),
        }
    }

    #[tokio::test]
    async fn open_interest_scan_respects_window_and_order() {
        let store = MemoryStore::new();
        let dest = Uuid::new_v4();

        let mut early = mk_interest(dest);
        early.date_from = day(5);
        let late = mk_interest(dest);
        let mut outside = mk_interest(dest);
        outside.date_from = Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap();

        store.insert_interest(&early).await.unwrap();
        store.insert_interest(&late).await.unwrap();
        store.insert_interest(&outside).await.unwrap();

        let window = DateWindow { from: day(1), to: day(30) };
        let got = store.load_open_interests(dest, &window).await.unwrap();

        assert_eq!(got.len(), 2);
        assert_eq!(got[0].id, early.id);
        assert_eq!(got[1].id, late.id);
    }

    #[tokio::test]
    async fn cluster_creation_is_all_or_nothing() {
        let store = MemoryStore::new();
        let dest = Uuid::new_v4();

        let a = mk_interest(dest);
        let mut b = mk_interest(dest);
        b.status = InterestStatus::Matched;
        b.group_id = Some(Uuid::new_v4());

        store.insert_interest(&a).await.unwrap();
        store.insert_interest(&b).await.unwrap();

        let group = mk_group(dest);
        let res = store
            .create_group_with_members(&group, &[a.id, b.id])
            .await;
        assert!(res.is_err());

        // Nothing moved: the open member stays open, no group persisted.
        let a_after = store.load_interest(a.id).await.unwrap().unwrap();
        assert_eq!(a_after.status, InterestStatus::Open);
        assert!(store.load_group(group.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn confirmation_round_guards_group_state() {
        let store = MemoryStore::new();
        let dest = Uuid::new_v4();

        let mut group = mk_group(dest);
        let a = mk_interest(dest);
        store.insert_interest(&a).await.unwrap();
        store
            .create_group_with_members(&group, &[a.id])
            .await
            .unwrap();

        group.status = GroupStatus::PendingConfirmation;
        let res = store.begin_confirmation_round(&group, &[]).await;
        assert!(res.is_ok());

        // Second round must fail: the group is no longer initiable.
        let res = store.begin_confirmation_round(&group, &[]).await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn destinations_with_open_interests_deduplicates() {
        let store = MemoryStore::new();
        let dest = Uuid::new_v4();
        store.insert_interest(&mk_interest(dest)).await.unwrap();
        store.insert_interest(&mk_interest(dest)).await.unwrap();

        let dests = store.destinations_with_open_interests().await.unwrap();
        assert_eq!(dests, vec![dest]);
    }
}
