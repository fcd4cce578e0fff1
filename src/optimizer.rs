//! Periodic optimization of forming groups.
//!
//! Two operations, in order: admit compatible open interests into groups
//! with room, then merge small compatible groups. A group takes part in at
//! most one merge per pass. Both operations persist through atomic store
//! operations and re-price the group after any size change.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::clustering::generate_group_name;
use crate::compat::{self, CompatWeights};
use crate::config::{ClusteringConfig, CompatConfig};
use crate::error::CoreError;
use crate::metrics::Counters;
use crate::model::{Group, GroupStatus, Interest};
use crate::pricing::{self, PricingSchedule};
use crate::scheduler::locks::{LockRegistry, destination_key};
use crate::store::{DateWindow, Store};

#[derive(Debug, Default)]
pub struct OptimizeOutcome {
    pub members_admitted: usize,
    pub groups_merged: usize,
}

pub struct Optimizer {
    store: Arc<dyn Store>,
    locks: LockRegistry,
    clustering: ClusteringConfig,
    compat_cfg: CompatConfig,
    schedule: PricingSchedule,
    counters: Counters,
}

impl Optimizer {
    pub fn new(
        store: Arc<dyn Store>,
        locks: LockRegistry,
        clustering: ClusteringConfig,
        compat_cfg: CompatConfig,
        schedule: PricingSchedule,
        counters: Counters,
    ) -> Self {
        Self {
            store,
            locks,
            clustering,
            compat_cfg,
            schedule,
            counters,
        }
    }

    /// One optimization pass over every forming group.
    pub async fn optimize_all(
        &self,
        now: DateTime<Utc>,
        cancelled: &AtomicBool,
    ) -> anyhow::Result<OptimizeOutcome> {
        let forming = self.store.load_groups_by_status(GroupStatus::Forming).await?;
        let mut outcome = OptimizeOutcome::default();

        for group in &forming {
            if cancelled.load(Ordering::Relaxed) {
                warn!("optimization cancelled by soft timeout; remaining groups wait");
                break;
            }

            let _guard = self
                .locks
                .acquire(destination_key(group.destination_id))
                .await;

            // Reload: an earlier merge this pass may have consumed it.
            let Some(current) = self.store.load_group(group.id).await? else {
                continue;
            };
            if current.status != GroupStatus::Forming {
                continue;
            }

            match self.admit_pass(&current, now).await {
                Ok(admitted) => outcome.members_admitted += admitted,
                Err(e) => warn!(group_id = %current.id, error = %e, "admit pass failed"),
            }

            let Some(current) = self.store.load_group(group.id).await? else {
                continue;
            };
            let member_count = self.store.list_members(current.id).await?.len() as u32;
            if current.status == GroupStatus::Forming
                && member_count < self.clustering.small_group_threshold
            {
                match self.merge_pass(&current, now).await {
                    Ok(true) => outcome.groups_merged += 1,
                    Ok(false) => {}
                    Err(e) => warn!(group_id = %current.id, error = %e, "merge pass failed"),
                }
            }
        }

        Ok(outcome)
    }

    /// Forced admit pass for one group (inbound operation).
    #[instrument(skip(self), target = "optimizer", fields(group_id = %group_id))]
    pub async fn optimize_group(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let probe = self
            .store
            .load_group(group_id)
            .await?
            .ok_or(CoreError::GroupNotFound(group_id))?;

        let _guard = self
            .locks
            .acquire(destination_key(probe.destination_id))
            .await;

        let group = self
            .store
            .load_group(group_id)
            .await?
            .ok_or(CoreError::GroupNotFound(group_id))?;

        if group.status != GroupStatus::Forming {
            return Err(CoreError::InvalidTransition(format!(
                "cannot optimize a {} group",
                group.status.as_str()
            )));
        }

        self.admit_pass(&group, now).await
    }

    /// Admits open interests whose mean compatibility to the current members
    /// clears the threshold, until traveler capacity runs out.
    async fn admit_pass(&self, group: &Group, now: DateTime<Utc>) -> Result<usize, CoreError> {
        if !group.has_room() {
            return Ok(0);
        }

        let slack = Duration::days(self.clustering.admit_date_slack_days);
        let window = DateWindow {
            from: group.date_from - slack,
            to: group.date_to + slack,
        };
        let candidates = self
            .store
            .load_open_interests(group.destination_id, &window)
            .await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        let members = self.store.list_members(group.id).await?;
        if members.is_empty() {
            return Ok(0);
        }

        let weights = &self.compat_cfg.weights;
        let mut capacity = group.remaining_capacity();
        let mut admitted: Vec<Interest> = Vec::new();

        for candidate in candidates {
            if candidate.party_size > capacity {
                continue;
            }
            let mean = compat::mean_to_members(&candidate, &members, now, weights);
            if mean >= self.clustering.admit_threshold {
                debug!(
                    interest_id = %candidate.id,
                    mean_compatibility = mean,
                    "admitting interest"
                );
                capacity -= candidate.party_size;
                admitted.push(candidate);
                if capacity == 0 {
                    break;
                }
            }
        }

        if admitted.is_empty() {
            return Ok(0);
        }

        let mut all_members = members;
        all_members.extend(admitted.iter().cloned());

        let quote = pricing::quote(
            &self.schedule,
            group.base_price,
            self.destination_cap(group.destination_id).await?,
            &all_members,
            Some(group.final_price_per_person),
            now,
            "admit",
        );

        let mut updated = group.clone();
        updated.current_size = all_members.iter().map(|m| m.party_size).sum();
        updated.final_price_per_person = quote.final_price;
        pricing::append_audit(&mut updated.price_calc, quote.audit);
        if !updated.has_room() {
            updated.status = GroupStatus::Full;
        }

        let admitted_ids: Vec<Uuid> = admitted.iter().map(|m| m.id).collect();
        self.store.admit_members(&updated, &admitted_ids).await?;

        self.counters
            .members_admitted
            .fetch_add(admitted_ids.len() as u64, Ordering::Relaxed);
        info!(
            group_id = %group.id,
            admitted = admitted_ids.len(),
            new_size = updated.current_size,
            final_price = updated.final_price_per_person,
            "admitted open interests"
        );

        Ok(admitted_ids.len())
    }

    /// Merges `group` with the first compatible small forming group. The
    /// larger membership survives.
    async fn merge_pass(&self, group: &Group, now: DateTime<Utc>) -> Result<bool, CoreError> {
        let slack = Duration::days(self.clustering.merge_date_slack_days);
        let forming = self.store.load_groups_by_status(GroupStatus::Forming).await?;
        let members = self.store.list_members(group.id).await?;
        if members.is_empty() {
            return Ok(false);
        }

        let weights = &self.compat_cfg.weights;

        for candidate in forming {
            if candidate.id == group.id || candidate.destination_id != group.destination_id {
                continue;
            }
            if (candidate.date_from - group.date_from).abs() > slack {
                continue;
            }
            if candidate.current_size + group.current_size > self.clustering.max_group_size {
                continue;
            }

            let candidate_members = self.store.list_members(candidate.id).await?;
            if candidate_members.is_empty() {
                continue;
            }

            let cross = cross_compatibility(&members, &candidate_members, now, weights);
            if cross < self.clustering.merge_threshold {
                continue;
            }

            // Larger membership survives; ties keep the group under
            // optimization as the survivor.
            let (mut survivor, mut merged, survivor_members, merged_members) =
                if candidate_members.len() > members.len() {
                    (
                        candidate.clone(),
                        group.clone(),
                        candidate_members,
                        members.clone(),
                    )
                } else {
                    (
                        group.clone(),
                        candidate.clone(),
                        members.clone(),
                        candidate_members,
                    )
                };

            let mut combined = survivor_members;
            combined.extend(merged_members.iter().cloned());

            let quote = pricing::quote(
                &self.schedule,
                survivor.base_price,
                self.destination_cap(survivor.destination_id).await?,
                &combined,
                Some(survivor.final_price_per_person),
                now,
                "merge",
            );

            survivor.date_from = survivor.date_from.min(merged.date_from);
            survivor.date_to = survivor.date_to.max(merged.date_to);
            survivor.current_size = combined.iter().map(|m| m.party_size).sum();
            survivor.final_price_per_person = quote.final_price;
            pricing::append_audit(&mut survivor.price_calc, quote.audit);

            if let Ok(Some(destination)) =
                self.store.load_destination(survivor.destination_id).await
            {
                survivor.name =
                    generate_group_name(&destination.name, survivor.date_from, combined.len());
            }

            merged.status = GroupStatus::Merged;
            merged.current_size = 0;
            merged.push_note(&format!("Merged into group {}", survivor.id));

            let moved_ids: Vec<Uuid> = merged_members.iter().map(|m| m.id).collect();
            self.store
                .merge_groups(&survivor, &merged, &moved_ids)
                .await?;

            self.counters.groups_merged.fetch_add(1, Ordering::Relaxed);
            info!(
                survivor_id = %survivor.id,
                merged_id = %merged.id,
                cross_compatibility = cross,
                combined_members = combined.len(),
                "merged forming groups"
            );

            // One merge per group per pass.
            return Ok(true);
        }

        Ok(false)
    }

    async fn destination_cap(&self, destination_id: Uuid) -> Result<f64, CoreError> {
        let destination = self
            .store
            .load_destination(destination_id)
            .await?
            .ok_or(CoreError::DestinationNotFound(destination_id))?;
        Ok(destination.max_discount)
    }
}

/// Mean compatibility over all cross pairs of two membership sets.
pub fn cross_compatibility(
    a: &[Interest],
    b: &[Interest],
    now: DateTime<Utc>,
    weights: &CompatWeights,
) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut total = 0.0;
    for x in a {
        for y in b {
            total += compat::score(x, y, now, weights);
        }
    }
    total / (a.len() * b.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Contact, InterestStatus};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()
    }

    fn mk(from_day: u32, party: u32) -> Interest {
        Interest {
            id: Uuid::new_v4(),
            destination_id: Uuid::new_v4(),
            contact: Contact {
                name: "t".to_string(),
                email: "t@example.com".to_string(),
                phone: None,
            },
            party_size: party,
            date_from: Utc.with_ymd_and_hms(2025, 6, from_day, 0, 0, 0).unwrap(),
            date_to: Utc.with_ymd_and_hms(2025, 6, from_day + 7, 0, 0, 0).unwrap(),
            budget_min: Some(35_000.0),
            budget_max: Some(45_000.0),
            status: InterestStatus::Open,
            group_id: None,
            created_at: now(),
        }
    }

    #[test]
    fn cross_compatibility_averages_all_pairs() {
        let a = vec![mk(10, 2), mk(11, 2)];
        let b = vec![mk(10, 2), mk(12, 2)];
        let w = CompatWeights::default();

        let cross = cross_compatibility(&a, &b, now(), &w);
        assert!(cross > 0.8, "close cohorts should be highly compatible, got {cross}");

        let far = vec![
            Interest {
                date_from: Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap(),
                date_to: Utc.with_ymd_and_hms(2025, 10, 8, 0, 0, 0).unwrap(),
                ..mk(10, 2)
            },
        ];
        let low = cross_compatibility(&a, &far, now(), &w);
        assert!(low < cross);
    }

    #[test]
    fn cross_compatibility_of_empty_sets_is_zero() {
        let a = vec![mk(10, 2)];
        assert_eq!(cross_compatibility(&a, &[], now(), &CompatWeights::default()), 0.0);
    }
}
