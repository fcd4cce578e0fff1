//! Interest clustering per destination.
//!
//! Stage 0 is greedy rule-based grouping in insertion order and always runs;
//! the optional refinement stage may replace its result when it clears the
//! quality gate. Surviving clusters become forming groups in one atomic
//! store operation each; a failed cluster is abandoned and re-attempted on
//! the next run.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Datelike, Duration, Utc};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::compat::{self, CompatWeights};
use crate::config::{ClusteringConfig, CompatConfig};
use crate::error::CoreError;
use crate::metrics::Counters;
use crate::model::{Destination, Group, GroupStatus, Interest};
use crate::pricing::{self, PricingSchedule};
use crate::scheduler::locks::{LockRegistry, destination_key};
use crate::store::{DateWindow, Store};

use super::refine;

#[derive(Debug, Default)]
pub struct ClusterOutcome {
    pub interests_considered: usize,
    pub groups_created: usize,
}

pub struct Clusterer {
    store: Arc<dyn Store>,
    locks: LockRegistry,
    clustering: ClusteringConfig,
    compat_cfg: CompatConfig,
    schedule: PricingSchedule,
    /// Workflow defaults stamped onto new groups.
    auto_confirm_enabled: bool,
    minimum_confirmation_rate: f64,
    counters: Counters,
}

impl Clusterer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        locks: LockRegistry,
        clustering: ClusteringConfig,
        compat_cfg: CompatConfig,
        schedule: PricingSchedule,
        auto_confirm_enabled: bool,
        minimum_confirmation_rate: f64,
        counters: Counters,
    ) -> Self {
        Self {
            store,
            locks,
            clustering,
            compat_cfg,
            schedule,
            auto_confirm_enabled,
            minimum_confirmation_rate,
            counters,
        }
    }

    /// One clustering pass over every destination with open interests.
    pub async fn cluster_all(
        &self,
        now: DateTime<Utc>,
        cancelled: &AtomicBool,
    ) -> anyhow::Result<usize> {
        let destinations = self.store.destinations_with_open_interests().await?;
        let mut groups_created = 0usize;

        for destination_id in destinations {
            if cancelled.load(Ordering::Relaxed) {
                warn!("clustering cancelled by soft timeout; remaining destinations wait");
                break;
            }
            match self.cluster_destination(destination_id, now).await {
                Ok(outcome) => groups_created += outcome.groups_created,
                Err(e) => {
                    warn!(destination_id = %destination_id, error = %e, "clustering pass failed")
                }
            }
        }

        Ok(groups_created)
    }

    /// Clusters one destination's open interests into forming groups.
    /// Serialized per destination.
    #[instrument(skip(self), target = "clustering", fields(destination_id = %destination_id))]
    pub async fn cluster_destination(
        &self,
        destination_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ClusterOutcome, CoreError> {
        let _guard = self.locks.acquire(destination_key(destination_id)).await;

        let destination = self
            .store
            .load_destination(destination_id)
            .await?
            .ok_or(CoreError::DestinationNotFound(destination_id))?;

        if !destination.is_active {
            debug!("destination inactive; skipping");
            return Ok(ClusterOutcome::default());
        }

        let window = DateWindow {
            from: now - Duration::days(self.clustering.window_past_days),
            to: now + Duration::days(self.clustering.window_future_days),
        };
        let interests = self
            .store
            .load_open_interests(destination_id, &window)
            .await?;

        let mut outcome = ClusterOutcome {
            interests_considered: interests.len(),
            groups_created: 0,
        };

        if interests.len() < 2 {
            debug!(count = interests.len(), "not enough open interests");
            return Ok(outcome);
        }

        let weights = &self.compat_cfg.weights;

        // Stage 0 always runs and is the fallback.
        let mut clusters = rule_based_clusters(
            &interests,
            now,
            weights,
            self.compat_cfg.threshold_admit,
        );
        debug!(clusters = clusters.len(), "rule-based clustering done");

        if self.clustering.refine_enabled
            && interests.len() >= self.clustering.refine_min_samples
        {
            if let Some(refined) =
                refine::refine(&interests, now, weights, self.compat_cfg.threshold_quality)
            {
                debug!(clusters = refined.len(), "refinement replaced stage 0");
                clusters = refined;
            }
        }

        for cluster in clusters {
            let trimmed = trim_to_capacity(
                cluster,
                &interests,
                now,
                weights,
                self.clustering.max_group_size,
            );

            if (trimmed.len() as u32) < self.clustering.min_group_size {
                continue;
            }
            let members: Vec<&Interest> = trimmed.iter().map(|&i| &interests[i]).collect();
            if compat::mean_pairwise(&members, now, weights) < self.compat_cfg.threshold_quality
            {
                continue;
            }

            match self
                .create_group(&destination, &interests, &trimmed, now)
                .await
            {
                Ok(group) => {
                    outcome.groups_created += 1;
                    self.counters.clusters_created.fetch_add(1, Ordering::Relaxed);
                    info!(
                        group_id = %group.id,
                        name = %group.name,
                        members = trimmed.len(),
                        final_price = group.final_price_per_person,
                        "group created from cluster"
                    );
                }
                Err(e) => {
                    // Abandoned; these interests stay open for the next run.
                    warn!(error = %e, "cluster persistence failed; abandoning cluster");
                }
            }
        }

        Ok(outcome)
    }

    async fn create_group(
        &self,
        destination: &Destination,
        interests: &[Interest],
        cluster: &[usize],
        now: DateTime<Utc>,
    ) -> Result<Group, CoreError> {
        let members: Vec<Interest> = cluster.iter().map(|&i| interests[i].clone()).collect();

        let empty = || CoreError::InvariantViolation("cluster with no members".to_string());
        let date_from = members.iter().map(|m| m.date_from).min().ok_or_else(empty)?;
        let date_to = members.iter().map(|m| m.date_to).max().ok_or_else(empty)?;
        let current_size: u32 = members.iter().map(|m| m.party_size).sum();

        let quote = pricing::quote(
            &self.schedule,
            destination.base_price,
            destination.max_discount,
            &members,
            None,
            now,
            "cluster",
        );

        let mut price_calc = serde_json::Value::Null;
        pricing::append_audit(&mut price_calc, quote.audit);

        let group = Group {
            id: Uuid::new_v4(),
            destination_id: destination.id,
            name: generate_group_name(&destination.name, date_from, members.len()),
            date_from,
            date_to,
            min_size: self.clustering.min_group_size,
            max_size: self.clustering.max_group_size,
            current_size,
            base_price: destination.base_price,
            final_price_per_person: quote.final_price,
            price_calc,
            status: GroupStatus::Forming,
            confirmation_deadline: None,
            auto_confirm_enabled: self.auto_confirm_enabled,
            minimum_confirmation_rate: self.minimum_confirmation_rate,
            admin_notes: format!("Formed from {} open interests", members.len()),
            created_at: now,
        };

        let member_ids: Vec<Uuid> = members.iter().map(|m| m.id).collect();
        self.store
            .create_group_with_members(&group, &member_ids)
            .await?;

        Ok(group)
    }
}

/// Stage 0: greedy rule-based clustering in insertion order. Each
/// unassigned interest seeds a cluster and admits every other unassigned
/// interest scoring at or above `threshold_admit`. Clusters of one are
/// discarded.
pub fn rule_based_clusters(
    interests: &[Interest],
    now: DateTime<Utc>,
    weights: &CompatWeights,
    threshold_admit: f64,
) -> Vec<Vec<usize>> {
    let mut clusters: Vec<Vec<usize>> = Vec::new();
    let mut used = vec![false; interests.len()];

    for seed in 0..interests.len() {
        if used[seed] {
            continue;
        }
        used[seed] = true;
        let mut cluster = vec![seed];

        for other in 0..interests.len() {
            if used[other] {
                continue;
            }
            let score = compat::score(&interests[seed], &interests[other], now, weights);
            if score >= threshold_admit {
                used[other] = true;
                cluster.push(other);
            }
        }

        if cluster.len() >= 2 {
            clusters.push(cluster);
        }
    }

    clusters
}

/// Trims a cluster until its total traveler count fits `max_travelers`,
/// dropping the member with the lowest mean compatibility to the rest each
/// round.
fn trim_to_capacity(
    mut cluster: Vec<usize>,
    interests: &[Interest],
    now: DateTime<Utc>,
    weights: &CompatWeights,
    max_travelers: u32,
) -> Vec<usize> {
    loop {
        let travelers: u32 = cluster.iter().map(|&i| interests[i].party_size).sum();
        if travelers <= max_travelers || cluster.len() <= 1 {
            return cluster;
        }

        let (weakest_pos, _) = cluster
            .iter()
            .enumerate()
            .map(|(pos, &idx)| {
                let mean: f64 = cluster
                    .iter()
                    .filter(|&&other| other != idx)
                    .map(|&other| {
                        compat::score(&interests[idx], &interests[other], now, weights)
                    })
                    .sum::<f64>()
                    / (cluster.len() - 1) as f64;
                (pos, mean)
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap();

        cluster.remove(weakest_pos);
    }
}

/// Generated display names follow the destination and month, with a size
/// descriptor; the pattern is picked deterministically per destination.
pub fn generate_group_name(
    destination_name: &str,
    date_from: DateTime<Utc>,
    member_count: usize,
) -> String {
    let month = date_from.format("%B").to_string();
    let year = date_from.year();
    let size_desc = size_descriptor(member_count);

    let patterns = [
        format!("{size_desc} {destination_name} Adventure - {month}"),
        format!("{destination_name} {size_desc} Group - {month} {year}"),
        format!("{month} {destination_name} Explorer Club"),
        format!("{destination_name} Travel Squad - {month}"),
    ];

    let mut hasher = DefaultHasher::new();
    destination_name.hash(&mut hasher);
    let index = (hasher.finish() % patterns.len() as u64) as usize;
    patterns[index].clone()
}

fn size_descriptor(member_count: usize) -> &'static str {
    if member_count >= 15 {
        "Mega"
    } else if member_count >= 10 {
        "Big"
    } else if member_count >= 7 {
        "Social"
    } else {
        "Cozy"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Contact, InterestStatus};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()
    }

    fn mk(month: u32, from_day: u32, to_day: u32, party: u32) -> Interest {
        Interest {
            id: Uuid::new_v4(),
            destination_id: Uuid::new_v4(),
            contact: Contact {
                name: "t".to_string(),
                email: "t@example.com".to_string(),
                phone: None,
            },
            party_size: party,
            date_from: Utc.with_ymd_and_hms(2025, month, from_day, 0, 0, 0).unwrap(),
            date_to: Utc.with_ymd_and_hms(2025, month, to_day, 0, 0, 0).unwrap(),
            budget_min: Some(35_000.0),
            budget_max: Some(45_000.0),
            status: InterestStatus::Open,
            group_id: None,
            created_at: now(),
        }
    }

    #[test]
    fn compatible_interests_cluster_together() {
        let interests = vec![
            mk(6, 10, 17, 2),
            mk(6, 11, 18, 2),
            mk(6, 12, 17, 2),
            mk(6, 10, 16, 2),
        ];
        let clusters =
            rule_based_clusters(&interests, now(), &CompatWeights::default(), 0.3);

        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].len(), 4);
    }

    #[test]
    fn incompatible_cohorts_split() {
        let interests = vec![
            mk(6, 10, 17, 2),
            mk(6, 11, 18, 2),
            mk(10, 5, 12, 2),
            mk(10, 6, 13, 2),
        ];
        let clusters =
            rule_based_clusters(&interests, now(), &CompatWeights::default(), 0.6);

        assert_eq!(clusters.len(), 2);
        for cluster in &clusters {
            assert_eq!(cluster.len(), 2);
        }
    }

    #[test]
    fn singletons_are_discarded() {
        let interests = vec![mk(6, 10, 17, 2), mk(10, 5, 12, 2)];
        let clusters =
            rule_based_clusters(&interests, now(), &CompatWeights::default(), 0.6);
        assert!(clusters.is_empty());
    }

    #[test]
    fn trim_removes_weakest_members_first() {
        // Three tightly matched interests plus one that barely fits.
        let mut interests = vec![
            mk(6, 10, 17, 8),
            mk(6, 10, 17, 8),
            mk(6, 11, 18, 8),
        ];
        let mut odd = mk(6, 14, 15, 8);
        odd.budget_min = Some(80_000.0);
        odd.budget_max = Some(90_000.0);
        interests.push(odd);

        let trimmed = trim_to_capacity(
            vec![0, 1, 2, 3],
            &interests,
            now(),
            &CompatWeights::default(),
            24,
        );

        assert_eq!(trimmed.len(), 3);
        assert!(!trimmed.contains(&3));
    }

    #[test]
    fn trim_keeps_clusters_already_within_capacity() {
        let interests = vec![mk(6, 10, 17, 2), mk(6, 11, 18, 2)];
        let trimmed = trim_to_capacity(
            vec![0, 1],
            &interests,
            now(),
            &CompatWeights::default(),
            20,
        );
        assert_eq!(trimmed, vec![0, 1]);
    }

    #[test]
    fn group_names_are_stable_per_destination() {
        let at = Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap();
        let a = generate_group_name("Lisbon", at, 6);
        let b = generate_group_name("Lisbon", at, 6);
        assert_eq!(a, b);
        assert!(a.contains("Lisbon"));
        assert!(a.contains("June"));
    }

    #[test]
    fn size_descriptor_bands() {
        assert_eq!(size_descriptor(4), "Cozy");
        assert_eq!(size_descriptor(7), "Social");
        assert_eq!(size_descriptor(10), "Big");
        assert_eq!(size_descriptor(16), "Mega");
    }
}
