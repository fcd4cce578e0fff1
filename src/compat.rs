//! Pairwise compatibility scoring between interests.
//!
//! Pure logic: both the score and its factors take an explicit `now` and
//! never touch I/O, so callers (clusterer, optimizer, tests) stay
//! deterministic.

use chrono::{DateTime, Utc};

use crate::error::CoreError;
use crate::model::Interest;

/// Score at or above which two interests are considered highly compatible.
pub const THRESHOLD_HIGH: f64 = 0.8;

/// Score at or above which grouping is worth considering.
pub const THRESHOLD_MEDIUM: f64 = 0.6;

/// Factor weights for the overall score. Must sum to 1.0.
#[derive(Clone, Copy, Debug)]
pub struct CompatWeights {
    pub date_overlap: f64,
    pub party_size: f64,
    pub budget: f64,
    pub lead_time: f64,
}

impl Default for CompatWeights {
    fn default() -> Self {
        Self {
            date_overlap: 0.40,
            party_size: 0.25,
            budget: 0.20,
            lead_time: 0.15,
        }
    }
}

impl CompatWeights {
    pub fn validate(&self) -> Result<(), CoreError> {
        let sum = self.date_overlap + self.party_size + self.budget + self.lead_time;
        if (sum - 1.0).abs() > 1e-9 {
            return Err(CoreError::InvariantViolation(format!(
                "compatibility weights must sum to 1.0, got {sum}"
            )));
        }
        Ok(())
    }
}

/// Overall compatibility of two interests, in [0, 1].
pub fn score(a: &Interest, b: &Interest, now: DateTime<Utc>, w: &CompatWeights) -> f64 {
    let total = w.date_overlap * date_overlap_factor(a, b)
        + w.party_size * party_size_factor(a, b)
        + w.budget * budget_factor(a, b)
        + w.lead_time * lead_time_factor(a, b, now);

    total.clamp(0.0, 1.0)
}

/// Overlap days over the longer of the two trips; 0 when the windows are
/// disjoint.
pub fn date_overlap_factor(a: &Interest, b: &Interest) -> f64 {
    let overlap_start = a.date_from.max(b.date_from);
    let overlap_end = a.date_to.min(b.date_to);

    if overlap_start > overlap_end {
        return 0.0;
    }

    let overlap_days = (overlap_end - overlap_start).num_days() + 1;
    let longest = a.duration_days().max(b.duration_days()).max(1);

    (overlap_days as f64 / longest as f64).clamp(0.0, 1.0)
}

/// Piecewise min/max party-size ratio: similar parties travel well together,
/// wildly different ones rarely do.
pub fn party_size_factor(a: &Interest, b: &Interest) -> f64 {
    if a.party_size == b.party_size {
        return 1.0;
    }

    let ratio =
        a.party_size.min(b.party_size) as f64 / a.party_size.max(b.party_size).max(1) as f64;

    if ratio >= 0.7 {
        1.0
    } else if ratio >= 0.5 {
        0.7
    } else {
        0.3
    }
}

/// Budget-range overlap over the wider range. Unknown budgets score a
/// neutral 0.8; disjoint ranges score 0.
pub fn budget_factor(a: &Interest, b: &Interest) -> f64 {
    let (Some((a_min, a_max)), Some((b_min, b_max))) = (a.budget_range(), b.budget_range()) else {
        return 0.8;
    };

    let overlap_min = a_min.max(b_min);
    let overlap_max = a_max.min(b_max);
    if overlap_min > overlap_max {
        return 0.0;
    }

    let range_a = a_max - a_min;
    let range_b = b_max - b_min;
    let widest = range_a.max(range_b);
    if widest <= 0.0 {
        // Two identical fixed budgets.
        return 1.0;
    }

    ((overlap_max - overlap_min) / widest).clamp(0.0, 1.0)
}

/// Similarity of planning horizons, banded by the difference in days until
/// departure.
pub fn lead_time_factor(a: &Interest, b: &Interest, now: DateTime<Utc>) -> f64 {
    let diff = (a.lead_time_days(now) - b.lead_time_days(now)).abs();

    if diff <= 7 {
        1.0
    } else if diff <= 14 {
        0.8
    } else if diff <= 30 {
        0.6
    } else {
        0.3
    }
}

/// Average pairwise compatibility within a cluster; the cluster-quality
/// metric used by the post-filter and the refinement gate.
pub fn mean_pairwise(members: &[&Interest], now: DateTime<Utc>, w: &CompatWeights) -> f64 {
    if members.len() < 2 {
        return 0.0;
    }

    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            total += score(members[i], members[j], now, w);
            pairs += 1;
        }
    }

    total / pairs as f64
}

/// Mean compatibility of a candidate against every current member; the
/// optimizer's admit criterion.
pub fn mean_to_members(
    candidate: &Interest,
    members: &[Interest],
    now: DateTime<Utc>,
    w: &CompatWeights,
) -> f64 {
    if members.is_empty() {
        return 0.0;
    }

    members
        .iter()
        .map(|m| score(candidate, m, now, w))
        .sum::<f64>()
        / members.len() as f64
}
