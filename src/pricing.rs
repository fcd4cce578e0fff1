//! Tiered group pricing.
//!
//! The discount rate is a floor lookup over the tier schedule, capped by the
//! destination's discount ceiling. Every recomputation appends an audit
//! entry so historical price trails are reconstructible.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::model::Interest;

#[derive(Clone, Copy, Debug, Serialize)]
pub struct PriceTier {
    pub min_size: u32,
    pub rate: f64,
}

#[derive(Clone, Debug)]
pub struct PricingSchedule {
    /// Ascending by `min_size`; the highest tier at or below the member
    /// count wins.
    pub tiers: Vec<PriceTier>,
    pub max_discount: f64,
}

impl Default for PricingSchedule {
    fn default() -> Self {
        Self {
            tiers: vec![
                PriceTier { min_size: 4, rate: 0.05 },
                PriceTier { min_size: 7, rate: 0.10 },
                PriceTier { min_size: 10, rate: 0.15 },
                PriceTier { min_size: 13, rate: 0.20 },
                PriceTier { min_size: 16, rate: 0.25 },
            ],
            max_discount: 0.25,
        }
    }
}

impl PricingSchedule {
    /// Effective discount rate for `member_count` members, capped by the
    /// destination ceiling and the global maximum.
    pub fn rate_for(&self, member_count: u32, destination_cap: f64) -> f64 {
        let mut rate = 0.0;
        for tier in &self.tiers {
            if member_count >= tier.min_size {
                rate = tier.rate;
            }
        }
        rate.min(destination_cap).min(self.max_discount)
    }
}

/// Result of one pricing computation, carrying the audit entry to persist.
#[derive(Clone, Debug)]
pub struct Quote {
    pub final_price: f64,
    pub discount_rate: f64,
    pub audit: serde_json::Value,
}

/// Prices a group of `members` at `base_price`, recording the audit trail.
///
/// `previous_price` is the price being replaced (absent on first pricing);
/// `reason` names the trigger (cluster creation, admit, merge, finalization)
/// so the trail reads without cross-referencing logs.
pub fn quote(
    schedule: &PricingSchedule,
    base_price: f64,
    destination_cap: f64,
    members: &[Interest],
    previous_price: Option<f64>,
    computed_at: DateTime<Utc>,
    reason: &str,
) -> Quote {
    let member_count = members.len() as u32;
    let rate = schedule.rate_for(member_count, destination_cap);
    let final_price = round_cents(base_price * (1.0 - rate));

    let total_travelers: u32 = members.iter().map(|m| m.party_size).sum();
    let savings_per_person = round_cents(base_price - final_price);

    let audit = json!({
        "base_price": base_price,
        "member_count": member_count,
        "total_travelers": total_travelers,
        "discount_rate": rate,
        "final_price": final_price,
        "savings_per_person": savings_per_person,
        "computed_at": computed_at.to_rfc3339(),
        "previous_price": previous_price,
        "reason": reason,
        "budget_alignment": budget_alignment(members),
    });

    Quote {
        final_price,
        discount_rate: rate,
        audit,
    }
}

/// Appends an audit entry to an existing `price_calc` trail. The trail is a
/// JSON array; unknown prior shapes are wrapped rather than discarded.
pub fn append_audit(trail: &mut serde_json::Value, entry: serde_json::Value) {
    match trail {
        serde_json::Value::Array(entries) => entries.push(entry),
        serde_json::Value::Null => *trail = serde_json::Value::Array(vec![entry]),
        _ => {
            let prior = std::mem::take(trail);
            *trail = serde_json::Value::Array(vec![prior, entry]);
        }
    }
}

/// Budget spread summary for the audit blob: mean midpoint, spread, and an
/// alignment score that degrades as budgets diverge.
fn budget_alignment(members: &[Interest]) -> serde_json::Value {
    let mids: Vec<f64> = members
        .iter()
        .filter_map(|m| m.budget_range())
        .map(|(lo, hi)| (lo + hi) / 2.0)
        .collect();

    if mids.is_empty() {
        return json!({
            "has_budget_data": false,
            "alignment_score": 0.8,
        });
    }

    let mean = mids.iter().sum::<f64>() / mids.len() as f64;
    let spread = if mids.len() > 1 {
        let var =
            mids.iter().map(|m| (m - mean).powi(2)).sum::<f64>() / (mids.len() - 1) as f64;
        var.sqrt()
    } else {
        0.0
    };
    let alignment = if mean > 0.0 {
        (1.0 - spread / mean).max(0.0)
    } else {
        0.0
    };

    json!({
        "has_budget_data": true,
        "mean_budget": round_cents(mean),
        "budget_spread": round_cents(spread),
        "alignment_score": alignment,
    })
}

pub fn round_cents(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Contact, InterestStatus};
    use chrono::TimeZone;
    use uuid::Uuid;

    fn mk_member(party: u32, budget: Option<(f64, f64)>) -> Interest {
        Interest {
            id: Uuid::new_v4(),
            destination_id: Uuid::new_v4(),
            contact: Contact {
                name: "t".to_string(),
                email: "t@example.com".to_string(),
                phone: None,
            },
            party_size: party,
            date_from: Utc.with_ymd_and_hms(2025, 6, 10, 0, 0, 0).unwrap(),
            date_to: Utc.with_ymd_and_hms(2025, 6, 17, 0, 0, 0).unwrap(),
            budget_min: budget.map(|(lo, _)| lo),
            budget_max: budget.map(|(_, hi)| hi),
            status: InterestStatus::Open,
            group_id: None,
            created_at: Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        }
    }

    fn members(n: usize) -> Vec<Interest> {
        (0..n).map(|_| mk_member(2, Some((35_000.0, 45_000.0)))).collect()
    }

    #[test]
    fn tier_lookup_is_a_floor() {
        let s = PricingSchedule::default();
        assert_eq!(s.rate_for(3, 0.25), 0.0);
        assert_eq!(s.rate_for(4, 0.25), 0.05);
        assert_eq!(s.rate_for(6, 0.25), 0.05);
        assert_eq!(s.rate_for(7, 0.25), 0.10);
        assert_eq!(s.rate_for(10, 0.25), 0.15);
        assert_eq!(s.rate_for(13, 0.25), 0.20);
        assert_eq!(s.rate_for(16, 0.25), 0.25);
        assert_eq!(s.rate_for(40, 0.25), 0.25);
    }

    #[test]
    fn destination_cap_wins_over_tier() {
        let s = PricingSchedule::default();
        assert_eq!(s.rate_for(16, 0.10), 0.10);
        assert_eq!(s.rate_for(7, 0.0), 0.0);
    }

    #[test]
    fn six_members_at_forty_thousand_price_at_38000() {
        let s = PricingSchedule::default();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let q = quote(&s, 40_000.0, 0.25, &members(6), None, now, "cluster");
        assert_eq!(q.final_price, 38_000.0);
        assert_eq!(q.discount_rate, 0.05);
    }

    #[test]
    fn tier_jump_on_seventh_member_records_previous_price() {
        let s = PricingSchedule::default();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let q = quote(&s, 40_000.0, 0.25, &members(7), Some(38_000.0), now, "admit");
        assert_eq!(q.final_price, 36_000.0);
        assert_eq!(q.audit["previous_price"], 38_000.0);
        assert_eq!(q.audit["reason"], "admit");
        assert_eq!(q.audit["member_count"], 7);
        assert_eq!(q.audit["total_travelers"], 14);
    }

    #[test]
    fn price_never_increases_with_size() {
        let s = PricingSchedule::default();
        let now = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        let mut last = f64::INFINITY;
        for n in 1..=25 {
            let q = quote(&s, 40_000.0, 0.25, &members(n), None, now, "test");
            assert!(q.final_price <= last, "price rose at n={n}");
            assert!(q.final_price <= 40_000.0);
            last = q.final_price;
        }
    }

    #[test]
    fn audit_trail_accumulates() {
        let mut trail = serde_json::Value::Null;
        append_audit(&mut trail, json!({"final_price": 38_000.0}));
        append_audit(&mut trail, json!({"final_price": 36_000.0}));

        let entries = trail.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["final_price"], 36_000.0);
    }

    #[test]
    fn aligned_budgets_score_high() {
        let m = members(5);
        let a = budget_alignment(&m);
        assert_eq!(a["has_budget_data"], true);
        assert!(a["alignment_score"].as_f64().unwrap() > 0.9);
    }

    #[test]
    fn missing_budgets_are_neutral_in_audit() {
        let m: Vec<Interest> = (0..3).map(|_| mk_member(2, None)).collect();
        let a = budget_alignment(&m);
        assert_eq!(a["has_budget_data"], false);
        assert_eq!(a["alignment_score"], 0.8);
    }
}
