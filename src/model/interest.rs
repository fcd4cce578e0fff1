use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How to reach the traveler behind an interest. Passed through to the
/// Notifier port; the core never interprets it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// Lifecycle of an interest.
///
/// `Declined` and `Expired` are recognized persisted states (admin tooling
/// may park an interest there); the engine itself releases members straight
/// back to `Open` so they re-enter clustering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InterestStatus {
    Open,
    Matched,
    Confirmed,
    Declined,
    Expired,
    Converted,
}

impl InterestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterestStatus::Open => "open",
            InterestStatus::Matched => "matched",
            InterestStatus::Confirmed => "confirmed",
            InterestStatus::Declined => "declined",
            InterestStatus::Expired => "expired",
            InterestStatus::Converted => "converted",
        }
    }

    pub fn parse(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "open" => InterestStatus::Open,
            "matched" => InterestStatus::Matched,
            "confirmed" => InterestStatus::Confirmed,
            "declined" => InterestStatus::Declined,
            "expired" => InterestStatus::Expired,
            "converted" => InterestStatus::Converted,
            other => anyhow::bail!("unknown interest status: {other}"),
        })
    }

    /// States that require a group association.
    pub fn requires_group(&self) -> bool {
        matches!(
            self,
            InterestStatus::Matched | InterestStatus::Confirmed | InterestStatus::Converted
        )
    }
}

/// A prospective traveler's expressed demand: destination, date window,
/// party size, and an optional budget range.
#[derive(Clone, Debug)]
pub struct Interest {
    pub id: Uuid,
    pub destination_id: Uuid,
    pub contact: Contact,

    /// Travelers covered by this interest; at least 1.
    pub party_size: u32,

    /// Desired travel window, `date_from <= date_to`.
    pub date_from: DateTime<Utc>,
    pub date_to: DateTime<Utc>,

    /// Optional per-person budget range, `budget_min <= budget_max`.
    pub budget_min: Option<f64>,
    pub budget_max: Option<f64>,

    pub status: InterestStatus,

    /// Owning group while matched/confirmed/converted; broken on release.
    pub group_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

impl Interest {
    /// Trip length in days, endpoints inclusive.
    pub fn duration_days(&self) -> i64 {
        (self.date_to - self.date_from).num_days() + 1
    }

    /// Days from `now` until departure. Negative once the window started.
    pub fn lead_time_days(&self, now: DateTime<Utc>) -> i64 {
        (self.date_from - now).num_days()
    }

    /// Budget range when the interest carries one. An interest with only a
    /// ceiling is treated as 0..=max, mirroring how interests are captured.
    pub fn budget_range(&self) -> Option<(f64, f64)> {
        self.budget_max.map(|max| (self.budget_min.unwrap_or(0.0), max))
    }

    /// The ownership invariant: a group link exists exactly for the states
    /// that need one.
    pub fn group_link_consistent(&self) -> bool {
        self.group_id.is_some() == self.status.requires_group()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn mk_interest(from_day: u32, to_day: u32) -> Interest {
        Interest {
            id: Uuid::new_v4(),
            destination_id: Uuid::new_v4(),
            contact: Contact {
                name: "Asha".to_string(),
                email: "asha@example.com".to_string(),
                phone: None,
            },
            party_size: 2,
            date_from: Utc.with_ymd_and_hms(2025, 6, from_day, 0, 0, 0).unwrap(),
            date_to: Utc.with_ymd_and_hms(2025, 6, to_day, 0, 0, 0).unwrap(),
            budget_min: Some(30_000.0),
            budget_max: Some(45_000.0),
            status: InterestStatus::Open,
            group_id: None,
            created_at: Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn duration_is_inclusive_of_both_endpoints() {
        assert_eq!(mk_interest(10, 14).duration_days(), 5);
        assert_eq!(mk_interest(10, 10).duration_days(), 1);
    }

    #[test]
    fn lead_time_counts_days_until_departure() {
        let i = mk_interest(10, 14);
        let now = Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap();
        assert_eq!(i.lead_time_days(now), 7);
    }

    #[test]
    fn budget_range_defaults_missing_floor_to_zero() {
        let mut i = mk_interest(10, 14);
        i.budget_min = None;
        assert_eq!(i.budget_range(), Some((0.0, 45_000.0)));

        i.budget_max = None;
        assert_eq!(i.budget_range(), None);
    }

    #[test]
    fn group_link_invariant_tracks_status() {
        let mut i = mk_interest(10, 14);
        assert!(i.group_link_consistent());

        i.status = InterestStatus::Matched;
        assert!(!i.group_link_consistent());

        i.group_id = Some(Uuid::new_v4());
        assert!(i.group_link_consistent());

        i.status = InterestStatus::Open;
        assert!(!i.group_link_consistent());
    }

    #[test]
    fn status_round_trips_through_strings() {
        for s in [
            InterestStatus::Open,
            InterestStatus::Matched,
            InterestStatus::Confirmed,
            InterestStatus::Declined,
            InterestStatus::Expired,
            InterestStatus::Converted,
        ] {
            assert_eq!(InterestStatus::parse(s.as_str()).unwrap(), s);
        }
        assert!(InterestStatus::parse("bogus").is_err());
    }
}
