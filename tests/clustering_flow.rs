//! Clustering and optimization scenarios: a happy cluster, a tier jump on
//! admit, and a merge of two small forming groups.

mod common;

use chrono::Duration;
use uuid::Uuid;

use common::{day, harness, mk_interest, now, seed};
use wanderpool::model::{Group, GroupStatus, InterestStatus};
use wanderpool::store::Store;

/// Six overlapping interests become one forming group priced one tier in.
#[tokio::test]
async fn happy_cluster_forms_one_priced_group() {
    let h = harness().await;
    let dest = h.destination.id;

    let interests: Vec<_> = ["Asha", "Bruno", "Carla", "Dev", "Edda", "Farid"]
        .iter()
        .enumerate()
        .map(|(i, name)| {
            // Date ranges overlap well over 80% and leads differ by < 5 days.
            mk_interest(
                dest,
                name,
                10 + (i as u32 % 2),
                17 + (i as u32 % 2),
                2,
                Some((35_000.0, 45_000.0)),
            )
        })
        .collect();
    seed(&h.store, &interests).await;

    let outcome = h
        .service
        .cluster_destination(dest, now())
        .await
        .unwrap_ok();

    assert_eq!(outcome.interests_considered, 6);
    assert_eq!(outcome.groups_created, 1);

    let groups = h
        .store
        .load_groups_by_status(GroupStatus::Forming)
        .await
        .unwrap();
    assert_eq!(groups.len(), 1);
    let group = &groups[0];

    // Tier for 6 members is 5%: 40000 * 0.95.
    assert_eq!(group.final_price_per_person, 38_000.0);
    assert_eq!(group.current_size, 12); // six parties of two travelers
    assert_eq!(group.date_from, day(10));
    assert_eq!(group.date_to, day(18));

    let members = h.store.list_members(group.id).await.unwrap();
    assert_eq!(members.len(), 6);
    for member in members {
        assert_eq!(member.status, InterestStatus::Matched);
        assert_eq!(member.group_id, Some(group.id));
    }
}

/// Admitting a seventh member jumps the discount tier and records the old
/// price in the audit trail.
#[tokio::test]
async fn admit_jumps_tier_and_audits_previous_price() {
    let h = harness().await;
    let dest = h.destination.id;

    let six: Vec<_> = (0..6)
        .map(|i| {
            mk_interest(
                dest,
                &format!("member{i}"),
                10,
                17,
                2,
                Some((35_000.0, 45_000.0)),
            )
        })
        .collect();
    seed(&h.store, &six).await;
    h.service.cluster_destination(dest, now()).await.unwrap_ok();

    let group_id = h
        .store
        .load_groups_by_status(GroupStatus::Forming)
        .await
        .unwrap()[0]
        .id;

    // A highly compatible latecomer shows up.
    let late = mk_interest(dest, "Gita", 11, 17, 2, Some((36_000.0, 44_000.0)));
    seed(&h.store, std::slice::from_ref(&late)).await;

    let admitted = h
        .service
        .optimize_group(group_id, now() + Duration::hours(1))
        .await
        .unwrap_ok();
    assert_eq!(admitted, 1);

    let group = h.store.load_group(group_id).await.unwrap().unwrap();
    assert_eq!(group.final_price_per_person, 36_000.0); // 10% tier at 7 members
    assert_eq!(group.current_size, 14);

    let trail = group.price_calc.as_array().unwrap();
    let last = trail.last().unwrap();
    assert_eq!(last["reason"], "admit");
    assert_eq!(last["previous_price"], 38_000.0);
    assert_eq!(last["member_count"], 7);

    let late_after = h.store.load_interest(late.id).await.unwrap().unwrap();
    assert_eq!(late_after.status, InterestStatus::Matched);
    assert_eq!(late_after.group_id, Some(group_id));
}

/// Two small compatible groups merge; the survivor re-prices at the larger
/// tier and nobody is orphaned.
#[tokio::test]
async fn small_groups_merge_without_orphans() {
    let h = harness().await;
    let dest = h.destination.id;

    let mk_group = |name: &str, from: u32, to: u32, created_minute: u32| Group {
        id: Uuid::new_v4(),
        destination_id: dest,
        name: name.to_string(),
        date_from: day(from),
        date_to: day(to),
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
        created_at: now() + Duration::minutes(created_minute as i64),
    };

    // Group A: three members starting June 10.
    let mut group_a = mk_group("A", 10, 17, 0);
    let a_members: Vec<_> = (0..3)
        .map(|i| mk_interest(dest, &format!("a{i}"), 10, 17, 1, Some((35_000.0, 45_000.0))))
        .collect();
    seed(&h.store, &a_members).await;
    group_a.current_size = 3;
    h.store
        .create_group_with_members(&group_a, &a_members.iter().map(|m| m.id).collect::<Vec<_>>())
        .await
        .unwrap();

    // Group B: four members starting June 13, three days later.
    let mut group_b = mk_group("B", 13, 20, 1);
    let b_members: Vec<_> = (0..4)
        .map(|i| mk_interest(dest, &format!("b{i}"), 13, 20, 1, Some((35_000.0, 45_000.0))))
        .collect();
    seed(&h.store, &b_members).await;
    group_b.current_size = 4;
    h.store
        .create_group_with_members(&group_b, &b_members.iter().map(|m| m.id).collect::<Vec<_>>())
        .await
        .unwrap();

    let cancelled = std::sync::atomic::AtomicBool::new(false);
    h.service.run_optimizer(now(), &cancelled).await.unwrap();

    // The larger membership survives.
    let survivor = h.store.load_group(group_b.id).await.unwrap().unwrap();
    let merged = h.store.load_group(group_a.id).await.unwrap().unwrap();

    assert_eq!(survivor.status, GroupStatus::Forming);
    assert_eq!(merged.status, GroupStatus::Merged);
    assert!(merged.admin_notes.contains(&survivor.id.to_string()));

    let survivor_members = h.store.list_members(survivor.id).await.unwrap();
    assert_eq!(survivor_members.len(), 7);
    assert_eq!(survivor.current_size, 7);
    assert_eq!(survivor.final_price_per_person, 36_000.0); // 10% tier at 7

    // Envelope widened over both groups.
    assert_eq!(survivor.date_from, day(10));
    assert_eq!(survivor.date_to, day(20));

    // No interest points at the merged-away group.
    let orphans = h.store.list_members(merged.id).await.unwrap();
    assert!(orphans.is_empty());
}

/// Cluster ownership invariant: after clustering and optimization, every
/// matched interest points at an existing non-cancelled group.
#[tokio::test]
async fn matched_interests_always_have_live_groups() {
    let h = harness().await;
    let dest = h.destination.id;

    let interests: Vec<_> = (0..8)
        .map(|i| {
            mk_interest(
                dest,
                &format!("m{i}"),
                10 + (i as u32 % 3),
                17 + (i as u32 % 3),
                2,
                Some((35_000.0, 45_000.0)),
            )
        })
        .collect();
    seed(&h.store, &interests).await;

    h.service.cluster_destination(dest, now()).await.unwrap_ok();
    let cancelled = std::sync::atomic::AtomicBool::new(false);
    h.service.run_optimizer(now(), &cancelled).await.unwrap();

    for interest in &interests {
        let after = h.store.load_interest(interest.id).await.unwrap().unwrap();
        match after.status {
            InterestStatus::Matched | InterestStatus::Confirmed | InterestStatus::Converted => {
                let group_id = after.group_id.expect("matched interest must own a group link");
                let group = h
                    .store
                    .load_group(group_id)
                    .await
                    .unwrap()
                    .expect("linked group must exist");
                assert_ne!(group.status, GroupStatus::Cancelled);
                assert_ne!(group.status, GroupStatus::Merged);
            }
            _ => assert!(after.group_id.is_none()),
        }
    }
}
