//! Confirmation workflow scenarios: the happy path, a deadline shortfall
//! with refunds, duplicate replies, and the expiry reaper.

mod common;

use chrono::Duration;
use std::sync::atomic::AtomicBool;

use common::{harness, mk_interest, now, seed};
use wanderpool::error::OpOutcome;
use wanderpool::model::{GroupStatus, InterestStatus, PaymentStatus};
use wanderpool::store::Store;
use wanderpool::workflow::{ReplyStatus, SweepAction};

/// Seeds four compatible single-traveler interests, clusters them, and
/// initiates the confirmation round. Returns the group id.
async fn pending_group_of_four(h: &common::Harness) -> uuid::Uuid {
    let dest = h.destination.id;
    let interests: Vec<_> = ["Asha", "Bruno", "Carla", "Dev"]
        .iter()
        .map(|name| mk_interest(dest, name, 10, 17, 1, Some((35_000.0, 45_000.0))))
        .collect();
    seed(&h.store, &interests).await;

    h.service.cluster_destination(dest, now()).await.unwrap_ok();
    let group_id = h
        .store
        .load_groups_by_status(GroupStatus::Forming)
        .await
        .unwrap()[0]
        .id;

    let outcome = h.service.initiate_group(group_id, now()).await.unwrap_ok();
    assert_eq!(outcome.members_notified, 4);
    group_id
}

#[tokio::test]
async fn all_members_accept_and_pay_confirms_the_group() {
    let h = harness().await;
    let group_id = pending_group_of_four(&h).await;

    let confirmations = h.store.load_confirmations(group_id).await.unwrap();
    assert_eq!(confirmations.len(), 4);
    // Deposit: 1 traveler x 38000 x 30%.
    for c in &confirmations {
        assert_eq!(c.amount_due, 11_400.0);
    }

    // Everyone accepts within the window.
    let mut intents = Vec::new();
    for (i, c) in confirmations.iter().enumerate() {
        let reply = h
            .service
            .reply_to_confirmation(
                group_id,
                &c.token,
                true,
                None,
                now() + Duration::hours(i as i64 + 1),
            )
            .await
            .unwrap_ok();
        assert_eq!(reply.status, ReplyStatus::Confirmed);
        assert!(reply.payment_required);
        assert_eq!(reply.deposit_amount, Some(11_400.0));
        intents.push(reply.client_secret.expect("client secret for deposit"));
    }

    // The fourth acceptance leaves nothing pending, so the group confirms.
    let group = h.store.load_group(group_id).await.unwrap().unwrap();
    assert_eq!(group.status, GroupStatus::Confirmed);
    assert_eq!(group.final_price_per_person, 38_000.0);
    assert_eq!(group.current_size, 4);

    // Deposits clear through the webhook; each confirmation ends up paid.
    for c in h.store.load_confirmations(group_id).await.unwrap() {
        let intent_id = c.payment_intent_id.expect("intent created on accept");
        let status = h
            .service
            .payment_webhook(&intent_id, b"{}", "sig", now() + Duration::hours(6))
            .await
            .unwrap_ok();
        assert_eq!(status, PaymentStatus::Paid);
    }

    // Members converted; one formation and one confirmation notice each.
    for member in h.store.list_members(group_id).await.unwrap() {
        assert_eq!(member.status, InterestStatus::Converted);
        let templates = h.notifier.sent_to(&member.contact.email);
        assert!(templates.contains(&"group_formation".to_string()));
        assert!(templates.contains(&"group_confirmed".to_string()));
    }
    assert_eq!(h.notifier.count_template("group_formation"), 4);
    assert_eq!(h.notifier.count_template("group_confirmed"), 4);
}

#[tokio::test]
async fn deadline_shortfall_cancels_refunds_and_releases() {
    let h = harness().await;
    let group_id = pending_group_of_four(&h).await;
    let confirmations = h.store.load_confirmations(group_id).await.unwrap();

    // Two accept and pay their deposits.
    for c in &confirmations[0..2] {
        let reply = h
            .service
            .reply_to_confirmation(group_id, &c.token, true, None, now() + Duration::days(1))
            .await
            .unwrap_ok();
        let intent = h
            .store
            .load_confirmation_by_token(&c.token)
            .await
            .unwrap()
            .unwrap()
            .payment_intent_id
            .unwrap();
        assert!(reply.payment_required);
        h.service
            .payment_webhook(&intent, b"{}", "sig", now() + Duration::days(1))
            .await
            .unwrap_ok();
    }

    // One declines with a reason.
    let declined = &confirmations[2];
    let reply = h
        .service
        .reply_to_confirmation(
            group_id,
            &declined.token,
            false,
            Some("found another trip".to_string()),
            now() + Duration::days(2),
        )
        .await
        .unwrap_ok();
    assert_eq!(reply.status, ReplyStatus::Declined);

    // The fourth stays silent past the deadline; the deadline check fires.
    let past_deadline = now() + Duration::days(7) + Duration::hours(2);
    let action = h
        .service
        .finalize_group(group_id, false, past_deadline)
        .await
        .unwrap_ok();
    assert_eq!(action, SweepAction::Cancelled);

    let group = h.store.load_group(group_id).await.unwrap().unwrap();
    assert_eq!(group.status, GroupStatus::Cancelled);

    // Both captured deposits were refunded.
    let after = h.store.load_confirmations(group_id).await.unwrap();
    let refunded = after
        .iter()
        .filter(|c| c.payment_status == PaymentStatus::Refunded)
        .count();
    assert_eq!(refunded, 2);
    assert_eq!(h.payments.refund_count(), 2);

    // Every interest is back in the open pool with no group link.
    for c in &confirmations {
        let interest = h.store.load_interest(c.interest_id).await.unwrap().unwrap();
        assert_eq!(interest.status, InterestStatus::Open);
        assert_eq!(interest.group_id, None);
    }

    // Cancellation notices went to the members still attached at the time:
    // the two paid members and the silent one.
    assert_eq!(h.notifier.count_template("group_cancelled"), 3);
}

#[tokio::test]
async fn duplicate_reply_conflicts_without_new_charge() {
    let h = harness().await;
    let group_id = pending_group_of_four(&h).await;
    let confirmations = h.store.load_confirmations(group_id).await.unwrap();
    let token = &confirmations[0].token;

    let first = h
        .service
        .reply_to_confirmation(group_id, token, true, None, now() + Duration::days(1))
        .await
        .unwrap_ok();
    assert!(first.client_secret.is_some());
    assert_eq!(h.payments.intent_count(), 1);

    let intent_id = h
        .store
        .load_confirmation_by_token(token)
        .await
        .unwrap()
        .unwrap()
        .payment_intent_id
        .unwrap();

    // Replaying the same token conflicts and references the original intent.
    let second = h
        .service
        .reply_to_confirmation(group_id, token, true, None, now() + Duration::days(1))
        .await;
    match second {
        OpOutcome::Conflict(reason) => {
            assert!(reason.contains("already responded"));
            assert!(reason.contains(&intent_id));
        }
        other => panic!("expected conflict, got {}", other.label()),
    }

    // No second charge and no duplicate notifications.
    assert_eq!(h.payments.intent_count(), 1);
    assert_eq!(h.notifier.count_template("group_formation"), 4);
}

#[tokio::test]
async fn unknown_and_expired_tokens_are_rejected() {
    let h = harness().await;
    let group_id = pending_group_of_four(&h).await;
    let confirmations = h.store.load_confirmations(group_id).await.unwrap();

    let bogus = h
        .service
        .reply_to_confirmation(group_id, "no-such-token", true, None, now())
        .await;
    assert!(matches!(bogus, OpOutcome::Invalid(_)));

    let late = h
        .service
        .reply_to_confirmation(
            group_id,
            &confirmations[0].token,
            true,
            None,
            now() + Duration::days(8),
        )
        .await;
    match late {
        OpOutcome::Invalid(reason) => assert!(reason.contains("expired")),
        other => panic!("expected invalid, got {}", other.label()),
    }
}

#[tokio::test]
async fn reaper_releases_silent_members_and_cancels() {
    let h = harness().await;
    let group_id = pending_group_of_four(&h).await;

    // Nobody replies; the reaper runs well past expiry.
    let late = now() + Duration::days(8);
    let cancelled = AtomicBool::new(false);
    h.service.run_reaper(late, &cancelled).await.unwrap();

    let group = h.store.load_group(group_id).await.unwrap().unwrap();
    assert_eq!(group.status, GroupStatus::Cancelled);

    for c in h.store.load_confirmations(group_id).await.unwrap() {
        let interest = h.store.load_interest(c.interest_id).await.unwrap().unwrap();
        assert_eq!(interest.status, InterestStatus::Open);
        assert_eq!(interest.group_id, None);
    }
}

#[tokio::test]
async fn admin_cancel_is_idempotent() {
    let h = harness().await;
    let group_id = pending_group_of_four(&h).await;

    h.service
        .cancel_group(group_id, "operator decision", now() + Duration::days(1))
        .await
        .unwrap_ok();

    let group = h.store.load_group(group_id).await.unwrap().unwrap();
    assert_eq!(group.status, GroupStatus::Cancelled);
    assert!(group.admin_notes.contains("operator decision"));

    // Cancelling again produces no further effect.
    let before = h.notifier.sent_count();
    h.service
        .cancel_group(group_id, "operator decision", now() + Duration::days(1))
        .await
        .unwrap_ok();
    assert_eq!(h.notifier.sent_count(), before);
}

#[tokio::test]
async fn failed_deposit_capture_keeps_member_confirmed() {
    let h = harness().await;
    let group_id = pending_group_of_four(&h).await;
    let confirmations = h.store.load_confirmations(group_id).await.unwrap();

    let reply = h
        .service
        .reply_to_confirmation(
            group_id,
            &confirmations[0].token,
            true,
            None,
            now() + Duration::days(1),
        )
        .await
        .unwrap_ok();
    assert!(reply.payment_required);

    let intent_id = h
        .store
        .load_confirmation_by_token(&confirmations[0].token)
        .await
        .unwrap()
        .unwrap()
        .payment_intent_id
        .unwrap();

    h.payments.set_fail_capture(true);
    let status = h
        .service
        .payment_webhook(&intent_id, b"{}", "sig", now() + Duration::days(1))
        .await
        .unwrap_ok();
    assert_eq!(status, PaymentStatus::Failed);

    // Still confirmed, and a retry notice went out.
    let c = h
        .store
        .load_confirmation_by_token(&confirmations[0].token)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(c.confirmed, Some(true));
    assert_eq!(c.payment_status, PaymentStatus::Failed);
    assert_eq!(h.notifier.count_template("deposit_retry"), 1);

    let interest = h.store.load_interest(c.interest_id).await.unwrap().unwrap();
    assert_eq!(interest.status, InterestStatus::Confirmed);
}
