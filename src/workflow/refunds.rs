//! Bounded refund retry.
//!
//! A refund is attempted when a group with captured deposits is cancelled.
//! Failures back off exponentially; after the attempt budget is spent the
//! confirmation is surfaced for manual intervention and left alone.

use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::Ordering;
use tracing::{error, info, warn};

use crate::metrics::Counters;
use crate::model::{MemberConfirmation, PaymentStatus};
use crate::ports::{PaymentResult, Payments};
use crate::store::Store;

#[derive(Clone, Copy, Debug)]
pub struct RefundPolicy {
    pub max_attempts: u32,
    pub backoff_base_secs: i64,
}

/// Backoff before attempt `attempts + 1`: base * 2^attempts.
pub fn backoff_after(policy: &RefundPolicy, attempts: u32) -> Duration {
    let exp = attempts.min(16);
    Duration::seconds(policy.backoff_base_secs.saturating_mul(1i64 << exp))
}

/// Attempts one refund for a paid confirmation, persisting the outcome.
/// Returns true when the refund went through.
pub async fn attempt_refund<P: Payments>(
    payments: &P,
    store: &dyn Store,
    confirmation: &mut MemberConfirmation,
    policy: &RefundPolicy,
    now: DateTime<Utc>,
    reason: &str,
    counters: &Counters,
) -> anyhow::Result<bool> {
    if confirmation.payment_status != PaymentStatus::Paid {
        return Ok(false);
    }

    let Some(tx_id) = confirmation.payment_tx_id.clone() else {
        // Paid without a transaction id is corrupt state; no automatic
        // repair, surface immediately.
        error!(
            confirmation_id = %confirmation.id,
            "paid confirmation has no transaction id; manual intervention required"
        );
        confirmation.refund_attempts = policy.max_attempts;
        confirmation.refund_next_at = None;
        store.update_confirmation(confirmation).await?;
        counters.refunds_exhausted.fetch_add(1, Ordering::Relaxed);
        return Ok(false);
    };

    let outcome = payments
        .refund(&tx_id, confirmation.amount_due, reason)
        .await;

    match outcome {
        Ok(PaymentResult::Succeeded { tx_id: refund_id }) => {
            confirmation.payment_status = PaymentStatus::Refunded;
            confirmation.refund_next_at = None;
            store.update_confirmation(confirmation).await?;
            counters.refunds_issued.fetch_add(1, Ordering::Relaxed);
            info!(
                confirmation_id = %confirmation.id,
                refund_id = %refund_id,
                "deposit refunded"
            );
            Ok(true)
        }
        Ok(PaymentResult::Failed { reason: fail_reason }) => {
            record_failure(store, confirmation, policy, now, &fail_reason, counters).await?;
            Ok(false)
        }
        Err(e) => {
            record_failure(store, confirmation, policy, now, &e.to_string(), counters).await?;
            Ok(false)
        }
    }
}

async fn record_failure(
    store: &dyn Store,
    confirmation: &mut MemberConfirmation,
    policy: &RefundPolicy,
    now: DateTime<Utc>,
    reason: &str,
    counters: &Counters,
) -> anyhow::Result<()> {
    confirmation.refund_attempts += 1;

    if confirmation.refund_attempts >= policy.max_attempts {
        confirmation.refund_next_at = None;
        store.update_confirmation(confirmation).await?;
        counters.refunds_exhausted.fetch_add(1, Ordering::Relaxed);
        error!(
            confirmation_id = %confirmation.id,
            attempts = confirmation.refund_attempts,
            reason = %reason,
            "refund retries exhausted; manual intervention required"
        );
    } else {
        let delay = backoff_after(policy, confirmation.refund_attempts);
        confirmation.refund_next_at = Some(now + delay);
        store.update_confirmation(confirmation).await?;
        warn!(
            confirmation_id = %confirmation.id,
            attempts = confirmation.refund_attempts,
            retry_in_secs = delay.num_seconds(),
            reason = %reason,
            "refund failed; will retry"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Contact, Group, GroupStatus, Interest, InterestStatus};
    use crate::ports::MockPayments;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn policy() -> RefundPolicy {
        RefundPolicy {
            max_attempts: 5,
            backoff_base_secs: 60,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    async fn seed_paid_confirmation(store: &MemoryStore) -> MemberConfirmation {
        let dest = Uuid::new_v4();
        let interest = Interest {
            id: Uuid::new_v4(),
            destination_id: dest,
            contact: Contact {
                name: "t".to_string(),
                email: "t@example.com".to_string(),
                phone: None,
            },
            party_size: 2,
            date_from: now(),
            date_to: now(),
            budget_min: None,
            budget_max: None,
            status: InterestStatus::Open,
            group_id: None,
            created_at: now(),
        };
        store.insert_interest(&interest).await.unwrap();

        let mut group = Group {
            id: Uuid::new_v4(),
            destination_id: dest,
            name: "g".to_string(),
            date_from: now(),
            date_to: now(),
            min_size: 4,
            max_size: 20,
            current_size: 2,
            base_price: 100.0,
            final_price_per_person: 100.0,
            price_calc: serde_json::Value::Null,
            status: GroupStatus::Forming,
            confirmation_deadline: None,
            auto_confirm_enabled: true,
            minimum_confirmation_rate: 0.75,
            admin_notes: String::new(),
            created_at: now(),
        };
        store
            .create_group_with_members(&group, &[interest.id])
            .await
            .unwrap();

        let confirmation = MemberConfirmation {
            id: Uuid::new_v4(),
            group_id: group.id,
            interest_id: interest.id,
            token: "tok".to_string(),
            confirmed: Some(true),
            confirmed_at: Some(now()),
            expires_at: now(),
            payment_status: PaymentStatus::Paid,
            payment_intent_id: Some("pi_1".to_string()),
            payment_tx_id: Some("txn_1".to_string()),
            amount_due: 60.0,
            decline_reason: None,
            refund_attempts: 0,
            refund_next_at: None,
            created_at: now(),
        };
        group.status = GroupStatus::PendingConfirmation;
        store
            .begin_confirmation_round(&group, &[confirmation.clone()])
            .await
            .unwrap();
        confirmation
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let p = policy();
        assert_eq!(backoff_after(&p, 1).num_seconds(), 120);
        assert_eq!(backoff_after(&p, 2).num_seconds(), 240);
        assert_eq!(backoff_after(&p, 3).num_seconds(), 480);
    }

    #[tokio::test]
    async fn successful_refund_marks_refunded() {
        let store = MemoryStore::new();
        let payments = MockPayments::new();
        let counters = Counters::default();
        let mut c = seed_paid_confirmation(&store).await;

        let ok = attempt_refund(&payments, &store, &mut c, &policy(), now(), "cancelled", &counters)
            .await
            .unwrap();

        assert!(ok);
        assert_eq!(c.payment_status, PaymentStatus::Refunded);
        let persisted = store
            .load_confirmation_by_token("tok")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(persisted.payment_status, PaymentStatus::Refunded);
    }

    #[tokio::test]
    async fn failed_refund_schedules_backoff() {
        let store = MemoryStore::new();
        let payments = MockPayments::new();
        payments.fail_next_refunds(1);
        let counters = Counters::default();
        let mut c = seed_paid_confirmation(&store).await;

        let ok = attempt_refund(&payments, &store, &mut c, &policy(), now(), "cancelled", &counters)
            .await
            .unwrap();

        assert!(!ok);
        assert_eq!(c.payment_status, PaymentStatus::Paid);
        assert_eq!(c.refund_attempts, 1);
        assert_eq!(c.refund_next_at, Some(now() + Duration::seconds(120)));
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn attempts_exhaust_and_surface() {
        let store = MemoryStore::new();
        let payments = MockPayments::new();
        payments.fail_next_refunds(10);
        let counters = Counters::default();
        let mut c = seed_paid_confirmation(&store).await;

        for _ in 0..5 {
            attempt_refund(&payments, &store, &mut c, &policy(), now(), "cancelled", &counters)
                .await
                .unwrap();
        }

        assert_eq!(c.refund_attempts, 5);
        assert_eq!(c.refund_next_at, None);
        assert_eq!(
            counters.refunds_exhausted.load(Ordering::Relaxed),
            1
        );
        assert!(logs_contain("manual intervention required"));
    }
}
