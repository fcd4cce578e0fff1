//! Per-group confirmation workflow.
//!
//! State machine:
//!
//! ```text
//! forming ──initiate──▶ pending_confirmation
//! pending_confirmation ──threshold met before deadline──▶ confirmed
//! pending_confirmation ──deadline && min met──▶ confirmed
//! pending_confirmation ──deadline && min not met──▶ cancelled
//! forming ──admit to capacity──▶ full
//! any non-terminal ──admin cancel──▶ cancelled
//! forming ──optimizer merge──▶ merged
//! ```
//!
//! Invariants enforced here:
//! - Transitions are idempotent: repeated triggers produce no further effect.
//! - Every transition persists through one atomic store operation; external
//!   side effects (notifications, payments) happen outside it and never
//!   abort it.
//! - All transitions for a group are serialized by the group lock, so a
//!   member reply observed before a sweep is always reflected in it.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::error::CoreError;
use crate::metrics::Counters;
use crate::model::{
    Group, GroupStatus, Interest, InterestStatus, MemberConfirmation, PaymentStatus,
};
use crate::notify::Template;
use crate::notify::templates::{
    ConfirmationReminderData, DepositRetryData, GroupCancelledData, GroupConfirmedData,
    GroupFormationData,
};
use crate::ports::{NotificationKey, Notifier, PaymentResult, Payments};
use crate::pricing::{self, PricingSchedule, round_cents};
use crate::scheduler::locks::{LockRegistry, group_key};
use crate::store::{InterestUpdate, Store};
use crate::workflow::refunds::{self, RefundPolicy};
use crate::workflow::token;

#[derive(Debug)]
pub struct InitiateOutcome {
    pub group_id: Uuid,
    pub deadline: DateTime<Utc>,
    pub members_notified: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReplyStatus {
    Confirmed,
    Declined,
}

#[derive(Debug)]
pub struct ReplyOutcome {
    pub status: ReplyStatus,
    pub payment_required: bool,
    pub client_secret: Option<String>,
    pub deposit_amount: Option<f64>,
}

/// What a sweep did to a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepAction {
    None,
    Confirmed,
    Cancelled,
}

pub struct WorkflowEngine<P: Payments, N: Notifier> {
    store: Arc<dyn Store>,
    payments: Arc<P>,
    notifier: Arc<N>,
    locks: LockRegistry,
    cfg: WorkflowConfig,
    schedule: PricingSchedule,
    counters: Counters,
}

impl<P: Payments, N: Notifier> WorkflowEngine<P, N> {
    pub fn new(
        store: Arc<dyn Store>,
        payments: Arc<P>,
        notifier: Arc<N>,
        locks: LockRegistry,
        cfg: WorkflowConfig,
        schedule: PricingSchedule,
        counters: Counters,
    ) -> Self {
        Self {
            store,
            payments,
            notifier,
            locks,
            cfg,
            schedule,
            counters,
        }
    }

    pub fn refund_policy(&self) -> RefundPolicy {
        RefundPolicy {
            max_attempts: self.cfg.refund_max_attempts,
            backoff_base_secs: self.cfg.refund_backoff_base_secs,
        }
    }

    /// Starts the confirmation round for a forming (or full) group: one
    /// confirmation record and one notification per member, deadline set,
    /// group moved to pending confirmation.
    #[instrument(skip(self), target = "workflow", fields(group_id = %group_id))]
    pub async fn initiate(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<InitiateOutcome, CoreError> {
        let _guard = self.locks.acquire(group_key(group_id)).await;

        let group = self.load_group(group_id).await?;

        // Repeated initiation is a no-op against the existing deadline.
        if group.status == GroupStatus::PendingConfirmation {
            let deadline = group.confirmation_deadline.ok_or_else(|| {
                CoreError::InvariantViolation(format!(
                    "group {group_id} pending without a deadline"
                ))
            })?;
            return Ok(InitiateOutcome {
                group_id,
                deadline,
                members_notified: 0,
            });
        }

        if !group.status.can_initiate() {
            return Err(CoreError::InvalidTransition(format!(
                "cannot initiate confirmation from {}",
                group.status.as_str()
            )));
        }

        let members = self.store.list_members(group_id).await?;
        if members.is_empty() {
            return Err(CoreError::InvalidTransition(
                "group has no members".to_string(),
            ));
        }

        let deadline = now + Duration::days(self.cfg.confirmation_window_days);

        let confirmations: Vec<MemberConfirmation> = members
            .iter()
            .map(|m| MemberConfirmation {
                id: Uuid::new_v4(),
                group_id,
                interest_id: m.id,
                token: token::generate(),
                confirmed: None,
                confirmed_at: None,
                expires_at: deadline,
                payment_status: PaymentStatus::None,
                payment_intent_id: None,
                payment_tx_id: None,
                amount_due: round_cents(
                    m.party_size as f64
                        * group.final_price_per_person
                        * self.cfg.deposit_fraction,
                ),
                decline_reason: None,
                refund_attempts: 0,
                refund_next_at: None,
                created_at: now,
            })
            .collect();

        let mut updated = group.clone();
        updated.status = GroupStatus::PendingConfirmation;
        updated.confirmation_deadline = Some(deadline);

        self.store
            .begin_confirmation_round(&updated, &confirmations)
            .await?;

        let destination_name = self.destination_name(updated.destination_id).await;
        let notices = members.iter().zip(&confirmations).map(|(member, confirmation)| {
            let template = Template::GroupFormation(GroupFormationData {
                user_name: member.contact.name.clone(),
                group_name: updated.name.clone(),
                destination_name: destination_name.clone(),
                date_from: fmt_date(updated.date_from),
                date_to: fmt_date(updated.date_to),
                group_size: updated.current_size,
                member_cost: round_cents(
                    member.party_size as f64 * updated.final_price_per_person,
                ),
                savings_amount: round_cents(
                    member.party_size as f64 * updated.savings_per_person(),
                ),
                confirmation_deadline: fmt_date(deadline),
                confirmation_path: format!(
                    "/groups/{group_id}/confirm/{}",
                    confirmation.token
                ),
            });
            self.notify_member(&updated, member, template, "initiation")
        });
        futures::future::join_all(notices).await;

        info!(
            members = members.len(),
            deadline = %deadline,
            "confirmation round started"
        );

        Ok(InitiateOutcome {
            group_id,
            deadline,
            members_notified: members.len(),
        })
    }

    /// Authoritative member reply, looked up by token.
    #[instrument(skip(self, token_value, decline_reason), target = "workflow", fields(group_id = %group_id))]
    pub async fn reply(
        &self,
        group_id: Uuid,
        token_value: &str,
        accept: bool,
        decline_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ReplyOutcome, CoreError> {
        let _guard = self.locks.acquire(group_key(group_id)).await;

        let mut confirmation = self
            .store
            .load_confirmation_by_token(token_value)
            .await?
            .filter(|c| c.group_id == group_id)
            .ok_or(CoreError::UnknownToken)?;

        if confirmation.confirmed.is_some() {
            return Err(CoreError::AlreadyResponded {
                payment_intent_id: confirmation.payment_intent_id,
            });
        }
        if now > confirmation.expires_at {
            return Err(CoreError::ConfirmationExpired);
        }

        let group = self.load_group(group_id).await?;
        if group.status != GroupStatus::PendingConfirmation {
            return Err(CoreError::InvalidTransition(format!(
                "group is {} and no longer accepts replies",
                group.status.as_str()
            )));
        }

        let member = self
            .store
            .load_interest(confirmation.interest_id)
            .await?
            .ok_or_else(|| {
                CoreError::InvariantViolation(format!(
                    "confirmation {} references a missing interest",
                    confirmation.id
                ))
            })?;

        let outcome = if accept {
            confirmation.confirmed = Some(true);
            confirmation.confirmed_at = Some(now);

            let mut payment_required = false;
            let mut client_secret = None;

            if confirmation.amount_due > 0.0 {
                payment_required = true;
                let metadata = json!({
                    "group_id": group_id,
                    "interest_id": confirmation.interest_id,
                    "confirmation_id": confirmation.id,
                });
                let key = format!("{}:1", confirmation.id);

                match self
                    .payments
                    .create_intent(confirmation.amount_due, "USD", &key, &metadata)
                    .await
                {
                    Ok(intent) => {
                        confirmation.payment_status = PaymentStatus::Pending;
                        confirmation.payment_intent_id = Some(intent.id);
                        client_secret = Some(intent.client_secret);
                    }
                    Err(e) => {
                        // The member stays confirmed; they get a retry link.
                        confirmation.payment_status = PaymentStatus::Failed;
                        warn!(
                            confirmation_id = %confirmation.id,
                            error = %e,
                            "payment intent creation failed"
                        );
                    }
                }
            }

            let updates = [InterestUpdate {
                interest_id: confirmation.interest_id,
                status: InterestStatus::Confirmed,
                group_id: Some(group_id),
            }];
            self.store
                .apply_group_transition(&group, &updates, std::slice::from_ref(&confirmation))
                .await?;

            if confirmation.payment_status == PaymentStatus::Failed {
                self.send_deposit_retry(&group, &member, &confirmation).await;
            }

            self.counters.replies_accepted.fetch_add(1, Ordering::Relaxed);

            ReplyOutcome {
                status: ReplyStatus::Confirmed,
                payment_required,
                client_secret,
                deposit_amount: payment_required.then_some(confirmation.amount_due),
            }
        } else {
            confirmation.confirmed = Some(false);
            confirmation.confirmed_at = Some(now);
            confirmation.decline_reason = decline_reason;

            let updates = [InterestUpdate {
                interest_id: confirmation.interest_id,
                status: InterestStatus::Open,
                group_id: None,
            }];
            self.store
                .apply_group_transition(&group, &updates, std::slice::from_ref(&confirmation))
                .await?;

            self.counters.replies_declined.fetch_add(1, Ordering::Relaxed);

            ReplyOutcome {
                status: ReplyStatus::Declined,
                payment_required: false,
                client_secret: None,
                deposit_amount: None,
            }
        };

        // Re-evaluate under the same lock so this reply is reflected.
        self.sweep_locked(group_id, now, false).await?;

        Ok(outcome)
    }

    /// Payment webhook: verifies the signature, captures the intent, and
    /// records the outcome. Idempotent per intent.
    #[instrument(skip(self, payload, signature), target = "workflow")]
    pub async fn confirm_deposit(
        &self,
        intent_id: &str,
        payload: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<PaymentStatus, CoreError> {
        if !self.payments.verify_webhook(payload, signature) {
            return Err(CoreError::WebhookRejected);
        }

        let probe = self
            .store
            .load_confirmation_by_intent(intent_id)
            .await?
            .ok_or_else(|| CoreError::UnknownIntent(intent_id.to_string()))?;

        let _guard = self.locks.acquire(group_key(probe.group_id)).await;

        // Reload under the lock; the row may have moved since the probe.
        let mut confirmation = self
            .store
            .load_confirmation_by_intent(intent_id)
            .await?
            .ok_or_else(|| CoreError::UnknownIntent(intent_id.to_string()))?;

        if confirmation.payment_status == PaymentStatus::Paid
            || confirmation.payment_status == PaymentStatus::Refunded
        {
            return Ok(confirmation.payment_status);
        }

        match self.payments.process(intent_id).await {
            Ok(PaymentResult::Succeeded { tx_id }) => {
                confirmation.payment_status = PaymentStatus::Paid;
                confirmation.payment_tx_id = Some(tx_id);
                self.store.update_confirmation(&confirmation).await?;
                self.counters.deposits_captured.fetch_add(1, Ordering::Relaxed);
            }
            Ok(PaymentResult::Failed { reason }) => {
                confirmation.payment_status = PaymentStatus::Failed;
                self.store.update_confirmation(&confirmation).await?;
                warn!(intent_id, reason = %reason, "deposit capture failed");

                if let (Ok(Some(group)), Ok(Some(member))) = (
                    self.store.load_group(confirmation.group_id).await,
                    self.store.load_interest(confirmation.interest_id).await,
                ) {
                    self.send_deposit_retry(&group, &member, &confirmation).await;
                }
            }
            Err(e) => {
                confirmation.payment_status = PaymentStatus::Failed;
                self.store.update_confirmation(&confirmation).await?;
                warn!(intent_id, error = %e, "deposit capture errored");
            }
        }

        // Payment state can complete the threshold when unpaid members do
        // not count.
        self.sweep_locked(confirmation.group_id, now, false).await?;

        Ok(confirmation.payment_status)
    }

    /// Deadline/auto-confirm sweep for one group.
    pub async fn sweep_group(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SweepAction, CoreError> {
        let _guard = self.locks.acquire(group_key(group_id)).await;
        self.sweep_locked(group_id, now, false).await
    }

    /// Admin/timer finalization. `force` evaluates the thresholds as if the
    /// deadline had passed.
    #[instrument(skip(self), target = "workflow", fields(group_id = %group_id, force))]
    pub async fn finalize(
        &self,
        group_id: Uuid,
        force: bool,
        now: DateTime<Utc>,
    ) -> Result<SweepAction, CoreError> {
        let _guard = self.locks.acquire(group_key(group_id)).await;

        let group = self.load_group(group_id).await?;
        if group.status.is_terminal() {
            return Ok(SweepAction::None);
        }
        if group.status != GroupStatus::PendingConfirmation {
            return Err(CoreError::InvalidTransition(format!(
                "cannot finalize from {}",
                group.status.as_str()
            )));
        }

        self.sweep_locked(group_id, now, force).await
    }

    /// Admin cancellation from any non-terminal state. Cancelling an
    /// already-cancelled group is a no-op.
    #[instrument(skip(self, reason), target = "workflow", fields(group_id = %group_id))]
    pub async fn cancel(
        &self,
        group_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let _guard = self.locks.acquire(group_key(group_id)).await;

        let group = self.load_group(group_id).await?;
        match group.status {
            GroupStatus::Cancelled => Ok(()),
            GroupStatus::Confirmed | GroupStatus::Merged => {
                Err(CoreError::InvalidTransition(format!(
                    "cannot cancel a {} group",
                    group.status.as_str()
                )))
            }
            GroupStatus::Forming | GroupStatus::Full | GroupStatus::PendingConfirmation => {
                self.apply_cancelled(group, reason, now).await
            }
        }
    }

    /// Periodic sweep over every pending group plus due refund retries.
    pub async fn sweep_all(
        &self,
        now: DateTime<Utc>,
        cancelled: &std::sync::atomic::AtomicBool,
    ) -> anyhow::Result<(usize, usize)> {
        let pending = self
            .store
            .load_groups_by_status(GroupStatus::PendingConfirmation)
            .await?;

        let mut finalized = 0usize;
        for group in &pending {
            if cancelled.load(Ordering::Relaxed) {
                warn!("sweep cancelled by soft timeout; remaining groups wait for next cycle");
                break;
            }
            match self.sweep_group(group.id, now).await {
                Ok(SweepAction::None) => {}
                Ok(_) => finalized += 1,
                Err(e) => warn!(group_id = %group.id, error = %e, "sweep failed"),
            }
        }

        let retried = self.retry_refunds(now).await?;
        Ok((finalized, retried))
    }

    /// Retries due refunds for cancelled groups.
    pub async fn retry_refunds(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let policy = self.refund_policy();
        let due = self
            .store
            .load_refundable_confirmations(now, policy.max_attempts)
            .await?;

        let mut refunded = 0usize;
        for mut confirmation in due {
            let ok = refunds::attempt_refund(
                self.payments.as_ref(),
                self.store.as_ref(),
                &mut confirmation,
                &policy,
                now,
                "group cancelled",
                &self.counters,
            )
            .await?;
            if ok {
                refunded += 1;
            }
        }
        Ok(refunded)
    }

    /// Reaps expired confirmations: releases the member and re-evaluates the
    /// group. Safe to run repeatedly.
    pub async fn reap_expired(
        &self,
        now: DateTime<Utc>,
        cancelled: &std::sync::atomic::AtomicBool,
    ) -> anyhow::Result<usize> {
        let expired = self.store.load_expired_confirmations(now).await?;

        let mut groups: Vec<Uuid> = Vec::new();
        let mut released = 0usize;

        for confirmation in &expired {
            if cancelled.load(Ordering::Relaxed) {
                break;
            }

            let _guard = self.locks.acquire(group_key(confirmation.group_id)).await;

            let Some(group) = self.store.load_group(confirmation.group_id).await? else {
                continue;
            };
            if group.status != GroupStatus::PendingConfirmation {
                continue;
            }

            // Release the silent member back into the open pool.
            if let Some(interest) = self.store.load_interest(confirmation.interest_id).await? {
                if interest.group_id == Some(group.id)
                    && interest.status == InterestStatus::Matched
                {
                    self.store
                        .set_interest_status(interest.id, InterestStatus::Open, None)
                        .await?;
                    released += 1;
                    self.counters
                        .confirmations_reaped
                        .fetch_add(1, Ordering::Relaxed);
                }
            }

            if !groups.contains(&confirmation.group_id) {
                groups.push(confirmation.group_id);
            }
        }

        for group_id in groups {
            if let Err(e) = self.sweep_group(group_id, now).await {
                warn!(group_id = %group_id, error = %e, "post-reap sweep failed");
            }
        }

        Ok(released)
    }

    /// Reminder notifications for members who have not replied yet.
    pub async fn send_reminders(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<usize, CoreError> {
        let _guard = self.locks.acquire(group_key(group_id)).await;

        let group = self.load_group(group_id).await?;
        if group.status != GroupStatus::PendingConfirmation {
            return Ok(0);
        }
        let Some(deadline) = group.confirmation_deadline else {
            return Ok(0);
        };

        let confirmations = self.store.load_confirmations(group_id).await?;
        let mut sent = 0usize;

        for confirmation in confirmations.iter().filter(|c| c.is_pending(now)) {
            let Some(member) = self.store.load_interest(confirmation.interest_id).await? else {
                continue;
            };
            let template = Template::ConfirmationReminder(ConfirmationReminderData {
                user_name: member.contact.name.clone(),
                group_name: group.name.clone(),
                confirmation_deadline: fmt_date(deadline),
                confirmation_path: format!(
                    "/groups/{group_id}/confirm/{}",
                    confirmation.token
                ),
            });
            self.notify_member(&group, &member, template, "reminder").await;
            sent += 1;
        }

        Ok(sent)
    }

    /* =========================
     * Internal transitions
     * ========================= */

    async fn load_group(&self, group_id: Uuid) -> Result<Group, CoreError> {
        self.store
            .load_group(group_id)
            .await?
            .ok_or(CoreError::GroupNotFound(group_id))
    }

    /// Evaluates the finalization rules. Caller must hold the group lock.
    async fn sweep_locked(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<SweepAction, CoreError> {
        let group = self.load_group(group_id).await?;
        if group.status != GroupStatus::PendingConfirmation {
            return Ok(SweepAction::None);
        }

        let confirmations = self.store.load_confirmations(group_id).await?;

        let counted = |c: &MemberConfirmation| {
            c.accepted()
                && (self.cfg.count_unpaid_confirmations
                    || c.payment_status != PaymentStatus::Failed)
        };

        let confirmed = confirmations.iter().filter(|c| counted(c)).count();
        let pending = confirmations.iter().filter(|c| c.is_pending(now)).count();
        let total = confirmations.len();

        let past_deadline =
            force || group.confirmation_deadline.is_some_and(|d| now > d);

        let rate_met = total > 0
            && (confirmed as f64 / total as f64) >= group.minimum_confirmation_rate;

        if confirmed as u32 >= group.min_size
            && (pending == 0
                || past_deadline
                || (group.auto_confirm_enabled && rate_met))
        {
            self.apply_confirmed(group, &confirmations, now).await?;
            Ok(SweepAction::Confirmed)
        } else if past_deadline && (confirmed as u32) < group.min_size {
            self.apply_cancelled(group, "insufficient confirmations by deadline", now)
                .await?;
            Ok(SweepAction::Cancelled)
        } else {
            Ok(SweepAction::None)
        }
    }

    async fn apply_confirmed(
        &self,
        mut group: Group,
        confirmations: &[MemberConfirmation],
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let members = self.store.list_members(group.id).await?;
        let by_interest: std::collections::HashMap<Uuid, &MemberConfirmation> =
            confirmations.iter().map(|c| (c.interest_id, c)).collect();

        let mut confirmed_members: Vec<Interest> = Vec::new();
        let mut updates: Vec<InterestUpdate> = Vec::new();

        for member in members {
            match by_interest.get(&member.id) {
                Some(c) if c.accepted() => {
                    updates.push(InterestUpdate {
                        interest_id: member.id,
                        status: InterestStatus::Converted,
                        group_id: Some(group.id),
                    });
                    confirmed_members.push(member);
                }
                // Pending, declined, or expired members are released so they
                // can re-enter clustering.
                _ => updates.push(InterestUpdate {
                    interest_id: member.id,
                    status: InterestStatus::Open,
                    group_id: None,
                }),
            }
        }

        let final_count = confirmed_members.len() as u32;
        if final_count < group.min_size {
            return Err(CoreError::InvariantViolation(format!(
                "confirming group {} with {} members below min_size {}",
                group.id, final_count, group.min_size
            )));
        }

        let destination = self
            .store
            .load_destination(group.destination_id)
            .await?
            .ok_or(CoreError::DestinationNotFound(group.destination_id))?;

        let quote = pricing::quote(
            &self.schedule,
            group.base_price,
            destination.max_discount,
            &confirmed_members,
            Some(group.final_price_per_person),
            now,
            "finalization",
        );

        group.status = GroupStatus::Confirmed;
        group.final_price_per_person = quote.final_price;
        group.current_size = confirmed_members.iter().map(|m| m.party_size).sum();
        pricing::append_audit(&mut group.price_calc, quote.audit);

        self.store
            .apply_group_transition(&group, &updates, &[])
            .await?;

        for member in &confirmed_members {
            let template = Template::GroupConfirmed(GroupConfirmedData {
                user_name: member.contact.name.clone(),
                group_name: group.name.clone(),
                destination_name: destination.name.clone(),
                date_from: fmt_date(group.date_from),
                date_to: fmt_date(group.date_to),
                final_group_size: group.current_size,
                final_price: group.final_price_per_person,
            });
            self.notify_member(&group, member, template, "finalization").await;
        }

        self.counters.groups_confirmed.fetch_add(1, Ordering::Relaxed);
        info!(
            group_id = %group.id,
            members = final_count,
            final_price = group.final_price_per_person,
            "group confirmed"
        );
        Ok(())
    }

    async fn apply_cancelled(
        &self,
        mut group: Group,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        let members = self.store.list_members(group.id).await?;
        let confirmations = self.store.load_confirmations(group.id).await?;

        let updates: Vec<InterestUpdate> = members
            .iter()
            .map(|m| InterestUpdate {
                interest_id: m.id,
                status: InterestStatus::Open,
                group_id: None,
            })
            .collect();

        group.status = GroupStatus::Cancelled;
        group.current_size = 0;
        group.push_note(&format!("Cancellation reason: {reason}"));

        self.store
            .apply_group_transition(&group, &updates, &[])
            .await?;

        // Refunds are external side effects; each outcome is persisted
        // per-confirmation and failures enter the bounded retry.
        let policy = self.refund_policy();
        for confirmation in &confirmations {
            if confirmation.payment_status == PaymentStatus::Paid {
                let mut c = confirmation.clone();
                refunds::attempt_refund(
                    self.payments.as_ref(),
                    self.store.as_ref(),
                    &mut c,
                    &policy,
                    now,
                    reason,
                    &self.counters,
                )
                .await?;
            }
        }

        // Every member hears about the cancellation, replied or not.
        let destination_name = self.destination_name(group.destination_id).await;
        let notices = members.iter().map(|member| {
            let template = Template::GroupCancelled(GroupCancelledData {
                user_name: member.contact.name.clone(),
                group_name: group.name.clone(),
                destination_name: destination_name.clone(),
                cancellation_reason: reason.to_string(),
                refund_info: "Any captured deposits are refunded automatically.".to_string(),
            });
            self.notify_member(&group, member, template, "cancellation")
        });
        futures::future::join_all(notices).await;

        self.counters.groups_cancelled.fetch_add(1, Ordering::Relaxed);
        info!(group_id = %group.id, reason, "group cancelled");
        Ok(())
    }

    /* =========================
     * Side-effect helpers
     * ========================= */

    async fn destination_name(&self, destination_id: Uuid) -> String {
        match self.store.load_destination(destination_id).await {
            Ok(Some(d)) => d.name,
            _ => "your destination".to_string(),
        }
    }

    async fn send_deposit_retry(
        &self,
        group: &Group,
        member: &Interest,
        confirmation: &MemberConfirmation,
    ) {
        let template = Template::DepositRetry(DepositRetryData {
            user_name: member.contact.name.clone(),
            group_name: group.name.clone(),
            deposit_amount: confirmation.amount_due,
            retry_path: format!("/groups/{}/confirm/{}", group.id, confirmation.token),
        });
        self.notify_member(group, member, template, "deposit_retry").await;
    }

    /// Best-effort notification; failures are logged and never abort a
    /// transition.
    async fn notify_member(
        &self,
        group: &Group,
        member: &Interest,
        template: Template,
        occasion: &str,
    ) {
        let key = NotificationKey {
            group_id: group.id,
            interest_id: member.id,
            template_id: template.id(),
            occasion: occasion.to_string(),
        };
        let rendered = template.render();

        if let Err(e) = self
            .notifier
            .notify(&member.contact, &rendered, &key)
            .await
        {
            warn!(
                template = rendered.template_id,
                interest_id = %member.id,
                error = %e,
                "notification failed"
            );
        }
    }
}

fn fmt_date(at: DateTime<Utc>) -> String {
    at.format("%B %d, %Y").to_string()
}
