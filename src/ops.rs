//! Inbound operation surface.
//!
//! The HTTP/RPC collaborators call these functions; each validates, takes
//! the appropriate engine path, and maps errors onto the typed outcome
//! (`ok` / `invalid` / `conflict` / `internal`). No retries originate here;
//! the workflow self-heals on subsequent timer ticks.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info};
use uuid::Uuid;

use crate::clustering::{ClusterOutcome, Clusterer};
use crate::config::AppConfig;
use crate::error::{CoreError, OpOutcome};
use crate::metrics::Counters;
use crate::model::{GroupStatus, PaymentStatus};
use crate::optimizer::Optimizer;
use crate::ports::{Notifier, Payments};
use crate::scheduler::locks::LockRegistry;
use crate::scheduler::timers::TimerTable;
use crate::store::Store;
use crate::workflow::{InitiateOutcome, ReplyOutcome, SweepAction, WorkflowEngine};

/// Wires the clustering, optimization and workflow engines over one store
/// and one lock registry, and owns the timer table.
pub struct CoreService<P: Payments, N: Notifier> {
    store: Arc<dyn Store>,
    clusterer: Clusterer,
    optimizer: Optimizer,
    workflow: Arc<WorkflowEngine<P, N>>,
    timers: Arc<TimerTable>,
    cfg: AppConfig,
    pub counters: Counters,
}

impl<P: Payments, N: Notifier> CoreService<P, N> {
    pub fn new(
        store: Arc<dyn Store>,
        payments: Arc<P>,
        notifier: Arc<N>,
        cfg: AppConfig,
    ) -> Arc<Self> {
        let locks = LockRegistry::new();
        let counters = Counters::default();

        let clusterer = Clusterer::new(
            Arc::clone(&store),
            locks.clone(),
            cfg.clustering.clone(),
            cfg.compat.clone(),
            cfg.pricing.clone(),
            cfg.workflow.auto_confirm_enabled,
            cfg.workflow.minimum_confirmation_rate,
            counters.clone(),
        );

        let optimizer = Optimizer::new(
            Arc::clone(&store),
            locks.clone(),
            cfg.clustering.clone(),
            cfg.compat.clone(),
            cfg.pricing.clone(),
            counters.clone(),
        );

        let workflow = Arc::new(WorkflowEngine::new(
            Arc::clone(&store),
            payments,
            notifier,
            locks,
            cfg.workflow.clone(),
            cfg.pricing.clone(),
            counters.clone(),
        ));

        Arc::new(Self {
            store,
            clusterer,
            optimizer,
            workflow,
            timers: TimerTable::new(),
            cfg,
            counters,
        })
    }

    pub fn workflow(&self) -> &Arc<WorkflowEngine<P, N>> {
        &self.workflow
    }

    pub fn timers(&self) -> &Arc<TimerTable> {
        &self.timers
    }

    /* =========================
     * Inbound operations
     * ========================= */

    /// Forces a clustering pass for one destination.
    pub async fn cluster_destination(
        &self,
        destination_id: Uuid,
        now: DateTime<Utc>,
    ) -> OpOutcome<ClusterOutcome> {
        map(self.clusterer.cluster_destination(destination_id, now).await)
    }

    /// Forces an admit pass for one group.
    pub async fn optimize_group(&self, group_id: Uuid, now: DateTime<Utc>) -> OpOutcome<usize> {
        map(self.optimizer.optimize_group(group_id, now).await)
    }

    /// Starts the confirmation workflow for a group and arms its lifecycle
    /// timers.
    pub async fn initiate_group(
        &self,
        group_id: Uuid,
        now: DateTime<Utc>,
    ) -> OpOutcome<InitiateOutcome> {
        match self.workflow.initiate(group_id, now).await {
            Ok(outcome) => {
                self.timers.arm(
                    Arc::clone(&self.workflow),
                    group_id,
                    outcome.deadline,
                    now,
                );
                OpOutcome::Ok(outcome)
            }
            Err(e) => fail(e),
        }
    }

    /// Authoritative member reply.
    pub async fn reply_to_confirmation(
        &self,
        group_id: Uuid,
        token: &str,
        accept: bool,
        decline_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> OpOutcome<ReplyOutcome> {
        map(
            self.workflow
                .reply(group_id, token, accept, decline_reason, now)
                .await,
        )
    }

    /// Admin- or timer-driven finalization.
    pub async fn finalize_group(
        &self,
        group_id: Uuid,
        force: bool,
        now: DateTime<Utc>,
    ) -> OpOutcome<SweepAction> {
        map(self.workflow.finalize(group_id, force, now).await)
    }

    /// Admin cancellation.
    pub async fn cancel_group(
        &self,
        group_id: Uuid,
        reason: &str,
        now: DateTime<Utc>,
    ) -> OpOutcome<()> {
        map(self.workflow.cancel(group_id, reason, now).await)
    }

    /// Payment provider webhook.
    pub async fn payment_webhook(
        &self,
        intent_id: &str,
        payload: &[u8],
        signature: &str,
        now: DateTime<Utc>,
    ) -> OpOutcome<PaymentStatus> {
        map(
            self.workflow
                .confirm_deposit(intent_id, payload, signature, now)
                .await,
        )
    }

    /* =========================
     * Scheduled entry points
     * ========================= */

    /// Periodic clustering over every destination with open interests.
    pub async fn run_clustering(
        &self,
        now: DateTime<Utc>,
        cancelled: &AtomicBool,
    ) -> anyhow::Result<()> {
        let created = self.clusterer.cluster_all(now, cancelled).await?;
        if created > 0 {
            info!(groups_created = created, "clustering job done");
        }
        Ok(())
    }

    /// Periodic admit/merge optimization.
    pub async fn run_optimizer(
        &self,
        now: DateTime<Utc>,
        cancelled: &AtomicBool,
    ) -> anyhow::Result<()> {
        let outcome = self.optimizer.optimize_all(now, cancelled).await?;
        if outcome.members_admitted > 0 || outcome.groups_merged > 0 {
            info!(
                admitted = outcome.members_admitted,
                merged = outcome.groups_merged,
                "optimizer job done"
            );
        }
        Ok(())
    }

    /// Periodic workflow sweep: initiates groups whose growth window has
    /// elapsed, re-evaluates pending groups, retries due refunds.
    pub async fn run_sweep(
        &self,
        now: DateTime<Utc>,
        cancelled: &AtomicBool,
    ) -> anyhow::Result<()> {
        self.initiate_due_groups(now).await?;
        let (finalized, refunded) = self.workflow.sweep_all(now, cancelled).await?;
        if finalized > 0 || refunded > 0 {
            info!(finalized, refunded, "sweep job done");
        }
        Ok(())
    }

    /// Periodic reap of expired confirmations.
    pub async fn run_reaper(
        &self,
        now: DateTime<Utc>,
        cancelled: &AtomicBool,
    ) -> anyhow::Result<()> {
        let released = self.workflow.reap_expired(now, cancelled).await?;
        if released > 0 {
            info!(released, "reaper job done");
        }
        Ok(())
    }

    /// Boot-time recovery: reconstruct one-shot timers from persisted
    /// deadlines.
    pub async fn recover_timers(&self, now: DateTime<Utc>) -> anyhow::Result<usize> {
        self.timers
            .rearm_from_store(self.store.as_ref(), Arc::clone(&self.workflow), now)
            .await
    }

    /// Initiates every forming (or full) group older than the grace window.
    async fn initiate_due_groups(&self, now: DateTime<Utc>) -> anyhow::Result<()> {
        let grace = Duration::hours(self.cfg.workflow.initiation_grace_hours);

        for status in [GroupStatus::Forming, GroupStatus::Full] {
            let groups = self.store.load_groups_by_status(status).await?;
            for group in groups {
                if group.created_at + grace > now {
                    continue;
                }
                match self.initiate_group(group.id, now).await {
                    OpOutcome::Ok(outcome) => info!(
                        group_id = %group.id,
                        members = outcome.members_notified,
                        "confirmation round initiated by scheduler"
                    ),
                    OpOutcome::Internal => {
                        error!(group_id = %group.id, "scheduled initiation failed")
                    }
                    // Raced with an admin action; nothing to do.
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

fn map<T>(result: Result<T, CoreError>) -> OpOutcome<T> {
    match result {
        Ok(v) => OpOutcome::Ok(v),
        Err(e) => fail(e),
    }
}

fn fail<T>(e: CoreError) -> OpOutcome<T> {
    match e {
        CoreError::AlreadyResponded { payment_intent_id } => {
            let mut reason = "already responded".to_string();
            if let Some(intent) = payment_intent_id {
                reason.push_str(&format!(" (intent {intent})"));
            }
            OpOutcome::Conflict(reason)
        }
        e if e.is_invalid_input() => OpOutcome::Invalid(e.to_string()),
        e => {
            error!(error = %e, "internal error on inbound operation");
            OpOutcome::Internal
        }
    }
}
