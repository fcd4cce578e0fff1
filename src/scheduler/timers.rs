//! One-shot lifecycle timers for pending groups.
//!
//! Each group entering pending confirmation gets a reminder (deadline − 2
//! days), a deadline check (deadline + 1 hour), and a forced finalize
//! (deadline + 6 hours). The table holds no durable state: on boot it is
//! reconstructed by scanning persisted confirmation deadlines.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ports::{Notifier, Payments};
use crate::store::Store;
use crate::workflow::WorkflowEngine;

fn reminder_before() -> Duration {
    Duration::days(2)
}

fn deadline_check_after() -> Duration {
    Duration::hours(1)
}

fn force_finalize_after() -> Duration {
    Duration::hours(6)
}

/// The only process-wide scheduler state: which groups have live timers.
#[derive(Default)]
pub struct TimerTable {
    armed: Mutex<HashSet<Uuid>>,
}

impl TimerTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn armed_count(&self) -> usize {
        self.armed.lock().len()
    }

    /// Arms the three lifecycle timers for a group. A group that is already
    /// armed is left alone, so re-initiation attempts do not double-fire.
    pub fn arm<P: Payments, N: Notifier>(
        self: &Arc<Self>,
        engine: Arc<WorkflowEngine<P, N>>,
        group_id: Uuid,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        if !self.armed.lock().insert(group_id) {
            debug!(group_id = %group_id, "timers already armed");
            return;
        }

        let table = Arc::clone(self);
        tokio::spawn(async move {
            let reminder_at = deadline - reminder_before();
            let check_at = deadline + deadline_check_after();
            let finalize_at = deadline + force_finalize_after();

            sleep_until(now, reminder_at).await;
            match engine.send_reminders(group_id, reminder_at).await {
                Ok(sent) if sent > 0 => {
                    info!(group_id = %group_id, sent, "reminder notifications sent")
                }
                Ok(_) => {}
                Err(e) => warn!(group_id = %group_id, error = %e, "reminder timer failed"),
            }

            sleep_until(reminder_at.max(now), check_at).await;
            if let Err(e) = engine.sweep_group(group_id, check_at).await {
                warn!(group_id = %group_id, error = %e, "deadline check failed");
            }

            sleep_until(check_at.max(now), finalize_at).await;
            if let Err(e) = engine.finalize(group_id, false, finalize_at).await {
                // Already-terminal groups answer with a no-op, so a real
                // error here is worth surfacing.
                warn!(group_id = %group_id, error = %e, "forced finalize failed");
            }

            table.armed.lock().remove(&group_id);
        });
    }

    /// Boot-time recovery: re-arms timers for every non-terminal group with
    /// a persisted deadline.
    pub async fn rearm_from_store<P: Payments, N: Notifier>(
        self: &Arc<Self>,
        store: &dyn Store,
        engine: Arc<WorkflowEngine<P, N>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        let groups = store.load_groups_with_deadline().await?;
        let mut rearmed = 0usize;

        for group in groups {
            let Some(deadline) = group.confirmation_deadline else {
                continue;
            };
            self.arm(Arc::clone(&engine), group.id, deadline, now);
            rearmed += 1;
        }

        if rearmed > 0 {
            info!(rearmed, "lifecycle timers reconstructed from store");
        }
        Ok(rearmed)
    }
}

/// Sleeps from `from` to `until`; elapsed targets fire immediately.
async fn sleep_until(from: DateTime<Utc>, until: DateTime<Utc>) {
    let delta = until - from;
    if delta > Duration::zero() {
        let millis = delta.num_milliseconds().max(0) as u64;
        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
    }
}
