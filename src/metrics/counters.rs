use std::sync::Arc;
use std::sync::atomic::AtomicU64;

/// Minimal counters for operational visibility.
#[derive(Clone, Default)]
pub struct Counters {
    pub clusters_created: Arc<AtomicU64>,
    pub groups_confirmed: Arc<AtomicU64>,
    pub groups_cancelled: Arc<AtomicU64>,
    pub groups_merged: Arc<AtomicU64>,
    pub members_admitted: Arc<AtomicU64>,

    pub replies_accepted: Arc<AtomicU64>,
    pub replies_declined: Arc<AtomicU64>,
    pub deposits_captured: Arc<AtomicU64>,

    pub refunds_issued: Arc<AtomicU64>,
    pub refunds_exhausted: Arc<AtomicU64>,

    pub confirmations_reaped: Arc<AtomicU64>,
    pub job_timeouts: Arc<AtomicU64>,
}
