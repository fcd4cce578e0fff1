use crate::compat::CompatWeights;
use crate::pricing::PricingSchedule;

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Database connection string.
    pub database_url: String,

    pub clustering: ClusteringConfig,
    pub compat: CompatConfig,
    pub pricing: PricingSchedule,
    pub workflow: WorkflowConfig,
    pub scheduler: SchedulerConfig,
}

/// Clustering and optimization knobs.
///
/// The optimizer shares this section because both passes reason about the
/// same group-size and date-window geometry.
#[derive(Clone, Debug)]
pub struct ClusteringConfig {
    /// Smallest viable cluster. Clusters below this are dropped by the
    /// post-filter. May be relaxed for testing.
    pub min_group_size: u32,

    /// Capacity ceiling per group, measured in total travelers.
    /// Over-sized clusters are trimmed down to this.
    pub max_group_size: u32,

    /// Rolling clustering window: open interests whose start date lies in
    /// `[now - window_past_days, now + window_future_days]` are considered.
    pub window_past_days: i64,
    pub window_future_days: i64,

    /// Whether the optional refinement stage runs at all. The engine is
    /// correct with refinement disabled; stage 0 always runs first.
    pub refine_enabled: bool,

    /// Minimum number of interests before refinement is attempted.
    pub refine_min_samples: usize,

    /// Groups below this member count are merge candidates.
    pub small_group_threshold: u32,

    /// Mean compatibility a new member must have to the current members
    /// before the optimizer admits it into a forming group.
    pub admit_threshold: f64,

    /// Cross-membership mean compatibility required to merge two groups.
    pub merge_threshold: f64,

    /// Admit pass scans open interests starting within this many days of
    /// the group's date envelope.
    pub admit_date_slack_days: i64,

    /// Merge candidates must start within this many days of each other.
    pub merge_date_slack_days: i64,
}

#[derive(Clone, Debug)]
pub struct CompatConfig {
    /// Factor weights; must sum to 1.0.
    pub weights: CompatWeights,

    /// Minimum pairwise score for stage-0 cluster admission.
    pub threshold_admit: f64,

    /// Minimum average pairwise compatibility for a cluster (or a refined
    /// partitioning) to survive.
    pub threshold_quality: f64,
}

#[derive(Clone, Debug)]
pub struct WorkflowConfig {
    /// Hours a freshly clustered group stays in `forming` before the
    /// scheduler initiates its confirmation round. The optimizer uses this
    /// window to enlarge or merge the group; admins can initiate earlier.
    pub initiation_grace_hours: i64,

    /// Days members have to reply once a group enters pending confirmation.
    pub confirmation_window_days: i64,

    /// Fraction of the member's total cost collected as a deposit.
    pub deposit_fraction: f64,

    /// Confirmed-member ratio that allows early auto-confirmation before
    /// the deadline.
    pub minimum_confirmation_rate: f64,

    /// Gates the early-confirmation path entirely.
    pub auto_confirm_enabled: bool,

    /// Whether a member whose deposit capture failed (confirmed but unpaid)
    /// still counts toward the confirmation threshold. The upstream data
    /// model is ambiguous here, so it stays a switch.
    pub count_unpaid_confirmations: bool,

    /// Bounded refund retry: attempts before surfacing for manual
    /// intervention, and the base of the exponential backoff.
    pub refund_max_attempts: u32,
    pub refund_backoff_base_secs: i64,
}

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Periodic job cadences. Social-proof and analytics jobs live with the
    /// collaborators that own them, not here.
    pub period_cluster_secs: u64,
    pub period_optimize_secs: u64,
    pub period_sweep_secs: u64,
    pub period_reap_secs: u64,

    /// Soft timeout sets the cancellation flag a job checks between
    /// sub-steps; hard timeout aborts the job outright.
    pub soft_timeout_secs: u64,
    pub hard_timeout_secs: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://wanderpool_dev.db".to_string());

        Self {
            database_url,
            clustering: ClusteringConfig {
                min_group_size: env_parse("CLUSTERING_MIN_GROUP_SIZE", 4),
                max_group_size: env_parse("CLUSTERING_MAX_GROUP_SIZE", 20),
                window_past_days: 7,
                window_future_days: 60,
                refine_enabled: true,
                refine_min_samples: 10,
                small_group_threshold: 6,
                admit_threshold: 0.75,
                merge_threshold: 0.7,
                admit_date_slack_days: 3,
                merge_date_slack_days: 5,
            },
            compat: CompatConfig {
                weights: CompatWeights::default(),
                threshold_admit: 0.3,
                threshold_quality: 0.6,
            },
            pricing: PricingSchedule::default(),
            workflow: WorkflowConfig {
                initiation_grace_hours: env_parse("WORKFLOW_INITIATION_GRACE_HOURS", 24),
                confirmation_window_days: env_parse("WORKFLOW_CONFIRMATION_WINDOW_DAYS", 7),
                deposit_fraction: 0.30,
                minimum_confirmation_rate: 0.75,
                auto_confirm_enabled: true,
                count_unpaid_confirmations: true,
                refund_max_attempts: 5,
                refund_backoff_base_secs: 60,
            },
            scheduler: SchedulerConfig {
                period_cluster_secs: env_parse("SCHEDULER_PERIOD_CLUSTER_SECS", 3_600),
                period_optimize_secs: env_parse("SCHEDULER_PERIOD_OPTIMIZE_SECS", 14_400),
                period_sweep_secs: env_parse("SCHEDULER_PERIOD_SWEEP_SECS", 1_800),
                period_reap_secs: env_parse("SCHEDULER_PERIOD_REAP_SECS", 3_600),
                soft_timeout_secs: 480,
                hard_timeout_secs: 600,
            },
        }
    }
}

fn env_parse<T: std::str::FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
