use crate::config::SchedulerConfig;

/// Concurrency class of a job. Clustering-class work serializes per
/// destination, workflow-class work per group; the keyed locks inside the
/// engines enforce both, so jobs of different classes (and different keys)
/// overlap freely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobClass {
    Clustering,
    Workflow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    ClusterInterests,
    OptimizeGroups,
    AutoConfirmSweep,
    ReapExpired,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::ClusterInterests,
        JobKind::OptimizeGroups,
        JobKind::AutoConfirmSweep,
        JobKind::ReapExpired,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            JobKind::ClusterInterests => "cluster_interests",
            JobKind::OptimizeGroups => "optimize_groups",
            JobKind::AutoConfirmSweep => "auto_confirm_sweep",
            JobKind::ReapExpired => "reap_expired",
        }
    }

    pub fn class(&self) -> JobClass {
        match self {
            JobKind::ClusterInterests | JobKind::OptimizeGroups => JobClass::Clustering,
            JobKind::AutoConfirmSweep | JobKind::ReapExpired => JobClass::Workflow,
        }
    }

    pub fn period_secs(&self, cfg: &SchedulerConfig) -> u64 {
        match self {
            JobKind::ClusterInterests => cfg.period_cluster_secs,
            JobKind::OptimizeGroups => cfg.period_optimize_secs,
            JobKind::AutoConfirmSweep => cfg.period_sweep_secs,
            JobKind::ReapExpired => cfg.period_reap_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    #[test]
    fn job_periods_follow_config() {
        let cfg = AppConfig::from_env().scheduler;
        assert_eq!(JobKind::ClusterInterests.period_secs(&cfg), 3_600);
        assert_eq!(JobKind::OptimizeGroups.period_secs(&cfg), 14_400);
        assert_eq!(JobKind::AutoConfirmSweep.period_secs(&cfg), 1_800);
        assert_eq!(JobKind::ReapExpired.period_secs(&cfg), 3_600);
    }

    #[test]
    fn job_classes_partition_the_jobs() {
        assert_eq!(JobKind::ClusterInterests.class(), JobClass::Clustering);
        assert_eq!(JobKind::OptimizeGroups.class(), JobClass::Clustering);
        assert_eq!(JobKind::AutoConfirmSweep.class(), JobClass::Workflow);
        assert_eq!(JobKind::ReapExpired.class(), JobClass::Workflow);
    }
}
