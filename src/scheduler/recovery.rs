//! Reconciliation of jobs owned by other pods.
//!
//! Two independent signals make a foreign-owned job claimable again:
//!
//! - the owning pod no longer runs (orphan), which clears the owner at once
//! - the heartbeat went stale, which spends one unit of the retry budget or,
//!   once the budget is gone, fails the job for good
//!
//! Decisions here are pure; the scheduler performs the writes.

use std::time::Duration;

use super::job::{JobStatus, RequestedJob};

/// Default heartbeat staleness threshold.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of stale-heartbeat resets before a job fails permanently.
pub const DEFAULT_MAX_RECOVERY_COUNT: u32 = 1;

/// What to do about a stale foreign job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleAction {
    /// Return the job to the queue with the given new recovery count.
    Reset { recovery_count: u32 },
    /// Mark the job permanently failed.
    Fail,
}

/// Heartbeat staleness rules.
#[derive(Debug, Clone, Copy)]
pub struct RecoveryPolicy {
    /// Age after which a heartbeat is stale.
    pub heartbeat_timeout: Duration,
    /// Resets allowed before failing the job.
    pub max_recovery_count: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            max_recovery_count: DEFAULT_MAX_RECOVERY_COUNT,
        }
    }
}

impl RecoveryPolicy {
    pub fn new(heartbeat_timeout: Duration, max_recovery_count: u32) -> Self {
        Self {
            heartbeat_timeout,
            max_recovery_count,
        }
    }

    /// Whether the job's liveness evidence is older than the timeout.
    pub fn is_stale(&self, job: &RequestedJob, now: f64) -> bool {
        job.heartbeat_age(now) > self.heartbeat_timeout.as_secs_f64()
    }

    /// Whether the job counts as actively processing: assigned, in
    /// `processing` and heartbeated within the timeout.
    pub fn is_actively_processing(&self, job: &RequestedJob, now: f64) -> bool {
        job.assigned_pod_id.is_some()
            && job.status == JobStatus::Processing
            && job.heartbeat_age(now) < self.heartbeat_timeout.as_secs_f64()
    }

    /// Decides what to do about a job owned by another pod.
    ///
    /// Only processing jobs with a stale heartbeat qualify, and never while the
    /// owner advertises a drain: a draining pod keeps its jobs until they
    /// finish.
    pub fn stale_action(&self, job: &RequestedJob, now: f64) -> Option<StaleAction> {
        if job.assigned_pod_id.is_none()
            || job.status != JobStatus::Processing
            || job.is_shutdown_flagged()
            || !self.is_stale(job, now)
        {
            return None;
        }

        if job.recovery_count < self.max_recovery_count {
            Some(StaleAction::Reset {
                recovery_count: job.recovery_count + 1,
            })
        } else {
            Some(StaleAction::Fail)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processing(heartbeat: f64, recovery_count: u32) -> RequestedJob {
        RequestedJob::new("summ-1700000000000-a", 1.0)
            .with_assigned_pod("pod-x")
            .with_status(JobStatus::Processing)
            .with_last_heartbeat(heartbeat)
            .with_recovery_count(recovery_count)
    }

    #[test]
    fn test_fresh_heartbeat_is_left_alone() {
        let policy = RecoveryPolicy::default();
        let job = processing(1000.0, 0);
        assert_eq!(policy.stale_action(&job, 1300.0), None);
        assert!(policy.is_actively_processing(&job, 1299.0));
        // Exactly at the timeout: neither stale nor actively processing.
        assert!(!policy.is_actively_processing(&job, 1300.0));
    }

    #[test]
    fn test_first_stale_observation_resets() {
        let policy = RecoveryPolicy::default();
        let job = processing(1000.0, 0);
        assert_eq!(
            policy.stale_action(&job, 1300.5),
            Some(StaleAction::Reset { recovery_count: 1 })
        );
        assert!(!policy.is_actively_processing(&job, 1300.5));
    }

    #[test]
    fn test_exhausted_budget_fails() {
        let policy = RecoveryPolicy::default();
        let job = processing(1000.0, 1);
        assert_eq!(policy.stale_action(&job, 2000.0), Some(StaleAction::Fail));
    }

    #[test]
    fn test_draining_owner_is_not_reaped() {
        let policy = RecoveryPolicy::default();
        let mut job = processing(1000.0, 0);
        job.shutdown_requested = Some(true);
        assert_eq!(policy.stale_action(&job, 5000.0), None);
    }

    #[test]
    fn test_only_processing_jobs_qualify() {
        let policy = RecoveryPolicy::default();
        let job = processing(1000.0, 0).with_status(JobStatus::Pending);
        assert_eq!(policy.stale_action(&job, 5000.0), None);

        let unassigned = RequestedJob::new("a", 1.0).with_status(JobStatus::Processing);
        assert_eq!(policy.stale_action(&unassigned, 5000.0), None);
    }

    #[test]
    fn test_custom_budget() {
        let policy = RecoveryPolicy::new(Duration::from_secs(60), 3);
        let job = processing(0.0, 2);
        assert_eq!(
            policy.stale_action(&job, 61.0),
            Some(StaleAction::Reset { recovery_count: 3 })
        );
        let job = processing(0.0, 3);
        assert_eq!(policy.stale_action(&job, 61.0), Some(StaleAction::Fail));
    }
}
