//! Metric recording for the scheduler and autoscaler.
//!
//! `MetricsCollector` wraps the raw Prometheus statics so call sites never
//! deal with label arrays or uninitialized metrics.

use super::prometheus::{
    ACTIVE_JOBS, CURRENT_REPLICAS, DESIRED_REPLICAS, FLEET_JOBS, JOBS_CLAIMED_TOTAL,
    JOB_DURATION, RECOVERIES_TOTAL, REMOVALS_TOTAL, SCALE_ACTIONS_TOTAL, WAITING_JOBS,
};

/// How a reclaimed foreign job was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Stale heartbeat, returned to the queue.
    Reset,
    /// Stale heartbeat with no retry budget left.
    Failed,
    /// Owning pod gone, assignment cleared.
    Orphan,
}

impl RecoveryOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            RecoveryOutcome::Reset => "reset",
            RecoveryOutcome::Failed => "failed",
            RecoveryOutcome::Orphan => "orphan",
        }
    }
}

/// Metrics collector for recording genfleet operational metrics.
///
/// Metrics must be initialized with `init_metrics()` for anything to be
/// recorded; before that every method is a no-op.
///
/// # Example
///
/// ```ignore
/// use genfleet::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
/// collector.record_claim("summarizer");
/// collector.record_scale_action("up");
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Record a successful claim.
    pub fn record_claim(&self, namespace: &str) {
        if let Some(claims) = JOBS_CLAIMED_TOTAL.get() {
            claims.with_label_values(&[namespace]).inc();
        }

        tracing::trace!(namespace = namespace, "Recorded claim metric");
    }

    /// Update the number of jobs running on this pod.
    pub fn update_active_jobs(&self, count: usize) {
        if let Some(active_jobs) = ACTIVE_JOBS.get() {
            active_jobs.set(count as f64);
        }
    }

    /// Update the waiting queue depth of one namespace.
    pub fn update_waiting_jobs(&self, namespace: &str, count: usize) {
        if let Some(waiting_jobs) = WAITING_JOBS.get() {
            waiting_jobs.with_label_values(&[namespace]).set(count as f64);
        }

        tracing::trace!(
            namespace = namespace,
            count = count,
            "Updated waiting jobs metric"
        );
    }

    /// Record a finished job.
    ///
    /// # Arguments
    ///
    /// * `namespace` - Queue the job came from
    /// * `outcome` - `"success"`, `"failure"` or `"cancelled"`
    /// * `duration_secs` - Wall time from claim to completion
    pub fn record_job_finished(&self, namespace: &str, outcome: &str, duration_secs: f64) {
        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[namespace, outcome])
                .observe(duration_secs);
        }

        tracing::trace!(
            namespace = namespace,
            outcome = outcome,
            duration_secs = duration_secs,
            "Recorded job duration metric"
        );
    }

    /// Record a reclaimed foreign job.
    pub fn record_recovery(&self, outcome: RecoveryOutcome) {
        if let Some(recoveries) = RECOVERIES_TOTAL.get() {
            recoveries.with_label_values(&[outcome.as_str()]).inc();
        }
    }

    /// Record a handled removal request.
    pub fn record_removal(&self, branch: &str) {
        if let Some(removals) = REMOVALS_TOTAL.get() {
            removals.with_label_values(&[branch]).inc();
        }
    }

    /// Record one autoscaler observation.
    pub fn record_scaling_observation(
        &self,
        waiting: u32,
        processing: u32,
        current: u32,
        desired: u32,
    ) {
        if let Some(fleet_jobs) = FLEET_JOBS.get() {
            fleet_jobs.with_label_values(&["waiting"]).set(waiting as f64);
            fleet_jobs
                .with_label_values(&["processing"])
                .set(processing as f64);
        }
        if let Some(current_replicas) = CURRENT_REPLICAS.get() {
            current_replicas.set(current as f64);
        }
        if let Some(desired_replicas) = DESIRED_REPLICAS.get() {
            desired_replicas.set(desired as f64);
        }
    }

    /// Record a scale action.
    pub fn record_scale_action(&self, direction: &str) {
        if let Some(scale_actions) = SCALE_ACTIONS_TOTAL.get() {
            scale_actions.with_label_values(&[direction]).inc();
        }

        tracing::trace!(direction = direction, "Recorded scale action metric");
    }
}
