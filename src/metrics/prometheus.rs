//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by genfleet and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all genfleet metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Successful claims, labeled by namespace.
pub static JOBS_CLAIMED_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Jobs currently running on this pod.
pub static ACTIVE_JOBS: OnceLock<Gauge> = OnceLock::new();

/// Unclaimed, non-failed jobs, labeled by namespace.
pub static WAITING_JOBS: OnceLock<GaugeVec> = OnceLock::new();

/// Job execution duration in seconds, labeled by namespace and outcome.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Foreign jobs reclaimed, labeled by outcome (`reset`, `failed`, `orphan`).
pub static RECOVERIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Removal requests handled, labeled by branch.
pub static REMOVALS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Fleet-wide job counts seen by the autoscaler, labeled by state.
pub static FLEET_JOBS: OnceLock<GaugeVec> = OnceLock::new();

/// Deployment replica count last read by the autoscaler.
pub static CURRENT_REPLICAS: OnceLock<Gauge> = OnceLock::new();

/// Replica count the policy last asked for.
pub static DESIRED_REPLICAS: OnceLock<Gauge> = OnceLock::new();

/// Scale actions taken, labeled by direction (`up`, `down`).
pub static SCALE_ACTIONS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Recording before initialization is a silent no-op.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    // Scheduler metrics
    let jobs_claimed_total = CounterVec::new(
        Opts::new("genfleet_jobs_claimed_total", "Jobs claimed by this pod"),
        &["namespace"],
    )?;

    let active_jobs = Gauge::new("genfleet_active_jobs", "Jobs currently running on this pod")?;

    let waiting_jobs = GaugeVec::new(
        Opts::new("genfleet_waiting_jobs", "Unclaimed jobs waiting in the queue"),
        &["namespace"],
    )?;

    let job_duration = HistogramVec::new(
        HistogramOpts::new(
            "genfleet_job_duration_seconds",
            "Job execution duration in seconds",
        )
        .buckets(vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0]),
        &["namespace", "outcome"],
    )?;

    let recoveries_total = CounterVec::new(
        Opts::new(
            "genfleet_recoveries_total",
            "Foreign jobs returned to the queue or failed",
        ),
        &["outcome"],
    )?;

    let removals_total = CounterVec::new(
        Opts::new("genfleet_removals_total", "Removal requests handled"),
        &["branch"],
    )?;

    // Autoscaler metrics
    let fleet_jobs = GaugeVec::new(
        Opts::new("genfleet_fleet_jobs", "Fleet-wide job counts seen by the autoscaler"),
        &["state"],
    )?;

    let current_replicas = Gauge::new("genfleet_current_replicas", "Current deployment replicas")?;

    let desired_replicas = Gauge::new("genfleet_desired_replicas", "Desired deployment replicas")?;

    let scale_actions_total = CounterVec::new(
        Opts::new("genfleet_scale_actions_total", "Scale actions taken"),
        &["direction"],
    )?;

    registry.register(Box::new(jobs_claimed_total.clone()))?;
    registry.register(Box::new(active_jobs.clone()))?;
    registry.register(Box::new(waiting_jobs.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(recoveries_total.clone()))?;
    registry.register(Box::new(removals_total.clone()))?;
    registry.register(Box::new(fleet_jobs.clone()))?;
    registry.register(Box::new(current_replicas.clone()))?;
    registry.register(Box::new(desired_replicas.clone()))?;
    registry.register(Box::new(scale_actions_total.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = JOBS_CLAIMED_TOTAL.set(jobs_claimed_total);
    let _ = ACTIVE_JOBS.set(active_jobs);
    let _ = WAITING_JOBS.set(waiting_jobs);
    let _ = JOB_DURATION.set(job_duration);
    let _ = RECOVERIES_TOTAL.set(recoveries_total);
    let _ = REMOVALS_TOTAL.set(removals_total);
    let _ = FLEET_JOBS.set(fleet_jobs);
    let _ = CURRENT_REPLICAS.set(current_replicas);
    let _ = DESIRED_REPLICAS.set(desired_replicas);
    let _ = SCALE_ACTIONS_TOTAL.set(scale_actions_total);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns an explanatory comment line instead when the registry has not
/// been initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
