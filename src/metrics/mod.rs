//! Metrics module for Prometheus-based monitoring.
//!
//! Covers claims, active and waiting jobs, recoveries and removals on the
//! scheduler side, and observed load and replica counts on the autoscaler
//! side.
//!
//! # Example
//!
//! ```ignore
//! use genfleet::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//! let collector = MetricsCollector::new();
//! collector.record_claim("summarizer");
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::{MetricsCollector, RecoveryOutcome};
pub use self::prometheus::{export_metrics, init_metrics};

pub use self::prometheus::{
    ACTIVE_JOBS, CURRENT_REPLICAS, DESIRED_REPLICAS, FLEET_JOBS, JOBS_CLAIMED_TOTAL,
    JOB_DURATION, RECOVERIES_TOTAL, REGISTRY, REMOVALS_TOTAL, SCALE_ACTIONS_TOTAL, WAITING_JOBS,
};
