//! genfleet: distributed job scheduling and queue-driven autoscaling for
//! generator worker pods.
//!
//! Worker pods share a job store. Each pod claims jobs with a single-path
//! transaction, heartbeats them while they run and recovers jobs abandoned
//! by dead or silent pods. The oldest pod additionally resizes the worker
//! deployment to match the queue.

pub mod autoscaler;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod scheduler;
pub mod store;

// Re-export commonly used types
pub use autoscaler::{AutoscalerConfig, FleetAutoscaler, ScalingPolicy};
pub use config::{AppConfig, ConfigError};
pub use error::{AutoscalerError, ExecutorError, ProbeError, SchedulerError, StoreError};
pub use scheduler::{JobExecutor, JobScheduler, RequestedJob, SchedulerConfig};
pub use store::{JobStore, MemoryJobStore};
