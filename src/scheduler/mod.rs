//! Decentralized job scheduling.
//!
//! Every worker pod runs one [`JobScheduler`]. There is no central
//! dispatcher: pods discover work by polling the shared store and claim it
//! with a single-path transaction.
//!
//! - **JobScheduler**: claim, run, heartbeat and reconcile loop
//! - **JobExecutor**: strategy that performs a claimed job
//! - **RequestedJob**: scheduling record with FIFO ordering
//! - **RecoveryPolicy**: heartbeat staleness and retry budget
//! - **RemovalBranch**: owner-aware removal of cancelled jobs
//! - **ShutdownState**: graceful drain state machine
//!
//! # Architecture
//!
//! ```text
//!                     ┌──────────────┐
//!                     │   Producer   │
//!                     └──────┬───────┘
//!                            │ requestedJobs/{ns}/{id}
//!                     ┌──────▼───────┐
//!                     │  Job store   │
//!                     └──────┬───────┘
//!          claim (tx)        │        heartbeat / recover
//!        ┌───────────────────┼───────────────────┐
//!        ▼                   ▼                   ▼
//!   ┌─────────┐         ┌─────────┐         ┌─────────┐
//!   │  Pod 1  │         │  Pod 2  │         │  Pod N  │
//!   └─────────┘         └─────────┘         └─────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use genfleet::scheduler::{JobScheduler, SchedulerConfig, StoreBackedExecutor, HttpJobHandler};
//! use genfleet::store::MemoryJobStore;
//! use genfleet::orchestrator::LocalProbe;
//!
//! let store = Arc::new(MemoryJobStore::new());
//! let executor = StoreBackedExecutor::new(store.clone(), HttpJobHandler::new("http://workflow")?);
//! let config = SchedulerConfig::new("pod-0", vec!["summarizer".to_string()]);
//!
//! let mut scheduler = JobScheduler::new(
//!     config,
//!     store,
//!     Arc::new(LocalProbe::new("pod-0")),
//!     Arc::new(executor),
//! )?;
//! let handle = scheduler.handle();
//! tokio::spawn(async move { scheduler.run().await });
//!
//! // Graceful drain
//! handle.request_shutdown();
//! ```

pub mod coordinator;
pub mod executor;
pub mod job;
pub mod job_id;
pub mod recovery;
pub mod removal;
pub mod shutdown;

pub use coordinator::{JobScheduler, PollReport, SchedulerConfig, SchedulerHandle};
pub use executor::{HttpJobHandler, JobContext, JobExecutor, JobHandler, StoreBackedExecutor};
pub use job::{JobStatus, RemovalFlag, RequestedJob};
pub use job_id::{is_valid_job_id, namespace_for};
pub use recovery::{RecoveryPolicy, StaleAction};
pub use removal::{request_removal, RemovalBranch};
pub use shutdown::{install_shutdown_handler, ShutdownState};
