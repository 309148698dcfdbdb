//! Shared fixtures for integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use genfleet::clock::ManualClock;
use genfleet::error::{ExecutorError, ProbeError, StoreError};
use genfleet::orchestrator::{PodInfo, PodLivenessProbe, PodPhase};
use genfleet::scheduler::{JobContext, JobExecutor, JobScheduler, SchedulerConfig};
use genfleet::store::{JobStore, MemoryJobStore, StorePaths, TransactionFn};

pub const NS: &str = "summarizer";
pub const START: i64 = 1_700_000_000;

/// Builds a summarizer job id.
pub fn job_id(n: u32) -> String {
    format!("summ-{}-j{}", 1_700_000_000_000u64 + n as u64, n)
}

/// Writes a pending RequestedJob plus its JobRecord.
pub async fn submit(store: &MemoryJobStore, id: &str, created_at: f64) {
    store
        .set(
            &StorePaths::requested_job(NS, id),
            json!({"createdAt": created_at, "assignedPodId": null, "status": "pending"}),
        )
        .await
        .expect("write requested job");
    store
        .set(
            &StorePaths::job(NS, id),
            json!({"state": {"inputs": {"id": id}}}),
        )
        .await
        .expect("write job record");
}

pub async fn requested(store: &MemoryJobStore, id: &str) -> Option<Value> {
    store
        .get(&StorePaths::requested_job(NS, id))
        .await
        .expect("read requested job")
}

/// Orchestrator stand-in whose answers are set by the test.
#[derive(Debug, Default)]
pub struct ScriptedProbe {
    phases: Mutex<HashMap<String, PodPhase>>,
    pods: Mutex<Vec<PodInfo>>,
    replicas: AtomicU32,
    pub fail_listing: AtomicBool,
    pub fail_get_replicas: AtomicBool,
    pub fail_set_replicas: AtomicBool,
    set_calls: Mutex<Vec<u32>>,
}

impl ScriptedProbe {
    pub fn new(replicas: u32) -> Self {
        Self {
            replicas: AtomicU32::new(replicas),
            ..Default::default()
        }
    }

    /// Registers a running pod created at `created` epoch seconds.
    pub fn add_pod(&self, name: &str, created: i64) {
        let creation_timestamp: DateTime<Utc> =
            DateTime::from_timestamp(created, 0).expect("valid timestamp");
        self.phases
            .lock()
            .expect("lock")
            .insert(name.to_string(), PodPhase::Running);
        self.pods.lock().expect("lock").push(PodInfo {
            name: name.to_string(),
            creation_timestamp,
            phase: PodPhase::Running,
        });
    }

    /// Makes a pod disappear from the orchestrator.
    pub fn kill_pod(&self, name: &str) {
        self.phases.lock().expect("lock").remove(name);
        self.pods.lock().expect("lock").retain(|p| p.name != name);
    }

    pub fn replicas(&self) -> u32 {
        self.replicas.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> Vec<u32> {
        self.set_calls.lock().expect("lock").clone()
    }
}

#[async_trait]
impl PodLivenessProbe for ScriptedProbe {
    async fn pod_phase(&self, pod_id: &str) -> Result<Option<PodPhase>, ProbeError> {
        Ok(self.phases.lock().expect("lock").get(pod_id).copied())
    }

    async fn list_pods(&self, _label_selector: &str) -> Result<Vec<PodInfo>, ProbeError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ProbeError::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(self.pods.lock().expect("lock").clone())
    }

    async fn get_replicas(&self, _deployment: &str) -> Result<u32, ProbeError> {
        if self.fail_get_replicas.load(Ordering::SeqCst) {
            return Err(ProbeError::Api {
                status: 500,
                message: "boom".to_string(),
            });
        }
        Ok(self.replicas())
    }

    async fn set_replicas(&self, _deployment: &str, replicas: u32) -> Result<(), ProbeError> {
        self.set_calls.lock().expect("lock").push(replicas);
        if self.fail_set_replicas.load(Ordering::SeqCst) {
            return Err(ProbeError::Api {
                status: 409,
                message: "conflict".to_string(),
            });
        }
        self.replicas.store(replicas, Ordering::SeqCst);
        Ok(())
    }
}

/// Executor whose jobs run until released or cancelled.
///
/// A released job deletes its RequestedJob like a real executor does on
/// success.
pub struct GatedExecutor {
    store: Arc<MemoryJobStore>,
    release: CancellationToken,
    started: Mutex<Vec<String>>,
}

impl GatedExecutor {
    pub fn new(store: Arc<MemoryJobStore>) -> Self {
        Self {
            store,
            release: CancellationToken::new(),
            started: Mutex::new(Vec::new()),
        }
    }

    /// Lets every running and future job finish successfully.
    pub fn release_all(&self) {
        self.release.cancel();
    }

    /// Job ids in the order they started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().expect("lock").clone()
    }
}

#[async_trait]
impl JobExecutor for GatedExecutor {
    async fn execute(&self, ctx: JobContext, job_id: &str) -> Result<(), ExecutorError> {
        self.started.lock().expect("lock").push(job_id.to_string());

        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ExecutorError::Cancelled(job_id.to_string())),
            _ = self.release.cancelled() => {
                self.store
                    .delete(&StorePaths::requested_job(&ctx.namespace, job_id))
                    .await?;
                Ok(())
            }
        }
    }
}

/// Store wrapper that fails chosen operations until told otherwise.
pub struct FlakyStore {
    inner: Arc<MemoryJobStore>,
    /// Listing of `requestedJobs/...` fails.
    pub fail_requested_listing: AtomicBool,
    /// Every `update` fails.
    pub fail_updates: AtomicBool,
    /// Every `transaction` fails.
    pub fail_transactions: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryJobStore>) -> Self {
        Self {
            inner,
            fail_requested_listing: AtomicBool::new(false),
            fail_updates: AtomicBool::new(false),
            fail_transactions: AtomicBool::new(false),
        }
    }

    /// Clears every injected failure.
    pub fn heal(&self) {
        self.fail_requested_listing.store(false, Ordering::SeqCst);
        self.fail_updates.store(false, Ordering::SeqCst);
        self.fail_transactions.store(false, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> Result<(), StoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(StoreError::ConnectionFailed("connection reset".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl JobStore for FlakyStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get(path).await
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        self.inner.set(path, value).await
    }

    async fn update(&self, path: &str, partial: Map<String, Value>) -> Result<bool, StoreError> {
        Self::check(&self.fail_updates)?;
        self.inner.update(path, partial).await
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        self.inner.delete(path).await
    }

    async fn list_children(&self, path: &str) -> Result<HashMap<String, Value>, StoreError> {
        if path.starts_with("requestedJobs") {
            Self::check(&self.fail_requested_listing)?;
        }
        self.inner.list_children(path).await
    }

    async fn transaction(
        &self,
        path: &str,
        update: TransactionFn<'_>,
    ) -> Result<Option<Value>, StoreError> {
        Self::check(&self.fail_transactions)?;
        self.inner.transaction(path, update).await
    }
}

/// Gated executor whose chosen jobs fail or panic instead.
pub struct FaultyExecutor {
    inner: GatedExecutor,
    failing: Mutex<HashSet<String>>,
    panicking: Mutex<HashSet<String>>,
}

impl FaultyExecutor {
    pub fn new(store: Arc<MemoryJobStore>) -> Self {
        Self {
            inner: GatedExecutor::new(store),
            failing: Mutex::new(HashSet::new()),
            panicking: Mutex::new(HashSet::new()),
        }
    }

    pub fn fail(&self, job_id: &str) {
        self.failing.lock().expect("lock").insert(job_id.to_string());
    }

    pub fn panic_on(&self, job_id: &str) {
        self.panicking.lock().expect("lock").insert(job_id.to_string());
    }

    pub fn release_all(&self) {
        self.inner.release_all();
    }
}

#[async_trait]
impl JobExecutor for FaultyExecutor {
    async fn execute(&self, ctx: JobContext, job_id: &str) -> Result<(), ExecutorError> {
        if self.panicking.lock().expect("lock").contains(job_id) {
            panic!("job body crashed on {job_id}");
        }
        if self.failing.lock().expect("lock").contains(job_id) {
            return Err(ExecutorError::Workflow(format!("bad inputs for {job_id}")));
        }
        self.inner.execute(ctx, job_id).await
    }
}

/// A scheduler for `pod_id` serving the summarizer namespace.
pub fn scheduler(
    pod_id: &str,
    max_concurrent_jobs: usize,
    store: Arc<MemoryJobStore>,
    probe: Arc<ScriptedProbe>,
    executor: Arc<GatedExecutor>,
    clock: Arc<ManualClock>,
) -> JobScheduler {
    scheduler_with(pod_id, max_concurrent_jobs, store, probe, executor, clock)
}

/// Like [`scheduler`], over any store and executor.
pub fn scheduler_with(
    pod_id: &str,
    max_concurrent_jobs: usize,
    store: Arc<dyn JobStore>,
    probe: Arc<ScriptedProbe>,
    executor: Arc<dyn JobExecutor>,
    clock: Arc<ManualClock>,
) -> JobScheduler {
    let config = SchedulerConfig::new(pod_id, vec![NS.to_string()])
        .with_max_concurrent_jobs(max_concurrent_jobs)
        .with_polling_interval(Duration::from_millis(10))
        .with_delete_pause(Duration::ZERO);

    JobScheduler::new(config, store, probe, executor)
        .expect("valid scheduler config")
        .with_clock(clock)
}

/// Waits until spawned job tasks get a chance to run.
pub async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
}
