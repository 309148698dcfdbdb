//! Per-process job coordinator.
//!
//! A `JobScheduler` polls the shared store on a fixed interval and, on every
//! poll, in this order:
//!
//! 1. reads every RequestedJob of its namespaces into one snapshot
//! 2. handles removal requests
//! 3. reaps finished job tasks
//! 4. claims new jobs in FIFO order, unless draining
//! 5. heartbeats every job it runs
//! 6. rewrites queue positions of waiting jobs
//! 7. reclaims jobs from dead pods and from pods with stale heartbeats
//!
//! Claims are the only serialized step (a single-path store transaction);
//! everything else is an optimistic write that the next poll reconciles.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::executor::{JobContext, JobExecutor};
use super::job::{
    clear_assignment, claim_transform, failed_patch, fifo_order, heartbeat_patch, is_claimed_by,
    reset_patch, sort_fifo, waiting_count_patch, RemovalFlag, RequestedJob,
};
use super::job_id::{is_known_namespace, namespace_for};
use super::recovery::{RecoveryPolicy, StaleAction};
use super::removal::{self, RemovalBranch};
use super::shutdown::ShutdownState;
use crate::clock::{epoch_seconds, Clock, SystemClock};
use crate::error::{ExecutorError, SchedulerError, StoreError};
use crate::metrics::{MetricsCollector, RecoveryOutcome};
use crate::orchestrator::PodLivenessProbe;
use crate::store::{JobStore, StorePaths};

/// Default delay between polls.
pub const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(2);

/// Default number of jobs one process runs at once.
pub const DEFAULT_MAX_CONCURRENT_JOBS: usize = 3;

/// Default pause between the deletes of one removal.
pub const DEFAULT_DELETE_PAUSE: Duration = Duration::from_millis(500);

/// How long a cancelled job gets to stop on its own before its task is aborted.
const CANCEL_GRACE: Duration = Duration::from_secs(10);

/// Configuration for a scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Identity written into `assignedPodId`.
    pub pod_id: String,
    /// Namespaces (queues) this instance serves.
    pub namespaces: Vec<String>,
    /// Delay between polls.
    pub polling_interval: Duration,
    /// Upper bound on concurrently running jobs.
    pub max_concurrent_jobs: usize,
    /// Heartbeat staleness rules for foreign jobs.
    pub recovery: RecoveryPolicy,
    /// Pause between the deletes of one removal.
    pub delete_pause: Duration,
}

impl SchedulerConfig {
    pub fn new(pod_id: impl Into<String>, namespaces: Vec<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            namespaces,
            polling_interval: DEFAULT_POLLING_INTERVAL,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            recovery: RecoveryPolicy::default(),
            delete_pause: DEFAULT_DELETE_PAUSE,
        }
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_recovery_policy(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn with_delete_pause(mut self, pause: Duration) -> Self {
        self.delete_pause = pause;
        self
    }

    /// Checks that every namespace is served by a known id format.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.namespaces.is_empty() {
            return Err(SchedulerError::NoNamespaces);
        }
        if let Some(unknown) = self
            .namespaces
            .iter()
            .find(|ns| !is_known_namespace(ns))
        {
            return Err(SchedulerError::UnknownNamespace(unknown.clone()));
        }
        Ok(())
    }
}

/// Cloneable handle for requesting a drain from outside the loop.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    shutdown: CancellationToken,
}

impl SchedulerHandle {
    /// Starts a graceful drain. Idempotent.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// What one poll did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
    /// Jobs this pod claimed.
    pub claimed: Vec<String>,
    /// Local tasks reaped after finishing.
    pub finished: Vec<String>,
    /// Jobs whose removal request was carried out.
    pub removed: Vec<String>,
    /// Foreign jobs returned to the queue after a stale heartbeat.
    pub recovered: Vec<String>,
    /// Foreign jobs marked permanently failed.
    pub failed: Vec<String>,
    /// Foreign jobs whose dead owner was cleared.
    pub orphans_cleared: Vec<String>,
}

impl PollReport {
    /// Whether the poll changed nothing.
    pub fn is_idle(&self) -> bool {
        self.claimed.is_empty()
            && self.finished.is_empty()
            && self.removed.is_empty()
            && self.recovered.is_empty()
            && self.failed.is_empty()
            && self.orphans_cleared.is_empty()
    }
}

/// A job running on this pod.
struct ActiveJob {
    namespace: String,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), ExecutorError>>,
    started: Instant,
}

/// A RequestedJob from the latest store read, with the namespace it was
/// listed under.
#[derive(Debug, Clone)]
struct QueuedJob {
    namespace: String,
    job: RequestedJob,
}

/// One poll's view of the queues.
#[derive(Debug, Default)]
struct Snapshot {
    /// Schedulable jobs by id.
    jobs: HashMap<String, QueuedJob>,
    /// RequestedJob paths that exist but were not schedulable (unreadable or
    /// listed under the wrong namespace).
    skipped: HashSet<String>,
    /// Namespaces whose listing failed this poll.
    unlisted: HashSet<String>,
}

impl Snapshot {
    /// Whether this poll can tell that `job_id` has no RequestedJob.
    fn knows_absent(&self, namespace: &str, job_id: &str) -> bool {
        !self.unlisted.contains(namespace)
            && !self
                .skipped
                .contains(&StorePaths::requested_job(namespace, job_id))
    }
}

/// Claims, runs, heartbeats and reconciles jobs for one pod.
pub struct JobScheduler {
    config: SchedulerConfig,
    store: Arc<dyn JobStore>,
    probe: Arc<dyn PodLivenessProbe>,
    executor: Arc<dyn JobExecutor>,
    clock: Arc<dyn Clock>,
    metrics: MetricsCollector,
    active: HashMap<String, ActiveJob>,
    state: ShutdownState,
    shutdown: CancellationToken,
}

impl JobScheduler {
    /// Creates a scheduler.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration names no namespace or an
    /// unknown one.
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn JobStore>,
        probe: Arc<dyn PodLivenessProbe>,
        executor: Arc<dyn JobExecutor>,
    ) -> Result<Self, SchedulerError> {
        config.validate()?;

        Ok(Self {
            config,
            store,
            probe,
            executor,
            clock: Arc::new(SystemClock),
            metrics: MetricsCollector::new(),
            active: HashMap::new(),
            state: ShutdownState::Running,
            shutdown: CancellationToken::new(),
        })
    }

    /// Uses `clock` for every timestamp and age.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Drains when `token` is cancelled, e.g. by a signal handler.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn pod_id(&self) -> &str {
        &self.config.pod_id
    }

    pub fn state(&self) -> ShutdownState {
        self.state
    }

    /// Number of jobs currently running on this pod.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Ids of jobs currently running on this pod, sorted.
    pub fn active_job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cancellation token of a running job.
    pub fn cancellation_token(&self, job_id: &str) -> Option<CancellationToken> {
        self.active.get(job_id).map(|a| a.cancel.clone())
    }

    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Starts a graceful drain.
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Polls until drained, then terminates.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyTerminated` when called again after a
    /// previous run finished.
    pub async fn run(&mut self) -> Result<(), SchedulerError> {
        if self.state == ShutdownState::Terminated {
            return Err(SchedulerError::AlreadyTerminated);
        }

        info!(
            pod_id = %self.config.pod_id,
            namespaces = ?self.config.namespaces,
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            polling_interval_secs = self.config.polling_interval.as_secs_f64(),
            "Job scheduler started"
        );

        loop {
            let report = self.poll_once().await;
            if !report.is_idle() {
                debug!(
                    claimed = report.claimed.len(),
                    finished = report.finished.len(),
                    removed = report.removed.len(),
                    recovered = report.recovered.len(),
                    failed = report.failed.len(),
                    orphans_cleared = report.orphans_cleared.len(),
                    active = self.active.len(),
                    "Poll complete"
                );
            }

            if self.state == ShutdownState::Drained {
                break;
            }

            let interval = self.config.polling_interval;
            if self.state.accepts_new_jobs() {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = self.shutdown.cancelled() => {}
                }
            } else {
                tokio::time::sleep(interval).await;
            }
        }

        self.terminate().await;
        Ok(())
    }

    /// Runs one poll.
    ///
    /// Store failures inside a step are logged and skipped; the next poll
    /// retries them.
    pub async fn poll_once(&mut self) -> PollReport {
        let mut report = PollReport::default();
        if self.state >= ShutdownState::Drained {
            return report;
        }

        self.observe_shutdown_request();

        let mut snapshot = self.load_snapshot().await;
        self.process_removals(&mut snapshot, &mut report).await;
        self.reap_finished(&mut report).await;

        if self.state.is_draining() {
            self.state = self.state.on_active_count(self.active.len());
            if self.state == ShutdownState::Drained {
                info!(pod_id = %self.config.pod_id, "Graceful shutdown: no active jobs left");
                self.metrics.update_active_jobs(0);
                return report;
            }
        } else {
            self.claim_available(&mut snapshot, &mut report).await;
        }

        self.send_heartbeats().await;
        self.update_waiting_counts(&snapshot).await;
        self.reconcile_foreign_jobs(&snapshot, &mut report).await;

        self.metrics.update_active_jobs(self.active.len());
        report
    }

    /// Cancels any leftover jobs and marks the scheduler terminated.
    pub async fn terminate(&mut self) {
        if self.state == ShutdownState::Terminated {
            return;
        }

        let leftover: Vec<String> = self.active.keys().cloned().collect();
        if !leftover.is_empty() {
            warn!(count = leftover.len(), "Cancelling leftover jobs on termination");
        }
        for job_id in leftover {
            self.cancel_job(&job_id).await;
        }

        self.state = ShutdownState::Terminated;
        self.metrics.update_active_jobs(0);
        info!(pod_id = %self.config.pod_id, "Job scheduler terminated");
    }

    fn observe_shutdown_request(&mut self) {
        if self.shutdown.is_cancelled() && self.state == ShutdownState::Running {
            self.state = self.state.on_request();
            info!(
                pod_id = %self.config.pod_id,
                active = self.active.len(),
                "Graceful shutdown requested, no longer accepting new jobs"
            );
        }
    }

    fn now(&self) -> f64 {
        epoch_seconds(self.clock.now())
    }

    async fn load_snapshot(&self) -> Snapshot {
        let mut snapshot = Snapshot::default();

        for namespace in &self.config.namespaces {
            let listing = self
                .store
                .list_children(&StorePaths::requested_jobs(namespace))
                .await;
            let children = match listing {
                Ok(children) => children,
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Failed to list requested jobs");
                    snapshot.unlisted.insert(namespace.clone());
                    continue;
                }
            };

            for (job_id, value) in children {
                match namespace_for(&job_id) {
                    Some(ns) if ns == namespace.as_str() => {}
                    Some(ns) => {
                        debug!(job_id = %job_id, listed = %namespace, expected = %ns, "Job listed under wrong namespace, skipping");
                        snapshot
                            .skipped
                            .insert(StorePaths::requested_job(namespace, &job_id));
                        continue;
                    }
                    None => {
                        debug!(job_id = %job_id, "Invalid job id, skipping");
                        snapshot
                            .skipped
                            .insert(StorePaths::requested_job(namespace, &job_id));
                        continue;
                    }
                }

                match RequestedJob::from_value(&job_id, value) {
                    Ok(job) => {
                        snapshot.jobs.insert(
                            job_id,
                            QueuedJob {
                                namespace: namespace.clone(),
                                job,
                            },
                        );
                    }
                    Err(e) => {
                        warn!(job_id = %job_id, error = %e, "Malformed requested job, skipping");
                        snapshot
                            .skipped
                            .insert(StorePaths::requested_job(namespace, &job_id));
                    }
                }
            }
        }

        snapshot
    }

    async fn process_removals(&mut self, snapshot: &mut Snapshot, report: &mut PollReport) {
        for namespace in self.config.namespaces.clone() {
            if snapshot.unlisted.contains(&namespace) {
                debug!(namespace = %namespace, "Queue not readable this poll, deferring removals");
                continue;
            }

            let flags = match self
                .store
                .list_children(&StorePaths::job_states(&namespace))
                .await
            {
                Ok(flags) => flags,
                Err(e) => {
                    warn!(namespace = %namespace, error = %e, "Failed to list removal requests");
                    continue;
                }
            };

            let mut flagged: Vec<String> = flags
                .into_iter()
                .filter(|(_, value)| {
                    serde_json::from_value::<RemovalFlag>(value.clone())
                        .is_ok_and(|flag| flag.is_remove_requested)
                })
                .map(|(job_id, _)| job_id)
                .collect();
            flagged.sort();

            for job_id in flagged {
                if let Some(branch) = self.handle_removal(&namespace, &job_id, snapshot).await {
                    if branch != RemovalBranch::OwnedElsewhere {
                        report.removed.push(job_id);
                    }
                }
            }
        }
    }

    async fn handle_removal(
        &mut self,
        namespace: &str,
        job_id: &str,
        snapshot: &mut Snapshot,
    ) -> Option<RemovalBranch> {
        let requested = snapshot
            .jobs
            .get(job_id)
            .filter(|queued| queued.namespace == namespace)
            .map(|queued| &queued.job);

        let branch = match removal::classify(
            &self.config.pod_id,
            self.active.contains_key(job_id),
            requested,
        ) {
            Some(branch) => branch,
            None if !snapshot.knows_absent(namespace, job_id) => {
                debug!(job_id = %job_id, "RequestedJob present but unreadable, deferring removal");
                return None;
            }
            None => match self.store.get(&StorePaths::job(namespace, job_id)).await {
                Ok(record) => removal::classify_absent(record.is_some()),
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Failed to look up job record for removal");
                    return None;
                }
            },
        };

        if branch == RemovalBranch::OwnedElsewhere {
            debug!(job_id = %job_id, "Removal deferred to owning pod");
            return Some(branch);
        }

        info!(job_id = %job_id, namespace = %namespace, branch = %branch, "Handling removal request");
        if branch == RemovalBranch::Owned {
            self.cancel_job(job_id).await;
        }

        let paths = removal::removal_paths(branch, namespace, job_id);
        removal::delete_in_order(self.store.as_ref(), &paths, self.config.delete_pause).await;

        snapshot.jobs.remove(job_id);
        self.metrics.record_removal(branch.as_str());
        Some(branch)
    }

    /// Signals a running job to stop and waits for its task to end.
    async fn cancel_job(&mut self, job_id: &str) {
        let Some(mut active) = self.active.remove(job_id) else {
            return;
        };

        active.cancel.cancel();
        let finished = match tokio::time::timeout(CANCEL_GRACE, &mut active.handle).await {
            Ok(joined) => joined,
            Err(_) => {
                warn!(job_id = %job_id, "Job ignored cancellation, aborting task");
                active.handle.abort();
                (&mut active.handle).await
            }
        };

        match finished {
            Ok(Ok(())) => debug!(job_id = %job_id, "Job finished before cancellation took effect"),
            Ok(Err(e)) => debug!(job_id = %job_id, error = %e, "Job stopped"),
            Err(e) if e.is_cancelled() => debug!(job_id = %job_id, "Job task aborted"),
            Err(e) => warn!(job_id = %job_id, error = %e, "Job task failed while cancelling"),
        }

        self.metrics.record_job_finished(
            &active.namespace,
            "cancelled",
            active.started.elapsed().as_secs_f64(),
        );
    }

    async fn reap_finished(&mut self, report: &mut PollReport) {
        let finished: Vec<String> = self
            .active
            .iter()
            .filter(|(_, active)| active.handle.is_finished())
            .map(|(job_id, _)| job_id.clone())
            .collect();

        for job_id in finished {
            let Some(active) = self.active.remove(&job_id) else {
                continue;
            };
            let elapsed = active.started.elapsed().as_secs_f64();

            let outcome = match active.handle.await {
                Ok(Ok(())) => {
                    info!(job_id = %job_id, namespace = %active.namespace, elapsed_secs = elapsed, "Job finished");
                    "success"
                }
                Ok(Err(ExecutorError::Cancelled(_))) => {
                    info!(job_id = %job_id, "Job cancelled");
                    "cancelled"
                }
                Ok(Err(e)) => {
                    error!(job_id = %job_id, namespace = %active.namespace, error = %e, "Job failed");
                    "failure"
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Job task panicked");
                    "failure"
                }
            };

            self.metrics
                .record_job_finished(&active.namespace, outcome, elapsed);
            report.finished.push(job_id);
        }
    }

    async fn claim_available(&mut self, snapshot: &mut Snapshot, report: &mut PollReport) {
        let mut candidates: Vec<RequestedJob> = snapshot
            .jobs
            .values()
            .filter(|queued| queued.job.is_claimable() && !self.active.contains_key(&queued.job.id))
            .map(|queued| queued.job.clone())
            .collect();
        sort_fifo(&mut candidates);

        for candidate in candidates {
            if self.active.len() >= self.config.max_concurrent_jobs {
                break;
            }
            if self.shutdown.is_cancelled() {
                self.observe_shutdown_request();
                break;
            }

            let Some(namespace) = snapshot.jobs.get(&candidate.id).map(|q| q.namespace.clone()) else {
                continue;
            };

            match self.try_claim(&namespace, &candidate.id).await {
                Ok(Some(claimed)) => {
                    info!(
                        job_id = %candidate.id,
                        namespace = %namespace,
                        pod_id = %self.config.pod_id,
                        "Claimed job"
                    );
                    if let Some(queued) = snapshot.jobs.get_mut(&candidate.id) {
                        queued.job = claimed;
                    }
                    self.spawn_job(&namespace, &candidate.id);
                    self.metrics.record_claim(&namespace);
                    report.claimed.push(candidate.id);
                }
                Ok(None) => debug!(job_id = %candidate.id, "Claim lost to another pod"),
                Err(e) => warn!(job_id = %candidate.id, error = %e, "Claim failed"),
            }
        }
    }

    /// Atomically claims a job. Returns the claimed record, or `None` when
    /// the job is gone or someone else got it first.
    async fn try_claim(
        &self,
        namespace: &str,
        job_id: &str,
    ) -> Result<Option<RequestedJob>, StoreError> {
        let pod_id = self.config.pod_id.as_str();
        let now = self.now();

        let committed = self
            .store
            .transaction(
                &StorePaths::requested_job(namespace, job_id),
                &|current| claim_transform(current, pod_id, now),
            )
            .await?;

        // The store may no-op without reporting a conflict; ownership is
        // only proven by the committed value.
        if !is_claimed_by(committed.as_ref(), pod_id) {
            return Ok(None);
        }

        let claimed = committed
            .and_then(|value| RequestedJob::from_value(job_id, value).ok())
            .unwrap_or_else(|| {
                RequestedJob::new(job_id, 0.0).with_assigned_pod(pod_id)
            });
        Ok(Some(claimed))
    }

    fn spawn_job(&mut self, namespace: &str, job_id: &str) {
        let cancel = CancellationToken::new();
        let ctx = JobContext::new(job_id, namespace, &self.config.pod_id, cancel.clone());
        let executor = Arc::clone(&self.executor);
        let id = job_id.to_string();

        let handle = tokio::spawn(async move { executor.execute(ctx, &id).await });

        self.active.insert(
            job_id.to_string(),
            ActiveJob {
                namespace: namespace.to_string(),
                cancel,
                handle,
                started: Instant::now(),
            },
        );
    }

    async fn send_heartbeats(&self) {
        if self.active.is_empty() {
            return;
        }

        let patch = heartbeat_patch(self.now(), self.state.is_draining());
        let writes = self
            .active
            .iter()
            .filter(|(_, active)| !active.handle.is_finished())
            .map(|(job_id, active)| {
                let path = StorePaths::requested_job(&active.namespace, job_id);
                let patch = patch.clone();
                async move { (job_id, self.store.update(&path, patch).await) }
            });

        for (job_id, result) in join_all(writes).await {
            match result {
                Ok(true) => {}
                Ok(false) => debug!(job_id = %job_id, "Heartbeat skipped, record is gone"),
                Err(e) => warn!(job_id = %job_id, error = %e, "Heartbeat failed"),
            }
        }
    }

    async fn update_waiting_counts(&self, snapshot: &Snapshot) {
        for namespace in &self.config.namespaces {
            if snapshot.unlisted.contains(namespace) {
                continue;
            }

            let mut waiting: Vec<&RequestedJob> = snapshot
                .jobs
                .values()
                .filter(|queued| &queued.namespace == namespace && queued.job.is_claimable())
                .map(|queued| &queued.job)
                .collect();
            waiting.sort_by(|a, b| fifo_order(a, b));

            self.metrics.update_waiting_jobs(namespace, waiting.len());

            for (index, job) in waiting.iter().enumerate() {
                let position = index as u32 + 1;
                if job.waiting_job_count == Some(position) {
                    continue;
                }

                let path = StorePaths::requested_job(namespace, &job.id);
                match self.store.update(&path, waiting_count_patch(position)).await {
                    Ok(_) => debug!(job_id = %job.id, position, "Updated queue position"),
                    Err(e) => warn!(job_id = %job.id, error = %e, "Failed to update queue position"),
                }
            }
        }
    }

    async fn reconcile_foreign_jobs(&self, snapshot: &Snapshot, report: &mut PollReport) {
        let now = self.now();
        let mut liveness: HashMap<String, bool> = HashMap::new();

        let mut foreign: Vec<&QueuedJob> = snapshot
            .jobs
            .values()
            .filter(|queued| {
                queued
                    .job
                    .assigned_pod_id
                    .as_deref()
                    .is_some_and(|owner| owner != self.config.pod_id)
            })
            .collect();
        foreign.sort_by(|a, b| fifo_order(&a.job, &b.job));

        for queued in foreign {
            let Some(owner) = queued.job.assigned_pod_id.as_deref() else {
                continue;
            };
            let job_id = queued.job.id.as_str();
            let path = StorePaths::requested_job(&queued.namespace, job_id);

            let alive = match liveness.get(owner) {
                Some(alive) => *alive,
                None => {
                    let alive = self.probe.pod_is_running(owner).await;
                    liveness.insert(owner.to_string(), alive);
                    alive
                }
            };

            if !alive {
                match self.clear_orphan(&path, owner).await {
                    Ok(true) => {
                        warn!(job_id = %job_id, pod_id = %owner, "Owning pod is gone, cleared assignment");
                        self.metrics.record_recovery(RecoveryOutcome::Orphan);
                        report.orphans_cleared.push(job_id.to_string());
                    }
                    Ok(false) => {}
                    Err(e) => warn!(job_id = %job_id, error = %e, "Failed to clear orphaned job"),
                }
                continue;
            }

            match self.config.recovery.stale_action(&queued.job, now) {
                Some(StaleAction::Reset { recovery_count }) => {
                    match self.store.update(&path, reset_patch(recovery_count)).await {
                        Ok(_) => {
                            warn!(
                                job_id = %job_id,
                                pod_id = %owner,
                                recovery_count,
                                "Stale heartbeat, returned job to queue"
                            );
                            self.metrics.record_recovery(RecoveryOutcome::Reset);
                            report.recovered.push(job_id.to_string());
                        }
                        Err(e) => warn!(job_id = %job_id, error = %e, "Failed to reset stale job"),
                    }
                }
                Some(StaleAction::Fail) => {
                    match self.store.update(&path, failed_patch(now)).await {
                        Ok(_) => {
                            error!(
                                job_id = %job_id,
                                pod_id = %owner,
                                recovery_count = queued.job.recovery_count,
                                "Job exceeded its recovery budget, marked failed"
                            );
                            self.metrics.record_recovery(RecoveryOutcome::Failed);
                            report.failed.push(job_id.to_string());
                        }
                        Err(e) => warn!(job_id = %job_id, error = %e, "Failed to mark job failed"),
                    }
                }
                None => {}
            }
        }
    }

    /// Best-effort overwrite clearing a dead pod's assignment.
    ///
    /// Not a transaction: a claim landing between the read and the write can
    /// be undone, which leaves the job claimable again on the next poll.
    async fn clear_orphan(&self, path: &str, owner: &str) -> Result<bool, StoreError> {
        let Some(current) = self.store.get(path).await? else {
            return Ok(false);
        };
        if current.get("assignedPodId").and_then(Value::as_str) != Some(owner) {
            return Ok(false);
        }
        let Some(cleared) = clear_assignment(current) else {
            return Ok(false);
        };

        self.store.set(path, cleared).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::orchestrator::LocalProbe;
    use crate::store::MemoryJobStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct NoopExecutor;

    #[async_trait]
    impl JobExecutor for NoopExecutor {
        async fn execute(&self, ctx: JobContext, _job_id: &str) -> Result<(), ExecutorError> {
            ctx.cancel.cancelled().await;
            Err(ExecutorError::Cancelled(ctx.job_id))
        }
    }

    fn scheduler(store: Arc<MemoryJobStore>) -> JobScheduler {
        let config = SchedulerConfig::new("pod-a", vec!["summarizer".to_string()])
            .with_max_concurrent_jobs(1)
            .with_delete_pause(Duration::ZERO);
        JobScheduler::new(
            config,
            store,
            Arc::new(LocalProbe::new("pod-a")),
            Arc::new(NoopExecutor),
        )
        .expect("valid config")
        .with_clock(Arc::new(ManualClock::at_epoch_seconds(1_700_000_000)))
    }

    #[test]
    fn test_config_validation() {
        let config = SchedulerConfig::new("pod", vec![]);
        assert!(matches!(config.validate(), Err(SchedulerError::NoNamespaces)));

        let config = SchedulerConfig::new("pod", vec!["nope".to_string()]);
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::UnknownNamespace(ns)) if ns == "nope"
        ));

        let config = SchedulerConfig::new("pod", vec!["summarizer".to_string()]);
        assert!(config.validate().is_ok());
        assert_eq!(config.polling_interval, DEFAULT_POLLING_INTERVAL);
        assert_eq!(config.max_concurrent_jobs, DEFAULT_MAX_CONCURRENT_JOBS);
    }

    #[tokio::test]
    async fn test_claims_and_heartbeats() {
        let store = Arc::new(MemoryJobStore::new());
        let path = StorePaths::requested_job("summarizer", "summ-1700000000000-a");
        store
            .set(&path, json!({"createdAt": 1, "assignedPodId": null, "status": "pending"}))
            .await
            .expect("set");

        let mut scheduler = scheduler(store.clone());
        let report = scheduler.poll_once().await;
        assert_eq!(report.claimed, vec!["summ-1700000000000-a".to_string()]);
        assert_eq!(scheduler.active_count(), 1);

        let record = store.get(&path).await.expect("get").expect("record");
        assert_eq!(record["assignedPodId"], json!("pod-a"));
        assert_eq!(record["status"], json!("processing"));
        assert_eq!(record["lastHeartbeat"], json!(1_700_000_000.0));

        scheduler.terminate().await;
        assert_eq!(scheduler.state(), ShutdownState::Terminated);
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn test_skips_ids_in_wrong_namespace() {
        let store = Arc::new(MemoryJobStore::new());
        store
            .set(
                &StorePaths::requested_job("summarizer", "usgen-1700000000000-a"),
                json!({"createdAt": 1, "assignedPodId": null}),
            )
            .await
            .expect("set");
        store
            .set(
                &StorePaths::requested_job("summarizer", "garbage"),
                json!({"createdAt": 1, "assignedPodId": null}),
            )
            .await
            .expect("set");

        let mut scheduler = scheduler(store);
        let report = scheduler.poll_once().await;
        assert!(report.claimed.is_empty());
        assert_eq!(scheduler.active_count(), 0);
    }

    #[tokio::test]
    async fn test_run_after_terminate_is_rejected() {
        let store = Arc::new(MemoryJobStore::new());
        let mut scheduler = scheduler(store);
        scheduler.request_shutdown();
        scheduler.run().await.expect("drains immediately");
        assert_eq!(scheduler.state(), ShutdownState::Terminated);
        assert!(matches!(
            scheduler.run().await,
            Err(SchedulerError::AlreadyTerminated)
        ));
    }

    #[test]
    fn test_poll_report_idle() {
        let mut report = PollReport::default();
        assert!(report.is_idle());
        report.failed.push("x".to_string());
        assert!(!report.is_idle());
    }
}
