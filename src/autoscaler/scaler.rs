//! Leader-elected fleet autoscaler.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::policy::{ScalingDecision, ScalingPolicy, ScalingState};
use crate::clock::{epoch_seconds, Clock, SystemClock};
use crate::error::{AutoscalerError, StoreError};
use crate::metrics::MetricsCollector;
use crate::orchestrator::{elect_leader, PodLivenessProbe};
use crate::scheduler::job::{JobStatus, RequestedJob};
use crate::scheduler::recovery::{RecoveryPolicy, DEFAULT_HEARTBEAT_TIMEOUT};
use crate::store::{JobStore, StorePaths};

/// Default delay between autoscaling cycles.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);

pub const DEFAULT_DEPLOYMENT_NAME: &str = "project-generator";

/// Configuration for the autoscaler loop.
#[derive(Debug, Clone)]
pub struct AutoscalerConfig {
    /// This pod's name, compared against the elected leader.
    pub pod_id: String,
    /// Namespaces whose queues count towards the load.
    pub namespaces: Vec<String>,
    /// Deployment to resize. Its pods carry the label `app={deployment_name}`.
    pub deployment_name: String,
    /// Service fronting the deployment. Informational.
    pub service_name: String,
    pub check_interval: Duration,
    /// Heartbeat age below which an assigned job counts as processing.
    pub heartbeat_timeout: Duration,
    pub policy: ScalingPolicy,
}

impl AutoscalerConfig {
    pub fn new(pod_id: impl Into<String>, namespaces: Vec<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            namespaces,
            deployment_name: DEFAULT_DEPLOYMENT_NAME.to_string(),
            service_name: DEFAULT_DEPLOYMENT_NAME.to_string(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            policy: ScalingPolicy::default(),
        }
    }

    pub fn with_deployment(mut self, deployment_name: impl Into<String>) -> Self {
        self.deployment_name = deployment_name.into();
        self
    }

    pub fn with_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: ScalingPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Label selector matching the deployment's pods.
    pub fn label_selector(&self) -> String {
        format!("app={}", self.deployment_name)
    }

    pub fn validate(&self) -> Result<(), AutoscalerError> {
        self.policy.validate()
    }
}

/// Job counts of one namespace or the whole fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetLoad {
    /// Jobs without an owner. Permanently failed jobs are included.
    pub waiting: u32,
    /// Owned jobs in `processing` with a fresh heartbeat.
    pub processing: u32,
    /// Permanently failed jobs, a subset of `waiting`.
    pub failed: u32,
}

impl FleetLoad {
    pub fn merge(self, other: FleetLoad) -> FleetLoad {
        FleetLoad {
            waiting: self.waiting + other.waiting,
            processing: self.processing + other.processing,
            failed: self.failed + other.failed,
        }
    }
}

/// Counts the RequestedJobs of `namespace`.
///
/// Records that do not parse are skipped.
pub async fn namespace_load(
    store: &dyn JobStore,
    namespace: &str,
    heartbeat_timeout: Duration,
    now: f64,
) -> Result<FleetLoad, StoreError> {
    let recovery = RecoveryPolicy {
        heartbeat_timeout,
        ..RecoveryPolicy::default()
    };
    let children = store
        .list_children(&StorePaths::requested_jobs(namespace))
        .await?;

    let mut load = FleetLoad::default();
    for (id, value) in children {
        let job = match RequestedJob::from_value(&id, value) {
            Ok(job) => job,
            Err(e) => {
                debug!(job_id = %id, error = %e, "Skipping unreadable RequestedJob");
                continue;
            }
        };

        if job.assigned_pod_id.is_none() {
            load.waiting += 1;
            if job.status == JobStatus::Failed {
                load.failed += 1;
            }
        } else if recovery.is_actively_processing(&job, now) {
            load.processing += 1;
        }
    }

    Ok(load)
}

/// Resizes the worker deployment to match queue load.
///
/// Every pod runs one; only the oldest pod of the deployment acts. The others
/// skip each cycle without touching the orchestrator.
pub struct FleetAutoscaler {
    config: AutoscalerConfig,
    store: Arc<dyn JobStore>,
    probe: Arc<dyn PodLivenessProbe>,
    clock: Arc<dyn Clock>,
    state: ScalingState,
    metrics: MetricsCollector,
}

impl FleetAutoscaler {
    pub fn new(
        config: AutoscalerConfig,
        store: Arc<dyn JobStore>,
        probe: Arc<dyn PodLivenessProbe>,
    ) -> Result<Self, AutoscalerError> {
        config.validate()?;

        Ok(Self {
            config,
            store,
            probe,
            clock: Arc::new(SystemClock),
            state: ScalingState::new(),
            metrics: MetricsCollector::new(),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &AutoscalerConfig {
        &self.config
    }

    pub fn state(&self) -> &ScalingState {
        &self.state
    }

    /// Whether this pod is the oldest pod of the deployment.
    ///
    /// Any listing failure means "not leader".
    pub async fn is_leader(&self) -> bool {
        match self.probe.list_pods(&self.config.label_selector()).await {
            Ok(pods) => match elect_leader(&pods) {
                Some(leader) => {
                    debug!(leader = %leader.name, pod_id = %self.config.pod_id, "Leader elected");
                    leader.name == self.config.pod_id
                }
                None => false,
            },
            Err(e) => {
                warn!(error = %e, "Failed to list pods for leader election");
                false
            }
        }
    }

    /// Counts waiting and processing jobs across all namespaces.
    pub async fn collect_load(&self) -> Result<FleetLoad, StoreError> {
        let now = epoch_seconds(self.clock.now());
        let mut total = FleetLoad::default();

        for namespace in &self.config.namespaces {
            let load = namespace_load(
                self.store.as_ref(),
                namespace,
                self.config.heartbeat_timeout,
                now,
            )
            .await?;
            total = total.merge(load);
        }

        Ok(total)
    }

    /// Runs one cycle.
    ///
    /// Returns `Ok(None)` when this pod is not the leader. A rejected replica
    /// change is logged and leaves the hysteresis state untouched, so the
    /// action is retried next cycle.
    pub async fn tick(&mut self) -> Result<Option<ScalingDecision>, AutoscalerError> {
        if !self.is_leader().await {
            return Ok(None);
        }

        let load = self.collect_load().await?;
        let current = self
            .probe
            .get_replicas(&self.config.deployment_name)
            .await?;

        let now = self.clock.now();
        let decision =
            self.state
                .decide(&self.config.policy, load.waiting, load.processing, current, now);

        self.metrics.record_scaling_observation(
            decision.waiting_job_count,
            decision.processing_job_count,
            decision.current_replicas,
            decision.desired_replicas,
        );

        debug!(
            waiting = decision.waiting_job_count,
            processing = decision.processing_job_count,
            current = decision.current_replicas,
            desired = decision.desired_replicas,
            idle_observations = decision.consecutive_scale_down_observations,
            "Autoscaling observation"
        );

        if let Some(direction) = decision.action {
            match self
                .probe
                .set_replicas(&self.config.deployment_name, decision.desired_replicas)
                .await
            {
                Ok(()) => {
                    self.state.record_scale(direction, now);
                    self.metrics.record_scale_action(direction.as_str());
                    info!(
                        deployment = %self.config.deployment_name,
                        direction = %direction,
                        from = decision.current_replicas,
                        to = decision.desired_replicas,
                        waiting = decision.waiting_job_count,
                        processing = decision.processing_job_count,
                        "Scaled deployment"
                    );
                }
                Err(e) => {
                    warn!(
                        deployment = %self.config.deployment_name,
                        direction = %direction,
                        error = %e,
                        "Failed to scale deployment"
                    );
                }
            }
        }

        Ok(Some(decision))
    }

    /// Runs cycles every `check_interval` until `shutdown` is cancelled.
    ///
    /// Cycle errors are logged and the loop carries on.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<(), AutoscalerError> {
        info!(
            pod_id = %self.config.pod_id,
            deployment = %self.config.deployment_name,
            service = %self.config.service_name,
            min_replicas = self.config.policy.min_replicas,
            max_replicas = self.config.policy.max_replicas,
            target_jobs_per_pod = self.config.policy.target_jobs_per_pod,
            "Autoscaler started"
        );

        loop {
            if let Err(e) = self.tick().await {
                warn!(error = %e, "Autoscaling cycle failed");
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Autoscaler stopped");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.config.check_interval) => {}
            }
        }
    }
}
