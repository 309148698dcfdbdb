//! Process configuration.
//!
//! Everything is read from environment variables, so one container image
//! serves every namespace and environment. Builder methods exist for tests.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::autoscaler::scaler::{DEFAULT_CHECK_INTERVAL, DEFAULT_DEPLOYMENT_NAME};
use crate::autoscaler::{AutoscalerConfig, ScalingPolicy};
use crate::scheduler::coordinator::{
    DEFAULT_DELETE_PAUSE, DEFAULT_MAX_CONCURRENT_JOBS, DEFAULT_POLLING_INTERVAL,
};
use crate::scheduler::job_id::{is_known_namespace, USER_STORY_NAMESPACE};
use crate::scheduler::recovery::{DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_MAX_RECOVERY_COUNT};
use crate::scheduler::{RecoveryPolicy, SchedulerConfig};

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Backing store for job data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    /// Process-local; only useful for single-pod local runs.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "redis" => Ok(StoreBackend::Redis),
            "memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreBackend::Redis => write!(f, "redis"),
            StoreBackend::Memory => write!(f, "memory"),
        }
    }
}

/// Configuration for one worker process.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // Identity
    /// Name of this pod; written into `assignedPodId`.
    pub pod_id: String,
    /// Namespaces served by this process.
    pub namespaces: Vec<String>,

    // Scheduler settings
    pub polling_interval: Duration,
    pub max_concurrent_jobs: usize,
    pub heartbeat_timeout: Duration,
    pub max_recovery_count: u32,
    /// Pause between the deletes of one removal.
    pub delete_pause: Duration,

    // Store settings
    pub store_backend: StoreBackend,
    pub redis_url: String,
    /// Prefix of every Redis key.
    pub store_key_prefix: String,

    // Environment
    /// Running outside the cluster.
    pub is_local_run: bool,
    pub environment: Option<String>,

    // Autoscaler settings
    /// Kubernetes namespace of the deployment.
    pub k8s_namespace: String,
    pub deployment_name: String,
    pub service_name: String,
    pub check_interval: Duration,
    pub scaling: ScalingPolicy,

    // Workflow settings
    /// Base URL of the workflow service that runs job bodies.
    pub workflow_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pod_id: "local-pod".to_string(),
            namespaces: vec![USER_STORY_NAMESPACE.to_string()],

            polling_interval: DEFAULT_POLLING_INTERVAL,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            max_recovery_count: DEFAULT_MAX_RECOVERY_COUNT,
            delete_pause: DEFAULT_DELETE_PAUSE,

            store_backend: StoreBackend::Redis,
            redis_url: "redis://localhost:6379".to_string(),
            store_key_prefix: "genfleet".to_string(),

            is_local_run: false,
            environment: None,

            k8s_namespace: "default".to_string(),
            deployment_name: DEFAULT_DEPLOYMENT_NAME.to_string(),
            service_name: "project-generator-service".to_string(),
            check_interval: DEFAULT_CHECK_INTERVAL,
            scaling: ScalingPolicy::default(),

            workflow_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `POD_ID`: Pod identity (fallback: `HOSTNAME`, then `local-pod`)
    /// - `JOB_NAMESPACES`: Comma-separated namespaces (default: user_story_generator)
    /// - `JOB_POLLING_INTERVAL_SECS`: Poll interval (default: 2)
    /// - `MAX_CONCURRENT_JOBS`: Concurrent jobs per process (default: 3)
    /// - `JOB_HEARTBEAT_TIMEOUT_SECS`: Heartbeat staleness threshold (default: 300)
    /// - `JOB_MAX_RECOVERY_COUNT`: Stale resets before failing (default: 1)
    /// - `JOB_DELETE_PAUSE_MS`: Pause between removal deletes (default: 500)
    /// - `STORE_BACKEND`: `redis` or `memory` (default: redis)
    /// - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
    /// - `STORE_KEY_PREFIX`: Redis key prefix (default: genfleet)
    /// - `IS_LOCAL_RUN`: Out-of-cluster run (default: false)
    /// - `ENVIRONMENT`: Deployment environment; `development` disables autoscaling
    /// - `AUTO_SCALE_NAMESPACE`: Kubernetes namespace (default: default)
    /// - `AUTO_SCALE_DEPLOYMENT_NAME`: Deployment to scale (default: project-generator)
    /// - `AUTO_SCALE_SERVICE_NAME`: Service name (default: project-generator-service)
    /// - `AUTO_SCALE_MIN_REPLICAS` / `AUTO_SCALE_MAX_REPLICAS`: Bounds (default: 1 / 3)
    /// - `AUTO_SCALE_TARGET_JOBS_PER_POD`: Jobs per pod (default: 1)
    /// - `AUTO_SCALE_CHECK_INTERVAL_SECS`: Cycle interval (default: 60)
    /// - `AUTO_SCALE_UP_COOLDOWN_SECS`: Scale-up cooldown (default: 120)
    /// - `AUTO_SCALE_DOWN_COOLDOWN_SECS`: Scale-down cooldown (default: 1800)
    /// - `AUTO_SCALE_DOWN_GRACE_SECS`: Scale-down grace period (default: 3600)
    /// - `AUTO_SCALE_DOWN_OBSERVATIONS`: Idle cycles before scale-down (default: 5)
    /// - `WORKFLOW_ENDPOINT`: Workflow service base URL
    /// - `LOG_LEVEL`: Log filter (default: info)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result is
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Identity
        if let Some(val) = lookup("POD_ID").or_else(|| lookup("HOSTNAME")) {
            config.pod_id = val;
        }

        if let Some(val) = lookup("JOB_NAMESPACES") {
            config.namespaces = parse_list(&val);
        }

        // Scheduler settings
        if let Some(val) = lookup("JOB_POLLING_INTERVAL_SECS") {
            let secs: f64 = parse_env_value(&val, "JOB_POLLING_INTERVAL_SECS")?;
            config.polling_interval = parse_seconds(secs, "JOB_POLLING_INTERVAL_SECS")?;
        }

        if let Some(val) = lookup("MAX_CONCURRENT_JOBS") {
            config.max_concurrent_jobs = parse_env_value(&val, "MAX_CONCURRENT_JOBS")?;
        }

        if let Some(val) = lookup("JOB_HEARTBEAT_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "JOB_HEARTBEAT_TIMEOUT_SECS")?;
            config.heartbeat_timeout = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("JOB_MAX_RECOVERY_COUNT") {
            config.max_recovery_count = parse_env_value(&val, "JOB_MAX_RECOVERY_COUNT")?;
        }

        if let Some(val) = lookup("JOB_DELETE_PAUSE_MS") {
            let millis: u64 = parse_env_value(&val, "JOB_DELETE_PAUSE_MS")?;
            config.delete_pause = Duration::from_millis(millis);
        }

        // Store settings
        if let Some(val) = lookup("STORE_BACKEND") {
            config.store_backend = val.parse().map_err(|message| ConfigError::InvalidValue {
                key: "STORE_BACKEND".to_string(),
                message,
            })?;
        }

        if let Some(val) = lookup("REDIS_URL") {
            config.redis_url = val;
        }

        if let Some(val) = lookup("STORE_KEY_PREFIX") {
            config.store_key_prefix = val;
        }

        // Environment
        if let Some(val) = lookup("IS_LOCAL_RUN") {
            config.is_local_run = parse_env_bool(&val, "IS_LOCAL_RUN")?;
        }

        config.environment = lookup("ENVIRONMENT").filter(|v| !v.trim().is_empty());

        // Autoscaler settings
        if let Some(val) = lookup("AUTO_SCALE_NAMESPACE") {
            config.k8s_namespace = val;
        }

        if let Some(val) = lookup("AUTO_SCALE_DEPLOYMENT_NAME") {
            config.deployment_name = val;
        }

        if let Some(val) = lookup("AUTO_SCALE_SERVICE_NAME") {
            config.service_name = val;
        }

        if let Some(val) = lookup("AUTO_SCALE_MIN_REPLICAS") {
            config.scaling.min_replicas = parse_env_value(&val, "AUTO_SCALE_MIN_REPLICAS")?;
        }

        if let Some(val) = lookup("AUTO_SCALE_MAX_REPLICAS") {
            config.scaling.max_replicas = parse_env_value(&val, "AUTO_SCALE_MAX_REPLICAS")?;
        }

        if let Some(val) = lookup("AUTO_SCALE_TARGET_JOBS_PER_POD") {
            config.scaling.target_jobs_per_pod =
                parse_env_value(&val, "AUTO_SCALE_TARGET_JOBS_PER_POD")?;
        }

        if let Some(val) = lookup("AUTO_SCALE_CHECK_INTERVAL_SECS") {
            let secs: u64 = parse_env_value(&val, "AUTO_SCALE_CHECK_INTERVAL_SECS")?;
            config.check_interval = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("AUTO_SCALE_UP_COOLDOWN_SECS") {
            let secs: u64 = parse_env_value(&val, "AUTO_SCALE_UP_COOLDOWN_SECS")?;
            config.scaling.scale_up_cooldown = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("AUTO_SCALE_DOWN_COOLDOWN_SECS") {
            let secs: u64 = parse_env_value(&val, "AUTO_SCALE_DOWN_COOLDOWN_SECS")?;
            config.scaling.scale_down_cooldown = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("AUTO_SCALE_DOWN_GRACE_SECS") {
            let secs: u64 = parse_env_value(&val, "AUTO_SCALE_DOWN_GRACE_SECS")?;
            config.scaling.scale_down_grace_period = Duration::from_secs(secs);
        }

        if let Some(val) = lookup("AUTO_SCALE_DOWN_OBSERVATIONS") {
            config.scaling.scale_down_observations =
                parse_env_value(&val, "AUTO_SCALE_DOWN_OBSERVATIONS")?;
        }

        // Workflow settings
        config.workflow_endpoint = lookup("WORKFLOW_ENDPOINT").filter(|v| !v.trim().is_empty());

        if let Some(val) = lookup("LOG_LEVEL") {
            config.log_level = val;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pod_id.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "pod_id cannot be empty".to_string(),
            ));
        }

        if self.namespaces.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "namespaces cannot be empty".to_string(),
            ));
        }

        if let Some(unknown) = self.namespaces.iter().find(|ns| !is_known_namespace(ns)) {
            return Err(ConfigError::ValidationFailed(format!(
                "unknown namespace '{}'",
                unknown
            )));
        }

        if self.polling_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "polling_interval must be greater than 0".to_string(),
            ));
        }

        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_concurrent_jobs must be greater than 0".to_string(),
            ));
        }

        if self.scaling.target_jobs_per_pod == 0 {
            return Err(ConfigError::ValidationFailed(
                "target_jobs_per_pod must be greater than 0".to_string(),
            ));
        }

        if self.scaling.min_replicas > self.scaling.max_replicas {
            return Err(ConfigError::ValidationFailed(format!(
                "min_replicas ({}) cannot exceed max_replicas ({})",
                self.scaling.min_replicas, self.scaling.max_replicas
            )));
        }

        if self.check_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "check_interval must be greater than 0".to_string(),
            ));
        }

        if self.store_backend == StoreBackend::Redis && self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether this process should run the autoscaler.
    pub fn autoscaler_enabled(&self) -> bool {
        !self.is_local_run && self.environment.as_deref() != Some("development")
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig::new(self.pod_id.clone(), self.namespaces.clone())
            .with_polling_interval(self.polling_interval)
            .with_max_concurrent_jobs(self.max_concurrent_jobs)
            .with_recovery_policy(RecoveryPolicy::new(
                self.heartbeat_timeout,
                self.max_recovery_count,
            ))
            .with_delete_pause(self.delete_pause)
    }

    pub fn autoscaler_config(&self) -> AutoscalerConfig {
        AutoscalerConfig::new(self.pod_id.clone(), self.namespaces.clone())
            .with_deployment(self.deployment_name.clone())
            .with_service(self.service_name.clone())
            .with_check_interval(self.check_interval)
            .with_heartbeat_timeout(self.heartbeat_timeout)
            .with_policy(self.scaling.clone())
    }

    /// Builder method to set the pod id.
    pub fn with_pod_id(mut self, pod_id: impl Into<String>) -> Self {
        self.pod_id = pod_id.into();
        self
    }

    /// Builder method to set the served namespaces.
    pub fn with_namespaces(mut self, namespaces: Vec<String>) -> Self {
        self.namespaces = namespaces;
        self
    }

    pub fn with_polling_interval(mut self, interval: Duration) -> Self {
        self.polling_interval = interval;
        self
    }

    pub fn with_max_concurrent_jobs(mut self, max: usize) -> Self {
        self.max_concurrent_jobs = max;
        self
    }

    pub fn with_store_backend(mut self, backend: StoreBackend) -> Self {
        self.store_backend = backend;
        self
    }

    pub fn with_local_run(mut self, is_local_run: bool) -> Self {
        self.is_local_run = is_local_run;
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_scaling_policy(mut self, scaling: ScalingPolicy) -> Self {
        self.scaling = scaling;
        self
    }

    pub fn with_workflow_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.workflow_endpoint = Some(endpoint.into());
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

fn parse_seconds(secs: f64, key: &str) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: e.to_string(),
    })
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
