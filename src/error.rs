//! Error types for genfleet operations.
//!
//! One enum per subsystem:
//! - Shared job store access
//! - Orchestrator (pod liveness, replica control)
//! - Job execution
//! - Scheduler and autoscaler loops
//!
//! Claim races are not errors; a lost claim is simply not reported as a claim.

use thiserror::Error;

/// Errors that can occur while talking to the shared job store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Redis operation failed: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid store path '{0}'")]
    InvalidPath(String),

    #[error("Value at '{0}' is not an object")]
    NotAnObject(String),

    #[error("Transaction on '{path}' kept conflicting after {attempts} attempts")]
    TransactionConflict { path: String, attempts: u32 },
}

/// Errors that can occur while querying or mutating the orchestrator.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Not running inside a cluster: {0}")]
    NotInCluster(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Orchestrator API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Unexpected orchestrator response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by a job body.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Job {0} was cancelled")]
    Cancelled(String),

    #[error("Job record for {0} not found")]
    MissingRecord(String),

    #[error("Job {job_id} has no inputs")]
    MissingInputs { job_id: String },

    #[error("Workflow failed: {0}")]
    Workflow(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

/// Errors that stop a scheduler instance.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Unknown namespace '{0}'")]
    UnknownNamespace(String),

    #[error("No namespaces to monitor")]
    NoNamespaces,

    #[error("Invalid job id '{0}'")]
    InvalidJobId(String),

    #[error("Scheduler has already terminated")]
    AlreadyTerminated,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors that stop the autoscaler loop.
#[derive(Debug, Error)]
pub enum AutoscalerError {
    #[error("Invalid scaling bounds: min {min} > max {max}")]
    InvalidBounds { min: u32, max: u32 },

    #[error("target_jobs_per_pod must be greater than 0")]
    ZeroTarget,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Orchestrator error: {0}")]
    Probe(#[from] ProbeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::TransactionConflict {
            path: "requestedJobs/summarizer/summ-1".to_string(),
            attempts: 8,
        };
        assert!(err.to_string().contains("summ-1"));
        assert!(err.to_string().contains('8'));

        let err = StoreError::InvalidPath("".to_string());
        assert!(err.to_string().contains("Invalid store path"));
    }

    #[test]
    fn test_probe_error_display() {
        let err = ProbeError::Api {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert!(err.to_string().contains("403"));
        assert!(err.to_string().contains("forbidden"));
    }

    #[test]
    fn test_executor_error_from_store() {
        let err: ExecutorError = StoreError::ConnectionFailed("refused".to_string()).into();
        assert!(err.to_string().contains("refused"));
    }
}
