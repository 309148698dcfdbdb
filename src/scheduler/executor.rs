//! Job execution strategy.
//!
//! The scheduler only knows [`JobExecutor`]: it hands over a claimed job and
//! awaits the result in a background task. [`StoreBackedExecutor`] is the
//! production implementation. It reads the job payload from the store, runs a
//! [`JobHandler`] against its inputs and publishes the outputs.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::ExecutorError;
use crate::store::{JobStore, StorePaths};

/// Timeout for one workflow call. Jobs are long-running LLM pipelines.
const WORKFLOW_TIMEOUT: Duration = Duration::from_secs(3600);

/// Everything a running job knows about its surroundings.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub namespace: String,
    /// Pod that claimed the job.
    pub pod_id: String,
    /// Set when a removal request arrives for this job.
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn new(
        job_id: impl Into<String>,
        namespace: impl Into<String>,
        pod_id: impl Into<String>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            namespace: namespace.into(),
            pod_id: pod_id.into(),
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Performs the actual unit of work for a claimed job.
///
/// Returning `Ok` means the job is finished and its scheduling record has
/// been removed. Implementations should observe `ctx.cancel` at their await
/// points.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, ctx: JobContext, job_id: &str) -> Result<(), ExecutorError>;
}

/// Turns job inputs into job outputs.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(
        &self,
        job_id: &str,
        namespace: &str,
        inputs: Value,
    ) -> Result<Value, ExecutorError>;
}

/// Executor that moves payloads between the store and a [`JobHandler`].
///
/// On success the JobRecord's `state.outputs` is written and the
/// RequestedJob deleted. On failure a failure output is written and the
/// RequestedJob stays claimed, so heartbeat recovery spends the retry budget.
pub struct StoreBackedExecutor<H> {
    store: Arc<dyn JobStore>,
    handler: H,
}

impl<H: JobHandler> StoreBackedExecutor<H> {
    pub fn new(store: Arc<dyn JobStore>, handler: H) -> Self {
        Self { store, handler }
    }

    async fn publish_outputs(
        &self,
        namespace: &str,
        job_id: &str,
        outputs: Value,
    ) -> Result<(), ExecutorError> {
        let path = StorePaths::job(namespace, job_id);
        let mut record = self
            .store
            .get(&path)
            .await?
            .ok_or_else(|| ExecutorError::MissingRecord(job_id.to_string()))?;

        if !record.get("state").is_some_and(Value::is_object) {
            record["state"] = json!({});
        }
        record["state"]["outputs"] = outputs;
        self.store.set(&path, record).await?;
        Ok(())
    }

    async fn publish_failure(&self, namespace: &str, job_id: &str, err: &ExecutorError) {
        let outputs = json!({
            "isFailed": true,
            "error": err.to_string(),
            "progress": 0,
            "logs": [{
                "level": "error",
                "message": format!("Job failed: {}", err),
            }],
        });

        if let Err(e) = self.publish_outputs(namespace, job_id, outputs).await {
            error!(job_id = %job_id, error = %e, "Failed to record job failure");
        }
    }
}

#[async_trait]
impl<H: JobHandler> JobExecutor for StoreBackedExecutor<H> {
    async fn execute(&self, ctx: JobContext, job_id: &str) -> Result<(), ExecutorError> {
        let namespace = ctx.namespace.as_str();
        let record = self
            .store
            .get(&StorePaths::job(namespace, job_id))
            .await?
            .ok_or_else(|| ExecutorError::MissingRecord(job_id.to_string()))?;

        let inputs = record
            .pointer("/state/inputs")
            .cloned()
            .ok_or_else(|| ExecutorError::MissingInputs {
                job_id: job_id.to_string(),
            })?;

        debug!(job_id = %job_id, namespace = %namespace, "Running job handler");

        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ExecutorError::Cancelled(job_id.to_string())),
            result = self.handler.handle(job_id, namespace, inputs) => result,
        };

        // A removal request owns the job's data from here on.
        if ctx.is_cancelled() {
            return Err(ExecutorError::Cancelled(job_id.to_string()));
        }

        match result {
            Ok(outputs) => {
                self.publish_outputs(namespace, job_id, outputs).await?;
                self.store
                    .delete(&StorePaths::requested_job(namespace, job_id))
                    .await?;
                info!(job_id = %job_id, namespace = %namespace, "Job completed");
                Ok(())
            }
            Err(e) => {
                self.publish_failure(namespace, job_id, &e).await;
                Err(e)
            }
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowRequest<'a> {
    job_id: &'a str,
    namespace: &'a str,
    inputs: Value,
}

/// Handler that delegates to an HTTP workflow service.
///
/// Each namespace is served at `{endpoint}/{namespace}`; the response body is
/// the job's outputs.
pub struct HttpJobHandler {
    http_client: Client,
    endpoint: String,
}

impl HttpJobHandler {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ExecutorError> {
        let http_client = Client::builder().timeout(WORKFLOW_TIMEOUT).build()?;
        Ok(Self::with_client(endpoint, http_client))
    }

    pub fn with_client(endpoint: impl Into<String>, http_client: Client) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, namespace: &str) -> String {
        format!("{}/{}", self.endpoint, urlencoding::encode(namespace))
    }
}

#[async_trait]
impl JobHandler for HttpJobHandler {
    async fn handle(
        &self,
        job_id: &str,
        namespace: &str,
        inputs: Value,
    ) -> Result<Value, ExecutorError> {
        let request = WorkflowRequest {
            job_id,
            namespace,
            inputs,
        };

        let response = self
            .http_client
            .post(self.url(namespace))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExecutorError::Workflow(format!(
                "workflow returned {}: {}",
                status, body
            )));
        }

        Ok(response.json::<Value>().await?)
    }
}
