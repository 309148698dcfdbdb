//! Kubernetes REST implementation of [`PodLivenessProbe`].
//!
//! Talks to the API server from inside a pod using the mounted service
//! account credentials. Only the handful of endpoints the scheduler and
//! autoscaler need are implemented.

use std::env;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Certificate, Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use super::{PodInfo, PodLivenessProbe, PodPhase};
use crate::error::ProbeError;

/// Directory holding the service account token and cluster CA.
const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Timeout for every API call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct PodList {
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: ObjectMeta,
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectMeta {
    name: String,
    creation_timestamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<PodPhase>,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    spec: DeploymentSpec,
}

#[derive(Debug, Deserialize)]
struct DeploymentSpec {
    #[serde(default)]
    replicas: Option<u32>,
}

impl Pod {
    fn phase(&self) -> PodPhase {
        self.status
            .as_ref()
            .and_then(|s| s.phase)
            .unwrap_or(PodPhase::Unknown)
    }
}

/// In-cluster Kubernetes API client.
pub struct KubernetesProbe {
    http_client: Client,
    api_base: String,
    token: String,
    namespace: String,
}

impl KubernetesProbe {
    /// Creates a client for an explicit API server.
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        namespace: impl Into<String>,
        http_client: Client,
    ) -> Self {
        Self {
            http_client,
            api_base: api_base.into(),
            token: token.into(),
            namespace: namespace.into(),
        }
    }

    /// Creates a client from the pod's service account.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::NotInCluster` when the API server address or the
    /// service account files are missing.
    pub fn in_cluster(namespace: impl Into<String>) -> Result<Self, ProbeError> {
        let host = env::var("KUBERNETES_SERVICE_HOST")
            .map_err(|_| ProbeError::NotInCluster("KUBERNETES_SERVICE_HOST not set".into()))?;
        let port = env::var("KUBERNETES_SERVICE_PORT").unwrap_or_else(|_| "443".to_string());

        let account_dir = Path::new(SERVICE_ACCOUNT_DIR);
        let token = std::fs::read_to_string(account_dir.join("token"))
            .map_err(|e| ProbeError::NotInCluster(format!("service account token: {}", e)))?;
        let ca = std::fs::read(account_dir.join("ca.crt"))?;

        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .add_root_certificate(Certificate::from_pem(&ca)?)
            .build()?;

        let api_base = if host.contains(':') {
            format!("https://[{}]:{}", host, port)
        } else {
            format!("https://{}:{}", host, port)
        };
        let namespace = namespace.into();
        info!(api_base = %api_base, namespace = %namespace, "Using in-cluster Kubernetes API");

        Ok(Self::new(api_base, token.trim(), namespace, http_client))
    }

    fn pod_url(&self, pod_id: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/pods/{}",
            self.api_base,
            self.namespace,
            urlencoding::encode(pod_id)
        )
    }

    fn pods_url(&self, label_selector: &str) -> String {
        format!(
            "{}/api/v1/namespaces/{}/pods?labelSelector={}",
            self.api_base,
            self.namespace,
            urlencoding::encode(label_selector)
        )
    }

    fn deployment_url(&self, deployment: &str) -> String {
        format!(
            "{}/apis/apps/v1/namespaces/{}/deployments/{}",
            self.api_base,
            self.namespace,
            urlencoding::encode(deployment)
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, ProbeError> {
        let response = self
            .http_client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProbeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| ProbeError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl PodLivenessProbe for KubernetesProbe {
    async fn pod_phase(&self, pod_id: &str) -> Result<Option<PodPhase>, ProbeError> {
        let pod: Option<Pod> = self.get_json(&self.pod_url(pod_id)).await?;
        Ok(pod.map(|p| p.phase()))
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodInfo>, ProbeError> {
        let list: Option<PodList> = self.get_json(&self.pods_url(label_selector)).await?;
        Ok(list
            .map(|l| l.items)
            .unwrap_or_default()
            .into_iter()
            .map(|pod| PodInfo {
                phase: pod.phase(),
                name: pod.metadata.name,
                creation_timestamp: pod.metadata.creation_timestamp,
            })
            .collect())
    }

    async fn get_replicas(&self, deployment: &str) -> Result<u32, ProbeError> {
        let found: Option<Deployment> = self.get_json(&self.deployment_url(deployment)).await?;
        let deployment_spec = found.ok_or_else(|| ProbeError::Api {
            status: StatusCode::NOT_FOUND.as_u16(),
            message: format!("deployment {} not found", deployment),
        })?;
        Ok(deployment_spec.spec.replicas.unwrap_or(1))
    }

    async fn set_replicas(&self, deployment: &str, replicas: u32) -> Result<(), ProbeError> {
        let previous = self.get_replicas(deployment).await?;

        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        let response = self
            .http_client
            .patch(self.deployment_url(deployment))
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(CONTENT_TYPE, "application/merge-patch+json")
            .body(patch.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProbeError::Api {
                status: status.as_u16(),
                message,
            });
        }

        debug!(deployment = %deployment, previous, replicas, "Patched deployment replicas");
        Ok(())
    }
}
