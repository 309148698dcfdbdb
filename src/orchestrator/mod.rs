//! Orchestrator access: pod liveness and deployment replica control.
//!
//! The scheduler uses [`PodLivenessProbe::pod_is_running`] to detect jobs
//! orphaned by pods that no longer exist. The autoscaler uses the pod listing
//! for leader election and the replica accessors to resize the deployment.

pub mod kubernetes;
pub mod local;

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ProbeError;

pub use kubernetes::KubernetesProbe;
pub use local::LocalProbe;

/// Lifecycle phase reported by the orchestrator for a pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PodPhase::Pending => write!(f, "Pending"),
            PodPhase::Running => write!(f, "Running"),
            PodPhase::Succeeded => write!(f, "Succeeded"),
            PodPhase::Failed => write!(f, "Failed"),
            PodPhase::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A pod as seen by leader election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodInfo {
    pub name: String,
    pub creation_timestamp: DateTime<Utc>,
    pub phase: PodPhase,
}

/// Contract of the orchestrator collaborator.
#[async_trait]
pub trait PodLivenessProbe: Send + Sync {
    /// Looks up a pod's phase. `Ok(None)` means the pod does not exist.
    async fn pod_phase(&self, pod_id: &str) -> Result<Option<PodPhase>, ProbeError>;

    /// Lists pods matching a label selector such as `app=project-generator`.
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<PodInfo>, ProbeError>;

    /// Reads the deployment's desired replica count.
    async fn get_replicas(&self, deployment: &str) -> Result<u32, ProbeError>;

    /// Writes the deployment's desired replica count.
    async fn set_replicas(&self, deployment: &str, replicas: u32) -> Result<(), ProbeError>;

    /// Whether `pod_id` exists and is running.
    ///
    /// A pod that is missing or in any other phase is not running. A failed
    /// lookup is treated as running so that a flaky orchestrator API never
    /// causes live work to be stolen.
    async fn pod_is_running(&self, pod_id: &str) -> bool {
        match self.pod_phase(pod_id).await {
            Ok(Some(phase)) => phase == PodPhase::Running,
            Ok(None) => false,
            Err(e) => {
                warn!(pod_id = %pod_id, error = %e, "Pod lookup failed, assuming alive");
                true
            }
        }
    }
}

/// Picks the leader: the earliest-created pod, ties broken by name.
pub fn elect_leader(pods: &[PodInfo]) -> Option<&PodInfo> {
    pods.iter()
        .min_by(|a, b| {
            a.creation_timestamp
                .cmp(&b.creation_timestamp)
                .then_with(|| a.name.cmp(&b.name))
        })
}
