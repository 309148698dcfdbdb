//! Orchestrator stand-in for runs outside a cluster.
//!
//! Without an orchestrator there is no way to tell whether another pod is
//! alive, so every pod is reported as running. The pod listing contains only
//! this process, which therefore always wins leader election.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{PodInfo, PodLivenessProbe, PodPhase};
use crate::error::ProbeError;

#[derive(Debug)]
pub struct LocalProbe {
    pod_id: String,
    started_at: DateTime<Utc>,
    replicas: AtomicU32,
}

impl LocalProbe {
    pub fn new(pod_id: impl Into<String>) -> Self {
        Self {
            pod_id: pod_id.into(),
            started_at: Utc::now(),
            replicas: AtomicU32::new(1),
        }
    }
}

#[async_trait]
impl PodLivenessProbe for LocalProbe {
    async fn pod_phase(&self, _pod_id: &str) -> Result<Option<PodPhase>, ProbeError> {
        Ok(Some(PodPhase::Running))
    }

    async fn list_pods(&self, _label_selector: &str) -> Result<Vec<PodInfo>, ProbeError> {
        Ok(vec![PodInfo {
            name: self.pod_id.clone(),
            creation_timestamp: self.started_at,
            phase: PodPhase::Running,
        }])
    }

    async fn get_replicas(&self, _deployment: &str) -> Result<u32, ProbeError> {
        Ok(self.replicas.load(Ordering::SeqCst))
    }

    async fn set_replicas(&self, _deployment: &str, replicas: u32) -> Result<(), ProbeError> {
        self.replicas.store(replicas, Ordering::SeqCst);
        Ok(())
    }
}
