//! Job definitions for the scheduler.
//!
//! This module defines the records the scheduler reads and writes:
//!
//! - `RequestedJob`: the scheduling record under `requestedJobs/{ns}/{id}`
//! - `JobStatus`: its lifecycle status
//! - `RemovalFlag`: the cancellation request under `jobStates/{ns}/{id}`
//!
//! Writes never serialize a whole `RequestedJob`. They are expressed as field
//! patches (or transaction transforms over the raw JSON value) so that fields
//! owned by producers survive untouched.

use std::cmp::Ordering;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

/// Status of a requested job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be claimed.
    #[default]
    Pending,
    /// Claimed by a pod and running.
    Processing,
    /// Retry budget exhausted; never reclaimed automatically.
    Failed,
    /// Any status written by another component.
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Reads an explicit `null` the same as a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Scheduling record for one unit of work.
///
/// Timestamps are fractional Unix seconds. `created_at` is an opaque ordering
/// key chosen by the producer and only ever compared.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestedJob {
    /// Job id; filled from the store key when the record omits it.
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    /// Submission ordering key.
    #[serde(default, deserialize_with = "null_as_default")]
    pub created_at: f64,
    /// Pod currently owning the job.
    #[serde(default)]
    pub assigned_pod_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: JobStatus,
    #[serde(default)]
    pub claimed_at: Option<f64>,
    #[serde(default)]
    pub last_heartbeat: Option<f64>,
    /// Number of times the job was reset after a stale heartbeat.
    #[serde(default, deserialize_with = "null_as_default")]
    pub recovery_count: u32,
    #[serde(default)]
    pub failed_at: Option<f64>,
    /// 1-based position among waiting jobs of the namespace.
    #[serde(default)]
    pub waiting_job_count: Option<u32>,
    /// Owner is draining.
    #[serde(default)]
    pub shutdown_requested: Option<bool>,
    #[serde(default)]
    pub accepting_new_jobs: Option<bool>,
    /// Producer-owned fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RequestedJob {
    /// Creates a pending job.
    pub fn new(id: impl Into<String>, created_at: f64) -> Self {
        Self {
            id: id.into(),
            created_at,
            assigned_pod_id: None,
            status: JobStatus::Pending,
            claimed_at: None,
            last_heartbeat: None,
            recovery_count: 0,
            failed_at: None,
            waiting_job_count: None,
            shutdown_requested: None,
            accepting_new_jobs: None,
            extra: Map::new(),
        }
    }

    /// Parses a stored record, taking the id from the store key.
    pub fn from_value(id: &str, value: Value) -> Result<Self, serde_json::Error> {
        let mut job: RequestedJob = serde_json::from_value(value)?;
        job.id = id.to_string();
        Ok(job)
    }

    /// Serializes the record for a producer-side write.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Sets the assigned pod.
    pub fn with_assigned_pod(mut self, pod_id: impl Into<String>) -> Self {
        self.assigned_pod_id = Some(pod_id.into());
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: JobStatus) -> Self {
        self.status = status;
        self
    }

    /// Sets the last heartbeat.
    pub fn with_last_heartbeat(mut self, at: f64) -> Self {
        self.last_heartbeat = Some(at);
        self
    }

    /// Sets the recovery count.
    pub fn with_recovery_count(mut self, count: u32) -> Self {
        self.recovery_count = count;
        self
    }

    /// Unassigned and not permanently failed.
    pub fn is_claimable(&self) -> bool {
        self.assigned_pod_id.is_none() && self.status != JobStatus::Failed
    }

    /// Whether `pod_id` owns this job.
    pub fn is_owned_by(&self, pod_id: &str) -> bool {
        self.assigned_pod_id.as_deref() == Some(pod_id)
    }

    /// Whether the owner advertised that it is draining.
    pub fn is_shutdown_flagged(&self) -> bool {
        self.shutdown_requested.unwrap_or(false)
    }

    /// Most recent liveness evidence, in epoch seconds.
    ///
    /// Falls back to the claim time, then to zero, so an assigned record that
    /// never heartbeated counts as stale.
    pub fn liveness_timestamp(&self) -> f64 {
        self.last_heartbeat.or(self.claimed_at).unwrap_or(0.0)
    }

    /// Seconds since the last liveness evidence.
    pub fn heartbeat_age(&self, now: f64) -> f64 {
        now - self.liveness_timestamp()
    }
}

/// FIFO order: ascending `created_at`, ties broken by id.
pub fn fifo_order(a: &RequestedJob, b: &RequestedJob) -> Ordering {
    a.created_at
        .total_cmp(&b.created_at)
        .then_with(|| a.id.cmp(&b.id))
}

/// Sorts jobs into claim order.
pub fn sort_fifo(jobs: &mut [RequestedJob]) {
    jobs.sort_by(fifo_order);
}

/// Out-of-band cancellation request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemovalFlag {
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_remove_requested: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl RemovalFlag {
    /// A flag requesting removal.
    pub fn requested() -> Self {
        Self {
            is_remove_requested: true,
            extra: Map::new(),
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

/// Transaction transform that claims a job for `pod_id`.
///
/// Aborts when the record is gone. Returns the value unchanged (a no-op) when
/// someone already owns it or it has permanently failed; the caller detects a
/// lost race by re-reading `assignedPodId` from the result.
pub fn claim_transform(current: Option<Value>, pod_id: &str, now: f64) -> Option<Value> {
    let mut value = current?;
    let Some(fields) = value.as_object_mut() else {
        return Some(value);
    };

    let assigned = fields.get("assignedPodId").is_some_and(|v| !v.is_null());
    let failed = fields.get("status").and_then(Value::as_str) == Some("failed");
    if assigned || failed {
        return Some(value);
    }

    fields.insert("assignedPodId".to_string(), json!(pod_id));
    fields.insert("status".to_string(), json!(JobStatus::Processing));
    fields.insert("claimedAt".to_string(), json!(now));
    fields.insert("lastHeartbeat".to_string(), json!(now));
    fields.remove("shutdownRequested");
    fields.remove("acceptingNewJobs");
    Some(value)
}

/// Whether a committed transaction result names `pod_id` as the owner.
pub fn is_claimed_by(value: Option<&Value>, pod_id: &str) -> bool {
    value
        .and_then(|v| v.get("assignedPodId"))
        .and_then(Value::as_str)
        == Some(pod_id)
}

/// Heartbeat patch. A draining pod also advertises that it takes no new work.
pub fn heartbeat_patch(now: f64, draining: bool) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("lastHeartbeat".to_string(), json!(now));
    if draining {
        patch.insert("shutdownRequested".to_string(), json!(true));
        patch.insert("acceptingNewJobs".to_string(), json!(false));
    }
    patch
}

/// Patch returning a stale job to the queue.
pub fn reset_patch(recovery_count: u32) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("assignedPodId".to_string(), Value::Null);
    patch.insert("status".to_string(), json!(JobStatus::Pending));
    patch.insert("lastHeartbeat".to_string(), Value::Null);
    patch.insert("recoveryCount".to_string(), json!(recovery_count));
    patch
}

/// Patch marking a job permanently failed.
pub fn failed_patch(now: f64) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("status".to_string(), json!(JobStatus::Failed));
    patch.insert("assignedPodId".to_string(), Value::Null);
    patch.insert("lastHeartbeat".to_string(), Value::Null);
    patch.insert("failedAt".to_string(), json!(now));
    patch
}

/// Patch updating a job's queue position.
pub fn waiting_count_patch(position: u32) -> Map<String, Value> {
    let mut patch = Map::new();
    patch.insert("waitingJobCount".to_string(), json!(position));
    patch
}

/// Clears the owner of a job whose pod is gone. Returns `None` for non-objects.
pub fn clear_assignment(mut value: Value) -> Option<Value> {
    let fields = value.as_object_mut()?;
    fields.insert("assignedPodId".to_string(), Value::Null);
    if fields.get("status").and_then(Value::as_str) == Some("processing") {
        fields.insert("status".to_string(), json!(JobStatus::Pending));
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_job_parsing_keeps_extra_fields() {
        let value = json!({
            "createdAt": 1700000000123u64,
            "assignedPodId": null,
            "status": "pending",
            "jobType": "summary",
        });

        let job = RequestedJob::from_value("summ-1700000000123-a1", value).expect("parse");
        assert_eq!(job.id, "summ-1700000000123-a1");
        assert_eq!(job.created_at, 1700000000123.0);
        assert!(job.is_claimable());
        assert_eq!(job.recovery_count, 0);
        assert_eq!(job.extra["jobType"], json!("summary"));

        let back = job.to_value().expect("serialize");
        assert_eq!(back["jobType"], json!("summary"));
        assert_eq!(back["createdAt"], json!(1700000000123.0));
    }

    #[test]
    fn test_null_fields_read_as_defaults() {
        let job = RequestedJob::from_value(
            "summ-1700000000123-a1",
            json!({
                "id": null,
                "createdAt": null,
                "status": null,
                "recoveryCount": null,
                "assignedPodId": null,
            }),
        )
        .expect("parse");
        assert_eq!(job.id, "summ-1700000000123-a1");
        assert_eq!(job.created_at, 0.0);
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.recovery_count, 0);
        assert!(job.is_claimable());

        let owned = RequestedJob::from_value(
            "summ-1700000000123-a2",
            json!({"assignedPodId": "pod-b", "status": null, "recoveryCount": null}),
        )
        .expect("parse");
        assert!(owned.is_owned_by("pod-b"));
    }

    #[test]
    fn test_unknown_status_is_tolerated() {
        let job = RequestedJob::from_value("x", json!({"status": "archived"})).expect("parse");
        assert_eq!(job.status, JobStatus::Unknown);
        assert!(job.is_claimable());
    }

    #[test]
    fn test_failed_is_not_claimable() {
        let job = RequestedJob::new("a", 1.0).with_status(JobStatus::Failed);
        assert!(!job.is_claimable());
        let job = RequestedJob::new("a", 1.0).with_assigned_pod("pod-1");
        assert!(!job.is_claimable());
        assert!(job.is_owned_by("pod-1"));
    }

    #[test]
    fn test_fifo_order_ties_broken_by_id() {
        let mut jobs = vec![
            RequestedJob::new("c", 30.0),
            RequestedJob::new("b", 10.0),
            RequestedJob::new("a", 10.0),
            RequestedJob::new("d", 20.0),
        ];
        sort_fifo(&mut jobs);
        let ids: Vec<_> = jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "d", "c"]);
    }

    #[test]
    fn test_claim_transform() {
        let pending = json!({"assignedPodId": null, "status": "pending", "shutdownRequested": true});
        let claimed = claim_transform(Some(pending), "pod-a", 100.0).expect("value");
        assert!(is_claimed_by(Some(&claimed), "pod-a"));
        assert_eq!(claimed["status"], json!("processing"));
        assert_eq!(claimed["claimedAt"], json!(100.0));
        assert_eq!(claimed["lastHeartbeat"], json!(100.0));
        assert!(claimed.get("shutdownRequested").is_none());

        // Second claimant sees the first owner and leaves the value alone.
        let again = claim_transform(Some(claimed.clone()), "pod-b", 101.0).expect("value");
        assert_eq!(again, claimed);
        assert!(!is_claimed_by(Some(&again), "pod-b"));

        assert!(claim_transform(None, "pod-a", 1.0).is_none());
    }

    #[test]
    fn test_claim_transform_skips_failed() {
        let failed = json!({"assignedPodId": null, "status": "failed"});
        let result = claim_transform(Some(failed.clone()), "pod-a", 1.0);
        assert_eq!(result, Some(failed));
    }

    #[test]
    fn test_heartbeat_patch() {
        let patch = heartbeat_patch(5.0, false);
        assert_eq!(patch.len(), 1);

        let patch = heartbeat_patch(5.0, true);
        assert_eq!(patch["shutdownRequested"], json!(true));
        assert_eq!(patch["acceptingNewJobs"], json!(false));
    }

    #[test]
    fn test_liveness_timestamp_fallbacks() {
        let job = RequestedJob::new("a", 1.0).with_last_heartbeat(50.0);
        assert_eq!(job.heartbeat_age(80.0), 30.0);

        let mut job = RequestedJob::new("a", 1.0);
        job.claimed_at = Some(40.0);
        assert_eq!(job.liveness_timestamp(), 40.0);

        let job = RequestedJob::new("a", 1.0);
        assert_eq!(job.liveness_timestamp(), 0.0);
    }

    #[test]
    fn test_clear_assignment() {
        let value = json!({"assignedPodId": "gone", "status": "processing", "x": 1});
        let cleared = clear_assignment(value).expect("object");
        assert_eq!(cleared["assignedPodId"], Value::Null);
        assert_eq!(cleared["status"], json!("pending"));
        assert_eq!(cleared["x"], json!(1));
        assert!(clear_assignment(json!("scalar")).is_none());
    }

    #[test]
    fn test_recovery_patches() {
        let patch = reset_patch(1);
        assert_eq!(patch["status"], json!("pending"));
        assert_eq!(patch["recoveryCount"], json!(1));

        let patch = failed_patch(9.0);
        assert_eq!(patch["status"], json!("failed"));
        assert_eq!(patch["failedAt"], json!(9.0));
        assert_eq!(patch["assignedPodId"], Value::Null);
    }

    #[test]
    fn test_removal_flag() {
        let flag: RemovalFlag =
            serde_json::from_value(json!({"isRemoveRequested": true, "by": "ui"})).expect("parse");
        assert!(flag.is_remove_requested);
        assert_eq!(
            RemovalFlag::requested().to_value().expect("serialize"),
            json!({"isRemoveRequested": true})
        );

        let flag: RemovalFlag =
            serde_json::from_value(json!({"isRemoveRequested": null})).expect("parse");
        assert!(!flag.is_remove_requested);
    }
}
