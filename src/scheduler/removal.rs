//! Removal requests.
//!
//! An external caller writes `{"isRemoveRequested": true}` under
//! `jobStates/{ns}/{id}`. Every scheduler sees the flag, but only one acts on
//! it, chosen by where the job currently is:
//!
//! | Situation | Action |
//! |---|---|
//! | running or claimed by this pod | cancel, then delete RequestedJob, JobRecord, flag |
//! | claimed by another pod | leave it to the owner |
//! | waiting, unclaimed | delete RequestedJob, JobRecord, flag |
//! | only the JobRecord is left (completed) | delete JobRecord, flag |
//! | nothing left | delete the flag |
//!
//! Deletions always run in table order with a pause in between.

use std::fmt;
use std::time::Duration;

use tracing::{debug, warn};

use super::job::{RemovalFlag, RequestedJob};
use super::job_id;
use crate::error::{SchedulerError, StoreError};
use crate::store::{JobStore, StorePaths};

/// Which removal rule applies to a flagged job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalBranch {
    /// This pod owns the job.
    Owned,
    /// Another pod owns the job; it will handle the flag.
    OwnedElsewhere,
    /// The job is still waiting in the queue.
    Unassigned,
    /// Only the JobRecord remains.
    Completed,
    /// Only the flag remains.
    Orphaned,
}

impl RemovalBranch {
    pub fn as_str(self) -> &'static str {
        match self {
            RemovalBranch::Owned => "owned",
            RemovalBranch::OwnedElsewhere => "owned_elsewhere",
            RemovalBranch::Unassigned => "unassigned",
            RemovalBranch::Completed => "completed",
            RemovalBranch::Orphaned => "orphaned",
        }
    }
}

impl fmt::Display for RemovalBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a flagged job from the scheduler's own view.
///
/// Returns `None` when no RequestedJob exists; the caller must then check for
/// a JobRecord and use [`classify_absent`].
pub fn classify(
    pod_id: &str,
    locally_active: bool,
    requested: Option<&RequestedJob>,
) -> Option<RemovalBranch> {
    if locally_active {
        return Some(RemovalBranch::Owned);
    }

    let job = requested?;
    Some(match job.assigned_pod_id.as_deref() {
        Some(owner) if owner == pod_id => RemovalBranch::Owned,
        Some(_) => RemovalBranch::OwnedElsewhere,
        None => RemovalBranch::Unassigned,
    })
}

/// Classifies a flagged job that has no RequestedJob.
pub fn classify_absent(record_exists: bool) -> RemovalBranch {
    if record_exists {
        RemovalBranch::Completed
    } else {
        RemovalBranch::Orphaned
    }
}

/// Paths to delete for `branch`, in deletion order.
pub fn removal_paths(branch: RemovalBranch, namespace: &str, job_id: &str) -> Vec<String> {
    let requested = StorePaths::requested_job(namespace, job_id);
    let record = StorePaths::job(namespace, job_id);
    let flag = StorePaths::job_state(namespace, job_id);

    match branch {
        RemovalBranch::Owned | RemovalBranch::Unassigned => vec![requested, record, flag],
        RemovalBranch::Completed => vec![record, flag],
        RemovalBranch::Orphaned => vec![flag],
        RemovalBranch::OwnedElsewhere => Vec::new(),
    }
}

/// Deletes `paths` one by one, pausing between deletes.
///
/// Failures are logged and do not stop later deletes; a surviving flag is
/// picked up again on the next poll. Returns how many paths held data.
pub async fn delete_in_order(store: &dyn JobStore, paths: &[String], pause: Duration) -> usize {
    let mut deleted = 0;

    for (index, path) in paths.iter().enumerate() {
        if index > 0 && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }

        match store.delete(path).await {
            Ok(true) => {
                deleted += 1;
                debug!(path = %path, "Deleted");
            }
            Ok(false) => debug!(path = %path, "Already absent"),
            Err(e) => warn!(path = %path, error = %e, "Delete failed, will retry next poll"),
        }
    }

    deleted
}

/// Writes a removal flag for `job_id`. Returns the job's namespace.
///
/// # Errors
///
/// Returns `SchedulerError::InvalidJobId` for ids of unknown format.
pub async fn request_removal(store: &dyn JobStore, job_id: &str) -> Result<String, SchedulerError> {
    let namespace = job_id::namespace_for(job_id)
        .ok_or_else(|| SchedulerError::InvalidJobId(job_id.to_string()))?;

    store
        .set(
            &StorePaths::job_state(namespace, job_id),
            RemovalFlag::requested().to_value().map_err(StoreError::from)?,
        )
        .await?;

    Ok(namespace.to_string())
}
