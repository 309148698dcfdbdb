//! Store path layout for the three job collections.

/// Root collection holding scheduling records.
pub const REQUESTED_JOBS_ROOT: &str = "requestedJobs";
/// Root collection holding job payloads.
pub const JOBS_ROOT: &str = "jobs";
/// Root collection holding removal flags.
pub const JOB_STATES_ROOT: &str = "jobStates";

/// Builds store paths for a job in a namespace.
#[derive(Debug, Clone, Copy, Default)]
pub struct StorePaths;

impl StorePaths {
    pub fn requested_jobs(namespace: &str) -> String {
        format!("{}/{}", REQUESTED_JOBS_ROOT, namespace)
    }

    pub fn requested_job(namespace: &str, job_id: &str) -> String {
        format!("{}/{}/{}", REQUESTED_JOBS_ROOT, namespace, job_id)
    }

    pub fn jobs(namespace: &str) -> String {
        format!("{}/{}", JOBS_ROOT, namespace)
    }

    pub fn job(namespace: &str, job_id: &str) -> String {
        format!("{}/{}/{}", JOBS_ROOT, namespace, job_id)
    }

    pub fn job_states(namespace: &str) -> String {
        format!("{}/{}", JOB_STATES_ROOT, namespace)
    }

    pub fn job_state(namespace: &str, job_id: &str) -> String {
        format!("{}/{}/{}", JOB_STATES_ROOT, namespace, job_id)
    }
}
