//! Shared, path-addressed job store.
//!
//! Every worker process talks to the same weakly-consistent key-value store.
//! Values are JSON documents addressed by slash-separated paths:
//!
//! ```text
//! requestedJobs/{namespace}/{job_id}   scheduling record (RequestedJob)
//! jobs/{namespace}/{job_id}            job payload (JobRecord)
//! jobStates/{namespace}/{job_id}       removal flag (JobRemovalFlag)
//! ```
//!
//! The only cross-process serialization primitive is [`JobStore::transaction`],
//! a read-modify-write on a single path. Everything else (heartbeats,
//! recovery, waiting counts) is an optimistic write that the next poll
//! reconciles.
//!
//! Backends persist values through the [`codec`] sanitize/restore pair because
//! the underlying store cannot represent `null`, `[]` or `{}`.

pub mod codec;
pub mod memory;
pub mod paths;
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::StoreError;

pub use memory::MemoryJobStore;
pub use paths::StorePaths;
pub use self::redis::RedisJobStore;

/// Update function run inside [`JobStore::transaction`].
///
/// Receives the current value (`None` when the path is empty). Returning
/// `None` aborts the transaction; returning a value commits it. Returning the
/// input unchanged is a no-op commit.
pub type TransactionFn<'a> = &'a (dyn Fn(Option<Value>) -> Option<Value> + Send + Sync);

/// Contract of the shared job store.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Reads the value at `path`.
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError>;

    /// Overwrites the value at `path`.
    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError>;

    /// Merges top-level fields into the object at `path`.
    ///
    /// Returns `false` without writing when nothing exists at `path`, so a
    /// late heartbeat cannot resurrect a deleted record.
    async fn update(&self, path: &str, partial: Map<String, Value>) -> Result<bool, StoreError>;

    /// Deletes the value at `path`. Returns whether anything was removed.
    async fn delete(&self, path: &str) -> Result<bool, StoreError>;

    /// Lists the direct children of `path`, keyed by child name.
    ///
    /// Iteration order is unspecified.
    async fn list_children(&self, path: &str) -> Result<HashMap<String, Value>, StoreError>;

    /// Atomic read-modify-write of a single path.
    ///
    /// Returns the committed value, or `None` when `update` aborted.
    async fn transaction(
        &self,
        path: &str,
        update: TransactionFn<'_>,
    ) -> Result<Option<Value>, StoreError>;
}

/// Shallow-merges `partial` into `target`, which must be an object.
pub(crate) fn merge_fields(
    path: &str,
    target: &mut Value,
    partial: &Map<String, Value>,
) -> Result<(), StoreError> {
    let object = target
        .as_object_mut()
        .ok_or_else(|| StoreError::NotAnObject(path.to_string()))?;
    for (key, value) in partial {
        object.insert(key.clone(), value.clone());
    }
    Ok(())
}

/// Splits `path` into its parent collection and child name.
pub(crate) fn split_path(path: &str) -> Result<(&str, &str), StoreError> {
    let trimmed = path.trim_matches('/');
    match trimmed.rsplit_once('/') {
        Some((parent, child)) if !parent.is_empty() && !child.is_empty() => Ok((parent, child)),
        _ => Err(StoreError::InvalidPath(path.to_string())),
    }
}
