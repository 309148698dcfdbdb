//! In-process job store.
//!
//! Used for local single-pod runs and for tests that run several schedulers
//! against one shared store. Values are kept in their sanitized form so the
//! codec is exercised exactly as with a remote backend.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::codec::{restore, sanitize};
use super::{merge_fields, split_path, JobStore, TransactionFn};
use crate::error::StoreError;

/// Mutex-guarded map from full path to stored value.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored (sanitized) form at `path`.
    pub fn raw(&self, path: &str) -> Option<Value> {
        let entries = self.entries.lock().expect("store lock poisoned");
        entries.get(normalize(path)).cloned()
    }

    /// Number of stored paths.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.lock().expect("store lock poisoned");
        Ok(entries.get(normalize(path)).map(restore))
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        split_path(path)?;
        let mut entries = self.entries.lock().expect("store lock poisoned");
        entries.insert(normalize(path).to_string(), sanitize(&value));
        Ok(())
    }

    async fn update(&self, path: &str, partial: Map<String, Value>) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        let Some(stored) = entries.get_mut(normalize(path)) else {
            return Ok(false);
        };
        let mut current = restore(stored);
        merge_fields(path, &mut current, &partial)?;
        *stored = sanitize(&current);
        Ok(true)
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let mut entries = self.entries.lock().expect("store lock poisoned");
        Ok(entries.remove(normalize(path)).is_some())
    }

    async fn list_children(&self, path: &str) -> Result<HashMap<String, Value>, StoreError> {
        let prefix = format!("{}/", normalize(path));
        let entries = self.entries.lock().expect("store lock poisoned");
        Ok(entries
            .iter()
            .filter_map(|(key, value)| {
                let child = key.strip_prefix(&prefix)?;
                (!child.contains('/')).then(|| (child.to_string(), restore(value)))
            })
            .collect())
    }

    async fn transaction(
        &self,
        path: &str,
        update: TransactionFn<'_>,
    ) -> Result<Option<Value>, StoreError> {
        split_path(path)?;
        let key = normalize(path).to_string();
        let mut entries = self.entries.lock().expect("store lock poisoned");
        let current = entries.get(&key).map(restore);

        let Some(next) = update(current.clone()) else {
            return Ok(None);
        };
        if current.as_ref() != Some(&next) {
            entries.insert(key, sanitize(&next));
        }
        Ok(Some(next))
    }
}
