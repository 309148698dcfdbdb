//! Redis-backed job store.
//!
//! Each collection path (`requestedJobs/{namespace}`, `jobs/{namespace}`,
//! `jobStates/{namespace}`) is one Redis hash:
//!
//! - key: `{key_prefix}:{collection path}`
//! - field: the child id
//! - value: sanitized JSON document
//!
//! Single-path transactions are a read followed by a compare-and-set Lua
//! script on the same hash field, so writers only conflict when they touch
//! the same job. Everything runs on the shared `ConnectionManager`.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::{Map, Value};
use tracing::debug;

use super::codec::{restore, sanitize};
use super::{merge_fields, split_path, JobStore, TransactionFn};
use crate::error::StoreError;

/// Maximum compare-and-set retries for one transaction.
const MAX_TRANSACTION_ATTEMPTS: u32 = 8;

/// Base delay between conflicting attempts, multiplied by the attempt number.
const CONFLICT_BACKOFF: Duration = Duration::from_millis(5);

/// Redis scripts for atomic operations
mod scripts {
    use redis::Script;

    /// Writes `ARGV[4]` to field `ARGV[1]` only if the field still holds
    /// `ARGV[3]` (or is absent, when `ARGV[2]` is `0`).
    ///
    /// Returns 1 when written, 0 when the field changed underneath.
    pub fn compare_and_set() -> Script {
        Script::new(
            r#"
            local key = KEYS[1]
            local field = ARGV[1]
            local expect_present = ARGV[2] == '1'
            local current = redis.call('HGET', key, field)

            if expect_present then
                if current ~= ARGV[3] then
                    return 0
                end
            elseif current then
                return 0
            end

            redis.call('HSET', key, field, ARGV[4])
            return 1
            "#,
        )
    }
}

/// Job store backed by Redis hashes.
pub struct RedisJobStore {
    redis: ConnectionManager,
    key_prefix: String,
}

impl RedisJobStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `key_prefix` - Prefix for every Redis key written by this store
    pub async fn connect(redis_url: &str, key_prefix: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            redis,
            key_prefix: key_prefix.to_string(),
        })
    }

    fn collection_key(&self, collection: &str) -> String {
        format!("{}:{}", self.key_prefix, collection.trim_matches('/'))
    }

    fn locate(&self, path: &str) -> Result<(String, String), StoreError> {
        let (collection, child) = split_path(path)?;
        Ok((self.collection_key(collection), child.to_string()))
    }

    /// Writes `payload` if the field still holds `expected` (raw, as stored).
    async fn compare_and_set(
        &self,
        key: &str,
        field: &str,
        expected: Option<&str>,
        payload: &str,
    ) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let swapped: i64 = scripts::compare_and_set()
            .key(key)
            .arg(field)
            .arg(if expected.is_some() { "1" } else { "0" })
            .arg(expected.unwrap_or(""))
            .arg(payload)
            .invoke_async(&mut conn)
            .await?;
        Ok(swapped == 1)
    }
}

fn encode(value: &Value) -> Result<String, StoreError> {
    Ok(serde_json::to_string(&sanitize(value))?)
}

fn decode(raw: &str) -> Result<Value, StoreError> {
    let stored: Value = serde_json::from_str(raw)?;
    Ok(restore(&stored))
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn get(&self, path: &str) -> Result<Option<Value>, StoreError> {
        let (key, field) = self.locate(path)?;
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.hget(&key, &field).await?;
        raw.as_deref().map(decode).transpose()
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), StoreError> {
        let (key, field) = self.locate(path)?;
        let payload = encode(&value)?;
        let mut conn = self.redis.clone();
        conn.hset::<_, _, _, ()>(&key, &field, payload).await?;
        Ok(())
    }

    async fn update(&self, path: &str, partial: Map<String, Value>) -> Result<bool, StoreError> {
        let merged = self
            .transaction(path, &|current| {
                let mut value = current?;
                merge_fields(path, &mut value, &partial).ok()?;
                Some(value)
            })
            .await?;
        Ok(merged.is_some())
    }

    async fn delete(&self, path: &str) -> Result<bool, StoreError> {
        let (key, field) = self.locate(path)?;
        let mut conn = self.redis.clone();
        let removed: i64 = conn.hdel(&key, &field).await?;
        Ok(removed > 0)
    }

    async fn list_children(&self, path: &str) -> Result<HashMap<String, Value>, StoreError> {
        let key = self.collection_key(path);
        let mut conn = self.redis.clone();
        let raw: HashMap<String, String> = conn.hgetall(&key).await?;

        raw.into_iter()
            .map(|(child, payload)| Ok((child, decode(&payload)?)))
            .collect()
    }

    async fn transaction(
        &self,
        path: &str,
        update: TransactionFn<'_>,
    ) -> Result<Option<Value>, StoreError> {
        let (key, field) = self.locate(path)?;
        let mut conn = self.redis.clone();

        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let raw: Option<String> = conn.hget(&key, &field).await?;
            let current = raw.as_deref().map(decode).transpose()?;

            let next = match update(current.clone()) {
                Some(next) if current.as_ref() != Some(&next) => next,
                unchanged => return Ok(unchanged),
            };

            let payload = encode(&next)?;
            if self
                .compare_and_set(&key, &field, raw.as_deref(), &payload)
                .await?
            {
                return Ok(Some(next));
            }

            debug!(path = %path, attempt, "Transaction conflicted, retrying");
            tokio::time::sleep(CONFLICT_BACKOFF * attempt).await;
        }

        Err(StoreError::TransactionConflict {
            path: path.to_string(),
            attempts: MAX_TRANSACTION_ATTEMPTS,
        })
    }
}
