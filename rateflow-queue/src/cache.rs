// Copyright 2025 Rateflow Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Shared counter cache backing the persist queues.
//!
//! The queue protocol needs four primitives from the cache: atomic
//! increment-and-read, get, set, and delete. The Redis implementation is
//! the production backend shared across producer and worker processes; the
//! in-memory implementation serves tests and single-process runs.

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use std::collections::HashMap;

use rateflow_core::{RateflowError, Result};

/// Minimal key-value contract the queue counters and slots live on.
#[async_trait]
pub trait CounterCache: Send + Sync {
    /// Atomically increment the integer at `key` by one, returning the new
    /// value. A missing key counts from zero.
    async fn incr(&self, key: &str) -> Result<i64>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, val: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-process cache for tests and single-node runs.
#[derive(Default)]
pub struct MemoryCounterCache {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryCounterCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterCache for MemoryCounterCache {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut entries = self.entries.lock();
        let current = match entries.get(key) {
            Some(v) => v
                .parse::<i64>()
                .map_err(|_| RateflowError::Cache(format!("non-integer counter at {key}: {v}")))?,
            None => 0,
        };
        let next = current + 1;
        entries.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, val: &str) -> Result<()> {
        self.entries.lock().insert(key.to_string(), val.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Redis-backed cache shared by all producer and worker processes.
pub struct RedisCounterCache {
    client: redis::Client,
}

impl RedisCounterCache {
    pub fn connect(uri: &str) -> Result<Self> {
        let client =
            redis::Client::open(uri).map_err(|e| RateflowError::Cache(e.to_string()))?;
        Ok(Self { client })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| RateflowError::Cache(e.to_string()))
    }
}

#[async_trait]
impl CounterCache for RedisCounterCache {
    async fn incr(&self, key: &str) -> Result<i64> {
        let mut conn = self.connection().await?;
        conn.incr(key, 1)
            .await
            .map_err(|e| RateflowError::Cache(e.to_string()))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        conn.get(key)
            .await
            .map_err(|e| RateflowError::Cache(e.to_string()))
    }

    async fn set(&self, key: &str, val: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.set::<_, _, ()>(key, val)
            .await
            .map_err(|e| RateflowError::Cache(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| RateflowError::Cache(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_incr_counts_from_zero() {
        let cache = MemoryCounterCache::new();
        assert_eq!(cache.incr("c").await.unwrap(), 1);
        assert_eq!(cache.incr("c").await.unwrap(), 2);
        assert_eq!(cache.get("c").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_memory_incr_rejects_non_integer() {
        let cache = MemoryCounterCache::new();
        cache.set("c", "not-a-number").await.unwrap();
        assert!(cache.incr("c").await.is_err());
    }

    #[tokio::test]
    async fn test_memory_set_get_delete() {
        let cache = MemoryCounterCache::new();
        cache.set("k", "v").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}
