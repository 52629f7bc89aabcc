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

//! Counter-based persist queue.
//!
//! Two shared monotonic counters per queue name, `last_added` and
//! `last_read`, with the invariant `last_read <= last_added`. A slot is
//! valid for consumption only for ids in `(last_read, last_added]`. Many
//! producers may `put` concurrently; each queue instance has a single
//! consumer calling `get`.

use std::sync::Arc;

use tracing::error;

use rateflow_core::{PollResult, Result};

use crate::cache::CounterCache;

const KEY_PREFIX: &str = "_rfq_";

/// Cache key of a queue's `last_added` counter.
pub fn last_added_key(qname: &str) -> String {
    format!("{KEY_PREFIX}_{qname}_last_added")
}

/// Cache key of a queue's `last_read` counter.
pub fn last_read_key(qname: &str) -> String {
    format!("{KEY_PREFIX}_{qname}_last_read")
}

pub struct PersistQueue {
    qname: String,
    cache: Arc<dyn CounterCache>,
    last_added: String,
    last_read: String,
}

impl PersistQueue {
    /// Open (or create) the named queue, seeding both counters to zero on
    /// first use.
    pub async fn new(qname: &str, cache: Arc<dyn CounterCache>) -> Result<Self> {
        let queue = Self {
            qname: qname.to_string(),
            last_added: last_added_key(qname),
            last_read: last_read_key(qname),
            cache,
        };

        if queue.cache.get(&queue.last_added).await?.is_none() {
            queue.cache.set(&queue.last_added, "0").await?;
        }
        if queue.cache.get(&queue.last_read).await?.is_none() {
            queue.cache.set(&queue.last_read, "0").await?;
        }

        Ok(queue)
    }

    pub fn name(&self) -> &str {
        &self.qname
    }

    fn slot_key(&self, qid: i64) -> String {
        format!("{KEY_PREFIX}_{}_{}", self.qname, qid)
    }

    async fn counter(&self, key: &str) -> Result<i64> {
        match self.cache.get(key).await? {
            Some(v) => v.parse::<i64>().map_err(|_| {
                rateflow_core::RateflowError::Cache(format!("corrupt counter at {key}: {v}"))
            }),
            None => Ok(0),
        }
    }

    /// Enqueue one result.
    ///
    /// A result that fails to serialize is logged and dropped. A slot whose
    /// payload write fails after the id was reserved is a permanent loss:
    /// the id is never reused, and the consumer will skip past it.
    pub async fn put(&self, result: &PollResult) -> Result<()> {
        let payload = match serde_json::to_string(result) {
            Ok(payload) => payload,
            Err(e) => {
                error!(queue = %self.qname, result = %result, error = %e,
                    "could not serialize result, dropping");
                return Ok(());
            }
        };

        let qid = self.cache.incr(&self.last_added).await?;
        if let Err(e) = self.cache.set(&self.slot_key(qid), &payload).await {
            error!(queue = %self.qname, qid, error = %e,
                "slot write failed, polling data lost");
        }
        Ok(())
    }

    /// Dequeue the next result, or `None` when the queue is drained.
    ///
    /// Empty slots between `last_read` and `last_added` (a producer died
    /// between reserving an id and writing the payload) are skipped and
    /// counted; the count is logged once contiguous valid data resumes or
    /// the queue is exhausted. Never blocks.
    pub async fn get(&self) -> Result<Option<PollResult>> {
        let mut lost: i64 = 0;

        loop {
            let last_added = self.counter(&self.last_added).await?;
            let last_read = self.counter(&self.last_read).await?;
            if last_read >= last_added {
                if lost > 0 {
                    error!(queue = %self.qname, lost, "missing data: queue drained past lost slots");
                }
                return Ok(None);
            }

            let qid = self.cache.incr(&self.last_read).await?;
            let key = self.slot_key(qid);

            if let Some(payload) = self.cache.get(&key).await? {
                self.cache.delete(&key).await?;
                if lost > 0 {
                    error!(
                        queue = %self.qname,
                        lost,
                        first_qid = qid - lost,
                        last_qid = qid - 1,
                        "missing data: lost slots skipped"
                    );
                }
                let result = serde_json::from_str(&payload)?;
                return Ok(Some(result));
            }

            lost += 1;
        }
    }

    /// Items currently enqueued. Never negative.
    pub async fn len(&self) -> Result<i64> {
        let last_added = self.counter(&self.last_added).await?;
        let last_read = self.counter(&self.last_read).await?;
        Ok((last_added - last_read).max(0))
    }

    /// Zero both counters. Operational tooling only.
    pub async fn reset(&self) -> Result<()> {
        self.cache.set(&self.last_added, "0").await?;
        self.cache.set(&self.last_read, "0").await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCounterCache;
    use std::collections::BTreeMap;
    use std::collections::BTreeSet;

    fn result(device: &str, timestamp: i64) -> PollResult {
        PollResult {
            oidset_name: "FastPollHC".to_string(),
            device_name: device.to_string(),
            oid_name: "ifHCInOctets".to_string(),
            timestamp,
            data: vec![(vec!["ifHCInOctets".to_string()], Some(1.0))],
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let cache = Arc::new(MemoryCounterCache::new());
        let queue = PersistQueue::new("q", cache).await.unwrap();

        for ts in [10, 20, 30] {
            queue.put(&result("router1", ts)).await.unwrap();
        }
        assert_eq!(queue.len().await.unwrap(), 3);

        for expected in [10, 20, 30] {
            let got = queue.get().await.unwrap().unwrap();
            assert_eq!(got.timestamp, expected);
        }
        assert!(queue.get().await.unwrap().is_none());
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_get_returns_none_immediately() {
        let cache = Arc::new(MemoryCounterCache::new());
        let queue = PersistQueue::new("q", cache).await.unwrap();
        assert!(queue.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lost_slots_are_skipped() {
        let cache = Arc::new(MemoryCounterCache::new());
        let queue = PersistQueue::new("q", cache.clone()).await.unwrap();

        for ts in [10, 20, 30] {
            queue.put(&result("router1", ts)).await.unwrap();
        }
        // Simulate a producer that reserved slot 2 but never wrote it.
        cache.delete("_rfq__q_2").await.unwrap();

        assert_eq!(queue.get().await.unwrap().unwrap().timestamp, 10);
        assert_eq!(queue.get().await.unwrap().unwrap().timestamp, 30);
        assert!(queue.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lost_tail_slot_keeps_counters_consistent() {
        let cache = Arc::new(MemoryCounterCache::new());
        let queue = PersistQueue::new("q", cache.clone()).await.unwrap();

        queue.put(&result("router1", 10)).await.unwrap();
        queue.put(&result("router1", 20)).await.unwrap();
        cache.delete("_rfq__q_2").await.unwrap();

        assert_eq!(queue.get().await.unwrap().unwrap().timestamp, 10);
        assert!(queue.get().await.unwrap().is_none());
        assert_eq!(queue.len().await.unwrap(), 0);

        // The queue keeps working after scanning past the lost tail.
        queue.put(&result("router1", 30)).await.unwrap();
        assert_eq!(queue.get().await.unwrap().unwrap().timestamp, 30);
    }

    #[tokio::test]
    async fn test_queues_with_different_names_are_independent() {
        let cache = Arc::new(MemoryCounterCache::new());
        let a = PersistQueue::new("a", cache.clone()).await.unwrap();
        let b = PersistQueue::new("b", cache).await.unwrap();

        a.put(&result("router1", 10)).await.unwrap();
        assert!(b.get().await.unwrap().is_none());
        assert_eq!(a.get().await.unwrap().unwrap().timestamp, 10);
    }

    #[tokio::test]
    async fn test_reset_zeroes_counters() {
        let cache = Arc::new(MemoryCounterCache::new());
        let queue = PersistQueue::new("q", cache).await.unwrap();

        queue.put(&result("router1", 10)).await.unwrap();
        queue.reset().await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 0);
        assert!(queue.get().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_puts_never_duplicate() {
        let cache = Arc::new(MemoryCounterCache::new());
        let queue = Arc::new(PersistQueue::new("q", cache).await.unwrap());

        let mut handles = Vec::new();
        for producer in 0..8i64 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25i64 {
                    queue
                        .put(&result("router1", producer * 1000 + i))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(queue.len().await.unwrap(), 200);

        let mut seen = BTreeSet::new();
        while let Some(item) = queue.get().await.unwrap() {
            // Every drained item was enqueued exactly once.
            assert!(seen.insert(item.timestamp));
        }
        assert_eq!(seen.len(), 200);
        assert_eq!(queue.len().await.unwrap(), 0);
    }
}
