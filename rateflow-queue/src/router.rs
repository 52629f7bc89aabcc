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

//! Shard routing across a queue's worker shards.
//!
//! All results for one (oidset, device) pair land on the same shard, which
//! keeps a series' samples ordered and its metadata hot in one worker's
//! path. Assignment happens on first sight of a key, to the shard with the
//! least accumulated work, and is memoized for the router's lifetime; the
//! load model is static and never rebalances.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::debug;

use rateflow_core::{PollResult, Result};

use crate::cache::CounterCache;
use crate::queue::PersistQueue;

pub struct ShardedQueue {
    prefix: String,
    queues: BTreeMap<String, PersistQueue>,
    worker_map: HashMap<(String, String), usize>,
    /// (shard index, accumulated item count), kept sorted by load.
    worker_load: Vec<(usize, u64)>,
}

impl ShardedQueue {
    /// Open `num_workers` shard queues named `{prefix}_1 .. {prefix}_N`.
    pub async fn new(
        prefix: &str,
        num_workers: usize,
        cache: Arc<dyn CounterCache>,
    ) -> Result<Self> {
        let mut queues = BTreeMap::new();
        let mut worker_load = Vec::with_capacity(num_workers);

        for i in 1..=num_workers {
            let name = shard_name(prefix, i);
            queues.insert(name.clone(), PersistQueue::new(&name, cache.clone()).await?);
            worker_load.push((i, 0));
        }

        Ok(Self {
            prefix: prefix.to_string(),
            queues,
            worker_map: HashMap::new(),
            worker_load,
        })
    }

    /// Shard queue name the result routes to.
    pub fn shard_for(&mut self, result: &PollResult) -> String {
        let key = (result.oidset_name.clone(), result.device_name.clone());

        let worker = match self.worker_map.get(&key) {
            Some(worker) => *worker,
            None => {
                let work_size = result.data.len() as u64;
                let worker = self.worker_load[0].0;
                self.worker_map.insert(key, worker);
                self.worker_load[0].1 += work_size;

                debug!(
                    oidset = %result.oidset_name,
                    device = %result.device_name,
                    shard = worker,
                    load = self.worker_load[0].1,
                    "worker assigned"
                );

                self.worker_load.sort_by_key(|&(_, load)| load);
                worker
            }
        };

        shard_name(&self.prefix, worker)
    }

    pub async fn put(&mut self, result: &PollResult) -> Result<()> {
        let shard = self.shard_for(result);
        self.queues[&shard].put(result).await
    }

    pub fn shard_names(&self) -> Vec<String> {
        self.queues.keys().cloned().collect()
    }
}

/// Name of one shard's underlying queue.
pub fn shard_name(prefix: &str, index: usize) -> String {
    format!("{prefix}_{index}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCounterCache;
    use std::collections::BTreeMap as Meta;

    fn result(oidset: &str, device: &str, vars: usize) -> PollResult {
        PollResult {
            oidset_name: oidset.to_string(),
            device_name: device.to_string(),
            oid_name: "ifHCInOctets".to_string(),
            timestamp: 100,
            data: (0..vars)
                .map(|i| (vec![format!("if{i}")], Some(i as f64)))
                .collect(),
            metadata: Meta::new(),
        }
    }

    async fn router(num_workers: usize) -> ShardedQueue {
        let cache = Arc::new(MemoryCounterCache::new());
        ShardedQueue::new("snmp", num_workers, cache).await.unwrap()
    }

    #[tokio::test]
    async fn test_same_key_always_same_shard() {
        let mut router = router(4).await;

        let first = router.shard_for(&result("FastPollHC", "router1", 8));
        for _ in 0..20 {
            assert_eq!(router.shard_for(&result("FastPollHC", "router1", 8)), first);
        }
        // A different work size does not move an assigned key.
        assert_eq!(router.shard_for(&result("FastPollHC", "router1", 1)), first);
    }

    #[tokio::test]
    async fn test_new_keys_go_to_least_loaded_shard() {
        let mut router = router(2).await;

        let heavy = router.shard_for(&result("FastPollHC", "router1", 100));
        let light = router.shard_for(&result("FastPollHC", "router2", 1));
        assert_ne!(heavy, light);

        // The lightly loaded shard keeps receiving new keys until it
        // catches up.
        let third = router.shard_for(&result("FastPollHC", "router3", 1));
        assert_eq!(third, light);
    }

    #[tokio::test]
    async fn test_device_and_oidset_both_key_the_route() {
        let mut router = router(2).await;

        let a = router.shard_for(&result("FastPollHC", "router1", 10));
        let b = router.shard_for(&result("SlowPoll", "router1", 10));
        // Same device but different oidsets are separate keys; with two
        // shards and balanced loads they spread out.
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_put_routes_to_assigned_shard_queue() {
        let cache = Arc::new(MemoryCounterCache::new());
        let mut router = ShardedQueue::new("snmp", 2, cache.clone()).await.unwrap();

        router.put(&result("FastPollHC", "router1", 2)).await.unwrap();
        let shard = router.shard_for(&result("FastPollHC", "router1", 2));

        let queue = PersistQueue::new(&shard, cache).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 1);
        assert_eq!(queue.get().await.unwrap().unwrap().device_name, "router1");
    }

    #[tokio::test]
    async fn test_shard_names_enumerate_all_shards() {
        let router = router(3).await;
        assert_eq!(router.shard_names(), ["snmp_1", "snmp_2", "snmp_3"]);
    }
}
