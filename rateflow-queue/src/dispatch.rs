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

//! Producer-side queue dispatch.
//!
//! Pollers hand every result to one dispatcher, which fans it out to the
//! queues mapped to its oidset. Sharded queues route through the shard
//! router so one (oidset, device) pair stays on one worker.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::error;

use rateflow_core::{PersistConfig, PollResult, Result};

use crate::cache::CounterCache;
use crate::queue::PersistQueue;
use crate::router::ShardedQueue;

enum DispatchQueue {
    Single(PersistQueue),
    Sharded(ShardedQueue),
}

pub struct PersistDispatcher {
    config: Arc<PersistConfig>,
    queues: BTreeMap<String, DispatchQueue>,
}

impl PersistDispatcher {
    /// Open every configured queue against the shared cache.
    pub async fn new(config: Arc<PersistConfig>, cache: Arc<dyn CounterCache>) -> Result<Self> {
        let mut queues = BTreeMap::new();

        for (qname, queue_config) in &config.queues {
            let queue = if queue_config.workers > 1 {
                DispatchQueue::Sharded(
                    ShardedQueue::new(qname, queue_config.workers, cache.clone()).await?,
                )
            } else {
                DispatchQueue::Single(PersistQueue::new(qname, cache.clone()).await?)
            };
            queues.insert(qname.clone(), queue);
        }

        Ok(Self { config, queues })
    }

    /// Fan a result out to every queue mapped to its oidset. Results for an
    /// unmapped oidset are logged and dropped.
    pub async fn put(&mut self, result: &PollResult) -> Result<()> {
        let qnames: Vec<String> = match self.config.queues_for(&result.oidset_name) {
            Some(qnames) => qnames.to_vec(),
            None => {
                error!(oidset = %result.oidset_name, "unknown oidset, dropping result");
                return Ok(());
            }
        };

        for qname in &qnames {
            match self.queues.get_mut(qname) {
                Some(DispatchQueue::Single(queue)) => queue.put(result).await?,
                Some(DispatchQueue::Sharded(queue)) => queue.put(result).await?,
                None => error!(queue = %qname, "unknown queue"),
            }
        }
        Ok(())
    }
}
