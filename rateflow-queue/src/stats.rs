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

//! Queue depth sampling for the operational stats view.
//!
//! Reads a queue's two counters without consuming anything, keeping the
//! previous sample so each refresh can report what arrived and what was
//! drained since the last one.

use std::sync::Arc;

use tracing::warn;

use rateflow_core::Result;

use crate::cache::CounterCache;
use crate::queue::{last_added_key, last_read_key};

/// One refresh of a queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueDepth {
    /// Items enqueued but not yet read.
    pub pending: i64,
    /// Items enqueued since the previous refresh.
    pub new: i64,
    /// Items drained since the previous refresh.
    pub done: i64,
    /// `new - done`: positive when the queue is falling behind.
    pub delta: i64,
    /// High-water mark of the `last_added` counter.
    pub max_added: i64,
}

pub struct QueueStats {
    qname: String,
    cache: Arc<dyn CounterCache>,
    /// [current, previous] counter samples.
    last_read: [i64; 2],
    last_added: [i64; 2],
    warned: bool,
}

impl QueueStats {
    pub fn new(qname: &str, cache: Arc<dyn CounterCache>) -> Self {
        Self {
            qname: qname.to_string(),
            cache,
            last_read: [0, 0],
            last_added: [0, 0],
            warned: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.qname
    }

    /// Sample both counters, shifting the previous sample down a slot.
    pub async fn update(&mut self) -> Result<()> {
        let added = self.cache.get(&last_added_key(&self.qname)).await?;
        let read = self.cache.get(&last_read_key(&self.qname)).await?;

        match (added, read) {
            (Some(added), Some(read)) => {
                let added: i64 = added.parse().unwrap_or(0);
                let read: i64 = read.parse().unwrap_or(0);
                self.last_added = [added, self.last_added[0]];
                self.last_read = [read, self.last_read[0]];
            }
            _ => {
                if !self.warned {
                    warn!(queue = %self.qname, "no stats: work queue not present in cache");
                    self.warned = true;
                }
            }
        }
        Ok(())
    }

    pub fn depth(&self) -> QueueDepth {
        let pending = self.last_added[0] - self.last_read[0];
        let new = self.last_added[0] - self.last_added[1];
        let done = self.last_read[0] - self.last_read[1];
        QueueDepth {
            pending,
            new,
            done,
            delta: new - done,
            max_added: self.last_added[0],
        }
    }
}
