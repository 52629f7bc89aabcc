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

//! Queue depth reporting for the `stats` role.
//!
//! Prints a table of every shard queue's pending/new/done/delta counters to
//! stdout every few seconds, plus a totals row. An operational view, not a
//! machine interface.

use std::sync::Arc;
use std::time::Duration;

use rateflow_core::{PersistConfig, Result};
use rateflow_queue::{router::shard_name, CounterCache, QueueStats};

use crate::shutdown::ShutdownToken;

const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Every shard queue name the configuration implies.
pub fn all_shard_queues(config: &PersistConfig) -> Vec<String> {
    let mut names = Vec::new();
    for (qname, queue_config) in &config.queues {
        if queue_config.workers > 1 {
            for i in 1..=queue_config.workers {
                names.push(shard_name(qname, i));
            }
        } else {
            names.push(qname.clone());
        }
    }
    names
}

pub async fn run_stats(
    config: Arc<PersistConfig>,
    cache: Arc<dyn CounterCache>,
    shutdown: ShutdownToken,
) -> Result<()> {
    let mut stats: Vec<QueueStats> = all_shard_queues(&config)
        .into_iter()
        .map(|name| QueueStats::new(&name, cache.clone()))
        .collect();

    for entry in &mut stats {
        entry.update().await?;
    }

    while !shutdown.is_cancelled() {
        println!(
            "{:>20} {:>8} {:>8} {:>8} {:>8} {:>14}",
            "queue", "pending", "new", "done", "delta", "max"
        );

        let mut totals = [0i64; 4];
        for entry in &mut stats {
            entry.update().await?;
            let depth = entry.depth();
            println!(
                "{:>20} {:>8} {:>8} {:>8} {:>8} {:>14}",
                entry.name(),
                depth.pending,
                depth.new,
                depth.done,
                depth.delta,
                depth.max_added
            );
            totals[0] += depth.pending;
            totals[1] += depth.new;
            totals[2] += depth.done;
            totals[3] += depth.delta;
        }
        println!(
            "{:>20} {:>8} {:>8} {:>8} {:>8}",
            "TOTAL", totals[0], totals[1], totals[2], totals[3]
        );
        println!();

        tokio::select! {
            _ = tokio::time::sleep(REFRESH_INTERVAL) => {}
            _ = shutdown.cancelled() => {}
        }
    }

    Ok(())
}
