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

//! Persistence worker loop.
//!
//! One worker process per queue shard. The loop pulls results, stores them,
//! and reports throughput on a fixed interval; when the queue drains it
//! flushes batched writes once and then sleeps between polls. The shutdown
//! token is checked at iteration boundaries only, so an in-flight item is
//! always finished before exit.

use std::time::{Duration, Instant};

use tracing::{error, info};

use rateflow_core::{PersistConfig, PersisterKind, RateflowError, Result};
use rateflow_queue::{router::shard_name, PersistQueue};
use rateflow_storage::Persister;

use crate::shutdown::ShutdownToken;

/// Per-worker counters, carried through the loop rather than living in
/// process globals.
pub struct WorkerStats {
    /// Records written since the last throughput line.
    pub data_count: u64,
    /// Records written over the worker's lifetime.
    pub total_count: u64,
    last_stats: Instant,
}

impl WorkerStats {
    pub fn new() -> Self {
        Self {
            data_count: 0,
            total_count: 0,
            last_stats: Instant::now(),
        }
    }
}

impl Default for WorkerStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve the shard queue a worker process should consume, validating the
/// role arguments against the configuration.
///
/// Single-shard queues use the queue name itself; sharded queues require a
/// shard number in `1..=workers`.
pub fn resolve_shard_queue(
    config: &PersistConfig,
    qname: &str,
    shard: Option<usize>,
) -> Result<(String, PersisterKind)> {
    let queue_config = config
        .queues
        .get(qname)
        .ok_or_else(|| RateflowError::Config(format!("unknown queue: {qname}")))?;

    let shard_queue = if queue_config.workers > 1 {
        let shard = shard.ok_or_else(|| {
            RateflowError::Config(format!(
                "queue {qname} has {} shards, a shard number is required",
                queue_config.workers
            ))
        })?;
        if shard == 0 || shard > queue_config.workers {
            return Err(RateflowError::Config(format!(
                "shard {shard} out of range for queue {qname} (1..={})",
                queue_config.workers
            )));
        }
        shard_name(qname, shard)
    } else {
        qname.to_string()
    };

    Ok((shard_queue, queue_config.persister))
}

pub struct PersistWorker {
    queue: PersistQueue,
    persister: Box<dyn Persister>,
    sleep_interval: Duration,
    stats_interval: Duration,
    shutdown: ShutdownToken,
}

impl PersistWorker {
    pub fn new(
        queue: PersistQueue,
        persister: Box<dyn Persister>,
        config: &PersistConfig,
        shutdown: ShutdownToken,
    ) -> Self {
        Self {
            queue,
            persister,
            sleep_interval: Duration::from_secs(config.persist.sleep_interval_secs),
            stats_interval: Duration::from_secs(config.persist.stats_interval_secs),
            shutdown,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        info!(queue = %self.queue.name(), "worker running");

        let mut stats = WorkerStats::new();
        let mut sleeping = false;

        while !self.shutdown.is_cancelled() {
            match self.queue.get().await {
                Ok(Some(task)) => {
                    self.persister.store(&task).await?;
                    stats.data_count += task.data.len() as u64;
                    sleeping = false;

                    if stats.last_stats.elapsed() >= self.stats_interval {
                        let secs = self.stats_interval.as_secs_f64();
                        info!(
                            queue = %self.queue.name(),
                            "{} records written, {:.2} records/sec",
                            stats.data_count,
                            stats.data_count as f64 / secs
                        );
                        stats.total_count += stats.data_count;
                        stats.data_count = 0;
                        stats.last_stats = Instant::now();
                    }
                }
                Ok(None) => {
                    if !sleeping {
                        self.persister.flush().await?;
                        sleeping = true;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.sleep_interval) => {}
                        _ = self.shutdown.cancelled() => {}
                    }
                }
                Err(e) => {
                    // A cache blip is not fatal; back off and retry.
                    error!(queue = %self.queue.name(), error = %e, "queue read failed");
                    tokio::select! {
                        _ = tokio::time::sleep(self.sleep_interval) => {}
                        _ = self.shutdown.cancelled() => {}
                    }
                }
            }
        }

        self.persister.flush().await?;
        stats.total_count += stats.data_count;
        info!(
            queue = %self.queue.name(),
            total = stats.total_count,
            "worker stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PersistConfig {
        toml::from_str(
            r#"
[queues.snmp]
workers = 4
persister = "rate"

[queues.firewall]
persister = "streaming"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_sharded_queue() {
        let config = config();
        let (name, kind) = resolve_shard_queue(&config, "snmp", Some(3)).unwrap();
        assert_eq!(name, "snmp_3");
        assert_eq!(kind, PersisterKind::Rate);
    }

    #[test]
    fn test_resolve_single_shard_queue_ignores_number() {
        let config = config();
        let (name, kind) = resolve_shard_queue(&config, "firewall", None).unwrap();
        assert_eq!(name, "firewall");
        assert_eq!(kind, PersisterKind::Streaming);
    }

    #[test]
    fn test_resolve_rejects_missing_or_bad_shard() {
        let config = config();
        assert!(resolve_shard_queue(&config, "snmp", None).is_err());
        assert!(resolve_shard_queue(&config, "snmp", Some(0)).is_err());
        assert!(resolve_shard_queue(&config, "snmp", Some(5)).is_err());
        assert!(resolve_shard_queue(&config, "nope", Some(1)).is_err());
    }
}
