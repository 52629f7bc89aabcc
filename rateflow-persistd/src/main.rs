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

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use rateflow_core::PersistConfig;
use rateflow_persistd::stats::run_stats;
use rateflow_persistd::{listen_for_signals, resolve_shard_queue, PersistWorker, Supervisor};
use rateflow_queue::{CounterCache, PersistQueue, RedisCounterCache};
use rateflow_storage::{build_persister, MemoryTimeSeriesStore, TimeSeriesStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Supervise one worker process per queue shard.
    Manager,
    /// Consume one shard queue.
    Worker,
    /// Print queue depths on an interval.
    Stats,
}

#[derive(Parser, Debug)]
#[command(name = "rateflowd", version, about = "Counter-poll persistence daemon")]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, env = "RATEFLOWD_CONFIG")]
    config: PathBuf,

    /// Process role
    #[arg(short, long, value_enum, default_value = "manager")]
    role: Role,

    /// Queue to consume (worker role)
    #[arg(short, long)]
    queue: Option<String>,

    /// Shard number within the queue (worker role)
    #[arg(short = 'n', long)]
    shard: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Arc::new(PersistConfig::load(&args.config)?);
    let shutdown = listen_for_signals()?;

    match args.role {
        Role::Manager => {
            let mut supervisor = Supervisor::new(config, args.config.clone(), shutdown);
            supervisor.run().await?;
        }
        Role::Worker => {
            let qname = args
                .queue
                .context("--queue is required for the worker role")?;
            let (shard_queue, kind) = resolve_shard_queue(&config, &qname, args.shard)?;

            let cache: Arc<dyn CounterCache> =
                Arc::new(RedisCounterCache::connect(&config.cache.uri)?);
            let queue = PersistQueue::new(&shard_queue, cache).await?;

            // The backing column store is wired here; real deployments
            // substitute their backend behind the same trait.
            let store: Arc<dyn TimeSeriesStore> = Arc::new(MemoryTimeSeriesStore::new());
            let persister = build_persister(kind, config.clone(), store);

            let mut worker = PersistWorker::new(queue, persister, &config, shutdown);
            worker.run().await?;
        }
        Role::Stats => {
            let cache: Arc<dyn CounterCache> =
                Arc::new(RedisCounterCache::connect(&config.cache.uri)?);
            run_stats(config, cache, shutdown).await?;
        }
    }

    Ok(())
}
