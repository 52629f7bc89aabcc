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

//! Persisters: the storage strategies a worker can run.
//!
//! Each queue is configured with a [`PersisterKind`]; the registry resolves
//! the kind to a concrete implementation once at worker startup.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::DateTime;
use tracing::{debug, error, warn};

use rateflow_core::{
    PersistConfig, PersisterKind, PollResult, RateflowError, RawSample, Result, SeriesPath,
};

use crate::engine::{RateEngine, StoreOutcome};
use crate::store::TimeSeriesStore;

/// A storage method for poll results.
#[async_trait]
pub trait Persister: Send {
    async fn store(&mut self, result: &PollResult) -> Result<()>;

    /// Push any batched writes. Called when a worker goes idle and again on
    /// shutdown.
    async fn flush(&mut self) -> Result<()>;
}

/// Resolve a configured persister kind to an implementation.
pub fn build_persister(
    kind: PersisterKind,
    config: Arc<PersistConfig>,
    store: Arc<dyn TimeSeriesStore>,
) -> Box<dyn Persister> {
    match kind {
        PersisterKind::Rate => Box::new(RatePersister::new(config, store)),
        PersisterKind::Streaming => {
            Box::new(StreamingPersister::new(config.persist.streaming_log_dir.clone()))
        }
    }
}

/// Writes raw points, base rates, and rollups to the time-series store.
pub struct RatePersister {
    config: Arc<PersistConfig>,
    store: Arc<dyn TimeSeriesStore>,
    engine: RateEngine,
}

impl RatePersister {
    pub fn new(config: Arc<PersistConfig>, store: Arc<dyn TimeSeriesStore>) -> Self {
        let engine = RateEngine::new(
            store.clone(),
            config.persist.max_rate,
            config.persist.heartbeat_multiplier,
        );
        Self {
            config,
            store,
            engine,
        }
    }
}

#[async_trait]
impl Persister for RatePersister {
    async fn store(&mut self, result: &PollResult) -> Result<()> {
        let Some(dataset) = self.config.dataset(&result.oidset_name) else {
            warn!(oidset = %result.oidset_name, "no dataset configured, dropping result");
            return Ok(());
        };
        let Some(oid) = dataset.oid(&result.oid_name) else {
            warn!(
                oidset = %result.oidset_name,
                oid = %result.oid_name,
                "oid not in dataset, dropping result"
            );
            return Ok(());
        };

        let started = Instant::now();
        let mut nvar = 0;

        for (var, val) in &result.data {
            let Some(val) = val else {
                error!(
                    device = %result.device_name,
                    oid = %result.oid_name,
                    var = ?var,
                    "missing value for polled variable"
                );
                continue;
            };
            nvar += 1;

            let path = SeriesPath::from_parts(
                &self.config.persist.namespace,
                &result.device_name,
                &dataset.name,
                var,
            );
            let sample = RawSample::new(path, result.timestamp_ms(), *val, dataset.frequency_ms());

            self.store.write_raw_point(&sample, dataset.ttl_secs).await?;

            if oid.aggregate {
                if let StoreOutcome::Delta(delta_v) =
                    self.engine.aggregate_base_rate(&sample).await?
                {
                    self.engine
                        .generate_aggregations(&sample, delta_v, &dataset.aggregates)
                        .await?;
                }
            }
        }

        debug!(
            vars = nvar,
            elapsed_ms = started.elapsed().as_millis() as u64,
            result = %result,
            "stored poll result"
        );
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        match self.store.flush().await {
            Err(RateflowError::RetriesExhausted(msg)) => {
                // Batched writes stay queued and retry on the next cycle.
                warn!(error = %msg, "flush failed, retry budget exhausted");
                Ok(())
            }
            other => other,
        }
    }
}

/// Appends poll results as JSON to hourly-rotated log files.
pub struct StreamingPersister {
    dir: PathBuf,
    filename: Option<String>,
    fd: Option<File>,
}

impl StreamingPersister {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            filename: None,
            fd: None,
        }
    }

    fn rotate(&mut self, dst: String) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let fd = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(&dst))?;
        self.filename = Some(dst);
        self.fd = Some(fd);
        Ok(())
    }

    fn hour_stamp(ts_secs: i64) -> Result<String> {
        let dt = DateTime::from_timestamp(ts_secs, 0)
            .ok_or_else(|| RateflowError::Store(format!("timestamp out of range: {ts_secs}")))?;
        Ok(dt.format("%Y%m%d_%H").to_string())
    }
}

#[async_trait]
impl Persister for StreamingPersister {
    async fn store(&mut self, result: &PollResult) -> Result<()> {
        let dst = Self::hour_stamp(result.timestamp)?;
        if self.filename.as_deref() != Some(dst.as_str()) {
            self.rotate(dst)?;
        }

        let fd = self.fd.as_mut().ok_or_else(|| {
            RateflowError::Store("streaming log file not open".to_string())
        })?;
        serde_json::to_writer(&mut *fd, result)?;
        fd.write_all(b"\n\n")?;

        debug!(
            oidset = %result.oidset_name,
            oid = %result.oid_name,
            device = %result.device_name,
            "stored result to streaming log"
        );
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        if let Some(fd) = self.fd.as_mut() {
            fd.flush()?;
        }
        Ok(())
    }
}
