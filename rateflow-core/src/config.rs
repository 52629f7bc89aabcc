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

//! Daemon configuration.
//!
//! Loaded once from a TOML file at startup. The dataset catalog replaces a
//! database-backed OID registry: each dataset names its polling frequency,
//! raw-point TTL, rollup frequencies, and which OIDs get rate aggregation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RateflowError, Result};

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub persist: PersistSettings,

    /// Queue name -> shard count and persister kind.
    pub queues: BTreeMap<String, QueueConfig>,

    /// Lower-cased oidset name -> queue names its results fan out to.
    #[serde(default)]
    pub persist_map: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub datasets: Vec<DatasetConfig>,
}

/// Shared backing cache for the persist queues.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_uri")]
    pub uri: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            uri: default_cache_uri(),
        }
    }
}

/// Tunables for the worker loop and the rate engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistSettings {
    /// Seconds a worker sleeps after draining its queue.
    #[serde(default = "default_sleep_interval")]
    pub sleep_interval_secs: u64,

    /// Seconds between throughput log lines.
    #[serde(default = "default_stats_interval")]
    pub stats_interval_secs: u64,

    /// Upper bound on a physically plausible rate (units/sec). Samples
    /// implying a faster rate are logged and skipped.
    #[serde(default = "default_max_rate")]
    pub max_rate: f64,

    /// Gap threshold in units of the base polling frequency. Gaps wider than
    /// this are treated as exceptional rather than jitter.
    #[serde(default = "default_heartbeat_multiplier")]
    pub heartbeat_multiplier: i64,

    /// Leading path segment for all series written by this deployment.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Directory for the streaming persister's rotated log files.
    #[serde(default = "default_streaming_log_dir")]
    pub streaming_log_dir: PathBuf,
}

impl Default for PersistSettings {
    fn default() -> Self {
        Self {
            sleep_interval_secs: default_sleep_interval(),
            stats_interval_secs: default_stats_interval(),
            max_rate: default_max_rate(),
            heartbeat_multiplier: default_heartbeat_multiplier(),
            namespace: default_namespace(),
            streaming_log_dir: default_streaming_log_dir(),
        }
    }
}

/// Which persister implementation a queue's workers run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PersisterKind {
    /// Time-series store path: raw points, base rates, rollups.
    Rate,
    /// Hourly-rotated JSON log files.
    Streaming,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Shard count; each shard gets its own worker process.
    #[serde(default = "default_workers")]
    pub workers: usize,

    pub persister: PersisterKind,
}

/// One named collection of polled variables sharing a frequency.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetConfig {
    pub name: String,

    /// Base polling frequency, seconds.
    pub frequency_secs: i64,

    /// TTL for raw points, seconds. Absent means the store keeps them.
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    /// Rollup frequencies, seconds.
    #[serde(default)]
    pub aggregates: Vec<i64>,

    #[serde(default)]
    pub oids: Vec<OidConfig>,
}

impl DatasetConfig {
    pub fn frequency_ms(&self) -> i64 {
        self.frequency_secs * 1000
    }

    pub fn oid(&self, name: &str) -> Option<&OidConfig> {
        self.oids.iter().find(|o| o.name == name)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OidConfig {
    pub name: String,

    /// Whether this OID's counters get base rates and rollups. Gauges and
    /// informational OIDs leave this off and store raw points only.
    #[serde(default)]
    pub aggregate: bool,
}

impl PersistConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw).map_err(|e| RateflowError::Config(e.to_string()))
    }

    pub fn dataset(&self, name: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.name == name)
    }

    /// Queues an oidset's results fan out to, keyed by lower-cased name.
    pub fn queues_for(&self, oidset_name: &str) -> Option<&[String]> {
        self.persist_map
            .get(&oidset_name.to_lowercase())
            .map(|v| v.as_slice())
    }
}

fn default_cache_uri() -> String {
    "redis://127.0.0.1:6379/".to_string()
}

fn default_workers() -> usize {
    1
}

fn default_sleep_interval() -> u64 {
    1
}

fn default_stats_interval() -> u64 {
    60
}

fn default_max_rate() -> f64 {
    110e9
}

fn default_heartbeat_multiplier() -> i64 {
    3
}

fn default_namespace() -> String {
    "snmp".to_string()
}

fn default_streaming_log_dir() -> PathBuf {
    PathBuf::from("/var/log/rateflow")
}
