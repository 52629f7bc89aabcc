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

//! The time-series store contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use rateflow_core::{RateBin, RawSample, Result, SeriesPath};

/// Per-series last-seen state used to compute deltas.
///
/// One entry per distinct series key. The rate engine is the sole writer;
/// `last_update_ms` never decreases across successful updates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesMetadata {
    pub last_val: f64,
    pub last_update_ms: i64,
    /// Earliest timestamp the store still holds for this series. Advances
    /// under store-side compaction; the engine never computes a delta that
    /// reaches behind it.
    pub min_ts_ms: i64,
}

impl SeriesMetadata {
    pub fn from_sample(sample: &RawSample) -> Self {
        Self {
            last_val: sample.val,
            last_update_ms: sample.ts_ms,
            min_ts_ms: sample.ts_ms,
        }
    }

    /// Take the most recently seen value and timestamp from a sample.
    pub fn refresh(&mut self, sample: &RawSample) {
        self.last_val = sample.val;
        self.last_update_ms = sample.ts_ms;
    }
}

/// Write/read contract against the backing column store.
///
/// Implementations may batch writes; `flush` forces visibility of anything
/// batched, and `flush_stats` does the same for stat-aggregation writes
/// alone, which must land before the next read-modify-write cycle on the
/// same key.
#[async_trait]
pub trait TimeSeriesStore: Send + Sync {
    /// Store one raw reading, with an optional retention TTL in seconds.
    async fn write_raw_point(&self, sample: &RawSample, ttl_secs: Option<u64>) -> Result<()>;

    /// Idempotent upsert of a base-rate bin.
    async fn write_rate_bin(&self, bin: &RateBin) -> Result<()>;

    async fn read_metadata(&self, series_key: &str) -> Result<Option<SeriesMetadata>>;

    async fn write_metadata(&self, series_key: &str, meta: &SeriesMetadata) -> Result<()>;

    /// Add a delta into the rollup sum/count at the given bin.
    async fn update_rate_aggregation(
        &self,
        path: &SeriesPath,
        ts_ms: i64,
        freq_ms: i64,
        delta: f64,
    ) -> Result<()>;

    /// Widen the rollup min/max at the given bin if `val` extends it.
    /// Returns whether a bound moved (seeding a new bin counts).
    async fn update_stat_aggregation(
        &self,
        path: &SeriesPath,
        ts_ms: i64,
        freq_ms: i64,
        val: f64,
    ) -> Result<bool>;

    /// Force visibility of all batched writes.
    async fn flush(&self) -> Result<()>;

    /// Force visibility of batched stat-aggregation writes.
    async fn flush_stats(&self) -> Result<()>;

    /// Probe whether any base-rate key exists for the series at the given
    /// frequency within `[ts_min_ms, ts_max_ms]`.
    async fn check_keys_exist(
        &self,
        path: &SeriesPath,
        freq_ms: i64,
        ts_min_ms: i64,
        ts_max_ms: i64,
    ) -> Result<bool>;
}
