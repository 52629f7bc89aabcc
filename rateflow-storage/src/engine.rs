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

//! Base-rate aggregation engine.
//!
//! Turns successive raw counter readings into per-interval deltas and
//! higher-frequency rollups. Implausible rates, counter resets, and gaps
//! beyond the heartbeat threshold are data-quality conditions: they refresh
//! the per-series metadata, log, and write no bins.

use std::sync::Arc;

use tracing::{error, warn};

use rateflow_core::{align_to_slot, fit_to_bins, RateBin, RawSample, Result};

use crate::store::{SeriesMetadata, TimeSeriesStore};

/// Default gap threshold, in units of the base polling frequency.
pub const HEARTBEAT_FREQ_MULTIPLIER: i64 = 3;

/// What one sample did to the series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StoreOutcome {
    /// First sample for the series: baseline recorded, no bins.
    Baseline,
    /// Exact re-delivery of the previous sample: no-op.
    Duplicate,
    /// Implied rate above the configured bound: metadata refreshed only.
    RateExceeded,
    /// Counter reset or rollover: metadata refreshed only.
    NegativeDelta,
    /// Gap beyond the heartbeat threshold: only the current slot got a
    /// fractional bin; interior slots await backfill.
    HeartbeatGap,
    /// Normal case: bins written, carrying the raw delta for rollups.
    Delta(f64),
}

pub struct RateEngine {
    store: Arc<dyn TimeSeriesStore>,
    max_rate: f64,
    heartbeat_multiplier: i64,
}

impl RateEngine {
    pub fn new(store: Arc<dyn TimeSeriesStore>, max_rate: f64, heartbeat_multiplier: i64) -> Self {
        Self {
            store,
            max_rate,
            heartbeat_multiplier,
        }
    }

    /// Generate and store the base-rate deltas for one reading, updating the
    /// per-series metadata. On `Delta`, the caller feeds the returned value
    /// to [`RateEngine::generate_aggregations`].
    pub async fn aggregate_base_rate(&self, sample: &RawSample) -> Result<StoreOutcome> {
        let series_key = sample.path.meta_key();

        let Some(mut meta) = self.store.read_metadata(&series_key).await? else {
            let meta = SeriesMetadata::from_sample(sample);
            self.store.write_metadata(&series_key, &meta).await?;
            return Ok(StoreOutcome::Baseline);
        };

        // Store-side compaction can advance min_ts past the cached
        // last_update; never compute a delta reaching behind it.
        if meta.min_ts_ms > meta.last_update_ms {
            meta.last_update_ms = meta.min_ts_ms;
        }

        if sample.val == meta.last_val && sample.ts_ms == meta.last_update_ms {
            return Ok(StoreOutcome::Duplicate);
        }

        let delta_t = sample.ts_ms - meta.last_update_ms;
        let delta_v = sample.val - meta.last_val;
        // delta_t == 0 with a changed value yields an infinite rate, which
        // the bound check below rejects.
        let rate = delta_v / (delta_t as f64 / 1000.0);

        if rate > self.max_rate {
            error!(
                path = %sample.path,
                rate,
                last_val = meta.last_val,
                val = sample.val,
                "max_rate exceeded"
            );
            meta.refresh(sample);
            self.store.write_metadata(&series_key, &meta).await?;
            return Ok(StoreOutcome::RateExceeded);
        }

        if delta_v < 0.0 {
            error!(
                path = %sample.path,
                delta_v,
                last_val = meta.last_val,
                val = sample.val,
                "negative delta"
            );
            meta.refresh(sample);
            self.store.write_metadata(&series_key, &meta).await?;
            return Ok(StoreOutcome::NegativeDelta);
        }

        if delta_t > sample.freq_ms * self.heartbeat_multiplier {
            warn!(
                path = %sample.path,
                from = meta.last_update_ms,
                to = sample.ts_ms,
                "gap exceeds heartbeat"
            );

            // Only the slot containing the new sample gets a bin, sized to
            // the fraction of the delta that falls inside it. The slots in
            // between stay unfilled pending backfill.
            let curr_slot = align_to_slot(sample.ts_ms, sample.freq_ms);
            let curr_frac =
                (delta_v * (sample.ts_ms - curr_slot) as f64 / delta_t as f64).trunc();
            let bin = RateBin::new(sample.path.clone(), curr_slot, sample.freq_ms, curr_frac);
            self.store.write_rate_bin(&bin).await?;

            meta.refresh(sample);
            self.store.write_metadata(&series_key, &meta).await?;
            return Ok(StoreOutcome::HeartbeatGap);
        }

        let updates = fit_to_bins(
            sample.freq_ms,
            meta.last_update_ms,
            meta.last_val,
            sample.ts_ms,
            sample.val,
        );
        for (slot, val) in updates {
            let bin = RateBin::new(sample.path.clone(), slot, sample.freq_ms, val);
            self.store.write_rate_bin(&bin).await?;
        }

        meta.refresh(sample);
        self.store.write_metadata(&series_key, &meta).await?;

        Ok(StoreOutcome::Delta(delta_v))
    }

    /// Fold a valid delta into every configured rollup frequency.
    ///
    /// Sum/count merges commute and can land in any order. Min/max bins are
    /// read back before writing, so when any bound moved the pending stat
    /// writes are flushed to keep the next read-modify-write cycle coherent.
    pub async fn generate_aggregations(
        &self,
        sample: &RawSample,
        delta_v: f64,
        aggregate_freqs: &[i64],
    ) -> Result<()> {
        let mut stat_updated = false;

        for &freq_secs in aggregate_freqs {
            let agg_ts_ms = (sample.ts_secs() / freq_secs) * freq_secs * 1000;
            let freq_ms = freq_secs * 1000;

            self.store
                .update_rate_aggregation(&sample.path, agg_ts_ms, freq_ms, delta_v)
                .await?;
            if self
                .store
                .update_stat_aggregation(&sample.path, agg_ts_ms, freq_ms, delta_v)
                .await?
            {
                stat_updated = true;
            }
        }

        if stat_updated {
            self.store.flush_stats().await?;
        }

        Ok(())
    }
}
