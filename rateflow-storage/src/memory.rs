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

//! In-memory reference implementation of the store contract.
//!
//! Aggregation writes are batched the way the real backend batches them:
//! they sit in pending buffers until `flush`/`flush_stats`, but reads made
//! through the update paths see pending state, so read-modify-write cycles
//! stay correct under the single-writer-per-key model.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use rateflow_core::{
    RateAggregation, RateBin, RateflowError, RawSample, Result, SeriesPath, StatAggregation,
};

use crate::store::{SeriesMetadata, TimeSeriesStore};

/// Key for point and bin maps: (series key, frequency, timestamp).
type BinKey = (String, i64, i64);

#[derive(Debug, Clone, Copy)]
struct RawPoint {
    #[allow(dead_code)]
    val: f64,
    #[allow(dead_code)]
    ttl_secs: Option<u64>,
}

#[derive(Default)]
pub struct MemoryTimeSeriesStore {
    raw: RwLock<BTreeMap<BinKey, RawPoint>>,
    rate_bins: RwLock<BTreeMap<BinKey, f64>>,
    metadata: RwLock<BTreeMap<String, SeriesMetadata>>,

    rate_aggs: RwLock<BTreeMap<BinKey, RateAggregation>>,
    pending_rate_aggs: RwLock<BTreeMap<BinKey, RateAggregation>>,

    stat_aggs: RwLock<BTreeMap<BinKey, StatAggregation>>,
    pending_stat_aggs: RwLock<BTreeMap<BinKey, StatAggregation>>,

    /// Remaining flush calls to fail with `RetriesExhausted`. TTLs are
    /// recorded but not enforced; expiry belongs to the real backend.
    flush_failures: AtomicU32,
}

impl MemoryTimeSeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &SeriesPath, freq_ms: i64, ts_ms: i64) -> BinKey {
        (path.meta_key(), freq_ms, ts_ms)
    }

    /// Make the next `n` flush calls fail as if the backend retry budget
    /// were exhausted.
    pub fn inject_flush_failures(&self, n: u32) {
        self.flush_failures.store(n, Ordering::SeqCst);
    }

    pub fn raw_point_count(&self) -> usize {
        self.raw.read().len()
    }

    /// Base-rate bin values for one series, keyed by slot timestamp.
    pub fn rate_bin_values(&self, path: &SeriesPath, freq_ms: i64) -> BTreeMap<i64, f64> {
        let meta_key = path.meta_key();
        self.rate_bins
            .read()
            .iter()
            .filter(|((k, f, _), _)| *k == meta_key && *f == freq_ms)
            .map(|((_, _, ts), val)| (*ts, *val))
            .collect()
    }

    /// Read-through view of a rollup sum/count bin (pending over committed).
    pub fn rate_aggregation(
        &self,
        path: &SeriesPath,
        freq_ms: i64,
        ts_ms: i64,
    ) -> Option<RateAggregation> {
        let key = Self::key(path, freq_ms, ts_ms);
        self.pending_rate_aggs
            .read()
            .get(&key)
            .copied()
            .or_else(|| self.rate_aggs.read().get(&key).copied())
    }

    /// Sum/count bin as visible after a flush only.
    pub fn committed_rate_aggregation(
        &self,
        path: &SeriesPath,
        freq_ms: i64,
        ts_ms: i64,
    ) -> Option<RateAggregation> {
        self.rate_aggs
            .read()
            .get(&Self::key(path, freq_ms, ts_ms))
            .copied()
    }

    /// Read-through view of a rollup min/max bin.
    pub fn stat_aggregation(
        &self,
        path: &SeriesPath,
        freq_ms: i64,
        ts_ms: i64,
    ) -> Option<StatAggregation> {
        let key = Self::key(path, freq_ms, ts_ms);
        self.pending_stat_aggs
            .read()
            .get(&key)
            .copied()
            .or_else(|| self.stat_aggs.read().get(&key).copied())
    }

    /// Min/max bin as visible after a flush only.
    pub fn committed_stat_aggregation(
        &self,
        path: &SeriesPath,
        freq_ms: i64,
        ts_ms: i64,
    ) -> Option<StatAggregation> {
        self.stat_aggs
            .read()
            .get(&Self::key(path, freq_ms, ts_ms))
            .copied()
    }

    pub fn pending_write_count(&self) -> usize {
        self.pending_rate_aggs.read().len() + self.pending_stat_aggs.read().len()
    }

    fn take_flush_failure(&self) -> Result<()> {
        let remaining = self.flush_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.flush_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RateflowError::RetriesExhausted(
                "injected flush failure".to_string(),
            ));
        }
        Ok(())
    }

    fn commit_stats(&self) {
        let mut pending = self.pending_stat_aggs.write();
        let mut committed = self.stat_aggs.write();
        for (key, stat) in std::mem::take(&mut *pending) {
            committed
                .entry(key)
                .and_modify(|existing| {
                    existing.observe(stat.min);
                    existing.observe(stat.max);
                })
                .or_insert(stat);
        }
    }
}

#[async_trait]
impl TimeSeriesStore for MemoryTimeSeriesStore {
    async fn write_raw_point(&self, sample: &RawSample, ttl_secs: Option<u64>) -> Result<()> {
        self.raw.write().insert(
            Self::key(&sample.path, sample.freq_ms, sample.ts_ms),
            RawPoint {
                val: sample.val,
                ttl_secs,
            },
        );
        Ok(())
    }

    async fn write_rate_bin(&self, bin: &RateBin) -> Result<()> {
        self.rate_bins
            .write()
            .insert(Self::key(&bin.path, bin.freq_ms, bin.ts_ms), bin.val);
        Ok(())
    }

    async fn read_metadata(&self, series_key: &str) -> Result<Option<SeriesMetadata>> {
        Ok(self.metadata.read().get(series_key).copied())
    }

    async fn write_metadata(&self, series_key: &str, meta: &SeriesMetadata) -> Result<()> {
        self.metadata
            .write()
            .insert(series_key.to_string(), *meta);
        Ok(())
    }

    async fn update_rate_aggregation(
        &self,
        path: &SeriesPath,
        ts_ms: i64,
        freq_ms: i64,
        delta: f64,
    ) -> Result<()> {
        let key = Self::key(path, freq_ms, ts_ms);
        let mut pending = self.pending_rate_aggs.write();
        let entry = pending.entry(key.clone()).or_insert_with(|| {
            self.rate_aggs
                .read()
                .get(&key)
                .copied()
                .unwrap_or_default()
        });
        entry.merge_delta(delta);
        Ok(())
    }

    async fn update_stat_aggregation(
        &self,
        path: &SeriesPath,
        ts_ms: i64,
        freq_ms: i64,
        val: f64,
    ) -> Result<bool> {
        let key = Self::key(path, freq_ms, ts_ms);
        let mut pending = self.pending_stat_aggs.write();
        match pending.get_mut(&key) {
            Some(stat) => Ok(stat.observe(val)),
            None => match self.stat_aggs.read().get(&key) {
                Some(committed) => {
                    let mut stat = *committed;
                    let changed = stat.observe(val);
                    if changed {
                        pending.insert(key, stat);
                    }
                    Ok(changed)
                }
                None => {
                    pending.insert(key, StatAggregation::seed(val));
                    Ok(true)
                }
            },
        }
    }

    async fn flush(&self) -> Result<()> {
        self.take_flush_failure()?;

        let mut pending = self.pending_rate_aggs.write();
        let mut committed = self.rate_aggs.write();
        for (key, agg) in std::mem::take(&mut *pending) {
            let entry = committed.entry(key).or_default();
            entry.sum = agg.sum;
            entry.count = agg.count;
        }
        drop(committed);
        drop(pending);

        self.commit_stats();
        Ok(())
    }

    async fn flush_stats(&self) -> Result<()> {
        self.take_flush_failure()?;
        self.commit_stats();
        Ok(())
    }

    async fn check_keys_exist(
        &self,
        path: &SeriesPath,
        freq_ms: i64,
        ts_min_ms: i64,
        ts_max_ms: i64,
    ) -> Result<bool> {
        let meta_key = path.meta_key();
        let lo = (meta_key.clone(), freq_ms, ts_min_ms);
        let hi = (meta_key, freq_ms, ts_max_ms);
        Ok(self.rate_bins.read().range(lo..=hi).next().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path() -> SeriesPath {
        SeriesPath::new(vec![
            "snmp".to_string(),
            "router1".to_string(),
            "FastPollHC".to_string(),
            "ifHCInOctets".to_string(),
        ])
    }

    #[tokio::test]
    async fn test_rate_bin_upsert_overwrites() {
        let store = MemoryTimeSeriesStore::new();
        let bin = RateBin::new(path(), 30_000, 30_000, 10.0);
        store.write_rate_bin(&bin).await.unwrap();

        let repaired = RateBin::new(path(), 30_000, 30_000, 12.0);
        store.write_rate_bin(&repaired).await.unwrap();

        let bins = store.rate_bin_values(&path(), 30_000);
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[&30_000], 12.0);
    }

    #[tokio::test]
    async fn test_stat_aggregation_read_through_before_flush() {
        let store = MemoryTimeSeriesStore::new();

        assert!(store
            .update_stat_aggregation(&path(), 0, 300_000, 5.0)
            .await
            .unwrap());
        // Pending state is visible to the next update even without a flush.
        assert!(store
            .update_stat_aggregation(&path(), 0, 300_000, 4.0)
            .await
            .unwrap());
        assert!(!store
            .update_stat_aggregation(&path(), 0, 300_000, 4.5)
            .await
            .unwrap());

        assert!(store.committed_stat_aggregation(&path(), 300_000, 0).is_none());
        store.flush_stats().await.unwrap();
        let stat = store.committed_stat_aggregation(&path(), 300_000, 0).unwrap();
        assert_eq!(stat.min, 4.0);
        assert_eq!(stat.max, 5.0);
    }

    #[tokio::test]
    async fn test_rate_aggregation_accumulates_across_flushes() {
        let store = MemoryTimeSeriesStore::new();
        store
            .update_rate_aggregation(&path(), 0, 300_000, 10.0)
            .await
            .unwrap();
        store.flush().await.unwrap();
        store
            .update_rate_aggregation(&path(), 0, 300_000, 5.0)
            .await
            .unwrap();

        let agg = store.rate_aggregation(&path(), 300_000, 0).unwrap();
        assert_eq!(agg.sum, 15.0);
        assert_eq!(agg.count, 2);
    }

    #[tokio::test]
    async fn test_flush_failure_injection() {
        let store = MemoryTimeSeriesStore::new();
        store.inject_flush_failures(1);
        assert!(matches!(
            store.flush().await,
            Err(RateflowError::RetriesExhausted(_))
        ));
        assert!(store.flush().await.is_ok());
    }

    #[tokio::test]
    async fn test_check_keys_exist_range() {
        let store = MemoryTimeSeriesStore::new();
        store
            .write_rate_bin(&RateBin::new(path(), 60_000, 30_000, 1.0))
            .await
            .unwrap();

        assert!(store
            .check_keys_exist(&path(), 30_000, 0, 90_000)
            .await
            .unwrap());
        assert!(!store
            .check_keys_exist(&path(), 30_000, 90_000, 200_000)
            .await
            .unwrap());
    }
}
