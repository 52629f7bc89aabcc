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

//! Rate bins, aggregation values, and bin fitting.
//!
//! A rate bin holds the portion of a counter delta attributed to one
//! frequency-aligned interval. `fit_to_bins` splits a delta across every
//! interval touched by two successive readings, proportional to the time
//! each interval covers, so the shares always sum back to the full delta.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::sample::SeriesPath;

/// Align a timestamp down to the start of its frequency slot.
#[inline]
pub fn align_to_slot(ts_ms: i64, freq_ms: i64) -> i64 {
    ts_ms - ts_ms % freq_ms
}

/// A computed delta (or fractional delta) for one base-rate interval.
///
/// Writes are idempotent upserts keyed on (path, ts_ms, freq_ms), so a later
/// backfill may repair a bin by overwriting it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBin {
    pub path: SeriesPath,
    /// Slot-aligned timestamp, milliseconds.
    pub ts_ms: i64,
    pub freq_ms: i64,
    pub val: f64,
}

impl RateBin {
    pub fn new(path: SeriesPath, ts_ms: i64, freq_ms: i64, val: f64) -> Self {
        Self {
            path,
            ts_ms,
            freq_ms,
            val,
        }
    }
}

/// Running sum and count for a rollup interval. Addition commutes, so these
/// merges are safe to apply out of order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateAggregation {
    pub sum: f64,
    pub count: u64,
}

impl RateAggregation {
    pub fn merge_delta(&mut self, delta: f64) {
        self.sum += delta;
        self.count += 1;
    }
}

/// Min/max bounds for a rollup interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StatAggregation {
    pub min: f64,
    pub max: f64,
}

impl StatAggregation {
    /// Seed both bounds from the first observed value.
    pub fn seed(val: f64) -> Self {
        Self { min: val, max: val }
    }

    /// Widen the bounds if `val` extends them. Returns whether anything moved.
    pub fn observe(&mut self, val: f64) -> bool {
        let mut changed = false;
        if val < self.min {
            self.min = val;
            changed = true;
        }
        if val > self.max {
            self.max = val;
            changed = true;
        }
        changed
    }
}

/// Distribute the delta between two readings across every frequency slot the
/// interval `[start_ts, end_ts]` touches.
///
/// Each slot's share is proportional to the fraction of the interval it
/// covers; the final slot absorbs the rounding residue so the values sum to
/// exactly `end_val - start_val`. When both readings land in the same slot
/// the result has a single entry.
pub fn fit_to_bins(
    freq_ms: i64,
    start_ts: i64,
    start_val: f64,
    end_ts: i64,
    end_val: f64,
) -> BTreeMap<i64, f64> {
    let mut bins = BTreeMap::new();
    let delta_v = end_val - start_val;
    let delta_t = end_ts - start_ts;

    let start_slot = align_to_slot(start_ts, freq_ms);
    let end_slot = align_to_slot(end_ts, freq_ms);

    if start_slot == end_slot || delta_t <= 0 {
        bins.insert(end_slot, delta_v);
        return bins;
    }

    let mut assigned = 0.0;
    let mut slot = start_slot;
    while slot < end_slot {
        let covered_from = slot.max(start_ts);
        let covered_to = slot + freq_ms;
        let share = delta_v * (covered_to - covered_from) as f64 / delta_t as f64;
        bins.insert(slot, share);
        assigned += share;
        slot += freq_ms;
    }
    bins.insert(end_slot, delta_v - assigned);

    bins
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_slot_alignment() {
        assert_eq!(align_to_slot(135_000, 60_000), 120_000);
        assert_eq!(align_to_slot(120_000, 60_000), 120_000);
        assert_eq!(align_to_slot(0, 30_000), 0);
    }

    #[test]
    fn test_fit_single_slot() {
        let bins = fit_to_bins(30_000, 1_000, 100.0, 20_000, 400.0);
        assert_eq!(bins.len(), 1);
        assert_eq!(bins[&0], 300.0);
    }

    #[test]
    fn test_fit_two_slots() {
        // Readings at 20s and 40s with 30s slots: 2/3 of the delta lands in
        // slot 0, the rest in slot 30000.
        let bins = fit_to_bins(30_000, 20_000, 0.0, 40_000, 300.0);
        assert_eq!(bins.len(), 2);
        assert_eq!(bins[&0], 150.0);
        assert_eq!(bins[&30_000], 150.0);
    }

    #[test]
    fn test_fit_many_slots_sums_to_delta() {
        let bins = fit_to_bins(30_000, 5_000, 1_000.0, 125_000, 1_700.0);
        assert_eq!(bins.len(), 5);
        let total: f64 = bins.values().sum();
        assert!((total - 700.0).abs() < 1e-9);
        // Interior slots are fully covered, so they carry equal shares.
        assert_eq!(bins[&30_000], bins[&60_000]);
        assert_eq!(bins[&60_000], bins[&90_000]);
    }

    #[test]
    fn test_stat_aggregation_bounds() {
        let mut stat = StatAggregation::seed(5.0);
        assert!(stat.observe(9.0));
        assert!(stat.observe(3.0));
        assert!(!stat.observe(7.0));
        assert_eq!(stat.min, 3.0);
        assert_eq!(stat.max, 9.0);
    }

    #[test]
    fn test_rate_aggregation_merge() {
        let mut agg = RateAggregation::default();
        agg.merge_delta(10.0);
        agg.merge_delta(2.5);
        assert_eq!(agg.sum, 12.5);
        assert_eq!(agg.count, 2);
    }

    proptest! {
        #[test]
        fn prop_fit_preserves_delta(
            freq in 1_000i64..120_000,
            start_ts in 0i64..10_000_000,
            span in 1i64..2_000_000,
            start_val in 0.0f64..1e12,
            delta in 0.0f64..1e9,
        ) {
            let end_ts = start_ts + span;
            let end_val = start_val + delta;
            let bins = fit_to_bins(freq, start_ts, start_val, end_ts, end_val);

            let expected = end_val - start_val;
            let total: f64 = bins.values().sum();
            prop_assert!((total - expected).abs() <= 1e-9 * expected.abs().max(1.0));

            // Every slot is aligned and inside the covered range.
            for slot in bins.keys() {
                prop_assert_eq!(slot % freq, 0);
                prop_assert!(*slot >= align_to_slot(start_ts, freq));
                prop_assert!(*slot <= align_to_slot(end_ts, freq));
            }
        }
    }
}
