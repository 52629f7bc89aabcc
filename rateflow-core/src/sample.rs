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

//! Poll results and raw samples.
//!
//! A `PollResult` is the unit of work placed on a persist queue: one polling
//! run of one OID against one device, carrying a list of (variable path,
//! value) pairs. Workers unpack it into per-series `RawSample`s.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Ordered list of segments identifying one time series:
/// namespace / device / dataset / variable parts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesPath {
    segments: Vec<String>,
}

impl SeriesPath {
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    /// Build a full variable path: `namespace/device/dataset` plus the
    /// per-variable segments reported by the poller.
    pub fn from_parts(namespace: &str, device: &str, dataset: &str, var: &[String]) -> Self {
        let mut segments = Vec::with_capacity(3 + var.len());
        segments.push(namespace.to_string());
        segments.push(device.to_string());
        segments.push(dataset.to_string());
        segments.extend(var.iter().cloned());
        Self { segments }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Key under which per-series metadata is cached.
    pub fn meta_key(&self) -> String {
        self.segments.join(":")
    }
}

impl fmt::Display for SeriesPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.segments.join(":"))
    }
}

/// One raw counter reading for one series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    pub path: SeriesPath,
    /// Reading timestamp, milliseconds since the epoch.
    pub ts_ms: i64,
    pub val: f64,
    /// Base polling frequency of the series, milliseconds.
    pub freq_ms: i64,
}

impl RawSample {
    pub fn new(path: SeriesPath, ts_ms: i64, val: f64, freq_ms: i64) -> Self {
        Self {
            path,
            ts_ms,
            val,
            freq_ms,
        }
    }

    pub fn ts_secs(&self) -> i64 {
        self.ts_ms / 1000
    }
}

/// The results of one polling run, as placed on a persist queue.
///
/// `data` holds (variable path segments, raw value) pairs. A value may be
/// absent when the device answered the walk but not the instance; persisters
/// log and skip those entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResult {
    pub oidset_name: String,
    pub device_name: String,
    pub oid_name: String,
    /// Poll timestamp, seconds since the epoch.
    pub timestamp: i64,
    pub data: Vec<(Vec<String>, Option<f64>)>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl PollResult {
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp * 1000
    }
}

impl fmt::Display for PollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} {}",
            self.device_name, self.oidset_name, self.timestamp
        )
    }
}
