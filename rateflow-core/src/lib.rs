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

//! Rateflow Core
//!
//! Fundamental data structures for counter-poll persistence: series paths,
//! poll results, rate bins, bin fitting, and daemon configuration.

pub mod bins;
pub mod config;
pub mod error;
pub mod sample;

pub use bins::{align_to_slot, fit_to_bins, RateAggregation, RateBin, StatAggregation};
pub use config::{
    CacheConfig, DatasetConfig, OidConfig, PersistConfig, PersistSettings, PersisterKind,
    QueueConfig,
};
pub use error::{RateflowError, Result};
pub use sample::{PollResult, RawSample, SeriesPath};
