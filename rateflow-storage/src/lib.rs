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

//! Rateflow Storage Layer
//!
//! The time-series store contract, an in-memory reference implementation,
//! the base-rate aggregation engine, and the persisters that drive it.
//!
//! The backing column store is an external collaborator: everything here
//! talks to it through the [`TimeSeriesStore`] trait, and the engine and
//! persisters receive a store handle at construction. The in-memory store
//! implements the same contract for tests and single-node deployments.

pub mod engine;
pub mod memory;
pub mod persister;
pub mod store;

pub use engine::{RateEngine, StoreOutcome};
pub use memory::MemoryTimeSeriesStore;
pub use persister::{build_persister, Persister, RatePersister, StreamingPersister};
pub use store::{SeriesMetadata, TimeSeriesStore};
