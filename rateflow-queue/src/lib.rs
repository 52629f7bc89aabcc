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

//! Rateflow Queue Layer
//!
//! A durable FIFO queue built on a shared atomic-increment counter cache,
//! plus the shard router that keeps related series on the same worker.
//!
//! The protocol is lock-free by construction: each slot is claimed by
//! exactly one `put` and consumed by exactly one `get` through the two
//! per-queue counters. Items can be lost (a producer crashing between slot
//! reservation and payload write leaves a permanently empty slot the
//! consumer detects, counts, and skips) but never duplicated.

pub mod cache;
pub mod dispatch;
pub mod queue;
pub mod router;
pub mod stats;

pub use cache::{CounterCache, MemoryCounterCache, RedisCounterCache};
pub use dispatch::PersistDispatcher;
pub use queue::{last_added_key, last_read_key, PersistQueue};
pub use router::ShardedQueue;
pub use stats::{QueueDepth, QueueStats};
