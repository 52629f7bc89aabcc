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

//! The rateflowd daemon.
//!
//! One supervisor process and one worker process per queue shard. Workers
//! pull poll results off their shard queue, run them through a persister,
//! and flush batched writes when idle. The supervisor restarts workers that
//! die and tears everything down on a termination signal.

pub mod shutdown;
pub mod stats;
pub mod supervisor;
pub mod worker;

pub use shutdown::{listen_for_signals, shutdown_pair, ShutdownHandle, ShutdownToken};
pub use supervisor::Supervisor;
pub use worker::{resolve_shard_queue, PersistWorker, WorkerStats};
