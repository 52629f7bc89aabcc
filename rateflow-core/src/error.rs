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

//! Error types shared across the workspace.

use thiserror::Error;

/// Errors raised by the persistence pipeline.
#[derive(Debug, Error)]
pub enum RateflowError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store operation failed: {0}")]
    Store(String),

    /// The backing store exhausted its retry budget. Flush paths log this
    /// and keep batched writes queued for the next cycle.
    #[error("store retry budget exhausted: {0}")]
    RetriesExhausted(String),

    #[error("cache operation failed: {0}")]
    Cache(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RateflowError>;
