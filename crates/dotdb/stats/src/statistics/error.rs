// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use dotdb_common::SchemaError;
use thiserror::Error;

use crate::encoding::KeyError;
use crate::storage_engine::StorageError;

/// Errors raised by the statistics subsystem. Missing statistics are never an error.
#[derive(Debug, Error)]
pub enum StatisticsError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Key encoding error: {0}")]
    Key(#[from] KeyError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("No such table: {0}")]
    NoSuchTable(String),

    #[error("No such index: {0}")]
    NoSuchIndex(String),

    #[error("Malformed snapshot: {0}")]
    MalformedSnapshot(String),

    #[error("Statistics row codec error: {0}")]
    Codec(String),

    #[error("Invalid histogram slot: first column {first_column}, column count {column_count}")]
    InvalidHistogramSlot { first_column: i64, column_count: i64 },

    #[error("Statistics scan of {0} was cancelled")]
    Cancelled(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StatisticsResult<T> = std::result::Result<T, StatisticsError>;
