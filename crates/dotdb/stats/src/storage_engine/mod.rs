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

//! Storage Engine
//!
//! A small transactional key-value engine that the statistics subsystem
//! reads index rows from and persists statistics rows into.
//!
//! - Ordered keys with pluggable backends (in-memory, single-file)
//! - Buffered transactions with read-your-writes and post-commit callbacks
//! - Chunked range scans under snapshot or normal (refreshing) isolation
//! - Per-table approximate row counts maintained by writers

pub mod file;
pub mod keyspace;
pub mod lib;
pub mod memory;
pub mod transaction;

pub use file::FileBackend;
pub use keyspace::{delete_index_rows, index_prefix, index_row_key, insert_index_rows, prefix_end, statistics_entry_key, statistics_header_key, truncate_table};
pub use lib::{KeyMap, KvBackend, StorageError, StorageResult, WriteBatch, calculate_checksum, current_time_millis, generate_timestamp};
pub use memory::MemoryBackend;
pub use transaction::{IsolationLevel, RangeScan, ScanIsolation, Transaction, TransactionId, TransactionManager, TransactionState};
