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

// Common types and utilities for the storage engine

use dotdb_common::TableId;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Ordered key space visible to readers
pub type KeyMap = BTreeMap<Vec<u8>, Vec<u8>>;

/// Error types specific to the storage engine
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("Corrupted storage: {0}")]
    Corruption(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Generate a unique timestamp for versioning
pub fn generate_timestamp() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or_default()
}

/// Wall clock in milliseconds since the epoch
pub fn current_time_millis() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or_default()
}

/// Calculate CRC32 checksum for data integrity
pub fn calculate_checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// Changes made by one committing transaction. `None` deletes the key.
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    pub writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    pub row_count_deltas: BTreeMap<TableId, i64>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.row_count_deltas.values().all(|delta| *delta == 0)
    }
}

/// A storage backend: an ordered map plus per-table row count accumulators
pub trait KvBackend: Send + Sync {
    /// Latest committed state. Later commits never change a returned snapshot.
    fn snapshot(&self) -> Arc<KeyMap>;

    /// Apply a batch atomically
    fn apply(&self, batch: WriteBatch) -> StorageResult<()>;

    /// Approximate number of rows in a table, as maintained by writers
    fn approximate_row_count(&self, table: TableId) -> u64;
}

/// State shared by the backends: data plus row counts, updated copy-on-write
#[derive(Debug, Default, Clone)]
pub(crate) struct BackendState {
    pub(crate) data: Arc<KeyMap>,
    pub(crate) row_counts: BTreeMap<TableId, u64>,
}

impl BackendState {
    pub(crate) fn apply(&mut self, batch: WriteBatch) {
        if !batch.writes.is_empty() {
            let data = Arc::make_mut(&mut self.data);
            for (key, value) in batch.writes {
                match value {
                    Some(value) => {
                        data.insert(key, value);
                    }
                    None => {
                        data.remove(&key);
                    }
                }
            }
        }

        for (table, delta) in batch.row_count_deltas {
            let count = self.row_counts.entry(table).or_insert(0);
            *count = count.saturating_add_signed(delta);
            if *count == 0 {
                self.row_counts.remove(&table);
            }
        }
    }
}
