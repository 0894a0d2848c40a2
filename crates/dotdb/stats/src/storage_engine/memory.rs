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

// In-memory backend

use dotdb_common::TableId;
use parking_lot::RwLock;
use std::sync::Arc;

use super::lib::{BackendState, KeyMap, KvBackend, StorageResult, WriteBatch};

/// Volatile backend. Snapshots are cheap `Arc` clones; writers copy the map only while a snapshot is held.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: RwLock<BackendState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvBackend for MemoryBackend {
    fn snapshot(&self) -> Arc<KeyMap> {
        self.state.read().data.clone()
    }

    fn apply(&self, batch: WriteBatch) -> StorageResult<()> {
        self.state.write().apply(batch);
        Ok(())
    }

    fn approximate_row_count(&self, table: TableId) -> u64 {
        self.state.read().row_counts.get(&table).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_is_isolated_from_later_writes() {
        let backend = MemoryBackend::new();
        let mut batch = WriteBatch::default();
        batch.writes.insert(vec![1], Some(vec![10]));
        backend.apply(batch).unwrap();

        let snapshot = backend.snapshot();

        let mut batch = WriteBatch::default();
        batch.writes.insert(vec![1], None);
        batch.writes.insert(vec![2], Some(vec![20]));
        batch.row_count_deltas.insert(TableId(7), 2);
        backend.apply(batch).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.contains_key(&vec![1]));
        assert_eq!(backend.snapshot().keys().cloned().collect::<Vec<_>>(), vec![vec![2]]);
        assert_eq!(backend.approximate_row_count(TableId(7)), 2);
    }
}
