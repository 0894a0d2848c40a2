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

// Cache of last known statistics, keyed by stable index identity

use dotdb_common::IndexRef;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::model::IndexStatistics;

#[derive(Debug, Default)]
pub struct StatisticsCache {
    entries: RwLock<HashMap<IndexRef, Arc<IndexStatistics>>>,
}

impl StatisticsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: &IndexRef) -> Option<Arc<IndexStatistics>> {
        self.entries.read().get(index).cloned()
    }

    /// Cache `stats` unless another thread cached an entry first; returns the cached entry
    pub fn get_or_insert(&self, stats: Arc<IndexStatistics>) -> Arc<IndexStatistics> {
        self.entries.write().entry(stats.index()).or_insert(stats).clone()
    }

    pub fn put(&self, stats: Arc<IndexStatistics>) {
        self.entries.write().insert(stats.index(), stats);
    }

    pub fn put_all<I: IntoIterator<Item = Arc<IndexStatistics>>>(&self, stats: I) {
        let mut entries = self.entries.write();
        for stats in stats {
            entries.insert(stats.index(), stats);
        }
    }

    pub fn remove(&self, index: &IndexRef) -> Option<Arc<IndexStatistics>> {
        self.entries.write().remove(index)
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
