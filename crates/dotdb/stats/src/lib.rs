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

//! DotDB index statistics
//!
//! Maintains approximate per-index histograms so a cost-based planner can
//! estimate selectivity without scanning data at plan time.
//!
//! # Core Components
//!
//! ## Statistics service
//! - Cache of the last known statistics per index, with negative caching
//! - Synchronous update/delete that publish to the cache only after commit
//! - Staleness heuristics that queue tables for background recomputation
//!
//! ## Sampling
//! - One ordered index scan feeds every column-prefix and trailing-column histogram
//! - Sub-sampling stride keeps memory bounded on very large indexes
//!
//! ## Persistence
//! - Header and entry rows stored beneath the owning table's key space
//! - Human-readable YAML snapshots for export and import
//!
//! # Usage
//!
//! ```rust
//! use dotdb_common::{Catalog, ColumnType, InMemoryCatalog, KeyValue, TableName};
//! use dotdb_stats::{IndexStatisticsService, StatisticsConfig};
//! use dotdb_stats::storage_engine::{IsolationLevel, MemoryBackend, TransactionManager, insert_index_rows};
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(InMemoryCatalog::new());
//! let people = TableName::new("test", "people");
//! catalog.create_table(people.clone(), &[("id", ColumnType::Integer), ("name", ColumnType::Text)]).unwrap();
//! catalog.create_index(&people, "name", &["name"]).unwrap();
//!
//! let transactions = Arc::new(TransactionManager::new(Arc::new(MemoryBackend::new())));
//! let service = IndexStatisticsService::new(catalog.clone(), transactions.clone(), StatisticsConfig::default());
//!
//! let table = catalog.table(&people).unwrap();
//! let mut txn = transactions.begin(IsolationLevel::ReadCommitted);
//! insert_index_rows(&mut txn, &table, 1, &[KeyValue::Int(1), KeyValue::Text("Ann".into())]).unwrap();
//! txn.commit().unwrap();
//!
//! let mut txn = transactions.begin(IsolationLevel::ReadCommitted);
//! service.update(&mut txn, &table.indexes).unwrap();
//! txn.commit().unwrap();
//!
//! let stats = service.get(&table.indexes[0]).unwrap().unwrap();
//! assert_eq!(stats.row_count(), 1);
//! ```

pub mod config;
pub mod encoding;
pub mod statistics;
pub mod storage_engine;

pub use config::{ConfigError, ConfigResult, ScanTimeLimit, StatisticsConfig};
pub use statistics::{
    BackgroundMaintainer, Histogram, HistogramEntry, HistogramSlot, IndexStatistics, IndexStatisticsService, MissingStats, RowStoreIndexStatistics, ScanOptions, StatisticsError, StatisticsResult, StoreIndexStatistics, TableListener,
    Validity,
};
