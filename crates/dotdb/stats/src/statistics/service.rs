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

//! Statistics service
//!
//! Front door used by the planner and by DDL. Statistics are read through a
//! cache keyed by [`IndexRef`]; results of an explicit update or a snapshot
//! import become visible only after the caller's transaction commits.

use chrono::{DateTime, Utc};
use dotdb_common::{Catalog, IndexDef, IndexName, IndexRef, TableDef};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use super::background::{BackgroundMaintainer, Recompute};
use super::cache::StatisticsCache;
use super::error::{StatisticsError, StatisticsResult};
use super::model::IndexStatistics;
use super::snapshot;
use super::store::{RowStoreIndexStatistics, ScanOptions, StoreIndexStatistics};
use crate::config::StatisticsConfig;
use crate::storage_engine::{IsolationLevel, Transaction, TransactionManager};

/// What the planner found missing
#[derive(Debug, Clone, Copy)]
pub enum MissingStats<'a> {
    Index(&'a IndexDef),
    Column { table: &'a TableDef, column: &'a str },
}

/// Schema change notifications that invalidate statistics
pub trait TableListener {
    fn on_drop_table(&self, txn: &mut Transaction, table: &TableDef) -> StatisticsResult<()>;

    fn on_truncate_table(&self, txn: &mut Transaction, table: &TableDef) -> StatisticsResult<()>;

    fn on_drop_index(&self, txn: &mut Transaction, indexes: &[Arc<IndexDef>]) -> StatisticsResult<()>;
}

struct ServiceCore {
    catalog: Arc<dyn Catalog>,
    store: Arc<dyn StoreIndexStatistics>,
    transactions: Arc<TransactionManager>,
    cache: StatisticsCache,
    config: StatisticsConfig,
    background: BackgroundMaintainer,
}

impl ServiceCore {
    fn publish(&self, stats: Vec<Arc<IndexStatistics>>, names: Vec<IndexName>) {
        self.background.remove_all(&names);
        self.cache.put_all(stats);
    }
}

impl Recompute for ServiceCore {
    fn recompute(&self, name: &IndexName, cancel: &Arc<AtomicBool>) -> StatisticsResult<bool> {
        let Some(index) = self.catalog.index(name) else {
            return Ok(false);
        };

        let options = ScanOptions::new(self.config.background_time_limit).with_cancel(Arc::clone(cancel));
        let mut txn = self.transactions.begin(IsolationLevel::ReadCommitted);
        let stats = self.store.compute(&txn, &index, &options)?;
        self.store.store(&mut txn, &index, &stats)?;
        txn.commit()?;

        info!("Automatically updated statistics for {}", name);
        self.cache.put(Arc::new(stats));
        Ok(true)
    }
}

pub struct IndexStatisticsService {
    core: Arc<ServiceCore>,
}

impl IndexStatisticsService {
    /// Service over the row-store backend of `transactions`
    pub fn new(catalog: Arc<dyn Catalog>, transactions: Arc<TransactionManager>, config: StatisticsConfig) -> Self {
        let store = Arc::new(RowStoreIndexStatistics::from_config(&config));
        Self::with_store(catalog, store, transactions, config)
    }

    pub fn with_store(catalog: Arc<dyn Catalog>, store: Arc<dyn StoreIndexStatistics>, transactions: Arc<TransactionManager>, config: StatisticsConfig) -> Self {
        let core = Arc::new_cyclic(|weak: &Weak<ServiceCore>| {
            let recompute: Weak<dyn Recompute> = weak.clone();
            let background = BackgroundMaintainer::new(recompute, !config.background_time_limit.is_disabled(), config.background_grace);
            ServiceCore {
                catalog,
                store,
                transactions,
                cache: StatisticsCache::new(),
                config,
                background,
            }
        });
        Self { core }
    }

    pub fn config(&self) -> &StatisticsConfig {
        &self.core.config
    }

    pub fn bucket_count(&self) -> usize {
        self.core.config.bucket_count
    }

    pub fn background(&self) -> &BackgroundMaintainer {
        &self.core.background
    }

    /// Cached entry, loading it (or caching an invalid placeholder) on a miss
    fn lookup(&self, index: &IndexDef) -> StatisticsResult<Arc<IndexStatistics>> {
        let key = index.index_ref();
        if let Some(cached) = self.core.cache.get(&key) {
            return Ok(cached);
        }

        let txn = self.core.transactions.begin(IsolationLevel::ReadCommitted);
        let loaded = match self.core.store.load(&txn, index)? {
            Some(stats) => stats,
            None => IndexStatistics::invalid_placeholder(key),
        };
        Ok(self.core.cache.get_or_insert(Arc::new(loaded)))
    }

    /// Usable statistics for `index`, or `None` when it has never been analyzed
    pub fn get(&self, index: &IndexDef) -> StatisticsResult<Option<Arc<IndexStatistics>>> {
        let stats = self.lookup(index)?;
        Ok((!stats.is_invalid()).then_some(stats))
    }

    /// Recompute and store statistics for `indexes` within `txn`.
    ///
    /// The cache sees the new statistics only once `txn` commits.
    pub fn update(&self, txn: &mut Transaction, indexes: &[Arc<IndexDef>]) -> StatisticsResult<BTreeMap<IndexName, Arc<IndexStatistics>>> {
        let options = ScanOptions::new(self.core.config.time_limit.for_foreground());
        let mut updated = BTreeMap::new();
        for index in indexes {
            let stats = self.core.store.compute(txn, index, &options)?;
            self.core.store.store(txn, index, &stats)?;
            updated.insert(index.name.clone(), Arc::new(stats));
        }

        self.publish_on_commit(txn, updated.values().cloned().collect(), updated.keys().cloned().collect());
        Ok(updated)
    }

    fn publish_on_commit(&self, txn: &mut Transaction, stats: Vec<Arc<IndexStatistics>>, names: Vec<IndexName>) {
        if stats.is_empty() {
            return;
        }
        let core = Arc::downgrade(&self.core);
        txn.on_commit(move || {
            if let Some(core) = core.upgrade() {
                core.publish(stats, names);
            }
        });
    }

    /// Remove stored statistics and evict them from the cache right away
    pub fn delete(&self, txn: &mut Transaction, indexes: &[Arc<IndexDef>]) -> StatisticsResult<()> {
        for index in indexes {
            self.core.store.remove(txn, index)?;
            self.core.background.remove(&index.name);
            if self.core.cache.remove(&index.index_ref()).is_some() {
                debug!("Evicted cached statistics of {}", index.name);
            }
        }
        Ok(())
    }

    pub fn delete_schema(&self, txn: &mut Transaction, schema: &str) -> StatisticsResult<()> {
        let indexes = self.core.catalog.indexes_in_schema(schema);
        self.delete(txn, &indexes)
    }

    /// Write a snapshot of every analyzed index in `schema`, returning the number of documents
    pub fn dump<W: Write>(&self, schema: &str, writer: W) -> StatisticsResult<usize> {
        let mut indexes = self.core.catalog.indexes_in_schema(schema);
        indexes.sort_by(|a, b| a.name.cmp(&b.name));

        let mut documents = Vec::new();
        for index in &indexes {
            if let Some(stats) = self.get(index)? {
                documents.push(snapshot::to_document(index, &stats)?);
            }
        }
        snapshot::write_documents(&documents, writer)?;
        Ok(documents.len())
    }

    pub fn dump_to_string(&self, schema: &str) -> StatisticsResult<String> {
        let mut out = Vec::new();
        self.dump(schema, &mut out)?;
        String::from_utf8(out).map_err(|e| StatisticsError::MalformedSnapshot(e.to_string()))
    }

    pub fn dump_to_file<P: AsRef<Path>>(&self, schema: &str, path: P) -> StatisticsResult<usize> {
        self.dump(schema, BufWriter::new(File::create(path)?))
    }

    /// Import a snapshot into `schema` within `txn`, returning the number of indexes loaded.
    ///
    /// Documents naming an unknown table or index fail the import unless `skip_missing` is set.
    pub fn load<R: Read>(&self, txn: &mut Transaction, schema: &str, reader: R, skip_missing: bool) -> StatisticsResult<usize> {
        let documents = snapshot::read_documents(reader)?;

        let mut stats = Vec::with_capacity(documents.len());
        let mut names = Vec::with_capacity(documents.len());
        for document in &documents {
            let Some((index, loaded)) = snapshot::from_document(self.core.catalog.as_ref(), schema, document, skip_missing)? else {
                debug!("Skipping statistics of unknown index {}.{}.{}", schema, document.table, document.index);
                continue;
            };
            self.core.store.store(txn, &index, &loaded)?;
            stats.push(Arc::new(loaded));
            names.push(index.name.clone());
        }

        let count = stats.len();
        info!("Loaded statistics for {} indexes in {}", count, schema);
        self.publish_on_commit(txn, stats, names);
        Ok(count)
    }

    pub fn load_from_file<P: AsRef<Path>>(&self, txn: &mut Transaction, schema: &str, path: P, skip_missing: bool) -> StatisticsResult<usize> {
        self.load(txn, schema, BufReader::new(File::open(path)?), skip_missing)
    }

    /// Planner notice that a plan had no usable statistics.
    ///
    /// Warns once per invalid entry and queues every index of the owning table.
    pub fn missing_stats(&self, missing: MissingStats<'_>) -> StatisticsResult<()> {
        let index = match missing {
            MissingStats::Column { table, column } => {
                warn!("No statistics for {}.{}; cost estimates will not be accurate", table.name, column);
                return Ok(());
            }
            MissingStats::Index(index) => index,
        };

        let stats = self.lookup(index)?;
        if !stats.is_invalid() || !stats.mark_warned() {
            return Ok(());
        }

        match self.core.catalog.table_by_id(index.table_id) {
            Some(table) => {
                warn!("No statistics for table {}; cost estimates will not be accurate", table.name);
                self.core.background.offer_table(&table);
            }
            None => {
                warn!("No statistics for index {}; cost estimates will not be accurate", index.name);
                self.core.background.offer_index(&index.name);
            }
        }
        Ok(())
    }

    /// Flag `stats` as outdated when `observed_row_count` drifted outside the configured ratio.
    ///
    /// Returns true when the table was newly flagged.
    pub fn check_row_count_changed(&self, table: &TableDef, stats: &IndexStatistics, observed_row_count: u64) -> bool {
        if !stats.is_valid() || stats.warned() {
            return false;
        }

        let ratio = observed_row_count.max(1) as f64 / stats.row_count().max(1) as f64;
        let (change, direction) = if ratio < self.core.config.min_row_count_ratio {
            ((1.0 / ratio).round() as u64, "smaller")
        } else if ratio > self.core.config.max_row_count_ratio {
            (ratio.round() as u64, "larger")
        } else {
            return false;
        };

        if !stats.mark_outdated() {
            return false;
        }
        let analyzed = DateTime::<Utc>::from_timestamp_millis(stats.analysis_timestamp()).unwrap_or_default();
        warn!(
            "Table {} is {} times {} than on {}; cost estimates will not be accurate until statistics are updated",
            table.name, change, direction, analyzed
        );
        stats.mark_warned();
        self.core.background.offer_table(table);
        true
    }

    pub fn clear_cache(&self) {
        self.core.cache.clear();
    }

    pub fn cached(&self, index: IndexRef) -> Option<Arc<IndexStatistics>> {
        self.core.cache.get(&index)
    }

    /// Stop background maintenance
    pub fn stop(&self) {
        self.core.background.stop();
    }
}

impl TableListener for IndexStatisticsService {
    fn on_drop_table(&self, txn: &mut Transaction, table: &TableDef) -> StatisticsResult<()> {
        self.delete(txn, &table.indexes)
    }

    fn on_truncate_table(&self, txn: &mut Transaction, table: &TableDef) -> StatisticsResult<()> {
        self.delete(txn, &table.indexes)
    }

    fn on_drop_index(&self, txn: &mut Transaction, indexes: &[Arc<IndexDef>]) -> StatisticsResult<()> {
        self.delete(txn, indexes)
    }
}

impl Drop for IndexStatisticsService {
    fn drop(&mut self) {
        self.core.background.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanTimeLimit;
    use crate::statistics::store::MockStoreIndexStatistics;
    use crate::storage_engine::{MemoryBackend, insert_index_rows};
    use dotdb_common::{ColumnType, InMemoryCatalog, KeyValue, TableName};

    fn fixture(config: StatisticsConfig) -> (Arc<InMemoryCatalog>, Arc<TransactionManager>, IndexStatisticsService, Arc<TableDef>) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let name = TableName::new("test", "orders");
        catalog.create_table(name.clone(), &[("id", ColumnType::Integer), ("customer", ColumnType::Text)]).unwrap();
        catalog.create_index(&name, "customer", &["customer"]).unwrap();
        let table = catalog.table(&name).unwrap();

        let transactions = Arc::new(TransactionManager::new(Arc::new(MemoryBackend::new())));
        let mut txn = transactions.begin(IsolationLevel::ReadCommitted);
        for i in 0..50 {
            insert_index_rows(&mut txn, &table, i, &[KeyValue::Int(i), KeyValue::Text(format!("c{}", i % 5))]).unwrap();
        }
        txn.commit().unwrap();

        let service = IndexStatisticsService::new(catalog.clone(), transactions.clone(), config);
        (catalog, transactions, service, table)
    }

    fn no_background() -> StatisticsConfig {
        StatisticsConfig {
            background_time_limit: ScanTimeLimit::Disabled,
            ..StatisticsConfig::default()
        }
    }

    #[test]
    fn test_get_caches_invalid_placeholder() {
        let (_, _, service, table) = fixture(no_background());
        let index = &table.indexes[0];

        assert!(service.get(index).unwrap().is_none());
        let cached = service.cached(index.index_ref()).unwrap();
        assert!(cached.is_invalid());
        assert!(service.get(index).unwrap().is_none());
    }

    #[test]
    fn test_update_publishes_on_commit_only() {
        let (_, transactions, service, table) = fixture(no_background());
        let index = &table.indexes[0];
        assert!(service.get(index).unwrap().is_none());

        let mut txn = transactions.begin(IsolationLevel::ReadCommitted);
        let updated = service.update(&mut txn, &table.indexes).unwrap();
        assert_eq!(updated[&index.name].row_count(), 50);
        assert!(service.get(index).unwrap().is_none());
        txn.commit().unwrap();

        let stats = service.get(index).unwrap().unwrap();
        assert!(stats.is_valid());
        assert_eq!(stats.row_count(), 50);
    }

    #[test]
    fn test_aborted_update_is_invisible() {
        let (_, transactions, service, table) = fixture(no_background());
        let mut txn = transactions.begin(IsolationLevel::ReadCommitted);
        service.update(&mut txn, &table.indexes).unwrap();
        txn.abort().unwrap();

        assert!(service.get(&table.indexes[0]).unwrap().is_none());
        service.clear_cache();
        assert!(service.get(&table.indexes[0]).unwrap().is_none());
    }

    #[test]
    fn test_delete_evicts_immediately() {
        let (_, transactions, service, table) = fixture(no_background());
        let mut txn = transactions.begin(IsolationLevel::ReadCommitted);
        service.update(&mut txn, &table.indexes).unwrap();
        txn.commit().unwrap();
        assert!(service.get(&table.indexes[0]).unwrap().is_some());

        let mut txn = transactions.begin(IsolationLevel::ReadCommitted);
        service.on_drop_table(&mut txn, &table).unwrap();
        assert!(service.cached(table.indexes[0].index_ref()).is_none());
        txn.commit().unwrap();
        assert!(service.get(&table.indexes[0]).unwrap().is_none());
    }

    #[test]
    fn test_check_row_count_changed() {
        let (_, _, service, table) = fixture(no_background());
        let stats = IndexStatistics::new(table.indexes[0].index_ref(), 0, 100, 100);

        assert!(!service.check_row_count_changed(&table, &stats, 30));
        assert!(!service.check_row_count_changed(&table, &stats, 500));
        assert!(stats.is_valid());

        assert!(service.check_row_count_changed(&table, &stats, 10));
        assert!(stats.warned());
        assert!(!stats.is_valid());
        assert!(!stats.is_invalid());
        assert!(!service.check_row_count_changed(&table, &stats, 10));
    }

    #[test]
    fn test_missing_stats_warns_once() {
        let (_, _, service, table) = fixture(no_background());
        let index = &table.indexes[0];

        service.missing_stats(MissingStats::Index(index)).unwrap();
        assert!(service.cached(index.index_ref()).unwrap().warned());
        service.missing_stats(MissingStats::Index(index)).unwrap();
        service.missing_stats(MissingStats::Column { table: &table, column: "customer" }).unwrap();
        assert_eq!(service.background().queue_len(), 0);
    }

    #[test]
    fn test_update_surfaces_store_errors() {
        let (catalog, transactions, _, table) = fixture(no_background());
        let mut store = MockStoreIndexStatistics::new();
        store.expect_compute().returning(|_, _, _| Err(StatisticsError::Codec("scan conflict".to_string())));
        store.expect_store().never();
        let service = IndexStatisticsService::with_store(catalog, Arc::new(store), transactions.clone(), no_background());

        let mut txn = transactions.begin(IsolationLevel::ReadCommitted);
        let err = service.update(&mut txn, &table.indexes).unwrap_err();
        assert!(matches!(err, StatisticsError::Codec(_)));
        txn.commit().unwrap();
        assert!(service.cached(table.indexes[0].index_ref()).is_none());
    }

    #[test]
    fn test_dump_only_analyzed_indexes() {
        let (catalog, transactions, service, table) = fixture(no_background());
        catalog.create_index(&table.name, "id", &["id"]).unwrap();
        let table = catalog.table(&table.name).unwrap();

        let mut txn = transactions.begin(IsolationLevel::ReadCommitted);
        service.update(&mut txn, &table.indexes[..1]).unwrap();
        txn.commit().unwrap();

        let text = service.dump_to_string("test").unwrap();
        assert_eq!(text.matches("---\n").count(), 1);
        assert!(text.contains("Index: customer"));
        assert!(text.contains("- c0\n"));
    }
}
