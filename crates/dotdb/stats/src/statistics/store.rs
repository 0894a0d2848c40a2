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

//! Statistics storage and computation against the row store

use dotdb_common::IndexDef;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

use super::codec::{self, HeaderRow};
use super::error::{StatisticsError, StatisticsResult};
use super::model::{Histogram, HistogramEntry, IndexStatistics};
use super::sampling::{SamplingOrchestrator, SamplingPlan};
use crate::config::{ScanTimeLimit, StatisticsConfig};
use crate::encoding::key_string_from_bytes;
use crate::storage_engine::{ScanIsolation, Transaction, current_time_millis, index_prefix, prefix_end, statistics_entry_key, statistics_header_key};

/// Granularity of interruptible sleeps between scan windows
const PAUSE_SLICE: Duration = Duration::from_millis(10);

/// How a statistics scan may run
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub time_limit: ScanTimeLimit,
    /// Set to abandon the scan
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            time_limit: ScanTimeLimit::Unlimited,
            cancel: None,
        }
    }
}

impl ScanOptions {
    pub fn new(time_limit: ScanTimeLimit) -> Self {
        Self { time_limit, cancel: None }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|flag| flag.load(Ordering::Acquire))
    }
}

/// Persistence and computation of index statistics for one storage backend
#[cfg_attr(test, mockall::automock)]
pub trait StoreIndexStatistics: Send + Sync {
    /// Read persisted statistics, if any
    fn load(&self, txn: &Transaction, index: &IndexDef) -> StatisticsResult<Option<IndexStatistics>>;

    /// Replace any persisted statistics of `index` with `stats`
    fn store(&self, txn: &mut Transaction, index: &IndexDef, stats: &IndexStatistics) -> StatisticsResult<()>;

    /// Delete persisted statistics of `index`
    fn remove(&self, txn: &mut Transaction, index: &IndexDef) -> StatisticsResult<()>;

    /// Scan `index` and build fresh statistics
    fn compute(&self, txn: &Transaction, index: &IndexDef, options: &ScanOptions) -> StatisticsResult<IndexStatistics>;
}

/// Statistics kept as rows beneath the owning table's key space.
/// Works with any [`KvBackend`](crate::storage_engine::KvBackend) through its transactions.
#[derive(Debug, Clone)]
pub struct RowStoreIndexStatistics {
    bucket_count: usize,
    sample_key_limit: usize,
}

impl RowStoreIndexStatistics {
    pub fn new(bucket_count: usize, sample_key_limit: usize) -> Self {
        Self { bucket_count, sample_key_limit }
    }

    pub fn from_config(config: &StatisticsConfig) -> Self {
        Self::new(config.bucket_count, config.sample_key_limit)
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }
}

/// Sleep for `duration`, waking early on cancellation. Returns false if cancelled.
fn pause(duration: Duration, options: &ScanOptions) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if options.cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(PAUSE_SLICE.min(deadline - now));
    }
}

impl StoreIndexStatistics for RowStoreIndexStatistics {
    fn load(&self, txn: &Transaction, index: &IndexDef) -> StatisticsResult<Option<IndexStatistics>> {
        let header_key = statistics_header_key(index);
        let Some(header_bytes) = txn.get(&header_key)? else {
            return Ok(None);
        };

        let header: HeaderRow = codec::decode_header(&header_bytes)?;
        if header.table_id != index.table_id.0 || header.index_id != index.id.0 {
            return Err(StatisticsError::Codec(format!("statistics header of {} belongs to {}/{}", index.name, header.table_id, header.index_id)));
        }

        let mut entries = Vec::new();
        for (key, value) in txn.scan(&header_key, &prefix_end(&header_key))? {
            if key != header_key {
                entries.push(codec::decode_entry(&value)?);
            }
        }

        codec::from_rows(&header, entries).map(Some)
    }

    fn store(&self, txn: &mut Transaction, index: &IndexDef, stats: &IndexStatistics) -> StatisticsResult<()> {
        self.remove(txn, index)?;

        let rows = codec::to_rows(stats);
        txn.put(statistics_header_key(index), codec::encode_header(&rows.header)?)?;
        for entry in &rows.entries {
            txn.put(statistics_entry_key(index, entry.column_count_signed, entry.item_number), codec::encode_entry(entry)?)?;
        }
        Ok(())
    }

    fn remove(&self, txn: &mut Transaction, index: &IndexDef) -> StatisticsResult<()> {
        let header_key = statistics_header_key(index);
        txn.delete_range(&header_key, &prefix_end(&header_key))?;
        Ok(())
    }

    fn compute(&self, txn: &Transaction, index: &IndexDef, options: &ScanOptions) -> StatisticsResult<IndexStatistics> {
        let key_columns = index.key_column_count();
        let estimated_rows = txn.approximate_row_count(index.table_id);
        let plan = SamplingPlan::new(estimated_rows, key_columns, self.sample_key_limit);
        let mut orchestrator = SamplingOrchestrator::new(key_columns, self.bucket_count, plan);

        let window = match options.time_limit {
            ScanTimeLimit::Limited { limit, sleep } => Some((limit, sleep)),
            ScanTimeLimit::Unlimited | ScanTimeLimit::Disabled => None,
        };
        let isolation = if window.is_some() { ScanIsolation::Normal } else { ScanIsolation::Snapshot };

        let prefix = index_prefix(index);
        let mut window_start = Instant::now();
        let mut complete = true;

        for (key, _) in txn.scan_with(&prefix, &prefix_end(&prefix), isolation)? {
            if options.cancelled() {
                return Err(StatisticsError::Cancelled(index.name.to_string()));
            }
            orchestrator.visit(&key[prefix.len()..])?;

            if let Some((limit, sleep)) = window {
                if window_start.elapsed() >= limit {
                    if sleep.is_zero() {
                        debug!("Statistics scan of {} stopped after {} rows", index.name, orchestrator.rows_seen());
                        complete = false;
                        break;
                    }
                    if !pause(sleep, options) {
                        return Err(StatisticsError::Cancelled(index.name.to_string()));
                    }
                    window_start = Instant::now();
                }
            }
        }

        let result = orchestrator.finish();
        let row_count = if complete { result.rows_seen } else { result.rows_seen.max(estimated_rows) };
        debug!(
            "Computed statistics for {}: {} rows, {} sampled, key buffer hit rate {:.2}",
            index.name,
            row_count,
            result.rows_sampled,
            result.pool_stats.hit_rate()
        );

        let mut stats = IndexStatistics::new(index.index_ref(), current_time_millis(), row_count, result.rows_sampled);
        for (slot, buckets) in result.histograms {
            let entries = buckets
                .into_iter()
                .map(|bucket| {
                    Ok(HistogramEntry {
                        key_string: key_string_from_bytes(&bucket.key)?,
                        key_bytes: bucket.key,
                        equal_count: bucket.equal_count,
                        less_count: bucket.less_count,
                        distinct_count: bucket.distinct_count,
                    })
                })
                .collect::<StatisticsResult<Vec<_>>>()?;
            stats.add_histogram(Histogram::new(slot, entries));
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_engine::{IsolationLevel, MemoryBackend, TransactionManager, insert_index_rows};
    use dotdb_common::{Catalog, ColumnType, InMemoryCatalog, KeyValue, TableDef, TableName};

    fn populated(rows: i64) -> (Arc<TableDef>, TransactionManager) {
        let catalog = InMemoryCatalog::new();
        let name = TableName::new("test", "t");
        catalog.create_table(name.clone(), &[("a", ColumnType::Integer), ("b", ColumnType::Text), ("c", ColumnType::Integer)]).unwrap();
        catalog.create_index(&name, "abc", &["a", "b", "c"]).unwrap();
        let table = catalog.table(&name).unwrap();

        let manager = TransactionManager::new(Arc::new(MemoryBackend::new()));
        let mut txn = manager.begin(IsolationLevel::ReadCommitted);
        for i in 0..rows {
            insert_index_rows(&mut txn, &table, i, &[KeyValue::Int(i % 10), KeyValue::Text(format!("v{}", i % 4)), KeyValue::Int(i)]).unwrap();
        }
        txn.commit().unwrap();
        (table, manager)
    }

    #[test]
    fn test_compute_store_load() {
        let (table, manager) = populated(200);
        let index = &table.indexes[0];
        let store = RowStoreIndexStatistics::new(16, 1_000_000);

        let mut txn = manager.begin(IsolationLevel::ReadCommitted);
        let stats = store.compute(&txn, index, &ScanOptions::default()).unwrap();
        assert_eq!(stats.row_count(), 200);
        assert_eq!(stats.sampled_count(), 200);
        assert_eq!(stats.histogram_count(), 5);
        assert_eq!(stats.histogram(0, 1).unwrap().entries()[0].key_string, "{(long)0}");
        assert_eq!(stats.histogram(1, 1).unwrap().entries()[0].key_string, "{\"v0\"}");

        store.store(&mut txn, index, &stats).unwrap();
        let loaded = store.load(&txn, index).unwrap().unwrap();
        assert_eq!(loaded.row_count(), 200);
        assert_eq!(loaded.analysis_timestamp(), stats.analysis_timestamp() / 1000 * 1000);
        for histogram in stats.histograms() {
            assert_eq!(loaded.histogram_at(histogram.slot()).unwrap().entries(), histogram.entries());
        }

        store.remove(&mut txn, index).unwrap();
        assert!(store.load(&txn, index).unwrap().is_none());
    }

    #[test]
    fn test_store_overwrites_previous_rows() {
        let (table, manager) = populated(100);
        let index = &table.indexes[0];
        let wide = RowStoreIndexStatistics::new(32, 1_000_000);
        let narrow = RowStoreIndexStatistics::new(2, 1_000_000);

        let mut txn = manager.begin(IsolationLevel::ReadCommitted);
        let first = wide.compute(&txn, index, &ScanOptions::default()).unwrap();
        wide.store(&mut txn, index, &first).unwrap();
        let second = narrow.compute(&txn, index, &ScanOptions::default()).unwrap();
        narrow.store(&mut txn, index, &second).unwrap();

        let loaded = narrow.load(&txn, index).unwrap().unwrap();
        assert!(loaded.histogram(0, 3).unwrap().entries().len() <= 2);
    }

    #[test]
    fn test_compute_empty_index() {
        let (table, manager) = populated(0);
        let txn = manager.begin(IsolationLevel::ReadCommitted);
        let stats = RowStoreIndexStatistics::new(8, 100).compute(&txn, &table.indexes[0], &ScanOptions::default()).unwrap();
        assert_eq!(stats.row_count(), 0);
        assert_eq!(stats.histogram_count(), 0);
    }

    #[test]
    fn test_time_limit_without_sleep_keeps_partial_sample() {
        let (table, manager) = populated(500);
        let txn = manager.begin(IsolationLevel::ReadCommitted);
        let options = ScanOptions::new(ScanTimeLimit::Limited {
            limit: Duration::ZERO,
            sleep: Duration::ZERO,
        });
        let stats = RowStoreIndexStatistics::new(8, 1_000_000).compute(&txn, &table.indexes[0], &options).unwrap();
        assert_eq!(stats.sampled_count(), 1);
        assert_eq!(stats.row_count(), 500);
    }

    #[test]
    fn test_compute_with_stride_samples_subset() {
        let (table, manager) = populated(200);
        let txn = manager.begin(IsolationLevel::ReadCommitted);
        // 200 rows over two trailing columns need 400 key copies, so every 4th row is sampled
        let stats = RowStoreIndexStatistics::new(8, 100).compute(&txn, &table.indexes[0], &ScanOptions::default()).unwrap();

        assert_eq!(stats.row_count(), 200);
        assert_eq!(stats.sampled_count(), 50);
        assert_eq!(stats.histogram_count(), 5);
        for length in 1..=3 {
            assert!(!stats.histogram(0, length).unwrap().entries().is_empty());
        }
        for position in 1..3 {
            assert!(!stats.histogram(position, 1).unwrap().entries().is_empty());
        }
    }

    #[test]
    fn test_time_limit_with_sleep_scans_everything() {
        let (table, manager) = populated(20);
        let txn = manager.begin(IsolationLevel::ReadCommitted);
        let options = ScanOptions::new(ScanTimeLimit::Limited {
            limit: Duration::ZERO,
            sleep: Duration::from_millis(1),
        });
        let stats = RowStoreIndexStatistics::new(8, 1_000_000).compute(&txn, &table.indexes[0], &options).unwrap();
        assert_eq!(stats.row_count(), 20);
        assert_eq!(stats.sampled_count(), 20);
        assert_eq!(stats.histogram_count(), 5);
    }

    #[test]
    fn test_cancel_during_pause() {
        let (table, manager) = populated(20);
        let txn = manager.begin(IsolationLevel::ReadCommitted);
        let cancel = Arc::new(AtomicBool::new(false));
        let options = ScanOptions::new(ScanTimeLimit::Limited {
            limit: Duration::ZERO,
            sleep: Duration::from_secs(30),
        })
        .with_cancel(cancel.clone());

        let canceller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            cancel.store(true, Ordering::Release);
        });

        let started = Instant::now();
        let result = RowStoreIndexStatistics::new(8, 1_000_000).compute(&txn, &table.indexes[0], &options);
        canceller.join().unwrap();

        assert!(matches!(result, Err(StatisticsError::Cancelled(_))));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_cancelled_scan() {
        let (table, manager) = populated(10);
        let txn = manager.begin(IsolationLevel::ReadCommitted);
        let options = ScanOptions::default().with_cancel(Arc::new(AtomicBool::new(true)));
        let result = RowStoreIndexStatistics::new(8, 100).compute(&txn, &table.indexes[0], &options);
        assert!(matches!(result, Err(StatisticsError::Cancelled(_))));
    }
}
