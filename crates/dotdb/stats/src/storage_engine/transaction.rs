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

// Transaction management module
// Transactions buffer their writes locally and apply them to the backend as one
// batch at commit. Reads see the transaction's own writes on top of a committed
// read view. Callbacks registered with `on_commit` run only once the batch is
// durable, which is how callers publish derived state without exposing
// uncommitted work.

use dotdb_common::TableId;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use super::lib::{KeyMap, KvBackend, StorageError, StorageResult, WriteBatch, generate_timestamp};

/// Number of committed entries fetched per scan step
const SCAN_CHUNK: usize = 256;

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Every read observes the latest committed state
    ReadCommitted,
    /// All reads observe the state as of `begin`
    Snapshot,
}

/// Read view used by a single range scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanIsolation {
    /// One consistent view for the whole scan
    Snapshot,
    /// The view is refreshed per chunk, so long scans do not pin old state
    Normal,
}

/// Transaction state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations
    Active,
    /// Transaction is applying its batch
    Committing,
    /// Transaction is successfully committed
    Committed,
    /// Transaction was rolled back
    Aborted,
}

/// Transaction identifier type
pub type TransactionId = u64;

type CommitCallback = Box<dyn FnOnce() + Send>;

pub struct Transaction {
    /// Unique transaction ID
    id: TransactionId,
    isolation_level: IsolationLevel,
    state: TransactionState,
    backend: Arc<dyn KvBackend>,
    /// Pinned view for snapshot isolation
    read_view: Option<Arc<KeyMap>>,
    /// Buffered writes; `None` marks a delete
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    row_count_deltas: BTreeMap<TableId, i64>,
    commit_callbacks: Vec<CommitCallback>,
    start_timestamp: u64,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("isolation_level", &self.isolation_level)
            .field("state", &self.state)
            .field("writes", &self.writes.len())
            .field("commit_callbacks", &self.commit_callbacks.len())
            .finish()
    }
}

impl Transaction {
    fn new(id: TransactionId, isolation_level: IsolationLevel, backend: Arc<dyn KvBackend>) -> Self {
        let read_view = match isolation_level {
            IsolationLevel::Snapshot => Some(backend.snapshot()),
            IsolationLevel::ReadCommitted => None,
        };

        Self {
            id,
            isolation_level,
            state: TransactionState::Active,
            backend,
            read_view,
            writes: BTreeMap::new(),
            row_count_deltas: BTreeMap::new(),
            commit_callbacks: Vec::new(),
            start_timestamp: generate_timestamp(),
        }
    }

    /// Get the transaction ID
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Get the transaction state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Get the transaction isolation level
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn start_timestamp(&self) -> u64 {
        self.start_timestamp
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    fn ensure_active(&self) -> StorageResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(StorageError::InvalidOperation(format!("Transaction {} is {:?}", self.id, self.state)))
        }
    }

    fn read_view(&self) -> Arc<KeyMap> {
        match &self.read_view {
            Some(view) => view.clone(),
            None => self.backend.snapshot(),
        }
    }

    pub fn get(&self, key: &[u8]) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_active()?;
        if let Some(buffered) = self.writes.get(key) {
            return Ok(buffered.clone());
        }
        Ok(self.read_view().get(key).cloned())
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        self.ensure_active()?;
        self.writes.insert(key, Some(value));
        Ok(())
    }

    pub fn delete(&mut self, key: &[u8]) -> StorageResult<()> {
        self.ensure_active()?;
        self.writes.insert(key.to_vec(), None);
        Ok(())
    }

    /// Delete every visible key in `[start, end)`; returns the number of keys deleted
    pub fn delete_range(&mut self, start: &[u8], end: &[u8]) -> StorageResult<usize> {
        let keys: Vec<Vec<u8>> = self.scan(start, end)?.map(|(key, _)| key).collect();
        for key in &keys {
            self.writes.insert(key.clone(), None);
        }
        Ok(keys.len())
    }

    /// Ordered scan over `[start, end)` using the transaction's own isolation
    pub fn scan(&self, start: &[u8], end: &[u8]) -> StorageResult<RangeScan<'_>> {
        self.scan_with(start, end, ScanIsolation::Snapshot)
    }

    /// Ordered scan over `[start, end)`. Buffered writes of this transaction are always visible.
    pub fn scan_with(&self, start: &[u8], end: &[u8], isolation: ScanIsolation) -> StorageResult<RangeScan<'_>> {
        self.ensure_active()?;
        // A snapshot transaction never refreshes its view
        let pinned = match (isolation, &self.read_view) {
            (_, Some(view)) => Some(view.clone()),
            (ScanIsolation::Snapshot, None) => Some(self.backend.snapshot()),
            (ScanIsolation::Normal, None) => None,
        };

        Ok(RangeScan {
            txn: self,
            pinned,
            lower: Bound::Included(start.to_vec()),
            end: end.to_vec(),
            buffer: VecDeque::new(),
            exhausted: start >= end,
        })
    }

    /// Record a change to a table's row count, applied at commit
    pub fn adjust_row_count(&mut self, table: TableId, delta: i64) {
        *self.row_count_deltas.entry(table).or_insert(0) += delta;
    }

    /// Committed row count plus this transaction's pending changes
    pub fn approximate_row_count(&self, table: TableId) -> u64 {
        let base = self.backend.approximate_row_count(table);
        let delta = self.row_count_deltas.get(&table).copied().unwrap_or(0);
        base.saturating_add_signed(delta)
    }

    /// Run `callback` after this transaction commits. Dropped on abort.
    pub fn on_commit<F>(&mut self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.commit_callbacks.push(Box::new(callback));
    }

    pub fn commit(&mut self) -> StorageResult<()> {
        self.ensure_active()?;
        self.state = TransactionState::Committing;

        let batch = WriteBatch {
            writes: std::mem::take(&mut self.writes),
            row_count_deltas: std::mem::take(&mut self.row_count_deltas),
        };

        if !batch.is_empty() {
            if let Err(e) = self.backend.apply(batch) {
                self.state = TransactionState::Aborted;
                self.commit_callbacks.clear();
                return Err(StorageError::TransactionAborted(format!("Transaction {} failed to commit: {}", self.id, e)));
            }
        }

        self.state = TransactionState::Committed;
        self.read_view = None;
        for callback in self.commit_callbacks.drain(..) {
            callback();
        }
        Ok(())
    }

    pub fn abort(&mut self) -> StorageResult<()> {
        self.ensure_active()?;
        self.discard();
        Ok(())
    }

    fn discard(&mut self) {
        self.writes.clear();
        self.row_count_deltas.clear();
        self.commit_callbacks.clear();
        self.read_view = None;
        self.state = TransactionState::Aborted;
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.is_active() {
            self.discard();
        }
    }
}

/// Ordered iterator over committed entries merged with a transaction's buffered writes.
/// Entries are fetched in chunks; a `Normal` scan takes a fresh read view for every chunk.
pub struct RangeScan<'a> {
    txn: &'a Transaction,
    pinned: Option<Arc<KeyMap>>,
    lower: Bound<Vec<u8>>,
    end: Vec<u8>,
    buffer: VecDeque<(Vec<u8>, Vec<u8>)>,
    exhausted: bool,
}

impl RangeScan<'_> {
    fn fill(&mut self) {
        while self.buffer.is_empty() && !self.exhausted {
            let view = match &self.pinned {
                Some(view) => view.clone(),
                None => self.txn.backend.snapshot(),
            };
            let upper = Bound::Excluded(self.end.clone());

            let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = view.range((self.lower.clone(), upper.clone())).take(SCAN_CHUNK).map(|(k, v)| (k.clone(), v.clone())).collect();

            let chunk_upper = match merged.keys().next_back() {
                Some(last) if merged.len() == SCAN_CHUNK => Bound::Included(last.clone()),
                _ => {
                    self.exhausted = true;
                    upper
                }
            };

            for (key, write) in self.txn.writes.range((self.lower.clone(), chunk_upper.clone())) {
                match write {
                    Some(value) => {
                        merged.insert(key.clone(), value.clone());
                    }
                    None => {
                        merged.remove(key);
                    }
                }
            }

            if let Bound::Included(last) = chunk_upper {
                self.lower = Bound::Excluded(last);
            }
            self.buffer.extend(merged);
        }
    }
}

impl Iterator for RangeScan<'_> {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        self.fill();
        self.buffer.pop_front()
    }
}

/// Hands out transactions against one backend
pub struct TransactionManager {
    backend: Arc<dyn KvBackend>,
    next_id: AtomicU64,
}

impl TransactionManager {
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend, next_id: AtomicU64::new(1) }
    }

    pub fn begin(&self, isolation_level: IsolationLevel) -> Transaction {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Transaction::new(id, isolation_level, self.backend.clone())
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage_engine::memory::MemoryBackend;
    use std::sync::atomic::AtomicBool;

    fn manager() -> TransactionManager {
        TransactionManager::new(Arc::new(MemoryBackend::new()))
    }

    fn key(i: u32) -> Vec<u8> {
        i.to_be_bytes().to_vec()
    }

    #[test]
    fn test_read_your_writes() {
        let manager = manager();
        let mut txn = manager.begin(IsolationLevel::ReadCommitted);
        txn.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        assert_eq!(txn.get(b"a").unwrap(), Some(b"1".to_vec()));

        let other = manager.begin(IsolationLevel::ReadCommitted);
        assert_eq!(other.get(b"a").unwrap(), None);

        txn.commit().unwrap();
        assert_eq!(other.get(b"a").unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_snapshot_isolation_ignores_later_commits() {
        let manager = manager();
        let reader = manager.begin(IsolationLevel::Snapshot);

        let mut writer = manager.begin(IsolationLevel::ReadCommitted);
        writer.put(b"a".to_vec(), b"1".to_vec()).unwrap();
        writer.commit().unwrap();

        assert_eq!(reader.get(b"a").unwrap(), None);
    }

    #[test]
    fn test_scan_merges_buffered_writes_across_chunks() {
        let manager = manager();
        let mut setup = manager.begin(IsolationLevel::ReadCommitted);
        for i in 0..600 {
            setup.put(key(i * 2), vec![0]).unwrap();
        }
        setup.commit().unwrap();

        let mut txn = manager.begin(IsolationLevel::ReadCommitted);
        txn.put(key(1), vec![1]).unwrap();
        txn.put(key(999), vec![1]).unwrap();
        txn.delete(&key(0)).unwrap();
        txn.delete(&key(1000)).unwrap();

        let keys: Vec<Vec<u8>> = txn.scan_with(&key(0), &key(u32::MAX), ScanIsolation::Normal).unwrap().map(|(k, _)| k).collect();
        assert_eq!(keys.len(), 600);
        assert_eq!(keys[0], key(1));
        assert!(keys.contains(&key(999)));
        assert!(!keys.contains(&key(1000)));
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_normal_scan_observes_commits_between_chunks() {
        let manager = manager();
        let mut setup = manager.begin(IsolationLevel::ReadCommitted);
        for i in 0..(SCAN_CHUNK as u32 * 2) {
            setup.put(key(i), vec![0]).unwrap();
        }
        setup.commit().unwrap();

        let reader = manager.begin(IsolationLevel::ReadCommitted);
        let mut normal = reader.scan_with(&key(0), &key(u32::MAX), ScanIsolation::Normal).unwrap();
        let mut snapshot = reader.scan_with(&key(0), &key(u32::MAX), ScanIsolation::Snapshot).unwrap();
        assert!(normal.next().is_some());
        assert!(snapshot.next().is_some());

        let mut writer = manager.begin(IsolationLevel::ReadCommitted);
        writer.put(key(100_000), vec![0]).unwrap();
        writer.commit().unwrap();

        assert_eq!(normal.count(), SCAN_CHUNK * 2);
        assert_eq!(snapshot.count(), SCAN_CHUNK * 2 - 1);
    }

    #[test]
    fn test_delete_range() {
        let manager = manager();
        let mut txn = manager.begin(IsolationLevel::ReadCommitted);
        for i in 0..10 {
            txn.put(key(i), vec![0]).unwrap();
        }
        assert_eq!(txn.delete_range(&key(2), &key(5)).unwrap(), 3);
        assert_eq!(txn.scan(&key(0), &key(10)).unwrap().count(), 7);
    }

    #[test]
    fn test_commit_callbacks_run_only_on_commit() {
        let manager = manager();
        let committed = Arc::new(AtomicBool::new(false));
        let aborted = Arc::new(AtomicBool::new(false));

        let mut txn = manager.begin(IsolationLevel::ReadCommitted);
        let flag = committed.clone();
        txn.on_commit(move || flag.store(true, Ordering::SeqCst));
        txn.commit().unwrap();
        assert!(committed.load(Ordering::SeqCst));

        let mut txn = manager.begin(IsolationLevel::ReadCommitted);
        let flag = aborted.clone();
        txn.on_commit(move || flag.store(true, Ordering::SeqCst));
        txn.put(b"x".to_vec(), vec![]).unwrap();
        txn.abort().unwrap();
        assert!(!aborted.load(Ordering::SeqCst));
        assert_eq!(manager.begin(IsolationLevel::ReadCommitted).get(b"x").unwrap(), None);

        let flag = aborted.clone();
        {
            let mut txn = manager.begin(IsolationLevel::ReadCommitted);
            txn.on_commit(move || flag.store(true, Ordering::SeqCst));
        }
        assert!(!aborted.load(Ordering::SeqCst));
    }

    #[test]
    fn test_operations_after_commit_fail() {
        let manager = manager();
        let mut txn = manager.begin(IsolationLevel::ReadCommitted);
        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(matches!(txn.put(b"a".to_vec(), vec![]), Err(StorageError::InvalidOperation(_))));
        assert!(txn.commit().is_err());
    }

    #[test]
    fn test_row_count_deltas() {
        let manager = manager();
        let mut txn = manager.begin(IsolationLevel::ReadCommitted);
        txn.adjust_row_count(TableId(1), 5);
        assert_eq!(txn.approximate_row_count(TableId(1)), 5);
        assert_eq!(manager.backend().approximate_row_count(TableId(1)), 0);
        txn.commit().unwrap();
        assert_eq!(manager.backend().approximate_row_count(TableId(1)), 5);
    }
}
