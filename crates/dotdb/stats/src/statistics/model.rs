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

//! In-memory shape of index statistics

use dotdb_common::IndexRef;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use super::error::{StatisticsError, StatisticsResult};

/// Usability of cached statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Validity {
    Valid = 0,
    /// No statistics exist; cached to avoid repeated lookups
    Invalid = 1,
    /// Usable, but the row count drifted since analysis
    Outdated = 2,
}

impl Validity {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Validity::Valid,
            2 => Validity::Outdated,
            _ => Validity::Invalid,
        }
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Validity::Valid => "valid",
            Validity::Invalid => "invalid",
            Validity::Outdated => "outdated",
        };
        f.write_str(name)
    }
}

/// Which key columns a histogram covers
///
/// Multi-column histograms cover the first `length` key columns. Single-column
/// histograms cover one trailing column at 0-based `position >= 1`; the leading
/// column is always covered by the length-1 multi-column histogram. Slots order
/// multi-column before single-column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HistogramSlot {
    MultiColumn { length: usize },
    SingleColumn { position: usize },
}

impl HistogramSlot {
    /// Build a slot from its `(first column, column count)` pair
    pub fn from_parts(first_column: usize, column_count: usize) -> StatisticsResult<Self> {
        match (first_column, column_count) {
            (0, n) if n >= 1 => Ok(HistogramSlot::MultiColumn { length: n }),
            (p, 1) if p >= 1 => Ok(HistogramSlot::SingleColumn { position: p }),
            _ => Err(StatisticsError::InvalidHistogramSlot {
                first_column: first_column as i64,
                column_count: column_count as i64,
            }),
        }
    }

    /// Decode the persisted signed column count: `n` for multi-column, `-(p+1)` for single-column
    pub fn from_signed(column_count_signed: i64) -> StatisticsResult<Self> {
        if column_count_signed > 0 {
            Ok(HistogramSlot::MultiColumn { length: column_count_signed as usize })
        } else if let Some(position) = column_count_signed.checked_neg().filter(|n| *n > 1) {
            Ok(HistogramSlot::SingleColumn { position: (position - 1) as usize })
        } else {
            Err(StatisticsError::InvalidHistogramSlot {
                first_column: 0,
                column_count: column_count_signed,
            })
        }
    }

    pub fn to_signed(self) -> i64 {
        match self {
            HistogramSlot::MultiColumn { length } => length as i64,
            HistogramSlot::SingleColumn { position } => -(position as i64 + 1),
        }
    }

    pub fn first_column(self) -> usize {
        match self {
            HistogramSlot::MultiColumn { .. } => 0,
            HistogramSlot::SingleColumn { position } => position,
        }
    }

    pub fn column_count(self) -> usize {
        match self {
            HistogramSlot::MultiColumn { length } => length,
            HistogramSlot::SingleColumn { .. } => 1,
        }
    }

    pub fn is_multi_column(self) -> bool {
        matches!(self, HistogramSlot::MultiColumn { .. })
    }
}

/// One bucket boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistogramEntry {
    /// Printable boundary, e.g. `{"1983",(long)7}`
    pub key_string: String,
    /// Ordered encoding of the boundary
    pub key_bytes: Vec<u8>,
    /// Sampled rows equal to the boundary
    pub equal_count: u64,
    /// Sampled rows strictly between the previous boundary and this one
    pub less_count: u64,
    /// Estimated distinct values strictly between the previous boundary and this one
    pub distinct_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Histogram {
    slot: HistogramSlot,
    entries: Vec<HistogramEntry>,
    owner: OnceLock<IndexRef>,
}

impl Histogram {
    pub fn new(slot: HistogramSlot, entries: Vec<HistogramEntry>) -> Self {
        Self {
            slot,
            entries,
            owner: OnceLock::new(),
        }
    }

    pub fn slot(&self) -> HistogramSlot {
        self.slot
    }

    pub fn first_column(&self) -> usize {
        self.slot.first_column()
    }

    pub fn column_count(&self) -> usize {
        self.slot.column_count()
    }

    pub fn entries(&self) -> &[HistogramEntry] {
        &self.entries
    }

    /// Index whose statistics hold this histogram
    pub fn owner(&self) -> Option<IndexRef> {
        self.owner.get().copied()
    }

    /// Returns false if an owner was already set
    pub fn set_owner(&self, owner: IndexRef) -> bool {
        self.owner.set(owner).is_ok()
    }

    /// Sampled rows represented by this histogram
    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|entry| entry.equal_count + entry.less_count).sum()
    }
}

/// Statistics of one index
#[derive(Debug)]
pub struct IndexStatistics {
    index: IndexRef,
    /// Milliseconds since the epoch
    analysis_timestamp: i64,
    row_count: u64,
    sampled_count: u64,
    validity: AtomicU8,
    warned: AtomicBool,
    histograms: BTreeMap<HistogramSlot, Histogram>,
}

impl IndexStatistics {
    pub fn new(index: IndexRef, analysis_timestamp: i64, row_count: u64, sampled_count: u64) -> Self {
        Self {
            index,
            analysis_timestamp,
            row_count,
            sampled_count,
            validity: AtomicU8::new(Validity::Valid as u8),
            warned: AtomicBool::new(false),
            histograms: BTreeMap::new(),
        }
    }

    /// Negative cache entry for an index without statistics
    pub fn invalid_placeholder(index: IndexRef) -> Self {
        let stats = Self::new(index, 0, 0, 0);
        stats.set_validity(Validity::Invalid);
        stats
    }

    pub fn index(&self) -> IndexRef {
        self.index
    }

    pub fn analysis_timestamp(&self) -> i64 {
        self.analysis_timestamp
    }

    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    pub fn sampled_count(&self) -> u64 {
        self.sampled_count
    }

    pub fn validity(&self) -> Validity {
        Validity::from_u8(self.validity.load(Ordering::Acquire))
    }

    pub fn set_validity(&self, validity: Validity) {
        self.validity.store(validity as u8, Ordering::Release);
    }

    /// Valid -> Outdated; returns whether this call made the transition
    pub fn mark_outdated(&self) -> bool {
        self.validity.compare_exchange(Validity::Valid as u8, Validity::Outdated as u8, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn is_valid(&self) -> bool {
        self.validity() == Validity::Valid
    }

    pub fn is_invalid(&self) -> bool {
        self.validity() == Validity::Invalid
    }

    pub fn warned(&self) -> bool {
        self.warned.load(Ordering::Acquire)
    }

    /// Set the warned flag; returns true only for the first caller
    pub fn mark_warned(&self) -> bool {
        self.warned.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// Attach a histogram.
    ///
    /// # Panics
    ///
    /// If the slot is already taken or the histogram belongs to another index.
    pub fn add_histogram(&mut self, histogram: Histogram) {
        if !histogram.set_owner(self.index) {
            assert_eq!(histogram.owner(), Some(self.index), "histogram already belongs to another index");
        }
        let slot = histogram.slot();
        let previous = self.histograms.insert(slot, histogram);
        assert!(previous.is_none(), "duplicate histogram for {slot:?} of index {}", self.index);
    }

    pub fn histogram(&self, first_column: usize, column_count: usize) -> Option<&Histogram> {
        HistogramSlot::from_parts(first_column, column_count).ok().and_then(|slot| self.histograms.get(&slot))
    }

    pub fn histogram_at(&self, slot: HistogramSlot) -> Option<&Histogram> {
        self.histograms.get(&slot)
    }

    /// Histograms in slot order: multi-column by length, then single-column by position
    pub fn histograms(&self) -> impl Iterator<Item = &Histogram> {
        self.histograms.values()
    }

    pub fn histogram_count(&self) -> usize {
        self.histograms.len()
    }
}

impl fmt::Display for IndexStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IndexStatistics({}, rows={}, sampled={}, histograms={}, {})",
            self.index,
            self.row_count,
            self.sampled_count,
            self.histograms.len(),
            self.validity()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotdb_common::{IndexId, TableId};

    fn index_ref() -> IndexRef {
        IndexRef {
            table_id: TableId(1),
            index_id: IndexId(2),
        }
    }

    fn entry(key: &str) -> HistogramEntry {
        HistogramEntry {
            key_string: key.to_string(),
            key_bytes: key.as_bytes().to_vec(),
            equal_count: 1,
            less_count: 2,
            distinct_count: 1,
        }
    }

    #[test]
    fn test_slot_parts() {
        assert_eq!(HistogramSlot::from_parts(0, 3).unwrap(), HistogramSlot::MultiColumn { length: 3 });
        assert_eq!(HistogramSlot::from_parts(2, 1).unwrap(), HistogramSlot::SingleColumn { position: 2 });
        assert!(HistogramSlot::from_parts(1, 2).is_err());
        assert!(HistogramSlot::from_parts(0, 0).is_err());
    }

    #[test]
    fn test_slot_signed_encoding() {
        let multi = HistogramSlot::MultiColumn { length: 2 };
        let single = HistogramSlot::SingleColumn { position: 1 };
        assert_eq!(multi.to_signed(), 2);
        assert_eq!(single.to_signed(), -2);
        assert_eq!(HistogramSlot::from_signed(-2).unwrap(), single);
        assert!(HistogramSlot::from_signed(0).is_err());
        assert!(HistogramSlot::from_signed(-1).is_err());
        assert!(HistogramSlot::from_signed(i64::MIN).is_err());
        assert_eq!(HistogramSlot::from_signed(i64::MIN + 1).unwrap(), HistogramSlot::SingleColumn { position: (i64::MAX - 1) as usize });
        assert!(multi < single);
    }

    #[test]
    fn test_add_histogram_sets_owner() {
        let mut stats = IndexStatistics::new(index_ref(), 1000, 3, 3);
        stats.add_histogram(Histogram::new(HistogramSlot::MultiColumn { length: 1 }, vec![entry("a")]));

        let histogram = stats.histogram(0, 1).unwrap();
        assert_eq!(histogram.owner(), Some(index_ref()));
        assert_eq!(histogram.total_count(), 3);
        assert!(!histogram.set_owner(index_ref()));
    }

    #[test]
    #[should_panic(expected = "duplicate histogram")]
    fn test_duplicate_slot_panics() {
        let mut stats = IndexStatistics::new(index_ref(), 1000, 3, 3);
        stats.add_histogram(Histogram::new(HistogramSlot::SingleColumn { position: 1 }, vec![]));
        stats.add_histogram(Histogram::new(HistogramSlot::SingleColumn { position: 1 }, vec![]));
    }

    #[test]
    fn test_validity_transitions() {
        let stats = IndexStatistics::new(index_ref(), 1000, 3, 3);
        assert!(stats.mark_outdated());
        assert!(!stats.mark_outdated());
        assert_eq!(stats.validity(), Validity::Outdated);

        let placeholder = IndexStatistics::invalid_placeholder(index_ref());
        assert!(placeholder.is_invalid());
        assert!(!placeholder.mark_outdated());
        assert!(placeholder.mark_warned());
        assert!(!placeholder.mark_warned());
    }
}
