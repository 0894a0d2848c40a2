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

//! Persisted row format
//!
//! One header row per index and one entry row per histogram entry. Rows carry
//! the owning table and index ids so deletion scans can verify them. The
//! analysis timestamp is stored in whole seconds; item numbers are 1-based and
//! restart for every histogram.

use dotdb_common::{IndexId, IndexRef, TableId};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

use super::error::{StatisticsError, StatisticsResult};
use super::model::{Histogram, HistogramEntry, HistogramSlot, IndexStatistics};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRow {
    pub table_id: u32,
    pub index_id: u32,
    pub analysis_timestamp_secs: i64,
    pub row_count: u64,
    pub sampled_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRow {
    pub table_id: u32,
    pub index_id: u32,
    pub column_count_signed: i64,
    pub item_number: i64,
    pub key_string: String,
    pub key_bytes: Vec<u8>,
    pub equal_count: u64,
    pub less_count: u64,
    pub distinct_count: u64,
}

/// Rows of one index's statistics, entries in store order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatisticsRows {
    pub header: HeaderRow,
    pub entries: Vec<EntryRow>,
}

pub fn to_rows(stats: &IndexStatistics) -> StatisticsRows {
    let index = stats.index();
    let header = HeaderRow {
        table_id: index.table_id.0,
        index_id: index.index_id.0,
        analysis_timestamp_secs: stats.analysis_timestamp() / 1000,
        row_count: stats.row_count(),
        sampled_count: stats.sampled_count(),
    };

    let mut entries = Vec::new();
    for histogram in stats.histograms() {
        let column_count_signed = histogram.slot().to_signed();
        for (item, entry) in histogram.entries().iter().enumerate() {
            entries.push(EntryRow {
                table_id: index.table_id.0,
                index_id: index.index_id.0,
                column_count_signed,
                item_number: item as i64 + 1,
                key_string: entry.key_string.clone(),
                key_bytes: entry.key_bytes.clone(),
                equal_count: entry.equal_count,
                less_count: entry.less_count,
                distinct_count: entry.distinct_count,
            });
        }
    }

    StatisticsRows { header, entries }
}

/// Rebuild statistics from a header and its entries, in any order
pub fn from_rows<I>(header: &HeaderRow, entries: I) -> StatisticsResult<IndexStatistics>
where
    I: IntoIterator<Item = EntryRow>,
{
    let index = IndexRef {
        table_id: TableId(header.table_id),
        index_id: IndexId(header.index_id),
    };

    let mut grouped: BTreeMap<HistogramSlot, BTreeMap<i64, HistogramEntry>> = BTreeMap::new();
    for row in entries {
        if row.table_id != header.table_id || row.index_id != header.index_id {
            return Err(StatisticsError::Codec(format!("entry for {}/{} stored under index {}", row.table_id, row.index_id, index)));
        }
        let slot = HistogramSlot::from_signed(row.column_count_signed)?;
        let entry = HistogramEntry {
            key_string: row.key_string,
            key_bytes: row.key_bytes,
            equal_count: row.equal_count,
            less_count: row.less_count,
            distinct_count: row.distinct_count,
        };
        if grouped.entry(slot).or_default().insert(row.item_number, entry).is_some() {
            return Err(StatisticsError::Codec(format!("duplicate item {} in histogram {:?} of index {}", row.item_number, slot, index)));
        }
    }

    let mut stats = IndexStatistics::new(index, header.analysis_timestamp_secs * 1000, header.row_count, header.sampled_count);
    for (slot, items) in grouped {
        stats.add_histogram(Histogram::new(slot, items.into_values().collect()));
    }
    Ok(stats)
}

fn encode<T: Serialize>(row: &T) -> StatisticsResult<Vec<u8>> {
    bincode::serde::encode_to_vec(row, bincode::config::standard()).map_err(|e| StatisticsError::Codec(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StatisticsResult<T> {
    let (row, _) = bincode::serde::decode_from_slice(bytes, bincode::config::standard()).map_err(|e| StatisticsError::Codec(e.to_string()))?;
    Ok(row)
}

pub fn encode_header(row: &HeaderRow) -> StatisticsResult<Vec<u8>> {
    encode(row)
}

pub fn decode_header(bytes: &[u8]) -> StatisticsResult<HeaderRow> {
    decode(bytes)
}

pub fn encode_entry(row: &EntryRow) -> StatisticsResult<Vec<u8>> {
    encode(row)
}

pub fn decode_entry(bytes: &[u8]) -> StatisticsResult<EntryRow> {
    decode(bytes)
}
