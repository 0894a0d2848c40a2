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

// Key layout
//
// Index rows:        [1, tableId, indexId] + key columns + rowId
// Statistics header: [2, tableOrdinal, tableId, indexId]
// Statistics entry:  header + [columnCountSigned, itemNumber]
//
// Every segment is encoded with the ordered key codec, so each layout is a
// prefix of the next and a prefix range covers a whole index or statistics set.

use dotdb_common::{IndexDef, KeyValue, TableDef};

use super::lib::{StorageError, StorageResult};
use super::transaction::Transaction;
use crate::encoding::{encode_key, encode_value_into};

const INDEX_SPACE: i64 = 1;
const STATISTICS_SPACE: i64 = 2;

/// Smallest key greater than every key starting with `prefix`. Segment tags never use `0xFF`.
pub fn prefix_end(prefix: &[u8]) -> Vec<u8> {
    let mut end = Vec::with_capacity(prefix.len() + 1);
    end.extend_from_slice(prefix);
    end.push(0xFF);
    end
}

pub fn index_prefix(index: &IndexDef) -> Vec<u8> {
    encode_key(&[KeyValue::Int(INDEX_SPACE), KeyValue::Int(index.table_id.0 as i64), KeyValue::Int(index.id.0 as i64)])
}

pub fn index_row_key(index: &IndexDef, key_values: &[KeyValue], row_id: i64) -> Vec<u8> {
    let mut key = index_prefix(index);
    for value in key_values {
        encode_value_into(value, &mut key);
    }
    encode_value_into(&KeyValue::Int(row_id), &mut key);
    key
}

pub fn statistics_header_key(index: &IndexDef) -> Vec<u8> {
    encode_key(&[
        KeyValue::Int(STATISTICS_SPACE),
        KeyValue::Int(index.table_ordinal as i64),
        KeyValue::Int(index.table_id.0 as i64),
        KeyValue::Int(index.id.0 as i64),
    ])
}

pub fn statistics_entry_key(index: &IndexDef, column_count_signed: i64, item_number: i64) -> Vec<u8> {
    let mut key = statistics_header_key(index);
    encode_value_into(&KeyValue::Int(column_count_signed), &mut key);
    encode_value_into(&KeyValue::Int(item_number), &mut key);
    key
}

fn index_values(index: &IndexDef, row: &[KeyValue]) -> Vec<KeyValue> {
    index.key_columns.iter().map(|column| row[column.position].clone()).collect()
}

fn check_row(table: &TableDef, row: &[KeyValue]) -> StorageResult<()> {
    if row.len() != table.columns.len() {
        return Err(StorageError::InvalidOperation(format!("Table {} has {} columns, row has {}", table.name, table.columns.len(), row.len())));
    }
    Ok(())
}

/// Write one table row into every index of `table` and count it
pub fn insert_index_rows(txn: &mut Transaction, table: &TableDef, row_id: i64, row: &[KeyValue]) -> StorageResult<()> {
    check_row(table, row)?;
    for index in &table.indexes {
        let key = index_row_key(index, &index_values(index, row), row_id);
        txn.put(key, Vec::new())?;
    }
    txn.adjust_row_count(table.id, 1);
    Ok(())
}

/// Remove one table row from every index; returns whether the row existed
pub fn delete_index_rows(txn: &mut Transaction, table: &TableDef, row_id: i64, row: &[KeyValue]) -> StorageResult<bool> {
    check_row(table, row)?;
    let mut existed = false;
    for index in &table.indexes {
        let key = index_row_key(index, &index_values(index, row), row_id);
        if txn.get(&key)?.is_some() {
            txn.delete(&key)?;
            existed = true;
        }
    }
    if existed {
        txn.adjust_row_count(table.id, -1);
    }
    Ok(existed)
}

/// Remove every index row of `table` and reset its row count
pub fn truncate_table(txn: &mut Transaction, table: &TableDef) -> StorageResult<()> {
    for index in &table.indexes {
        let prefix = index_prefix(index);
        txn.delete_range(&prefix, &prefix_end(&prefix))?;
    }
    let current = txn.approximate_row_count(table.id);
    txn.adjust_row_count(table.id, -(current as i64));
    Ok(())
}
