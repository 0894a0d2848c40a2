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

//! Human-readable statistics snapshots
//!
//! A snapshot is a stream of YAML documents, one per index:
//!
//! ```yaml
//! ---
//! Index: name_dob
//! RowCount: 3
//! SampledCount: 3
//! Statistics:
//! - Columns: 1
//!   FirstColumn: 0
//!   Histogram:
//!   - distinct: 0
//!     eq: 1
//!     key: [Bob]
//!     lt: 0
//! Table: customers
//! Timestamp: 2025-03-01T12:00:00Z
//! ```
//!
//! Keys are written in alphabetical order. Binary key values that cannot be
//! written as plain scalars use the `!bytes <hex>` tag.

use chrono::{DateTime, Utc};
use dotdb_common::{Catalog, ColumnType, IndexDef, KeyValue, TableName};
use serde::{Deserialize, Serialize};
use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::{Number, Value};
use std::io::{Read, Write};
use std::sync::Arc;

use super::error::{StatisticsError, StatisticsResult};
use super::model::{Histogram, HistogramEntry, HistogramSlot, IndexStatistics};
use crate::encoding::{decode_key, encode_key, key_string};

const BYTES_TAG: &str = "bytes";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    #[serde(rename = "Index")]
    pub index: String,
    #[serde(rename = "RowCount", default)]
    pub row_count: u64,
    #[serde(rename = "SampledCount", default)]
    pub sampled_count: u64,
    #[serde(rename = "Statistics", default)]
    pub statistics: Vec<HistogramSnapshot>,
    #[serde(rename = "Table")]
    pub table: String,
    /// Absent means the epoch
    #[serde(rename = "Timestamp", default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    #[serde(rename = "Columns")]
    pub columns: usize,
    #[serde(rename = "FirstColumn", default)]
    pub first_column: usize,
    #[serde(rename = "Histogram", default)]
    pub histogram: Vec<EntrySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub distinct: u64,
    pub eq: u64,
    pub key: Vec<Value>,
    pub lt: u64,
}

fn to_yaml(value: KeyValue) -> Value {
    match value {
        KeyValue::Null => Value::Null,
        KeyValue::Bool(b) => Value::Bool(b),
        KeyValue::Int(i) => Value::Number(Number::from(i)),
        KeyValue::Double(d) => Value::Number(Number::from(d)),
        KeyValue::Text(s) => Value::String(s),
        KeyValue::Bytes(bytes) => Value::Tagged(Box::new(TaggedValue {
            tag: Tag::new(BYTES_TAG),
            value: Value::String(hex::encode(bytes)),
        })),
    }
}

fn from_yaml(value: &Value, column_type: ColumnType) -> StatisticsResult<KeyValue> {
    let mismatch = || StatisticsError::MalformedSnapshot(format!("cannot read {value:?} as {column_type}"));

    let value = match value {
        Value::Tagged(tagged) if tagged.tag == Tag::new(BYTES_TAG) => match (&tagged.value, column_type) {
            (Value::String(digits), ColumnType::Binary) => return hex::decode(digits).map(KeyValue::Bytes).map_err(|_| mismatch()),
            _ => return Err(mismatch()),
        },
        Value::Tagged(_) => return Err(mismatch()),
        other => other,
    };

    match (value, column_type) {
        (Value::Null, _) => Ok(KeyValue::Null),
        (Value::Bool(b), ColumnType::Boolean) => Ok(KeyValue::Bool(*b)),
        (Value::Number(n), ColumnType::Integer) => n.as_i64().map(KeyValue::Int).ok_or_else(mismatch),
        (Value::Number(n), ColumnType::Double) => n.as_f64().map(KeyValue::Double).ok_or_else(mismatch),
        (Value::String(s), ColumnType::Text) => Ok(KeyValue::Text(s.clone())),
        (Value::Number(n), ColumnType::Text) => Ok(KeyValue::Text(n.to_string())),
        (Value::Bool(b), ColumnType::Text) => Ok(KeyValue::Text(b.to_string())),
        (Value::String(s), ColumnType::Binary) => hex::decode(s).map(KeyValue::Bytes).map_err(|_| mismatch()),
        (Value::String(s), _) => KeyValue::parse_as(column_type, s).map_err(|_| mismatch()),
        _ => Err(mismatch()),
    }
}

/// Snapshot document for one index
pub fn to_document(index: &IndexDef, stats: &IndexStatistics) -> StatisticsResult<IndexSnapshot> {
    let timestamp = DateTime::<Utc>::from_timestamp_millis(stats.analysis_timestamp())
        .ok_or_else(|| StatisticsError::MalformedSnapshot(format!("analysis timestamp {} of {} is out of range", stats.analysis_timestamp(), index.name)))?;

    let mut statistics = Vec::with_capacity(stats.histogram_count());
    for histogram in stats.histograms() {
        let mut entries = Vec::with_capacity(histogram.entries().len());
        for entry in histogram.entries() {
            entries.push(EntrySnapshot {
                distinct: entry.distinct_count,
                eq: entry.equal_count,
                key: decode_key(&entry.key_bytes)?.into_iter().map(to_yaml).collect(),
                lt: entry.less_count,
            });
        }
        statistics.push(HistogramSnapshot {
            columns: histogram.column_count(),
            first_column: histogram.first_column(),
            histogram: entries,
        });
    }

    Ok(IndexSnapshot {
        index: index.name.name.clone(),
        row_count: stats.row_count(),
        sampled_count: stats.sampled_count(),
        statistics,
        table: index.name.table.table.clone(),
        timestamp: Some(timestamp),
    })
}

pub fn write_documents<W: Write>(documents: &[IndexSnapshot], mut writer: W) -> StatisticsResult<()> {
    for document in documents {
        writer.write_all(b"---\n")?;
        writer.write_all(serde_yaml::to_string(document)?.as_bytes())?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_documents<R: Read>(reader: R) -> StatisticsResult<Vec<IndexSnapshot>> {
    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_reader(reader) {
        let value = Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        documents.push(serde_yaml::from_value(value)?);
    }
    Ok(documents)
}

/// Resolve a document against the catalog and rebuild its statistics.
///
/// Returns `Ok(None)` for an unknown table or index when `skip_missing` is set.
pub fn from_document(catalog: &dyn Catalog, schema: &str, document: &IndexSnapshot, skip_missing: bool) -> StatisticsResult<Option<(Arc<IndexDef>, IndexStatistics)>> {
    let table_name = TableName::new(schema, document.table.clone());
    let Some(table) = catalog.table(&table_name) else {
        if skip_missing {
            return Ok(None);
        }
        return Err(StatisticsError::NoSuchTable(table_name.to_string()));
    };
    let Some(index) = table.index(&document.index).cloned() else {
        if skip_missing {
            return Ok(None);
        }
        return Err(StatisticsError::NoSuchIndex(format!("{}.{}", table_name, document.index)));
    };

    let mut stats = IndexStatistics::new(index.index_ref(), document.timestamp.map_or(0, |timestamp| timestamp.timestamp_millis()), document.row_count, document.sampled_count);
    for histogram in &document.statistics {
        let slot = HistogramSlot::from_parts(histogram.first_column, histogram.columns)?;
        let end = match histogram.first_column.checked_add(histogram.columns) {
            Some(end) if end <= index.key_column_count() => end,
            _ => {
                return Err(StatisticsError::MalformedSnapshot(format!(
                    "histogram ({}, {}) exceeds the {} key columns of {}",
                    histogram.first_column,
                    histogram.columns,
                    index.key_column_count(),
                    index.name
                )));
            }
        };
        if stats.histogram_at(slot).is_some() {
            return Err(StatisticsError::MalformedSnapshot(format!("duplicate histogram ({}, {}) for {}", histogram.first_column, histogram.columns, index.name)));
        }

        let columns = &index.key_columns[histogram.first_column..end];
        let mut entries = Vec::with_capacity(histogram.histogram.len());
        for entry in &histogram.histogram {
            if entry.key.len() != columns.len() {
                return Err(StatisticsError::MalformedSnapshot(format!("Key values do not match column count in {}: {:?}", index.name, entry.key)));
            }
            let values = entry.key.iter().zip(columns).map(|(value, column)| from_yaml(value, column.column_type)).collect::<StatisticsResult<Vec<_>>>()?;
            entries.push(HistogramEntry {
                key_string: key_string(&values),
                key_bytes: encode_key(&values),
                equal_count: entry.eq,
                less_count: entry.lt,
                distinct_count: entry.distinct,
            });
        }
        stats.add_histogram(Histogram::new(slot, entries));
    }

    Ok(Some((index, stats)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dotdb_common::InMemoryCatalog;

    const SNAPSHOT: &str = r#"---
Index: name_dob
RowCount: 3
SampledCount: 3
Statistics:
- Columns: 1
  FirstColumn: 0
  Histogram:
  - distinct: 0
    eq: 1
    key: [Bob]
    lt: 0
  - distinct: 0
    eq: 1
    key: [Zoe]
    lt: 1
- Columns: 1
  FirstColumn: 1
  Histogram:
  - distinct: 0
    eq: 2
    key: [1983]
    lt: 0
  - distinct: 0
    eq: 1
    key: [null]
    lt: 0
Table: customers
Timestamp: 2025-03-01T12:00:00Z
"#;

    fn catalog() -> InMemoryCatalog {
        let catalog = InMemoryCatalog::new();
        let customers = TableName::new("test", "customers");
        catalog
            .create_table(customers.clone(), &[("cid", ColumnType::Integer), ("name", ColumnType::Text), ("dob", ColumnType::Text), ("photo", ColumnType::Binary)])
            .unwrap();
        catalog.create_index(&customers, "name_dob", &["name", "dob"]).unwrap();
        catalog.create_index(&customers, "photo", &["photo"]).unwrap();
        catalog
    }

    #[test]
    fn test_read_and_resolve() {
        let catalog = catalog();
        let documents = read_documents(SNAPSHOT.as_bytes()).unwrap();
        assert_eq!(documents.len(), 1);

        let (index, stats) = from_document(&catalog, "test", &documents[0], false).unwrap().unwrap();
        assert_eq!(index.name.name, "name_dob");
        assert_eq!(stats.analysis_timestamp(), 1_740_830_400_000);
        assert_eq!(stats.histogram_count(), 2);

        let dob = stats.histogram(1, 1).unwrap();
        // Unquoted 1983 is read as text for a text column
        assert_eq!(dob.entries()[0].key_string, "{\"1983\"}");
        assert_eq!(dob.entries()[1].key_string, "{null}");
        assert_eq!(dob.entries()[0].key_bytes, encode_key(&[KeyValue::Text("1983".into())]));
    }

    #[test]
    fn test_written_documents_read_back() {
        let catalog = catalog();
        let document = read_documents(SNAPSHOT.as_bytes()).unwrap().remove(0);
        let (index, stats) = from_document(&catalog, "test", &document, false).unwrap().unwrap();

        let mut out = Vec::new();
        write_documents(&[to_document(&index, &stats).unwrap()], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("---\nIndex: name_dob\n"));
        assert!(text.find("RowCount").unwrap() < text.find("Statistics").unwrap());
        assert!(text.find("Statistics").unwrap() < text.find("Table").unwrap());

        let reread = read_documents(text.as_bytes()).unwrap();
        assert_eq!(reread[0], document_with_text_keys(document));
    }

    /// The source snapshot wrote 1983 unquoted; written snapshots quote it
    fn document_with_text_keys(mut document: IndexSnapshot) -> IndexSnapshot {
        document.statistics[1].histogram[0].key = vec![Value::String("1983".into())];
        document
    }

    #[test]
    fn test_binary_keys_use_bytes_tag() {
        let catalog = catalog();
        let index = catalog.index(&dotdb_common::IndexName::new(TableName::new("test", "customers"), "photo")).unwrap();
        let mut stats = IndexStatistics::new(index.index_ref(), 0, 1, 1);
        let key = vec![KeyValue::Bytes(vec![0x00, 0xAB])];
        stats.add_histogram(Histogram::new(
            HistogramSlot::MultiColumn { length: 1 },
            vec![HistogramEntry {
                key_string: key_string(&key),
                key_bytes: encode_key(&key),
                equal_count: 1,
                less_count: 0,
                distinct_count: 0,
            }],
        ));

        let mut out = Vec::new();
        write_documents(&[to_document(&index, &stats).unwrap()], &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("!bytes 00ab"));

        let document = read_documents(text.as_bytes()).unwrap().remove(0);
        let (_, restored) = from_document(&catalog, "test", &document, false).unwrap().unwrap();
        assert_eq!(restored.histogram(0, 1).unwrap().entries()[0].key_bytes, encode_key(&key));
    }

    #[test]
    fn test_missing_index_and_arity() {
        let catalog = catalog();
        let mut document = read_documents(SNAPSHOT.as_bytes()).unwrap().remove(0);

        document.index = "gone".to_string();
        assert!(matches!(from_document(&catalog, "test", &document, false), Err(StatisticsError::NoSuchIndex(_))));
        assert!(from_document(&catalog, "test", &document, true).unwrap().is_none());

        document.table = "nobody".to_string();
        assert!(matches!(from_document(&catalog, "test", &document, false), Err(StatisticsError::NoSuchTable(_))));

        let mut document = read_documents(SNAPSHOT.as_bytes()).unwrap().remove(0);
        document.statistics[0].histogram[0].key.push(Value::Null);
        let err = from_document(&catalog, "test", &document, true).unwrap_err();
        assert!(err.to_string().contains("Key values do not match column count"));
    }

    #[test]
    fn test_optional_fields_default() {
        let catalog = catalog();
        let text = "---\nIndex: name_dob\nStatistics:\n- Columns: 2\n  Histogram:\n  - distinct: 1\n    eq: 1\n    key: [Bob, '1983']\n    lt: 0\nTable: customers\n";
        let document = read_documents(text.as_bytes()).unwrap().remove(0);
        assert_eq!(document.statistics[0].first_column, 0);
        assert_eq!(document.timestamp, None);

        let (_, stats) = from_document(&catalog, "test", &document, false).unwrap().unwrap();
        assert_eq!(stats.analysis_timestamp(), 0);
        assert_eq!(stats.row_count(), 0);
        assert_eq!(stats.sampled_count(), 0);
        assert_eq!(stats.histogram(0, 2).unwrap().entries()[0].key_string, "{\"Bob\",\"1983\"}");
    }

    #[test]
    fn test_column_range_overflow_is_rejected() {
        let catalog = catalog();
        let mut document = read_documents(SNAPSHOT.as_bytes()).unwrap().remove(0);
        document.statistics[1].first_column = usize::MAX;
        let err = from_document(&catalog, "test", &document, false).unwrap_err();
        assert!(matches!(err, StatisticsError::MalformedSnapshot(_)));

        let mut document = read_documents(SNAPSHOT.as_bytes()).unwrap().remove(0);
        document.statistics[1].first_column = 2;
        assert!(matches!(from_document(&catalog, "test", &document, false), Err(StatisticsError::MalformedSnapshot(_))));
    }
}
