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

//! Table and index definitions.
//!
//! The statistics subsystem only ever reads this model. Index identity for
//! caching purposes is the `(table id, index id)` pair carried by [`IndexRef`],
//! which stays stable for the lifetime of the index definition.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::value::ColumnType;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("Table already exists: {0}")]
    TableExists(String),
    #[error("No such table: {0}")]
    NoSuchTable(String),
    #[error("Index already exists: {0}")]
    IndexExists(String),
    #[error("No such index: {0}")]
    NoSuchIndex(String),
    #[error("No such column {column} in table {table}")]
    NoSuchColumn { table: String, column: String },
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),
    #[error("Invalid {column_type} value: {value}")]
    InvalidValue { column_type: ColumnType, value: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type SchemaResult<T> = Result<T, SchemaError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexId(pub u32);

/// Stable surrogate identity of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IndexRef {
    pub table_id: TableId,
    pub index_id: IndexId,
}

impl fmt::Display for IndexRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table_id.0, self.index_id.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub table: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Parse `schema.table`
    pub fn parse(qualified: &str) -> Option<Self> {
        let (schema, table) = qualified.split_once('.')?;
        if schema.is_empty() || table.is_empty() {
            return None;
        }
        Some(Self::new(schema, table))
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// Fully qualified index name, ordered by its printed form
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexName {
    pub table: TableName,
    pub name: String,
}

impl IndexName {
    pub fn new(table: TableName, name: impl Into<String>) -> Self {
        Self { table, name: name.into() }
    }

    /// Parse `schema.table.index`
    pub fn parse(qualified: &str) -> Option<Self> {
        let (table, name) = qualified.rsplit_once('.')?;
        if name.is_empty() {
            return None;
        }
        Some(Self::new(TableName::parse(table)?, name))
    }
}

impl Ord for IndexName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_string().cmp(&other.to_string()).then_with(|| (&self.table, &self.name).cmp(&(&other.table, &other.name)))
    }
}

impl PartialOrd for IndexName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.table, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    /// Ordinal position within the owning table (0-based)
    pub position: usize,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub id: IndexId,
    pub name: IndexName,
    pub table_id: TableId,
    /// Ordinal of the owning table within its hierarchical key space
    pub table_ordinal: u32,
    pub key_columns: Vec<ColumnDef>,
}

impl IndexDef {
    pub fn index_ref(&self) -> IndexRef {
        IndexRef {
            table_id: self.table_id,
            index_id: self.id,
        }
    }

    pub fn key_column_count(&self) -> usize {
        self.key_columns.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDef {
    pub id: TableId,
    pub ordinal: u32,
    pub name: TableName,
    pub columns: Vec<ColumnDef>,
    pub indexes: Vec<Arc<IndexDef>>,
}

impl TableDef {
    pub fn index(&self, name: &str) -> Option<&Arc<IndexDef>> {
        self.indexes.iter().find(|index| index.name.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|column| column.name == name)
    }
}

/// Read-only view of the schema
pub trait Catalog: Send + Sync {
    fn table(&self, name: &TableName) -> Option<Arc<TableDef>>;

    fn table_by_id(&self, id: TableId) -> Option<Arc<TableDef>>;

    fn tables_in_schema(&self, schema: &str) -> Vec<Arc<TableDef>>;

    fn index(&self, name: &IndexName) -> Option<Arc<IndexDef>> {
        self.table(&name.table).and_then(|table| table.index(&name.name).cloned())
    }

    fn indexes_in_schema(&self, schema: &str) -> Vec<Arc<IndexDef>> {
        self.tables_in_schema(schema).iter().flat_map(|table| table.indexes.iter().cloned()).collect()
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogState {
    next_table_id: u32,
    tables: Vec<Arc<TableDef>>,
}

/// Catalog kept in memory, optionally saved to a JSON file
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a catalog previously written by [`InMemoryCatalog::save`]. A missing file yields an empty catalog.
    pub fn open<P: AsRef<Path>>(path: P) -> SchemaResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = std::fs::read(path)?;
        let state: CatalogState = serde_json::from_slice(&data)?;
        Ok(Self { state: RwLock::new(state) })
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> SchemaResult<()> {
        let data = serde_json::to_vec_pretty(&*self.state.read())?;
        std::fs::write(path, data)?;
        Ok(())
    }

    pub fn create_table(&self, name: TableName, columns: &[(&str, ColumnType)]) -> SchemaResult<Arc<TableDef>> {
        if columns.is_empty() {
            return Err(SchemaError::InvalidDefinition(format!("table {name} has no columns")));
        }

        let mut state = self.state.write();
        if state.tables.iter().any(|table| table.name == name) {
            return Err(SchemaError::TableExists(name.to_string()));
        }

        let mut defs: Vec<ColumnDef> = Vec::with_capacity(columns.len());
        for (position, (column, column_type)) in columns.iter().enumerate() {
            if defs.iter().any(|def| def.name == *column) {
                return Err(SchemaError::InvalidDefinition(format!("duplicate column {column} in table {name}")));
            }
            defs.push(ColumnDef {
                name: column.to_string(),
                position,
                column_type: *column_type,
            });
        }

        state.next_table_id += 1;
        let id = state.next_table_id;
        let table = Arc::new(TableDef {
            id: TableId(id),
            ordinal: id,
            name,
            columns: defs,
            indexes: Vec::new(),
        });
        state.tables.push(table.clone());
        tracing::debug!("Created table {} with id {}", table.name, id);
        Ok(table)
    }

    pub fn create_index(&self, table_name: &TableName, index_name: &str, columns: &[&str]) -> SchemaResult<Arc<IndexDef>> {
        if columns.is_empty() {
            return Err(SchemaError::InvalidDefinition(format!("index {index_name} has no key columns")));
        }

        let mut state = self.state.write();
        let slot = state.tables.iter().position(|table| &table.name == table_name).ok_or_else(|| SchemaError::NoSuchTable(table_name.to_string()))?;
        let table = &state.tables[slot];
        if table.index(index_name).is_some() {
            return Err(SchemaError::IndexExists(format!("{table_name}.{index_name}")));
        }

        let key_columns = columns
            .iter()
            .map(|column| {
                table.column(column).cloned().ok_or_else(|| SchemaError::NoSuchColumn {
                    table: table_name.to_string(),
                    column: column.to_string(),
                })
            })
            .collect::<SchemaResult<Vec<_>>>()?;

        let next_id = table.indexes.iter().map(|index| index.id.0).max().unwrap_or(0) + 1;
        let index = Arc::new(IndexDef {
            id: IndexId(next_id),
            name: IndexName::new(table_name.clone(), index_name),
            table_id: table.id,
            table_ordinal: table.ordinal,
            key_columns,
        });

        let mut updated = (**table).clone();
        updated.indexes.push(index.clone());
        state.tables[slot] = Arc::new(updated);
        Ok(index)
    }

    pub fn drop_table(&self, name: &TableName) -> SchemaResult<Arc<TableDef>> {
        let mut state = self.state.write();
        let slot = state.tables.iter().position(|table| &table.name == name).ok_or_else(|| SchemaError::NoSuchTable(name.to_string()))?;
        Ok(state.tables.remove(slot))
    }

    pub fn drop_index(&self, name: &IndexName) -> SchemaResult<Arc<IndexDef>> {
        let mut state = self.state.write();
        let slot = state.tables.iter().position(|table| table.name == name.table).ok_or_else(|| SchemaError::NoSuchTable(name.table.to_string()))?;

        let mut updated = (*state.tables[slot]).clone();
        let position = updated.indexes.iter().position(|index| index.name == *name).ok_or_else(|| SchemaError::NoSuchIndex(name.to_string()))?;
        let index = updated.indexes.remove(position);
        state.tables[slot] = Arc::new(updated);
        Ok(index)
    }
}

impl Catalog for InMemoryCatalog {
    fn table(&self, name: &TableName) -> Option<Arc<TableDef>> {
        self.state.read().tables.iter().find(|table| &table.name == name).cloned()
    }

    fn table_by_id(&self, id: TableId) -> Option<Arc<TableDef>> {
        self.state.read().tables.iter().find(|table| table.id == id).cloned()
    }

    fn tables_in_schema(&self, schema: &str) -> Vec<Arc<TableDef>> {
        let state = self.state.read();
        let mut tables: BTreeMap<&TableName, Arc<TableDef>> = BTreeMap::new();
        for table in state.tables.iter().filter(|table| table.name.schema == schema) {
            tables.insert(&table.name, table.clone());
        }
        tables.into_values().collect()
    }
}
