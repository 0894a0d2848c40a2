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

//! Shared model types for DotDB.
//!
//! The schema model here is read-only input to the statistics subsystem: it
//! describes tables, their indexes and the key columns of each index. Key
//! values are the typed column values that index keys are built from.

pub mod schema;
pub mod value;

pub use schema::{Catalog, ColumnDef, InMemoryCatalog, IndexDef, IndexId, IndexName, IndexRef, SchemaError, SchemaResult, TableDef, TableId, TableName};
pub use value::{ColumnType, KeyValue};
