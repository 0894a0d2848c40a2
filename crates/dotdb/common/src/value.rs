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

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::schema::SchemaError;

/// Declared type of a table column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Integer,
    Double,
    Text,
    Binary,
}

impl ColumnType {
    pub fn name(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Integer => "integer",
            ColumnType::Double => "double",
            ColumnType::Text => "text",
            ColumnType::Binary => "binary",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ColumnType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(ColumnType::Boolean),
            "int" | "integer" | "bigint" => Ok(ColumnType::Integer),
            "double" | "float" => Ok(ColumnType::Double),
            "text" | "string" | "varchar" => Ok(ColumnType::Text),
            "binary" | "bytes" | "varbinary" => Ok(ColumnType::Binary),
            other => Err(SchemaError::InvalidDefinition(format!("unknown column type '{other}'"))),
        }
    }
}

/// A single typed value of an index key column
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl KeyValue {
    pub fn is_null(&self) -> bool {
        matches!(self, KeyValue::Null)
    }

    /// Parse user input as a value of the given column type. `null` is accepted for every type.
    pub fn parse_as(column_type: ColumnType, input: &str) -> Result<Self, SchemaError> {
        let input = input.trim();
        if input.eq_ignore_ascii_case("null") {
            return Ok(KeyValue::Null);
        }

        let invalid = || SchemaError::InvalidValue {
            column_type,
            value: input.to_string(),
        };

        match column_type {
            ColumnType::Boolean => input.parse::<bool>().map(KeyValue::Bool).map_err(|_| invalid()),
            ColumnType::Integer => input.parse::<i64>().map(KeyValue::Int).map_err(|_| invalid()),
            ColumnType::Double => input.parse::<f64>().map(KeyValue::Double).map_err(|_| invalid()),
            ColumnType::Text => Ok(KeyValue::Text(input.trim_matches('"').to_string())),
            ColumnType::Binary => hex::decode(input.strip_prefix("0x").unwrap_or(input)).map(KeyValue::Bytes).map_err(|_| invalid()),
        }
    }
}

/// Printable form used for histogram key strings, e.g. `"abc"`, `(long)7`, `null`.
impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Null => f.write_str("null"),
            KeyValue::Bool(b) => write!(f, "{b}"),
            KeyValue::Int(i) => write!(f, "(long){i}"),
            KeyValue::Double(d) => write!(f, "(double){d}"),
            KeyValue::Text(s) => write!(f, "{s:?}"),
            KeyValue::Bytes(bytes) => write!(f, "(byte[]){}", hex::encode(bytes)),
        }
    }
}
