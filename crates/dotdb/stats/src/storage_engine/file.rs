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

// Single-file durable backend
//
// The whole key space lives in memory and is rewritten to one file on every
// commit: header, then a bincode payload. The file is replaced atomically via
// a temporary file and rename, so a crash leaves either the old or the new state.
// Commits update the map in place under the state lock and undo the batch when
// the file cannot be written; the map is only copied while a snapshot is held.
//
// Layout: magic(4) + format version(4) + payload checksum(4) + payload

use byteorder::{ByteOrder, LittleEndian};
use dotdb_common::TableId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::lib::{BackendState, KeyMap, KvBackend, StorageError, StorageResult, WriteBatch, calculate_checksum};

const FILE_MAGIC: [u8; 4] = [0x44, 0x53, 0x54, 0x53];
const FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 12;

#[derive(Serialize)]
struct PersistedStateRef<'a> {
    data: &'a KeyMap,
    row_counts: &'a BTreeMap<TableId, u64>,
}

#[derive(Deserialize)]
struct PersistedState {
    data: KeyMap,
    row_counts: BTreeMap<TableId, u64>,
}

/// Durable backend stored in a single file
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    state: RwLock<BackendState>,
}

impl FileBackend {
    /// Open or create the backend file at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() { Self::read_state(&path)? } else { BackendState::default() };
        tracing::debug!("Opened file backend {} with {} keys", path.display(), state.data.len());

        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_state(path: &Path) -> StorageResult<BackendState> {
        let bytes = fs::read(path)?;
        if bytes.len() < HEADER_SIZE {
            return Err(StorageError::Corruption(format!("{} is too short", path.display())));
        }
        if bytes[0..4] != FILE_MAGIC {
            return Err(StorageError::Corruption(format!("{} has an invalid magic number", path.display())));
        }
        let version = LittleEndian::read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(StorageError::Corruption(format!("Unsupported format version {version}")));
        }
        let checksum = LittleEndian::read_u32(&bytes[8..12]);
        let payload = &bytes[HEADER_SIZE..];
        if calculate_checksum(payload) != checksum {
            return Err(StorageError::Corruption(format!("{} has an invalid checksum", path.display())));
        }

        let (persisted, _): (PersistedState, usize) = bincode::serde::decode_from_slice(payload, bincode::config::standard()).map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(BackendState {
            data: Arc::new(persisted.data),
            row_counts: persisted.row_counts,
        })
    }

    fn write_state(&self, state: &BackendState) -> StorageResult<()> {
        let persisted = PersistedStateRef {
            data: &state.data,
            row_counts: &state.row_counts,
        };
        let payload = bincode::serde::encode_to_vec(&persisted, bincode::config::standard()).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let mut header = [0u8; HEADER_SIZE];
        header[0..4].copy_from_slice(&FILE_MAGIC);
        LittleEndian::write_u32(&mut header[4..8], FORMAT_VERSION);
        LittleEndian::write_u32(&mut header[8..12], calculate_checksum(&payload));

        let temp_path = self.path.with_extension("tmp");
        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(&header)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl KvBackend for FileBackend {
    fn snapshot(&self) -> Arc<KeyMap> {
        self.state.read().data.clone()
    }

    fn apply(&self, batch: WriteBatch) -> StorageResult<()> {
        let mut state = self.state.write();

        let previous_counts = state.row_counts.clone();
        let mut undo = WriteBatch::default();
        for key in batch.writes.keys() {
            undo.writes.insert(key.clone(), state.data.get(key).cloned());
        }

        state.apply(batch);
        if let Err(err) = self.write_state(&state) {
            state.apply(undo);
            state.row_counts = previous_counts;
            return Err(err);
        }
        Ok(())
    }

    fn approximate_row_count(&self, table: TableId) -> u64 {
        self.state.read().row_counts.get(&table).copied().unwrap_or(0)
    }
}
