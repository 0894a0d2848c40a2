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

// Reusable key buffers for sampling scans

/// Statistics about key buffer reuse
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoolStats {
    pub allocation_count: u64,   // Buffers created because the free list was empty
    pub reuse_count: u64,        // Buffers served from the free list
    pub release_count: u64,      // Buffers handed back
    pub free_buffers: usize,     // Buffers currently on the free list
    pub outstanding: usize,      // Buffers currently held by accumulators
    pub peak_outstanding: usize, // Maximum buffers held at once
}

impl PoolStats {
    /// Ratio of requests served without allocating
    pub fn hit_rate(&self) -> f64 {
        let requests = self.allocation_count + self.reuse_count;
        if requests == 0 { 0.0 } else { self.reuse_count as f64 / requests as f64 }
    }
}

/// Flyweight pool of key buffers. A scan copies each truncated key into a
/// recycled buffer instead of allocating a fresh one per row.
#[derive(Debug)]
pub struct KeyBufferPool {
    free: Vec<Vec<u8>>,
    max_free: usize,
    stats: PoolStats,
}

impl KeyBufferPool {
    /// `max_free` bounds how many idle buffers are kept for reuse
    pub fn new(max_free: usize) -> Self {
        Self {
            free: Vec::new(),
            max_free,
            stats: PoolStats::default(),
        }
    }

    /// Copy `bytes` into a pooled buffer
    pub fn acquire(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut buffer = match self.free.pop() {
            Some(buffer) => {
                self.stats.reuse_count += 1;
                buffer
            }
            None => {
                self.stats.allocation_count += 1;
                Vec::with_capacity(bytes.len())
            }
        };
        buffer.clear();
        buffer.extend_from_slice(bytes);

        self.stats.outstanding += 1;
        self.stats.peak_outstanding = self.stats.peak_outstanding.max(self.stats.outstanding);
        buffer
    }

    /// Return a buffer for reuse
    pub fn release(&mut self, buffer: Vec<u8>) {
        self.stats.release_count += 1;
        self.stats.outstanding = self.stats.outstanding.saturating_sub(1);
        if self.free.len() < self.max_free {
            self.free.push(buffer);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            free_buffers: self.free.len(),
            ..self.stats.clone()
        }
    }
}
