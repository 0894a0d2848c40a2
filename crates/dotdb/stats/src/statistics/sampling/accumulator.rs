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

//! Bucket accumulators
//!
//! An accumulator consumes the keys of one histogram slot and produces an
//! ordered list of equal-depth buckets. Each bucket is closed by a boundary
//! key: `equal_count` rows carry the boundary itself, `less_count` rows fall
//! strictly between the previous boundary and this one, and `distinct_count`
//! counts the distinct values among them. The first and last distinct keys are
//! always boundaries.

use super::KeyView;
use super::pool::KeyBufferPool;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    /// Encoded boundary key
    pub key: Vec<u8>,
    pub equal_count: u64,
    pub less_count: u64,
    pub distinct_count: u64,
}

pub trait BucketAccumulator: Send {
    /// Prepare for `expected_count` keys, producing about `bucket_count` buckets
    fn init(&mut self, bucket_count: usize, expected_count: u64);

    fn visit(&mut self, key: &KeyView<'_>, pool: &mut KeyBufferPool);

    fn finish(&mut self, pool: &mut KeyBufferPool) -> Vec<Bucket>;
}

/// Turns an ordered stream of `(key, count)` runs into equal-depth buckets
#[derive(Debug, Default)]
struct EqualDepthBuilder {
    target: usize,
    depth: u64,
    buckets: Vec<Bucket>,
    pending_less: u64,
    pending_distinct: u64,
    /// Most recent run, held back because the final run is always a boundary
    last_run: Option<(Vec<u8>, u64)>,
}

impl EqualDepthBuilder {
    fn init(&mut self, bucket_count: usize, expected_count: u64) {
        self.target = bucket_count.max(2);
        self.depth = expected_count.div_ceil(self.target as u64).max(1);
        self.buckets.clear();
        self.pending_less = 0;
        self.pending_distinct = 0;
        self.last_run = None;
    }

    fn push_run(&mut self, key: Vec<u8>, count: u64, pool: &mut KeyBufferPool) {
        if self.buckets.is_empty() && self.last_run.is_none() {
            self.buckets.push(Bucket {
                key,
                equal_count: count,
                less_count: 0,
                distinct_count: 0,
            });
            return;
        }

        if let Some((previous, previous_count)) = self.last_run.replace((key, count)) {
            self.place(previous, previous_count, pool);
        }
    }

    fn place(&mut self, key: Vec<u8>, count: u64, pool: &mut KeyBufferPool) {
        if self.pending_less + count < self.depth {
            self.pending_less += count;
            self.pending_distinct += 1;
            pool.release(key);
            return;
        }

        self.buckets.push(Bucket {
            key,
            equal_count: count,
            less_count: self.pending_less,
            distinct_count: self.pending_distinct,
        });
        self.pending_less = 0;
        self.pending_distinct = 0;

        if self.buckets.len() >= self.target * 2 {
            self.merge_pairs(pool);
            self.depth *= 2;
        }
    }

    /// Fold every second bucket into its successor, keeping the first bucket intact
    fn merge_pairs(&mut self, pool: &mut KeyBufferPool) {
        let mut buckets = std::mem::take(&mut self.buckets).into_iter();
        let mut merged = Vec::with_capacity(self.target + 1);
        merged.extend(buckets.next());

        while let Some(lower) = buckets.next() {
            match buckets.next() {
                Some(upper) => {
                    merged.push(Bucket {
                        key: upper.key,
                        equal_count: upper.equal_count,
                        less_count: lower.less_count + lower.equal_count + upper.less_count,
                        distinct_count: lower.distinct_count + 1 + upper.distinct_count,
                    });
                    pool.release(lower.key);
                }
                None => merged.push(lower),
            }
        }
        self.buckets = merged;
    }

    fn finish(&mut self, pool: &mut KeyBufferPool) -> Vec<Bucket> {
        if let Some((key, count)) = self.last_run.take() {
            self.buckets.push(Bucket {
                key,
                equal_count: count,
                less_count: self.pending_less,
                distinct_count: self.pending_distinct,
            });
            self.pending_less = 0;
            self.pending_distinct = 0;
        }
        while self.buckets.len() > self.target {
            self.merge_pairs(pool);
        }
        std::mem::take(&mut self.buckets)
    }
}

/// Accumulator for a multi-column prefix. Keys arrive in index order, so only
/// the current run of equal prefixes is held.
#[derive(Debug)]
pub struct OrderedAccumulator {
    columns: usize,
    current: Option<(Vec<u8>, u64)>,
    builder: EqualDepthBuilder,
}

impl OrderedAccumulator {
    pub fn new(columns: usize) -> Self {
        Self {
            columns,
            current: None,
            builder: EqualDepthBuilder::default(),
        }
    }
}

impl BucketAccumulator for OrderedAccumulator {
    fn init(&mut self, bucket_count: usize, expected_count: u64) {
        self.current = None;
        self.builder.init(bucket_count, expected_count);
    }

    fn visit(&mut self, key: &KeyView<'_>, pool: &mut KeyBufferPool) {
        let prefix = key.prefix(self.columns);
        if let Some((current, count)) = &mut self.current {
            if current.as_slice() == prefix {
                *count += 1;
                return;
            }
        }

        let next = (pool.acquire(prefix), 1);
        if let Some((previous, count)) = self.current.replace(next) {
            self.builder.push_run(previous, count, pool);
        }
    }

    fn finish(&mut self, pool: &mut KeyBufferPool) -> Vec<Bucket> {
        if let Some((key, count)) = self.current.take() {
            self.builder.push_run(key, count, pool);
        }
        self.builder.finish(pool)
    }
}

/// Accumulator for one trailing column. Its values arrive unordered, so pooled
/// copies are kept until `finish` sorts them.
#[derive(Debug)]
pub struct SortingAccumulator {
    position: usize,
    keys: Vec<Vec<u8>>,
    builder: EqualDepthBuilder,
}

impl SortingAccumulator {
    pub fn new(position: usize) -> Self {
        Self {
            position,
            keys: Vec::new(),
            builder: EqualDepthBuilder::default(),
        }
    }
}

impl BucketAccumulator for SortingAccumulator {
    fn init(&mut self, bucket_count: usize, expected_count: u64) {
        self.keys.clear();
        self.builder.init(bucket_count, expected_count);
    }

    fn visit(&mut self, key: &KeyView<'_>, pool: &mut KeyBufferPool) {
        self.keys.push(pool.acquire(key.segment(self.position)));
    }

    fn finish(&mut self, pool: &mut KeyBufferPool) -> Vec<Bucket> {
        let mut keys = std::mem::take(&mut self.keys);
        keys.sort_unstable();

        let mut run: Option<(Vec<u8>, u64)> = None;
        for key in keys {
            if let Some((current, count)) = &mut run {
                if *current == key {
                    *count += 1;
                    pool.release(key);
                    continue;
                }
            }
            if let Some((previous, count)) = run.replace((key, 1)) {
                self.builder.push_run(previous, count, pool);
            }
        }
        if let Some((key, count)) = run {
            self.builder.push_run(key, count, pool);
        }
        self.builder.finish(pool)
    }
}
