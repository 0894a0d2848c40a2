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

//! Sampling orchestration
//!
//! One ordered scan of an index with `K` key columns feeds `K` multi-column
//! accumulators (prefix lengths `1..=K`) and `K-1` single-column accumulators
//! (trailing positions `1..K`). Column 0 alone is covered by the length-1
//! prefix, so it never gets a single-column accumulator.

pub mod accumulator;
pub mod pool;

use tracing::debug;

use super::error::{StatisticsError, StatisticsResult};
use super::model::HistogramSlot;
use crate::encoding::segment_ends;

pub use accumulator::{Bucket, BucketAccumulator, OrderedAccumulator, SortingAccumulator};
pub use pool::{KeyBufferPool, PoolStats};

/// Idle key buffers kept per orchestrator
const POOL_FREE_LIMIT: usize = 4096;

/// Borrowed view of one index key split into column segments
#[derive(Debug, Clone, Copy)]
pub struct KeyView<'a> {
    bytes: &'a [u8],
    /// End offset of each column segment
    ends: &'a [usize],
}

impl<'a> KeyView<'a> {
    pub fn new(bytes: &'a [u8], ends: &'a [usize]) -> Self {
        Self { bytes, ends }
    }

    pub fn column_count(&self) -> usize {
        self.ends.len()
    }

    /// Encoded first `columns` segments
    pub fn prefix(&self, columns: usize) -> &'a [u8] {
        &self.bytes[..self.ends[columns - 1]]
    }

    /// Encoded segment at `position`
    pub fn segment(&self, position: usize) -> &'a [u8] {
        let start = if position == 0 { 0 } else { self.ends[position - 1] };
        &self.bytes[start..self.ends[position]]
    }
}

/// Sub-sampling decision, fixed before the scan starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPlan {
    /// Sample every `stride`-th row
    pub stride: u64,
    /// Rows expected to be sampled
    pub expected_count: u64,
}

impl SamplingPlan {
    /// Single-column accumulators retain one key copy per sampled row, so
    /// `estimated_rows * (K-1)` copies must stay within `sample_key_limit`.
    pub fn new(estimated_rows: u64, key_columns: usize, sample_key_limit: usize) -> Self {
        let single_columns = key_columns.saturating_sub(1) as u64;
        let demand = estimated_rows.saturating_mul(single_columns);
        let limit = sample_key_limit.max(1) as u64;

        let stride = if demand > limit { demand.div_ceil(limit) } else { 1 };
        Self {
            stride,
            expected_count: estimated_rows / stride,
        }
    }
}

/// Histogram buckets produced by one scan
#[derive(Debug)]
pub struct SampleResult {
    pub histograms: Vec<(HistogramSlot, Vec<Bucket>)>,
    pub rows_seen: u64,
    pub rows_sampled: u64,
    pub pool_stats: PoolStats,
}

pub struct SamplingOrchestrator {
    key_columns: usize,
    plan: SamplingPlan,
    accumulators: Vec<(HistogramSlot, Box<dyn BucketAccumulator>)>,
    pool: KeyBufferPool,
    ends: Vec<usize>,
    rows_seen: u64,
    rows_sampled: u64,
}

impl SamplingOrchestrator {
    pub fn new(key_columns: usize, bucket_count: usize, plan: SamplingPlan) -> Self {
        let mut accumulators: Vec<(HistogramSlot, Box<dyn BucketAccumulator>)> = Vec::with_capacity(key_columns * 2);
        for length in 1..=key_columns {
            accumulators.push((HistogramSlot::MultiColumn { length }, Box::new(OrderedAccumulator::new(length))));
        }
        for position in 1..key_columns {
            accumulators.push((HistogramSlot::SingleColumn { position }, Box::new(SortingAccumulator::new(position))));
        }
        for (_, accumulator) in accumulators.iter_mut() {
            accumulator.init(bucket_count, plan.expected_count);
        }

        debug!("Sampling plan: {} key columns, stride {}, expecting {} samples", key_columns, plan.stride, plan.expected_count);

        Self {
            key_columns,
            plan,
            accumulators,
            pool: KeyBufferPool::new(POOL_FREE_LIMIT),
            ends: Vec::with_capacity(key_columns + 1),
            rows_seen: 0,
            rows_sampled: 0,
        }
    }

    pub fn plan(&self) -> SamplingPlan {
        self.plan
    }

    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    /// Visit one index key in scan order. `key` holds the encoded key columns,
    /// optionally followed by further segments (such as a row id) that are ignored.
    pub fn visit(&mut self, key: &[u8]) -> StatisticsResult<()> {
        let row = self.rows_seen;
        self.rows_seen += 1;
        if row % self.plan.stride != 0 {
            return Ok(());
        }

        segment_ends(key, &mut self.ends)?;
        if self.ends.len() < self.key_columns {
            return Err(StatisticsError::Codec(format!("index key has {} columns, expected {}", self.ends.len(), self.key_columns)));
        }

        let view = KeyView::new(key, &self.ends[..self.key_columns]);
        for (_, accumulator) in self.accumulators.iter_mut() {
            accumulator.visit(&view, &mut self.pool);
        }
        self.rows_sampled += 1;
        Ok(())
    }

    pub fn finish(mut self) -> SampleResult {
        let mut histograms = Vec::with_capacity(self.accumulators.len());
        for (slot, accumulator) in self.accumulators.iter_mut() {
            let buckets = accumulator.finish(&mut self.pool);
            if !buckets.is_empty() {
                histograms.push((*slot, buckets));
            }
        }

        SampleResult {
            histograms,
            rows_seen: self.rows_seen,
            rows_sampled: self.rows_sampled,
            pool_stats: self.pool.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::encode_key;
    use dotdb_common::KeyValue;

    #[test]
    fn test_plan_without_subsampling() {
        let plan = SamplingPlan::new(1000, 3, 1_000_000);
        assert_eq!(plan, SamplingPlan { stride: 1, expected_count: 1000 });
        // Single-column indexes retain nothing per row
        assert_eq!(SamplingPlan::new(u64::MAX, 1, 10).stride, 1);
    }

    #[test]
    fn test_plan_with_subsampling() {
        let plan = SamplingPlan::new(10_000, 3, 4_000);
        assert_eq!(plan.stride, 5);
        assert_eq!(plan.expected_count, 2_000);
    }

    #[test]
    fn test_orchestrator_builds_disjoint_slots() {
        let mut orchestrator = SamplingOrchestrator::new(3, 8, SamplingPlan::new(50, 3, 1_000_000));
        for i in 0..50i64 {
            let key = encode_key(&[KeyValue::Int(i % 5), KeyValue::Text(format!("n{}", i % 3)), KeyValue::Int(i), KeyValue::Int(1000 + i)]);
            orchestrator.visit(&key).unwrap();
        }
        let result = orchestrator.finish();

        let slots: Vec<HistogramSlot> = result.histograms.iter().map(|(slot, _)| *slot).collect();
        assert_eq!(
            slots,
            vec![
                HistogramSlot::MultiColumn { length: 1 },
                HistogramSlot::MultiColumn { length: 2 },
                HistogramSlot::MultiColumn { length: 3 },
                HistogramSlot::SingleColumn { position: 1 },
                HistogramSlot::SingleColumn { position: 2 },
            ]
        );
        assert_eq!(result.rows_seen, 50);
        assert_eq!(result.rows_sampled, 50);

        let (_, single) = &result.histograms[3];
        assert_eq!(single.len(), 3);
        assert_eq!(single[0].key, encode_key(&[KeyValue::Text("n0".into())]));
    }

    #[test]
    fn test_orchestrator_applies_stride() {
        let plan = SamplingPlan::new(100, 2, 25);
        assert_eq!(plan.stride, 4);

        let mut orchestrator = SamplingOrchestrator::new(2, 4, plan);
        for i in 0..100i64 {
            orchestrator.visit(&encode_key(&[KeyValue::Int(i), KeyValue::Int(-i)])).unwrap();
        }
        let result = orchestrator.finish();
        assert_eq!(result.rows_seen, 100);
        assert_eq!(result.rows_sampled, 25);
        let total: u64 = result.histograms[0].1.iter().map(|b| b.equal_count + b.less_count).sum();
        assert_eq!(total, 25);
    }

    #[test]
    fn test_short_key_is_rejected() {
        let mut orchestrator = SamplingOrchestrator::new(2, 4, SamplingPlan::new(1, 2, 100));
        let key = encode_key(&[KeyValue::Int(1)]);
        assert!(matches!(orchestrator.visit(&key), Err(StatisticsError::Codec(_))));
    }
}
