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

//! Sampling throughput benchmarks
//!
//! Measures the per-row cost of feeding ordered index keys through the
//! orchestrator, with and without a sub-sampling stride.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use dotdb_common::KeyValue;
use dotdb_stats::encoding::encode_key;
use dotdb_stats::statistics::{SamplingOrchestrator, SamplingPlan};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ROWS: usize = 20_000;

/// Sorted three-column keys `(int, text, int)` with a skewed leading column
fn ordered_keys(rows: usize) -> Vec<Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(42);
    let mut keys: Vec<Vec<u8>> = (0..rows)
        .map(|i| {
            let lead: i64 = if rng.gen_bool(0.5) { 7 } else { rng.gen_range(0..1_000) };
            encode_key(&[KeyValue::Int(lead), KeyValue::Text(format!("customer-{}", rng.gen_range(0..50))), KeyValue::Int(i as i64)])
        })
        .collect();
    keys.sort();
    keys
}

fn bench_sampling(c: &mut Criterion) {
    let keys = ordered_keys(ROWS);

    let mut group = c.benchmark_group("sampling");
    group.throughput(Throughput::Elements(ROWS as u64));

    for limit in [1_000_000usize, 4_000] {
        let plan = SamplingPlan::new(ROWS as u64, 3, limit);
        group.bench_with_input(BenchmarkId::new("three_columns", format!("stride_{}", plan.stride)), &plan, |b, plan| {
            b.iter(|| {
                let mut orchestrator = SamplingOrchestrator::new(3, 32, *plan);
                for key in &keys {
                    orchestrator.visit(black_box(key)).unwrap();
                }
                black_box(orchestrator.finish())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_sampling);
criterion_main!(benches);
