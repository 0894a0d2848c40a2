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

// Index statistics
// Cached, persisted and background-maintained histograms per index

pub mod background;
pub mod cache;
pub mod codec;
pub mod error;
pub mod model;
pub mod sampling;
pub mod service;
pub mod snapshot;
pub mod store;

// Public exports
pub use background::{BackgroundMaintainer, Recompute, WORKER_THREAD_NAME};
pub use cache::StatisticsCache;
pub use codec::{EntryRow, HeaderRow, StatisticsRows};
pub use error::{StatisticsError, StatisticsResult};
pub use model::{Histogram, HistogramEntry, HistogramSlot, IndexStatistics, Validity};
pub use sampling::{Bucket, BucketAccumulator, KeyBufferPool, KeyView, PoolStats, SampleResult, SamplingOrchestrator, SamplingPlan};
pub use service::{IndexStatisticsService, MissingStats, TableListener};
pub use snapshot::{EntrySnapshot, HistogramSnapshot, IndexSnapshot};
pub use store::{RowStoreIndexStatistics, ScanOptions, StoreIndexStatistics};
