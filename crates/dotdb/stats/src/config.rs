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

// Configuration for the index statistics subsystem

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const PROPERTY_PREFIX: &str = "dotdb.index_statistics.";

pub const BUCKET_COUNT: &str = "dotdb.index_statistics.bucket_count";
pub const TIME_LIMIT: &str = "dotdb.index_statistics.time_limit";
pub const BACKGROUND: &str = "dotdb.index_statistics.background";
pub const SAMPLE_KEY_LIMIT: &str = "dotdb.index_statistics.sample_key_limit";
pub const MIN_ROW_COUNT_RATIO: &str = "dotdb.index_statistics.min_row_count_ratio";
pub const MAX_ROW_COUNT_RATIO: &str = "dotdb.index_statistics.max_row_count_ratio";
pub const BACKGROUND_GRACE_MS: &str = "dotdb.index_statistics.background_grace_ms";

/// Environment variables understood by [`StatisticsConfig::from_env`]
const ENV_VARS: &[(&str, &str)] = &[
    ("DOTDB_STATS_BUCKET_COUNT", BUCKET_COUNT),
    ("DOTDB_STATS_TIME_LIMIT", TIME_LIMIT),
    ("DOTDB_STATS_BACKGROUND", BACKGROUND),
    ("DOTDB_STATS_SAMPLE_KEY_LIMIT", SAMPLE_KEY_LIMIT),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("Unknown property: {0}")]
    UnknownProperty(String),

    #[error("Invalid time limit '{0}': expected N, N,M, unlimited or disabled")]
    InvalidTimeLimit(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Wall-clock bound on one statistics scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanTimeLimit {
    /// Scan the whole index under one snapshot
    Unlimited,
    /// No scanning at all (background only; behaves as `Unlimited` for explicit updates)
    Disabled,
    /// Scan for at most `limit` at a time, then sleep for `sleep` and continue.
    /// A zero `sleep` stops the scan once `limit` elapses and keeps the partial sample.
    Limited { limit: Duration, sleep: Duration },
}

impl ScanTimeLimit {
    pub fn is_disabled(&self) -> bool {
        matches!(self, ScanTimeLimit::Disabled)
    }

    /// Limit applied to explicit, foreground recomputation
    pub fn for_foreground(self) -> Self {
        match self {
            ScanTimeLimit::Disabled => ScanTimeLimit::Unlimited,
            other => other,
        }
    }
}

impl FromStr for ScanTimeLimit {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("unlimited") {
            return Ok(ScanTimeLimit::Unlimited);
        }
        if trimmed.eq_ignore_ascii_case("disabled") {
            return Ok(ScanTimeLimit::Disabled);
        }

        let invalid = || ConfigError::InvalidTimeLimit(s.to_string());
        let (limit, sleep) = match trimmed.split_once(',') {
            Some((limit, sleep)) => (limit.trim().parse::<i64>().map_err(|_| invalid())?, sleep.trim().parse::<u64>().map_err(|_| invalid())?),
            None => (trimmed.parse::<i64>().map_err(|_| invalid())?, 0),
        };

        // Non-positive limits scan without a time box
        if limit <= 0 {
            return Ok(ScanTimeLimit::Unlimited);
        }
        Ok(ScanTimeLimit::Limited {
            limit: Duration::from_millis(limit as u64),
            sleep: Duration::from_millis(sleep),
        })
    }
}

impl fmt::Display for ScanTimeLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanTimeLimit::Unlimited => f.write_str("unlimited"),
            ScanTimeLimit::Disabled => f.write_str("disabled"),
            ScanTimeLimit::Limited { limit, sleep } => write!(f, "{},{}", limit.as_millis(), sleep.as_millis()),
        }
    }
}

/// Statistics subsystem configuration
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsConfig {
    /// Target number of buckets per histogram
    pub bucket_count: usize,
    /// Time box for explicit recomputation
    pub time_limit: ScanTimeLimit,
    /// Time box for background recomputation; `Disabled` turns the maintainer off
    pub background_time_limit: ScanTimeLimit,
    /// Maximum number of live key copies retained while sampling one index
    pub sample_key_limit: usize,
    /// Observed/recorded row count ratio below which statistics are outdated
    pub min_row_count_ratio: f64,
    /// Observed/recorded row count ratio above which statistics are outdated
    pub max_row_count_ratio: f64,
    /// How long `stop` waits for the background worker to exit
    pub background_grace: Duration,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            bucket_count: 32,
            time_limit: ScanTimeLimit::Unlimited,
            background_time_limit: ScanTimeLimit::Limited {
                limit: Duration::from_millis(3000),
                sleep: Duration::from_millis(500),
            },
            sample_key_limit: 1_000_000,
            min_row_count_ratio: 0.2,
            max_row_count_ratio: 5.0,
            background_grace: Duration::from_millis(1000),
        }
    }
}

impl StatisticsConfig {
    /// Build a configuration from `dotdb.index_statistics.*` properties. Other keys are ignored.
    pub fn from_properties<I, K, V>(properties: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in properties {
            let (key, value) = (key.as_ref(), value.as_ref());
            if key.starts_with(PROPERTY_PREFIX) {
                config.set(key, value)?;
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Build a configuration from `DOTDB_STATS_*` environment variables
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_vars(std::env::vars())
    }

    fn from_vars<I: IntoIterator<Item = (String, String)>>(vars: I) -> ConfigResult<Self> {
        let properties = vars.into_iter().filter_map(|(name, value)| ENV_VARS.iter().find(|(env, _)| *env == name).map(|(_, key)| (*key, value)));
        Self::from_properties(properties)
    }

    /// Apply one property
    pub fn set(&mut self, key: &str, value: &str) -> ConfigResult<()> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };

        match key {
            BUCKET_COUNT => self.bucket_count = value.trim().parse().map_err(|_| invalid())?,
            TIME_LIMIT => self.time_limit = value.parse()?,
            BACKGROUND => self.background_time_limit = value.parse()?,
            SAMPLE_KEY_LIMIT => self.sample_key_limit = value.trim().parse().map_err(|_| invalid())?,
            MIN_ROW_COUNT_RATIO => self.min_row_count_ratio = value.trim().parse().map_err(|_| invalid())?,
            MAX_ROW_COUNT_RATIO => self.max_row_count_ratio = value.trim().parse().map_err(|_| invalid())?,
            BACKGROUND_GRACE_MS => self.background_grace = Duration::from_millis(value.trim().parse().map_err(|_| invalid())?),
            other => return Err(ConfigError::UnknownProperty(other.to_string())),
        }
        Ok(())
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.bucket_count == 0 {
            return Err(ConfigError::InvalidValue {
                key: BUCKET_COUNT.to_string(),
                value: "0".to_string(),
            });
        }
        if self.sample_key_limit == 0 {
            return Err(ConfigError::InvalidValue {
                key: SAMPLE_KEY_LIMIT.to_string(),
                value: "0".to_string(),
            });
        }
        if !(self.min_row_count_ratio > 0.0 && self.min_row_count_ratio < 1.0 && self.max_row_count_ratio > 1.0) {
            return Err(ConfigError::InvalidValue {
                key: MIN_ROW_COUNT_RATIO.to_string(),
                value: format!("{}..{}", self.min_row_count_ratio, self.max_row_count_ratio),
            });
        }
        Ok(())
    }
}
