//! Configuration type definitions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Dialect, Watermark};
use crate::events::{Direction, RetryPolicy};
use crate::pool::Pattern;
use crate::validator::{Mode, Strategy, ValidatorConfig};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base (source) store.
    pub base: StoreConfig,

    /// Target (destination) store.
    pub target: StoreConfig,

    /// Dual-write pool settings.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Validator settings.
    #[serde(default)]
    pub validator: ValidatorSection,

    /// Repair consumer settings.
    #[serde(default)]
    pub repair: RepairConfig,
}

/// Connection settings for one store.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Engine: `mysql` or `sqlite`.
    #[serde(rename = "type")]
    pub kind: Dialect,

    /// SQLx connection URL.
    pub url: String,

    /// Pool size (default: 10).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Seconds to wait for a pooled connection (default: 30).
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl StoreConfig {
    /// SQLite store with default pool settings.
    pub fn sqlite(url: impl Into<String>) -> Self {
        Self {
            kind: Dialect::Sqlite,
            url: url.into(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }

    /// The URL with any password replaced by `[REDACTED]`.
    pub fn redacted_url(&self) -> String {
        let Some((scheme, rest)) = self.url.split_once("://") else {
            return self.url.clone();
        };
        let Some((userinfo, host)) = rest.split_once('@') else {
            return self.url.clone();
        };
        match userinfo.split_once(':') {
            Some((user, _)) => format!("{scheme}://{user}:[REDACTED]@{host}"),
            None => self.url.clone(),
        }
    }
}

// Custom Debug implementation to redact the password embedded in the URL
impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("kind", &self.kind)
            .field("url", &self.redacted_url())
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_secs", &self.acquire_timeout_secs)
            .finish()
    }
}

/// Dual-write pool settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Phase the pool starts in (default: `src_only`).
    #[serde(default)]
    pub pattern: Pattern,
}

/// Validator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorSection {
    /// `full` or `incremental` (default: full).
    #[serde(default)]
    pub mode: Mode,

    /// `row` or `batch` (default: row).
    #[serde(default)]
    pub strategy: Strategy,

    /// Authoritative side: `SRC` validates base against target, `DST`
    /// validates target against base (default: SRC).
    #[serde(default = "default_direction")]
    pub direction: Direction,

    /// Rows per page (default: 100).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Incremental idle sleep in milliseconds; 0 ends the scan on an empty
    /// page (default: 0).
    #[serde(default)]
    pub sleep_interval_ms: u64,

    /// Timeout for each store or publish call in milliseconds (default: 1000).
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Initial incremental watermark (default: 0).
    #[serde(default)]
    pub utime: i64,

    /// Consecutive failed page reads before a scan gives up (default: 100).
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

impl Default for ValidatorSection {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            strategy: Strategy::default(),
            direction: default_direction(),
            batch_size: default_batch_size(),
            sleep_interval_ms: 0,
            call_timeout_ms: default_call_timeout_ms(),
            utime: 0,
            max_consecutive_errors: default_max_consecutive_errors(),
        }
    }
}

impl ValidatorSection {
    /// Build the runtime validator configuration.
    pub fn to_validator_config(&self) -> ValidatorConfig {
        ValidatorConfig::new(self.direction)
            .with_mode(self.mode)
            .with_strategy(self.strategy)
            .with_batch_size(self.batch_size)
            .with_sleep_interval(Duration::from_millis(self.sleep_interval_ms))
            .with_call_timeout(Duration::from_millis(self.call_timeout_ms))
            .with_start(Watermark::after_utime(self.utime))
            .with_max_consecutive_errors(self.max_consecutive_errors)
    }
}

/// Repair consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepairConfig {
    /// In-process channel capacity (default: 1024).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// Delivery attempts per event (default: 3).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// First redelivery delay in milliseconds (default: 100).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Timeout for one fix in milliseconds (default: 1000).
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            max_attempts: default_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl RepairConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_direction() -> Direction {
    Direction::Src
}

fn default_batch_size() -> usize {
    100
}

fn default_call_timeout_ms() -> u64 {
    1000
}

fn default_max_consecutive_errors() -> u32 {
    100
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    100
}
