//! Validator configuration and statistics.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Cursor, Watermark};
use crate::error::MigrateError;
use crate::events::{Direction, InconsistencyType};

/// Which rows the base → target scan visits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Every row, in id order, until the end of the table.
    #[default]
    Full,
    /// Rows modified after the watermark, in `(utime, id)` order.
    Incremental,
}

/// How the base → target scan reads base rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One base row and one target lookup at a time.
    #[default]
    Row,
    /// A page of base rows and one set lookup against target.
    Batch,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Full => "full",
            Mode::Incremental => "incremental",
        })
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Row => "row",
            Strategy::Batch => "batch",
        })
    }
}

impl FromStr for Mode {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(Mode::Full),
            "incremental" => Ok(Mode::Incremental),
            other => Err(MigrateError::Config(format!(
                "unknown mode {other:?}, expected full or incremental"
            ))),
        }
    }
}

impl FromStr for Strategy {
    type Err = MigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "row" => Ok(Strategy::Row),
            "batch" => Ok(Strategy::Batch),
            other => Err(MigrateError::Config(format!(
                "unknown strategy {other:?}, expected row or batch"
            ))),
        }
    }
}

/// Runtime settings for a [`Validator`](super::Validator).
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Stamped on every event; names the side treated as base.
    pub direction: Direction,

    pub mode: Mode,

    pub strategy: Strategy,

    /// Rows per page for batch reads and the target id scan.
    pub batch_size: usize,

    /// Idle sleep when an incremental scan runs dry. Zero ends the scan.
    pub sleep_interval: Duration,

    /// Bound on every store and publish call.
    pub call_timeout: Duration,

    /// Where an incremental scan starts.
    pub start: Watermark,

    /// Consecutive failed reads of the scanned store before a bounded scan
    /// aborts. Continuous scans back off instead.
    pub max_consecutive_errors: u32,
}

impl ValidatorConfig {
    /// Full row-by-row validation with default settings.
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            mode: Mode::Full,
            strategy: Strategy::Row,
            batch_size: 100,
            sleep_interval: Duration::ZERO,
            call_timeout: Duration::from_secs(1),
            start: Watermark::default(),
            max_consecutive_errors: 100,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_sleep_interval(mut self, interval: Duration) -> Self {
        self.sleep_interval = interval;
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Start an incremental scan after `start`.
    pub fn with_start(mut self, start: Watermark) -> Self {
        self.start = start;
        self
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max.max(1);
        self
    }

    /// Incremental with a non-zero sleep: runs until cancelled.
    pub fn is_continuous(&self) -> bool {
        self.mode == Mode::Incremental && !self.sleep_interval.is_zero()
    }

    /// First cursor of the base → target scan.
    pub(crate) fn start_cursor(&self) -> Cursor {
        match self.mode {
            Mode::Full => Cursor::start(),
            Mode::Incremental => Cursor::Modified(self.start),
        }
    }
}

/// Counters for one `validate` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateStats {
    /// Base rows compared against target.
    pub rows_checked: u64,
    /// Target ids checked for existence in base.
    pub ids_checked: u64,
    pub target_missing: u64,
    pub base_missing: u64,
    pub not_equal: u64,
    /// Reads that failed and were skipped.
    pub read_errors: u64,
    /// Events that could not be published.
    pub publish_failures: u64,
}

impl ValidateStats {
    pub(crate) fn record(&mut self, kind: InconsistencyType) {
        match kind {
            InconsistencyType::TargetMissing => self.target_missing += 1,
            InconsistencyType::BaseMissing => self.base_missing += 1,
            InconsistencyType::NotEqual => self.not_equal += 1,
        }
    }

    /// Total inconsistencies detected.
    pub fn inconsistencies(&self) -> u64 {
        self.target_missing + self.base_missing + self.not_equal
    }

    pub fn merge(&mut self, other: &ValidateStats) {
        self.rows_checked += other.rows_checked;
        self.ids_checked += other.ids_checked;
        self.target_missing += other.target_missing;
        self.base_missing += other.base_missing;
        self.not_equal += other.not_equal;
        self.read_errors += other.read_errors;
        self.publish_failures += other.publish_failures;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_and_strategy_parse() {
        assert_eq!("Incremental".parse::<Mode>().unwrap(), Mode::Incremental);
        assert_eq!("batch".parse::<Strategy>().unwrap(), Strategy::Batch);
        assert!("binlog".parse::<Mode>().is_err());
        assert_eq!(Strategy::Row.to_string(), "row");
    }

    #[test]
    fn test_start_cursor_follows_mode() {
        let full = ValidatorConfig::new(Direction::Src);
        assert_eq!(full.start_cursor(), Cursor::Id(i64::MIN));

        let incr = full
            .with_mode(Mode::Incremental)
            .with_start(Watermark::after_utime(42));
        assert_eq!(
            incr.start_cursor(),
            Cursor::Modified(Watermark { utime: 42, id: i64::MAX })
        );
    }

    #[test]
    fn test_only_sleeping_incremental_runs_are_continuous() {
        let full = ValidatorConfig::new(Direction::Src).with_sleep_interval(Duration::from_secs(1));
        assert!(!full.is_continuous());
        let one_shot = ValidatorConfig::new(Direction::Src).with_mode(Mode::Incremental);
        assert!(!one_shot.is_continuous());
        assert!(one_shot.with_sleep_interval(Duration::from_secs(1)).is_continuous());
    }

    #[test]
    fn test_stats_merge() {
        let mut a = ValidateStats::default();
        a.record(InconsistencyType::TargetMissing);
        let mut b = ValidateStats::default();
        b.record(InconsistencyType::BaseMissing);
        b.record(InconsistencyType::NotEqual);
        a.merge(&b);
        assert_eq!(a.inconsistencies(), 3);
        assert_eq!((a.target_missing, a.base_missing, a.not_equal), (1, 1, 1));
    }

    #[test]
    fn test_builder_clamps_zero() {
        let cfg = ValidatorConfig::new(Direction::Dst)
            .with_batch_size(0)
            .with_max_consecutive_errors(0);
        assert_eq!(cfg.batch_size, 1);
        assert_eq!(cfg.max_consecutive_errors, 1);
    }
}
