//! File-based watermark state for resuming incremental validation.
//!
//! The state file records how far the base → target scan got, as the
//! `(utime, id)` of the last base row fully checked. A restarted run resumes
//! from there as long as the configuration hash still matches; rows between
//! the saved watermark and the crash are simply validated again.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::core::Watermark;
use crate::error::{MigrateError, Result};
use crate::validator::ValidateStats;

type HmacSha256 = Hmac<Sha256>;

/// Progress of one validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationState {
    /// Unique run identifier.
    pub run_id: String,

    /// Hash of the settings identifying the run.
    pub config_hash: String,

    /// Validated table.
    pub table: String,

    pub started_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub status: RunStatus,

    /// Last base row fully checked by the incremental scan.
    pub watermark: Watermark,

    /// Counters of the last finished pass.
    #[serde(default)]
    pub stats: ValidateStats,

    /// Error message if the run failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// HMAC-SHA256 over the rest of the state, keyed by `config_hash`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ValidationState {
    /// Create state for a fresh run starting at `watermark`.
    pub fn new(config_hash: String, table: &str, watermark: Watermark) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            config_hash,
            table: table.to_string(),
            started_at: now,
            updated_at: now,
            status: RunStatus::Running,
            watermark,
            stats: ValidateStats::default(),
            error: None,
            hmac: None,
        }
    }

    /// Load the state at `path` if it exists and belongs to `config_hash`,
    /// otherwise start fresh at `watermark`.
    ///
    /// A state file written under a different configuration is an error, not
    /// silently discarded.
    pub fn resume_or_new(
        path: &Path,
        config_hash: &str,
        table: &str,
        watermark: Watermark,
    ) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new(config_hash.to_string(), table, watermark));
        }
        let mut state = Self::load(path)?;
        state.validate_config(config_hash)?;
        state.status = RunStatus::Running;
        state.error = None;
        debug!(run_id = %state.run_id, watermark = ?state.watermark, "Resuming validation state");
        Ok(state)
    }

    fn compute_hmac(&self) -> Result<String> {
        let mut unsigned = self.clone();
        unsigned.hmac = None;
        let content = serde_json::to_string(&unsigned)?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("failed to create HMAC: {e}")))?;
        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load state from a file, checking its HMAC.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)
            .map_err(|e| MigrateError::State(format!("unreadable state file: {e}")))?;

        match &state.hmac {
            Some(stored) if *stored == state.compute_hmac()? => Ok(state),
            Some(_) => Err(MigrateError::State(
                "integrity check failed: HMAC mismatch".to_string(),
            )),
            None => Err(MigrateError::State("state file is not signed".to_string())),
        }
    }

    /// Save state to a file (atomic write with HMAC).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        self.hmac = None;
        self.hmac = Some(self.compute_hmac()?);
        let content = serde_json::to_string_pretty(self)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Validate that the config hash matches for resume.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }

    /// Persist every watermark published on `progress`, at most once per
    /// `every`, until the validator drops its sender.
    pub async fn follow(
        mut self,
        path: PathBuf,
        mut progress: watch::Receiver<Watermark>,
        every: Duration,
    ) -> Self {
        while progress.changed().await.is_ok() {
            self.watermark = *progress.borrow_and_update();
            self.updated_at = Utc::now();
            if let Err(e) = self.save(&path) {
                warn!(path = %path.display(), error = %e, "Failed to save validation state");
            }
            tokio::time::sleep(every).await;
        }
        self.watermark = *progress.borrow();
        self
    }

    pub fn mark_completed(&mut self, stats: ValidateStats) {
        self.finish(RunStatus::Completed, stats);
    }

    pub fn mark_cancelled(&mut self, stats: ValidateStats) {
        self.finish(RunStatus::Cancelled, stats);
    }

    pub fn mark_failed(&mut self, error: &str) {
        self.status = RunStatus::Failed;
        self.error = Some(error.to_string());
        self.updated_at = Utc::now();
    }

    fn finish(&mut self, status: RunStatus, stats: ValidateStats) {
        self.status = status;
        self.stats = stats;
        self.updated_at = Utc::now();
    }
}
