//! Error types for the migration library.

use std::time::Duration;

use thiserror::Error;

/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Exit code for store (database) errors.
pub const EXIT_STORE_ERROR: u8 = 2;
/// Exit code for validation scans that aborted.
pub const EXIT_VALIDATION_ERROR: u8 = 3;
/// Exit code for event transport errors.
pub const EXIT_TRANSPORT_ERROR: u8 = 4;
/// Exit code when the run was cancelled.
pub const EXIT_CANCELLED: u8 = 5;
/// Exit code for state file errors.
pub const EXIT_STATE_ERROR: u8 = 6;
/// Exit code for I/O errors.
pub const EXIT_IO_ERROR: u8 = 7;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A pattern literal outside `src_only|src_first|dst_first|dst_only`.
    #[error("Unknown pattern: {0:?}")]
    UnknownPattern(String),

    /// Store error, passed through untouched so callers can match on the
    /// driver's error kind (e.g. `sqlx::Error::RowNotFound`).
    #[error(transparent)]
    Store(#[from] sqlx::Error),

    /// Operation the store or pool refuses to perform.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// A single store or publish call exceeded its timeout.
    #[error("{op} timed out after {after:?}")]
    Timeout { op: String, after: Duration },

    /// A row could not be mapped onto an entity.
    #[error("Decode error for column {column}: {message}")]
    Decode { column: String, message: String },

    /// A validation scan gave up after too many consecutive read errors.
    #[error("Validation scan aborted: {0}")]
    ScanAborted(String),

    /// Publishing an inconsistency event failed.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Event transport error (closed channel, undecodable payload).
    #[error("Transport error: {0}")]
    Transport(String),

    /// State file error
    #[error("State file error: {0}")]
    State(String),

    /// Config hash mismatch on resume
    #[error("Config has changed since the watermark was saved - cannot resume. Remove the state file to start fresh.")]
    ConfigChanged,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Background task panicked or was aborted.
    #[error("Background task failed: {0}")]
    Task(String),

    /// Run was cancelled (SIGINT, etc.)
    #[error("Cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Timeout error for the named operation.
    pub fn timeout(op: impl Into<String>, after: Duration) -> Self {
        MigrateError::Timeout {
            op: op.into(),
            after,
        }
    }

    /// Create a Decode error.
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::UnknownPattern(_)
            | MigrateError::Yaml(_)
            | MigrateError::Unsupported(_) => EXIT_CONFIG_ERROR,
            MigrateError::Store(_) | MigrateError::Timeout { .. } | MigrateError::Decode { .. } => {
                EXIT_STORE_ERROR
            }
            MigrateError::ScanAborted(_) | MigrateError::Task(_) => EXIT_VALIDATION_ERROR,
            MigrateError::Publish(_) | MigrateError::Transport(_) | MigrateError::Json(_) => {
                EXIT_TRANSPORT_ERROR
            }
            MigrateError::Cancelled => EXIT_CANCELLED,
            MigrateError::State(_) | MigrateError::ConfigChanged => EXIT_STATE_ERROR,
            MigrateError::Io(_) => EXIT_IO_ERROR,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

/// Run `fut`, failing with [`MigrateError::Timeout`] if it takes longer than `after`.
pub async fn with_timeout<T, F>(op: &str, after: Duration, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(res) => res,
        Err(_) => Err(MigrateError::timeout(op, after)),
    }
}
