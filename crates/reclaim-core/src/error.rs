//! Error types for the reclaim core library.
//!
//! Nothing in this crate is fatal to the host process. Most of these errors
//! are recovered locally (probe reads, reclaim hints, individual cleanup
//! tasks) and only surface through logs or `CleanupTaskResult::error`.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the reclaim library.
#[derive(Debug, Error)]
pub enum ReclaimError {
    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Collaborator errors
    #[error("Device probe failed: {message}")]
    Probe { message: String },

    // Cleanup errors
    #[error("Cleanup task {task} failed: {message}")]
    TaskFailed { task: String, message: String },

    #[error("Cleanup task {task} panicked")]
    TaskPanicked { task: String },

    // Configuration errors
    #[error("Validation error for {field}: {message}")]
    Validation { field: String, message: String },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for reclaim operations.
pub type Result<T> = std::result::Result<T, ReclaimError>;

impl From<std::io::Error> for ReclaimError {
    fn from(err: std::io::Error) -> Self {
        ReclaimError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ReclaimError {
    fn from(err: serde_json::Error) -> Self {
        ReclaimError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ReclaimError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ReclaimError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a task failure for the given task name.
    pub fn task_failed(task: impl Into<String>, message: impl Into<String>) -> Self {
        ReclaimError::TaskFailed {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Whether the subsystem recovers from this error on its own.
    ///
    /// Probe reads fall back to the last snapshot, hints and tasks are
    /// isolated, and filesystem errors are skipped per entry. Only
    /// configuration problems need the caller's attention.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, ReclaimError::Validation { .. })
    }
}
