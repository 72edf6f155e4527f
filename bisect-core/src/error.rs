//! Bisection error types
//!
//! Structured errors for every stage of a run: configuration, revision
//! list resolution, external commands, git and builds.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for bisection operations
pub type BisectResult<T> = Result<T, BisectError>;

/// Errors that can occur while preparing or running a bisection
#[derive(Error, Debug)]
pub enum BisectError {
    /// Named boundary revision is not in the revision list
    #[error("Revision not found in revision list: {revision}")]
    RevisionNotFound { revision: String },

    /// Start boundary is older than the end boundary
    #[error("Inverted revision range: start {start} is older than end {end}")]
    InvertedRange { start: String, end: String },

    /// Revision list file could not be read
    #[error("Revision list not readable at {path}: {message}")]
    RevisionListUnreadable { path: PathBuf, message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// External command could not be started
    #[error("Failed to launch '{program}': {message}")]
    SpawnFailed { program: String, message: String },

    /// Git operation failed
    #[error("Git operation failed: {operation} - {message}")]
    GitError { operation: String, message: String },

    /// Building a revision failed
    #[error("Build of {revision} failed at step '{step}': {message}")]
    BuildFailed {
        revision: String,
        step: String,
        message: String,
    },

    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl BisectError {
    /// Create a revision not found error
    pub fn revision_not_found(revision: impl Into<String>) -> Self {
        Self::RevisionNotFound {
            revision: revision.into(),
        }
    }

    /// Create an inverted range error
    pub fn inverted_range(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self::InvertedRange {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a spawn failure error
    pub fn spawn(program: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SpawnFailed {
            program: program.into(),
            message: message.into(),
        }
    }

    /// Create a git error
    pub fn git(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::GitError {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a build failure error
    pub fn build(
        revision: impl Into<String>,
        step: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::BuildFailed {
            revision: revision.into(),
            step: step.into(),
            message: message.into(),
        }
    }

    /// Check if this error is retryable (transient failure)
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::GitError { message, .. } => {
                let lower = message.to_lowercase();
                // Lock file conflicts
                lower.contains("lock") ||
                // Timeout or network issues
                lower.contains("timeout") ||
                lower.contains("timed out") ||
                lower.contains("connection") ||
                lower.contains("temporarily unavailable")
            }
            Self::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Whether this error means the run was misconfigured and no search can start
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::RevisionNotFound { .. }
                | Self::InvertedRange { .. }
                | Self::RevisionListUnreadable { .. }
                | Self::ConfigError { .. }
                | Self::Toml(_)
        )
    }
}
