//! Error types for the preparator module.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while preparing an item.
#[derive(Debug, Error)]
pub enum PreparatorError {
    /// Temporary failure; the step may succeed if retried.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Failure that retrying will not fix.
    #[error("fatal failure: {0}")]
    Fatal(String),

    /// The product data to fetch does not exist.
    #[error("source not found: {path}")]
    SourceNotFound { path: PathBuf },

    /// Failed to copy or move a file.
    #[error("failed to transfer {source_path} to {destination}")]
    TransferFailed {
        source_path: PathBuf,
        destination: PathBuf,
        #[source]
        error: std::io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The item was cancelled while the step was running.
    #[error("preparation cancelled")]
    Cancelled,
}

impl PreparatorError {
    pub fn transfer_failed(
        source_path: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        error: std::io::Error,
    ) -> Self {
        Self::TransferFailed {
            source_path: source_path.into(),
            destination: destination.into(),
            error,
        }
    }

    /// Whether re-running the step may succeed.
    ///
    /// I/O errors count as transient, except for missing files and
    /// permission problems which need an operator.
    pub fn is_retryable(&self) -> bool {
        match self {
            PreparatorError::Transient(_) => true,
            PreparatorError::Io(e) | PreparatorError::TransferFailed { error: e, .. } => !matches!(
                e.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
            PreparatorError::Fatal(_)
            | PreparatorError::SourceNotFound { .. }
            | PreparatorError::Cancelled => false,
        }
    }
}
