//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the store's lock file.
    #[error("storage locked: another process has exclusive access to {path:?}")]
    Locked {
        /// The lock file path.
        path: PathBuf,
    },

    /// A commit was rejected before anything was written.
    #[error("commit rejected: {0}")]
    CommitRejected(String),
}
