//! Error types for the sync engine.

use rollsync_crypto::CryptoError;
use rollsync_model::ModelError;
use rollsync_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors raised by a remote document store or the chunked transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The remote could not be reached.
    #[error("remote unavailable: {0}")]
    Unavailable(String),

    /// A single remote call exceeded the request timeout.
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// A chunk announced by the metadata is not (yet) readable.
    ///
    /// Usually a pull racing a push from another device.
    #[error("chunk {index} of {total} missing for backup {key}")]
    MissingChunk {
        /// Backup document key.
        key: String,
        /// First missing chunk index.
        index: u32,
        /// Chunks announced by the metadata.
        total: u32,
    },

    /// A chunk beyond the announced count.
    ///
    /// Another device grew the chunk set after the metadata was read.
    #[error("chunk {index} beyond the {total} announced for backup {key}")]
    ExtraChunk {
        /// Backup document key.
        key: String,
        /// First chunk index past the announced count.
        index: u32,
        /// Chunks announced by the metadata.
        total: u32,
    },

    /// A duplicate chunk index.
    #[error("unexpected chunk {index} for backup {key} (announced {total})")]
    UnexpectedChunk {
        /// Backup document key.
        key: String,
        /// Offending chunk index.
        index: u32,
        /// Chunks announced by the metadata.
        total: u32,
    },

    /// The backup cannot be stored within the remote's document limits.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// A single document exceeds the remote's size limit.
    #[error("document of {size} bytes exceeds the {limit} byte limit")]
    DocumentTooLarge {
        /// Serialized document size.
        size: usize,
        /// Remote limit.
        limit: usize,
    },

    /// The remote refused access.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A remote document has an unexpected shape.
    #[error("malformed remote document: {0}")]
    Malformed(String),
}

impl TransportError {
    /// Creates an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Creates a malformed document error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Creates a quota error.
    pub fn quota(message: impl Into<String>) -> Self {
        Self::QuotaExceeded(message.into())
    }

    /// Returns true if the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_)
                | Self::Timeout(_)
                | Self::MissingChunk { .. }
                | Self::ExtraChunk { .. }
        )
    }
}

/// Errors that can occur during a sync cycle.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Sealing or opening the backup failed. Never retried.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Remote access failed with a non-retryable error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The local store failed. Never retried.
    #[error("local store error: {0}")]
    Store(#[from] StoreError),

    /// A snapshot could not be (de)serialized.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// Retryable remote errors persisted through every attempt.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// Error of the final attempt.
        last: TransportError,
    },

    /// A pull found no backup to restore.
    #[error("no remote backup for {key}")]
    NoBackup {
        /// Backup document key.
        key: String,
    },

    /// A background crypto task panicked or was cancelled.
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl SyncError {
    /// Returns true if a later cycle may succeed without intervention.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_retryable(),
            Self::RetriesExhausted { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(TransportError::unavailable("offline").is_retryable());
        assert!(TransportError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(TransportError::MissingChunk {
            key: "k".into(),
            index: 2,
            total: 3
        }
        .is_retryable());
        assert!(TransportError::ExtraChunk {
            key: "k".into(),
            index: 3,
            total: 3
        }
        .is_retryable());

        assert!(!TransportError::quota("too many chunks").is_retryable());
        assert!(!TransportError::UnexpectedChunk {
            key: "k".into(),
            index: 1,
            total: 3
        }
        .is_retryable());
        assert!(!TransportError::PermissionDenied("nope".into()).is_retryable());
    }

    #[test]
    fn crypto_errors_are_fatal() {
        let err = SyncError::from(CryptoError::MacMismatch);
        assert!(!err.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = TransportError::MissingChunk {
            key: "owner-1".into(),
            index: 4,
            total: 6,
        };
        assert_eq!(err.to_string(), "chunk 4 of 6 missing for backup owner-1");

        let err = SyncError::RetriesExhausted {
            attempts: 3,
            last: TransportError::unavailable("offline"),
        };
        assert!(err.to_string().contains("3 attempts"));
    }
}
