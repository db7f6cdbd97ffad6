//! Error types for the local store.

use thiserror::Error;

/// Result type for local store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the local store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] rollsync_storage::StorageError),

    /// Data model error.
    #[error("model error: {0}")]
    Model(#[from] rollsync_model::ModelError),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The persisted state could not be understood.
    #[error("invalid store format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// The document was written by a newer build.
    #[error("schema version {found} is newer than supported version {supported}")]
    SchemaTooNew {
        /// Version found in the document.
        found: u32,
        /// Highest version this build understands.
        supported: u32,
    },

    /// A record was written without a natural key.
    #[error("record in collection {collection} has no value for key field {field}")]
    MissingKey {
        /// Collection name.
        collection: String,
        /// Natural key field.
        field: String,
    },

    /// Migration failed.
    #[error("migration failed: {message}")]
    MigrationFailed {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates a migration failed error.
    pub fn migration_failed(message: impl Into<String>) -> Self {
        Self::MigrationFailed {
            message: message.into(),
        }
    }

    /// Creates a missing key error.
    pub fn missing_key(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingKey {
            collection: collection.into(),
            field: field.into(),
        }
    }
}
