//! Error types for the model crate.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while building or decoding model types.
#[derive(Error, Debug)]
pub enum ModelError {
    /// JSON could not be parsed or produced.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A value had the wrong JSON shape.
    #[error("invalid shape: {message}")]
    InvalidShape {
        /// Description of the problem.
        message: String,
    },

    /// A timestamp was not valid ISO-8601.
    #[error("invalid timestamp {value:?}: {message}")]
    InvalidTimestamp {
        /// The offending input.
        value: String,
        /// Parser message.
        message: String,
    },
}

impl ModelError {
    /// Create an invalid shape error.
    pub fn invalid_shape(message: impl Into<String>) -> Self {
        Self::InvalidShape {
            message: message.into(),
        }
    }
}
