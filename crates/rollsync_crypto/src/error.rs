//! Error types for the crypto codec.

use thiserror::Error;

/// Result type for codec operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur while sealing or opening an envelope.
///
/// Every variant is fatal: a backup that fails to open is either corrupted
/// or sealed with a different key, and retrying cannot change that.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The authentication tag did not verify.
    #[error("authentication tag mismatch: wrong key or tampered backup")]
    MacMismatch,

    /// The ciphertext could not be decrypted for a structural reason.
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// Authenticated plaintext failed to decompress.
    #[error("decompression failed: {0}")]
    Decompress(String),

    /// Compression failed while sealing.
    #[error("compression failed: {0}")]
    Compress(String),

    /// Encryption failed while sealing.
    #[error("encryption failed: {0}")]
    Encrypt(String),

    /// The envelope document is not well formed.
    #[error("malformed envelope: {0}")]
    Malformed(String),

    /// The envelope names an algorithm this build does not implement.
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The envelope format version is not understood.
    #[error("unsupported envelope format version: {0}")]
    UnsupportedVersion(String),

    /// The configured KDF iteration count is below the minimum.
    #[error("kdf iteration count {iterations} is below the minimum of {minimum}")]
    WeakKdf {
        /// Configured iterations.
        iterations: u32,
        /// Required minimum.
        minimum: u32,
    },
}

impl CryptoError {
    /// Create a malformed envelope error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}
