//! # rollsync Crypto
//!
//! Compress-then-encrypt codec for backup payloads.
//!
//! ## Security Model
//!
//! - zlib compression at maximum level before encryption
//! - PBKDF2-HMAC-SHA256 key derivation over `application secret || user id`
//!   with a fresh 16-byte salt per seal; derived keys are never cached
//! - AES-256-GCM with a fresh 96-bit nonce and a 128-bit tag
//! - Authentication is checked before decompression
//! - Key material is zeroized on drop
//!
//! ## Wire format
//!
//! ```text
//! { "algorithmId": "AES-256-GCM-PBKDF2", "formatVersion": "2.0", "compressed": true,
//!   "encoded": base64(salt(16) || iv(12) || ciphertext || tag(16)),
//!   "timestamp": "2024-06-01T10:15:30.250Z" }
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use rollsync_crypto::{CodecConfig, CryptoCodec, UserSecret};
//!
//! let codec = CryptoCodec::new(CodecConfig::default())?;
//! let secret = UserSecret::new(b"app-secret".to_vec(), "owner-42");
//! let envelope = codec.seal(b"{\"students\":[]}", &secret)?;
//! let plaintext = codec.open(&envelope, &secret)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod compress;
mod encoding;
mod envelope;
mod error;
mod key;

pub use codec::{CodecConfig, CryptoCodec, DEFAULT_COMPRESSION_LEVEL, DEFAULT_KDF_ITERATIONS, MIN_KDF_ITERATIONS};
pub use compress::{compress, decompress};
pub use encoding::{decode_base64, encode_base64};
pub use envelope::{
    payload_field, Envelope, PlaintextEnvelope, SealedEnvelope, ALGORITHM_ID, FORMAT_VERSION,
    IV_SIZE, SALT_SIZE, TAG_SIZE,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{DerivedKey, UserSecret, KEY_SIZE};
