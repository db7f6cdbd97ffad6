//! Envelope types and their document wire format.

use crate::encoding::{decode_base64, encode_base64};
use crate::error::{CryptoError, CryptoResult};
use chrono::{DateTime, Utc};
use rollsync_model::time::{format_iso8601, parse_iso8601};
use serde_json::{Map, Value};

/// Algorithm identifier written into every sealed envelope.
pub const ALGORITHM_ID: &str = "AES-256-GCM-PBKDF2";
/// Envelope format version written by this build.
pub const FORMAT_VERSION: &str = "2.0";
/// Size of the PBKDF2 salt in bytes.
pub const SALT_SIZE: usize = 16;
/// Size of the GCM nonce in bytes.
pub const IV_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

const F_ALGORITHM: &str = "algorithmId";
const F_VERSION: &str = "formatVersion";
const F_COMPRESSED: &str = "compressed";
const F_ENCODED: &str = "encoded";
const F_TIMESTAMP: &str = "timestamp";
const F_UNENCRYPTED: &str = "unencrypted";
const F_DATA: &str = "data";
const F_DATA_ENCODING: &str = "dataEncoding";
const BASE64_ENCODING: &str = "base64";

/// A payload sealed with AES-256-GCM under a PBKDF2-derived key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedEnvelope {
    /// Per-seal KDF salt.
    pub salt: [u8; SALT_SIZE],
    /// Per-seal GCM nonce.
    pub iv: [u8; IV_SIZE],
    /// Ciphertext with the 16-byte tag appended.
    pub ciphertext: Vec<u8>,
    /// Whether the plaintext was compressed before encryption.
    pub compressed: bool,
    /// Seal time.
    pub timestamp: DateTime<Utc>,
}

impl SealedEnvelope {
    /// Base64 of `salt || iv || ciphertext`.
    #[must_use]
    pub fn encoded(&self) -> String {
        let mut raw = Vec::with_capacity(SALT_SIZE + IV_SIZE + self.ciphertext.len());
        raw.extend_from_slice(&self.salt);
        raw.extend_from_slice(&self.iv);
        raw.extend_from_slice(&self.ciphertext);
        encode_base64(&raw)
    }

    /// Splits a decoded `salt || iv || ciphertext` buffer.
    pub fn from_encoded(
        encoded: &str,
        compressed: bool,
        timestamp: DateTime<Utc>,
    ) -> CryptoResult<Self> {
        let raw = decode_base64(encoded)?;
        if raw.len() < SALT_SIZE + IV_SIZE + TAG_SIZE {
            return Err(CryptoError::Decrypt(format!(
                "ciphertext too short: {} bytes",
                raw.len()
            )));
        }

        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&raw[..SALT_SIZE]);
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&raw[SALT_SIZE..SALT_SIZE + IV_SIZE]);

        Ok(Self {
            salt,
            iv,
            ciphertext: raw[SALT_SIZE + IV_SIZE..].to_vec(),
            compressed,
            timestamp,
        })
    }
}

/// An explicitly unencrypted snapshot pushed as a last resort.
///
/// Readers must treat this as carrying no confidentiality guarantee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaintextEnvelope {
    /// Payload bytes (zlib data when `compressed`).
    pub data: Vec<u8>,
    /// Whether `data` is compressed.
    pub compressed: bool,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

/// A self-describing backup payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// Compressed and encrypted.
    Sealed(SealedEnvelope),
    /// Unencrypted fallback, flagged as such on the wire.
    PlaintextFallback(PlaintextEnvelope),
    /// A document written before envelopes existed; opened unchanged.
    ///
    /// Stored as text when the bytes are UTF-8, else base64 with a
    /// `dataEncoding` marker.
    Legacy(Vec<u8>),
}

impl Envelope {
    /// Returns true only for sealed envelopes.
    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Sealed(_))
    }

    /// Name of the field that carries the (possibly large) payload.
    #[must_use]
    pub fn payload_field(&self) -> &'static str {
        match self {
            Self::Sealed(_) => F_ENCODED,
            Self::PlaintextFallback(_) | Self::Legacy(_) => F_DATA,
        }
    }

    /// Envelope creation time, if recorded.
    #[must_use]
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Sealed(e) => Some(e.timestamp),
            Self::PlaintextFallback(e) => Some(e.timestamp),
            Self::Legacy(_) => None,
        }
    }

    /// Renders the envelope as document fields.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        match self {
            Self::Sealed(e) => {
                fields.insert(F_ALGORITHM.into(), ALGORITHM_ID.into());
                fields.insert(F_VERSION.into(), FORMAT_VERSION.into());
                fields.insert(F_COMPRESSED.into(), e.compressed.into());
                fields.insert(F_ENCODED.into(), e.encoded().into());
                fields.insert(F_TIMESTAMP.into(), format_iso8601(&e.timestamp).into());
            }
            Self::PlaintextFallback(e) => {
                fields.insert(F_UNENCRYPTED.into(), true.into());
                fields.insert(F_VERSION.into(), FORMAT_VERSION.into());
                fields.insert(F_COMPRESSED.into(), e.compressed.into());
                fields.insert(F_DATA.into(), encode_base64(&e.data).into());
                fields.insert(F_TIMESTAMP.into(), format_iso8601(&e.timestamp).into());
            }
            Self::Legacy(data) => match std::str::from_utf8(data) {
                Ok(text) => {
                    fields.insert(F_DATA.into(), text.into());
                }
                Err(_) => {
                    fields.insert(F_DATA_ENCODING.into(), BASE64_ENCODING.into());
                    fields.insert(F_DATA.into(), encode_base64(data).into());
                }
            },
        }
        fields
    }

    /// Parses document fields.
    ///
    /// Documents with no `algorithmId` and no `unencrypted` flag are legacy
    /// payloads and come back as [`Envelope::Legacy`] rather than an error.
    pub fn from_fields(fields: &Map<String, Value>) -> CryptoResult<Self> {
        if let Some(algorithm) = fields.get(F_ALGORITHM) {
            let algorithm = algorithm
                .as_str()
                .ok_or_else(|| CryptoError::malformed("algorithmId must be a string"))?;
            if algorithm != ALGORITHM_ID {
                return Err(CryptoError::UnsupportedAlgorithm(algorithm.to_string()));
            }
            check_version(fields)?;
            let encoded = require_str(fields, F_ENCODED)?;
            let sealed =
                SealedEnvelope::from_encoded(encoded, compressed_flag(fields)?, timestamp(fields)?)?;
            return Ok(Self::Sealed(sealed));
        }

        if fields.get(F_UNENCRYPTED).and_then(Value::as_bool) == Some(true) {
            check_version(fields)?;
            let data = decode_base64(require_str(fields, F_DATA)?)?;
            return Ok(Self::PlaintextFallback(PlaintextEnvelope {
                data,
                compressed: compressed_flag(fields)?,
                timestamp: timestamp(fields)?,
            }));
        }

        if fields.get(F_DATA_ENCODING).and_then(Value::as_str) == Some(BASE64_ENCODING) {
            let data = decode_base64(require_str(fields, F_DATA)?)?;
            return Ok(Self::Legacy(data));
        }

        let payload = match fields.get(F_DATA) {
            Some(Value::String(s)) => s.clone().into_bytes(),
            Some(other) => serde_json::to_vec(other)
                .map_err(|e| CryptoError::malformed(e.to_string()))?,
            None => serde_json::to_vec(fields).map_err(|e| CryptoError::malformed(e.to_string()))?,
        };
        Ok(Self::Legacy(payload))
    }
}

/// The payload field a stored document uses, judged from its fields.
#[must_use]
pub fn payload_field(fields: &Map<String, Value>) -> &'static str {
    if fields.contains_key(F_ALGORITHM) {
        F_ENCODED
    } else {
        F_DATA
    }
}

fn require_str<'a>(fields: &'a Map<String, Value>, name: &str) -> CryptoResult<&'a str> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .ok_or_else(|| CryptoError::malformed(format!("missing string field {name}")))
}

fn compressed_flag(fields: &Map<String, Value>) -> CryptoResult<bool> {
    match fields.get(F_COMPRESSED) {
        None => Ok(false),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| CryptoError::malformed("compressed must be a bool")),
    }
}

fn timestamp(fields: &Map<String, Value>) -> CryptoResult<DateTime<Utc>> {
    let raw = require_str(fields, F_TIMESTAMP)?;
    parse_iso8601(raw).map_err(|e| CryptoError::malformed(e.to_string()))
}

fn check_version(fields: &Map<String, Value>) -> CryptoResult<()> {
    let version = require_str(fields, F_VERSION)?;
    match version.split('.').next() {
        Some("2") => Ok(()),
        _ => Err(CryptoError::UnsupportedVersion(version.to_string())),
    }
}
