//! Binding between the coordinator and the crypto codec.

use chrono::{DateTime, Utc};
use rollsync_crypto::{CryptoCodec, CryptoResult, Envelope, UserSecret};

/// Seals and opens snapshot payloads for one owner.
///
/// Implemented by [`SecretSealer`]; tests substitute their own to exercise
/// the fallback path.
pub trait EnvelopeSealer: Send + Sync {
    /// Compresses and encrypts `plaintext`.
    fn seal(&self, plaintext: &[u8], timestamp: DateTime<Utc>) -> CryptoResult<Envelope>;

    /// Recovers the plaintext of any envelope variant.
    fn open(&self, envelope: &Envelope) -> CryptoResult<Vec<u8>>;

    /// Builds the unencrypted last-resort envelope.
    fn fallback(&self, plaintext: &[u8], timestamp: DateTime<Utc>) -> Envelope;
}

/// [`EnvelopeSealer`] over a [`CryptoCodec`] and the owner's secret.
#[derive(Debug, Clone)]
pub struct SecretSealer {
    codec: CryptoCodec,
    secret: UserSecret,
}

impl SecretSealer {
    /// Creates a sealer.
    #[must_use]
    pub fn new(codec: CryptoCodec, secret: UserSecret) -> Self {
        Self { codec, secret }
    }

    /// The owner id the secret belongs to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        self.secret.user_id()
    }
}

impl EnvelopeSealer for SecretSealer {
    fn seal(&self, plaintext: &[u8], timestamp: DateTime<Utc>) -> CryptoResult<Envelope> {
        self.codec.seal_at(plaintext, &self.secret, timestamp)
    }

    fn open(&self, envelope: &Envelope) -> CryptoResult<Vec<u8>> {
        self.codec.open(envelope, &self.secret)
    }

    fn fallback(&self, plaintext: &[u8], timestamp: DateTime<Utc>) -> Envelope {
        self.codec.fallback(plaintext, timestamp)
    }
}
