//! Per-user key material and PBKDF2 derivation.

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Size of the derived AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;

/// The secret inputs for one user's backups.
///
/// The password fed to the KDF is `application_secret || user_id`, so the
/// same application secret yields unrelated keys for different owners.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct UserSecret {
    application_secret: Vec<u8>,
    user_id: String,
}

impl UserSecret {
    /// Creates a secret from the application secret and the owner id.
    #[must_use]
    pub fn new(application_secret: impl Into<Vec<u8>>, user_id: impl Into<String>) -> Self {
        Self {
            application_secret: application_secret.into(),
            user_id: user_id.into(),
        }
    }

    /// The owner id this secret belongs to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Derives a fresh key for `salt`.
    #[must_use]
    pub fn derive_key(&self, salt: &[u8], iterations: u32) -> DerivedKey {
        let mut password =
            Zeroizing::new(Vec::with_capacity(self.application_secret.len() + self.user_id.len()));
        password.extend_from_slice(&self.application_secret);
        password.extend_from_slice(self.user_id.as_bytes());

        let mut bytes = [0u8; KEY_SIZE];
        pbkdf2_hmac::<Sha256>(&password, salt, iterations, &mut bytes);
        DerivedKey { bytes }
    }
}

impl std::fmt::Debug for UserSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSecret")
            .field("application_secret", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// A 256-bit key derived for exactly one salt.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    /// Returns the key bytes. Never log or persist these.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
