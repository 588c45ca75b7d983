//! FaceGuard - Key Management
//!
//! Wraps key-store material and derives per-purpose keys with HKDF.

use hkdf::Hkdf;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::{GuardError, GuardResult};

/// Key length for AES-256 / XChaCha20
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// Nonce length for XChaCha20
pub const XCHACHA_NONCE_LEN: usize = 24;

/// HKDF contexts for key derivation
pub mod contexts {
    /// Per-file hiding keys
    pub const FILE_KEY: &[u8] = b"FACEGUARD:FILE:v1";

    /// Secure store blobs
    pub const STORE: &[u8] = b"FACEGUARD:STORE:v1";
}

/// Secure key wrapper with automatic zeroization
#[derive(Clone, ZeroizeOnDrop)]
pub struct VaultKey {
    #[zeroize(skip)]
    inner: Secret<[u8; KEY_LEN]>,
}

impl VaultKey {
    /// Create a new vault key from bytes
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }

    /// Fetch key `id` from a key store
    pub fn from_provider(
        provider: &dyn faceguard_keystore::KeyProvider,
        id: &str,
    ) -> GuardResult<Self> {
        let secret = provider.key(id)?;
        Ok(Self::new(*faceguard_keystore::crypto::expose_key(&secret)))
    }

    /// Derive a sub-key bound to `salt` under `context`
    pub fn derive(&self, salt: &[u8], context: &[u8]) -> GuardResult<VaultKey> {
        derive_key(self.expose(), salt, context)
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey([REDACTED])")
    }
}

/// Derive a key using HKDF-SHA256
pub fn derive_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> GuardResult<VaultKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; KEY_LEN];

    hk.expand(info, &mut okm)
        .map_err(|e| GuardError::Crypto(format!("key derivation failed: {}", e)))?;

    Ok(VaultKey::new(okm))
}

/// Generate a random nonce for AES-GCM
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Generate a random nonce for XChaCha20
pub fn generate_xchacha_nonce() -> [u8; XCHACHA_NONCE_LEN] {
    let mut nonce = [0u8; XCHACHA_NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}
