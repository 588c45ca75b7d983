//! # FaceGuard key store
//!
//! Passphrase-protected storage for the symmetric keys FaceGuard uses to
//! seal its persisted state and hidden content.
//!
//! - Argon2id key-encryption key derived from the passphrase
//! - Keys wrapped with XChaCha20-Poly1305 (or AES-256-GCM), bound to their id
//! - Atomic JSON file format
//! - Argon2id backup password hashes

pub mod crypto;
pub mod error;
pub mod password;
pub mod store;

// Re-exports
pub use crypto::{AeadCipher, Argon2Config, SecretKey};
pub use error::{KeyStoreError, Result};
pub use password::{hash_password, PasswordHash};
pub use store::{FileKeyStore, KeyProvider, MemoryKeyStore};

// Callers build passphrases with the same secrecy version
pub use secrecy;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "1.0.0");
    }
}
