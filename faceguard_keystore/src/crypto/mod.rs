//! Crypto primitives - Argon2id, AES-GCM, XChaCha20-Poly1305

mod aead;
mod argon2_kdf;

use secrecy::ExposeSecret;

pub use aead::{open, seal, unwrap_key, wrap_key, AeadCipher};
pub use argon2_kdf::{derive_kek, generate_salt, random_bytes, Argon2Config};

/// Secret 256-bit key
pub type SecretKey = secrecy::SecretBox<[u8; 32]>;

/// Borrow the raw bytes of a key
pub fn expose_key(key: &SecretKey) -> &[u8; 32] {
    key.expose_secret()
}
