//! Error types for the FaceGuard key store

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Key store already exists at {0}")]
    StoreExists(String),

    #[error("Key store not found at {0}")]
    StoreNotFound(String),

    #[error("Invalid key store JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("Authentication failed - wrong passphrase?")]
    AuthFailed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u32, got: u32 },

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid key id: {0:?}")]
    InvalidKeyId(String),

    #[error("Key not found: {0}")]
    KeyNotFound(String),
}

pub type Result<T> = std::result::Result<T, KeyStoreError>;

impl KeyStoreError {
    pub fn is_security_critical(&self) -> bool {
        matches!(self, Self::AuthFailed | Self::Crypto(_))
    }
}
