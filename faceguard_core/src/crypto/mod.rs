//! FaceGuard - Cryptographic Core

pub mod aead;
pub mod keys;
pub mod stream;

pub use aead::*;
pub use keys::*;
pub use stream::{decrypt_stream, encrypt_stream, sha256_hex, StreamSummary};
