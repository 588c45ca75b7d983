//! AEAD sealing - AES-256-GCM and XChaCha20-Poly1305

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::argon2_kdf::random_bytes;
use crate::error::{KeyStoreError, Result};

/// AEAD cipher selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AeadCipher {
    /// AES-256-GCM (12-byte nonce)
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// XChaCha20-Poly1305 (24-byte nonce)
    #[default]
    #[serde(rename = "xchacha20-poly1305")]
    XChaCha20Poly1305,
}

impl AeadCipher {
    pub fn nonce_len(&self) -> usize {
        match self {
            Self::Aes256Gcm => 12,
            Self::XChaCha20Poly1305 => 24,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Aes256Gcm => "AES-256-GCM",
            Self::XChaCha20Poly1305 => "XChaCha20-Poly1305",
        }
    }
}

/// Seal arbitrary bytes, returning `(nonce, ciphertext)`
pub fn seal(
    key: &SecretBox<[u8; 32]>,
    plaintext: &[u8],
    aad: &[u8],
    cipher: AeadCipher,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let payload = Payload { msg: plaintext, aad };

    match cipher {
        AeadCipher::Aes256Gcm => {
            let c = Aes256Gcm::new_from_slice(key.expose_secret())
                .map_err(|e| KeyStoreError::Crypto(e.to_string()))?;
            let nonce_bytes = random_bytes::<12>()?;
            let ct = c
                .encrypt(AesNonce::from_slice(&nonce_bytes), payload)
                .map_err(|e| KeyStoreError::Crypto(format!("AES-GCM encryption failed: {}", e)))?;
            Ok((nonce_bytes.to_vec(), ct))
        }
        AeadCipher::XChaCha20Poly1305 => {
            let c = XChaCha20Poly1305::new_from_slice(key.expose_secret())
                .map_err(|e| KeyStoreError::Crypto(e.to_string()))?;
            let nonce_bytes = random_bytes::<24>()?;
            let ct = c
                .encrypt(XNonce::from_slice(&nonce_bytes), payload)
                .map_err(|e| KeyStoreError::Crypto(format!("XChaCha20 encryption failed: {}", e)))?;
            Ok((nonce_bytes.to_vec(), ct))
        }
    }
}

/// Open bytes sealed by [`seal`]. Authentication failure maps to `AuthFailed`.
pub fn open(
    key: &SecretBox<[u8; 32]>,
    nonce: &[u8],
    ciphertext: &[u8],
    aad: &[u8],
    cipher: AeadCipher,
) -> Result<Zeroizing<Vec<u8>>> {
    if nonce.len() != cipher.nonce_len() {
        return Err(KeyStoreError::Crypto(format!(
            "invalid {} nonce length",
            cipher.name()
        )));
    }

    let payload = Payload { msg: ciphertext, aad };

    let plaintext = match cipher {
        AeadCipher::Aes256Gcm => {
            let c = Aes256Gcm::new_from_slice(key.expose_secret())
                .map_err(|e| KeyStoreError::Crypto(e.to_string()))?;
            c.decrypt(AesNonce::from_slice(nonce), payload)
        }
        AeadCipher::XChaCha20Poly1305 => {
            let c = XChaCha20Poly1305::new_from_slice(key.expose_secret())
                .map_err(|e| KeyStoreError::Crypto(e.to_string()))?;
            c.decrypt(XNonce::from_slice(nonce), payload)
        }
    }
    .map_err(|_| KeyStoreError::AuthFailed)?;

    Ok(Zeroizing::new(plaintext))
}

/// Wrap a 256-bit key under a KEK, binding it to `key_id`
pub fn wrap_key(
    key: &SecretBox<[u8; 32]>,
    kek: &SecretBox<[u8; 32]>,
    key_id: &str,
    cipher: AeadCipher,
) -> Result<(Vec<u8>, Vec<u8>)> {
    seal(kek, key.expose_secret(), key_id.as_bytes(), cipher)
}

/// Unwrap a key produced by [`wrap_key`]
pub fn unwrap_key(
    kek: &SecretBox<[u8; 32]>,
    nonce: &[u8],
    ciphertext: &[u8],
    key_id: &str,
    cipher: AeadCipher,
) -> Result<SecretBox<[u8; 32]>> {
    let plaintext = open(kek, nonce, ciphertext, key_id.as_bytes(), cipher)?;

    if plaintext.len() != 32 {
        return Err(KeyStoreError::Crypto("invalid key length".into()));
    }

    let mut key = [0u8; 32];
    key.copy_from_slice(&plaintext);
    let secret = SecretBox::new(Box::new(key));
    key.zeroize();
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> SecretBox<[u8; 32]> {
        SecretBox::new(Box::new([byte; 32]))
    }

    #[test]
    fn test_wrap_unwrap_both_ciphers() {
        for cipher in [AeadCipher::Aes256Gcm, AeadCipher::XChaCha20Poly1305] {
            let (nonce, ct) = wrap_key(&key(42), &key(1), "faceguard.vault", cipher).unwrap();
            assert_eq!(nonce.len(), cipher.nonce_len());

            let unwrapped = unwrap_key(&key(1), &nonce, &ct, "faceguard.vault", cipher).unwrap();
            assert_eq!(unwrapped.expose_secret(), &[42u8; 32]);
        }
    }

    #[test]
    fn test_wrong_kek_fails() {
        let (nonce, ct) = wrap_key(&key(42), &key(1), "id", AeadCipher::default()).unwrap();
        let result = unwrap_key(&key(2), &nonce, &ct, "id", AeadCipher::default());

        assert!(matches!(result, Err(KeyStoreError::AuthFailed)));
    }

    #[test]
    fn test_key_bound_to_id() {
        let (nonce, ct) = wrap_key(&key(42), &key(1), "vault", AeadCipher::default()).unwrap();
        let result = unwrap_key(&key(1), &nonce, &ct, "store", AeadCipher::default());

        assert!(result.is_err());
    }

    #[test]
    fn test_seal_open_with_aad() {
        let (nonce, ct) = seal(&key(7), b"blob", b"aad", AeadCipher::Aes256Gcm).unwrap();
        let pt = open(&key(7), &nonce, &ct, b"aad", AeadCipher::Aes256Gcm).unwrap();
        assert_eq!(pt.as_slice(), b"blob");

        assert!(open(&key(7), &nonce[..4], &ct, b"aad", AeadCipher::Aes256Gcm).is_err());
    }
}
