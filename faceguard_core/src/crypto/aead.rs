//! FaceGuard - AEAD Encryption
//!
//! AES-256-GCM seals hidden-file frames, XChaCha20-Poly1305 seals store
//! blobs. Both produce `nonce || ciphertext || tag` with the caller's AAD
//! bound in.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use zeroize::Zeroizing;

use super::keys::{generate_nonce, generate_xchacha_nonce, VaultKey, NONCE_LEN, XCHACHA_NONCE_LEN};
use crate::error::{GuardError, GuardResult};

/// Poly1305 / GCM tag length
pub const TAG_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cipher {
    /// Hidden-file frames
    AesGcm,
    /// Store blobs
    XChaCha,
}

impl Cipher {
    pub fn nonce_len(self) -> usize {
        match self {
            Cipher::AesGcm => NONCE_LEN,
            Cipher::XChaCha => XCHACHA_NONCE_LEN,
        }
    }

    /// Bytes a sealed message adds to its plaintext
    pub fn overhead(self) -> usize {
        self.nonce_len() + TAG_LEN
    }
}

fn bad_key<E>(_: E) -> GuardError {
    GuardError::Crypto("invalid key length".into())
}

/// Seal `plaintext` under a fresh random nonce
pub fn seal(cipher: Cipher, key: &VaultKey, plaintext: &[u8], aad: &[u8]) -> GuardResult<Vec<u8>> {
    let payload = Payload { msg: plaintext, aad };
    let failed = |_: aes_gcm::aead::Error| GuardError::Crypto(format!("{:?} encryption failed", cipher));

    let (nonce, body) = match cipher {
        Cipher::AesGcm => {
            let nonce = generate_nonce();
            let body = Aes256Gcm::new_from_slice(key.expose())
                .map_err(bad_key)?
                .encrypt(Nonce::from_slice(&nonce), payload)
                .map_err(failed)?;
            (nonce.to_vec(), body)
        }
        Cipher::XChaCha => {
            let nonce = generate_xchacha_nonce();
            let body = XChaCha20Poly1305::new_from_slice(key.expose())
                .map_err(bad_key)?
                .encrypt(XNonce::from_slice(&nonce), payload)
                .map_err(failed)?;
            (nonce.to_vec(), body)
        }
    };

    let mut sealed = nonce;
    sealed.extend_from_slice(&body);
    Ok(sealed)
}

/// Open a message from [`seal`]. Any tampering, wrong key or wrong AAD is
/// an authentication failure.
pub fn open(cipher: Cipher, key: &VaultKey, sealed: &[u8], aad: &[u8]) -> GuardResult<Zeroizing<Vec<u8>>> {
    if sealed.len() < cipher.overhead() {
        return Err(GuardError::Crypto("sealed data too short".into()));
    }

    let (nonce, body) = sealed.split_at(cipher.nonce_len());
    let payload = Payload { msg: body, aad };

    let opened = match cipher {
        Cipher::AesGcm => Aes256Gcm::new_from_slice(key.expose())
            .map_err(bad_key)?
            .decrypt(Nonce::from_slice(nonce), payload),
        Cipher::XChaCha => XChaCha20Poly1305::new_from_slice(key.expose())
            .map_err(bad_key)?
            .decrypt(XNonce::from_slice(nonce), payload),
    };

    opened
        .map(Zeroizing::new)
        .map_err(|_| GuardError::Crypto("authentication failed".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aad_is_bound() {
        let key = VaultKey::generate();
        let sealed = seal(Cipher::AesGcm, &key, b"frame", b"file-1|0").unwrap();

        assert_eq!(open(Cipher::AesGcm, &key, &sealed, b"file-1|0").unwrap().as_slice(), b"frame");
        assert!(open(Cipher::AesGcm, &key, &sealed, b"file-1|1").is_err());
    }

    #[test]
    fn test_xchacha_wire_format() {
        let key = VaultKey::generate();
        let sealed = seal(Cipher::XChaCha, &key, b"settings", b"settings").unwrap();
        assert_eq!(sealed.len(), Cipher::XChaCha.overhead() + 8);
        assert_eq!(open(Cipher::XChaCha, &key, &sealed, b"settings").unwrap().as_slice(), b"settings");

        assert!(open(Cipher::XChaCha, &key, &sealed[..20], b"settings").is_err());
    }

    #[test]
    fn test_wrong_key_or_cipher_fails() {
        let key = VaultKey::generate();
        let sealed = seal(Cipher::XChaCha, &key, b"secret", b"").unwrap();

        assert!(matches!(
            open(Cipher::XChaCha, &VaultKey::generate(), &sealed, b""),
            Err(GuardError::Crypto(_))
        ));
        assert!(open(Cipher::AesGcm, &key, &sealed, b"").is_err());
    }
}
