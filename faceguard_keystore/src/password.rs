//! Backup password hashing

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};

use crate::crypto::{derive_kek, Argon2Config};
use crate::error::{KeyStoreError, Result};

/// Minimum accepted password length in characters
pub const MIN_PASSWORD_LEN: usize = 4;

/// Stored Argon2id hash of a backup password. Never holds the password itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHash {
    pub algorithm: String,
    pub kdf: Argon2Config,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

impl PasswordHash {
    /// Hash `password` with a fresh salt and the cost parameters of `config`
    pub fn new(password: &SecretBox<String>, config: &Argon2Config) -> Result<Self> {
        if password.expose_secret().chars().count() < MIN_PASSWORD_LEN {
            return Err(KeyStoreError::KeyDerivationFailed(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        let kdf = config.resalted()?;
        let derived = derive_kek(password, &kdf.salt_bytes()?, &kdf)?;

        Ok(Self {
            algorithm: "argon2id".to_string(),
            hash: B64.encode(derived.expose_secret()),
            kdf,
            created_at: Utc::now(),
        })
    }

    /// Check a candidate password against this hash
    pub fn verify(&self, candidate: &SecretBox<String>) -> Result<bool> {
        let expected = B64.decode(&self.hash)?;
        let derived = derive_kek(candidate, &self.kdf.salt_bytes()?, &self.kdf)?;

        let matched = constant_time_eq(&expected, derived.expose_secret());
        if !matched {
            tracing::debug!("backup password mismatch");
        }
        Ok(matched)
    }
}

/// Hash a backup password with a fresh salt
pub fn hash_password(password: &SecretBox<String>, config: &Argon2Config) -> Result<PasswordHash> {
    PasswordHash::new(password, config)
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pw(s: &str) -> SecretBox<String> {
        SecretBox::new(Box::new(s.to_string()))
    }

    #[test]
    fn test_verify() {
        let hash = PasswordHash::new(&pw("open sesame"), &Argon2Config::low_memory()).unwrap();

        assert!(hash.verify(&pw("open sesame")).unwrap());
        assert!(!hash.verify(&pw("open sesame!")).unwrap());
        assert!(!hash.hash.contains("sesame"));
    }

    #[test]
    fn test_same_password_different_salt() {
        let config = Argon2Config::low_memory();
        let a = PasswordHash::new(&pw("1234"), &config).unwrap();
        let b = PasswordHash::new(&pw("1234"), &config).unwrap();

        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_too_short_rejected() {
        assert!(PasswordHash::new(&pw("abc"), &Argon2Config::low_memory()).is_err());
    }

    #[test]
    fn test_survives_json() {
        let hash = PasswordHash::new(&pw("backup-pin"), &Argon2Config::low_memory()).unwrap();
        let json = serde_json::to_string(&hash).unwrap();
        let restored: PasswordHash = serde_json::from_str(&json).unwrap();

        assert!(restored.verify(&pw("backup-pin")).unwrap());
    }
}
