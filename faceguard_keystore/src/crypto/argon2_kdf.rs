//! Argon2id KDF for deriving key-encryption keys from passphrases

use argon2::{Algorithm, Argon2, Params, Version};
use base64::Engine;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{KeyStoreError, Result};

/// Argon2id parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Argon2Config {
    /// Iterations (time cost)
    pub time_cost: u32,
    /// Memory in KiB
    pub memory_cost_kib: u32,
    /// Lanes
    pub parallelism: u32,
    /// Salt (base64)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
}

impl Default for Argon2Config {
    fn default() -> Self {
        Self {
            time_cost: 3,
            memory_cost_kib: 64 * 1024, // 64 MiB
            parallelism: 2,
            salt: None,
        }
    }
}

impl Argon2Config {
    /// Default parameters with a fresh random salt
    pub fn with_random_salt() -> Result<Self> {
        Self::default().resalted()
    }

    /// Parameters for constrained devices
    pub fn low_memory() -> Self {
        Self {
            time_cost: 4,
            memory_cost_kib: 16 * 1024, // 16 MiB
            parallelism: 1,
            salt: None,
        }
    }

    /// Same cost parameters, new random salt
    pub fn resalted(&self) -> Result<Self> {
        let salt = generate_salt()?;
        Ok(Self {
            salt: Some(base64::engine::general_purpose::STANDARD.encode(salt)),
            ..self.clone()
        })
    }

    /// Decoded salt bytes
    pub fn salt_bytes(&self) -> Result<Vec<u8>> {
        let encoded = self
            .salt
            .as_deref()
            .ok_or_else(|| KeyStoreError::KeyDerivationFailed("missing salt".into()))?;
        Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
    }
}

/// Derive a 256-bit key-encryption key (KEK) from a passphrase
pub fn derive_kek(
    password: &SecretBox<String>,
    salt: &[u8],
    config: &Argon2Config,
) -> Result<SecretBox<[u8; 32]>> {
    const PEPPER: &[u8] = b"FACEGUARD_KEYSTORE_v1_PEPPER";

    let params = Params::new(
        config.memory_cost_kib,
        config.time_cost,
        config.parallelism,
        Some(32),
    )
    .map_err(|e| KeyStoreError::KeyDerivationFailed(format!("invalid Argon2 params: {}", e)))?;

    let argon2 = Argon2::new_with_secret(PEPPER, Algorithm::Argon2id, Version::V0x13, params)
        .map_err(|e| KeyStoreError::KeyDerivationFailed(format!("Argon2 init failed: {}", e)))?;

    let mut output = [0u8; 32];
    let derived = argon2.hash_password_into(password.expose_secret().as_bytes(), salt, &mut output);
    if let Err(e) = derived {
        output.zeroize();
        return Err(KeyStoreError::KeyDerivationFailed(format!("hashing failed: {}", e)));
    }

    let kek = SecretBox::new(Box::new(output));
    output.zeroize();
    Ok(kek)
}

/// Random 16-byte salt
pub fn generate_salt() -> Result<[u8; 16]> {
    random_bytes::<16>()
}

/// Fill a fixed-size array from the OS RNG
pub fn random_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| KeyStoreError::Crypto(format!("RNG failed: {}", e)))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(s: &str) -> SecretBox<String> {
        SecretBox::new(Box::new(s.to_string()))
    }

    #[test]
    fn test_derive_kek_deterministic() {
        let salt = [1u8; 16];
        let config = Argon2Config::low_memory();

        let kek1 = derive_kek(&secret("correct horse"), &salt, &config).unwrap();
        let kek2 = derive_kek(&secret("correct horse"), &salt, &config).unwrap();

        assert_eq!(kek1.expose_secret(), kek2.expose_secret());
    }

    #[test]
    fn test_different_salt_different_kek() {
        let config = Argon2Config::low_memory();

        let kek1 = derive_kek(&secret("pw"), &[1u8; 16], &config).unwrap();
        let kek2 = derive_kek(&secret("pw"), &[2u8; 16], &config).unwrap();

        assert_ne!(kek1.expose_secret(), kek2.expose_secret());
    }

    #[test]
    fn test_resalted_keeps_costs() {
        let base = Argon2Config::low_memory();
        let salted = base.resalted().unwrap();

        assert_eq!(salted.memory_cost_kib, base.memory_cost_kib);
        assert_eq!(salted.salt_bytes().unwrap().len(), 16);
        assert!(base.salt_bytes().is_err());
    }
}
