//! Key stores - symmetric keys addressed by id

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::crypto::{derive_kek, random_bytes, unwrap_key, wrap_key, AeadCipher, Argon2Config, SecretKey};
use crate::error::{KeyStoreError, Result};

/// Current on-disk format version
const FORMAT_VERSION: u32 = 1;

/// Key id of the passphrase check entry
const CHECK_ID: &str = "__faceguard_check__";

/// Source of symmetric keys, addressed by an opaque id.
///
/// Implementations create the key on first request, so callers never
/// distinguish "new" from "existing".
pub trait KeyProvider: Send + Sync {
    fn key(&self, id: &str) -> Result<SecretKey>;
}

/// Validate a key id: non-empty, ASCII alphanumerics plus `.-_:`
pub fn validate_key_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id != CHECK_ID
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'));

    if valid {
        Ok(())
    } else {
        Err(KeyStoreError::InvalidKeyId(id.to_string()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WrappedKey {
    nonce: String,
    ciphertext: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyStoreFile {
    version: u32,
    cipher: AeadCipher,
    kdf: Argon2Config,
    check: WrappedKey,
    keys: BTreeMap<String, WrappedKey>,
}

/// File-backed key store.
///
/// Every key is wrapped under a KEK derived from the passphrase with
/// Argon2id. The file is rewritten atomically (temp file + rename) after
/// each mutation.
pub struct FileKeyStore {
    path: PathBuf,
    kek: SecretKey,
    state: RwLock<KeyStoreFile>,
}

impl FileKeyStore {
    /// Create a new key store file
    pub fn create<P: AsRef<Path>>(
        path: P,
        passphrase: &SecretBox<String>,
        kdf: Argon2Config,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(KeyStoreError::StoreExists(path.display().to_string()));
        }

        let kdf = kdf.resalted()?;
        let kek = derive_kek(passphrase, &kdf.salt_bytes()?, &kdf)?;
        let cipher = AeadCipher::default();

        let check_key = SecretBox::new(Box::new(random_bytes::<32>()?));
        let check = wrap(&check_key, &kek, CHECK_ID, cipher)?;

        let store = Self {
            path,
            kek,
            state: RwLock::new(KeyStoreFile {
                version: FORMAT_VERSION,
                cipher,
                kdf,
                check,
                keys: BTreeMap::new(),
            }),
        };
        store.persist()?;

        tracing::info!(path = %store.path.display(), "key store created");
        Ok(store)
    }

    /// Open an existing key store; a wrong passphrase yields `AuthFailed`
    pub fn open<P: AsRef<Path>>(path: P, passphrase: &SecretBox<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(KeyStoreError::StoreNotFound(path.display().to_string()));
        }

        let json = fs::read_to_string(&path)?;
        let file: KeyStoreFile = serde_json::from_str(&json)?;

        if file.version != FORMAT_VERSION {
            return Err(KeyStoreError::VersionMismatch {
                expected: FORMAT_VERSION,
                got: file.version,
            });
        }

        let kek = derive_kek(passphrase, &file.kdf.salt_bytes()?, &file.kdf)?;
        if let Err(e) = unwrap(&file.check, &kek, CHECK_ID, file.cipher) {
            tracing::warn!(path = %path.display(), "key store unlock rejected");
            return Err(e);
        }

        tracing::debug!(path = %path.display(), keys = file.keys.len(), "key store opened");
        Ok(Self {
            path,
            kek,
            state: RwLock::new(file),
        })
    }

    /// Open if present, otherwise create with default Argon2 parameters
    pub fn open_or_create<P: AsRef<Path>>(path: P, passphrase: &SecretBox<String>) -> Result<Self> {
        if path.as_ref().exists() {
            Self::open(path, passphrase)
        } else {
            Self::create(path, passphrase, Argon2Config::default())
        }
    }

    /// Fetch an existing key without creating it
    pub fn get(&self, id: &str) -> Result<SecretKey> {
        validate_key_id(id)?;
        let state = self.state.read();
        let wrapped = state
            .keys
            .get(id)
            .ok_or_else(|| KeyStoreError::KeyNotFound(id.to_string()))?;
        unwrap(wrapped, &self.kek, id, state.cipher)
    }

    /// Whether a key with this id exists
    pub fn contains(&self, id: &str) -> bool {
        self.state.read().keys.contains_key(id)
    }

    /// Ids of all stored keys
    pub fn ids(&self) -> Vec<String> {
        self.state.read().keys.keys().cloned().collect()
    }

    /// Remove a key. Data sealed under it becomes unrecoverable.
    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.state.write().keys.remove(id).is_some();
        if removed {
            self.persist()?;
            tracing::warn!(key_id = id, "key removed");
        }
        Ok(removed)
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&*self.state.read())?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(&json)?;
        file.sync_all()?;

        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl KeyProvider for FileKeyStore {
    fn key(&self, id: &str) -> Result<SecretKey> {
        validate_key_id(id)?;

        let mut state = self.state.write();
        if let Some(wrapped) = state.keys.get(id) {
            return unwrap(wrapped, &self.kek, id, state.cipher);
        }

        let key = SecretBox::new(Box::new(random_bytes::<32>()?));
        let wrapped = wrap(&key, &self.kek, id, state.cipher)?;
        state.keys.insert(id.to_string(), wrapped);
        drop(state);

        if let Err(e) = self.persist() {
            self.state.write().keys.remove(id);
            return Err(e);
        }

        tracing::info!(key_id = id, "key generated");
        Ok(key)
    }
}

fn wrap(key: &SecretKey, kek: &SecretKey, id: &str, cipher: AeadCipher) -> Result<WrappedKey> {
    let (nonce, ciphertext) = wrap_key(key, kek, id, cipher)?;
    Ok(WrappedKey {
        nonce: B64.encode(nonce),
        ciphertext: B64.encode(ciphertext),
        created_at: Utc::now(),
    })
}

fn unwrap(wrapped: &WrappedKey, kek: &SecretKey, id: &str, cipher: AeadCipher) -> Result<SecretKey> {
    let nonce = B64.decode(&wrapped.nonce)?;
    let ciphertext = B64.decode(&wrapped.ciphertext)?;
    unwrap_key(kek, &nonce, &ciphertext, id, cipher)
}

/// In-memory key provider (tests, demos, ephemeral sessions)
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: Mutex<HashMap<String, [u8; 32]>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.lock().is_empty()
    }
}

impl KeyProvider for MemoryKeyStore {
    fn key(&self, id: &str) -> Result<SecretKey> {
        validate_key_id(id)?;

        let mut keys = self.keys.lock();
        let bytes = match keys.get(id) {
            Some(bytes) => *bytes,
            None => {
                let bytes = random_bytes::<32>()?;
                keys.insert(id.to_string(), bytes);
                bytes
            }
        };
        Ok(SecretBox::new(Box::new(bytes)))
    }
}

impl Drop for MemoryKeyStore {
    fn drop(&mut self) {
        for key in self.keys.get_mut().values_mut() {
            key.zeroize();
        }
    }
}

impl<T: KeyProvider + ?Sized> KeyProvider for std::sync::Arc<T> {
    fn key(&self, id: &str) -> Result<SecretKey> {
        (**self).key(id)
    }
}
