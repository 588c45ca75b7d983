//! FaceGuard - Secure key/blob store
//!
//! Durable state (enrolled set, protected apps, hidden-file records,
//! settings, gate counters) lives here as JSON blobs, sealed at rest.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::{contexts, open, seal, Cipher, VaultKey};
use crate::error::{GuardError, GuardResult};

/// Well-known store keys
pub mod keys {
    pub const ENROLLED_SET: &str = "enrolled_set";
    pub const PROTECTED_APPS: &str = "protected_apps";
    pub const HIDDEN_FILES: &str = "hidden_files";
    pub const SETTINGS: &str = "settings";
    pub const GATE_RECORD: &str = "gate_record";
    pub const BACKUP_PASSWORD: &str = "backup_password";

    pub const ALL: [&str; 6] = [
        ENROLLED_SET,
        PROTECTED_APPS,
        HIDDEN_FILES,
        SETTINGS,
        GATE_RECORD,
        BACKUP_PASSWORD,
    ];
}

/// Opaque, atomic-per-key blob storage
pub trait SecureStore: Send + Sync {
    fn get(&self, key: &str) -> GuardResult<Option<Vec<u8>>>;
    fn put(&self, key: &str, value: &[u8]) -> GuardResult<()>;
    fn delete(&self, key: &str) -> GuardResult<()>;
}

/// Load and decode a JSON value, `None` if absent
pub fn load_json<T: DeserializeOwned>(store: &dyn SecureStore, key: &str) -> GuardResult<Option<T>> {
    match store.get(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| GuardError::Persistence(format!("corrupt record {}: {}", key, e))),
        None => Ok(None),
    }
}

/// Encode and store a JSON value
pub fn save_json<T: Serialize>(store: &dyn SecureStore, key: &str, value: &T) -> GuardResult<()> {
    let bytes = serde_json::to_vec(value)?;
    store.put(key, &bytes)
}

// ═══════════════════════════════════════════════════════════════════════════
// SQLITE STORE
// ═══════════════════════════════════════════════════════════════════════════

/// SQLite-backed store; every blob sealed with XChaCha20-Poly1305
pub struct SqliteStore {
    conn: Mutex<Connection>,
    key: VaultKey,
}

impl SqliteStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path, key: &VaultKey) -> GuardResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| GuardError::Persistence(e.to_string()))?;
        }
        Self::init(Connection::open(path)?, key)
    }

    /// Throwaway in-memory database
    pub fn in_memory(key: &VaultKey) -> GuardResult<Self> {
        Self::init(Connection::open_in_memory()?, key)
    }

    fn init(conn: Connection, key: &VaultKey) -> GuardResult<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                updated_at TEXT NOT NULL
            );
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            key: key.derive(b"blobs", contexts::STORE)?,
        })
    }

    /// Number of stored blobs
    pub fn count(&self) -> GuardResult<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM blobs", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

impl SecureStore for SqliteStore {
    fn get(&self, key: &str) -> GuardResult<Option<Vec<u8>>> {
        let sealed: Option<Vec<u8>> = {
            let conn = self.conn.lock();
            conn.query_row("SELECT data FROM blobs WHERE key = ?1", params![key], |row| row.get(0))
                .optional()?
        };

        let Some(sealed) = sealed else {
            return Ok(None);
        };

        let plaintext = open(Cipher::XChaCha, &self.key, &sealed, key.as_bytes())
            .map_err(|e| GuardError::Persistence(format!("blob {}: {}", key, e)))?;

        Ok(Some(plaintext.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> GuardResult<()> {
        let sealed = seal(Cipher::XChaCha, &self.key, value, key.as_bytes())
            .map_err(|e| GuardError::Persistence(e.to_string()))?;

        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO blobs (key, data, updated_at) VALUES (?1, ?2, ?3)",
            params![key, sealed, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> GuardResult<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM blobs WHERE key = ?1", params![key])?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════

/// In-process store for tests and demos
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `put`/`delete` fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().contains_key(key)
    }

    fn check_writable(&self) -> GuardResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(GuardError::Persistence("store unavailable".into()))
        } else {
            Ok(())
        }
    }
}

impl SecureStore for MemoryStore {
    fn get(&self, key: &str) -> GuardResult<Option<Vec<u8>>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> GuardResult<()> {
        self.check_writable()?;
        self.blobs.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> GuardResult<()> {
        self.check_writable()?;
        self.blobs.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use tempfile::tempdir;

    #[test]
    fn test_sqlite_persists_across_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db").join("faceguard.db");
        let key = VaultKey::generate();

        {
            let store = SqliteStore::open(&path, &key).unwrap();
            save_json(&store, keys::SETTINGS, &Settings::default()).unwrap();
        }

        let store = SqliteStore::open(&path, &key).unwrap();
        let settings: Settings = load_json(&store, keys::SETTINGS).unwrap().unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_sqlite_blobs_sealed() {
        let store = SqliteStore::in_memory(&VaultKey::generate()).unwrap();
        store.put("protected_apps", b"[\"com.bank\"]").unwrap();

        let raw: Vec<u8> = store
            .conn
            .lock()
            .query_row("SELECT data FROM blobs WHERE key = 'protected_apps'", [], |r| r.get(0))
            .unwrap();
        assert!(!raw.windows(8).any(|w| w == b"com.bank"));

        assert_eq!(store.get("protected_apps").unwrap().unwrap(), b"[\"com.bank\"]");
        store.delete("protected_apps").unwrap();
        assert!(store.get("protected_apps").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_wrong_key_is_persistence_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faceguard.db");
        SqliteStore::open(&path, &VaultKey::generate()).unwrap().put("settings", b"{}").unwrap();

        let other = SqliteStore::open(&path, &VaultKey::generate()).unwrap();
        assert!(matches!(other.get("settings"), Err(GuardError::Persistence(_))));
    }

    #[test]
    fn test_memory_store_fail_writes() {
        let store = MemoryStore::new();
        store.put("a", b"1").unwrap();

        store.set_fail_writes(true);
        assert!(matches!(store.put("a", b"2"), Err(GuardError::Persistence(_))));
        assert_eq!(store.get("a").unwrap().unwrap(), b"1");

        store.set_fail_writes(false);
        store.delete("a").unwrap();
        assert!(!store.contains("a"));
    }

    #[test]
    fn test_corrupt_json_is_persistence_error() {
        let store = MemoryStore::new();
        store.put(keys::SETTINGS, b"not json").unwrap();

        let result: GuardResult<Option<Settings>> = load_json(&store, keys::SETTINGS);
        assert!(matches!(result, Err(GuardError::Persistence(_))));
    }
}
