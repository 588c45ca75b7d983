//! FaceGuard - Secure Vault
//!
//! Hides protected files by streaming them through the chunked cipher into
//! the hidden directory, and reveals them the same way in reverse.
//!
//! Every transition stages its output in a `.part` file, publishes it with a
//! rename, and only then touches the source and the record. A failure at any
//! point leaves the source intact and the record in its previous state.

use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::VaultConfig;
use crate::content::HiddenFile;
use crate::crypto::{contexts, decrypt_stream, encrypt_stream, StreamSummary, VaultKey};
use crate::error::{GuardError, GuardResult};
use crate::secure_fs::{self, SecureFs, PART_EXT};
use crate::store::{keys, load_json, save_json, SecureStore};

/// What the gate hides and reveals
pub trait ContentShield: Send + Sync {
    /// Hide all protected content. Returns how many items changed.
    fn conceal(&self) -> GuardResult<usize>;

    /// Reveal all protected content. Returns how many items changed.
    fn reveal(&self) -> GuardResult<usize>;
}

/// Marks a file as in flight until dropped
struct BusyGuard<'a> {
    busy: &'a Mutex<HashSet<String>>,
    id: String,
}

impl<'a> BusyGuard<'a> {
    fn acquire(busy: &'a Mutex<HashSet<String>>, id: &str) -> GuardResult<Self> {
        if !busy.lock().insert(id.to_string()) {
            return Err(GuardError::Busy(id.to_string()));
        }
        Ok(Self {
            busy,
            id: id.to_string(),
        })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.lock().remove(&self.id);
    }
}

/// Secure Vault - owns the hidden directory and the `HiddenFile` records
pub struct SecureVault {
    fs: SecureFs,
    store: Arc<dyn SecureStore>,
    key: VaultKey,
    key_id: String,
    chunk_size: usize,
    records: RwLock<BTreeMap<String, HiddenFile>>,
    writer: Mutex<()>,
    busy: Mutex<HashSet<String>>,
}

impl SecureVault {
    // ═══════════════════════════════════════════════════════════════════════
    // INITIALIZATION
    // ═══════════════════════════════════════════════════════════════════════

    /// Open the vault rooted at `hidden_dir`
    pub fn open(
        hidden_dir: &Path,
        config: &VaultConfig,
        store: Arc<dyn SecureStore>,
        key: VaultKey,
    ) -> GuardResult<Self> {
        let fs = SecureFs::new(hidden_dir)?;

        let records: Vec<HiddenFile> = load_json(store.as_ref(), keys::HIDDEN_FILES)?.unwrap_or_default();
        let records: BTreeMap<_, _> = records.into_iter().map(|r| (r.id.clone(), r)).collect();

        let vault = Self {
            fs,
            store,
            key,
            key_id: config.vault_key_id.clone(),
            chunk_size: config.chunk_size,
            records: RwLock::new(records),
            writer: Mutex::new(()),
            busy: Mutex::new(HashSet::new()),
        };
        vault.sweep_staging()?;

        log::info!(
            "Vault opened at {} ({} records)",
            vault.fs.root().display(),
            vault.records.read().len()
        );
        Ok(vault)
    }

    /// Remove staging files left behind by an interrupted hide
    fn sweep_staging(&self) -> GuardResult<()> {
        let suffix = format!(".{}", PART_EXT);
        for name in self.fs.list()? {
            if name.ends_with(&suffix) {
                log::warn!("Removing interrupted staging file {}", name);
                secure_fs::discard(&self.fs.root().join(&name));
            }
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        self.fs.root()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // RECORDS
    // ═══════════════════════════════════════════════════════════════════════

    /// Put `path` under protection. The file stays where it is until hidden.
    pub fn protect(&self, path: &Path) -> GuardResult<HiddenFile> {
        let size = secure_fs::require_file(path)?;
        let path = fs::canonicalize(path)?;

        if let Some(existing) = self
            .records
            .read()
            .values()
            .find(|r| r.original_path == path)
        {
            return Err(GuardError::Validation(format!(
                "{} is already protected as {}",
                path.display(),
                existing.id
            )));
        }

        let record = HiddenFile::new(Uuid::new_v4().simple().to_string(), &path, size);
        self.commit(record.clone())?;

        log::info!("Protected {} ({}) as {}", record.name, record.kind.label(), record.id);
        Ok(record)
    }

    /// Reveal if needed, then drop the record
    pub fn unprotect(&self, id: &str) -> GuardResult<HiddenFile> {
        let record = self.reveal(id)?;

        let _busy = BusyGuard::acquire(&self.busy, id)?;
        let _guard = self.writer.lock();
        let mut next = self.records.read().clone();
        next.remove(id);
        self.persist(&next)?;
        *self.records.write() = next;

        log::info!("Unprotected {}", id);
        Ok(record)
    }

    /// All records, ordered by id
    pub fn list(&self) -> Vec<HiddenFile> {
        self.records.read().values().cloned().collect()
    }

    pub fn get(&self, id: &str) -> GuardResult<HiddenFile> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| GuardError::NotFound(id.to_string()))
    }

    pub fn hidden_count(&self) -> usize {
        self.records.read().values().filter(|r| r.is_encrypted).count()
    }

    fn persist(&self, records: &BTreeMap<String, HiddenFile>) -> GuardResult<()> {
        let list: Vec<&HiddenFile> = records.values().collect();
        save_json(self.store.as_ref(), keys::HIDDEN_FILES, &list)
    }

    /// Insert or replace one record; memory follows only a successful write
    fn commit(&self, record: HiddenFile) -> GuardResult<()> {
        let _guard = self.writer.lock();
        let mut next = self.records.read().clone();
        next.insert(record.id.clone(), record);
        self.persist(&next)?;
        *self.records.write() = next;
        Ok(())
    }

    fn file_key(&self, id: &str) -> GuardResult<VaultKey> {
        self.key.derive(id.as_bytes(), contexts::FILE_KEY)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // HIDE / REVEAL
    // ═══════════════════════════════════════════════════════════════════════

    /// Encrypt the original into the hidden directory and delete it
    pub fn hide(&self, id: &str) -> GuardResult<HiddenFile> {
        let _busy = BusyGuard::acquire(&self.busy, id)?;
        let record = self.get(id)?;
        if record.is_encrypted {
            return Ok(record);
        }

        secure_fs::require_file(&record.original_path)?;
        let key = self.file_key(id)?;

        let target = self.fs.allocate();
        let staging = secure_fs::staging_path(&target);

        let summary = match self.seal_file(&key, id, &record.original_path, &staging) {
            Ok(summary) => summary,
            Err(e) => {
                secure_fs::discard(&staging);
                log::error!("Hide of {} failed: {}", id, e);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&staging, &target) {
            secure_fs::discard(&staging);
            return Err(e.into());
        }

        let now = Utc::now();
        let mut hidden = record.clone();
        hidden.hidden_path = Some(target.clone());
        hidden.is_encrypted = true;
        hidden.encryption_key_id = Some(self.key_id.clone());
        hidden.size = summary.plaintext_len;
        hidden.hash = Some(summary.sha256);
        hidden.date_hidden = Some(now);
        hidden.last_access = now;

        if let Err(e) = self.commit(hidden.clone()) {
            secure_fs::discard(&target);
            return Err(e);
        }

        // The encrypted copy is complete and recorded; it is now authoritative
        if let Err(e) = secure_fs::secure_delete(&record.original_path) {
            log::error!("Hidden {} but could not delete original: {}", id, e);
            return Err(exposed(&record.original_path, e));
        }

        log::info!("Hid {} ({} bytes, {} frames)", hidden.name, hidden.size, summary.frames);
        Ok(hidden)
    }

    /// Decrypt back to the original path and delete the hidden copy
    pub fn reveal(&self, id: &str) -> GuardResult<HiddenFile> {
        let _busy = BusyGuard::acquire(&self.busy, id)?;
        let record = self.get(id)?;
        if !record.is_encrypted {
            return Ok(record);
        }

        let hidden_path = record
            .hidden_path
            .clone()
            .ok_or_else(|| GuardError::Crypto(format!("{} has no hidden path", id)))?;
        secure_fs::require_file(&hidden_path)?;

        if record.original_path.exists() {
            return Err(GuardError::Validation(format!(
                "refusing to overwrite {}",
                record.original_path.display()
            )));
        }

        let key = self.file_key(id)?;
        let staging = secure_fs::staging_path(&record.original_path);

        let summary = match self.open_file(&key, id, &hidden_path, &staging) {
            Ok(summary) => summary,
            Err(e) => {
                secure_fs::discard(&staging);
                log::error!("Reveal of {} failed: {}", id, e);
                return Err(e);
            }
        };

        if let Some(expected) = &record.hash {
            if *expected != summary.sha256 {
                let mismatch = GuardError::Crypto(format!("content hash mismatch for {}", id));
                return Err(scrub(&staging, mismatch));
            }
        }

        if let Err(e) = fs::rename(&staging, &record.original_path) {
            return Err(scrub(&staging, e.into()));
        }

        let mut revealed = record.clone();
        revealed.hidden_path = None;
        revealed.is_encrypted = false;
        revealed.date_hidden = None;
        revealed.last_access = Utc::now();

        if let Err(e) = self.commit(revealed.clone()) {
            // Hidden copy is still intact and still recorded
            return Err(scrub(&record.original_path, e));
        }

        secure_fs::discard(&hidden_path);

        log::info!("Revealed {} ({} bytes)", revealed.name, summary.plaintext_len);
        Ok(revealed)
    }

    fn seal_file(&self, key: &VaultKey, id: &str, source: &Path, staging: &Path) -> GuardResult<StreamSummary> {
        let reader = BufReader::new(File::open(source)?);
        let mut writer = BufWriter::new(secure_fs::create_staging(staging)?);

        let summary = encrypt_stream(key, id, self.chunk_size, reader, &mut writer)?;
        finish(writer)?;
        Ok(summary)
    }

    fn open_file(&self, key: &VaultKey, id: &str, hidden: &Path, staging: &Path) -> GuardResult<StreamSummary> {
        let reader = BufReader::new(File::open(hidden)?);
        let mut writer = BufWriter::new(secure_fs::create_staging(staging)?);

        let summary = decrypt_stream(key, id, reader, &mut writer)?;
        finish(writer)?;
        Ok(summary)
    }

    /// Hide everything not yet hidden. Keeps going past failures.
    pub fn conceal_all(&self) -> GuardResult<usize> {
        self.apply_all(false, |id| self.hide(id))
    }

    /// Reveal everything hidden. Keeps going past failures.
    pub fn reveal_all(&self) -> GuardResult<usize> {
        self.apply_all(true, |id| self.reveal(id))
    }

    fn apply_all<F>(&self, encrypted: bool, op: F) -> GuardResult<usize>
    where
        F: Fn(&str) -> GuardResult<HiddenFile>,
    {
        let ids: Vec<String> = self
            .records
            .read()
            .values()
            .filter(|r| r.is_encrypted == encrypted)
            .map(|r| r.id.clone())
            .collect();

        let mut done = 0;
        let mut failed = Vec::new();
        for id in ids {
            match op(&id) {
                Ok(_) => done += 1,
                Err(e) => {
                    log::warn!("{}: {}", id, e);
                    failed.push(id);
                }
            }
        }

        if failed.is_empty() {
            Ok(done)
        } else {
            Err(GuardError::Crypto(format!("{} item(s) failed: {}", failed.len(), failed.join(", "))))
        }
    }
}

impl ContentShield for SecureVault {
    fn conceal(&self) -> GuardResult<usize> {
        self.conceal_all()
    }

    fn reveal(&self) -> GuardResult<usize> {
        self.reveal_all()
    }
}

fn exposed(path: &Path, cause: impl std::fmt::Display) -> GuardError {
    GuardError::PlaintextExposed {
        path: path.display().to_string(),
        cause: cause.to_string(),
    }
}

/// Wipe plaintext after a failed reveal. Returns `cause`, or
/// `PlaintextExposed` if the wipe failed too.
fn scrub(path: &Path, cause: GuardError) -> GuardError {
    match secure_fs::secure_delete(path) {
        Ok(()) => cause,
        Err(e) => {
            log::error!("Could not wipe {} after {}: {}", path.display(), cause, e);
            exposed(path, format!("{}; wipe failed: {}", cause, e))
        }
    }
}

/// Flush and fsync a staging writer
fn finish(writer: BufWriter<File>) -> GuardResult<()> {
    let mut file = writer.into_inner().map_err(|e| e.into_error())?;
    file.flush()?;
    file.sync_all()?;
    Ok(())
}
