//! FaceGuard - Persisted user settings

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::config::Settings;
use crate::error::GuardResult;
use crate::store::{keys, load_json, save_json, SecureStore};

/// Settings cache backed by the secure store
pub struct SettingsStore {
    store: Arc<dyn SecureStore>,
    current: RwLock<Settings>,
    writer: Mutex<()>,
}

impl SettingsStore {
    pub fn load(store: Arc<dyn SecureStore>) -> GuardResult<Self> {
        let current = load_json(store.as_ref(), keys::SETTINGS)?.unwrap_or_default();
        Ok(Self {
            store,
            current: RwLock::new(current),
            writer: Mutex::new(()),
        })
    }

    pub fn get(&self) -> Settings {
        self.current.read().clone()
    }

    /// Apply `f` and persist; on failure nothing changes
    pub fn update<F>(&self, f: F) -> GuardResult<Settings>
    where
        F: FnOnce(&mut Settings),
    {
        let _guard = self.writer.lock();

        let mut next = self.current.read().clone();
        f(&mut next);
        save_json(self.store.as_ref(), keys::SETTINGS, &next)?;
        *self.current.write() = next.clone();

        Ok(next)
    }

    /// Back to defaults
    pub fn reset(&self) -> GuardResult<()> {
        self.update(|s| *s = Settings::default()).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn test_update_persists() {
        let backing = Arc::new(MemoryStore::new());
        let settings = SettingsStore::load(backing.clone()).unwrap();
        settings.update(|s| s.multi_face_detection = false).unwrap();

        let reloaded = SettingsStore::load(backing).unwrap();
        assert!(!reloaded.get().multi_face_detection);
    }

    #[test]
    fn test_failed_update_keeps_old_value() {
        let backing = Arc::new(MemoryStore::new());
        let settings = SettingsStore::load(backing.clone()).unwrap();

        backing.set_fail_writes(true);
        assert!(settings.update(|s| s.face_enrolled = true).is_err());
        assert!(!settings.get().face_enrolled);
    }
}
