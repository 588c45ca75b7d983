//! FaceGuard - Protected app registry

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{GuardError, GuardResult};
use crate::store::{keys, load_json, save_json, SecureStore};

/// Set of app identifiers the gate guards
pub struct ProtectedApps {
    store: Arc<dyn SecureStore>,
    apps: RwLock<BTreeSet<String>>,
    writer: Mutex<()>,
}

impl ProtectedApps {
    pub fn load(store: Arc<dyn SecureStore>) -> GuardResult<Self> {
        let apps = load_json(store.as_ref(), keys::PROTECTED_APPS)?.unwrap_or_default();
        Ok(Self {
            store,
            apps: RwLock::new(apps),
            writer: Mutex::new(()),
        })
    }

    pub fn contains(&self, app: &str) -> bool {
        self.apps.read().contains(app)
    }

    /// Sorted identifiers
    pub fn list(&self) -> Vec<String> {
        self.apps.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.apps.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.read().is_empty()
    }

    /// Returns false if already protected
    pub fn add(&self, app: &str) -> GuardResult<bool> {
        let app = app.trim();
        if app.is_empty() || app.chars().any(char::is_whitespace) {
            return Err(GuardError::Validation(format!("invalid app identifier {:?}", app)));
        }

        let added = self.mutate(|apps| apps.insert(app.to_string()))?;
        if added {
            log::info!("Protecting app {}", app);
        }
        Ok(added)
    }

    /// Returns false if it was not protected
    pub fn remove(&self, app: &str) -> GuardResult<bool> {
        let removed = self.mutate(|apps| apps.remove(app))?;
        if removed {
            log::info!("No longer protecting app {}", app);
        }
        Ok(removed)
    }

    pub fn clear(&self) -> GuardResult<()> {
        self.mutate(|apps| {
            let had = !apps.is_empty();
            apps.clear();
            had
        })
        .map(|_| ())
    }

    fn mutate<F>(&self, f: F) -> GuardResult<bool>
    where
        F: FnOnce(&mut BTreeSet<String>) -> bool,
    {
        let _guard = self.writer.lock();

        let mut next = self.apps.read().clone();
        if !f(&mut next) {
            return Ok(false);
        }

        save_json(self.store.as_ref(), keys::PROTECTED_APPS, &next)?;
        *self.apps.write() = next;
        Ok(true)
    }
}
