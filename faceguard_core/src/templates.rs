//! FaceGuard - Enrolled template store
//!
//! Bounded FIFO of [`FaceTemplate`]s. Readers get immutable snapshots;
//! writers are serialized and persist before publishing, so a failed write
//! leaves both the durable and the in-memory state untouched.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::GuardResult;
use crate::model::FaceTemplate;
use crate::store::{keys, load_json, save_json, SecureStore};

/// Enrolled set with FIFO eviction
pub struct TemplateStore {
    store: Arc<dyn SecureStore>,
    capacity: usize,
    snapshot: RwLock<Arc<Vec<FaceTemplate>>>,
    writer: Mutex<()>,
}

impl TemplateStore {
    /// Load the persisted set (empty if none)
    pub fn load(store: Arc<dyn SecureStore>, capacity: usize) -> GuardResult<Self> {
        let mut templates: Vec<FaceTemplate> =
            load_json(store.as_ref(), keys::ENROLLED_SET)?.unwrap_or_default();

        if templates.len() > capacity {
            log::warn!(
                "Enrolled set holds {} templates, trimming to {}",
                templates.len(),
                capacity
            );
            templates.drain(..templates.len() - capacity);
        }

        Ok(Self {
            store,
            capacity,
            snapshot: RwLock::new(Arc::new(templates)),
            writer: Mutex::new(()),
        })
    }

    /// Consistent, immutable view of the current set
    pub fn snapshot(&self) -> Arc<Vec<FaceTemplate>> {
        Arc::clone(&self.snapshot.read())
    }

    /// Current ordered sequence (oldest first)
    pub fn all(&self) -> Vec<FaceTemplate> {
        self.snapshot().as_ref().clone()
    }

    pub fn count(&self) -> usize {
        self.snapshot.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.read().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append, evicting the oldest template when full. Returns the evicted one.
    pub fn add(&self, template: FaceTemplate) -> GuardResult<Option<FaceTemplate>> {
        let _guard = self.writer.lock();

        let mut next = self.snapshot().as_ref().clone();
        let evicted = if next.len() >= self.capacity {
            Some(next.remove(0))
        } else {
            None
        };
        next.push(template);

        self.commit(next)?;
        Ok(evicted)
    }

    /// Clear, then bulk-insert (keeps the newest `capacity` entries)
    pub fn replace_all(&self, mut templates: Vec<FaceTemplate>) -> GuardResult<()> {
        let _guard = self.writer.lock();

        if templates.len() > self.capacity {
            templates.drain(..templates.len() - self.capacity);
        }
        self.commit(templates)
    }

    /// Atomic read-modify-write. `f` returns whether it changed anything;
    /// unchanged sets are not persisted.
    pub fn update<F>(&self, f: F) -> GuardResult<bool>
    where
        F: FnOnce(&mut Vec<FaceTemplate>) -> bool,
    {
        let _guard = self.writer.lock();

        let mut next = self.snapshot().as_ref().clone();
        if !f(&mut next) {
            return Ok(false);
        }
        next.truncate(self.capacity);

        self.commit(next)?;
        Ok(true)
    }

    /// Drop every template
    pub fn clear(&self) -> GuardResult<()> {
        self.replace_all(Vec::new())
    }

    fn commit(&self, next: Vec<FaceTemplate>) -> GuardResult<()> {
        save_json(self.store.as_ref(), keys::ENROLLED_SET, &next)?;
        *self.snapshot.write() = Arc::new(next);
        Ok(())
    }
}
