//! Identity-keyed sets of sinks and observers.

use std::sync::Arc;

use parking_lot::RwLock;

/// A set of shared handles compared by pointer identity.
///
/// Callers iterate over a [`snapshot`](Registry::snapshot), so entries may
/// be added or removed while a delivery is in progress.
pub struct Registry<T: ?Sized> {
    entries: RwLock<Vec<Arc<T>>>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Returns `false` if the entry was already registered.
    pub fn add(&self, entry: Arc<T>) -> bool {
        let mut entries = self.entries.write();
        if entries.iter().any(|e| Arc::ptr_eq(e, &entry)) {
            return false;
        }
        entries.push(entry);
        true
    }

    /// Returns `false` if the entry was not registered.
    pub fn remove(&self, entry: &Arc<T>) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| !Arc::ptr_eq(e, entry));
        entries.len() != before
    }

    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.read().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
