//! FILENAME: quota-cells/src/cache.rs
//! Compute-once values keyed by subset.
//!
//! Building a subset's respondent index is expensive, so concurrent first
//! callers must not each build it. The map lock is held only long enough to
//! fetch the subset's cell; initialization runs outside it, and callers that
//! lose the race block on the winner's `OnceCell`.

use crate::subset::Subset;
use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex, PoisonError};

type Slot<T> = Arc<OnceCell<Arc<T>>>;

#[derive(Debug)]
pub struct SubsetCache<T> {
    entries: Mutex<FxHashMap<Subset, Slot<T>>>,
}

impl<T> Default for SubsetCache<T> {
    fn default() -> Self {
        SubsetCache {
            entries: Mutex::new(FxHashMap::default()),
        }
    }
}

impl<T> SubsetCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, subset: &Subset) -> Slot<T> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(subset.clone()).or_default())
    }

    pub fn get(&self, subset: &Subset) -> Option<Arc<T>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(subset).and_then(|slot| slot.get().cloned())
    }

    pub fn get_or_init<F>(&self, subset: &Subset, init: F) -> Arc<T>
    where
        F: FnOnce() -> T,
    {
        Arc::clone(self.slot(subset).get_or_init(|| Arc::new(init())))
    }

    /// Like `get_or_init`, but a failed initialization leaves the slot empty
    /// so a later call retries.
    pub fn get_or_try_init<F, E>(&self, subset: &Subset, init: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.slot(subset)
            .get_or_try_init(|| init().map(Arc::new))
            .map(Arc::clone)
    }

    /// Replaces the subset's slot with one already holding `value`. Callers
    /// that fetched the previous value keep it; later lookups see `value`.
    pub fn insert(&self, subset: Subset, value: T) -> Option<Arc<T>> {
        let slot = Arc::new(OnceCell::with_value(Arc::new(value)));
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(subset, slot).and_then(|old| old.get().cloned())
    }

    /// Drops the cached value. Returns whether one was present.
    pub fn invalidate(&self, subset: &Subset) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries
            .remove(subset)
            .map(|slot| slot.get().is_some())
            .unwrap_or(false)
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}
