use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use docdb_types::{TypeTag, Value};
use serde::{Deserialize, Serialize};

/// How a read interacts with the identity cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheMode {
    /// Return a cached instance if present, cache what was read otherwise.
    #[default]
    Use,
    /// Bypass the cache entirely.
    Skip,
    /// Ignore any cached instance and replace it with a fresh read.
    Refresh,
}

/// Options for a single read.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadOptions {
    pub cache: CacheMode,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(mut self, mode: CacheMode) -> Self {
        self.cache = mode;
        self
    }
}

pub(crate) type CacheKey = (TypeTag, Value);
pub(crate) type AnyModel = Arc<dyn Any + Send + Sync>;

struct Entry {
    model: AnyModel,
    size: usize,
    last_used: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<CacheKey, Entry>,
    clock: u64,
    /// Bumped by every write-driven change; readers compare it to detect
    /// that a write happened while they were decoding.
    epoch: u64,
}

impl State {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Bounded least-recently-used map from document identity to decoded model.
pub struct ModelCache {
    capacity: usize,
    state: Mutex<State>,
}

impl ModelCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.epoch += 1;
    }

    pub(crate) fn get(&self, key: &CacheKey) -> Option<(AnyModel, usize)> {
        if !self.is_enabled() {
            return None;
        }
        let mut state = self.state();
        let now = state.tick();
        let entry = state.entries.get_mut(key)?;
        entry.last_used = now;
        Some((Arc::clone(&entry.model), entry.size))
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.state().epoch
    }

    /// Record the instance a write just committed.
    pub(crate) fn put(&self, key: CacheKey, model: AnyModel, size: usize) {
        let mut state = self.state();
        state.epoch += 1;
        if self.is_enabled() {
            self.insert(&mut state, key, model, size);
        }
    }

    /// Forget a document a write just removed.
    pub(crate) fn invalidate(&self, key: &CacheKey) {
        let mut state = self.state();
        state.epoch += 1;
        state.entries.remove(key);
    }

    /// Cache an instance decoded by a read, unless a write changed the cache
    /// since the read observed `epoch`.
    pub(crate) fn insert_if_unchanged(
        &self,
        key: CacheKey,
        model: AnyModel,
        size: usize,
        epoch: u64,
    ) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut state = self.state();
        if state.epoch != epoch {
            return false;
        }
        self.insert(&mut state, key, model, size);
        true
    }

    fn insert(&self, state: &mut State, key: CacheKey, model: AnyModel, size: usize) {
        let last_used = state.tick();
        state.entries.insert(
            key,
            Entry {
                model,
                size,
                last_used,
            },
        );
        while state.entries.len() > self.capacity {
            let oldest = state
                .entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    state.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

impl fmt::Debug for ModelCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
