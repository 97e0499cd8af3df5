use std::cmp;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Bound;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::trace;

use crate::batch::{BatchOp, WriteBatch};
use crate::error::{StoreError, StoreResult};
use crate::range::KeyRange;
use crate::traits::{OrderedStore, StoreIterator};

type Entries = BTreeMap<Vec<u8>, Vec<u8>>;

/// In-memory, `BTreeMap`-based ordered store.
///
/// Intended for tests and embedding. The map sits behind an `Arc` so that
/// iterators can hold a snapshot cheaply; writers copy the map only while a
/// snapshot is still alive.
pub struct InMemoryStore {
    entries: RwLock<Arc<Entries>>,
}

impl InMemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::new(BTreeMap::new())),
        }
    }

    fn read_guard(&self) -> StoreResult<RwLockReadGuard<'_, Arc<Entries>>> {
        self.entries
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn write_guard(&self) -> StoreResult<RwLockWriteGuard<'_, Arc<Entries>>> {
        self.entries
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))
    }

    fn snapshot(&self) -> StoreResult<Arc<Entries>> {
        Ok(Arc::clone(&*self.read_guard()?))
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read_guard()?.len())
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.read_guard()?.is_empty())
    }

    /// Remove every key.
    pub fn clear(&self) -> StoreResult<()> {
        *self.write_guard()? = Arc::new(BTreeMap::new());
        Ok(())
    }

    /// Sorted copy of every key, for inspection in tests.
    pub fn keys(&self) -> StoreResult<Vec<Vec<u8>>> {
        Ok(self.read_guard()?.keys().cloned().collect())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.entries.read().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("InMemoryStore")
            .field("entry_count", &count)
            .finish()
    }
}

impl OrderedStore for InMemoryStore {
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.read_guard()?.get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()> {
        let mut guard = self.write_guard()?;
        Arc::make_mut(&mut guard).insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> StoreResult<()> {
        let mut guard = self.write_guard()?;
        if guard.contains_key(key) {
            Arc::make_mut(&mut guard).remove(key);
        }
        Ok(())
    }

    fn write_batch(&self, batch: &WriteBatch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut guard = self.write_guard()?;
        let map = Arc::make_mut(&mut guard);
        for op in batch.ops() {
            match op {
                BatchOp::Put { key, value } => {
                    map.insert(key.clone(), value.clone());
                }
                BatchOp::Delete { key } => {
                    map.remove(key);
                }
            }
        }
        trace!(ops = batch.len(), sync = batch.is_sync(), "applied write batch");
        Ok(())
    }

    fn iter(&self, range: KeyRange) -> StoreResult<Box<dyn StoreIterator>> {
        Ok(Box::new(MemoryIterator {
            snapshot: self.snapshot()?,
            range,
            current: None,
        }))
    }

    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.read_guard()?.contains_key(key))
    }
}

/// Iterator over a frozen snapshot of an [`InMemoryStore`].
pub struct MemoryIterator {
    snapshot: Arc<Entries>,
    range: KeyRange,
    current: Option<Vec<u8>>,
}

impl MemoryIterator {
    fn upper(&self) -> Bound<&[u8]> {
        match &self.range.end {
            Some(end) => Bound::Excluded(end.as_slice()),
            None => Bound::Unbounded,
        }
    }

    fn past_end(&self, key: &[u8]) -> bool {
        self.range.end.as_deref().is_some_and(|end| key >= end)
    }

    fn first_from(&self, from: &[u8]) -> Option<Vec<u8>> {
        let from = cmp::max(from, self.range.start.as_slice());
        if self.past_end(from) {
            return None;
        }
        self.snapshot
            .range::<[u8], _>((Bound::Included(from), self.upper()))
            .next()
            .map(|(k, _)| k.clone())
    }

    fn first_after(&self, after: &[u8]) -> Option<Vec<u8>> {
        if after < self.range.start.as_slice() {
            return self.first_from(&self.range.start);
        }
        if self.past_end(after) {
            return None;
        }
        self.snapshot
            .range::<[u8], _>((Bound::Excluded(after), self.upper()))
            .next()
            .map(|(k, _)| k.clone())
    }

    /// Last key in range strictly below `before`, or the last key overall.
    fn last_below(&self, before: Option<&[u8]>) -> Option<Vec<u8>> {
        let start = self.range.start.as_slice();
        let limit = match (before, self.range.end.as_deref()) {
            (None, None) => None,
            (Some(limit), None) | (None, Some(limit)) => Some(limit),
            (Some(a), Some(b)) => Some(cmp::min(a, b)),
        };
        let upper = match limit {
            Some(limit) if limit <= start => return None,
            Some(limit) => Bound::Excluded(limit),
            None => Bound::Unbounded,
        };
        self.snapshot
            .range::<[u8], _>((Bound::Included(start), upper))
            .next_back()
            .map(|(k, _)| k.clone())
    }
}

impl StoreIterator for MemoryIterator {
    fn is_valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        self.current = self.first_from(&self.range.start);
    }

    fn seek_to_last(&mut self) {
        self.current = self.last_below(None);
    }

    fn seek(&mut self, target: &[u8]) {
        self.current = self.first_from(target);
    }

    fn next(&mut self) {
        self.current = match self.current.take() {
            Some(current) => self.first_after(&current),
            None => None,
        };
    }

    fn prev(&mut self) {
        self.current = match self.current.take() {
            Some(current) => self.last_below(Some(&current)),
            None => None,
        };
    }

    fn key(&self) -> Option<&[u8]> {
        self.current.as_deref()
    }

    fn value(&self) -> Option<&[u8]> {
        let key = self.current.as_deref()?;
        self.snapshot.get(key).map(Vec::as_slice)
    }

    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.snapshot.get(key).cloned())
    }
}
