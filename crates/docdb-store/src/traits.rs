use crate::batch::WriteBatch;
use crate::error::StoreResult;
use crate::range::KeyRange;

/// Lexicographically ordered byte key-value store.
///
/// All implementations must satisfy these invariants:
/// - Keys are ordered by unsigned byte-wise comparison.
/// - [`OrderedStore::write_batch`] is atomic: a reader never observes part of
///   a batch.
/// - Iterators see a snapshot taken when [`OrderedStore::iter`] was called;
///   later writes do not show through.
/// - All I/O errors are propagated, never silently ignored.
pub trait OrderedStore: Send + Sync {
    /// Point lookup. Returns `Ok(None)` if the key is absent.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;

    /// Insert or overwrite a single key.
    fn put(&self, key: &[u8], value: &[u8]) -> StoreResult<()>;

    /// Remove a single key. Removing an absent key is not an error.
    fn delete(&self, key: &[u8]) -> StoreResult<()>;

    /// Apply every operation of `batch` atomically, in order.
    fn write_batch(&self, batch: &WriteBatch) -> StoreResult<()>;

    /// Open an iterator over `range`. The iterator starts unpositioned.
    fn iter(&self, range: KeyRange) -> StoreResult<Box<dyn StoreIterator>>;

    /// Check whether a key is present.
    ///
    /// Default implementation calls `get()`.
    fn contains(&self, key: &[u8]) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Bidirectional cursor over a snapshot of an [`OrderedStore`].
///
/// Positioning methods never fail; moving past either end of the range
/// leaves the iterator invalid. `key` and `value` return `None` while
/// invalid.
pub trait StoreIterator: Send {
    fn is_valid(&self) -> bool;

    fn seek_to_first(&mut self);

    fn seek_to_last(&mut self);

    /// Position at the first key `>= target`, clamped to the range.
    fn seek(&mut self, target: &[u8]);

    fn next(&mut self);

    fn prev(&mut self);

    fn key(&self) -> Option<&[u8]>;

    fn value(&self) -> Option<&[u8]>;

    /// Point lookup against the iterator's snapshot, ignoring its range.
    fn get(&self, key: &[u8]) -> StoreResult<Option<Vec<u8>>>;
}
