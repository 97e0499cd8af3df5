use std::cell::OnceCell;
use std::fmt;

use docdb_store::StoreIterator;
use tracing::trace;

use crate::error::{DataError, DataResult};

enum Source {
    /// Iterating object entries: key and value come straight from the store.
    Objects,
    /// Iterating index entries: the entry value is an object key whose body
    /// is looked up in the same snapshot on first access.
    Index { body: OnceCell<Vec<u8>> },
}

/// Bidirectional cursor over objects or index entries.
///
/// A cursor reads a snapshot taken when it was opened. It is created
/// positioned on the first entry of its range, if any. Every repositioning
/// drops the lazily loaded object body of index cursors.
pub struct DataCursor {
    iter: Box<dyn StoreIterator>,
    source: Source,
}

impl DataCursor {
    pub(crate) fn objects(mut iter: Box<dyn StoreIterator>) -> Self {
        iter.seek_to_first();
        Self {
            iter,
            source: Source::Objects,
        }
    }

    pub(crate) fn index(mut iter: Box<dyn StoreIterator>) -> Self {
        iter.seek_to_first();
        Self {
            iter,
            source: Source::Index {
                body: OnceCell::new(),
            },
        }
    }

    /// Whether this cursor walks index entries rather than objects.
    pub fn is_index(&self) -> bool {
        matches!(self.source, Source::Index { .. })
    }

    pub fn is_valid(&self) -> bool {
        self.iter.is_valid()
    }

    pub fn next(&mut self) {
        self.iter.next();
        self.reset();
    }

    pub fn prev(&mut self) {
        self.iter.prev();
        self.reset();
    }

    pub fn seek_to_first(&mut self) {
        self.iter.seek_to_first();
        self.reset();
    }

    pub fn seek_to_last(&mut self) {
        self.iter.seek_to_last();
        self.reset();
    }

    /// Position at the first entry whose seek key is `>= target`, clamped
    /// to the cursor's range.
    pub fn seek_to(&mut self, target: &[u8]) {
        self.iter.seek(target);
        self.reset();
    }

    /// Forget any value loaded for the current position.
    pub fn reset(&mut self) {
        if let Source::Index { body, .. } = &mut self.source {
            body.take();
        }
    }

    /// Key of the object at the current position.
    pub fn transient_key(&self) -> DataResult<&[u8]> {
        let entry = match self.source {
            Source::Objects => self.iter.key(),
            Source::Index { .. } => self.iter.value(),
        };
        entry.ok_or(DataError::InvalidCursor)
    }

    /// Body of the object at the current position.
    pub fn transient_value(&self) -> DataResult<&[u8]> {
        match &self.source {
            Source::Objects => self.iter.value().ok_or(DataError::InvalidCursor),
            Source::Index { body } => {
                if let Some(body) = body.get() {
                    return Ok(body);
                }
                let object_key = self.iter.value().ok_or(DataError::InvalidCursor)?;
                let loaded = self
                    .iter
                    .get(object_key)?
                    .ok_or_else(|| DataError::DanglingIndexEntry {
                        object_key: hex::encode(object_key),
                    })?;
                Ok(body.get_or_init(|| loaded))
            }
        }
    }

    /// The raw store key at the current position: the object key for object
    /// cursors, the index entry key for index cursors. Pass it to
    /// [`seek_to`](Self::seek_to) to return here.
    pub fn transient_seek_key(&self) -> DataResult<&[u8]> {
        self.iter.key().ok_or(DataError::InvalidCursor)
    }

    /// Release the cursor.
    pub fn close(self) {
        trace!(index = self.is_index(), "cursor closed");
    }
}

impl fmt::Debug for DataCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataCursor")
            .field("index", &self.is_index())
            .field("valid", &self.is_valid())
            .finish()
    }
}
