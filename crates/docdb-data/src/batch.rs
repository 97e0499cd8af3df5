use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use docdb_types::{Metadata, ObjectKey};
use tracing::debug;

use crate::engine::{DataDb, Operation};
use crate::error::{DataError, DataResult};
use crate::options::WriteOptions;

enum Pending {
    Put {
        key: ObjectKey,
        body: Vec<u8>,
        metadata: Metadata,
    },
    Delete {
        key: ObjectKey,
    },
}

impl Pending {
    fn as_operation(&self) -> Operation<'_> {
        match self {
            Self::Put {
                key,
                body,
                metadata,
            } => Operation::Put {
                key,
                body,
                metadata,
            },
            Self::Delete { key } => Operation::Delete { key },
        }
    }
}

/// Buffered puts and deletes applied atomically by [`DataBatch::write`].
///
/// Nothing is visible to readers until `write` succeeds. Listeners are
/// notified once per buffered operation, in order. A batch may be filled
/// from several threads.
pub struct DataBatch<'db> {
    db: &'db DataDb,
    pending: Mutex<Vec<Pending>>,
}

impl<'db> DataBatch<'db> {
    pub(crate) fn new(db: &'db DataDb) -> Self {
        Self {
            db,
            pending: Mutex::new(Vec::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Vec<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put(&self, key: &ObjectKey, body: &[u8], metadata: &Metadata) {
        self.pending().push(Pending::Put {
            key: key.clone(),
            body: body.to_vec(),
            metadata: metadata.clone(),
        });
    }

    pub fn delete(&self, key: &ObjectKey) {
        self.pending().push(Pending::Delete { key: key.clone() });
    }

    /// Number of buffered operations.
    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Discard every buffered operation.
    pub fn clear(&self) {
        self.pending().clear();
    }

    /// Apply every buffered operation in one atomic write.
    ///
    /// On success, including a committed write whose post-commit callbacks
    /// failed, the batch is emptied and may be reused. Any other failure
    /// leaves the buffer untouched.
    pub fn write(&self, options: WriteOptions<'_>) -> DataResult<()> {
        let mut pending = self.pending();
        let result = {
            let ops: Vec<Operation<'_>> = pending.iter().map(Pending::as_operation).collect();
            debug!(ops = ops.len(), "writing batch");
            self.db.execute(&ops, options)
        };
        if matches!(result, Ok(()) | Err(DataError::ListenerFailure(_))) {
            pending.clear();
        }
        result
    }
}

impl fmt::Debug for DataBatch<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataBatch")
            .field("pending", &self.len())
            .finish()
    }
}
