use std::fmt;

use docdb_store::StoreError;
use docdb_types::KeyError;

/// Errors from data engine operations.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    /// A key, id or index value could not be encoded.
    #[error("invalid key field: {0}")]
    InvalidKeyField(#[from] KeyError),

    /// A listener or anticipate hook vetoed the write. Nothing was changed.
    #[error("write aborted during anticipation: {0:#}")]
    AnticipationAborted(anyhow::Error),

    /// The underlying store failed.
    #[error("storage failure: {0}")]
    StorageFailure(#[from] StoreError),

    /// The write was committed but post-commit callbacks failed.
    #[error("write committed but {0}")]
    ListenerFailure(ListenerErrors),

    /// The cursor is not positioned on an entry.
    #[error("cursor is not positioned on an entry")]
    InvalidCursor,

    /// An index entry points to an object that does not exist.
    #[error("index entry points to missing object {object_key}")]
    DanglingIndexEntry { object_key: String },

    /// A write was started from inside an anticipate hook of another write.
    #[error("write issued while this thread is anticipating another write")]
    ReentrantWrite,

    /// A reference entry could not be decoded.
    #[error("corrupt reference entry for {key}: {reason}")]
    CorruptReference { key: String, reason: String },

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result alias for data engine operations.
pub type DataResult<T> = Result<T, DataError>;

/// Errors raised by post-commit callbacks of one write, in call order.
#[derive(Debug)]
pub struct ListenerErrors {
    errors: Vec<anyhow::Error>,
}

impl ListenerErrors {
    pub(crate) fn new(errors: Vec<anyhow::Error>) -> Self {
        Self { errors }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &anyhow::Error> {
        self.errors.iter()
    }

    pub fn first(&self) -> Option<&anyhow::Error> {
        self.errors.first()
    }

    pub fn into_inner(self) -> Vec<anyhow::Error> {
        self.errors
    }
}

impl fmt::Display for ListenerErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} post-commit callback(s) failed", self.errors.len())?;
        if let Some(first) = self.errors.first() {
            write!(f, ": {first:#}")?;
        }
        Ok(())
    }
}
