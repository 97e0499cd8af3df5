/// Errors from ordered store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A writer panicked while holding the store lock.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),

    /// The backend refused or failed the operation.
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
