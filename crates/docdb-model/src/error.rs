use docdb_data::DataError;
use docdb_types::KeyError;

/// Errors from model layer operations.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// Failure reported by the data engine.
    #[error(transparent)]
    Data(#[from] DataError),

    /// A model could not be encoded or decoded.
    #[error("serialization error for {type_name}: {reason}")]
    Serialization {
        type_name: &'static str,
        reason: String,
    },

    /// Every type tag has been assigned.
    #[error("type table is full")]
    TypeTableFull,

    /// The persisted type table could not be read.
    #[error("corrupt type table entry {key}: {reason}")]
    CorruptTypeTable { key: String, reason: String },

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<KeyError> for ModelError {
    fn from(err: KeyError) -> Self {
        Self::Data(DataError::InvalidKeyField(err))
    }
}

impl From<docdb_store::StoreError> for ModelError {
    fn from(err: docdb_store::StoreError) -> Self {
        Self::Data(DataError::StorageFailure(err))
    }
}

/// Result alias for model layer operations.
pub type ModelResult<T> = Result<T, ModelError>;
