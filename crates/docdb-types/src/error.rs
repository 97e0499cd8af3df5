use thiserror::Error;

/// Errors produced while building or decoding keys.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// A key field contains the reserved 0x00 terminator byte.
    #[error("key field {position} contains the reserved 0x00 byte")]
    InvalidKeyField { position: usize },

    /// An index or type name contains the reserved 0x00 byte.
    #[error("name {0:?} contains the reserved 0x00 byte")]
    InvalidName(String),

    /// The bytes do not follow the expected key layout.
    #[error("malformed key: {0}")]
    Malformed(String),
}
