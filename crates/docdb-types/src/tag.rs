use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric identifier of a stored document type.
///
/// Tags are written big-endian into every object and index key, so documents
/// of one type sort contiguously and types sort by tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeTag(u32);

impl TypeTag {
    /// Width of an encoded tag in bytes.
    pub const ENCODED_LEN: usize = 4;

    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn get(self) -> u32 {
        self.0
    }

    /// Big-endian encoding, as it appears inside keys.
    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub const fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }
}

impl fmt::Debug for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeTag({})", self.0)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for TypeTag {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}
