use std::fmt;

use crate::codec::{self, HEADER_LEN};
use crate::error::KeyError;
use crate::tag::TypeTag;
use crate::value::Value;

/// Encoded storage key of one document.
///
/// An `ObjectKey` always holds a well-formed object key, so its type tag and
/// primary key can be read back without failure.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(Vec<u8>);

impl ObjectKey {
    /// Encode the key of document `id` of type `tag`.
    pub fn new(tag: TypeTag, id: &Value) -> Result<Self, KeyError> {
        codec::encode_object_key(tag, id).map(Self)
    }

    /// Wrap bytes read back from storage, checking the layout.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, KeyError> {
        let bytes = bytes.into();
        codec::decode_object_key(&bytes)?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn type_tag(&self) -> TypeTag {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.0[2..HEADER_LEN]);
        TypeTag::from_be_bytes(raw)
    }

    /// Encoded primary key fields, everything after the header.
    pub fn id_bytes(&self) -> &[u8] {
        &self.0[HEADER_LEN..]
    }

    /// Decoded primary key.
    pub fn id(&self) -> Value {
        codec::decode_object_key(&self.0)
            .map(|(_, id)| id)
            .unwrap_or_default()
    }

    /// Key of the reference entry that tracks this object's index entries.
    pub fn reference_key(&self) -> Vec<u8> {
        codec::reference_key(&self.0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl AsRef<[u8]> for ObjectKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({}:{})", self.type_tag(), self.id())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl TryFrom<Vec<u8>> for ObjectKey {
    type Error = KeyError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}
