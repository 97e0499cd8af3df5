//! Persistent assignment of type tags to model type names.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use docdb_store::{KeyRange, OrderedStore};
use docdb_types::{codec, TypeTag};
use tracing::{debug, info};

use crate::error::{ModelError, ModelResult};

/// Tags are handed out densely from 1 and never reused.
///
/// A fresh assignment lives only in memory until a write carries its entry
/// into the store, so reads and vetoed writes leave no trace.
pub(crate) struct TypeTable {
    tags: Mutex<HashMap<String, Assigned>>,
}

#[derive(Clone, Copy)]
struct Assigned {
    tag: TypeTag,
    persisted: bool,
}

fn decode_tag(key: &[u8], value: &[u8]) -> ModelResult<TypeTag> {
    let raw: [u8; 4] = value.try_into().map_err(|_| ModelError::CorruptTypeTable {
        key: String::from_utf8_lossy(key).into_owned(),
        reason: format!("expected 4 tag bytes, found {}", value.len()),
    })?;
    Ok(TypeTag::from_be_bytes(raw))
}

impl TypeTable {
    /// Read every persisted assignment.
    pub(crate) fn load(store: &dyn OrderedStore) -> ModelResult<Self> {
        let mut tags = HashMap::new();
        let mut iter = store.iter(KeyRange::prefixed(codec::family_prefix(codec::TYPE_MARKER)))?;
        iter.seek_to_first();
        while let (Some(key), Some(value)) = (iter.key(), iter.value()) {
            let name = codec::decode_type_key(key)?;
            let tag = decode_tag(key, value)?;
            tags.insert(name, Assigned { tag, persisted: true });
            iter.next();
        }
        Ok(Self {
            tags: Mutex::new(tags),
        })
    }

    fn tags(&self) -> MutexGuard<'_, HashMap<String, Assigned>> {
        self.tags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tag of `type_name`, assigning a fresh one on first use.
    pub(crate) fn tag_of(&self, type_name: &str) -> ModelResult<TypeTag> {
        let mut tags = self.tags();
        if let Some(assigned) = tags.get(type_name) {
            return Ok(assigned.tag);
        }
        codec::type_key(type_name)?;
        let next = tags
            .values()
            .map(|assigned| assigned.tag.get())
            .max()
            .unwrap_or(0)
            .checked_add(1)
            .ok_or(ModelError::TypeTableFull)?;
        let tag = TypeTag::new(next);
        tags.insert(
            type_name.to_string(),
            Assigned {
                tag,
                persisted: false,
            },
        );
        info!(type_name, tag = tag.get(), "assigned type tag");
        Ok(tag)
    }

    /// The store entry recording `type_name`'s tag, if it is not there yet.
    pub(crate) fn pending_entry(&self, type_name: &str) -> ModelResult<Option<(Vec<u8>, Vec<u8>)>> {
        let tag = self.tag_of(type_name)?;
        if self.is_persisted(type_name) {
            return Ok(None);
        }
        Ok(Some((codec::type_key(type_name)?, tag.to_be_bytes().to_vec())))
    }

    fn is_persisted(&self, type_name: &str) -> bool {
        self.tags()
            .get(type_name)
            .is_some_and(|assigned| assigned.persisted)
    }

    /// Record that a committed write carried `type_name`'s entry.
    pub(crate) fn mark_persisted(&self, type_name: &str) {
        if let Some(assigned) = self.tags().get_mut(type_name) {
            if !assigned.persisted {
                debug!(type_name, tag = assigned.tag.get(), "type tag persisted");
            }
            assigned.persisted = true;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tags().len()
    }
}
