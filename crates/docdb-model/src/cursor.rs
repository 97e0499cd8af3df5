use std::cell::OnceCell;
use std::fmt;

use docdb_data::DataCursor;
use docdb_types::ObjectKey;

use crate::cache::ReadOptions;
use crate::db::ModelDb;
use crate::error::ModelResult;
use crate::model::{Key, Model, SizedModel};
use crate::serializer::{BincodeSerializer, Serializer};

/// Cursor yielding typed keys and decoded models.
///
/// The key and model at the current position are decoded on first access
/// and kept until the cursor moves. Models come from the identity cache when
/// present.
pub struct ModelCursor<'db, M, S = BincodeSerializer> {
    db: &'db ModelDb<S>,
    cursor: DataCursor,
    epoch: u64,
    options: ReadOptions,
    key: OnceCell<Key<M>>,
    model: OnceCell<SizedModel<M>>,
}

impl<'db, M: Model, S: Serializer> ModelCursor<'db, M, S> {
    pub(crate) fn new(db: &'db ModelDb<S>, cursor: DataCursor, epoch: u64) -> Self {
        Self {
            db,
            cursor,
            epoch,
            options: ReadOptions::default(),
            key: OnceCell::new(),
            model: OnceCell::new(),
        }
    }

    /// Use `options` for every model this cursor decodes from now on.
    pub fn with_options(mut self, options: ReadOptions) -> Self {
        self.options = options;
        self.reset();
        self
    }

    pub fn is_valid(&self) -> bool {
        self.cursor.is_valid()
    }

    pub fn next(&mut self) {
        self.cursor.next();
        self.reset();
    }

    pub fn prev(&mut self) {
        self.cursor.prev();
        self.reset();
    }

    pub fn seek_to_first(&mut self) {
        self.cursor.seek_to_first();
        self.reset();
    }

    pub fn seek_to_last(&mut self) {
        self.cursor.seek_to_last();
        self.reset();
    }

    /// Jump to a position previously read from
    /// [`transient_seek_key`](Self::transient_seek_key).
    pub fn seek_to(&mut self, target: &[u8]) {
        self.cursor.seek_to(target);
        self.reset();
    }

    /// Drop the decoded key and model so the next access re-derives them.
    pub fn reset(&mut self) {
        self.key.take();
        self.model.take();
        self.cursor.reset();
    }

    /// Typed key of the document at the current position.
    pub fn key(&self) -> ModelResult<&Key<M>> {
        if let Some(key) = self.key.get() {
            return Ok(key);
        }
        let raw = ObjectKey::from_bytes(self.cursor.transient_key()?)?;
        Ok(self.key.get_or_init(|| Key::from_object_key(raw)))
    }

    /// Decoded model at the current position.
    pub fn model(&self) -> ModelResult<&SizedModel<M>> {
        if let Some(model) = self.model.get() {
            return Ok(model);
        }
        let key = self.key()?;
        let cache_key = (key.type_tag(), key.id());
        let sized = match self.db.cached::<M>(&cache_key, self.options) {
            Some(hit) => hit,
            None => {
                let body = self.cursor.transient_value()?;
                self.db
                    .materialize(cache_key, body, self.epoch, self.options)?
            }
        };
        Ok(self.model.get_or_init(|| sized))
    }

    /// Raw store key of the current entry, usable with
    /// [`seek_to`](Self::seek_to).
    pub fn transient_seek_key(&self) -> ModelResult<&[u8]> {
        Ok(self.cursor.transient_seek_key()?)
    }

    /// The byte-level cursor underneath.
    pub fn data(&self) -> &DataCursor {
        &self.cursor
    }

    /// Decode every remaining model, consuming the cursor.
    pub fn collect_models(mut self) -> ModelResult<Vec<SizedModel<M>>> {
        let mut models = Vec::new();
        while self.is_valid() {
            models.push(self.model()?.clone());
            self.next();
        }
        Ok(models)
    }

    /// Release the cursor.
    pub fn close(self) {
        self.cursor.close();
    }
}

impl<M, S> fmt::Debug for ModelCursor<'_, M, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelCursor")
            .field("cursor", &self.cursor)
            .field("options", &self.options)
            .finish()
    }
}
