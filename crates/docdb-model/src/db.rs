use std::any::Any;
use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use docdb_data::{DataCursor, DataDb, DataResult, ListenerId, ListenerRegistry, WriteOptions};
use docdb_store::OrderedStore;
use docdb_types::{ObjectKey, TypeTag, Value};
use tracing::{debug, info, warn};

use crate::batch::ModelBatch;
use crate::cache::{AnyModel, CacheKey, CacheMode, ModelCache, ReadOptions};
use crate::config::ModelConfig;
use crate::cursor::ModelCursor;
use crate::error::ModelResult;
use crate::listener::{ModelDelete, ModelListener, ModelPut};
use crate::model::{Key, Model, SizedModel};
use crate::serializer::{BincodeSerializer, Serializer};
use crate::types::TypeTable;

/// Typed document database.
///
/// Wraps a [`DataDb`] and adds type tags, serialization, the identity cache
/// and model-level listeners. All methods take `&self`; the handle can be
/// shared between threads.
pub struct ModelDb<S = BincodeSerializer> {
    data: DataDb,
    serializer: S,
    cache: ModelCache,
    types: TypeTable,
    listeners: ListenerRegistry<dyn ModelListener>,
}

impl ModelDb<BincodeSerializer> {
    /// Open a database over `store` with the default binary serializer.
    pub fn open(store: Arc<dyn OrderedStore>, config: ModelConfig) -> ModelResult<Self> {
        Self::open_with(store, config, BincodeSerializer)
    }
}

impl<S: Serializer> ModelDb<S> {
    /// Open a database over `store` with a custom serializer.
    pub fn open_with(
        store: Arc<dyn OrderedStore>,
        config: ModelConfig,
        serializer: S,
    ) -> ModelResult<Self> {
        let types = TypeTable::load(store.as_ref())?;
        info!(
            cache_capacity = config.cache_capacity,
            known_types = types.len(),
            "model database opened"
        );
        Ok(Self {
            data: DataDb::open(store, config.data),
            serializer,
            cache: ModelCache::new(config.cache_capacity),
            types,
            listeners: ListenerRegistry::new(),
        })
    }

    /// The byte-level engine underneath.
    pub fn data(&self) -> &DataDb {
        &self.data
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub fn serializer(&self) -> &S {
        &self.serializer
    }

    /// Tag assigned to `M`, assigning one on first use.
    ///
    /// The assignment reaches the store with the first write of an `M`.
    pub fn type_tag<M: Model>(&self) -> ModelResult<TypeTag> {
        self.types.tag_of(M::TYPE_NAME)
    }

    // -- keys ---------------------------------------------------------------

    /// Key of the `M` with primary key `id`.
    pub fn key_of<M: Model>(&self, id: impl Into<Value>) -> ModelResult<Key<M>> {
        let key = ObjectKey::new(self.type_tag::<M>()?, &id.into())?;
        Ok(Key::from_object_key(key))
    }

    /// Key under which `model` is (or would be) stored.
    pub fn key_from<M: Model>(&self, model: &M) -> ModelResult<Key<M>> {
        self.key_of(model.id())
    }

    // -- listeners ----------------------------------------------------------

    /// Add a listener. It sees every write that starts after this call.
    pub fn register(&self, listener: Arc<dyn ModelListener>) -> ListenerId {
        self.listeners.register(listener)
    }

    pub fn unregister(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    pub(crate) fn listener_snapshot(&self) -> Vec<Arc<dyn ModelListener>> {
        self.listeners.snapshot()
    }

    // -- reads --------------------------------------------------------------

    pub fn get<M: Model>(&self, key: &Key<M>) -> ModelResult<Option<SizedModel<M>>> {
        self.get_with(key, ReadOptions::default())
    }

    pub fn get_with<M: Model>(
        &self,
        key: &Key<M>,
        options: ReadOptions,
    ) -> ModelResult<Option<SizedModel<M>>> {
        let cache_key = (key.type_tag(), key.id());
        if let Some(hit) = self.cached::<M>(&cache_key, options) {
            return Ok(Some(hit));
        }
        let epoch = self.cache.epoch();
        match self.data.get(key.object_key())? {
            Some(body) => self
                .materialize(cache_key, &body, epoch, options)
                .map(Some),
            None => Ok(None),
        }
    }

    /// Names of the indexes the document under `key` is in.
    pub fn get_indexes_of<M: Model>(&self, key: &Key<M>) -> ModelResult<BTreeSet<String>> {
        Ok(self.data.get_indexes_of(key.object_key())?)
    }

    pub(crate) fn cached<M: Model>(
        &self,
        cache_key: &CacheKey,
        options: ReadOptions,
    ) -> Option<SizedModel<M>> {
        if options.cache != CacheMode::Use {
            return None;
        }
        let (model, size) = self.cache.get(cache_key)?;
        model
            .downcast::<M>()
            .ok()
            .map(|model| SizedModel { model, size })
    }

    /// Decode `body` and record it in the cache as `options` allow.
    pub(crate) fn materialize<M: Model>(
        &self,
        cache_key: CacheKey,
        body: &[u8],
        epoch: u64,
        options: ReadOptions,
    ) -> ModelResult<SizedModel<M>> {
        let model = Arc::new(self.serializer.deserialize::<M>(body)?);
        let size = body.len();
        if options.cache != CacheMode::Skip {
            let shared: AnyModel = model.clone();
            self.cache.insert_if_unchanged(cache_key, shared, size, epoch);
        }
        Ok(SizedModel { model, size })
    }

    // -- finds --------------------------------------------------------------

    /// Every stored `M`, ordered by primary key.
    pub fn find_all_by_type<M: Model>(&self) -> ModelResult<ModelCursor<'_, M, S>> {
        self.cursor(|tag| self.data.find_all_by_type(tag))
    }

    /// `M`s whose primary key starts with `id`.
    pub fn find_by_id<M: Model>(
        &self,
        id: impl Into<Value>,
        is_open: bool,
    ) -> ModelResult<ModelCursor<'_, M, S>> {
        let id = id.into();
        self.cursor(|tag| self.data.find_by_id(tag, &id, is_open))
    }

    /// Every `M` in index `index`, ordered by indexed value.
    pub fn find_all_by_index<M: Model>(&self, index: &str) -> ModelResult<ModelCursor<'_, M, S>> {
        self.cursor(|tag| self.data.find_all_by_index(tag, index))
    }

    /// `M`s whose value in index `index` starts with `value`.
    pub fn find_by_index<M: Model>(
        &self,
        index: &str,
        value: impl Into<Value>,
        is_open: bool,
    ) -> ModelResult<ModelCursor<'_, M, S>> {
        let value = value.into();
        self.cursor(|tag| self.data.find_by_index(tag, index, &value, is_open))
    }

    /// The cache epoch is read before the snapshot is taken, so nothing the
    /// cursor decodes can overwrite a newer cached instance.
    fn cursor<M: Model>(
        &self,
        open: impl FnOnce(TypeTag) -> DataResult<DataCursor>,
    ) -> ModelResult<ModelCursor<'_, M, S>> {
        let tag = self.type_tag::<M>()?;
        let epoch = self.cache.epoch();
        let cursor = open(tag)?;
        Ok(ModelCursor::new(self, cursor, epoch))
    }

    // -- writes -------------------------------------------------------------

    pub fn put<M: Model>(&self, model: Arc<M>) -> ModelResult<Key<M>> {
        self.put_with(model, WriteOptions::new())
    }

    /// Store an owned `model`. The cache keeps the instance moved in here.
    pub fn put_value<M: Model>(&self, model: M) -> ModelResult<Key<M>> {
        self.put(Arc::new(model))
    }

    /// Store `model`, replacing any previous version with the same key.
    ///
    /// Listeners' `will_put` run before the caller's anticipate hooks. The
    /// identity cache takes this exact instance while the write lock is still
    /// held, then listeners' `did_put` and the caller's react hooks run.
    pub fn put_with<M: Model>(
        &self,
        model: Arc<M>,
        options: WriteOptions<'_>,
    ) -> ModelResult<Key<M>> {
        let key = self.key_from(&*model)?;
        let body = self.serializer.serialize(&*model)?;
        let metadata = model.indexes();
        let listeners = self.listeners.snapshot();
        let event = ModelPut {
            key: key.object_key(),
            type_name: M::TYPE_NAME,
            model: &*model as &(dyn Any + Send + Sync),
            metadata: &metadata,
            size: body.len(),
        };

        let mut internal = self.type_entry(M::TYPE_NAME)?;
        for listener in &listeners {
            internal = internal.anticipate(move || listener.will_put(&event));
        }
        let cache_key = (key.type_tag(), key.id());
        let cached: AnyModel = model.clone();
        let size = body.len();
        internal = internal.on_commit(move || self.cache.put(cache_key, cached, size));
        for listener in &listeners {
            internal = internal.react(move || listener.did_put(&event));
        }

        self.data
            .put(key.object_key(), &body, &metadata, options.after(internal))?;
        debug!(type_name = M::TYPE_NAME, key = ?key, "model stored");
        Ok(key)
    }

    /// Options carrying `type_name`'s tag entry if the store lacks it.
    pub(crate) fn type_entry<'a>(&'a self, type_name: &'static str) -> ModelResult<WriteOptions<'a>> {
        let options = WriteOptions::new();
        Ok(match self.types.pending_entry(type_name)? {
            Some((key, value)) => options
                .entry(key, value)
                .on_commit(move || self.types.mark_persisted(type_name)),
            None => options,
        })
    }

    pub fn delete<M: Model>(&self, key: &Key<M>) -> ModelResult<()> {
        self.delete_with(key, WriteOptions::new())
    }

    /// Remove the document under `key`.
    ///
    /// When listeners are registered, the stored model is looked up under
    /// the write lock and handed to them; a body that no longer decodes is
    /// reported as `None` and does not stop the delete.
    pub fn delete_with<M: Model>(&self, key: &Key<M>, options: WriteOptions<'_>) -> ModelResult<()> {
        let listeners = self.listeners.snapshot();
        let stored: OnceCell<Option<AnyModel>> = OnceCell::new();
        let stored = &stored;
        let object_key = key.object_key();
        let event = move || ModelDelete {
            key: object_key,
            type_name: M::TYPE_NAME,
            model: stored.get().and_then(|model| model.as_deref()),
        };

        let mut internal = WriteOptions::new();
        if !listeners.is_empty() {
            internal = internal.anticipate(move || {
                stored.get_or_init(|| self.stored_model::<M>(object_key));
                Ok(())
            });
        }
        for listener in &listeners {
            internal = internal.anticipate(move || listener.will_delete(&event()));
        }
        let cache_key = (key.type_tag(), key.id());
        internal = internal.on_commit(move || self.cache.invalidate(&cache_key));
        for listener in &listeners {
            internal = internal.react(move || listener.did_delete(&event()));
        }

        self.data.delete(object_key, options.after(internal))?;
        debug!(type_name = M::TYPE_NAME, key = ?key, "model deleted");
        Ok(())
    }

    /// The model currently stored under `key`, for delete notifications.
    ///
    /// Uses a cached instance when there is one and never fills the cache.
    pub(crate) fn stored_model<M: Model>(&self, key: &ObjectKey) -> Option<AnyModel> {
        let cache_key = (key.type_tag(), key.id());
        if let Some(hit) = self.cached::<M>(&cache_key, ReadOptions::default()) {
            let model: AnyModel = hit.model;
            return Some(model);
        }
        let body = match self.data.get(key) {
            Ok(body) => body?,
            Err(error) => {
                warn!(type_name = M::TYPE_NAME, %error, "cannot read model being deleted");
                return None;
            }
        };
        match self.serializer.deserialize::<M>(&body) {
            Ok(model) => Some(Arc::new(model)),
            Err(error) => {
                warn!(type_name = M::TYPE_NAME, %error, "cannot decode model being deleted");
                None
            }
        }
    }

    /// Start an empty batch.
    pub fn new_batch(&self) -> ModelBatch<'_, S> {
        ModelBatch::new(self)
    }

    /// Drop every listener and cached model. The store keeps its data.
    pub fn close(self) {
        self.listeners.clear();
        self.cache.clear();
        self.data.close();
        info!("model database closed");
    }
}

impl<S> fmt::Debug for ModelDb<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelDb")
            .field("data", &self.data)
            .field("cache", &self.cache)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
