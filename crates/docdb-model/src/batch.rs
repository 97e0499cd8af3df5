use std::cell::OnceCell;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use docdb_data::{DataBatch, DataError, WriteOptions};
use docdb_types::{Metadata, ObjectKey};
use tracing::debug;

use crate::cache::{AnyModel, CacheKey};
use crate::db::ModelDb;
use crate::error::ModelResult;
use crate::listener::{ModelDelete, ModelPut};
use crate::model::{Key, Model};
use crate::serializer::{BincodeSerializer, Serializer};

/// Looks up the model stored under a key, typed by the buffered operation.
type Resolver<S> = fn(&ModelDb<S>, &ObjectKey) -> Option<AnyModel>;

enum Pending<S> {
    Put {
        key: ObjectKey,
        type_name: &'static str,
        model: AnyModel,
        metadata: Metadata,
        size: usize,
    },
    Delete {
        key: ObjectKey,
        type_name: &'static str,
        resolve: Resolver<S>,
    },
}

impl<S> Pending<S> {
    fn key(&self) -> &ObjectKey {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } => key,
        }
    }

    fn cache_key(&self) -> CacheKey {
        let key = self.key();
        (key.type_tag(), key.id())
    }
}

#[derive(Clone, Copy)]
enum Event<'a> {
    Put(ModelPut<'a>),
    Delete(ModelDelete<'a>),
}

/// Listener view of `op`. Deletes carry whatever `stored` was resolved to.
fn event<'a, S>(op: &'a Pending<S>, stored: &'a OnceCell<Option<AnyModel>>) -> Event<'a> {
    match op {
        Pending::Put {
            key,
            type_name,
            model,
            metadata,
            size,
        } => Event::Put(ModelPut {
            key,
            type_name,
            model: &**model,
            metadata,
            size: *size,
        }),
        Pending::Delete { key, type_name, .. } => Event::Delete(ModelDelete {
            key,
            type_name,
            model: stored.get().and_then(|model| model.as_deref()),
        }),
    }
}

/// Resolve the model each delete removes, seeing earlier puts in the batch.
fn resolve_deletes<S>(db: &ModelDb<S>, ops: &[(&Pending<S>, &OnceCell<Option<AnyModel>>)]) {
    let mut shadow: HashMap<&[u8], Option<AnyModel>> = HashMap::new();
    for (op, stored) in ops {
        match op {
            Pending::Put { key, model, .. } => {
                shadow.insert(key.as_bytes(), Some(Arc::clone(model)));
            }
            Pending::Delete { key, resolve, .. } => {
                let current = match shadow.insert(key.as_bytes(), None) {
                    Some(current) => current,
                    None => resolve(db, key),
                };
                let _ = stored.set(current);
            }
        }
    }
}

/// Buffered typed writes applied atomically by [`ModelBatch::write`].
///
/// Models are serialized as they are added. Nothing reaches the store or the
/// identity cache until `write` commits; the cache is updated under the same
/// write lock as the store.
pub struct ModelBatch<'db, S = BincodeSerializer> {
    db: &'db ModelDb<S>,
    data: DataBatch<'db>,
    pending: Mutex<Vec<Pending<S>>>,
}

impl<'db, S: Serializer> ModelBatch<'db, S> {
    pub(crate) fn new(db: &'db ModelDb<S>) -> Self {
        Self {
            db,
            data: db.data().new_batch(),
            pending: Mutex::new(Vec::new()),
        }
    }

    fn pending(&self) -> MutexGuard<'_, Vec<Pending<S>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Buffer a put of `model`.
    pub fn put<M: Model>(&self, model: Arc<M>) -> ModelResult<Key<M>> {
        let key = self.db.key_from(&*model)?;
        let body = self.db.serializer().serialize(&*model)?;
        let metadata = model.indexes();

        let mut pending = self.pending();
        self.data.put(key.object_key(), &body, &metadata);
        pending.push(Pending::Put {
            key: key.object_key().clone(),
            type_name: M::TYPE_NAME,
            model,
            metadata,
            size: body.len(),
        });
        Ok(key)
    }

    pub fn put_value<M: Model>(&self, model: M) -> ModelResult<Key<M>> {
        self.put(Arc::new(model))
    }

    /// Buffer a delete of `key`. The removed model is looked up only when
    /// the batch is written, and only for listeners.
    pub fn delete<M: Model>(&self, key: &Key<M>) -> ModelResult<()> {
        let mut pending = self.pending();
        self.data.delete(key.object_key());
        pending.push(Pending::Delete {
            key: key.object_key().clone(),
            type_name: M::TYPE_NAME,
            resolve: ModelDb::<S>::stored_model::<M>,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.pending().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending().is_empty()
    }

    /// Discard everything buffered so far.
    pub fn clear(&self) {
        let mut pending = self.pending();
        self.data.clear();
        pending.clear();
    }

    /// Apply every buffered operation in one atomic write.
    ///
    /// Listeners hear about each operation in order. On success the batch is
    /// emptied; a vetoed or failed write leaves it as it was.
    pub fn write(&self, options: WriteOptions<'_>) -> ModelResult<()> {
        let mut pending = self.pending();
        let listeners = self.db.listener_snapshot();
        let result = {
            let resolved: Vec<OnceCell<Option<AnyModel>>> =
                pending.iter().map(|_| OnceCell::new()).collect();
            let ops: Vec<(&Pending<S>, &OnceCell<Option<AnyModel>>)> =
                pending.iter().zip(&resolved).collect();
            let cache_updates: Vec<(CacheKey, Option<AnyModel>, usize)> = pending
                .iter()
                .map(|op| match op {
                    Pending::Put { model, size, .. } => {
                        (op.cache_key(), Some(Arc::clone(model)), *size)
                    }
                    Pending::Delete { .. } => (op.cache_key(), None, 0),
                })
                .collect();

            let mut internal = WriteOptions::new();
            let type_names: BTreeSet<&'static str> = pending
                .iter()
                .filter_map(|op| match op {
                    Pending::Put { type_name, .. } => Some(*type_name),
                    Pending::Delete { .. } => None,
                })
                .collect();
            for type_name in type_names {
                internal = self.db.type_entry(type_name)?.after(internal);
            }

            let db = self.db;
            if !listeners.is_empty() {
                let ops = &ops;
                internal = internal.anticipate(move || {
                    resolve_deletes(db, ops);
                    Ok(())
                });
            }
            for &(op, stored) in &ops {
                for listener in &listeners {
                    internal = internal.anticipate(move || match event(op, stored) {
                        Event::Put(put) => listener.will_put(&put),
                        Event::Delete(delete) => listener.will_delete(&delete),
                    });
                }
            }
            let cache = db.cache();
            internal = internal.on_commit(move || {
                for (key, model, size) in cache_updates {
                    match model {
                        Some(model) => cache.put(key, model, size),
                        None => cache.invalidate(&key),
                    }
                }
            });
            for &(op, stored) in &ops {
                for listener in &listeners {
                    internal = internal.react(move || match event(op, stored) {
                        Event::Put(put) => listener.did_put(&put),
                        Event::Delete(delete) => listener.did_delete(&delete),
                    });
                }
            }

            debug!(ops = ops.len(), "writing model batch");
            self.data.write(options.after(internal))
        };
        if matches!(result, Ok(()) | Err(DataError::ListenerFailure(_))) {
            pending.clear();
        }
        Ok(result?)
    }
}

impl<S: Serializer> fmt::Debug for ModelBatch<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelBatch")
            .field("pending", &*self.pending())
            .finish()
    }
}

impl<S> fmt::Debug for Pending<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put { key, type_name, .. } => write!(f, "Put({type_name} {key:?})"),
            Self::Delete { key, type_name, .. } => write!(f, "Delete({type_name} {key:?})"),
        }
    }
}
