use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use docdb_types::{Metadata, ObjectKey, TypeTag, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A document type stored through [`ModelDb`](crate::ModelDb).
///
/// ```
/// use docdb_model::{Metadata, Model, Value};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct City {
///     name: String,
///     postal_code: String,
/// }
///
/// impl Model for City {
///     const TYPE_NAME: &'static str = "City";
///
///     fn id(&self) -> Value {
///         Value::single(&self.postal_code)
///     }
///
///     fn indexes(&self) -> Metadata {
///         Metadata::new().with("name", &self.name)
///     }
/// }
/// ```
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable name under which the type's tag is persisted.
    const TYPE_NAME: &'static str;

    /// Primary key. Fields must not contain 0x00.
    fn id(&self) -> Value;

    /// Secondary index values. Defaults to none.
    fn indexes(&self) -> Metadata {
        Metadata::new()
    }
}

/// Typed handle on a stored document of type `M`.
pub struct Key<M> {
    inner: ObjectKey,
    _model: PhantomData<fn() -> M>,
}

impl<M> Key<M> {
    pub(crate) fn from_object_key(inner: ObjectKey) -> Self {
        Self {
            inner,
            _model: PhantomData,
        }
    }

    pub fn object_key(&self) -> &ObjectKey {
        &self.inner
    }

    pub fn into_object_key(self) -> ObjectKey {
        self.inner
    }

    pub fn type_tag(&self) -> TypeTag {
        self.inner.type_tag()
    }

    pub fn id(&self) -> Value {
        self.inner.id()
    }
}

impl<M> Clone for Key<M> {
    fn clone(&self) -> Self {
        Self::from_object_key(self.inner.clone())
    }
}

impl<M> PartialEq for Key<M> {
    fn eq(&self, other: &Self) -> bool {
        self.inner == other.inner
    }
}

impl<M> Eq for Key<M> {}

impl<M> Hash for Key<M> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.hash(state);
    }
}

impl<M> fmt::Debug for Key<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", self.inner)
    }
}

/// A decoded model together with the size of its stored body.
pub struct SizedModel<M> {
    pub model: Arc<M>,
    pub size: usize,
}

impl<M> Clone for SizedModel<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            size: self.size,
        }
    }
}

impl<M: fmt::Debug> fmt::Debug for SizedModel<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizedModel")
            .field("model", &self.model)
            .field("size", &self.size)
            .finish()
    }
}
