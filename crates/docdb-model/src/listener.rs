use std::any::Any;

use docdb_data::HookResult;
use docdb_types::{Metadata, ObjectKey};

/// A model about to be, or just, written.
#[derive(Clone, Copy)]
pub struct ModelPut<'a> {
    pub key: &'a ObjectKey,
    pub type_name: &'static str,
    pub model: &'a (dyn Any + Send + Sync),
    pub metadata: &'a Metadata,
    /// Size of the serialized body in bytes.
    pub size: usize,
}

impl<'a> ModelPut<'a> {
    /// The model, if it is an `M`.
    pub fn model_as<M: 'static>(&self) -> Option<&'a M> {
        self.model.downcast_ref()
    }
}

/// A model about to be, or just, deleted.
#[derive(Clone, Copy)]
pub struct ModelDelete<'a> {
    pub key: &'a ObjectKey,
    pub type_name: &'static str,
    /// The stored model at the time of the delete, if there was one.
    pub model: Option<&'a (dyn Any + Send + Sync)>,
}

impl<'a> ModelDelete<'a> {
    pub fn model_as<M: 'static>(&self) -> Option<&'a M> {
        self.model.and_then(|model| model.downcast_ref())
    }
}

/// Observer of writes on a [`ModelDb`](crate::ModelDb).
///
/// `will_*` callbacks run before the write and may veto it by returning an
/// error; `did_*` callbacks run after it committed and after the identity
/// cache was updated. Implementations that only care about one type filter
/// with [`ModelPut::model_as`].
pub trait ModelListener: Send + Sync {
    fn will_put(&self, _event: &ModelPut<'_>) -> HookResult {
        Ok(())
    }

    fn did_put(&self, _event: &ModelPut<'_>) -> HookResult {
        Ok(())
    }

    fn will_delete(&self, _event: &ModelDelete<'_>) -> HookResult {
        Ok(())
    }

    fn did_delete(&self, _event: &ModelDelete<'_>) -> HookResult {
        Ok(())
    }
}
