use crate::error::{ModelError, ModelResult};
use crate::model::Model;

/// Encoding of model bodies.
pub trait Serializer: Send + Sync {
    fn serialize<M: Model>(&self, model: &M) -> ModelResult<Vec<u8>>;

    fn deserialize<M: Model>(&self, bytes: &[u8]) -> ModelResult<M>;
}

fn failure<M: Model>(reason: impl ToString) -> ModelError {
    ModelError::Serialization {
        type_name: M::TYPE_NAME,
        reason: reason.to_string(),
    }
}

/// Compact binary encoding. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct BincodeSerializer;

impl Serializer for BincodeSerializer {
    fn serialize<M: Model>(&self, model: &M) -> ModelResult<Vec<u8>> {
        bincode::serialize(model).map_err(failure::<M>)
    }

    fn deserialize<M: Model>(&self, bytes: &[u8]) -> ModelResult<M> {
        bincode::deserialize(bytes).map_err(failure::<M>)
    }
}

/// JSON encoding, handy when the store is inspected by other tools.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize<M: Model>(&self, model: &M) -> ModelResult<Vec<u8>> {
        serde_json::to_vec(model).map_err(failure::<M>)
    }

    fn deserialize<M: Model>(&self, bytes: &[u8]) -> ModelResult<M> {
        serde_json::from_slice(bytes).map_err(failure::<M>)
    }
}
