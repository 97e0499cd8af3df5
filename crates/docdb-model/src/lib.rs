//! Typed document layer for DocDB.
//!
//! [`ModelDb`] maps Rust types onto the byte-level [`DataDb`]. Each type
//! implementing [`Model`] gets a compact [`TypeTag`](docdb_types::TypeTag)
//! the first time it is used; the assignment is persisted in the store so
//! it survives a reopen. Bodies are encoded by a pluggable [`Serializer`].
//!
//! Decoded models are shared through an identity cache: two reads of the
//! same unchanged document return the same `Arc`. Writes update the cache
//! after they commit and before listeners hear about them.
//!
//! # Key Types
//!
//! - [`ModelDb`] -- the typed handle
//! - [`Key`] -- typed wrapper around an object key
//! - [`ModelCursor`] -- cursor yielding decoded models
//! - [`ModelBatch`] -- buffered typed writes
//! - [`ModelListener`] -- observer of typed writes
//!
//! [`DataDb`]: docdb_data::DataDb

pub mod batch;
pub mod cache;
pub mod config;
pub mod cursor;
pub mod db;
pub mod error;
pub mod listener;
pub mod model;
pub mod serializer;
mod types;

pub use batch::ModelBatch;
pub use cache::{CacheMode, ModelCache, ReadOptions};
pub use config::ModelConfig;
pub use cursor::ModelCursor;
pub use db::ModelDb;
pub use error::{ModelError, ModelResult};
pub use listener::{ModelDelete, ModelListener, ModelPut};
pub use model::{Key, Model, SizedModel};
pub use serializer::{BincodeSerializer, JsonSerializer, Serializer};

pub use docdb_data::{WriteOptions, WritePhase};
pub use docdb_types::{Metadata, Value};
