//! Byte-level document engine for DocDB.
//!
//! [`DataDb`] stores opaque document bodies under [`ObjectKey`]s and keeps
//! their secondary indexes consistent. Every mutation goes through one
//! protocol:
//!
//! 1. **Anticipate** -- listeners' `will_*` callbacks and the caller's
//!    anticipate hooks run under the write lock, before anything changes.
//!    Any error aborts the write.
//! 2. **Commit** -- the document, its index entries and its reference entry
//!    are written in one atomic store batch.
//! 3. **Notify** -- react hooks and listeners' `did_*` callbacks run after
//!    the lock is released. Their errors are collected and reported, but
//!    the write stands.
//!
//! # Key Types
//!
//! - [`DataDb`] -- the engine handle
//! - [`DataCursor`] -- bidirectional cursor over objects or index entries
//! - [`DataBatch`] -- buffered mutations applied atomically
//! - [`WriteOptions`] -- per-write hooks and durability flag
//! - [`DataListener`] -- observer of every committed write
//!
//! [`ObjectKey`]: docdb_types::ObjectKey

pub mod batch;
pub mod config;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod listener;
pub mod options;
pub mod protocol;

pub use batch::DataBatch;
pub use config::DataConfig;
pub use cursor::DataCursor;
pub use engine::DataDb;
pub use error::{DataError, DataResult, ListenerErrors};
pub use listener::{DataListener, ListenerId, ListenerRegistry, PutEvent};
pub use options::{CommitHook, Hook, HookResult, WriteOptions};
pub use protocol::WritePhase;
