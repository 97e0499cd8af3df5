//! Ordered key-value storage for DocDB.
//!
//! DocDB lays documents, index entries and bookkeeping records out as
//! byte keys in one lexicographically ordered keyspace. This crate is the
//! only place that talks to the underlying store.
//!
//! # Storage Backends
//!
//! All backends implement the [`OrderedStore`] trait:
//!
//! - [`InMemoryStore`] -- `BTreeMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. A [`WriteBatch`] is applied atomically: readers see all of it or none.
//! 2. Iterators read a consistent snapshot taken when they were opened.
//! 3. The store never interprets keys or values.
//! 4. All backend errors are propagated, never silently ignored.

pub mod batch;
pub mod error;
pub mod memory;
pub mod range;
pub mod traits;

pub use batch::{BatchOp, WriteBatch};
pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use range::{prefix_successor, KeyRange};
pub use traits::{OrderedStore, StoreIterator};
