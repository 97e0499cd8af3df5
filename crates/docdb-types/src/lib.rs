//! Foundation types for DocDB.
//!
//! DocDB stores typed documents in an ordered key-value store. This crate
//! defines the identifiers and the byte layout every other DocDB crate relies
//! on. Nothing here touches storage.
//!
//! # Key Types
//!
//! - [`TypeTag`] -- Compact numeric identifier of a stored document type
//! - [`Value`] -- Composite value made of ordered byte fields
//! - [`ObjectKey`] -- Encoded storage key of one document
//! - [`Metadata`] -- Secondary index names mapped to the values they index
//! - [`codec`] -- Object, index, reference, and type-table key layouts

pub mod codec;
pub mod error;
pub mod key;
pub mod metadata;
pub mod tag;
pub mod value;

pub use codec::IndexKeyParts;
pub use error::KeyError;
pub use key::ObjectKey;
pub use metadata::Metadata;
pub use tag::TypeTag;
pub use value::Value;
