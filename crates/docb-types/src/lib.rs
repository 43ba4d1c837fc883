//! Foundation types for the docb incremental build engine.
//!
//! Every other docb crate depends on `docb-types`.
//!
//! # Key Types
//!
//! - [`ObjectHash`] -- Content-addressed identifier (BLAKE3 hash)
//! - [`ObjectType`] -- Closed set of artifact kinds held in the object store
//! - [`Object`] -- An immutable blob plus its store-managed [`ObjectMetadata`]
//! - [`MetaValue`] / [`Metadata`] -- Typed custom metadata bag
//! - [`BuildId`] -- Identifier of one build (UUID v7 by default)

pub mod build;
pub mod error;
pub mod hash;
pub mod metadata;
pub mod object;

pub use build::BuildId;
pub use error::TypeError;
pub use hash::ObjectHash;
pub use metadata::{MetaValue, Metadata};
pub use object::{Object, ObjectMetadata, ObjectType};
