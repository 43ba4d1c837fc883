//! Hashing primitives for the docb build engine.
//!
//! Provides domain-separated BLAKE3 hashing and a length-prefixed field
//! digest used to derive cache keys. All crypto operations wrap established
//! libraries; no custom cryptography.

pub mod digest;
pub mod hasher;

pub use digest::FieldDigest;
pub use hasher::{ContentHasher, HasherError};
