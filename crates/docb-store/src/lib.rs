//! Content-addressed artifact storage for the docb build engine.
//!
//! Every artifact a build produces or consumes (cloned trees, discovered
//! documentation manifests, transformed content, build manifests) is stored
//! as an immutable [`Object`] identified by the BLAKE3 hash of its bytes.
//!
//! # Storage Backends
//!
//! All backends implement the [`ObjectStore`] trait:
//!
//! - [`InMemoryObjectStore`] -- `HashMap`-based store for tests and embedding
//! - [`FileObjectStore`] -- one file per object, sharded by hash prefix
//!
//! # Design Rules
//!
//! 1. Objects are immutable once written; only the reference count and access
//!    time change afterwards.
//! 2. Writing identical content twice stores it once and bumps its reference
//!    count.
//! 3. Build references form the GC root set; anything outside it may be swept.
//! 4. Every call is atomic on its own. There are no cross-call transactions.
//! 5. All I/O and lock errors are propagated, never silently ignored.
//!
//! [`Object`]: docb_types::Object

pub mod error;
pub mod file;
pub mod gc;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use file::{FileObjectStore, FileStoreConfig};
pub use gc::GcReport;
pub use memory::InMemoryObjectStore;
pub use traits::{ObjectStore, StoreStats};
