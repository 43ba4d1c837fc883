//! Incremental-build caches for the docb build engine.
//!
//! Two granularities sit on top of the object store:
//!
//! - [`BuildCache`] answers "has a build with exactly this [`BuildSignature`]
//!   already been produced?" and hands back the cached output location.
//! - [`StageCache`] answers the same question per repository and per stage
//!   (clone, discovery, transform), keyed by the repository's content hash.
//!
//! When one repository changes, the build signature changes and the whole-build
//! cache misses, but the stage cache still lets every other repository skip its
//! clone, discovery, and transform work.
//!
//! Lookups that hit a storage error return that error. A miss is only reported
//! after the store answered successfully and nothing matched.

pub mod build_cache;
pub mod error;
pub mod manifest;
pub mod repo;
pub mod signature;
pub mod stage_cache;

pub use build_cache::BuildCache;
pub use error::{CacheError, CacheResult};
pub use manifest::{BuildManifest, CachedBuild};
pub use repo::{compute_content_hash, RepoHash};
pub use signature::{BuildSignature, SignatureBuilder};
pub use stage_cache::{CacheHit, DocFile, StageCache};

/// Custom-metadata keys written by the caches.
pub mod keys {
    pub const SIGNATURE: &str = "signature";
    pub const BUILD_ID: &str = "build_id";
    pub const OUTPUT_PATH: &str = "output_path";
    pub const REPO_NAME: &str = "repo_name";
    pub const REPO_HASH: &str = "repo_hash";
    pub const TRANSFORM: &str = "transform";
    pub const CLONE_PATH: &str = "clone_path";
}
