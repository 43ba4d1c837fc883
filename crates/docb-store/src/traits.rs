use std::collections::HashSet;

use docb_types::{BuildId, Object, ObjectHash, ObjectType};

use crate::error::{StoreError, StoreResult};
use crate::gc::GcReport;

/// Aggregate counters for a store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of distinct objects.
    pub objects: usize,
    /// Sum of object sizes in bytes.
    pub total_bytes: u64,
    /// Number of builds with recorded references.
    pub builds: usize,
}

/// Content-addressed, reference-counted object store.
///
/// All implementations must satisfy these invariants:
/// - `put` is idempotent on content: identical bytes resolve to the same hash
///   and bump the existing object's reference count instead of storing a
///   second copy.
/// - Objects are never mutated except for reference count and access time.
/// - `get` returns an owned copy; no caller ever holds a live reference into
///   the store's internal state.
/// - Lookups that fail because of storage trouble return `Err`, never a
///   not-found answer.
pub trait ObjectStore: Send + Sync {
    /// Store an object and return its hash.
    ///
    /// When `object.hash` is null the hash is the digest of `object.data`. A
    /// caller-supplied hash is trusted as-is.
    fn put(&self, object: &Object) -> StoreResult<ObjectHash>;

    /// Read an object by hash. Returns [`StoreError::NotFound`] if absent.
    fn get(&self, hash: &ObjectHash) -> StoreResult<Object>;

    /// Check whether an object exists.
    fn exists(&self, hash: &ObjectHash) -> StoreResult<bool>;

    /// Delete an object. Returns [`StoreError::NotFound`] if absent.
    ///
    /// Intended for garbage collection and administrative repair; deleting an
    /// object that a recorded build references leaves a dangling reference.
    fn delete(&self, hash: &ObjectHash) -> StoreResult<()>;

    /// Hashes of every object, or of every object of one type, ascending.
    fn list(&self, filter: Option<ObjectType>) -> StoreResult<Vec<ObjectHash>>;

    /// Refresh an object's last-accessed time. Caches call this when they
    /// reuse an entry.
    fn touch(&self, hash: &ObjectHash) -> StoreResult<()>;

    /// Record hashes produced or consumed by a build. Appends to any existing
    /// record for the build, skipping hashes it already lists.
    fn add_build_ref(&self, build: &BuildId, hashes: &[ObjectHash]) -> StoreResult<()>;

    /// Hashes recorded for a build, in the order they were first added.
    fn get_build_ref(&self, build: &BuildId) -> StoreResult<Vec<ObjectHash>>;

    /// Drop a build from the root set.
    fn remove_build_ref(&self, build: &BuildId) -> StoreResult<()>;

    /// Every build with recorded references, ascending.
    fn build_ids(&self) -> StoreResult<Vec<BuildId>>;

    /// Delete every object whose hash is not in `live`.
    fn gc(&self, live: &HashSet<ObjectHash>) -> StoreResult<GcReport>;

    /// Object, byte, and build counters.
    fn stats(&self) -> StoreResult<StoreStats>;

    /// Union of all build references.
    fn root_set(&self) -> StoreResult<HashSet<ObjectHash>> {
        let mut live = HashSet::new();
        for build in self.build_ids()? {
            live.extend(self.get_build_ref(&build)?);
        }
        Ok(live)
    }

    /// Sweep everything unreachable from the recorded builds.
    fn collect_garbage(&self) -> StoreResult<GcReport> {
        let live = self.root_set()?;
        self.gc(&live)
    }

    /// Hashes that a `gc(live)` call would delete, without deleting them.
    fn gc_candidates(&self, live: &HashSet<ObjectHash>) -> StoreResult<Vec<ObjectHash>> {
        Ok(self
            .list(None)?
            .into_iter()
            .filter(|h| !live.contains(h))
            .collect())
    }

    /// Read an object, mapping not-found to `None`.
    fn try_get(&self, hash: &ObjectHash) -> StoreResult<Option<Object>> {
        match self.get(hash) {
            Ok(obj) => Ok(Some(obj)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Reject blank build ids before they reach a backend.
pub(crate) fn validate_build_id(build: &BuildId) -> StoreResult<()> {
    if build.is_blank() {
        return Err(StoreError::Validation("build id must not be empty".into()));
    }
    Ok(())
}

/// Normalise an incoming object for first insertion: resolve its hash,
/// recompute its size, and start its bookkeeping at one reference.
pub(crate) fn prepare_insert(object: &Object) -> Object {
    let now = chrono::Utc::now();
    let mut stored = object.clone();
    stored.hash = object.content_hash();
    stored.size = stored.data.len() as u64;
    stored.metadata.created_at = now;
    stored.metadata.last_accessed = now;
    stored.metadata.ref_count = 1;
    stored
}

/// Account for a duplicate `put` of an already-stored object.
pub(crate) fn record_duplicate(existing: &mut Object) {
    existing.metadata.ref_count += 1;
    existing.metadata.last_accessed = chrono::Utc::now();
}
