use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::RwLock;

use docb_types::{BuildId, Object, ObjectHash, ObjectType};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};
use crate::gc::GcReport;
use crate::traits::{
    prepare_insert, record_duplicate, validate_build_id, ObjectStore, StoreStats,
};

/// In-memory, HashMap-based object store.
///
/// Intended for tests and embedding. Objects and build references live behind
/// separate `RwLock`s; objects are cloned on the way in and on the way out.
pub struct InMemoryObjectStore {
    objects: RwLock<HashMap<ObjectHash, Object>>,
    build_refs: RwLock<BTreeMap<BuildId, Vec<ObjectHash>>>,
}

impl InMemoryObjectStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            build_refs: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of distinct objects currently stored.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.objects.read()?.len())
    }

    /// Returns `true` if the store holds no objects.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put(&self, object: &Object) -> StoreResult<ObjectHash> {
        let hash = object.content_hash();
        let mut map = self.objects.write()?;
        match map.get_mut(&hash) {
            Some(existing) => {
                record_duplicate(existing);
                debug!(
                    hash = %hash.short_hex(),
                    ref_count = existing.metadata.ref_count,
                    "deduplicated put"
                );
            }
            None => {
                let stored = prepare_insert(object);
                debug!(hash = %hash.short_hex(), kind = %stored.object_type, size = stored.size, "stored object");
                map.insert(hash, stored);
            }
        }
        Ok(hash)
    }

    fn get(&self, hash: &ObjectHash) -> StoreResult<Object> {
        let map = self.objects.read()?;
        map.get(hash).cloned().ok_or(StoreError::NotFound(*hash))
    }

    fn exists(&self, hash: &ObjectHash) -> StoreResult<bool> {
        Ok(self.objects.read()?.contains_key(hash))
    }

    fn delete(&self, hash: &ObjectHash) -> StoreResult<()> {
        let mut map = self.objects.write()?;
        map.remove(hash).map(|_| ()).ok_or(StoreError::NotFound(*hash))
    }

    fn list(&self, filter: Option<ObjectType>) -> StoreResult<Vec<ObjectHash>> {
        let map = self.objects.read()?;
        let mut hashes: Vec<ObjectHash> = map
            .values()
            .filter(|obj| filter.map_or(true, |t| obj.object_type == t))
            .map(|obj| obj.hash)
            .collect();
        hashes.sort();
        Ok(hashes)
    }

    fn touch(&self, hash: &ObjectHash) -> StoreResult<()> {
        let mut map = self.objects.write()?;
        let obj = map.get_mut(hash).ok_or(StoreError::NotFound(*hash))?;
        obj.metadata.last_accessed = chrono::Utc::now();
        Ok(())
    }

    fn add_build_ref(&self, build: &BuildId, hashes: &[ObjectHash]) -> StoreResult<()> {
        validate_build_id(build)?;
        let mut refs = self.build_refs.write()?;
        let entry = refs.entry(build.clone()).or_default();
        for hash in hashes {
            if !entry.contains(hash) {
                entry.push(*hash);
            }
        }
        debug!(build = %build, count = entry.len(), "recorded build references");
        Ok(())
    }

    fn get_build_ref(&self, build: &BuildId) -> StoreResult<Vec<ObjectHash>> {
        let refs = self.build_refs.read()?;
        refs.get(build)
            .cloned()
            .ok_or_else(|| StoreError::BuildRefNotFound(build.clone()))
    }

    fn remove_build_ref(&self, build: &BuildId) -> StoreResult<()> {
        let mut refs = self.build_refs.write()?;
        refs.remove(build)
            .map(|_| ())
            .ok_or_else(|| StoreError::BuildRefNotFound(build.clone()))
    }

    fn build_ids(&self) -> StoreResult<Vec<BuildId>> {
        Ok(self.build_refs.read()?.keys().cloned().collect())
    }

    fn gc(&self, live: &HashSet<ObjectHash>) -> StoreResult<GcReport> {
        let mut map = self.objects.write()?;
        let mut report = GcReport {
            scanned: map.len(),
            ..Default::default()
        };
        map.retain(|hash, obj| {
            if live.contains(hash) {
                true
            } else {
                report.record_removal(*hash, obj.size);
                false
            }
        });
        let report = report.finish();
        info!(
            scanned = report.scanned,
            removed = report.removed,
            bytes_freed = report.bytes_freed,
            "garbage collection complete"
        );
        Ok(report)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let map = self.objects.read()?;
        let builds = self.build_refs.read()?.len();
        Ok(StoreStats {
            objects: map.len(),
            total_bytes: map.values().map(|obj| obj.size).sum(),
            builds,
        })
    }
}

impl std::fmt::Debug for InMemoryObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryObjectStore")
            .field("object_count", &self.len())
            .finish()
    }
}
