use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docb_store::{GcReport, ObjectStore};
use docb_types::{BuildId, Object, ObjectHash, ObjectType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CacheError, CacheResult};
use crate::keys;
use crate::manifest::{BuildManifest, CachedBuild};
use crate::signature::BuildSignature;

/// Payload of a build-manifest object.
#[derive(Serialize, Deserialize)]
struct StoredBuild {
    signature: BuildSignature,
    manifest: BuildManifest,
    output_path: PathBuf,
}

/// Whole-build cache over an [`ObjectStore`].
///
/// Lookup is a linear scan over every build-manifest object, newest first.
#[derive(Clone)]
pub struct BuildCache {
    store: Arc<dyn ObjectStore>,
}

impl BuildCache {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Find the most recent build whose signature equals `signature`.
    ///
    /// `Ok(None)` means the store answered and nothing matched. Any storage
    /// failure is returned as an error.
    pub fn should_skip_build(&self, signature: &BuildSignature) -> CacheResult<Option<CachedBuild>> {
        if signature.build_hash.trim().is_empty() {
            return Err(CacheError::validation("signature has an empty build hash"));
        }

        for object in self.manifest_objects()? {
            if !object.custom().str_eq(keys::SIGNATURE, &signature.build_hash) {
                continue;
            }
            let cached = decode(&object)?;
            self.store.touch(&object.hash)?;
            debug!(
                signature = signature.short_hash(),
                build = %cached.build_id,
                hash = %object.hash.short_hex(),
                "whole-build cache hit"
            );
            return Ok(Some(cached));
        }

        debug!(signature = signature.short_hash(), "whole-build cache miss");
        Ok(None)
    }

    /// Store a build manifest and record the build's references.
    ///
    /// The build reference covers the manifest object itself plus every hash
    /// in `manifest.artifacts`.
    pub fn save_build(
        &self,
        signature: &BuildSignature,
        manifest: &BuildManifest,
        output_path: &Path,
    ) -> CacheResult<ObjectHash> {
        if signature.build_hash.trim().is_empty() {
            return Err(CacheError::validation("signature has an empty build hash"));
        }
        if manifest.id.is_blank() {
            return Err(CacheError::validation("manifest has an empty build id"));
        }

        let stored = StoredBuild {
            signature: signature.clone(),
            manifest: manifest.clone(),
            output_path: output_path.to_path_buf(),
        };
        let data =
            serde_json::to_vec(&stored).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let object = Object::new(ObjectType::BuildManifest, data)
            .with_custom(keys::SIGNATURE, signature.build_hash.as_str())
            .with_custom(keys::BUILD_ID, manifest.id.as_str())
            .with_custom(keys::OUTPUT_PATH, output_path.display().to_string());

        let hash = self.store.put(&object)?;
        let mut refs = Vec::with_capacity(manifest.artifacts.len() + 1);
        refs.push(hash);
        refs.extend(manifest.artifacts.iter().copied());
        self.store.add_build_ref(&manifest.id, &refs)?;

        info!(
            build = %manifest.id,
            signature = signature.short_hash(),
            hash = %hash.short_hex(),
            artifacts = manifest.artifacts.len(),
            "saved build"
        );
        Ok(hash)
    }

    /// Every cached build, newest first.
    pub fn list_builds(&self) -> CacheResult<Vec<CachedBuild>> {
        self.manifest_objects()?.iter().map(decode).collect()
    }

    /// Keep the references of the `keep` most recent builds, drop every other
    /// build reference (including builds that never saved a manifest), then
    /// collect garbage over what remains.
    pub fn prune_builds(&self, keep: usize) -> CacheResult<GcReport> {
        let kept: HashSet<BuildId> = self
            .list_builds()?
            .into_iter()
            .take(keep)
            .map(|b| b.build_id)
            .collect();

        let mut dropped = 0usize;
        for build in self.store.build_ids()? {
            if !kept.contains(&build) {
                self.store.remove_build_ref(&build)?;
                dropped += 1;
            }
        }

        let report = self.store.collect_garbage()?;
        info!(keep, kept = kept.len(), dropped, removed = report.removed, "pruned builds");
        Ok(report)
    }

    /// Build-manifest objects sorted by creation time, newest first. Objects
    /// that disappear between listing and reading are skipped.
    fn manifest_objects(&self) -> CacheResult<Vec<Object>> {
        let mut objects = Vec::new();
        for hash in self.store.list(Some(ObjectType::BuildManifest))? {
            if let Some(object) = self.store.try_get(&hash)? {
                objects.push(object);
            }
        }
        objects.sort_by(|a, b| {
            b.metadata
                .created_at
                .cmp(&a.metadata.created_at)
                .then_with(|| a.hash.cmp(&b.hash))
        });
        Ok(objects)
    }
}

fn decode(object: &Object) -> CacheResult<CachedBuild> {
    let stored: StoredBuild =
        serde_json::from_slice(&object.data).map_err(|e| CacheError::Corrupt {
            hash: object.hash,
            reason: e.to_string(),
        })?;
    Ok(CachedBuild {
        build_id: stored.manifest.id.clone(),
        output_path: stored.output_path,
        signature: stored.signature,
        created_at: object.metadata.created_at,
        manifest: stored.manifest,
        hash: object.hash,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::RepoHash;
    use docb_store::InMemoryObjectStore;

    fn cache() -> (Arc<InMemoryObjectStore>, BuildCache) {
        let store = Arc::new(InMemoryObjectStore::new());
        (store.clone(), BuildCache::new(store))
    }

    fn signature(content: &str) -> BuildSignature {
        BuildSignature::builder()
            .repo(RepoHash::new("alpha", "c1", content))
            .theme("hextra", "1")
            .build()
            .unwrap()
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    #[test]
    fn save_then_skip_roundtrip() {
        let (_, cache) = cache();
        let sig = signature("aaaa");
        let manifest = BuildManifest::new(BuildId::new("build-1")).with_doc_count(3);
        let hash = cache.save_build(&sig, &manifest, Path::new("/out/1")).unwrap();

        let hit = cache.should_skip_build(&sig).unwrap().unwrap();
        assert_eq!(hit.build_id, manifest.id);
        assert_eq!(hit.output_path, PathBuf::from("/out/1"));
        assert_eq!(hit.hash, hash);
        assert_eq!(hit.manifest.doc_count, 3);
        assert_eq!(hit.signature, sig);
    }

    #[test]
    fn unseen_signature_misses() {
        let (_, cache) = cache();
        let manifest = BuildManifest::new(BuildId::new("build-1"));
        cache
            .save_build(&signature("aaaa"), &manifest, Path::new("/out"))
            .unwrap();
        assert!(cache.should_skip_build(&signature("bbbb")).unwrap().is_none());
    }

    #[test]
    fn empty_store_misses() {
        let (_, cache) = cache();
        assert!(cache.should_skip_build(&signature("aaaa")).unwrap().is_none());
    }

    #[test]
    fn newest_matching_build_wins() {
        let (_, cache) = cache();
        let sig = signature("aaaa");
        cache
            .save_build(&sig, &BuildManifest::new(BuildId::new("old")), Path::new("/old"))
            .unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        cache
            .save_build(&sig, &BuildManifest::new(BuildId::new("new")), Path::new("/new"))
            .unwrap();
        let hit = cache.should_skip_build(&sig).unwrap().unwrap();
        assert_eq!(hit.build_id.as_str(), "new");
    }

    #[test]
    fn hit_refreshes_last_accessed() {
        let (store, cache) = cache();
        let sig = signature("aaaa");
        let hash = cache
            .save_build(&sig, &BuildManifest::new(BuildId::new("b")), Path::new("/o"))
            .unwrap();
        let before = store.get(&hash).unwrap().metadata.last_accessed;
        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.should_skip_build(&sig).unwrap().unwrap();
        let after = store.get(&hash).unwrap().metadata.last_accessed;
        assert!(after > before);
    }

    #[test]
    fn corrupt_manifest_is_an_error() {
        let (store, cache) = cache();
        let sig = signature("aaaa");
        let bogus = Object::new(ObjectType::BuildManifest, b"not json".to_vec())
            .with_custom(keys::SIGNATURE, sig.build_hash.as_str());
        store.put(&bogus).unwrap();
        assert!(matches!(
            cache.should_skip_build(&sig),
            Err(CacheError::Corrupt { .. })
        ));
    }

    #[test]
    fn empty_build_hash_is_rejected() {
        let (_, cache) = cache();
        let mut sig = signature("aaaa");
        sig.build_hash.clear();
        assert!(matches!(
            cache.should_skip_build(&sig),
            Err(CacheError::Validation(_))
        ));
        assert!(matches!(
            cache.save_build(&sig, &BuildManifest::new(BuildId::new("b")), Path::new("/o")),
            Err(CacheError::Validation(_))
        ));
    }

    #[test]
    fn blank_build_id_is_rejected() {
        let (_, cache) = cache();
        let err = cache
            .save_build(&signature("a"), &BuildManifest::new(BuildId::new(" ")), Path::new("/o"))
            .unwrap_err();
        assert!(matches!(err, CacheError::Validation(_)));
    }

    // =========================================================================
    // References and retention
    // =========================================================================

    #[test]
    fn save_records_build_reference() {
        let (store, cache) = cache();
        let artifact = store
            .put(&Object::new(ObjectType::Artifact, b"site".to_vec()))
            .unwrap();
        let manifest = BuildManifest::new(BuildId::new("b1")).with_artifacts([artifact]);
        let hash = cache
            .save_build(&signature("a"), &manifest, Path::new("/o"))
            .unwrap();
        assert_eq!(
            store.get_build_ref(&manifest.id).unwrap(),
            vec![hash, artifact]
        );
    }

    #[test]
    fn prune_keeps_most_recent_builds() {
        let (store, cache) = cache();
        let mut artifacts = Vec::new();
        for i in 0..3 {
            let artifact = store
                .put(&Object::new(ObjectType::Artifact, format!("site-{i}").into_bytes()))
                .unwrap();
            artifacts.push(artifact);
            let manifest =
                BuildManifest::new(BuildId::new(format!("b{i}"))).with_artifacts([artifact]);
            cache
                .save_build(&signature(&format!("c{i}")), &manifest, Path::new("/o"))
                .unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        // Unreferenced leftovers.
        store
            .put(&Object::new(ObjectType::Artifact, b"orphan".to_vec()))
            .unwrap();

        let report = cache.prune_builds(1).unwrap();
        // Two old manifests, two old artifacts, one orphan.
        assert_eq!(report.removed, 5);
        assert_eq!(store.build_ids().unwrap(), vec![BuildId::new("b2")]);
        assert!(store.exists(&artifacts[2]).unwrap());
        assert!(!store.exists(&artifacts[0]).unwrap());

        let remaining = cache.list_builds().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].build_id.as_str(), "b2");
    }

    #[test]
    fn prune_zero_clears_everything() {
        let (store, cache) = cache();
        cache
            .save_build(&signature("a"), &BuildManifest::new(BuildId::new("b")), Path::new("/o"))
            .unwrap();
        cache.prune_builds(0).unwrap();
        assert_eq!(store.stats().unwrap().objects, 0);
        assert!(store.build_ids().unwrap().is_empty());
    }
}
