//! End-to-end cache scenarios over the in-memory and on-disk stores.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use docb_cache::{
    BuildCache, BuildManifest, BuildSignature, CacheError, DocFile, RepoHash, StageCache,
};
use docb_store::{
    FileObjectStore, FileStoreConfig, GcReport, InMemoryObjectStore, ObjectStore, StoreError,
    StoreResult, StoreStats,
};
use docb_types::{BuildId, Object, ObjectHash, ObjectType};

const TRANSFORMS: [&str; 2] = ["frontmatter", "links"];

fn populate(stage: &StageCache, repo: &str, hash: &str) {
    stage
        .save_clone(repo, hash, &PathBuf::from(format!("/work/{repo}")))
        .unwrap();
    stage
        .save_discovery(repo, hash, &[DocFile::new(repo, "docs/index.md", 42)])
        .unwrap();
    for t in TRANSFORMS {
        stage
            .save_transform(repo, hash, t, format!("{repo}:{t}").as_bytes())
            .unwrap();
    }
}

fn fully_skippable(stage: &StageCache, repo: &str, hash: &str) -> bool {
    stage.can_skip_clone(repo, hash).unwrap().is_some()
        && stage.can_skip_discovery(repo, hash).unwrap().is_some()
        && TRANSFORMS
            .iter()
            .all(|t| stage.can_skip_transform(repo, hash, t).unwrap().is_some())
}

fn fully_missed(stage: &StageCache, repo: &str, hash: &str) -> bool {
    stage.can_skip_clone(repo, hash).unwrap().is_none()
        && stage.can_skip_discovery(repo, hash).unwrap().is_none()
        && TRANSFORMS
            .iter()
            .all(|t| stage.can_skip_transform(repo, hash, t).unwrap().is_none())
}

fn signature(repos: &[(&str, &str)]) -> BuildSignature {
    BuildSignature::builder()
        .repos(repos.iter().map(|(n, h)| RepoHash::new(*n, "main", *h)))
        .theme("hextra", "0.9.0")
        .transforms(TRANSFORMS)
        .build()
        .unwrap()
}

// =============================================================================
// Partial invalidation
// =============================================================================

#[test]
fn one_changed_repository_invalidates_only_itself() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
    let stage = StageCache::new(store.clone());
    let builds = BuildCache::new(store);

    let before = [("a", "a-v1"), ("b", "b-v1"), ("c", "c-v1")];
    for (repo, hash) in before {
        populate(&stage, repo, hash);
    }
    let sig_before = signature(&before);
    builds
        .save_build(&sig_before, &BuildManifest::new(BuildId::new("b1")), Path::new("/site/1"))
        .unwrap();

    let after = [("a", "a-v2"), ("b", "b-v1"), ("c", "c-v1")];
    let sig_after = signature(&after);

    assert_ne!(sig_before.build_hash, sig_after.build_hash);
    assert!(builds.should_skip_build(&sig_after).unwrap().is_none());
    assert!(builds.should_skip_build(&sig_before).unwrap().is_some());

    assert!(fully_missed(&stage, "a", "a-v2"));
    assert!(fully_skippable(&stage, "b", "b-v1"));
    assert!(fully_skippable(&stage, "c", "c-v1"));
    // The old content of A is still cached.
    assert!(fully_skippable(&stage, "a", "a-v1"));
}

#[test]
fn caches_survive_reopening_the_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let sig = signature(&[("a", "a-v1")]);
    {
        let store: Arc<dyn ObjectStore> =
            Arc::new(FileObjectStore::open(dir.path(), FileStoreConfig::default()).unwrap());
        populate(&StageCache::new(store.clone()), "a", "a-v1");
        BuildCache::new(store)
            .save_build(&sig, &BuildManifest::new(BuildId::new("b1")), Path::new("/site"))
            .unwrap();
    }

    let store: Arc<dyn ObjectStore> =
        Arc::new(FileObjectStore::open(dir.path(), FileStoreConfig::default()).unwrap());
    assert!(fully_skippable(&StageCache::new(store.clone()), "a", "a-v1"));
    let hit = BuildCache::new(store).should_skip_build(&sig).unwrap().unwrap();
    assert_eq!(hit.build_id.as_str(), "b1");
    assert_eq!(hit.output_path, PathBuf::from("/site"));
}

#[test]
fn stage_entries_listed_as_artifacts_survive_gc() {
    let store: Arc<dyn ObjectStore> = Arc::new(InMemoryObjectStore::new());
    let stage = StageCache::new(store.clone());
    let builds = BuildCache::new(store.clone());

    let kept = stage.save_clone("a", "a-v1", Path::new("/work/a")).unwrap();
    stage.save_clone("b", "b-v1", Path::new("/work/b")).unwrap();

    let manifest = BuildManifest::new(BuildId::new("b1")).with_artifacts([kept]);
    builds
        .save_build(&signature(&[("a", "a-v1")]), &manifest, Path::new("/site"))
        .unwrap();

    let report = store.collect_garbage().unwrap();
    assert_eq!(report.removed, 1);
    assert!(stage.can_skip_clone("a", "a-v1").unwrap().is_some());
    assert!(stage.can_skip_clone("b", "b-v1").unwrap().is_none());
}

// =============================================================================
// Storage failures
// =============================================================================

/// A store whose reads always fail.
struct BrokenStore;

impl BrokenStore {
    fn fail<T>() -> StoreResult<T> {
        Err(StoreError::Io(std::io::Error::other("disk unavailable")))
    }
}

impl ObjectStore for BrokenStore {
    fn put(&self, _object: &Object) -> StoreResult<ObjectHash> {
        Self::fail()
    }
    fn get(&self, _hash: &ObjectHash) -> StoreResult<Object> {
        Self::fail()
    }
    fn exists(&self, _hash: &ObjectHash) -> StoreResult<bool> {
        Self::fail()
    }
    fn delete(&self, _hash: &ObjectHash) -> StoreResult<()> {
        Self::fail()
    }
    fn list(&self, _filter: Option<ObjectType>) -> StoreResult<Vec<ObjectHash>> {
        Self::fail()
    }
    fn touch(&self, _hash: &ObjectHash) -> StoreResult<()> {
        Self::fail()
    }
    fn add_build_ref(&self, _build: &BuildId, _hashes: &[ObjectHash]) -> StoreResult<()> {
        Self::fail()
    }
    fn get_build_ref(&self, _build: &BuildId) -> StoreResult<Vec<ObjectHash>> {
        Self::fail()
    }
    fn remove_build_ref(&self, _build: &BuildId) -> StoreResult<()> {
        Self::fail()
    }
    fn build_ids(&self) -> StoreResult<Vec<BuildId>> {
        Self::fail()
    }
    fn gc(&self, _live: &HashSet<ObjectHash>) -> StoreResult<GcReport> {
        Self::fail()
    }
    fn stats(&self) -> StoreResult<StoreStats> {
        Self::fail()
    }
}

#[test]
fn storage_errors_are_not_misses() {
    let store: Arc<dyn ObjectStore> = Arc::new(BrokenStore);
    let stage = StageCache::new(store.clone());
    let builds = BuildCache::new(store);

    assert!(matches!(
        stage.can_skip_clone("a", "h"),
        Err(CacheError::Store(StoreError::Io(_)))
    ));
    assert!(matches!(
        stage.can_skip_discovery("a", "h"),
        Err(CacheError::Store(_))
    ));
    assert!(matches!(
        stage.can_skip_transform("a", "h", "links"),
        Err(CacheError::Store(_))
    ));
    assert!(matches!(
        builds.should_skip_build(&signature(&[("a", "h")])),
        Err(CacheError::Store(_))
    ));
    assert!(matches!(builds.prune_builds(1), Err(CacheError::Store(_))));
}
