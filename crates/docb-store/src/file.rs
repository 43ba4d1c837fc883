//! Durable object store: one file per object, sharded by hash prefix.
//!
//! Layout under the store root:
//!
//! ```text
//! objects/<first 2 hex chars>/<remaining 62 hex chars>   bincode-encoded Object
//! refs/builds.json                                       build id -> [hash]
//! ```
//!
//! Every write goes to a temporary file in the destination directory and is
//! renamed into place, so a crash leaves either the old or the new record,
//! never a torn one. An in-memory index of `hash -> (type, size)` is rebuilt
//! by scanning the shards on open.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use docb_types::{BuildId, Object, ObjectHash, ObjectType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::gc::GcReport;
use crate::traits::{
    prepare_insert, record_duplicate, validate_build_id, ObjectStore, StoreStats,
};

const OBJECTS_DIR: &str = "objects";
const REFS_DIR: &str = "refs";
const BUILD_REFS_FILE: &str = "builds.json";

/// Configuration for [`FileObjectStore`].
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileStoreConfig {
    /// `fsync` every record before renaming it into place.
    pub sync_writes: bool,
}

#[derive(Clone, Copy, Debug)]
struct IndexEntry {
    object_type: ObjectType,
    size: u64,
}

/// Filesystem-backed [`ObjectStore`].
pub struct FileObjectStore {
    root: PathBuf,
    config: FileStoreConfig,
    /// Guards every object file as well as the index itself.
    index: RwLock<BTreeMap<ObjectHash, IndexEntry>>,
    build_refs: RwLock<BTreeMap<BuildId, Vec<ObjectHash>>>,
}

impl FileObjectStore {
    /// Open (or create) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>, config: FileStoreConfig) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(OBJECTS_DIR))?;
        fs::create_dir_all(root.join(REFS_DIR))?;

        let index = scan_objects(&root.join(OBJECTS_DIR))?;
        let build_refs = load_build_refs(&root.join(REFS_DIR).join(BUILD_REFS_FILE))?;

        info!(
            root = %root.display(),
            objects = index.len(),
            builds = build_refs.len(),
            "opened object store"
        );

        Ok(Self {
            root,
            config,
            index: RwLock::new(index),
            build_refs: RwLock::new(build_refs),
        })
    }

    /// The directory this store lives in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the record for `hash`.
    pub fn object_path(&self, hash: &ObjectHash) -> PathBuf {
        let hex = hash.to_hex();
        self.root.join(OBJECTS_DIR).join(&hex[..2]).join(&hex[2..])
    }

    fn read_record(&self, hash: &ObjectHash) -> StoreResult<Object> {
        let path = self.object_path(hash);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(*hash));
            }
            Err(e) => return Err(e.into()),
        };
        decode_record(&path, &bytes)
    }

    fn write_record(&self, object: &Object) -> StoreResult<()> {
        let bytes =
            bincode::serialize(object).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let path = self.object_path(&object.hash);
        write_atomic(&path, &bytes, self.config.sync_writes)
    }

    fn persist_build_refs(&self, refs: &BTreeMap<BuildId, Vec<ObjectHash>>) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(refs)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let path = self.root.join(REFS_DIR).join(BUILD_REFS_FILE);
        write_atomic(&path, &bytes, self.config.sync_writes)
    }
}

impl ObjectStore for FileObjectStore {
    fn put(&self, object: &Object) -> StoreResult<ObjectHash> {
        let hash = object.content_hash();
        let mut index = self.index.write()?;

        if index.contains_key(&hash) {
            let mut existing = self.read_record(&hash)?;
            record_duplicate(&mut existing);
            self.write_record(&existing)?;
            debug!(
                hash = %hash.short_hex(),
                ref_count = existing.metadata.ref_count,
                "deduplicated put"
            );
            return Ok(hash);
        }

        let stored = prepare_insert(object);
        self.write_record(&stored)?;
        index.insert(
            hash,
            IndexEntry {
                object_type: stored.object_type,
                size: stored.size,
            },
        );
        debug!(hash = %hash.short_hex(), kind = %stored.object_type, size = stored.size, "stored object");
        Ok(hash)
    }

    fn get(&self, hash: &ObjectHash) -> StoreResult<Object> {
        let index = self.index.read()?;
        if !index.contains_key(hash) {
            return Err(StoreError::NotFound(*hash));
        }
        self.read_record(hash)
    }

    fn exists(&self, hash: &ObjectHash) -> StoreResult<bool> {
        Ok(self.index.read()?.contains_key(hash))
    }

    fn delete(&self, hash: &ObjectHash) -> StoreResult<()> {
        let mut index = self.index.write()?;
        if index.remove(hash).is_none() {
            return Err(StoreError::NotFound(*hash));
        }
        remove_object_file(&self.object_path(hash))
    }

    fn list(&self, filter: Option<ObjectType>) -> StoreResult<Vec<ObjectHash>> {
        let index = self.index.read()?;
        Ok(index
            .iter()
            .filter(|(_, entry)| filter.map_or(true, |t| entry.object_type == t))
            .map(|(hash, _)| *hash)
            .collect())
    }

    fn touch(&self, hash: &ObjectHash) -> StoreResult<()> {
        let index = self.index.write()?;
        if !index.contains_key(hash) {
            return Err(StoreError::NotFound(*hash));
        }
        let mut obj = self.read_record(hash)?;
        obj.metadata.last_accessed = chrono::Utc::now();
        self.write_record(&obj)
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
        self.persist_build_refs(&refs)
    }

    fn get_build_ref(&self, build: &BuildId) -> StoreResult<Vec<ObjectHash>> {
        let refs = self.build_refs.read()?;
        refs.get(build)
            .cloned()
            .ok_or_else(|| StoreError::BuildRefNotFound(build.clone()))
    }

    fn remove_build_ref(&self, build: &BuildId) -> StoreResult<()> {
        let mut refs = self.build_refs.write()?;
        if refs.remove(build).is_none() {
            return Err(StoreError::BuildRefNotFound(build.clone()));
        }
        self.persist_build_refs(&refs)
    }

    fn build_ids(&self) -> StoreResult<Vec<BuildId>> {
        Ok(self.build_refs.read()?.keys().cloned().collect())
    }

    fn gc(&self, live: &HashSet<ObjectHash>) -> StoreResult<GcReport> {
        let mut index = self.index.write()?;
        let mut report = GcReport {
            scanned: index.len(),
            ..Default::default()
        };

        let dead: Vec<(ObjectHash, u64)> = index
            .iter()
            .filter(|(hash, _)| !live.contains(hash))
            .map(|(hash, entry)| (*hash, entry.size))
            .collect();

        for (hash, size) in dead {
            remove_object_file(&self.object_path(&hash))?;
            index.remove(&hash);
            report.record_removal(hash, size);
        }

        let report = report.finish();
        info!(
            root = %self.root.display(),
            scanned = report.scanned,
            removed = report.removed,
            bytes_freed = report.bytes_freed,
            "garbage collection complete"
        );
        Ok(report)
    }

    fn stats(&self) -> StoreResult<StoreStats> {
        let index = self.index.read()?;
        let builds = self.build_refs.read()?.len();
        Ok(StoreStats {
            objects: index.len(),
            total_bytes: index.values().map(|e| e.size).sum(),
            builds,
        })
    }
}

impl std::fmt::Debug for FileObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileObjectStore")
            .field("root", &self.root)
            .finish()
    }
}

fn decode_record(path: &Path, bytes: &[u8]) -> StoreResult<Object> {
    bincode::deserialize(bytes).map_err(|e| StoreError::CorruptObject {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Write `bytes` to `path` via a sibling temp file and an atomic rename.
fn write_atomic(path: &Path, bytes: &[u8], sync: bool) -> StoreResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::Validation(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    if sync {
        tmp.as_file().sync_all()?;
    }
    tmp.persist(path).map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Remove an object file and, if it was the last one, its shard directory.
fn remove_object_file(path: &Path) -> StoreResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "object file already missing");
        }
        Err(e) => return Err(e.into()),
    }
    if let Some(shard) = path.parent() {
        // Fails harmlessly while the shard still has entries.
        let _ = fs::remove_dir(shard);
    }
    Ok(())
}

fn scan_objects(objects_dir: &Path) -> StoreResult<BTreeMap<ObjectHash, IndexEntry>> {
    let mut index = BTreeMap::new();
    for shard in fs::read_dir(objects_dir)? {
        let shard = shard?;
        if !shard.file_type()?.is_dir() {
            continue;
        }
        let prefix = shard.file_name().to_string_lossy().into_owned();
        for entry in fs::read_dir(shard.path())? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(hash) = ObjectHash::from_hex(&format!("{prefix}{name}")) else {
                // Leftover temp files from interrupted writes land here too.
                debug!(path = %entry.path().display(), "ignoring non-object file");
                continue;
            };
            let path = entry.path();
            match fs::read(&path).map_err(StoreError::from).and_then(|b| decode_record(&path, &b)) {
                Ok(obj) => {
                    index.insert(
                        hash,
                        IndexEntry {
                            object_type: obj.object_type,
                            size: obj.size,
                        },
                    );
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable object");
                }
            }
        }
    }
    Ok(index)
}

fn load_build_refs(path: &Path) -> StoreResult<BTreeMap<BuildId, Vec<ObjectHash>>> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::CorruptObject {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
        Err(e) => Err(e.into()),
    }
}
