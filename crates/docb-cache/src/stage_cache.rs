use std::path::{Path, PathBuf};
use std::sync::Arc;

use docb_store::ObjectStore;
use docb_types::{Object, ObjectHash, ObjectType};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CacheError, CacheResult};
use crate::keys;

/// One documentation file found in a repository.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocFile {
    pub repository: String,
    /// `/`-separated path relative to the repository root.
    pub path: String,
    pub size: u64,
}

impl DocFile {
    pub fn new(repository: impl Into<String>, path: impl Into<String>, size: u64) -> Self {
        Self {
            repository: repository.into(),
            path: path.into(),
            size,
        }
    }
}

/// A stage-cache hit: the reused object and its decoded value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheHit<T> {
    pub hash: ObjectHash,
    pub value: T,
}

/// Stored payload. The lookup keys are part of the bytes so that equal values
/// saved under different keys stay distinct objects.
#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    repo_name: String,
    repo_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    transform: Option<String>,
    value: T,
}

/// Lookup key for one stage entry.
struct StageKey<'a> {
    object_type: ObjectType,
    repo: &'a str,
    repo_hash: &'a str,
    transform: Option<&'a str>,
}

impl StageKey<'_> {
    fn validate(&self) -> CacheResult<()> {
        if self.repo.trim().is_empty() {
            return Err(CacheError::validation("repository name must not be empty"));
        }
        if self.repo_hash.trim().is_empty() {
            return Err(CacheError::validation(format!(
                "repository {} has an empty content hash",
                self.repo
            )));
        }
        if let Some(t) = self.transform {
            if t.trim().is_empty() {
                return Err(CacheError::validation("transform name must not be empty"));
            }
        }
        Ok(())
    }

    fn matches(&self, object: &Object) -> bool {
        let custom = object.custom();
        custom.str_eq(keys::REPO_NAME, self.repo)
            && custom.str_eq(keys::REPO_HASH, self.repo_hash)
            && self
                .transform
                .map_or(true, |t| custom.str_eq(keys::TRANSFORM, t))
    }
}

/// Per-repository, per-stage cache over an [`ObjectStore`].
///
/// Entries are keyed by repository name and content hash (plus transform name
/// for transforms). Each check is independent: a repository whose content
/// hash is unchanged skips clone, discovery, and transform even when other
/// repositories in the same build changed.
#[derive(Clone)]
pub struct StageCache {
    store: Arc<dyn ObjectStore>,
}

impl StageCache {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Clone
    // -------------------------------------------------------------------------

    /// Cached clone location for this repository content.
    pub fn can_skip_clone(
        &self,
        repo: &str,
        repo_hash: &str,
    ) -> CacheResult<Option<CacheHit<PathBuf>>> {
        self.lookup(StageKey {
            object_type: ObjectType::RepoTree,
            repo,
            repo_hash,
            transform: None,
        })
    }

    pub fn save_clone(&self, repo: &str, repo_hash: &str, clone_path: &Path) -> CacheResult<ObjectHash> {
        let key = StageKey {
            object_type: ObjectType::RepoTree,
            repo,
            repo_hash,
            transform: None,
        };
        let path = clone_path.to_path_buf();
        self.save(key, &path, |obj| {
            obj.with_custom(keys::CLONE_PATH, clone_path.display().to_string())
        })
    }

    // -------------------------------------------------------------------------
    // Discovery
    // -------------------------------------------------------------------------

    /// Cached documentation file list for this repository content.
    pub fn can_skip_discovery(
        &self,
        repo: &str,
        repo_hash: &str,
    ) -> CacheResult<Option<CacheHit<Vec<DocFile>>>> {
        self.lookup(StageKey {
            object_type: ObjectType::DocsManifest,
            repo,
            repo_hash,
            transform: None,
        })
    }

    pub fn save_discovery(&self, repo: &str, repo_hash: &str, docs: &[DocFile]) -> CacheResult<ObjectHash> {
        let key = StageKey {
            object_type: ObjectType::DocsManifest,
            repo,
            repo_hash,
            transform: None,
        };
        self.save(key, &docs, |obj| obj.with_custom("doc_count", docs.len() as i64))
    }

    // -------------------------------------------------------------------------
    // Transform
    // -------------------------------------------------------------------------

    /// Cached output of `transform` over this repository content.
    pub fn can_skip_transform(
        &self,
        repo: &str,
        repo_hash: &str,
        transform: &str,
    ) -> CacheResult<Option<CacheHit<Vec<u8>>>> {
        let key = StageKey {
            object_type: ObjectType::TransformedContent,
            repo,
            repo_hash,
            transform: Some(transform),
        };
        let Some(hit) = self.lookup::<String>(key)? else {
            return Ok(None);
        };
        let value = hex::decode(&hit.value).map_err(|e| CacheError::Corrupt {
            hash: hit.hash,
            reason: format!("transform output: {e}"),
        })?;
        Ok(Some(CacheHit {
            hash: hit.hash,
            value,
        }))
    }

    pub fn save_transform(
        &self,
        repo: &str,
        repo_hash: &str,
        transform: &str,
        output: &[u8],
    ) -> CacheResult<ObjectHash> {
        let key = StageKey {
            object_type: ObjectType::TransformedContent,
            repo,
            repo_hash,
            transform: Some(transform),
        };
        self.save(key, &hex::encode(output), |obj| {
            obj.with_custom(keys::TRANSFORM, transform)
        })
    }

    // -------------------------------------------------------------------------
    // Shared
    // -------------------------------------------------------------------------

    fn lookup<T: DeserializeOwned>(&self, key: StageKey<'_>) -> CacheResult<Option<CacheHit<T>>> {
        key.validate()?;

        let mut newest: Option<Object> = None;
        for hash in self.store.list(Some(key.object_type))? {
            let Some(object) = self.store.try_get(&hash)? else {
                continue;
            };
            if !key.matches(&object) {
                continue;
            }
            let newer = newest
                .as_ref()
                .map_or(true, |n| object.metadata.created_at > n.metadata.created_at);
            if newer {
                newest = Some(object);
            }
        }

        let Some(object) = newest else {
            debug!(stage = %key.object_type, repo = key.repo, transform = ?key.transform, "stage cache miss");
            return Ok(None);
        };

        let envelope: Envelope<T> =
            serde_json::from_slice(&object.data).map_err(|e| CacheError::Corrupt {
                hash: object.hash,
                reason: e.to_string(),
            })?;
        if envelope.repo_name != key.repo
            || envelope.repo_hash != key.repo_hash
            || envelope.transform.as_deref() != key.transform
        {
            return Err(CacheError::Corrupt {
                hash: object.hash,
                reason: "payload keys disagree with metadata".into(),
            });
        }

        self.store.touch(&object.hash)?;
        debug!(
            stage = %key.object_type,
            repo = key.repo,
            transform = ?key.transform,
            hash = %object.hash.short_hex(),
            "stage cache hit"
        );
        Ok(Some(CacheHit {
            hash: object.hash,
            value: envelope.value,
        }))
    }

    fn save<T: Serialize>(
        &self,
        key: StageKey<'_>,
        value: &T,
        decorate: impl FnOnce(Object) -> Object,
    ) -> CacheResult<ObjectHash> {
        key.validate()?;
        let envelope = Envelope {
            repo_name: key.repo.to_string(),
            repo_hash: key.repo_hash.to_string(),
            transform: key.transform.map(str::to_string),
            value,
        };
        let data =
            serde_json::to_vec(&envelope).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let object = Object::new(key.object_type, data)
            .with_custom(keys::REPO_NAME, key.repo)
            .with_custom(keys::REPO_HASH, key.repo_hash);
        let hash = self.store.put(&decorate(object))?;
        debug!(
            stage = %key.object_type,
            repo = key.repo,
            transform = ?key.transform,
            hash = %hash.short_hex(),
            "saved stage output"
        );
        Ok(hash)
    }
}
