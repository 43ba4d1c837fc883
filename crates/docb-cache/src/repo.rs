use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use docb_crypto::{ContentHasher, FieldDigest};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{CacheError, CacheResult};

/// Per-repository cache key.
///
/// `content_hash` covers only the repository's configured documentation
/// paths, so two checkouts at different commits whose docs are identical
/// produce the same content hash (and share stage-cache entries). The commit
/// still participates in the whole-build signature.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepoHash {
    pub name: String,
    pub commit: String,
    pub content_hash: String,
}

impl RepoHash {
    pub fn new(
        name: impl Into<String>,
        commit: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            commit: commit.into(),
            content_hash: content_hash.into(),
        }
    }

    /// Hash the documentation under `root` and build the key.
    pub fn compute(
        name: impl Into<String>,
        commit: impl Into<String>,
        root: &Path,
        doc_paths: &[String],
    ) -> CacheResult<Self> {
        let content_hash = compute_content_hash(root, doc_paths)?;
        Ok(Self::new(name, commit, content_hash))
    }

    pub(crate) fn validate(&self) -> CacheResult<()> {
        if self.name.trim().is_empty() {
            return Err(CacheError::validation("repository name must not be empty"));
        }
        if self.content_hash.trim().is_empty() {
            return Err(CacheError::validation(format!(
                "repository {} has an empty content hash",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for RepoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.content_hash.get(..8).unwrap_or(&self.content_hash);
        write!(f, "{}@{} ({short})", self.name, self.commit)
    }
}

/// Digest every regular file under `doc_paths` (relative to `root`).
///
/// Files are fed to the hasher sorted by their `/`-separated path relative to
/// `root`, each as a framed `(path, bytes)` pair. Missing doc paths contribute
/// nothing; overlapping doc paths count each file once; `.git` directories are
/// never descended into. An empty `doc_paths` list hashes the whole tree.
pub fn compute_content_hash(root: &Path, doc_paths: &[String]) -> CacheResult<String> {
    let default_paths = [String::new()];
    let doc_paths = if doc_paths.is_empty() {
        &default_paths[..]
    } else {
        doc_paths
    };

    let mut files: BTreeMap<String, PathBuf> = BTreeMap::new();
    for doc_path in doc_paths {
        let start = root.join(doc_path);
        if !start.exists() {
            debug!(path = %start.display(), "doc path missing; skipping");
            continue;
        }
        let walker = WalkDir::new(&start)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git");
        for entry in walker {
            let entry = entry.map_err(|e| CacheError::Io {
                path: start.display().to_string(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .unwrap_or(entry.path())
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(rel, entry.into_path());
        }
    }

    let mut digest = FieldDigest::new(&ContentHasher::REPO_CONTENT);
    for (rel, path) in &files {
        let bytes = fs::read(path).map_err(|source| CacheError::Io {
            path: path.display().to_string(),
            source,
        })?;
        digest = digest.str_field("path", rel).field("content", &bytes);
    }
    let hash = digest.finish();
    debug!(root = %root.display(), files = files.len(), hash = %hash.short_hex(), "hashed repository docs");
    Ok(hash.to_hex())
}
