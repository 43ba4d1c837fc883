use std::collections::BTreeMap;
use std::path::PathBuf;

use docb_cache::{BuildSignature, CachedBuild, DocFile, RepoHash};
use docb_types::{BuildId, ObjectHash};
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::collab::RepoConfig;

/// Inputs that shape the generated site, shared by every repository.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    pub theme: String,
    pub theme_version: String,
    /// Enabled content transforms, by name.
    pub transforms: Vec<String>,
    /// Sites are generated under `output_dir/<build id>`.
    pub output_dir: PathBuf,
    /// Checkouts are fetched under `work_dir/<repo>/<content hash>`.
    pub work_dir: PathBuf,
    /// Free-form site configuration. Hashed into the build signature.
    pub site_config: serde_json::Value,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            theme: "default".to_string(),
            theme_version: "0".to_string(),
            transforms: Vec::new(),
            output_dir: PathBuf::from("public"),
            work_dir: PathBuf::from(".docb/work"),
            site_config: serde_json::Value::Null,
        }
    }
}

/// Stage-cache hit and miss counts for one run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheCounters {
    pub hits: usize,
    pub misses: usize,
}

impl CacheCounters {
    pub(crate) fn record(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
    }
}

/// Mutable state threaded through every stage of one pipeline run.
///
/// Each built-in stage reads what its dependencies recorded and adds its
/// own results; nothing here is persisted directly.
#[derive(Debug)]
pub struct BuildContext {
    pub build_id: BuildId,
    pub settings: BuildSettings,
    pub repos: Vec<RepoConfig>,
    pub cancel: CancellationToken,

    /// Resolved content keys, by repository name.
    pub repo_hashes: BTreeMap<String, RepoHash>,
    /// Checkout roots, by repository name.
    pub clone_paths: BTreeMap<String, PathBuf>,
    /// Discovered documentation, by repository name.
    pub docs: BTreeMap<String, Vec<DocFile>>,
    /// Transform output, by repository name then transform name.
    pub transformed: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    /// Every object produced or reused, in first-seen order.
    pub artifacts: Vec<ObjectHash>,
    pub cache: CacheCounters,

    pub signature: Option<BuildSignature>,
    /// Set when the whole build was answered from cache.
    pub cached_build: Option<CachedBuild>,
    /// Where the site for this run lives (fresh or reused).
    pub output_path: Option<PathBuf>,
}

impl BuildContext {
    pub fn new(build_id: BuildId, settings: BuildSettings, repos: Vec<RepoConfig>) -> Self {
        Self {
            build_id,
            settings,
            repos,
            cancel: CancellationToken::new(),
            repo_hashes: BTreeMap::new(),
            clone_paths: BTreeMap::new(),
            docs: BTreeMap::new(),
            transformed: BTreeMap::new(),
            artifacts: Vec::new(),
            cache: CacheCounters::default(),
            signature: None,
            cached_build: None,
            output_path: None,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Record an object this run depends on, once.
    pub fn record_artifact(&mut self, hash: ObjectHash) {
        if !self.artifacts.contains(&hash) {
            self.artifacts.push(hash);
        }
    }

    pub fn doc_count(&self) -> usize {
        self.docs.values().map(Vec::len).sum()
    }

    pub fn repo_names(&self) -> Vec<String> {
        self.repos.iter().map(|r| r.name.clone()).collect()
    }

    /// True when the whole build was reused.
    pub fn is_cached(&self) -> bool {
        self.cached_build.is_some()
    }
}
