//! Traits for the systems the engine drives but does not implement.
//!
//! Source hosts, documentation discovery, content transforms, the site
//! generator, repository discovery, and the build queue all live outside
//! this workspace. The built-in stages and the auto-build handler only see
//! these traits.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use docb_cache::{DocFile, RepoHash};
use docb_types::BuildId;
use serde::{Deserialize, Serialize};

use crate::cancel::CancellationToken;
use crate::context::BuildContext;
use crate::error::StageError;

fn default_branch() -> String {
    "main".to_string()
}

/// One repository taking part in a build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    pub name: String,
    /// Clone URL, or a local path for local repositories.
    pub url: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Paths (relative to the repository root) that hold documentation.
    /// Empty means the whole repository.
    #[serde(default)]
    pub doc_paths: Vec<String>,
    /// Source host the repository came from, if discovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forge: Option<String>,
}

impl RepoConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            branch: default_branch(),
            doc_paths: Vec::new(),
            forge: None,
        }
    }

    pub fn with_doc_paths<S: Into<String>>(mut self, paths: impl IntoIterator<Item = S>) -> Self {
        self.doc_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self
    }
}

// ---------------------------------------------------------------------------
// Stage collaborators
// ---------------------------------------------------------------------------

/// Resolves and fetches repository content.
pub trait RepoFetcher: Send + Sync {
    /// Determine the current commit and documentation content hash.
    fn resolve(&self, repo: &RepoConfig) -> Result<RepoHash, StageError>;

    /// Materialize the repository under `dest` and return the checkout root.
    fn fetch(&self, repo: &RepoConfig, dest: &Path) -> Result<PathBuf, StageError>;
}

/// Finds documentation files in a checkout.
pub trait DocDiscovery: Send + Sync {
    fn discover(&self, repo: &RepoConfig, root: &Path) -> Result<Vec<DocFile>, StageError>;
}

/// One named content transform (link rewriting, front-matter injection, ...).
pub trait ContentTransform: Send + Sync {
    fn name(&self) -> &str;

    fn apply(&self, repo: &RepoConfig, root: &Path, docs: &[DocFile])
        -> Result<Vec<u8>, StageError>;
}

/// Produces the final site from everything the earlier stages gathered.
pub trait SiteGenerator: Send + Sync {
    fn generate(&self, ctx: &BuildContext, output: &Path) -> Result<(), StageError>;
}

// ---------------------------------------------------------------------------
// Repository discovery and build queue
// ---------------------------------------------------------------------------

/// A repository reported by a source host.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredRepo {
    pub name: String,
    pub full_name: String,
    pub clone_url: String,
    pub default_branch: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub archived: bool,
}

/// Outcome of one discovery sweep across all configured source hosts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub repositories: Vec<DiscoveredRepo>,
    /// Repositories seen but excluded by filters.
    pub filtered: Vec<DiscoveredRepo>,
    /// Per-host errors that did not abort the sweep.
    pub errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
}

/// Enumerates repositories across source hosts.
pub trait RepositoryDiscovery: Send + Sync {
    fn discover_all(&self, cancel: &CancellationToken) -> Result<DiscoveryResult, StageError>;

    fn to_repo_configs(&self, repos: &[DiscoveredRepo], forge: &str) -> Vec<RepoConfig>;
}

/// A request to run one build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildJob {
    pub id: BuildId,
    pub repositories: Vec<RepoConfig>,
    /// Why the build was requested ("discovery", "manual", ...).
    pub trigger: String,
    pub created_at: DateTime<Utc>,
}

impl BuildJob {
    pub fn new(repositories: Vec<RepoConfig>, trigger: impl Into<String>) -> Self {
        Self {
            id: BuildId::generate(),
            repositories,
            trigger: trigger.into(),
            created_at: Utc::now(),
        }
    }
}

/// Accepts build jobs for later execution.
pub trait BuildEnqueuer: Send + Sync {
    fn enqueue(&self, job: BuildJob) -> Result<(), StageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_config_defaults_from_json() {
        let repo: RepoConfig =
            serde_json::from_str(r#"{"name":"alpha","url":"https://git/alpha"}"#).unwrap();
        assert_eq!(repo.branch, "main");
        assert!(repo.doc_paths.is_empty());
        assert!(repo.forge.is_none());
    }

    #[test]
    fn build_job_gets_fresh_id() {
        let a = BuildJob::new(vec![RepoConfig::new("a", "u")], "manual");
        let b = BuildJob::new(Vec::new(), "manual");
        assert_ne!(a.id, b.id);
        assert_eq!(a.trigger, "manual");
    }
}
