use std::path::PathBuf;

use chrono::{DateTime, Utc};
use docb_types::{BuildId, ObjectHash};
use serde::{Deserialize, Serialize};

use crate::signature::BuildSignature;

/// Description of one completed build, stored as a build-manifest object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildManifest {
    pub id: BuildId,
    pub created_at: DateTime<Utc>,
    /// Names of the repositories that went into the build.
    pub repositories: Vec<String>,
    /// Every object the build produced or reused. Recorded as the build's
    /// references so garbage collection keeps them.
    pub artifacts: Vec<ObjectHash>,
    pub doc_count: usize,
}

impl BuildManifest {
    pub fn new(id: BuildId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            repositories: Vec::new(),
            artifacts: Vec::new(),
            doc_count: 0,
        }
    }

    pub fn with_repositories<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.repositories = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_artifacts(mut self, artifacts: impl IntoIterator<Item = ObjectHash>) -> Self {
        self.artifacts = artifacts.into_iter().collect();
        self
    }

    pub fn with_doc_count(mut self, doc_count: usize) -> Self {
        self.doc_count = doc_count;
        self
    }
}

/// A whole-build cache hit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedBuild {
    pub build_id: BuildId,
    /// Where the cached build wrote its site.
    pub output_path: PathBuf,
    pub signature: BuildSignature,
    pub manifest: BuildManifest,
    /// Hash of the build-manifest object.
    pub hash: ObjectHash,
    pub created_at: DateTime<Utc>,
}
