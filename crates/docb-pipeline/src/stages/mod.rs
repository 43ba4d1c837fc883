//! Built-in build stages.
//!
//! ```text
//! PrepareOutput -> CloneRepos -> DiscoverDocs -> TransformContent -> GenerateSite
//! ```
//!
//! Every repository-level stage consults the [`StageCache`] first and only
//! calls its collaborator on a miss. `GenerateSite` consults the whole-build
//! [`BuildCache`] and reuses a previous site when the signature matches.

use std::sync::Arc;

use docb_cache::{BuildCache, StageCache};
use docb_store::ObjectStore;

use crate::collab::{ContentTransform, DocDiscovery, RepoFetcher, SiteGenerator};

mod clone;
mod discover;
mod generate;
mod prepare;
mod transform;

pub use clone::CloneRepos;
pub use discover::DiscoverDocs;
pub use generate::{signature_for, GenerateSite};
pub use prepare::PrepareOutput;
pub use transform::TransformContent;

pub const PREPARE_OUTPUT: &str = "PrepareOutput";
pub const CLONE_REPOS: &str = "CloneRepos";
pub const DISCOVER_DOCS: &str = "DiscoverDocs";
pub const TRANSFORM_CONTENT: &str = "TransformContent";
pub const GENERATE_SITE: &str = "GenerateSite";

/// Built-in stage names in dependency order.
pub const DEFAULT_STAGES: [&str; 5] = [
    PREPARE_OUTPUT,
    CLONE_REPOS,
    DISCOVER_DOCS,
    TRANSFORM_CONTENT,
    GENERATE_SITE,
];

/// Everything the built-in stages need from outside the pipeline.
#[derive(Clone)]
pub struct BuildServices {
    pub store: Arc<dyn ObjectStore>,
    pub fetcher: Arc<dyn RepoFetcher>,
    pub discovery: Arc<dyn DocDiscovery>,
    /// Available transforms; the build settings choose which ones run.
    pub transforms: Vec<Arc<dyn ContentTransform>>,
    pub generator: Arc<dyn SiteGenerator>,
}

impl BuildServices {
    pub fn stage_cache(&self) -> StageCache {
        StageCache::new(self.store.clone())
    }

    pub fn build_cache(&self) -> BuildCache {
        BuildCache::new(self.store.clone())
    }
}
