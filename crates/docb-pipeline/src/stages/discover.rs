use std::sync::Arc;

use docb_cache::StageCache;
use tracing::debug;

use crate::collab::DocDiscovery;
use crate::context::BuildContext;
use crate::error::StageError;
use crate::stage::{Stage, StageFlow};

use super::{BuildServices, CLONE_REPOS, DISCOVER_DOCS};

/// Lists each repository's documentation files, reusing cached listings for
/// unchanged content.
pub struct DiscoverDocs {
    discovery: Arc<dyn DocDiscovery>,
    cache: StageCache,
}

impl DiscoverDocs {
    pub fn new(services: &BuildServices) -> Self {
        Self {
            discovery: services.discovery.clone(),
            cache: services.stage_cache(),
        }
    }
}

impl Stage for DiscoverDocs {
    fn name(&self) -> &str {
        DISCOVER_DOCS
    }

    fn dependencies(&self) -> Vec<String> {
        vec![CLONE_REPOS.to_string()]
    }

    fn run(&self, ctx: &mut BuildContext) -> Result<StageFlow, StageError> {
        let repos = ctx.repos.clone();
        for repo in &repos {
            if ctx.cancel.is_canceled() {
                return Err(StageError::Canceled);
            }
            let content_hash = ctx
                .repo_hashes
                .get(&repo.name)
                .map(|k| k.content_hash.clone())
                .ok_or_else(|| {
                    StageError::validation(format!("repository {} was never resolved", repo.name))
                })?;

            let (docs, hash) = match self.cache.can_skip_discovery(&repo.name, &content_hash)? {
                Some(hit) => {
                    ctx.cache.record(true);
                    (hit.value, hit.hash)
                }
                None => {
                    let root = ctx.clone_paths.get(&repo.name).ok_or_else(|| {
                        StageError::validation(format!("repository {} has no checkout", repo.name))
                    })?;
                    let docs = self.discovery.discover(repo, root)?;
                    let hash = self.cache.save_discovery(&repo.name, &content_hash, &docs)?;
                    ctx.cache.record(false);
                    (docs, hash)
                }
            };

            debug!(repo = %repo.name, docs = docs.len(), hash = %hash.short_hex(), "discovered docs");
            ctx.record_artifact(hash);
            ctx.docs.insert(repo.name.clone(), docs);
        }
        Ok(StageFlow::Continue)
    }
}
