use std::collections::BTreeMap;
use std::sync::Arc;

use docb_cache::StageCache;
use tracing::debug;

use crate::collab::ContentTransform;
use crate::context::BuildContext;
use crate::error::StageError;
use crate::stage::{Stage, StageFlow};

use super::{BuildServices, DISCOVER_DOCS, TRANSFORM_CONTENT};

/// Applies every enabled transform to every repository, reusing cached
/// output for unchanged content.
pub struct TransformContent {
    transforms: BTreeMap<String, Arc<dyn ContentTransform>>,
    cache: StageCache,
}

impl TransformContent {
    pub fn new(services: &BuildServices) -> Self {
        Self {
            transforms: services
                .transforms
                .iter()
                .map(|t| (t.name().to_string(), t.clone()))
                .collect(),
            cache: services.stage_cache(),
        }
    }

    fn enabled(&self, ctx: &BuildContext) -> Result<Vec<Arc<dyn ContentTransform>>, StageError> {
        let mut names = ctx.settings.transforms.clone();
        names.sort();
        names.dedup();
        names
            .iter()
            .map(|name| {
                self.transforms
                    .get(name)
                    .cloned()
                    .ok_or_else(|| StageError::validation(format!("unknown transform '{name}'")))
            })
            .collect()
    }
}

impl Stage for TransformContent {
    fn name(&self) -> &str {
        TRANSFORM_CONTENT
    }

    fn dependencies(&self) -> Vec<String> {
        vec![DISCOVER_DOCS.to_string()]
    }

    fn run(&self, ctx: &mut BuildContext) -> Result<StageFlow, StageError> {
        let transforms = self.enabled(ctx)?;
        let repos = ctx.repos.clone();
        for repo in &repos {
            let content_hash = ctx
                .repo_hashes
                .get(&repo.name)
                .map(|k| k.content_hash.clone())
                .ok_or_else(|| {
                    StageError::validation(format!("repository {} was never resolved", repo.name))
                })?;

            for transform in &transforms {
                if ctx.cancel.is_canceled() {
                    return Err(StageError::Canceled);
                }
                let name = transform.name();
                let (output, hash) =
                    match self.cache.can_skip_transform(&repo.name, &content_hash, name)? {
                        Some(hit) => {
                            ctx.cache.record(true);
                            (hit.value, hit.hash)
                        }
                        None => {
                            let root = ctx.clone_paths.get(&repo.name).ok_or_else(|| {
                                StageError::validation(format!(
                                    "repository {} has no checkout",
                                    repo.name
                                ))
                            })?;
                            let docs = ctx.docs.get(&repo.name).map(Vec::as_slice).unwrap_or(&[]);
                            let output = transform.apply(repo, root, docs)?;
                            let hash =
                                self.cache
                                    .save_transform(&repo.name, &content_hash, name, &output)?;
                            ctx.cache.record(false);
                            (output, hash)
                        }
                    };

                debug!(repo = %repo.name, transform = name, bytes = output.len(), "transformed content");
                ctx.record_artifact(hash);
                ctx.transformed
                    .entry(repo.name.clone())
                    .or_default()
                    .insert(name.to_string(), output);
            }
        }
        Ok(StageFlow::Continue)
    }
}
