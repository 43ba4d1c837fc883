use std::sync::Arc;

use docb_cache::StageCache;
use tracing::{debug, info};

use crate::collab::RepoFetcher;
use crate::context::BuildContext;
use crate::error::StageError;
use crate::stage::{Stage, StageFlow};

use super::{BuildServices, CLONE_REPOS, PREPARE_OUTPUT};

/// Resolves every repository's content key and fetches checkouts that the
/// stage cache cannot supply.
///
/// Requests a skip when the build has no repositories.
pub struct CloneRepos {
    fetcher: Arc<dyn RepoFetcher>,
    cache: StageCache,
}

impl CloneRepos {
    pub fn new(services: &BuildServices) -> Self {
        Self {
            fetcher: services.fetcher.clone(),
            cache: services.stage_cache(),
        }
    }
}

impl Stage for CloneRepos {
    fn name(&self) -> &str {
        CLONE_REPOS
    }

    fn dependencies(&self) -> Vec<String> {
        vec![PREPARE_OUTPUT.to_string()]
    }

    fn run(&self, ctx: &mut BuildContext) -> Result<StageFlow, StageError> {
        if ctx.repos.is_empty() {
            return Ok(StageFlow::skip("no repositories configured"));
        }

        let repos = ctx.repos.clone();
        for repo in &repos {
            if ctx.cancel.is_canceled() {
                return Err(StageError::Canceled);
            }

            let key = self.fetcher.resolve(repo)?;
            if key.name != repo.name {
                return Err(StageError::validation(format!(
                    "fetcher resolved repository {} as {}",
                    repo.name, key.name
                )));
            }

            let cached = self
                .cache
                .can_skip_clone(&repo.name, &key.content_hash)?
                .filter(|hit| hit.value.exists());

            let (path, hash) = match cached {
                Some(hit) => {
                    debug!(repo = %repo.name, path = %hit.value.display(), "reusing checkout");
                    ctx.cache.record(true);
                    (hit.value, hit.hash)
                }
                None => {
                    let short = key.content_hash.get(..12).unwrap_or(&key.content_hash);
                    let dest = ctx.settings.work_dir.join(&repo.name).join(short);
                    let path = self.fetcher.fetch(repo, &dest)?;
                    let hash = self.cache.save_clone(&repo.name, &key.content_hash, &path)?;
                    info!(repo = %repo.name, commit = %key.commit, path = %path.display(), "fetched repository");
                    ctx.cache.record(false);
                    (path, hash)
                }
            };

            ctx.record_artifact(hash);
            ctx.clone_paths.insert(repo.name.clone(), path);
            ctx.repo_hashes.insert(repo.name.clone(), key);
        }
        Ok(StageFlow::Continue)
    }
}
