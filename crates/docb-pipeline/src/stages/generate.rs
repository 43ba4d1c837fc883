use std::sync::Arc;

use docb_cache::{BuildCache, BuildManifest, BuildSignature};
use tracing::{info, warn};

use crate::collab::SiteGenerator;
use crate::context::BuildContext;
use crate::error::StageError;
use crate::stage::{Stage, StageFlow};

use super::{BuildServices, GENERATE_SITE, TRANSFORM_CONTENT};

/// Computes the build signature, then either reuses a cached site or
/// generates a fresh one and records it.
pub struct GenerateSite {
    generator: Arc<dyn SiteGenerator>,
    cache: BuildCache,
}

impl GenerateSite {
    pub fn new(services: &BuildServices) -> Self {
        Self {
            generator: services.generator.clone(),
            cache: services.build_cache(),
        }
    }
}

/// Signature over everything the context says went into this build.
pub fn signature_for(ctx: &BuildContext) -> Result<BuildSignature, StageError> {
    let signature = BuildSignature::builder()
        .repos(ctx.repo_hashes.values().cloned())
        .theme(&ctx.settings.theme, &ctx.settings.theme_version)
        .transforms(ctx.settings.transforms.iter().cloned())
        .config(&ctx.settings.site_config)?
        .metadata("build_id", ctx.build_id.as_str())
        .build()?;
    Ok(signature)
}

impl Stage for GenerateSite {
    fn name(&self) -> &str {
        GENERATE_SITE
    }

    fn dependencies(&self) -> Vec<String> {
        vec![TRANSFORM_CONTENT.to_string()]
    }

    fn run(&self, ctx: &mut BuildContext) -> Result<StageFlow, StageError> {
        let signature = signature_for(ctx)?;
        ctx.signature = Some(signature.clone());

        match self.cache.should_skip_build(&signature)? {
            Some(cached) if cached.output_path.exists() => {
                info!(
                    build = %ctx.build_id,
                    cached_build = %cached.build_id,
                    output = %cached.output_path.display(),
                    "build is up to date"
                );
                let reason = format!("identical to build {}", cached.build_id);
                ctx.output_path = Some(cached.output_path.clone());
                ctx.cached_build = Some(cached);
                return Ok(StageFlow::skip(reason));
            }
            Some(cached) => warn!(
                build = %ctx.build_id,
                cached_build = %cached.build_id,
                output = %cached.output_path.display(),
                "cached site no longer exists; regenerating"
            ),
            None => {}
        }

        let output = ctx.settings.output_dir.join(ctx.build_id.as_str());
        self.generator.generate(ctx, &output)?;

        let manifest = BuildManifest::new(ctx.build_id.clone())
            .with_repositories(ctx.repo_names())
            .with_artifacts(ctx.artifacts.iter().copied())
            .with_doc_count(ctx.doc_count());
        let hash = self.cache.save_build(&signature, &manifest, &output)?;
        info!(
            build = %ctx.build_id,
            signature = signature.short_hash(),
            manifest = %hash.short_hex(),
            docs = manifest.doc_count,
            "generated site"
        );
        ctx.output_path = Some(output);
        Ok(StageFlow::Continue)
    }
}
