//! Collaborators for repositories that already live on the local disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use walkdir::WalkDir;

use docb_cache::{DocFile, RepoHash};
use docb_pipeline::{
    BuildContext, BuildServices, ContentTransform, DocDiscovery, RepoConfig, RepoFetcher,
    SiteGenerator, StageError,
};
use docb_store::ObjectStore;

const DOC_EXTENSIONS: [&str; 3] = ["md", "markdown", "mdx"];

/// Built-in stage collaborators over local checkouts.
pub fn local_services(store: Arc<dyn ObjectStore>) -> BuildServices {
    BuildServices {
        store,
        fetcher: Arc::new(LocalFetcher),
        discovery: Arc::new(MarkdownDiscovery),
        transforms: vec![Arc::new(TocTransform)],
        generator: Arc::new(StaticSiteGenerator),
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Treats `url` as a directory. The branch name stands in for the commit.
pub struct LocalFetcher;

impl RepoFetcher for LocalFetcher {
    fn resolve(&self, repo: &RepoConfig) -> Result<RepoHash, StageError> {
        let root = checkout_root(repo)?;
        Ok(RepoHash::compute(&repo.name, &repo.branch, &root, &repo.doc_paths)?)
    }

    fn fetch(&self, repo: &RepoConfig, _dest: &Path) -> Result<PathBuf, StageError> {
        checkout_root(repo)
    }
}

fn checkout_root(repo: &RepoConfig) -> Result<PathBuf, StageError> {
    let root = PathBuf::from(&repo.url);
    if !root.is_dir() {
        return Err(StageError::validation(format!(
            "repository {} is not a local directory: {}",
            repo.name,
            root.display()
        )));
    }
    Ok(root)
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Finds Markdown files under the repository's doc paths.
pub struct MarkdownDiscovery;

impl DocDiscovery for MarkdownDiscovery {
    fn discover(&self, repo: &RepoConfig, root: &Path) -> Result<Vec<DocFile>, StageError> {
        let starts: Vec<PathBuf> = if repo.doc_paths.is_empty() {
            vec![root.to_path_buf()]
        } else {
            repo.doc_paths.iter().map(|p| root.join(p)).collect()
        };

        let mut found = BTreeMap::new();
        for start in starts.iter().filter(|p| p.exists()) {
            let walker = WalkDir::new(start)
                .follow_links(false)
                .into_iter()
                .filter_entry(|e| e.file_name() != ".git");
            for entry in walker {
                let entry = entry.map_err(|e| {
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| std::io::Error::other("directory walk failed"));
                    StageError::io(start, source)
                })?;
                if !entry.file_type().is_file() || !is_doc(entry.path()) {
                    continue;
                }
                let rel = entry
                    .path()
                    .strip_prefix(root)
                    .unwrap_or(entry.path())
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                let size = fs::metadata(entry.path())
                    .map_err(|e| StageError::io(entry.path(), e))?
                    .len();
                found.insert(rel.clone(), DocFile::new(&repo.name, rel, size));
            }
        }
        debug!(repo = %repo.name, docs = found.len(), "discovered markdown");
        Ok(found.into_values().collect())
    }
}

fn is_doc(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| DOC_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// Renders a Markdown table of contents for a repository.
pub struct TocTransform;

impl ContentTransform for TocTransform {
    fn name(&self) -> &str {
        "toc"
    }

    fn apply(&self, repo: &RepoConfig, _root: &Path, docs: &[DocFile]) -> Result<Vec<u8>, StageError> {
        let mut out = format!("# {}\n\n", repo.name);
        for doc in docs {
            out.push_str(&format!("- [{}]({})\n", doc.path, doc.path));
        }
        Ok(out.into_bytes())
    }
}

// ---------------------------------------------------------------------------
// Generator
// ---------------------------------------------------------------------------

/// Copies every discovered document into the output tree and writes each
/// transform's output beside it, plus a top-level index.
pub struct StaticSiteGenerator;

impl SiteGenerator for StaticSiteGenerator {
    fn generate(&self, ctx: &BuildContext, output: &Path) -> Result<(), StageError> {
        fs::create_dir_all(output).map_err(|e| StageError::io(output, e))?;

        let mut index = format!("# {}\n\n", site_title(ctx));
        for (repo, docs) in &ctx.docs {
            let root = ctx.clone_paths.get(repo).ok_or_else(|| {
                StageError::validation(format!("repository {repo} has no checkout"))
            })?;
            let repo_out = output.join(repo);
            for doc in docs {
                let dest = repo_out.join(&doc.path);
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent).map_err(|e| StageError::io(parent, e))?;
                }
                let src = root.join(&doc.path);
                fs::copy(&src, &dest).map_err(|e| StageError::io(src, e))?;
            }
            if let Some(outputs) = ctx.transformed.get(repo) {
                fs::create_dir_all(&repo_out).map_err(|e| StageError::io(&repo_out, e))?;
                for (transform, bytes) in outputs {
                    let dest = repo_out.join(format!("_{transform}.md"));
                    fs::write(&dest, bytes).map_err(|e| StageError::io(dest, e))?;
                }
            }
            index.push_str(&format!("- [{repo}]({repo}/) ({} documents)\n", docs.len()));
        }

        let path = output.join("index.md");
        fs::write(&path, index).map_err(|e| StageError::io(path, e))
    }
}

fn site_title(ctx: &BuildContext) -> String {
    ctx.settings
        .site_config
        .get("title")
        .and_then(|t| t.as_str())
        .unwrap_or("Documentation")
        .to_string()
}
