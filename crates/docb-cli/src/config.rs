//! `docb.toml` project configuration.
//!
//! ```toml
//! [store]
//! path = ".docb/store"
//!
//! [build]
//! theme = "hextra"
//! theme_version = "0.9.0"
//! transforms = ["toc"]
//! output_dir = "public"
//!
//! [[repos]]
//! name = "engine"
//! url = "../engine"
//! doc_paths = ["docs"]
//! ```
//!
//! Relative paths are resolved against the directory holding the file.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use docb_pipeline::{BuildSettings, ExecutorConfig, RepoConfig};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub path: PathBuf,
    /// `fsync` every object and event record.
    pub sync_writes: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".docb/store"),
            sync_writes: false,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocbConfig {
    pub store: StoreSection,
    pub build: BuildSettings,
    pub executor: ExecutorConfig,
    pub repos: Vec<RepoConfig>,
}

impl DocbConfig {
    /// Read and resolve `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = Self::parse(&text)
            .with_context(|| format!("parsing config {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Ok(config.resolve(base))
    }

    /// Like [`DocbConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(text)?;
        for repo in &config.repos {
            anyhow::ensure!(!repo.name.trim().is_empty(), "repository with empty name");
            anyhow::ensure!(!repo.url.trim().is_empty(), "repository {} has no url", repo.name);
        }
        Ok(config)
    }

    /// Anchor relative paths at `base`.
    pub fn resolve(mut self, base: &Path) -> Self {
        let anchor = |p: &Path| {
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                base.join(p)
            }
        };
        self.store.path = anchor(&self.store.path);
        self.build.output_dir = anchor(&self.build.output_dir);
        self.build.work_dir = anchor(&self.build.work_dir);
        for repo in &mut self.repos {
            let url = Path::new(&repo.url);
            if !url.is_absolute() {
                repo.url = base.join(url).display().to_string();
            }
        }
        self
    }

    /// Where published events are recorded.
    pub fn event_log_path(&self) -> PathBuf {
        self.store.path.join("events.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[store]
path = "cache"

[build]
theme = "hextra"
theme_version = "0.9.0"
transforms = ["toc"]

[build.site_config]
title = "Engine docs"

[[repos]]
name = "engine"
url = "../engine"
doc_paths = ["docs"]

[[repos]]
name = "sdk"
url = "/srv/sdk"
branch = "develop"
"#;

    #[test]
    fn parses_sections_and_defaults() {
        let config = DocbConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.build.theme, "hextra");
        assert_eq!(config.build.transforms, vec!["toc"]);
        assert_eq!(config.build.site_config["title"], "Engine docs");
        assert_eq!(config.build.output_dir, PathBuf::from("public"));
        assert!(config.executor.stop_on_error);
        assert_eq!(config.repos.len(), 2);
        assert_eq!(config.repos[0].branch, "main");
        assert_eq!(config.repos[1].branch, "develop");
    }

    #[test]
    fn empty_file_is_all_defaults() {
        assert_eq!(DocbConfig::parse("").unwrap(), DocbConfig::default());
    }

    #[test]
    fn resolves_relative_paths() {
        let config = DocbConfig::parse(SAMPLE)
            .unwrap()
            .resolve(Path::new("/work/site"));
        assert_eq!(config.store.path, PathBuf::from("/work/site/cache"));
        assert_eq!(config.build.output_dir, PathBuf::from("/work/site/public"));
        assert_eq!(config.repos[0].url, "/work/site/../engine");
        assert_eq!(config.repos[1].url, "/srv/sdk");
        assert_eq!(config.event_log_path(), PathBuf::from("/work/site/cache/events.log"));
    }

    #[test]
    fn rejects_nameless_repository() {
        let err = DocbConfig::parse("[[repos]]\nname = \"\"\nurl = \"x\"\n").unwrap_err();
        assert!(err.to_string().contains("empty name"));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docb.toml");
        fs::write(&path, SAMPLE).unwrap();
        let config = DocbConfig::load(&path).unwrap();
        assert_eq!(config.store.path, dir.path().join("cache"));

        let missing = DocbConfig::load_or_default(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(missing, DocbConfig::default());
    }
}
