use std::collections::{BTreeMap, BTreeSet};

use docb_crypto::{ContentHasher, FieldDigest};
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};
use crate::repo::RepoHash;

/// Fingerprint over every input of a build.
///
/// Two signatures with the same `build_hash` describe interchangeable builds.
/// `metadata` is free-form and excluded from the hash.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSignature {
    /// Sorted by repository name.
    pub repo_hashes: Vec<RepoHash>,
    pub theme: String,
    pub theme_version: String,
    /// Sorted and deduplicated.
    pub transforms: Vec<String>,
    pub config_hash: String,
    pub build_hash: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl BuildSignature {
    pub fn builder() -> SignatureBuilder {
        SignatureBuilder::default()
    }

    /// Recompute the digest over the normalized fields.
    ///
    /// Assumes `repo_hashes` and `transforms` are already normalized, which
    /// holds for every signature produced by [`SignatureBuilder`].
    pub fn compute_build_hash(&self) -> String {
        let mut digest = FieldDigest::new(&ContentHasher::SIGNATURE);
        digest = digest.field("repos", &(self.repo_hashes.len() as u64).to_le_bytes());
        for repo in &self.repo_hashes {
            digest = digest
                .str_field("repo.name", &repo.name)
                .str_field("repo.commit", &repo.commit)
                .str_field("repo.content", &repo.content_hash);
        }
        digest
            .str_field("theme", &self.theme)
            .str_field("theme_version", &self.theme_version)
            .list_field("transforms", &self.transforms)
            .str_field("config", &self.config_hash)
            .finish()
            .to_hex()
    }

    /// Returns `true` if `build_hash` matches the other fields.
    pub fn verify(&self) -> bool {
        self.build_hash == self.compute_build_hash()
    }

    /// The repository entry with the given name, if present.
    pub fn repo(&self, name: &str) -> Option<&RepoHash> {
        self.repo_hashes
            .binary_search_by(|r| r.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.repo_hashes[i])
    }

    /// First 12 characters of the build hash.
    pub fn short_hash(&self) -> &str {
        self.build_hash.get(..12).unwrap_or(&self.build_hash)
    }
}

/// Collects build inputs in any order and produces a normalized
/// [`BuildSignature`].
#[derive(Clone, Debug, Default)]
pub struct SignatureBuilder {
    repos: Vec<RepoHash>,
    theme: String,
    theme_version: String,
    transforms: Vec<String>,
    config_hash: String,
    metadata: BTreeMap<String, String>,
}

impl SignatureBuilder {
    pub fn repo(mut self, repo: RepoHash) -> Self {
        self.repos.push(repo);
        self
    }

    pub fn repos(mut self, repos: impl IntoIterator<Item = RepoHash>) -> Self {
        self.repos.extend(repos);
        self
    }

    pub fn theme(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.theme = name.into();
        self.theme_version = version.into();
        self
    }

    pub fn transform(mut self, name: impl Into<String>) -> Self {
        self.transforms.push(name.into());
        self
    }

    pub fn transforms<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.transforms.extend(names.into_iter().map(Into::into));
        self
    }

    /// Hash a configuration value. Use JSON-deterministic types only
    /// (structs, `BTreeMap`, not `HashMap`).
    pub fn config<T: Serialize>(mut self, config: &T) -> CacheResult<Self> {
        let hash = ContentHasher::CONFIG
            .hash_json(config)
            .map_err(|e| CacheError::Serialization(e.to_string()))?;
        self.config_hash = hash.to_hex();
        Ok(self)
    }

    /// Use a pre-computed configuration digest.
    pub fn config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Normalize the inputs and compute the build hash.
    ///
    /// Fails on a repository with a blank name or content hash, or on two
    /// repositories sharing a name.
    pub fn build(self) -> CacheResult<BuildSignature> {
        let mut repos = self.repos;
        for repo in &repos {
            repo.validate()?;
        }
        repos.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(pair) = repos.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(CacheError::validation(format!(
                "repository {} listed more than once",
                pair[0].name
            )));
        }

        let transforms: Vec<String> = self
            .transforms
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut sig = BuildSignature {
            repo_hashes: repos,
            theme: self.theme,
            theme_version: self.theme_version,
            transforms,
            config_hash: self.config_hash,
            build_hash: String::new(),
            metadata: self.metadata,
        };
        sig.build_hash = sig.compute_build_hash();
        Ok(sig)
    }
}
