use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TypeError;
use crate::hash::ObjectHash;
use crate::metadata::{MetaValue, Metadata};

/// The kind of artifact an object holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectType {
    /// A cloned repository working tree (or a pointer to one).
    RepoTree,
    /// The documentation files discovered in one repository.
    DocsManifest,
    /// Output of one content transform over one repository.
    TransformedContent,
    /// A generic build artifact.
    Artifact,
    /// The manifest describing one complete build.
    BuildManifest,
}

impl ObjectType {
    /// Every variant, in declaration order.
    pub const ALL: [ObjectType; 5] = [
        Self::RepoTree,
        Self::DocsManifest,
        Self::TransformedContent,
        Self::Artifact,
        Self::BuildManifest,
    ];

    /// Stable kebab-case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RepoTree => "repo-tree",
            Self::DocsManifest => "docs-manifest",
            Self::TransformedContent => "transformed-content",
            Self::Artifact => "artifact",
            Self::BuildManifest => "build-manifest",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ObjectType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| TypeError::UnknownObjectType(s.to_string()))
    }
}

/// Store-managed bookkeeping attached to every object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    /// Number of `put` calls that resolved to this object.
    pub ref_count: u64,
    /// Caller-defined fields.
    pub custom: Metadata,
}

impl Default for ObjectMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_accessed: now,
            ref_count: 0,
            custom: Metadata::new(),
        }
    }
}

/// An immutable, content-hashed blob.
///
/// `Object` is the unit of storage. The store never interprets `data`; only
/// the caches that wrote an object know how to decode it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Object {
    /// Content hash. Null until the object has been written.
    pub hash: ObjectHash,
    pub object_type: ObjectType,
    pub data: Vec<u8>,
    /// The size of `data` in bytes.
    pub size: u64,
    pub metadata: ObjectMetadata,
}

impl Object {
    /// Create an unhashed object from a type and payload.
    pub fn new(object_type: ObjectType, data: Vec<u8>) -> Self {
        let size = data.len() as u64;
        Self {
            hash: ObjectHash::null(),
            object_type,
            data,
            size,
            metadata: ObjectMetadata::default(),
        }
    }

    /// Attach a custom metadata field.
    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.custom.insert(key, value);
        self
    }

    /// Replace the whole custom metadata bag.
    pub fn with_metadata(mut self, custom: Metadata) -> Self {
        self.metadata.custom = custom;
        self
    }

    /// Supply a pre-computed hash. The store trusts it without verification.
    pub fn with_hash(mut self, hash: ObjectHash) -> Self {
        self.hash = hash;
        self
    }

    /// The hash the store will file this object under: the supplied hash, or
    /// the digest of `data` when none was supplied.
    pub fn content_hash(&self) -> ObjectHash {
        if self.hash.is_null() {
            ObjectHash::of(&self.data)
        } else {
            self.hash
        }
    }

    /// Shorthand for the custom metadata bag.
    pub fn custom(&self) -> &Metadata {
        &self.metadata.custom
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sets_size_and_null_hash() {
        let obj = Object::new(ObjectType::Artifact, b"12345".to_vec());
        assert_eq!(obj.size, 5);
        assert!(obj.hash.is_null());
        assert_eq!(obj.metadata.ref_count, 0);
    }

    #[test]
    fn content_hash_defaults_to_digest_of_data() {
        let obj = Object::new(ObjectType::Artifact, b"payload".to_vec());
        assert_eq!(obj.content_hash(), ObjectHash::of(b"payload"));
    }

    #[test]
    fn supplied_hash_wins() {
        let supplied = ObjectHash::of(b"something else");
        let obj = Object::new(ObjectType::Artifact, b"payload".to_vec()).with_hash(supplied);
        assert_eq!(obj.content_hash(), supplied);
    }

    #[test]
    fn with_custom_populates_bag() {
        let obj = Object::new(ObjectType::RepoTree, Vec::new())
            .with_custom("repo_name", "alpha")
            .with_custom("attempt", 2_i64);
        assert!(obj.custom().str_eq("repo_name", "alpha"));
        assert_eq!(obj.custom().get_int("attempt"), (2, true));
    }

    #[test]
    fn object_type_labels_roundtrip() {
        for t in ObjectType::ALL {
            assert_eq!(t.as_str().parse::<ObjectType>().unwrap(), t);
        }
        assert_eq!(ObjectType::BuildManifest.to_string(), "build-manifest");
        assert!("blob".parse::<ObjectType>().is_err());
    }
}
