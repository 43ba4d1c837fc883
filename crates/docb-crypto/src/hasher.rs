use docb_types::ObjectHash;

/// Domain-separated BLAKE3 content hasher.
///
/// Each hasher carries a domain tag (e.g. `"docb-build-signature-v1"`) that is
/// prepended to every hash computation, so a build signature and a
/// configuration digest over identical bytes never collide.
///
/// Object identity in the store is *not* domain separated: an object's hash is
/// the plain digest of its bytes (see [`ObjectHash::of`]).
pub struct ContentHasher {
    domain: &'static str,
}

impl ContentHasher {
    /// Hasher for whole-build signatures.
    pub const SIGNATURE: Self = Self {
        domain: "docb-build-signature-v1",
    };
    /// Hasher for build configuration values.
    pub const CONFIG: Self = Self {
        domain: "docb-config-v1",
    };
    /// Hasher for repository documentation content.
    pub const REPO_CONTENT: Self = Self {
        domain: "docb-repo-content-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash raw bytes with domain separation.
    pub fn hash(&self, data: &[u8]) -> ObjectHash {
        let mut hasher = self.start();
        hasher.update(data);
        ObjectHash::from_digest(*hasher.finalize().as_bytes())
    }

    /// Hash a serializable value as JSON with domain separation.
    ///
    /// Only deterministic for values whose JSON form is deterministic: structs,
    /// vectors, and `BTreeMap`s are fine, `HashMap`s are not.
    pub fn hash_json<T: serde::Serialize>(&self, value: &T) -> Result<ObjectHash, HasherError> {
        let data =
            serde_json::to_vec(value).map_err(|e| HasherError::Serialization(e.to_string()))?;
        Ok(self.hash(&data))
    }

    /// Verify that data produces the expected hash.
    pub fn verify(&self, data: &[u8], expected: &ObjectHash) -> bool {
        self.hash(data) == *expected
    }

    /// A BLAKE3 hasher already seeded with this domain tag, for streaming input.
    pub fn start(&self) -> blake3::Hasher {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// Errors from hashing operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HasherError {
    #[error("serialization error: {0}")]
    Serialization(String),
}
