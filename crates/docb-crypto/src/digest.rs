//! Unambiguous digests over labelled fields.
//!
//! Concatenating strings before hashing is ambiguous (`"ab" + "c"` and
//! `"a" + "bc"` collide). [`FieldDigest`] frames every label and value with a
//! little-endian length prefix so that distinct field sequences always feed
//! distinct byte streams into the hasher.

use docb_types::ObjectHash;

use crate::hasher::ContentHasher;

/// Incremental digest over an ordered sequence of labelled fields.
pub struct FieldDigest {
    hasher: blake3::Hasher,
}

impl FieldDigest {
    /// Start a digest in the given hashing domain.
    pub fn new(domain: &ContentHasher) -> Self {
        Self {
            hasher: domain.start(),
        }
    }

    fn frame(&mut self, bytes: &[u8]) {
        self.hasher.update(&(bytes.len() as u64).to_le_bytes());
        self.hasher.update(bytes);
    }

    /// Append a labelled byte field.
    pub fn field(mut self, label: &str, value: &[u8]) -> Self {
        self.frame(label.as_bytes());
        self.frame(value);
        self
    }

    /// Append a labelled string field.
    pub fn str_field(self, label: &str, value: &str) -> Self {
        self.field(label, value.as_bytes())
    }

    /// Append a labelled list. The element count is framed too, so an empty
    /// list and a missing list are distinguishable from a list of one empty
    /// string.
    pub fn list_field<S: AsRef<str>>(mut self, label: &str, values: &[S]) -> Self {
        self.frame(label.as_bytes());
        self.hasher.update(&(values.len() as u64).to_le_bytes());
        for value in values {
            self.frame(value.as_ref().as_bytes());
        }
        self
    }

    /// Finish and return the digest.
    pub fn finish(self) -> ObjectHash {
        ObjectHash::from_digest(*self.hasher.finalize().as_bytes())
    }
}
