//! Mark-and-sweep bookkeeping.
//!
//! The mark phase is the caller's: it hands the store the set of live hashes
//! (usually [`ObjectStore::root_set`]). The sweep phase is the backend's
//! [`ObjectStore::gc`], which reports what it removed in a [`GcReport`].
//!
//! [`ObjectStore::root_set`]: crate::ObjectStore::root_set
//! [`ObjectStore::gc`]: crate::ObjectStore::gc

use std::fmt;

use docb_types::ObjectHash;
use serde::Serialize;

/// Outcome of one sweep.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Objects examined.
    pub scanned: usize,
    /// Objects deleted.
    pub removed: usize,
    /// Bytes of object data deleted.
    pub bytes_freed: u64,
    /// Hashes deleted, ascending.
    pub removed_hashes: Vec<ObjectHash>,
}

impl GcReport {
    pub(crate) fn record_removal(&mut self, hash: ObjectHash, size: u64) {
        self.removed += 1;
        self.bytes_freed += size;
        self.removed_hashes.push(hash);
    }

    pub(crate) fn finish(mut self) -> Self {
        self.removed_hashes.sort();
        self
    }
}

impl fmt::Display for GcReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned {} objects, removed {} ({} bytes freed)",
            self.scanned, self.removed, self.bytes_freed
        )
    }
}
