use std::path::PathBuf;
use std::sync::PoisonError;

use docb_types::{BuildId, ObjectHash};

/// Errors from object store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested object was not found.
    #[error("object not found: {0}")]
    NotFound(ObjectHash),

    /// No references are recorded for the requested build.
    #[error("no references recorded for build {0}")]
    BuildRefNotFound(BuildId),

    /// Malformed or missing input.
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An on-disk record could not be decoded.
    #[error("corrupt object at {path}: {reason}")]
    CorruptObject { path: PathBuf, reason: String },

    /// A thread panicked while holding one of the store's locks.
    #[error("store lock poisoned: {0}")]
    LockPoisoned(String),
}

impl StoreError {
    /// Returns `true` for the expected, non-fatal not-found outcomes.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::BuildRefNotFound(_))
    }
}

impl<T> From<PoisonError<T>> for StoreError {
    fn from(e: PoisonError<T>) -> Self {
        Self::LockPoisoned(e.to_string())
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
