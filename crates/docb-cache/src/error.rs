use docb_store::StoreError;
use docb_types::ObjectHash;

/// Errors from cache lookups and writes.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The underlying object store failed. Never reported as a cache miss.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Malformed or missing input (empty name, empty hash, ...).
    #[error("validation error: {0}")]
    Validation(String),

    /// A value could not be encoded for storage.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A cached object exists but its payload cannot be decoded.
    #[error("corrupt cache entry {hash}: {reason}")]
    Corrupt { hash: ObjectHash, reason: String },

    /// Reading repository content for hashing failed.
    #[error("I/O error while hashing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CacheError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
