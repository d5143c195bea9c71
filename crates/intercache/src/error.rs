use std::time::Duration;

// Error type for cache operations. None of these ever reach the host: the
// engine logs them and degrades to a miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] std::io::Error),

    #[error("Cache key already present: {0}")]
    KeyConflict(String),

    #[error("Cannot decode cached body: {0}")]
    Decode(String),

    #[error("Cache key cannot be mapped to a storage path: {0}")]
    SanitizationRejected(String),

    #[error("Metadata database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl CacheError {
    /// Storage I/O that did not finish within the configured deadline.
    pub fn timed_out(op: &str, after: Duration) -> Self {
        CacheError::StorageUnavailable(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{op} did not complete within {after:?}"),
        ))
    }

    /// Whether the error only means "someone else already stored this key".
    pub fn is_conflict(&self) -> bool {
        matches!(self, CacheError::KeyConflict(_))
    }
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;
