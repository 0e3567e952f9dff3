use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiskCacheError {
    #[error("cache i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("eviction index error: {0}")]
    Index(#[from] rusqlite::Error),
    #[error("invalid cache key `{key}`: {reason}")]
    InvalidKey { key: String, reason: &'static str },
}

impl DiskCacheError {
    pub(crate) fn invalid_key(key: &str, reason: &'static str) -> Self {
        Self::InvalidKey {
            key: key.to_string(),
            reason,
        }
    }
}
