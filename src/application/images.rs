//! Image lookup through the local disk cache with a guarded remote fallback.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::breaker::{BreakerError, CircuitBreaker};
use crate::cache::{DiskCacheError, LruFileCache};
use crate::util::lock::mutex_lock;

const SOURCE: &str = "application::images";

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{key}` not found")]
    NotFound { key: String },
    #[error("object store answered {status} for `{key}`")]
    Status { key: String, status: u16 },
    #[error("object store request failed: {message}")]
    Transport { message: String },
}

impl ObjectStoreError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }

    /// Whether the error means the store itself is unhealthy.
    ///
    /// Missing objects and other client errors say nothing about the store's
    /// health and are not counted against it.
    pub fn is_unavailable(&self) -> bool {
        match self {
            ObjectStoreError::NotFound { .. } => false,
            ObjectStoreError::Status { status, .. } => *status >= 500,
            ObjectStoreError::Transport { .. } => true,
        }
    }
}

/// Remote blob store addressed by key.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError>;
}

#[derive(Debug, Error)]
pub enum ImageError {
    #[error(transparent)]
    Cache(#[from] DiskCacheError),
    #[error("image store is unavailable (circuit breaker `{breaker}` open)")]
    Unavailable { breaker: String },
    #[error("image fetch failed")]
    Fetch(#[source] ObjectStoreError),
    #[error("image `{key}` not found")]
    NotFound { key: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    Cache,
    Store,
}

impl ImageOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageOrigin::Cache => "cache",
            ImageOrigin::Store => "store",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedImage {
    pub path: PathBuf,
    pub origin: ImageOrigin,
}

/// Serves images from the disk cache, filling misses from the object store.
pub struct ImageCacheService {
    cache: Mutex<LruFileCache>,
    store: Arc<dyn ObjectStore>,
    breaker: CircuitBreaker<ObjectStoreError>,
}

impl ImageCacheService {
    /// The breaker's monitor is replaced so that only store outages count.
    pub fn new(
        cache: LruFileCache,
        store: Arc<dyn ObjectStore>,
        breaker: CircuitBreaker<ObjectStoreError>,
    ) -> Self {
        Self {
            cache: Mutex::new(cache),
            store,
            breaker: breaker.monitoring(ObjectStoreError::is_unavailable),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker<ObjectStoreError> {
        &self.breaker
    }

    /// Local path of the image stored under `key`.
    pub async fn fetch(&self, key: &str) -> Result<CachedImage, ImageError> {
        let cached = mutex_lock(&self.cache, SOURCE, "fetch").get_path(key)?;
        if let Some(path) = cached {
            debug!(target = SOURCE, key, "image served from disk cache");
            return Ok(CachedImage {
                path,
                origin: ImageOrigin::Cache,
            });
        }

        let store = Arc::clone(&self.store);
        let bytes = self
            .breaker
            .call(|| async move { store.get(key).await })
            .await
            .map_err(|err| self.classify(key, err))?;

        let path = mutex_lock(&self.cache, SOURCE, "fetch").set(key, &bytes)?;
        info!(
            target = SOURCE,
            key,
            bytes = bytes.len(),
            "image fetched from object store"
        );

        Ok(CachedImage {
            path,
            origin: ImageOrigin::Store,
        })
    }

    fn classify(&self, key: &str, err: BreakerError<ObjectStoreError>) -> ImageError {
        match err {
            BreakerError::Bypass { breaker, state } => {
                warn!(
                    target = SOURCE,
                    key,
                    breaker = breaker.as_str(),
                    state = state.as_str(),
                    "object store call bypassed"
                );
                ImageError::Unavailable { breaker }
            }
            BreakerError::Failure { source, .. } => ImageError::Fetch(source),
            BreakerError::Unmonitored(ObjectStoreError::NotFound { key }) => {
                ImageError::NotFound { key }
            }
            BreakerError::Unmonitored(other) => ImageError::Fetch(other),
        }
    }
}
