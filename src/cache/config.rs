//! Disk cache configuration.

use std::path::PathBuf;

const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_MAX_SIZE_BYTES: u64 = 512 * 1024 * 1024;

/// Location and size bound of an [`LruFileCache`](super::LruFileCache).
#[derive(Debug, Clone)]
pub struct DiskCacheConfig {
    /// Directory holding cached files and the eviction index.
    pub cache_dir: PathBuf,
    /// Upper bound on the summed size of cached files.
    pub max_size_bytes: u64,
}

impl Default for DiskCacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
        }
    }
}

impl From<&crate::config::DiskCacheSettings> for DiskCacheConfig {
    fn from(settings: &crate::config::DiskCacheSettings) -> Self {
        Self {
            cache_dir: settings.cache_dir.clone(),
            max_size_bytes: settings.max_size_bytes.get(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = DiskCacheConfig::default();
        assert_eq!(config.cache_dir, PathBuf::from("cache"));
        assert_eq!(config.max_size_bytes, 512 * 1024 * 1024);
    }
}
