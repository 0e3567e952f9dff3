//! Size-bounded file cache with least-recently-used eviction.

use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use super::config::DiskCacheConfig;
use super::error::DiskCacheError;
use super::index::{EvictionIndex, INDEX_FILE_NAME};

const SOURCE: &str = "cache::disk";

enum Eviction {
    Evicted(String),
    /// The least recent key had no file; the size total was rebuilt from disk.
    Resynced,
    Empty,
}

#[cfg(unix)]
const FILE_MODE: u32 = 0o740;

/// Byte blobs stored as files named by their key, bounded by total size.
///
/// The running size total lives in memory. It is rebuilt from the directory
/// listing whenever the cache is opened and only changes through [`set`] and
/// [`evict`]. Single writer only: concurrent processes sharing a directory
/// are not supported.
///
/// [`set`]: LruFileCache::set
/// [`evict`]: LruFileCache::evict
pub struct LruFileCache {
    dir: PathBuf,
    max_size: u64,
    current_size: u64,
    index: EvictionIndex,
}

impl LruFileCache {
    /// Open the cache described by `config`, creating it on first use.
    pub fn open(config: &DiskCacheConfig) -> Result<Self, DiskCacheError> {
        let existing = config.cache_dir.join(INDEX_FILE_NAME).is_file();
        create_cache_dir(&config.cache_dir)?;

        let dir = fs::canonicalize(&config.cache_dir)?;
        let index = EvictionIndex::open(&dir)?;

        let mut cache = Self {
            dir,
            max_size: config.max_size_bytes,
            current_size: 0,
            index,
        };

        cache.current_size = cache.rescan()?;
        gauge!("pixfeed_disk_cache_bytes").set(cache.current_size as f64);

        info!(
            target = SOURCE,
            dir = %cache.dir.display(),
            entries = cache.index.len()?,
            bytes = cache.current_size,
            max_bytes = cache.max_size,
            reopened = existing,
            "disk cache opened"
        );

        Ok(cache)
    }

    /// Store `value` under `key` and return the absolute path of its file.
    pub fn set(&mut self, key: &str, value: &[u8]) -> Result<PathBuf, DiskCacheError> {
        validate_key(key)?;
        let path = self.entry_path(key);
        write_entry(&path, value)?;

        let now = unix_now();
        if self.index.touch(key, now)? {
            debug!(target = SOURCE, key, "refreshed cache entry");
            return Ok(path);
        }

        self.index.insert(key, now)?;
        self.current_size += fs::metadata(&path)?.len();
        debug!(
            target = SOURCE,
            key,
            bytes = value.len(),
            total = self.current_size,
            "inserted cache entry"
        );

        while self.current_size > self.max_size {
            if let Eviction::Empty = self.evict_one()? {
                break;
            }
        }
        gauge!("pixfeed_disk_cache_bytes").set(self.current_size as f64);

        Ok(path)
    }

    /// Path of the cached file for `key`, refreshing its access time on a hit.
    pub fn get_path(&mut self, key: &str) -> Result<Option<PathBuf>, DiskCacheError> {
        validate_key(key)?;
        if !self.index.touch(key, unix_now())? {
            counter!("pixfeed_disk_cache_miss_total").increment(1);
            return Ok(None);
        }

        counter!("pixfeed_disk_cache_hit_total").increment(1);
        debug!(target = SOURCE, key, "cache hit");
        Ok(Some(self.entry_path(key)))
    }

    /// Contents of the cached file for `key`, refreshing its access time on a hit.
    pub fn get_value(&mut self, key: &str) -> Result<Option<Vec<u8>>, DiskCacheError> {
        match self.get_path(key)? {
            Some(path) => Ok(Some(fs::read(path)?)),
            None => Ok(None),
        }
    }

    /// Remove the least recently used entry, returning its key.
    ///
    /// Does nothing when the cache holds no bytes.
    pub fn evict(&mut self) -> Result<Option<String>, DiskCacheError> {
        loop {
            match self.evict_one()? {
                Eviction::Evicted(key) => return Ok(Some(key)),
                Eviction::Resynced if self.current_size > 0 => continue,
                Eviction::Resynced | Eviction::Empty => return Ok(None),
            }
        }
    }

    fn evict_one(&mut self) -> Result<Eviction, DiskCacheError> {
        if self.current_size == 0 {
            return Ok(Eviction::Empty);
        }

        let Some(key) = self.index.least_recent()? else {
            warn!(
                target = SOURCE,
                bytes = self.current_size,
                "size total is non-zero but the eviction index is empty"
            );
            return Ok(Eviction::Empty);
        };

        let path = self.entry_path(&key);
        let size = match fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(
                    target = SOURCE,
                    key = key.as_str(),
                    bytes = self.current_size,
                    "least recent entry has no cache file, rescanning"
                );
                self.current_size = self.rescan()?;
                gauge!("pixfeed_disk_cache_bytes").set(self.current_size as f64);
                return Ok(Eviction::Resynced);
            }
            Err(err) => return Err(err.into()),
        };
        fs::remove_file(&path)?;
        self.index.remove(&key)?;
        self.current_size = self.current_size.saturating_sub(size);

        counter!("pixfeed_disk_cache_evict_total").increment(1);
        info!(
            target = SOURCE,
            key = key.as_str(),
            bytes = size,
            total = self.current_size,
            "evicted cache entry"
        );

        Ok(Eviction::Evicted(key))
    }

    pub fn contains(&self, key: &str) -> Result<bool, DiskCacheError> {
        Ok(self.index.contains(key)?)
    }

    /// Last access time of `key` in Unix seconds, without refreshing it.
    pub fn last_access(&self, key: &str) -> Result<Option<i64>, DiskCacheError> {
        Ok(self.index.last_access(key)?)
    }

    pub fn len(&self) -> Result<u64, DiskCacheError> {
        Ok(self.index.len()?)
    }

    pub fn is_empty(&self) -> Result<bool, DiskCacheError> {
        Ok(self.index.is_empty()?)
    }

    pub fn current_size(&self) -> u64 {
        self.current_size
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }

    /// Sum the sizes of the files on disk and bring the index back in line
    /// with the directory listing.
    fn rescan(&mut self) -> Result<u64, DiskCacheError> {
        let mut total = 0;
        let mut on_disk = HashSet::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if !metadata.is_file() {
                continue;
            }
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                total += metadata.len();
                warn!(
                    target = SOURCE,
                    file = ?name,
                    bytes = metadata.len(),
                    "counted cache file whose name is not a valid key"
                );
                continue;
            };
            if name.starts_with(INDEX_FILE_NAME) {
                continue;
            }

            total += metadata.len();
            if !self.index.contains(name)? {
                let modified = metadata
                    .modified()
                    .ok()
                    .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                    .map(|elapsed| elapsed.as_secs() as i64)
                    .unwrap_or_else(unix_now);
                self.index.insert(name, modified)?;
                warn!(
                    target = SOURCE,
                    key = name,
                    "adopted unindexed cache file"
                );
            }
            on_disk.insert(name.to_string());
        }

        for key in self.index.keys()? {
            if !on_disk.contains(key.as_str()) {
                self.index.remove(&key)?;
                warn!(
                    target = SOURCE,
                    key = key.as_str(),
                    "dropped index entry without a cache file"
                );
            }
        }

        Ok(total)
    }
}

fn validate_key(key: &str) -> Result<(), DiskCacheError> {
    if key.is_empty() {
        return Err(DiskCacheError::invalid_key(key, "key must not be empty"));
    }
    if key == "." || key == ".." {
        return Err(DiskCacheError::invalid_key(key, "key must not be a relative path"));
    }
    if key.contains(['/', '\\', '\0']) {
        return Err(DiskCacheError::invalid_key(
            key,
            "key must be a single path component",
        ));
    }
    if key.starts_with(INDEX_FILE_NAME) {
        return Err(DiskCacheError::invalid_key(
            key,
            "key collides with the eviction index",
        ));
    }
    Ok(())
}

fn create_cache_dir(dir: &Path) -> Result<(), DiskCacheError> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(FILE_MODE);
    }
    builder.create(dir)?;
    Ok(())
}

fn write_entry(path: &Path, value: &[u8]) -> Result<(), DiskCacheError> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(FILE_MODE);
    }
    let mut file = options.open(path)?;
    file.write_all(value)?;
    file.flush()?;
    Ok(())
}

fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
