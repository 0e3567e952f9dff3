//! Local disk cache for image blobs.
//!
//! Files live under a single directory, one per key, next to an SQLite
//! eviction index that records the last access of every key. When the summed
//! size of the files exceeds the configured bound, the least recently used
//! entries are removed until it fits again.
//!
//! ## Configuration
//!
//! ```toml
//! [disk_cache]
//! cache_dir = "/var/cache/pixfeed"
//! max_size_bytes = 536870912
//! ```

mod config;
mod disk;
mod error;
mod index;

pub use config::DiskCacheConfig;
pub use disk::LruFileCache;
pub use error::DiskCacheError;
pub use index::EvictionIndex;
