use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::request::ResourceKind;

/// Configurable options for the cache engine
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Application-private directory holding the metadata database and blobs
    pub root_dir: PathBuf,

    /// How long a fill may stay in flight before another request may take it
    pub fill_timeout: Duration,

    /// Deadline for any single storage operation
    pub io_timeout: Duration,

    /// Response statuses that are stored
    pub cacheable_statuses: BTreeSet<u16>,

    /// Resource classifications that are looked up and stored
    pub cacheable_kinds: BTreeSet<ResourceKind>,

    /// Budget of the in-memory hot cache in bytes (0 disables it)
    pub memory_cache_size: u64,

    /// Text bodies up to this many bytes are kept inside the metadata record
    pub inline_text_limit: usize,

    /// Bodies larger than this are never stored
    pub max_body_size: u64,

    /// Records older than this are treated as absent. `None` keeps entries
    /// until they are purged or cleared.
    pub max_age: Option<Duration>,

    /// Include scheme, host and port in cache keys
    pub key_includes_origin: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir().join("intercache"),
            fill_timeout: Duration::from_secs(30),
            io_timeout: Duration::from_secs(5),
            cacheable_statuses: BTreeSet::from([200]),
            cacheable_kinds: BTreeSet::from([ResourceKind::Image, ResourceKind::XhrFetch]),
            memory_cache_size: 32 * 1024 * 1024, // 32MB
            inline_text_limit: 4 * 1024,
            max_body_size: 64 * 1024 * 1024, // 64MB
            max_age: None,
            key_includes_origin: false,
        }
    }
}

impl CacheConfig {
    pub fn builder() -> crate::builder::CacheConfigBuilder {
        crate::builder::CacheConfigBuilder::new()
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.root_dir.join("metadata.db")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.root_dir.join("blobs")
    }

    pub fn is_cacheable_kind(&self, kind: ResourceKind) -> bool {
        self.cacheable_kinds.contains(&kind)
    }

    pub fn is_cacheable_status(&self, status: u16) -> bool {
        self.cacheable_statuses.contains(&status)
    }
}
