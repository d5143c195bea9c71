//! # Builder for CacheConfig
//!
//! Fluent construction of [`CacheConfig`] values.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use intercache::{CacheConfig, ResourceKind};
//!
//! let config = CacheConfig::builder()
//!     .with_root_dir("/tmp/my-app/cache")
//!     .with_fill_timeout(Duration::from_secs(10))
//!     .with_cacheable_kind(ResourceKind::Script)
//!     .with_cacheable_status(203)
//!     .with_memory_cache_size(0)
//!     .build();
//!
//! assert!(config.is_cacheable_kind(ResourceKind::Script));
//! assert!(config.is_cacheable_status(200));
//! ```

use std::path::PathBuf;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::request::ResourceKind;

/// Builder for creating CacheConfig instances with a fluent API
#[derive(Debug, Clone, Default)]
pub struct CacheConfigBuilder {
    /// Internal config being built
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the directory holding all persisted state
    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.config.root_dir = root_dir.into();
        self
    }

    /// Set how long an unfinished fill blocks other requests from filling
    pub fn with_fill_timeout(mut self, timeout: Duration) -> Self {
        self.config.fill_timeout = timeout;
        self
    }

    /// Set the deadline for individual storage operations
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.config.io_timeout = timeout;
        self
    }

    /// Add a status code to the set of cacheable statuses
    pub fn with_cacheable_status(mut self, status: u16) -> Self {
        self.config.cacheable_statuses.insert(status);
        self
    }

    /// Replace the set of cacheable statuses
    pub fn with_cacheable_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.config.cacheable_statuses = statuses.into_iter().collect();
        self
    }

    /// Add a resource classification to the set of cacheable kinds
    pub fn with_cacheable_kind(mut self, kind: ResourceKind) -> Self {
        self.config.cacheable_kinds.insert(kind);
        self
    }

    /// Replace the set of cacheable kinds
    pub fn with_cacheable_kinds(mut self, kinds: impl IntoIterator<Item = ResourceKind>) -> Self {
        self.config.cacheable_kinds = kinds.into_iter().collect();
        self
    }

    /// Set the in-memory hot cache budget in bytes (0 disables it)
    pub fn with_memory_cache_size(mut self, bytes: u64) -> Self {
        self.config.memory_cache_size = bytes;
        self
    }

    pub fn with_inline_text_limit(mut self, bytes: usize) -> Self {
        self.config.inline_text_limit = bytes;
        self
    }

    pub fn with_max_body_size(mut self, bytes: u64) -> Self {
        self.config.max_body_size = bytes;
        self
    }

    /// Treat records older than `max_age` as absent
    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.config.max_age = max_age;
        self
    }

    pub fn with_origin_in_key(mut self, include: bool) -> Self {
        self.config.key_includes_origin = include;
        self
    }

    /// Build the final CacheConfig
    pub fn build(self) -> CacheConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfigBuilder::new().build();
        assert_eq!(config.fill_timeout, Duration::from_secs(30));
        assert!(config.is_cacheable_status(200));
        assert!(!config.is_cacheable_status(206));
        assert!(config.is_cacheable_kind(ResourceKind::Image));
        assert!(config.is_cacheable_kind(ResourceKind::XhrFetch));
        assert!(!config.is_cacheable_kind(ResourceKind::Document));
        assert!(config.max_age.is_none());
    }

    #[test]
    fn test_replacing_sets() {
        let config = CacheConfig::builder()
            .with_root_dir("/var/cache/app")
            .with_cacheable_statuses([200, 203])
            .with_cacheable_kinds([ResourceKind::Document])
            .build();
        assert!(config.is_cacheable_status(203));
        assert!(config.is_cacheable_kind(ResourceKind::Document));
        assert!(!config.is_cacheable_kind(ResourceKind::Image));
        assert_eq!(
            config.metadata_path(),
            PathBuf::from("/var/cache/app/metadata.db")
        );
        assert_eq!(config.blob_dir(), PathBuf::from("/var/cache/app/blobs"));
    }
}
