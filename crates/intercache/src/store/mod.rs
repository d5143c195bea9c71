//! # Cache Stores
//!
//! Durable storage for cached responses. Metadata and bodies live in
//! separate stores so headers can be inspected without touching body bytes.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::BodyMode;
use crate::error::CacheResult;
use crate::key::CacheKey;
use crate::request::Headers;

pub use self::blob::FileBlobStore;
pub use self::memory::HotCache;
pub use self::sqlite::SqliteMetadataStore;

pub mod blob;
pub mod memory;
pub mod sqlite;

/// Where the body of a record lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BodyLocator {
    /// Small text body kept inside the metadata record
    Inline { text: String },
    /// Body stored in the blob store under `name`
    Blob { name: String },
}

/// Persisted description of one cached response. Records are never updated
/// in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub key: CacheKey,
    /// URL the response was filled from
    pub url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub mode: BodyMode,
    pub headers: Headers,
    pub stored_at: DateTime<Utc>,
    pub body: BodyLocator,
    /// Size of the stored body in bytes
    pub size: u64,
    /// Hex SHA-256 of the stored body
    pub digest: String,
}

/// Aggregate numbers about the persisted entries
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: usize,
    pub body_bytes: u64,
}

/// Durable key to record mapping
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Look up the record for `key`. Storage problems are logged and reported
    /// as "not found".
    async fn find(&self, key: &CacheKey) -> Option<CacheRecord>;

    /// Persist a new record. Fails with `KeyConflict` when one already exists.
    async fn insert(&self, record: CacheRecord) -> CacheResult<()>;

    /// Remove the record for `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &CacheKey) -> CacheResult<()>;

    /// Remove every record.
    async fn clear(&self) -> CacheResult<()>;

    async fn stats(&self) -> StoreStats;
}

/// Durable storage for response bodies
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `bytes` for `key` under a locator no other write shares.
    /// Readers never observe a partial body.
    async fn write(&self, key: &CacheKey, bytes: Bytes) -> CacheResult<BodyLocator>;

    async fn read(&self, locator: &BodyLocator) -> CacheResult<Bytes>;

    async fn exists(&self, locator: &BodyLocator) -> bool;

    /// Remove the body at `locator`. Removing a missing body is not an error.
    async fn remove(&self, locator: &BodyLocator) -> CacheResult<()>;

    async fn clear(&self) -> CacheResult<()>;
}
