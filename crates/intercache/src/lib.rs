//! # Intercache
//!
//! A response cache that sits at the request-interception layer of an
//! embedding host (a browser shell, a webview, a proxy). Cacheable requests
//! are answered from disk; misses go to the network and their responses are
//! persisted for next time.
//!
//! ## Features
//!
//! - Canonical cache keys independent of query parameter order
//! - Exactly one fill per key among concurrent misses
//! - Text, JSON and binary bodies replayed byte for byte
//! - SQLite metadata index and atomically written body blobs
//! - Size-bounded in-memory hot layer
//! - Storage failures degrade to a miss and never break a request

pub mod builder;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod key;
pub mod request;
pub mod store;
pub mod types;

pub use builder::CacheConfigBuilder;
pub use codec::{BodyMode, ContentCodec, EncodedBody, infer_content_type};
pub use config::CacheConfig;
pub use engine::CacheEngine;
pub use error::{CacheError, CacheResult};
pub use key::{CacheKey, CacheKeyBuilder};
pub use request::{Headers, Method, RequestDescriptor, ResourceKind, ResponseDescriptor};
pub use types::{CacheStats, CachedResponse, Decision, FillRole, ObserveOutcome, PassThrough};

// Re-export storage backends
pub use store::{
    BlobStore, BodyLocator, CacheRecord, FileBlobStore, HotCache, MetadataStore,
    SqliteMetadataStore, StoreStats,
};
