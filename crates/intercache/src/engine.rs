//! # Cache Engine
//!
//! Entry points for the host: [`CacheEngine::intercept`] runs before a
//! request is sent and either serves it from the cache or lets it through;
//! [`CacheEngine::observe`] runs when a passed-through response completes and
//! stores it if this request owned the fill.
//!
//! Storage failures never surface to the host. They are logged and the
//! affected request behaves as a miss.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::io;
use tracing::{debug, info, warn};
use url::Url;

use crate::codec::{BodyMode, ContentCodec};
use crate::config::CacheConfig;
use crate::coordinator::FillCoordinator;
use crate::error::{CacheError, CacheResult};
use crate::key::{CacheKey, CacheKeyBuilder};
use crate::request::{RequestDescriptor, ResponseDescriptor, storable_headers};
use crate::store::{
    BlobStore, BodyLocator, CacheRecord, FileBlobStore, HotCache, MetadataStore,
    SqliteMetadataStore, StoreStats,
};
use crate::types::{CacheStats, CachedResponse, Decision, FillRole, ObserveOutcome, PassThrough};

pub struct CacheEngine {
    config: CacheConfig,
    keys: CacheKeyBuilder,
    metadata: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    hot: Option<HotCache>,
    fills: FillCoordinator,
}

impl CacheEngine {
    /// Open the metadata database and blob directory under `config.root_dir`.
    pub async fn open(config: CacheConfig) -> CacheResult<Self> {
        let metadata = SqliteMetadataStore::open(config.metadata_path()).await?;
        let blobs = FileBlobStore::open(config.blob_dir()).await?;
        info!(
            root = ?config.root_dir,
            entries = metadata.stats().await.entries,
            "Cache engine opened"
        );
        Ok(Self::with_stores(config, Arc::new(metadata), Arc::new(blobs)))
    }

    /// Build an engine over caller-supplied stores.
    pub fn with_stores(
        config: CacheConfig,
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            keys: CacheKeyBuilder::new().with_origin(config.key_includes_origin),
            hot: HotCache::new(config.memory_cache_size),
            fills: FillCoordinator::new(config.fill_timeout),
            metadata,
            blobs,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn key_for(&self, request: &RequestDescriptor) -> CacheKey {
        self.keys.build(request)
    }

    /// Decide whether `request` is served from the cache or goes to the
    /// network. At most one of many concurrent misses for a key is told it
    /// owns the fill.
    pub async fn intercept(&self, request: &RequestDescriptor) -> Decision {
        let key = self.keys.build(request);

        // HEAD responses carry no body to replay
        if !self.config.is_cacheable_kind(request.kind) || !request.method.has_response_body() {
            return Decision::Pass(PassThrough {
                key,
                kind: request.kind,
                role: FillRole::Uncacheable,
            });
        }

        if let Some(response) = self.load(&key, &request.url).await {
            debug!(key = %key, url = %request.url, "Cache hit");
            return Decision::Serve(response);
        }

        let role = self.fills.try_acquire(&key);
        debug!(key = %key, url = %request.url, role = ?role, "Cache miss");
        Decision::Pass(PassThrough {
            key,
            kind: request.kind,
            role,
        })
    }

    /// Like `intercept` but never takes part in fill bookkeeping. Expired or
    /// unreadable entries it comes across are still removed.
    pub async fn lookup(&self, request: &RequestDescriptor) -> Option<CachedResponse> {
        if !self.config.is_cacheable_kind(request.kind) || !request.method.has_response_body() {
            return None;
        }
        let key = self.keys.build(request);
        self.load(&key, &request.url).await
    }

    /// Report a completed pass-through response. Only the fill owner's
    /// response is stored; the fill token is released whatever happens.
    pub async fn observe(&self, response: ResponseDescriptor) -> ObserveOutcome {
        let pass = &response.pass;
        let id = match pass.role {
            FillRole::Owner(id) => id,
            FillRole::Follower => {
                debug!(key = %pass.key, "Response from a non-owning request, ignoring");
                return ObserveOutcome::NotOwner;
            }
            FillRole::Uncacheable => return ObserveOutcome::Ineligible,
        };

        let guard = self.fills.guard(pass.key.clone(), id);
        if !guard.is_current() {
            warn!(key = %pass.key, "Fill expired before its response completed, discarding");
            return ObserveOutcome::NotOwner;
        }

        if let Some(reason) = self.ineligibility(&response) {
            debug!(
                key = %pass.key,
                status = response.status,
                reason,
                "Response not cacheable"
            );
            return ObserveOutcome::Ineligible;
        }

        let outcome = match self.fill(&response).await {
            Ok(()) => {
                debug!(key = %pass.key, size = response.body.len(), "Stored response");
                ObserveOutcome::Stored
            }
            Err(e) if e.is_conflict() => {
                debug!(key = %pass.key, "Response already cached, discarding duplicate");
                ObserveOutcome::AlreadyCached
            }
            Err(e) => {
                warn!(key = %pass.key, error = %e, "Failed to store response");
                ObserveOutcome::Failed
            }
        };

        drop(guard);
        outcome
    }

    /// Remove the entry `request` maps to, metadata first.
    pub async fn purge(&self, request: &RequestDescriptor) -> CacheResult<()> {
        let key = self.keys.build(request);
        self.remove_entry(&key).await
    }

    /// Remove every entry.
    pub async fn clear(&self) -> CacheResult<()> {
        if let Some(hot) = &self.hot {
            hot.clear();
        }
        self.bounded("metadata clear", self.metadata.clear()).await?;
        self.bounded("blob clear", self.blobs.clear()).await?;
        info!(root = ?self.config.root_dir, "Cache cleared");
        Ok(())
    }

    pub async fn stats(&self) -> CacheStats {
        let stored = self
            .bounded("metadata stats", async { Ok(self.metadata.stats().await) })
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to read store statistics");
                StoreStats::default()
            });
        CacheStats {
            entries: stored.entries,
            body_bytes: stored.body_bytes,
            in_flight: self.fills.in_flight(),
            hot_entries: self.hot.as_ref().map_or(0, HotCache::entry_count),
        }
    }

    /// Expire abandoned fills and run hot cache maintenance. Returns the
    /// number of fills expired.
    pub async fn sweep(&self) -> usize {
        let expired = self.fills.sweep();
        if let Some(hot) = &self.hot {
            hot.sweep().await;
        }
        expired
    }

    /// Start a background maintenance task
    pub fn start_maintenance_task(
        self: Arc<Self>,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                interval.tick().await;
                let expired = self.sweep().await;
                if expired > 0 {
                    debug!(expired, "Cache maintenance expired abandoned fills");
                }
            }
        })
    }

    async fn load(&self, key: &CacheKey, url: &Url) -> Option<CachedResponse> {
        if let Some(hot) = &self.hot {
            if let Some(response) = hot.get(key).await {
                return Some(response);
            }
        }

        let record = match self.find_record(key).await {
            Ok(record) => record?,
            Err(e) => {
                warn!(key = %key, error = %e, "Metadata lookup failed, treating as miss");
                return None;
            }
        };

        let ttl = self.remaining_lifetime(&record);
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            debug!(key = %key, stored_at = %record.stored_at, "Cache entry past its max age");
            self.discard(&record).await;
            return None;
        }

        match self.reconstitute(&record, url).await {
            Ok(response) => {
                if let Some(hot) = &self.hot {
                    hot.insert(key.clone(), response.clone(), ttl).await;
                }
                Some(response)
            }
            Err(CacheError::StorageUnavailable(e)) if e.kind() != io::ErrorKind::NotFound => {
                warn!(key = %key, error = %e, "Cached body unavailable, treating as miss");
                None
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding unreadable cache entry");
                self.discard(&record).await;
                None
            }
        }
    }

    async fn reconstitute(&self, record: &CacheRecord, url: &Url) -> CacheResult<CachedResponse> {
        let stored = match &record.body {
            BodyLocator::Inline { text } => Bytes::from(text.clone()),
            locator @ BodyLocator::Blob { .. } => {
                self.bounded("blob read", self.blobs.read(locator)).await?
            }
        };

        if stored.len() as u64 != record.size || digest(&stored) != record.digest {
            return Err(CacheError::Decode(format!(
                "stored body for {} does not match its digest",
                record.key
            )));
        }

        let body = ContentCodec::decode(record.mode, stored)?;
        let headers = ContentCodec::replay_headers(
            &record.headers,
            record.content_type.as_deref(),
            url,
            body.len(),
        );

        Ok(CachedResponse {
            status: record.status,
            headers,
            body,
        })
    }

    /// How much longer `record` may be served, `None` when entries never
    /// expire. Zero once the record is past its max age.
    fn remaining_lifetime(&self, record: &CacheRecord) -> Option<Duration> {
        let max_age = self.config.max_age?;
        let age = Utc::now()
            .signed_duration_since(record.stored_at)
            .to_std()
            .unwrap_or_default();
        Some(max_age.saturating_sub(age))
    }

    fn ineligibility(&self, response: &ResponseDescriptor) -> Option<&'static str> {
        if !self.config.is_cacheable_status(response.status) {
            return Some("status");
        }
        if !self.config.is_cacheable_kind(response.pass.kind) {
            return Some("resource kind");
        }
        if response.body.len() as u64 > self.config.max_body_size {
            return Some("body too large");
        }
        let no_store = response
            .headers
            .get("cache-control")
            .is_some_and(|value| {
                value
                    .split(',')
                    .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"))
            });
        if no_store {
            return Some("no-store");
        }
        None
    }

    async fn fill(&self, response: &ResponseDescriptor) -> CacheResult<()> {
        let key = &response.pass.key;

        // Never overwrite the body of an existing record
        if self.find_record(key).await?.is_some() {
            return Err(CacheError::KeyConflict(key.to_string()));
        }

        let mode = ContentCodec::decide_mode(&response.headers, response.pass.kind);
        let encoded = ContentCodec::encode(mode, response.body.clone());

        let inline_text = matches!(encoded.mode, BodyMode::Text | BodyMode::Structured)
            && encoded.bytes.len() <= self.config.inline_text_limit;
        let body = match inline_text
            .then(|| std::str::from_utf8(&encoded.bytes).ok())
            .flatten()
        {
            Some(text) => BodyLocator::Inline {
                text: text.to_string(),
            },
            None => {
                self.bounded("blob write", self.blobs.write(key, encoded.bytes.clone()))
                    .await?
            }
        };

        let record = CacheRecord {
            key: key.clone(),
            url: response.url.to_string(),
            status: response.status,
            content_type: response.content_type().map(str::to_string),
            mode: encoded.mode,
            headers: storable_headers(&response.headers),
            stored_at: Utc::now(),
            body,
            size: encoded.bytes.len() as u64,
            digest: digest(&encoded.bytes),
        };
        let headers = ContentCodec::replay_headers(
            &record.headers,
            record.content_type.as_deref(),
            &response.url,
            encoded.bytes.len(),
        );
        let status = record.status;
        let locator = record.body.clone();

        // A failed insert leaves the blob unreferenced; its name is unique
        // to this write.
        if let Err(e) = self
            .bounded("metadata insert", self.metadata.insert(record))
            .await
        {
            self.release_body(key, &locator).await;
            return Err(e);
        }

        if let Some(hot) = &self.hot {
            let served = CachedResponse {
                status,
                headers,
                body: encoded.bytes,
            };
            hot.insert(key.clone(), served, self.config.max_age).await;
        }
        Ok(())
    }

    async fn release_body(&self, key: &CacheKey, locator: &BodyLocator) {
        if matches!(locator, BodyLocator::Inline { .. }) {
            return;
        }
        if let Err(e) = self.bounded("blob remove", self.blobs.remove(locator)).await {
            warn!(key = %key, error = %e, "Failed to remove unreferenced body");
        }
    }

    async fn find_record(&self, key: &CacheKey) -> CacheResult<Option<CacheRecord>> {
        self.bounded("metadata lookup", async { Ok(self.metadata.find(key).await) })
            .await
    }

    async fn remove_entry(&self, key: &CacheKey) -> CacheResult<()> {
        if let Some(hot) = &self.hot {
            hot.invalidate(key).await;
        }
        match self.find_record(key).await? {
            Some(record) => self.remove_record(&record).await,
            None => Ok(()),
        }
    }

    /// Remove `record`, metadata first so no reader is left pointing at a
    /// missing body.
    async fn remove_record(&self, record: &CacheRecord) -> CacheResult<()> {
        if let Some(hot) = &self.hot {
            hot.invalidate(&record.key).await;
        }
        self.bounded("metadata remove", self.metadata.remove(&record.key))
            .await?;
        self.bounded("blob remove", self.blobs.remove(&record.body))
            .await
    }

    async fn discard(&self, record: &CacheRecord) {
        if let Err(e) = self.remove_record(record).await {
            warn!(key = %record.key, error = %e, "Failed to remove cache entry");
        }
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        let limit = self.config.io_timeout;
        tokio::time::timeout(limit, fut)
            .await
            .unwrap_or_else(|_| Err(CacheError::timed_out(op, limit)))
    }
}

fn digest(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
