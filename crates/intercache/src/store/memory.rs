//! # Hot Cache
//!
//! Size-bounded in-memory layer in front of the durable stores, using Moka.

use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache as MokaCache;
use tracing::debug;

use crate::key::CacheKey;
use crate::types::CachedResponse;

#[derive(Clone)]
struct HotEntry {
    response: CachedResponse,
    /// Remaining lifetime when inserted, `None` for no limit
    ttl: Option<Duration>,
}

/// Expires each entry after the lifetime it was inserted with
struct RemainingLifetime;

impl Expiry<CacheKey, HotEntry> for RemainingLifetime {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &HotEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &HotEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// Recently served responses, weighted by body size
#[derive(Clone)]
pub struct HotCache {
    cache: MokaCache<CacheKey, HotEntry>,
    max_size: u64,
}

impl HotCache {
    /// Create a hot cache holding at most `max_size_bytes` of bodies. Returns
    /// `None` for a zero budget.
    pub fn new(max_size_bytes: u64) -> Option<Self> {
        if max_size_bytes == 0 {
            return None;
        }

        // Size based eviction
        let cache = MokaCache::builder()
            .weigher(|_k, v: &HotEntry| v.response.body.len().try_into().unwrap_or(u32::MAX))
            .max_capacity(max_size_bytes)
            .expire_after(RemainingLifetime)
            .build();

        debug!(max_size = max_size_bytes, "Hot cache created with size limit");

        Some(Self {
            cache,
            max_size: max_size_bytes,
        })
    }

    pub async fn get(&self, key: &CacheKey) -> Option<CachedResponse> {
        self.cache.get(key).await.map(|entry| entry.response)
    }

    /// Keep `response` for at most `ttl`, or until evicted when `None`.
    pub async fn insert(&self, key: CacheKey, response: CachedResponse, ttl: Option<Duration>) {
        // A single entry shouldn't be larger than the total cache size
        if response.body.len() as u64 > self.max_size {
            debug!(key = %key, size = response.body.len(), "Entry too large for hot cache, skipping");
            return;
        }
        if ttl.is_some_and(|ttl| ttl.is_zero()) {
            return;
        }
        self.cache.insert(key, HotEntry { response, ttl }).await;
    }

    pub async fn invalidate(&self, key: &CacheKey) {
        self.cache.invalidate(key).await;
    }

    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Eagerly run Moka's pending maintenance (evictions, invalidations).
    pub async fn sweep(&self) {
        self.cache.run_pending_tasks().await;
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}
