//! # Fill Coordinator
//!
//! Tracks which keys have a fill in flight so that, of many concurrent misses
//! for one key, exactly one request owns the fill. The token table is a
//! sharded map: check-then-acquire is atomic per key and unrelated keys never
//! contend on a global lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::key::CacheKey;
use crate::types::FillRole;

/// Marker for one in-flight fill
#[derive(Debug, Clone, Copy)]
struct FillToken {
    id: Uuid,
    acquired_at: Instant,
}

impl FillToken {
    fn new(now: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            acquired_at: now,
        }
    }

    fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        now.saturating_duration_since(self.acquired_at) >= timeout
    }
}

#[derive(Debug)]
pub struct FillCoordinator {
    tokens: DashMap<CacheKey, FillToken>,
    timeout: Duration,
}

impl FillCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tokens: DashMap::new(),
            timeout,
        }
    }

    /// Become the owner of the fill for `key`, or learn that one is already
    /// in progress. An expired token is taken over.
    pub fn try_acquire(&self, key: &CacheKey) -> FillRole {
        let now = Instant::now();
        match self.tokens.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().is_expired(now, self.timeout) {
                    warn!(key = %key, "Fill never completed, handing it to a new request");
                    let token = FillToken::new(now);
                    entry.insert(token);
                    FillRole::Owner(token.id)
                } else {
                    FillRole::Follower
                }
            }
            Entry::Vacant(entry) => {
                let token = FillToken::new(now);
                entry.insert(token);
                FillRole::Owner(token.id)
            }
        }
    }

    /// Whether `id` still holds a live token for `key`.
    pub fn holds(&self, key: &CacheKey, id: Uuid) -> bool {
        let now = Instant::now();
        self.tokens
            .get(key)
            .is_some_and(|token| token.id == id && !token.is_expired(now, self.timeout))
    }

    /// Drop the token for `key` if `id` still holds it. Returns whether a
    /// token was released.
    pub fn release(&self, key: &CacheKey, id: Uuid) -> bool {
        self.tokens
            .remove_if(key, |_, token| token.id == id)
            .is_some()
    }

    /// Hold the token for `key` until the returned guard is dropped.
    pub fn guard(&self, key: CacheKey, id: Uuid) -> FillGuard<'_> {
        FillGuard {
            coordinator: self,
            key,
            id,
        }
    }

    /// Expire tokens whose fill never reported back. Returns how many were
    /// dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.tokens.len();
        self.tokens
            .retain(|_, token| !token.is_expired(now, self.timeout));
        let expired = before.saturating_sub(self.tokens.len());
        if expired > 0 {
            debug!(count = expired, "Expired stale fill tokens");
        }
        expired
    }

    pub fn in_flight(&self) -> usize {
        self.tokens.len()
    }
}

/// Releases a fill token when dropped, whatever path `observe` took
pub struct FillGuard<'a> {
    coordinator: &'a FillCoordinator,
    key: CacheKey,
    id: Uuid,
}

impl FillGuard<'_> {
    pub fn is_current(&self) -> bool {
        self.coordinator.holds(&self.key, self.id)
    }
}

impl Drop for FillGuard<'_> {
    fn drop(&mut self) {
        self.coordinator.release(&self.key, self.id);
    }
}
