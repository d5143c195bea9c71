//! # Cache Types
//!
//! Values exchanged between the engine and its host.

use bytes::Bytes;
use uuid::Uuid;

use crate::key::CacheKey;
use crate::request::{Headers, ResourceKind};

/// A response served straight from the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: Bytes,
}

/// What the engine tells the host about a fill for a passed-through request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillRole {
    /// This request owns the fill; its response will be stored. The id
    /// correlates the eventual `observe` with this `intercept`.
    Owner(Uuid),
    /// Another request is already filling this key
    Follower,
    /// The request is never cached
    Uncacheable,
}

/// Ticket for a request that goes to the network. The host hands it back
/// inside the matching `ResponseDescriptor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassThrough {
    pub key: CacheKey,
    pub kind: ResourceKind,
    pub role: FillRole,
}

impl PassThrough {
    pub fn owns_fill(&self) -> bool {
        matches!(self.role, FillRole::Owner(_))
    }
}

/// Result of intercepting a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Respond with these bytes; do not go to the network
    Serve(CachedResponse),
    /// Let the request proceed
    Pass(PassThrough),
}

impl Decision {
    pub fn served(&self) -> Option<&CachedResponse> {
        match self {
            Decision::Serve(response) => Some(response),
            Decision::Pass(_) => None,
        }
    }

    pub fn pass_through(&self) -> Option<&PassThrough> {
        match self {
            Decision::Serve(_) => None,
            Decision::Pass(pass) => Some(pass),
        }
    }
}

/// What `observe` did with a completed response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveOutcome {
    /// The response was persisted
    Stored,
    /// A record already existed; the duplicate body was discarded
    AlreadyCached,
    /// Status, classification or size made the response ineligible
    Ineligible,
    /// The response did not own the fill for its key
    NotOwner,
    /// Storage failed; nothing was persisted
    Failed,
}

/// Snapshot of the cache's size and activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub body_bytes: u64,
    pub in_flight: usize,
    pub hot_entries: u64,
}
