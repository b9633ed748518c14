//! Metadata cache entry types

use crate::source::EntityMetadata;
use std::time::{Duration, Instant};

/// Cached application metadata with its insertion time
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub metadata: EntityMetadata,

    /// When this entry was fetched
    pub fetched_at: Instant,
}

impl CacheEntry {
    pub fn new(metadata: EntityMetadata) -> Self {
        Self {
            metadata,
            fetched_at: Instant::now(),
        }
    }

    /// Check if this cache entry is stale (older than TTL)
    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() > ttl
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub fetches: u64,
    pub fetch_errors: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> u32 {
        let total = self.hits + self.misses;
        if total > 0 {
            (self.hits as f32 / total as f32 * 100.0) as u32
        } else {
            0
        }
    }
}
