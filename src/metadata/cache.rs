//! Metadata cache for lazy-loading Gotify application information

use crate::error::{RelayError, Result};
use crate::metadata::types::{CacheEntry, CacheStats};
use crate::source::EntityMetadata;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Where the cache fetches application metadata from on a miss
#[async_trait]
pub trait EntitySource: Send + Sync {
    async fn list_entities(&self) -> Result<Vec<EntityMetadata>>;
}

/// Application metadata cache with lazy population
///
/// A miss fetches the full application list and keeps only the requested
/// entry. Entries expire after the TTL; the sweep task prunes them at twice
/// that interval.
pub struct MetadataCache {
    source: Arc<dyn EntitySource>,
    entries: Arc<DashMap<u32, CacheEntry>>,
    ttl: Duration,
    stats: Arc<RwLock<CacheStats>>,
}

impl MetadataCache {
    /// Create a new metadata cache
    pub fn new(source: Arc<dyn EntitySource>) -> Self {
        Self::with_ttl(source, DEFAULT_TTL)
    }

    /// Create a new metadata cache with custom TTL
    pub fn with_ttl(source: Arc<dyn EntitySource>, ttl: Duration) -> Self {
        tracing::info!(
            ttl_secs = ttl.as_secs(),
            "Creating application metadata cache"
        );

        Self {
            source,
            entries: Arc::new(DashMap::new()),
            ttl,
            stats: Arc::new(RwLock::new(CacheStats::default())),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Resolve application metadata, fetching on miss or expiry
    pub async fn resolve(&self, app_id: u32) -> Result<EntityMetadata> {
        if let Some(entry) = self.fresh_entry(app_id) {
            self.stats.write().await.hits += 1;
            tracing::trace!(app_id = app_id, app = %entry.name, "Application cache hit");
            return Ok(entry);
        }

        self.stats.write().await.misses += 1;
        tracing::debug!(app_id = app_id, "Application cache miss, fetching from Gotify");

        self.fetch(app_id).await
    }

    fn fresh_entry(&self, app_id: u32) -> Option<EntityMetadata> {
        let entry = self.entries.get(&app_id)?;
        if entry.is_stale(self.ttl) {
            tracing::debug!(
                app_id = app_id,
                age_secs = entry.fetched_at.elapsed().as_secs(),
                "Application cache entry stale"
            );
            return None;
        }
        Some(entry.metadata.clone())
    }

    async fn fetch(&self, app_id: u32) -> Result<EntityMetadata> {
        self.stats.write().await.fetches += 1;

        let entities = match self.source.list_entities().await {
            Ok(entities) => entities,
            Err(e) => {
                self.stats.write().await.fetch_errors += 1;
                return Err(e);
            }
        };

        let metadata = entities
            .into_iter()
            .find(|app| app.id == app_id)
            .ok_or(RelayError::Lookup(app_id))?;

        tracing::info!(
            app_id = app_id,
            app = %metadata.name,
            "Fetched and cached application info"
        );
        self.entries
            .insert(app_id, CacheEntry::new(metadata.clone()));
        Ok(metadata)
    }

    /// Get cache statistics
    pub async fn get_stats(&self) -> CacheStats {
        self.stats.read().await.clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Clear stale entries (for periodic cleanup)
    pub fn cleanup_stale(&self) -> usize {
        let ttl = self.ttl;
        let initial = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_stale(ttl));
        let removed = initial.saturating_sub(self.entries.len());

        if removed > 0 {
            tracing::info!(
                removed = removed,
                remaining = self.entries.len(),
                "Cleaned up stale application cache entries"
            );
        }
        removed
    }

    /// Log cache statistics (for periodic monitoring)
    pub async fn log_stats(&self) {
        let stats = self.get_stats().await;

        tracing::info!(
            apps_cached = self.entries.len(),
            hit_rate = stats.hit_rate(),
            fetches = stats.fetches,
            fetch_errors = stats.fetch_errors,
            "Application cache statistics"
        );
    }

    /// Spawn the background sweep, pruning every `2 * ttl` until cancelled
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = cache.ttl * 2;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Application cache sweeper stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        cache.cleanup_stale();
                        cache.log_stats().await;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory application list that counts how often it is fetched
    pub(crate) struct FakeSource {
        pub apps: Vec<EntityMetadata>,
        pub calls: AtomicUsize,
        pub fail: bool,
    }

    impl FakeSource {
        pub(crate) fn new(apps: Vec<EntityMetadata>) -> Arc<Self> {
            Arc::new(Self {
                apps,
                calls: AtomicUsize::new(0),
                fail: false,
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EntitySource for FakeSource {
        async fn list_entities(&self) -> Result<Vec<EntityMetadata>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RelayError::Connection("connection refused".to_string()));
            }
            Ok(self.apps.clone())
        }
    }

    pub(crate) fn app(id: u32, name: &str) -> EntityMetadata {
        EntityMetadata {
            id,
            name: name.to_string(),
            description: format!("{name} description"),
        }
    }

    #[tokio::test]
    async fn test_resolve_within_ttl_fetches_once() {
        let source = FakeSource::new(vec![app(1, "Backup"), app(2, "CI")]);
        let cache = MetadataCache::new(source.clone());

        let first = cache.resolve(1).await.unwrap();
        let second = cache.resolve(1).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.name, "Backup");
        assert_eq!(source.calls(), 1);

        let stats = cache.get_stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.fetches, 1);
    }

    #[tokio::test]
    async fn test_resolve_after_expiry_fetches_again() {
        let source = FakeSource::new(vec![app(1, "Backup")]);
        let cache = MetadataCache::with_ttl(source.clone(), Duration::from_millis(30));

        cache.resolve(1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        cache.resolve(1).await.unwrap();

        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_unknown_app_is_lookup_error() {
        let source = FakeSource::new(vec![app(1, "Backup")]);
        let cache = MetadataCache::new(source.clone());

        let err = cache.resolve(9).await.unwrap_err();
        assert!(matches!(err, RelayError::Lookup(9)));
        assert!(cache.is_empty());

        // Failures are not cached; the next event retries the fetch
        let _ = cache.resolve(9).await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_error_counts() {
        let source = Arc::new(FakeSource {
            apps: vec![],
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let cache = MetadataCache::new(source);

        assert!(cache.resolve(1).await.is_err());
        assert_eq!(cache.get_stats().await.fetch_errors, 1);
    }

    #[tokio::test]
    async fn test_cleanup_stale() {
        let source = FakeSource::new(vec![app(1, "Backup"), app(2, "CI")]);
        let cache = MetadataCache::with_ttl(source, Duration::from_millis(20));

        cache.resolve(1).await.unwrap();
        cache.resolve(2).await.unwrap();
        assert_eq!(cache.len(), 2);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(cache.cleanup_stale(), 2);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let cache = Arc::new(MetadataCache::with_ttl(
            FakeSource::new(vec![]),
            Duration::from_millis(10),
        ));
        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("sweeper should exit")
            .unwrap();
    }
}
