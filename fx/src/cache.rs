//! Generic key-value cache with per-entry expiry.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::TtlCacheConfig;

/// Cached entry.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Thread-safe cache with TTL.
///
/// Expiry is checked on every read, so an entry past its deadline is absent
/// even if the sweep has not removed it yet. The sweep only bounds memory.
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    config: TtlCacheConfig,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Create a new cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(TtlCacheConfig::default())
    }

    /// Create a new cache with custom configuration.
    pub fn with_config(config: TtlCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    /// Create a cache whose entries default to `ttl`.
    pub fn with_default_ttl(ttl: Duration) -> Self {
        Self::with_config(TtlCacheConfig {
            default_ttl: ttl,
            ..Default::default()
        })
    }

    /// Get a live value.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Insert with the default TTL.
    pub fn set(&self, key: K, value: V) {
        self.set_with_ttl(key, value, self.config.default_ttl);
    }

    /// Insert with a custom TTL. Replaces any previous entry.
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(key, CacheEntry::new(value, ttl));
    }

    /// Remove an entry. Returns whether one was present.
    pub fn delete(&self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of live entries.
    pub fn size(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Snapshot of live keys.
    pub fn active_keys(&self) -> Vec<K> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| e.is_live(now))
            .map(|e| e.key().clone())
            .collect()
    }

    /// Snapshot of live values.
    pub fn values(&self) -> Vec<V> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone())
            .collect()
    }

    /// Drop expired entries, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let total = self.entries.len();
        let live = self.size();

        CacheStats {
            total_entries: total,
            live_entries: live,
            expired_entries: total.saturating_sub(live),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        self.config.sweep_interval
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Spawn the periodic sweep. It stops when `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let period = self.config.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            debug!(removed, "Swept expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub live_entries: usize,
    pub expired_entries: usize,
}
