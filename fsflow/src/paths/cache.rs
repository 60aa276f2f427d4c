//! Bounded TTL cache for normalized paths.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Sizing for a [`PathCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries; zero disables caching.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Lifetime of an entry, in seconds.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

const fn default_max_entries() -> usize {
    1024
}

const fn default_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl CacheConfig {
    /// Creates a config.
    #[must_use]
    pub const fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries,
            ttl_secs: ttl.as_secs(),
        }
    }

    /// Entry lifetime.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

struct CacheEntry {
    value: PathBuf,
    inserted_at: Instant,
    expires_at: Instant,
}

/// Maps raw input paths to their validated, normalized form.
///
/// When full, the oldest entry is evicted. Expired entries are dropped on
/// access and on insert.
pub struct PathCache {
    max_entries: usize,
    ttl: Duration,
    entries: RwLock<HashMap<PathBuf, CacheEntry>>,
}

impl PathCache {
    /// Creates a cache from its config.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_ttl(config.max_entries, config.ttl())
    }

    /// Creates a cache with a sub-second TTL.
    #[must_use]
    pub fn with_ttl(max_entries: usize, ttl: Duration) -> Self {
        Self {
            max_entries,
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the cached value, or `None` if absent or expired.
    #[must_use]
    pub fn get(&self, key: &Path) -> Option<PathBuf> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }
        self.entries.write().remove(key);
        None
    }

    /// Stores a value, evicting the oldest entry if the cache is full.
    pub fn insert(&self, key: PathBuf, value: PathBuf) {
        if self.max_entries == 0 {
            return;
        }
        let now = Instant::now();
        let mut entries = self.entries.write();
        entries.retain(|_, entry| entry.expires_at > now);

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Clears all entries.
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Returns the number of entries (including potentially expired ones).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for PathCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for PathCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathCache")
            .field("max_entries", &self.max_entries)
            .field("ttl", &self.ttl)
            .field("entries", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn test_cache_hit() {
        let cache = PathCache::default();
        cache.insert(p("a"), p("/work/a"));
        assert_eq!(cache.get(Path::new("a")), Some(p("/work/a")));
        assert_eq!(cache.get(Path::new("b")), None);
    }

    #[test]
    fn test_cache_bound_evicts_oldest() {
        let cache = PathCache::with_ttl(2, Duration::from_secs(60));
        cache.insert(p("a"), p("/a"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(p("b"), p("/b"));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(p("c"), p("/c"));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(Path::new("a")), None);
        assert_eq!(cache.get(Path::new("b")), Some(p("/b")));
        assert_eq!(cache.get(Path::new("c")), Some(p("/c")));
    }

    #[test]
    fn test_cache_ttl_expiry() {
        let cache = PathCache::with_ttl(10, Duration::from_millis(20));
        cache.insert(p("a"), p("/a"));
        assert!(cache.get(Path::new("a")).is_some());

        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(Path::new("a")), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let cache = PathCache::new(CacheConfig::new(0, Duration::from_secs(60)));
        cache.insert(p("a"), p("/a"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_cache_config_deserialize_defaults() {
        let config: CacheConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, CacheConfig::default());
        assert_eq!(config.ttl(), Duration::from_secs(300));
    }
}
