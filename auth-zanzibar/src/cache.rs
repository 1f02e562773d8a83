//! Short-lived memoization of check outcomes
//!
//! Keys are check visitation keys (`namespace:object#relation@subject`).
//! Each entry also records the `namespace:object#` prefixes its evaluation
//! read, so a write on one object evicts every cached decision that
//! depended on it, not only the ones keyed on that object.

use crate::models::object_prefix;
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60);

/// Every this many fills, expired entries are swept out
pub const SWEEP_INTERVAL: u64 = 128;

/// Cache interface used by the engine
pub trait CheckCache: Send + Sync {
    fn get(&self, key: &str) -> Option<bool>;

    fn put(&self, key: &str, allowed: bool);

    /// Store a result computed while the cache was at `generation`.
    /// Dropped if an invalidation happened in between.
    fn put_with_dependencies(
        &self,
        key: &str,
        allowed: bool,
        dependencies: &[String],
        generation: u64,
    ) {
        let _ = dependencies;
        if generation == self.generation() {
            self.put(key, allowed);
        }
    }

    /// Evict every entry on, or depending on, `namespace:object_id`
    fn invalidate_prefix(&self, namespace: &str, object_id: &str);

    fn clear(&self);

    /// Bumped by every invalidation
    fn generation(&self) -> u64 {
        0
    }

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    allowed: bool,
    expires_at: Instant,
}

/// In-process TTL cache
pub struct TtlCache {
    entries: DashMap<String, CacheEntry, RandomState>,
    /// object prefix -> keys whose evaluation read that object
    dependents: DashMap<String, HashSet<String>, RandomState>,
    generation: AtomicU64,
    /// Held shared by fills and exclusively by invalidation, so a fill's
    /// generation check and insert cannot straddle an invalidation
    fill_lock: RwLock<()>,
    fills: AtomicU64,
    ttl: Duration,
}

impl TtlCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::with_hasher(RandomState::new()),
            dependents: DashMap::with_hasher(RandomState::new()),
            generation: AtomicU64::new(0),
            fill_lock: RwLock::new(()),
            fills: AtomicU64::new(0),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drop expired entries and prune the dependency index
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        self.dependents.retain(|_, keys| {
            keys.retain(|key| self.entries.contains_key(key));
            !keys.is_empty()
        });
        before.saturating_sub(self.entries.len())
    }

    /// Count a fill and sweep when the interval comes round
    fn note_fill(&self) {
        let fills = self.fills.fetch_add(1, Ordering::Relaxed) + 1;
        if fills % SWEEP_INTERVAL == 0 {
            let purged = self.purge_expired();
            debug!("Swept {} expired cache entries", purged);
        }
    }

    fn insert(&self, key: &str, allowed: bool) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                allowed,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL)
    }
}

impl CheckCache for TtlCache {
    fn get(&self, key: &str) -> Option<bool> {
        let now = Instant::now();
        match self.entries.get(key) {
            Some(entry) if entry.expires_at > now => return Some(entry.allowed),
            Some(_) => {}
            None => return None,
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    fn put(&self, key: &str, allowed: bool) {
        if self.ttl.is_zero() {
            return;
        }
        self.note_fill();
        let _fill = self.fill_lock.read();
        self.insert(key, allowed);
    }

    fn put_with_dependencies(
        &self,
        key: &str,
        allowed: bool,
        dependencies: &[String],
        generation: u64,
    ) {
        // Would be expired on arrival
        if self.ttl.is_zero() {
            return;
        }
        self.note_fill();

        let _fill = self.fill_lock.read();
        if generation != self.generation() {
            debug!("Skipping cache fill for {}: invalidated during evaluation", key);
            return;
        }
        for prefix in dependencies {
            self.dependents
                .entry(prefix.clone())
                .or_default()
                .insert(key.to_string());
        }
        self.insert(key, allowed);
    }

    fn invalidate_prefix(&self, namespace: &str, object_id: &str) {
        let prefix = object_prefix(namespace, object_id);
        let _invalidating = self.fill_lock.write();
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut evicted = 0usize;
        if let Some((_, keys)) = self.dependents.remove(&prefix) {
            for key in keys {
                if self.entries.remove(&key).is_some() {
                    evicted += 1;
                }
            }
        }
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        evicted += before.saturating_sub(self.entries.len());

        debug!("Invalidated {} cache entries for {}", evicted, prefix);
    }

    fn clear(&self) {
        let _invalidating = self.fill_lock.write();
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
        self.dependents.clear();
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Never stores anything, for callers that need strict freshness
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

impl CheckCache for NoopCache {
    fn get(&self, _key: &str) -> Option<bool> {
        None
    }

    fn put(&self, _key: &str, _allowed: bool) {}

    fn invalidate_prefix(&self, _namespace: &str, _object_id: &str) {}

    fn clear(&self) {}

    fn len(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_and_get() {
        let cache = TtlCache::default();
        assert_eq!(cache.get("document:doc1#viewer@user:alice"), None);

        cache.put("document:doc1#viewer@user:alice", true);
        cache.put("document:doc1#editor@user:alice", false);

        assert_eq!(cache.get("document:doc1#viewer@user:alice"), Some(true));
        assert_eq!(cache.get("document:doc1#editor@user:alice"), Some(false));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_entries_expire() {
        let cache = TtlCache::new(Duration::from_millis(0));
        cache.put("document:doc1#viewer@user:alice", true);
        assert_eq!(cache.get("document:doc1#viewer@user:alice"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_prefix_is_exact_on_object() {
        let cache = TtlCache::default();
        cache.put("document:doc1#viewer@user:alice", true);
        cache.put("document:doc1#owner@user:bob", false);
        cache.put("document:doc10#viewer@user:alice", true);

        cache.invalidate_prefix("document", "doc1");

        assert_eq!(cache.get("document:doc1#viewer@user:alice"), None);
        assert_eq!(cache.get("document:doc1#owner@user:bob"), None);
        assert_eq!(cache.get("document:doc10#viewer@user:alice"), Some(true));
    }

    #[test]
    fn test_invalidate_dependents() {
        let cache = TtlCache::default();
        let generation = cache.generation();
        cache.put_with_dependencies(
            "project:p1#viewer@user:alice",
            false,
            &["project:p1#".to_string(), "organization:acme#".to_string()],
            generation,
        );
        cache.put("organization:other#member@user:alice", false);

        cache.invalidate_prefix("organization", "acme");

        assert_eq!(cache.get("project:p1#viewer@user:alice"), None);
        assert_eq!(cache.get("organization:other#member@user:alice"), Some(false));
    }

    #[test]
    fn test_stale_fill_dropped_after_invalidation() {
        let cache = TtlCache::default();
        let generation = cache.generation();

        cache.invalidate_prefix("document", "doc1");
        cache.put_with_dependencies("document:doc1#viewer@user:alice", false, &[], generation);

        assert_eq!(cache.get("document:doc1#viewer@user:alice"), None);
    }

    #[test]
    fn test_purge_expired_prunes_index() {
        let cache = TtlCache::new(Duration::from_millis(1));
        cache.put_with_dependencies(
            "document:doc1#viewer@user:alice",
            true,
            &["document:doc1#".to_string()],
            cache.generation(),
        );
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cache.purge_expired(), 1);
        assert!(cache.dependents.is_empty());
    }

    #[test]
    fn test_zero_ttl_stores_nothing() {
        let cache = TtlCache::new(Duration::ZERO);
        cache.put_with_dependencies(
            "document:doc1#viewer@user:alice",
            false,
            &["document:doc1#".to_string()],
            cache.generation(),
        );
        assert!(cache.is_empty());
        assert!(cache.dependents.is_empty());
    }

    #[test]
    fn test_fills_sweep_expired_entries() {
        let cache = TtlCache::new(Duration::from_millis(200));
        for i in 0..5 {
            let key = format!("document:old{}#viewer@user:alice", i);
            let dependencies = vec![format!("document:old{}#", i)];
            cache.put_with_dependencies(&key, false, &dependencies, cache.generation());
        }
        std::thread::sleep(Duration::from_millis(250));

        // Nobody reads the old keys again; the sweep alone must drop them
        for i in 0..SWEEP_INTERVAL - 5 {
            cache.put(&format!("document:new{}#viewer@user:alice", i), true);
        }

        assert_eq!(cache.len() as u64, SWEEP_INTERVAL - 5);
        assert!(cache.dependents.iter().all(|entry| !entry.key().starts_with("document:old")));
    }

    #[test]
    fn test_fill_racing_invalidation_is_dropped() {
        let cache = std::sync::Arc::new(TtlCache::default());
        let key = "document:doc1#viewer@user:alice";

        for _ in 0..200 {
            let generation = cache.generation();
            let filler = {
                let cache = cache.clone();
                std::thread::spawn(move || {
                    cache.put_with_dependencies(
                        key,
                        false,
                        &["document:doc1#".to_string()],
                        generation,
                    )
                })
            };
            cache.invalidate_prefix("document", "doc1");
            filler.join().unwrap();

            // Whichever ran first, a value computed before the invalidation is gone
            assert_eq!(cache.get(key), None);
        }
    }

    #[test]
    fn test_noop_cache() {
        let cache = NoopCache;
        cache.put("document:doc1#viewer@user:alice", true);
        assert_eq!(cache.get("document:doc1#viewer@user:alice"), None);
        assert!(cache.is_empty());
    }
}
