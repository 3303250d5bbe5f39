//! Swap result cache for the faceswap-gateway server.
//!
//! Maps a composite content fingerprint (`source_hash:dest_hash`) to the
//! relative path of a previously produced output image, so identical
//! upload pairs within the TTL window never hit the remote model twice.
//!
//! Lookups do not refresh the TTL; entries expire a fixed interval after
//! insertion. Concurrent identical requests for an uncached pair are not
//! deduplicated in flight — the first to finish populates the entry and
//! any racers issue redundant remote calls. That race is accepted.

use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;

/// Default entry lifetime: one hour from insertion.
pub const DEFAULT_TTL_SECONDS: u64 = 3600;

/// Default maximum number of live entries.
pub const DEFAULT_MAX_ENTRIES: u64 = 100;

/// TTL- and capacity-bounded cache of swap results.
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<Cache<String, String>>,
}

impl ResultCache {
    /// Create a cache with the given TTL and maximum entry count.
    pub fn new(ttl_seconds: u64, max_entries: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_entries)
            .time_to_live(Duration::from_secs(ttl_seconds))
            .build();

        Self {
            inner: Arc::new(cache),
        }
    }

    /// Build a cache key from the two content hashes.
    ///
    /// Source and destination are not interchangeable: swapping `(A, B)`
    /// and `(B, A)` are different requests with different keys.
    pub fn key(source_hash: &str, dest_hash: &str) -> String {
        format!("{}:{}", source_hash, dest_hash)
    }

    /// Look up a cached output path, if present and not expired.
    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key)
    }

    /// Store an output path, overwriting any existing entry for the key.
    pub fn insert(&self, key: String, output_path: String) {
        self.inner.insert(key, output_path);
    }

    /// Flush pending eviction work and return the live entry count.
    ///
    /// Intended for tests; moka maintains bounds asynchronously.
    pub fn synced_entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECONDS, DEFAULT_MAX_ENTRIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_is_order_sensitive() {
        let ab = ResultCache::key("aaa", "bbb");
        let ba = ResultCache::key("bbb", "aaa");
        assert_ne!(ab, ba);
    }

    #[test]
    fn test_insert_then_get() {
        let cache = ResultCache::new(60, 10);
        let key = ResultCache::key("s", "d");
        assert!(cache.get(&key).is_none());

        cache.insert(key.clone(), "static/output/face_swap_x.png".to_string());
        assert_eq!(
            cache.get(&key).as_deref(),
            Some("static/output/face_swap_x.png")
        );
    }

    #[test]
    fn test_overwrite_keeps_single_entry() {
        let cache = ResultCache::new(60, 10);
        let key = ResultCache::key("s", "d");
        cache.insert(key.clone(), "first.png".to_string());
        cache.insert(key.clone(), "second.png".to_string());

        assert_eq!(cache.get(&key).as_deref(), Some("second.png"));
        assert_eq!(cache.synced_entry_count(), 1);
    }
}
