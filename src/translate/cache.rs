//! In-memory LRU translation cache (L1).
//! Key: blake3 hash of (target_lang | source_text). No TTL: entries live until
//! evicted by capacity pressure or an explicit `clear()`.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

use super::Language;

/// Smallest capacity the cache accepts.
pub const MIN_CAPACITY: usize = 100;

pub type CacheKey = [u8; 32];

pub struct TranslationCache {
    inner: Mutex<LruCache<CacheKey, String>>,
    capacity: usize,
}

impl TranslationCache {
    /// Capacities below `MIN_CAPACITY` are raised to it.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(MIN_CAPACITY);
        let bound = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(bound)),
            capacity,
        }
    }

    /// Compute the cache key for a (language, text) pair.
    pub fn compute_key(target: Language, source_text: &str) -> CacheKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(target.as_str().as_bytes());
        hasher.update(b"|");
        hasher.update(source_text.as_bytes());
        *hasher.finalize().as_bytes()
    }

    /// Look up a cached translation, refreshing its recency.
    pub fn get(&self, key: &CacheKey) -> Option<String> {
        self.inner.lock().get(key).cloned()
    }

    /// Insert a translation, evicting the least recently used entry when full.
    pub fn insert(&self, key: CacheKey, translated_text: String) {
        self.inner.lock().put(key, translated_text);
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
