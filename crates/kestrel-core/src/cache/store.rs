//! Byte-bounded LRU store

use bytes::Bytes;
use lru::LruCache;
use tracing::{debug, warn};

/// Response bodies keyed by origin URL, evicted least-recently-used first
/// once the total size exceeds the byte limit.
pub struct CacheStore {
    entries: LruCache<String, Bytes>,
    size_bytes: u64,
    byte_limit: u64,
}

impl CacheStore {
    pub fn new(byte_limit: u64) -> Self {
        Self {
            entries: LruCache::unbounded(),
            size_bytes: 0,
            byte_limit,
        }
    }

    /// Stores `body`; returns false if it alone exceeds the byte limit
    pub fn insert(&mut self, key: String, body: Bytes) -> bool {
        let len = body.len() as u64;
        if len > self.byte_limit {
            warn!(key = %key, len, byte_limit = self.byte_limit, "Entry larger than cache");
            return false;
        }

        if let Some(previous) = self.entries.put(key, body) {
            self.size_bytes -= previous.len() as u64;
        }
        self.size_bytes += len;

        while self.size_bytes > self.byte_limit {
            match self.entries.pop_lru() {
                Some((evicted, body)) => {
                    self.size_bytes -= body.len() as u64;
                    debug!(key = %evicted, len = body.len(), "Evicted cache entry");
                }
                None => break,
            }
        }
        true
    }

    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        self.entries.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.size_bytes = 0;
    }
}
