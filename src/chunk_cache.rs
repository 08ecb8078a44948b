use lru::LruCache;
use std::sync::{Arc, Mutex, PoisonError};

use crate::raster::Samples;

/// Default decoded-chunk budget per open raster
pub const DEFAULT_CHUNK_CACHE_BYTES: usize = 64 * 1024 * 1024;

/// Decoded TIFF chunk (tile or strip) of one pyramid level
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ChunkKey {
    pub level: usize,
    pub index: u32,
}

struct CacheEntry {
    data: Arc<Samples>,
    size_bytes: usize,
}

struct Entries {
    current_bytes: usize,
    lru: LruCache<ChunkKey, CacheEntry>,
}

/// Byte-budgeted LRU of decoded chunks, owned by a single raster handle
pub struct ChunkCache {
    capacity_bytes: usize,
    entries: Mutex<Entries>,
}

impl ChunkCache {
    #[must_use]
    pub fn new(capacity_bytes: usize) -> Self {
        ChunkCache {
            capacity_bytes,
            entries: Mutex::new(Entries {
                current_bytes: 0,
                lru: LruCache::unbounded(),
            }),
        }
    }

    pub fn get(&self, key: &ChunkKey) -> Option<Arc<Samples>> {
        self.lock().lru.get(key).map(|entry| Arc::clone(&entry.data))
    }

    pub fn insert(&self, key: ChunkKey, data: Arc<Samples>) {
        let size_bytes = data.size_bytes();
        if size_bytes > self.capacity_bytes {
            return;
        }

        let mut entries = self.lock();
        if let Some(old) = entries.lru.pop(&key) {
            entries.current_bytes = entries.current_bytes.saturating_sub(old.size_bytes);
        }

        while entries.current_bytes + size_bytes > self.capacity_bytes {
            if let Some((_key, entry)) = entries.lru.pop_lru() {
                entries.current_bytes = entries.current_bytes.saturating_sub(entry.size_bytes);
            } else {
                break;
            }
        }

        entries.current_bytes = entries.current_bytes.saturating_add(size_bytes);
        entries.lru.put(key, CacheEntry { data, size_bytes });
    }

    /// Bytes currently held
    pub fn size_bytes(&self) -> usize {
        self.lock().current_bytes
    }

    pub fn len(&self) -> usize {
        self.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Entries> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(len: usize) -> Arc<Samples> {
        Arc::new(Samples::U16(vec![7; len]))
    }

    fn key(index: u32) -> ChunkKey {
        ChunkKey { level: 0, index }
    }

    #[test]
    fn test_get_after_insert() {
        let cache = ChunkCache::new(1024);
        let data = chunk(10);
        cache.insert(key(3), Arc::clone(&data));
        assert!(Arc::ptr_eq(&cache.get(&key(3)).unwrap(), &data));
        assert!(cache.get(&ChunkKey { level: 1, index: 3 }).is_none());
        assert_eq!(cache.size_bytes(), 20);
    }

    #[test]
    fn test_byte_budget_evicts_least_recent() {
        // Room for two 40-byte chunks
        let cache = ChunkCache::new(100);
        cache.insert(key(0), chunk(20));
        cache.insert(key(1), chunk(20));
        cache.get(&key(0));
        cache.insert(key(2), chunk(20));

        assert!(cache.get(&key(0)).is_some());
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
        assert_eq!(cache.size_bytes(), 80);
    }

    #[test]
    fn test_oversized_chunk_is_not_cached() {
        let cache = ChunkCache::new(10);
        cache.insert(key(0), chunk(100));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_reinsert_replaces_accounting() {
        let cache = ChunkCache::new(1000);
        cache.insert(key(0), chunk(100));
        cache.insert(key(0), chunk(10));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size_bytes(), 20);
    }
}
