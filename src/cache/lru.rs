//! LRU (Least Recently Used) cache for decoded table blocks.
//!
//! Entries are charged by their byte size against a fixed capacity. Recency is
//! a monotonically increasing tick per access; the `BTreeMap` keyed by tick
//! gives the eviction order.

use crate::sstable::Block;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

/// Identifies a cached block: table id plus block offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Table file id
    pub file_id: u64,
    /// Block offset in the file
    pub offset: u32,
}

impl CacheKey {
    /// Create a new cache key
    pub fn new(file_id: u64, offset: u32) -> Self {
        Self { file_id, offset }
    }
}

/// Statistics for cache performance monitoring.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits
    pub hits: u64,
    /// Number of cache misses
    pub misses: u64,
    /// Number of insertions
    pub insertions: u64,
    /// Number of evictions
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, (Block, u64)>,
    order: BTreeMap<u64, CacheKey>,
    tick: u64,
    size: usize,
    stats: CacheStats,
}

impl Inner {
    fn bump(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &CacheKey) -> Option<Block> {
        let (block, tick) = self.entries.remove(key)?;
        self.order.remove(&tick);
        self.size -= block.size();
        Some(block)
    }
}

/// Thread-safe block cache shared by every open table.
///
/// A miss is never an error: callers read and verify the block from the file
/// and insert it.
#[derive(Debug)]
pub struct BlockCache {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl BlockCache {
    /// Create a cache holding up to `capacity` bytes. Zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self { capacity, inner: Mutex::new(Inner::default()) }
    }

    /// Looks up a block and marks it most recently used.
    pub fn get(&self, key: &CacheKey) -> Option<Block> {
        let mut inner = self.inner.lock();
        let tick = inner.bump();
        let found = match inner.entries.get_mut(key) {
            Some((block, last)) => {
                let old = std::mem::replace(last, tick);
                Some((block.clone(), old))
            }
            None => None,
        };
        match found {
            Some((block, old)) => {
                inner.order.remove(&old);
                inner.order.insert(tick, *key);
                inner.stats.hits += 1;
                Some(block)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Inserts a block, evicting least recently used entries to make room.
    pub fn insert(&self, key: CacheKey, block: Block) {
        let charge = block.size();
        if self.capacity == 0 || charge > self.capacity {
            return;
        }
        let mut inner = self.inner.lock();
        inner.remove(&key);
        while inner.size + charge > self.capacity {
            let Some((_, victim)) = inner.order.pop_first() else { break };
            if let Some((block, _)) = inner.entries.remove(&victim) {
                inner.size -= block.size();
                inner.stats.evictions += 1;
            }
        }
        let tick = inner.bump();
        inner.order.insert(tick, key);
        inner.entries.insert(key, (block, tick));
        inner.size += charge;
        inner.stats.insertions += 1;
    }

    /// Drops every cached block of a table.
    pub fn evict_file(&self, file_id: u64) {
        let mut inner = self.inner.lock();
        let keys: Vec<CacheKey> = inner.entries.keys().filter(|k| k.file_id == file_id).copied().collect();
        for key in keys {
            inner.remove(&key);
        }
    }

    /// Get current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats.clone()
    }

    /// Bytes currently cached.
    pub fn size(&self) -> usize {
        self.inner.lock().size
    }

    /// Get the cache capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get the number of entries in the cache.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
