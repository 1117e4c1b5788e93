//! Content-addressed cache of built collision shapes
//!
//! Keyed by snapshot content hash with LRU eviction. Entries are shared
//! rapier shapes, so evicting one only drops the cache's reference.

use crate::snapshot::ContentHash;
use parking_lot::Mutex;
use rapier3d::prelude::SharedShape;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
struct CacheInner {
    map: HashMap<ContentHash, SharedShape>,
    order: VecDeque<ContentHash>,
}

/// Counters reported by [`ShapeCache::stats`]
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct ShapeCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

/// LRU cache of built shapes keyed by content hash.
///
/// Shapes are reference counted; evicting one only drops the cache's
/// reference, records that use it keep theirs.
pub struct ShapeCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
    hits: AtomicU64,
    misses: AtomicU64,
    insertions: AtomicU64,
    evictions: AtomicU64,
}

impl ShapeCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            insertions: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn get(&self, hash: ContentHash) -> Option<SharedShape> {
        if self.capacity == 0 {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let mut inner = self.inner.lock();
        if let Some(shape) = inner.map.get(&hash).cloned() {
            inner.order.retain(|existing| existing != &hash);
            inner.order.push_back(hash);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(shape);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, hash: ContentHash, shape: SharedShape) {
        if self.capacity == 0 {
            return;
        }

        let mut inner = self.inner.lock();
        if inner.map.contains_key(&hash) {
            inner.map.insert(hash, shape);
            inner.order.retain(|existing| existing != &hash);
            inner.order.push_back(hash);
            return;
        }

        if inner.map.len() >= self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.map.remove(&oldest);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("evicted cached shape {oldest}");
            }
        }

        inner.order.push_back(hash);
        inner.map.insert(hash, shape);
        self.insertions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.map.clear();
        inner.order.clear();
    }

    pub fn stats(&self) -> ShapeCacheStats {
        ShapeCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            insertions: self.insertions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
