//! Bounded LRU cache with per-entry TTL, ported from
//! `examples/original_source/src/utils/cache.py::LRUCache`.
//!
//! Used by the openai/anthropic client wrappers to avoid re-issuing an
//! identical generation request (spec §4.4's cache-key hash).

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

struct Entry<V> {
    value: V,
    created_at: Instant,
    ttl: Option<Duration>,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        match self.ttl {
            Some(ttl) => self.created_at.elapsed() > ttl,
            None => false,
        }
    }
}

/// Insertion order is the LRU order: front is least-recently-used.
struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    order: Vec<K>,
    hits: u64,
    misses: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub current_size: usize,
    pub max_size: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct Cache<K, V> {
    max_size: usize,
    default_ttl: Option<Duration>,
    inner: Mutex<Inner<K, V>>,
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// # Panics
    /// If `max_size` is zero.
    pub fn new(max_size: usize, default_ttl: Option<Duration>) -> Self {
        assert!(max_size > 0, "cache max_size must be positive");
        Self {
            max_size,
            default_ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
                hits: 0,
                misses: 0,
            }),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock().await;

        let expired = inner.entries.get(key).is_some_and(Entry::is_expired);
        if expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
        }

        match inner.entries.get(key) {
            Some(entry) => {
                let value = entry.value.clone();
                inner.order.retain(|k| k != key);
                inner.order.push(key.clone());
                inner.hits += 1;
                Some(value)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub async fn put(&self, key: K, value: V, ttl: Option<Duration>) {
        let mut inner = self.inner.lock().await;
        let effective_ttl = ttl.or(self.default_ttl);

        if inner.entries.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        }

        inner.entries.insert(
            key.clone(),
            Entry {
                value,
                created_at: Instant::now(),
                ttl: effective_ttl,
            },
        );
        inner.order.push(key);

        if inner.entries.len() > self.max_size {
            if let Some(oldest) = inner.order.first().cloned() {
                inner.order.remove(0);
                inner.entries.remove(&oldest);
            }
        }
    }

    pub async fn delete(&self, key: &K) -> bool {
        let mut inner = self.inner.lock().await;
        inner.order.retain(|k| k != key);
        inner.entries.remove(key).is_some()
    }

    /// Removes all expired entries regardless of whether they've been touched by `get`.
    /// Returns the number removed.
    pub async fn cleanup_expired(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
        }
        expired.len()
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.order.clear();
        inner.hits = 0;
        inner.misses = 0;
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            current_size: inner.entries.len(),
            max_size: self.max_size,
        }
    }
}
