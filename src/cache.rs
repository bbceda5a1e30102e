//! Bounded TTL + LRU result cache (§4.9).
//!
//! Keyed by `(index_fingerprint, normalized_query, reranker flag, top_k,
//! retrieve_m, rerank_n, composer_model_tag)`. A single `parking_lot::Mutex`
//! guards the map and LRU ordering — the "short critical section" called
//! for in §5 — so concurrent queries only block each other for a map
//! insert/remove, never for the retrieval work itself. TTL is enforced
//! lazily on read rather than via a background sweep thread, keeping the
//! critical section O(1) amortized and avoiding an extra timer task.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::AnswerEnvelope;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub index_fingerprint: String,
    pub normalized_query: String,
    pub use_reranker: bool,
    pub top_k: usize,
    pub retrieve_m: usize,
    pub rerank_n: usize,
    pub composer_model_tag: String,
}

struct Entry {
    value: AnswerEnvelope,
    inserted_at: Instant,
}

/// Intrusive LRU ordering is approximated with a `Vec` of keys in
/// least-to-most-recently-used order; `touch`/`evict` are O(n) in the
/// number of *distinct* keys currently cached, bounded by `capacity`, so
/// this stays cheap at the configured default (256).
struct Inner {
    entries: HashMap<CacheKey, Entry>,
    order: Vec<CacheKey>,
    capacity: usize,
    ttl: Duration,
}

impl Inner {
    fn touch(&mut self, key: &CacheKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    fn evict_if_over_capacity(&mut self) {
        while self.entries.len() > self.capacity {
            if self.order.is_empty() {
                break;
            }
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
    }
}

pub struct ResultCache {
    inner: Mutex<Inner>,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: Vec::new(),
                capacity: capacity.max(1),
                ttl,
            }),
        }
    }

    /// Returns a cached envelope if present and not expired. An expired
    /// entry is treated as a miss and evicted on the spot (§7 "cache
    /// anomalies: treat as cache miss; never return stale data past TTL").
    pub fn get(&self, key: &CacheKey) -> Option<AnswerEnvelope> {
        let mut inner = self.inner.lock();
        let expired = match inner.entries.get(key) {
            Some(entry) => entry.inserted_at.elapsed() > inner.ttl,
            None => return None,
        };
        if expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            return None;
        }
        inner.touch(key);
        inner.entries.get(key).map(|e| e.value.clone())
    }

    pub fn set(&self, key: CacheKey, value: AnswerEnvelope) {
        let mut inner = self.inner.lock();
        if !inner.entries.contains_key(&key) {
            inner.order.push(key.clone());
        } else {
            inner.touch(&key);
        }
        inner.entries.insert(key, Entry { value, inserted_at: Instant::now() });
        inner.evict_if_over_capacity();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry whose `index_fingerprint` doesn't match the
    /// current one. Called after a re-index so stale results from a prior
    /// corpus snapshot are never served (§3 Lifecycle, §8 invariant 9).
    pub fn invalidate_stale_fingerprints(&self, current_fingerprint: &str) {
        let mut inner = self.inner.lock();
        let stale: Vec<CacheKey> = inner
            .entries
            .keys()
            .filter(|k| k.index_fingerprint != current_fingerprint)
            .cloned()
            .collect();
        for key in stale {
            inner.entries.remove(&key);
            inner.order.retain(|k| k != &key);
        }
    }
}
