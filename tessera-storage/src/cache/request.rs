//! Request-scoped cache tier.
//!
//! Owned by one [`Request`](crate::Request) and mutated through `&mut`, so it
//! cannot be shared between threads while in use.

use super::traits::{CacheStats, CacheValue};
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Default)]
pub struct RequestCache {
    entries: HashMap<String, CacheValue>,
    /// Insertion order, oldest first.
    order: VecDeque<String>,
    /// 0 means unbounded.
    capacity: usize,
    stats: CacheStats,
}

impl RequestCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn get(&mut self, key: &str) -> Option<CacheValue> {
        match self.entries.get(key) {
            Some(value) => {
                if value.is_negative() {
                    self.stats.negative_hits += 1;
                } else {
                    self.stats.hits += 1;
                }
                Some(value.clone())
            }
            None => {
                self.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or replace. Evicts the oldest entries past capacity.
    pub fn put(&mut self, key: String, value: CacheValue) {
        if self.entries.insert(key.clone(), value).is_none() {
            self.order.push_back(key);
        }
        while self.capacity > 0 && self.entries.len() > self.capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            self.stats.evictions += 1;
        }
    }

    pub fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len() as u64,
            memory_bytes: self.entries.values().map(|v| v.size_hint() as u64).sum(),
            ..self.stats.clone()
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
