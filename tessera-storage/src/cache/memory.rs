//! Process-wide cache tier.

use super::traits::{CacheItem, CacheStats, CacheTier, CacheValue};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tessera_core::CacheError;
use tracing::trace;

#[derive(Debug)]
struct Entry {
    value: CacheValue,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn expiry(ttl: Duration) -> Option<Instant> {
    if ttl.is_zero() {
        None
    } else {
        Instant::now().checked_add(ttl)
    }
}

/// A concurrent in-memory tier with per-entry expiry.
///
/// Expired entries are dropped when read. [`purge_expired`](Self::purge_expired)
/// sweeps the rest and is meant to be called by whoever owns the scheduling.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    hits: AtomicU64,
    negative_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let purged = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(purged as u64, Ordering::Relaxed);
        if purged > 0 {
            trace!(purged, "Purged expired process cache entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get_one(&self, key: &str, now: Instant) -> Option<CacheValue> {
        let value = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };
        match value {
            Some(value) => {
                let counter = if value.is_negative() {
                    &self.negative_hits
                } else {
                    &self.hits
                };
                counter.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                // the read guard is gone by now
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }
}

impl CacheTier for MemoryCache {
    fn name(&self) -> &str {
        "process"
    }

    fn get_multi(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, CacheError> {
        let now = Instant::now();
        Ok(keys.iter().map(|key| self.get_one(key, now)).collect())
    }

    fn put_multi(&self, items: Vec<CacheItem>) -> Result<(), CacheError> {
        for item in items {
            self.entries.insert(
                item.key,
                Entry {
                    value: item.value,
                    expires_at: expiry(item.ttl),
                },
            );
        }
        Ok(())
    }

    fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
        for key in keys {
            self.entries.remove(key);
        }
        Ok(())
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            memory_bytes: self
                .entries
                .iter()
                .map(|e| e.value().value.size_hint() as u64)
                .sum(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
