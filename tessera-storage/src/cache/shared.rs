//! Shared cache tier.
//!
//! Stands in for an out-of-process cache such as memcached: values must be
//! self-contained bytes, so live entities are rejected, and the tier can be
//! switched unreachable to exercise the process-tier fallback.

use super::traits::{CacheItem, CacheStats, CacheTier, CacheValue};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tessera_core::CacheError;

#[derive(Debug)]
pub struct InMemorySharedCache {
    entries: RwLock<HashMap<String, (CacheValue, Option<Instant>)>>,
    reachable: AtomicBool,
    get_calls: AtomicUsize,
    hits: AtomicU64,
    negative_hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for InMemorySharedCache {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            get_calls: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            negative_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl InMemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Number of `get_multi` calls, reachable or not.
    pub fn get_calls(&self) -> usize {
        self.get_calls.load(Ordering::SeqCst)
    }

    /// Whether `key` holds a live entry, without touching statistics.
    pub fn contains(&self, key: &str) -> Result<bool, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        let now = Instant::now();
        Ok(entries
            .get(key)
            .is_some_and(|(_, expires)| expires.map_or(true, |at| at > now)))
    }

    fn check_reachable(&self) -> Result<(), CacheError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::Unavailable {
                tier: self.name().to_string(),
                reason: "connection refused".to_string(),
            })
        }
    }
}

impl CacheTier for InMemorySharedCache {
    fn name(&self) -> &str {
        "shared"
    }

    fn get_multi(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, CacheError> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_reachable()?;
        let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|key| match entries.get(key) {
                Some((value, expires)) if expires.map_or(true, |at| at > now) => {
                    let counter = if value.is_negative() {
                        &self.negative_hits
                    } else {
                        &self.hits
                    };
                    counter.fetch_add(1, Ordering::Relaxed);
                    Some(value.clone())
                }
                _ => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            })
            .collect())
    }

    fn put_multi(&self, items: Vec<CacheItem>) -> Result<(), CacheError> {
        self.check_reachable()?;
        if let Some(item) = items
            .iter()
            .find(|item| matches!(item.value, CacheValue::Entity(_)))
        {
            return Err(CacheError::Corrupt {
                key: item.key.clone(),
                reason: "live entities cannot leave the process".to_string(),
            });
        }
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        for item in items {
            let expires = if item.ttl == Duration::ZERO {
                None
            } else {
                Instant::now().checked_add(item.ttl)
            };
            entries.insert(item.key, (item.value, expires));
        }
        Ok(())
    }

    fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
        self.check_reachable()?;
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    fn is_reachable(&self) -> bool {
        self.reachable.load(Ordering::SeqCst)
    }

    fn stats(&self) -> CacheStats {
        let (entry_count, memory_bytes) = self
            .entries
            .read()
            .map(|entries| {
                (
                    entries.len() as u64,
                    entries.values().map(|(v, _)| v.size_hint() as u64).sum(),
                )
            })
            .unwrap_or_default();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            negative_hits: self.negative_hits.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
            evictions: 0,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
