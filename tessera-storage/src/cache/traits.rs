//! Cache tier contract.

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tessera_core::{CacheError, QueryResult};

/// A cached value.
#[derive(Clone)]
pub enum CacheValue {
    /// Confirmed absent as of the last check.
    Negative,
    /// A live entity. Only in-process tiers can hold these.
    Entity(Arc<dyn Any + Send + Sync>),
    /// An entity encoded with the datastore's byte codec.
    Encoded(Vec<u8>),
    /// Keys matched by a query.
    Query(QueryResult),
}

impl CacheValue {
    pub fn is_negative(&self) -> bool {
        matches!(self, CacheValue::Negative)
    }

    /// Approximate heap size, for statistics.
    pub fn size_hint(&self) -> usize {
        match self {
            CacheValue::Negative | CacheValue::Entity(_) => 0,
            CacheValue::Encoded(bytes) => bytes.len(),
            CacheValue::Query(result) => result.keys.len() * std::mem::size_of::<usize>(),
        }
    }
}

impl fmt::Debug for CacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheValue::Negative => f.write_str("Negative"),
            CacheValue::Entity(_) => f.write_str("Entity(..)"),
            CacheValue::Encoded(bytes) => write!(f, "Encoded({} bytes)", bytes.len()),
            CacheValue::Query(result) => write!(f, "Query({} keys)", result.keys.len()),
        }
    }
}

/// One write to a tier.
#[derive(Debug, Clone)]
pub struct CacheItem {
    pub key: String,
    pub value: CacheValue,
    /// Zero means no expiry.
    pub ttl: Duration,
}

impl CacheItem {
    pub fn new(key: impl Into<String>, value: CacheValue, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            ttl,
        }
    }
}

/// A process-wide or shared cache tier. Implementations must be safe for
/// concurrent use.
pub trait CacheTier: Send + Sync {
    fn name(&self) -> &str;

    /// Slot `i` answers `keys[i]`; `None` is a miss.
    fn get_multi(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, CacheError>;

    fn put_multi(&self, items: Vec<CacheItem>) -> Result<(), CacheError>;

    fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError>;

    /// Whether the tier can currently be reached.
    fn is_reachable(&self) -> bool {
        true
    }

    fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of positive hits.
    pub hits: u64,
    pub misses: u64,
    /// Hits on a negative entry.
    pub negative_hits: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Share of lookups answered by the tier, negative hits included (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let answered = self.hits + self.negative_hits;
        let total = answered + self.misses;
        if total == 0 {
            0.0
        } else {
            answered as f64 / total as f64
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
