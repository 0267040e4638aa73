//! Cache tiers and the orchestrator that routes lookups through them.
//!
//! Three tiers sit in front of the backend:
//! - [`RequestCache`]: owned by one request, holds live entities
//! - [`MemoryCache`]: process-wide, holds live entities with expiry
//! - a shared tier (any [`CacheTier`], [`InMemorySharedCache`] in tests),
//!   which holds encoded bytes only
//!
//! Every tier can hold a negative entry, meaning "confirmed absent". Writes
//! never populate tiers; they invalidate them.

pub mod memory;
pub mod orchestrator;
pub mod request;
pub mod shared;
pub mod traits;

pub use memory::MemoryCache;
pub use orchestrator::{
    query_cache_key, CacheLayer, Lookup, TierPlan, ENTITY_PREFIX, QUERY_PREFIX,
};
pub use request::RequestCache;
pub use shared::InMemorySharedCache;
pub use traits::{CacheItem, CacheStats, CacheTier, CacheValue};
