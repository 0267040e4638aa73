//! Tessera Storage - Entity Datastore with Tiered Caching
//!
//! Maps entity types onto flat property lists, resolves their storage keys
//! and serves reads through request, process and shared cache tiers in front
//! of a key/value [`Backend`].
//!
//! ```text
//! Request ──▶ RequestCache ──▶ process tier ──▶ shared tier ──▶ Backend
//!                                                               (memory | LMDB)
//! ```

pub mod backend;
pub mod cache;
pub mod codec;
pub mod datastore;
pub mod entity;
pub mod keys;
pub mod registry;

pub use backend::{
    evaluate_query, Backend, CallCounts, LmdbBackend, LmdbBackendError, MemoryBackend,
};
pub use cache::{
    query_cache_key, CacheItem, CacheLayer, CacheStats, CacheTier, CacheValue,
    InMemorySharedCache, Lookup, MemoryCache, RequestCache, TierPlan, ENTITY_PREFIX,
    QUERY_PREFIX,
};
pub use codec::{
    from_properties, to_properties, CodecOptions, MarshalCodec, PropertyReader, PropertyWriter,
};
pub use datastore::{Datastore, Request};
pub use entity::{Embedded, Entity, NestedReader, NestedWriter};
pub use keys::{apply_key, resolve_key};
pub use registry::TypeRegistry;
