//! Tier routing for entity and query lookups.
//!
//! Lookups go request tier, then process tier, then shared tier, each batched
//! over the keys still unresolved. A hit in one tier is not copied into the
//! others. The process tier stands in for the shared tier while the shared
//! tier is unreachable.
//!
//! Shared-tier deletes that fail are deferred: the keys are held in a pending
//! set, never served from the shared tier while pending, and deleted before
//! the next shared read or write once the tier answers again.

use super::request::RequestCache;
use super::traits::{CacheItem, CacheTier, CacheValue};
use crate::codec::MarshalCodec;
use crate::entity::Entity;
use dashmap::{DashMap, DashSet};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tessera_core::{CacheError, Origin, Query, QueryResult, TesseraResult, TypeDescriptor};
use tracing::{debug, trace, warn};

/// Key prefix for entities in the process and shared tiers.
pub const ENTITY_PREFIX: &str = "tessera/entity::";
/// Key prefix for cached query results.
pub const QUERY_PREFIX: &str = "tessera/query::";

/// Tier key of a cached query: the prefix and a digest of its canonical form.
pub fn query_cache_key(query: &Query) -> String {
    let digest = Sha256::digest(query.canonical().as_bytes());
    format!("{}{}", QUERY_PREFIX, hex::encode(digest))
}

/// Which tiers one call may touch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierPlan {
    pub request: bool,
    pub process: bool,
    pub shared: bool,
}

impl TierPlan {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !(self.request || self.process || self.shared)
    }
}

/// Result of looking one key up in the cache tiers.
#[derive(Debug)]
pub enum Lookup<T> {
    Hit(T, Origin),
    /// Cached as absent.
    Negative(Origin),
    Miss,
}

/// The process-wide and shared tiers, plus the codec for shared payloads.
#[derive(Clone)]
pub struct CacheLayer {
    process: Arc<dyn CacheTier>,
    shared: Option<Arc<dyn CacheTier>>,
    codec: MarshalCodec,
    /// Shared-tier keys whose delete has not gone through yet.
    pending: Arc<DashSet<String>>,
    /// Cached query keys per queried kind.
    queries: Arc<DashMap<String, Vec<String>>>,
}

impl CacheLayer {
    pub fn new(process: Arc<dyn CacheTier>, codec: MarshalCodec) -> Self {
        Self {
            process,
            shared: None,
            codec,
            pending: Arc::new(DashSet::new()),
            queries: Arc::new(DashMap::new()),
        }
    }

    pub fn with_process(mut self, process: Arc<dyn CacheTier>) -> Self {
        self.process = process;
        self
    }

    pub fn with_shared(mut self, shared: Arc<dyn CacheTier>) -> Self {
        self.shared = Some(shared);
        self
    }

    pub fn process(&self) -> &Arc<dyn CacheTier> {
        &self.process
    }

    pub fn shared(&self) -> Option<&Arc<dyn CacheTier>> {
        self.shared.as_ref()
    }

    fn shared_up(&self) -> bool {
        self.shared.as_ref().is_some_and(|s| s.is_reachable())
    }

    /// Number of shared-tier invalidations still waiting for the tier.
    pub fn pending_invalidations(&self) -> usize {
        self.pending.len()
    }

    /// Retry deferred shared-tier deletes.
    fn flush_pending(&self, shared: &dyn CacheTier) -> Result<(), CacheError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = self.pending.iter().map(|k| k.key().clone()).collect();
        shared.delete_multi(&keys)?;
        for key in &keys {
            self.pending.remove(key);
        }
        debug!(count = keys.len(), "Flushed deferred shared invalidations");
        Ok(())
    }

    fn flush_or_warn(&self, shared: &dyn CacheTier) {
        if let Err(e) = self.flush_pending(shared) {
            warn!(error = %e, pending = self.pending.len(), "Deferred shared invalidations still pending");
        }
    }

    /// Tiers the type opts into, given the current reachability of the
    /// shared tier.
    pub fn plan(&self, descriptor: &TypeDescriptor, enabled: bool) -> TierPlan {
        if !enabled {
            return TierPlan::none();
        }
        let policy = descriptor.cache();
        let shared_up = self.shared_up();
        TierPlan {
            request: policy.request,
            process: policy.process || (policy.shared && !shared_up),
            shared: policy.shared && shared_up,
        }
    }

    fn tier_keys(keys: &[&str]) -> Vec<String> {
        keys.iter().map(|k| format!("{}{}", ENTITY_PREFIX, k)).collect()
    }

    fn from_process<T: Entity>(key: &str, value: CacheValue) -> Option<T> {
        match value {
            CacheValue::Entity(any) => match any.downcast_ref::<T>() {
                Some(entity) => Some(entity.clone()),
                None => {
                    warn!(key, "Process cache entry holds another type; treating as miss");
                    None
                }
            },
            other => {
                warn!(key, value = ?other, "Unexpected process cache entry; treating as miss");
                None
            }
        }
    }

    fn from_shared<T: Entity>(&self, key: &str, value: CacheValue) -> Option<T> {
        match value {
            CacheValue::Encoded(bytes) => match self.codec.decode::<T>(key, &bytes) {
                Ok(entity) => Some(entity),
                Err(e) => {
                    warn!(key, error = %e, "Corrupt shared cache entry; treating as miss");
                    None
                }
            },
            other => {
                warn!(key, value = ?other, "Unexpected shared cache entry; treating as miss");
                None
            }
        }
    }

    /// Look `keys` (encoded storage keys) up in the planned tiers.
    ///
    /// Errors from the process tier abort the lookup. A failing shared tier
    /// is logged and counts as a miss.
    pub fn lookup<T: Entity>(
        &self,
        request: &mut RequestCache,
        plan: TierPlan,
        keys: &[&str],
    ) -> TesseraResult<Vec<Lookup<T>>> {
        let mut out: Vec<Lookup<T>> = keys.iter().map(|_| Lookup::Miss).collect();

        if plan.request {
            for (slot, key) in out.iter_mut().zip(keys) {
                match request.get(key) {
                    Some(CacheValue::Negative) => *slot = Lookup::Negative(Origin::RequestCache),
                    Some(value) => {
                        if let Some(entity) = Self::from_process::<T>(key, value) {
                            *slot = Lookup::Hit(entity, Origin::RequestCache);
                        }
                    }
                    None => {}
                }
            }
        }

        if plan.process {
            let process = &*self.process;
            self.lookup_tier(&mut out, keys, process, Origin::ProcessCache, false, |k, v| {
                Self::from_process::<T>(k, v)
            })?;
        }

        if plan.shared {
            if let Some(shared) = &self.shared {
                self.flush_or_warn(&**shared);
                let shared = &**shared;
                let looked = self.lookup_tier(&mut out, keys, shared, Origin::SharedCache, true, |k, v| {
                    self.from_shared::<T>(k, v)
                });
                if let Err(e) = looked {
                    warn!(error = %e, "Shared cache read failed; treating as miss");
                }
            }
        }

        Ok(out)
    }

    fn lookup_tier<T, F>(
        &self,
        out: &mut [Lookup<T>],
        keys: &[&str],
        tier: &dyn CacheTier,
        origin: Origin,
        skip_deferred: bool,
        convert: F,
    ) -> TesseraResult<()>
    where
        F: Fn(&str, CacheValue) -> Option<T>,
    {
        let mut ask: Vec<usize> = Vec::new();
        let mut ask_keys: Vec<String> = Vec::new();
        for (i, slot) in out.iter().enumerate() {
            if !matches!(slot, Lookup::Miss) {
                continue;
            }
            let tier_key = format!("{}{}", ENTITY_PREFIX, keys[i]);
            if skip_deferred && self.pending.contains(&tier_key) {
                continue;
            }
            ask.push(i);
            ask_keys.push(tier_key);
        }
        if ask.is_empty() {
            return Ok(());
        }
        let found = tier.get_multi(&ask_keys)?;
        for (&i, value) in ask.iter().zip(found) {
            match value {
                Some(CacheValue::Negative) => out[i] = Lookup::Negative(origin),
                Some(value) => {
                    if let Some(entity) = convert(keys[i], value) {
                        out[i] = Lookup::Hit(entity, origin);
                    }
                }
                None => {}
            }
        }
        trace!(tier = tier.name(), asked = ask.len(), "Cache tier consulted");
        Ok(())
    }

    /// Write loaded entities and confirmed absences into the planned tiers.
    ///
    /// Failures of the process or shared tier are logged; the values they
    /// failed to hold are simply not cached there.
    pub fn store<T: Entity>(
        &self,
        request: &mut RequestCache,
        plan: TierPlan,
        descriptor: &TypeDescriptor,
        entities: &[(&str, &T)],
        negatives: &[&str],
    ) {
        if plan.is_empty() || (entities.is_empty() && negatives.is_empty()) {
            return;
        }
        let policy = descriptor.cache();

        let live: Vec<(&str, CacheValue)> = entities
            .iter()
            .map(|(k, e)| (*k, CacheValue::Entity(Arc::new((*e).clone()))))
            .chain(negatives.iter().map(|k| (*k, CacheValue::Negative)))
            .collect();

        if plan.request {
            for (key, value) in &live {
                request.put(key.to_string(), value.clone());
            }
        }

        if plan.process {
            let items = live
                .iter()
                .map(|(k, v)| CacheItem::new(format!("{}{}", ENTITY_PREFIX, k), v.clone(), policy.process_ttl))
                .collect();
            if let Err(e) = self.process.put_multi(items) {
                warn!(error = %e, "Process cache write failed");
            }
        }

        if plan.shared {
            if let Some(shared) = &self.shared {
                self.flush_or_warn(&**shared);
                let mut items = Vec::with_capacity(live.len());
                for (key, entity) in entities {
                    match self.codec.encode(key, *entity) {
                        Ok(bytes) => items.push(CacheItem::new(
                            format!("{}{}", ENTITY_PREFIX, key),
                            CacheValue::Encoded(bytes),
                            policy.shared_ttl,
                        )),
                        Err(e) => warn!(key, error = %e, "Entity not encodable for shared cache"),
                    }
                }
                items.extend(negatives.iter().map(|k| {
                    CacheItem::new(format!("{}{}", ENTITY_PREFIX, k), CacheValue::Negative, policy.shared_ttl)
                }));
                if let Err(e) = shared.put_multi(items) {
                    warn!(error = %e, "Shared cache write failed");
                }
            }
        }

        if !negatives.is_empty() {
            debug!(count = negatives.len(), "Cached confirmed absences");
        }
    }

    /// Remove `keys` from every tier, whatever the type's cache policy.
    ///
    /// A shared-tier delete that fails, unreachable tier included, is
    /// deferred rather than returned: the keys stay pending until the tier
    /// takes the delete, and this layer never reads them from it meanwhile.
    /// Other processes sharing the tier can still see the old entry until
    /// then or until it expires.
    pub fn invalidate(&self, request: &mut RequestCache, keys: &[&str]) -> TesseraResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        for key in keys {
            request.remove(key);
        }
        let tier_keys = Self::tier_keys(keys);
        self.process.delete_multi(&tier_keys)?;
        if let Some(shared) = &self.shared {
            self.flush_or_warn(&**shared);
            if let Err(e) = shared.delete_multi(&tier_keys) {
                warn!(count = keys.len(), error = %e, "Shared cache invalidation deferred");
                for key in tier_keys {
                    self.pending.insert(key);
                }
            }
        }
        debug!(count = keys.len(), "Invalidated cache entries");
        Ok(())
    }

    /// Drop every cached query result over `kind`, along with kindless
    /// queries.
    pub fn invalidate_queries(&self, kind: &str) -> TesseraResult<()> {
        let mut dropped: Vec<String> = Vec::new();
        for k in [kind, ""] {
            if let Some((_, keys)) = self.queries.remove(k) {
                dropped.extend(keys);
            }
        }
        if !dropped.is_empty() {
            self.process.delete_multi(&dropped)?;
            debug!(kind, count = dropped.len(), "Dropped cached query results");
        }
        Ok(())
    }

    /// A cached query result from the process tier.
    pub fn get_query(&self, query: &Query) -> TesseraResult<Option<QueryResult>> {
        let key = query_cache_key(query);
        let found = self.process.get_multi(std::slice::from_ref(&key))?;
        Ok(match found.into_iter().next().flatten() {
            Some(CacheValue::Query(result)) => Some(result),
            Some(other) => {
                warn!(key = %key, value = ?other, "Unexpected query cache entry; treating as miss");
                None
            }
            None => None,
        })
    }

    pub fn put_query(
        &self,
        query: &Query,
        result: &QueryResult,
        descriptor: &TypeDescriptor,
    ) -> TesseraResult<()> {
        let key = query_cache_key(query);
        let item = CacheItem::new(
            key.clone(),
            CacheValue::Query(result.clone()),
            descriptor.cache().process_ttl,
        );
        self.process.put_multi(vec![item])?;
        let mut known = self.queries.entry(query.kind.clone()).or_default();
        if !known.contains(&key) {
            known.push(key);
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemorySharedCache, MemoryCache};
    use crate::codec::{PropertyReader, PropertyWriter};
    use crate::cache::CacheStats;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tessera_core::TypeDescriptorBuilder;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: i64,
        text: String,
    }

    impl Entity for Note {
        fn describe() -> TypeDescriptorBuilder {
            TypeDescriptorBuilder::default()
                .with_kind("Note")
                .with_key_field("id")
                .with_process_cache(true)
        }

        fn write_properties(&self, _: &mut PropertyWriter<'_>) -> TesseraResult<()> {
            Ok(())
        }

        fn read_properties(&mut self, _: &PropertyReader<'_>) -> TesseraResult<()> {
            Ok(())
        }

        fn key_id(&self) -> i64 {
            self.id
        }

        fn set_key_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    fn layer() -> (CacheLayer, Arc<MemoryCache>, Arc<InMemorySharedCache>) {
        let process = Arc::new(MemoryCache::new());
        let shared = Arc::new(InMemorySharedCache::new());
        let layer = CacheLayer::new(process.clone(), MarshalCodec::Cbor).with_shared(shared.clone());
        (layer, process, shared)
    }

    fn descriptor() -> TypeDescriptor {
        Note::describe().build().expect("valid")
    }

    #[test]
    fn test_plan_falls_back_to_process_tier() {
        let (layer, _, shared) = layer();
        let d = TypeDescriptorBuilder::default()
            .with_kind("X")
            .with_key_field("id")
            .build()
            .expect("valid");
        assert_eq!(
            layer.plan(&d, true),
            TierPlan {
                request: true,
                process: false,
                shared: true
            }
        );
        shared.set_reachable(false);
        assert_eq!(
            layer.plan(&d, true),
            TierPlan {
                request: true,
                process: true,
                shared: false
            }
        );
        assert!(layer.plan(&d, false).is_empty());
    }

    #[test]
    fn test_store_then_lookup_each_tier() {
        let (layer, process, shared) = layer();
        let d = descriptor();
        let plan = layer.plan(&d, true);
        let note = Note {
            id: 1,
            text: "hi".to_string(),
        };
        let mut request = RequestCache::new(0);
        layer.store(&mut request, plan, &d, &[("Note:1", &note)], &["Note:2"]);

        assert_eq!(request.len(), 2);
        assert_eq!(process.len(), 2);
        assert!(shared.contains("tessera/entity::Note:1").expect("contains"));

        let found = layer
            .lookup::<Note>(&mut request, plan, &["Note:1", "Note:2", "Note:3"])
            .expect("lookup");
        assert!(matches!(&found[0], Lookup::Hit(n, Origin::RequestCache) if n == &note));
        assert!(matches!(found[1], Lookup::Negative(Origin::RequestCache)));
        assert!(matches!(found[2], Lookup::Miss));

        // a fresh request falls through to the process tier
        let mut fresh = RequestCache::new(0);
        let found = layer
            .lookup::<Note>(&mut fresh, plan, &["Note:1"])
            .expect("lookup");
        assert!(matches!(found[0], Lookup::Hit(_, Origin::ProcessCache)));

        // and to the shared tier once the process tier forgets
        process.delete_multi(&["tessera/entity::Note:1".to_string()]).expect("delete");
        let found = layer
            .lookup::<Note>(&mut RequestCache::new(0), plan, &["Note:1"])
            .expect("lookup");
        assert!(matches!(&found[0], Lookup::Hit(n, Origin::SharedCache) if n == &note));
    }

    #[test]
    fn test_corrupt_shared_entry_is_a_miss() {
        let (layer, _, shared) = layer();
        let d = TypeDescriptorBuilder::default()
            .with_kind("Note")
            .with_key_field("id")
            .build()
            .expect("valid");
        shared
            .put_multi(vec![CacheItem::new(
                "tessera/entity::Note:1",
                CacheValue::Encoded(vec![0xff, 0x00]),
                std::time::Duration::ZERO,
            )])
            .expect("put");
        let found = layer
            .lookup::<Note>(&mut RequestCache::new(0), layer.plan(&d, true), &["Note:1"])
            .expect("lookup");
        assert!(matches!(found[0], Lookup::Miss));
    }

    #[test]
    fn test_invalidate_clears_all_tiers() {
        let (layer, process, shared) = layer();
        let d = descriptor();
        let plan = layer.plan(&d, true);
        let note = Note::default();
        let mut request = RequestCache::new(0);
        layer.store(&mut request, plan, &d, &[("Note:1", &note)], &[]);

        layer.invalidate(&mut request, &["Note:1"]).expect("invalidate");
        assert!(request.is_empty());
        assert!(process.is_empty());
        assert!(!shared.contains("tessera/entity::Note:1").expect("contains"));
    }

    /// A shared tier whose reads or deletes can be made to fail while it
    /// still reports itself reachable.
    #[derive(Default)]
    struct FlakyTier {
        inner: InMemorySharedCache,
        fail_gets: AtomicBool,
        fail_deletes: AtomicBool,
    }

    impl CacheTier for FlakyTier {
        fn name(&self) -> &str {
            "flaky"
        }

        fn get_multi(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, CacheError> {
            if self.fail_gets.load(Ordering::SeqCst) {
                return Err(CacheError::LockPoisoned);
            }
            self.inner.get_multi(keys)
        }

        fn put_multi(&self, items: Vec<CacheItem>) -> Result<(), CacheError> {
            self.inner.put_multi(items)
        }

        fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
            if self.fail_deletes.load(Ordering::SeqCst) {
                return Err(CacheError::Unavailable {
                    tier: "flaky".to_string(),
                    reason: "timeout".to_string(),
                });
            }
            self.inner.delete_multi(keys)
        }

        fn stats(&self) -> CacheStats {
            self.inner.stats()
        }
    }

    fn flaky_layer() -> (CacheLayer, Arc<FlakyTier>) {
        let flaky = Arc::new(FlakyTier::default());
        let layer = CacheLayer::new(Arc::new(MemoryCache::new()), MarshalCodec::Cbor)
            .with_shared(flaky.clone());
        (layer, flaky)
    }

    const SHARED_ONLY: TierPlan = TierPlan {
        request: false,
        process: false,
        shared: true,
    };

    #[test]
    fn test_failed_shared_delete_is_deferred() {
        let (layer, flaky) = flaky_layer();
        let d = descriptor();
        let note = Note {
            id: 1,
            text: "old".to_string(),
        };
        let mut request = RequestCache::new(0);
        layer.store(&mut request, SHARED_ONLY, &d, &[("Note:1", &note)], &[]);

        flaky.fail_deletes.store(true, Ordering::SeqCst);
        layer.invalidate(&mut request, &["Note:1"]).expect("invalidate");
        assert_eq!(layer.pending_invalidations(), 1);
        assert!(flaky.inner.contains("tessera/entity::Note:1").expect("contains"));

        // the old entry is still in the tier but is not served
        let found = layer
            .lookup::<Note>(&mut request, SHARED_ONLY, &["Note:1"])
            .expect("lookup");
        assert!(matches!(found[0], Lookup::Miss));

        // the next shared access once deletes work again clears it
        flaky.fail_deletes.store(false, Ordering::SeqCst);
        let found = layer
            .lookup::<Note>(&mut request, SHARED_ONLY, &["Note:1"])
            .expect("lookup");
        assert!(matches!(found[0], Lookup::Miss));
        assert_eq!(layer.pending_invalidations(), 0);
        assert!(!flaky.inner.contains("tessera/entity::Note:1").expect("contains"));
    }

    #[test]
    fn test_shared_read_error_is_a_miss() {
        let (layer, flaky) = flaky_layer();
        let d = descriptor();
        let mut request = RequestCache::new(0);
        layer.store(&mut request, SHARED_ONLY, &d, &[("Note:1", &Note::default())], &[]);

        flaky.fail_gets.store(true, Ordering::SeqCst);
        let found = layer
            .lookup::<Note>(&mut request, SHARED_ONLY, &["Note:1", "Note:2"])
            .expect("shared read errors do not fail the lookup");
        assert!(found.iter().all(|slot| matches!(slot, Lookup::Miss)));
    }

    #[test]
    fn test_invalidate_queries_drops_kind_and_kindless() {
        let (layer, _, _) = layer();
        let d = descriptor();
        let result = QueryResult::default();
        let notes = Query::new("Note");
        let others = Query::new("Other");
        let kindless = Query::new("");
        for query in [&notes, &others, &kindless] {
            layer.put_query(query, &result, &d).expect("put");
        }

        layer.invalidate_queries("Note").expect("invalidate");
        assert!(layer.get_query(&notes).expect("get").is_none());
        assert!(layer.get_query(&kindless).expect("get").is_none());
        assert!(layer.get_query(&others).expect("get").is_some());
    }

    #[test]
    fn test_query_cache_round_trip() {
        let (layer, _, _) = layer();
        let d = descriptor();
        let query = Query::new("Note").with_limit(3);
        assert!(layer.get_query(&query).expect("get").is_none());
        let result = QueryResult {
            keys: vec![tessera_core::StorageKey::new("Note", "", 4, None)],
            cursor: Some("1".to_string()),
        };
        layer.put_query(&query, &result, &d).expect("put");
        assert_eq!(layer.get_query(&query).expect("get"), Some(result));
        assert!(query_cache_key(&query).starts_with(QUERY_PREFIX));
        assert_eq!(query_cache_key(&query).len(), QUERY_PREFIX.len() + 64);
    }
}
