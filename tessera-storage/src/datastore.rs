//! Datastore and per-request operations.
//!
//! A [`Datastore`] is shared by the whole process: it owns the type
//! registry, the backend and the process/shared cache tiers. Each logical
//! request opens a [`Request`], which adds its own request-scoped tier and
//! runs the get/put/delete paths:
//!
//! - get: request tier, process tier, shared tier, then the backend for what
//!   is left; loaded entities run their post-load hook and are cached,
//!   confirmed absences are cached as negative entries
//! - put: pre-save hook, encode, key resolution, backend write, post-save
//!   hook, then invalidation of every tier for the written keys
//! - delete: backend delete, then the same invalidation

use crate::backend::Backend;
use crate::cache::{CacheLayer, CacheStats, CacheTier, Lookup, MemoryCache, RequestCache};
use crate::codec::{self, CodecOptions};
use crate::entity::Entity;
use crate::keys;
use crate::registry::TypeRegistry;
use std::sync::Arc;
use tessera_core::{
    kind_key, BackendError, DatastoreConfig, HookError, HookStage, KeyError, MultiError, Origin,
    PropertyList, Query, QueryResult, StorageKey, TesseraError, TesseraResult, TypeDescriptor,
    TypeError,
};
use tracing::{debug, debug_span, trace, Span};
use uuid::Uuid;

/// Entry point shared by every request of a process.
pub struct Datastore {
    config: DatastoreConfig,
    registry: TypeRegistry,
    backend: Arc<dyn Backend>,
    cache: CacheLayer,
    options: CodecOptions,
}

impl Datastore {
    /// A datastore over `backend` with a fresh in-memory process tier and no
    /// shared tier.
    pub fn new(backend: Arc<dyn Backend>, config: DatastoreConfig) -> TesseraResult<Self> {
        config.validate()?;
        let options = CodecOptions::from_config(&config, backend.indexes_only_in_properties());
        let cache = CacheLayer::new(Arc::new(MemoryCache::new()), options.marshal);
        debug!(
            backend = backend.name(),
            cache_enabled = config.cache_enabled,
            lazy_registration = config.lazy_registration,
            "Datastore created"
        );
        Ok(Self {
            registry: TypeRegistry::new(config.lazy_registration),
            config,
            backend,
            cache,
            options,
        })
    }

    pub fn with_process_cache(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.cache = self.cache.with_process(tier);
        self
    }

    pub fn with_shared_cache(mut self, tier: Arc<dyn CacheTier>) -> Self {
        self.cache = self.cache.with_shared(tier);
        self
    }

    pub fn config(&self) -> &DatastoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn codec_options(&self) -> &CodecOptions {
        &self.options
    }

    pub fn register<T: Entity>(&self) -> TesseraResult<Arc<TypeDescriptor>> {
        self.registry.register::<T>()
    }

    pub fn describe<T: Entity>(&self) -> TesseraResult<Arc<TypeDescriptor>> {
        self.registry.describe::<T>()
    }

    /// Open a request with its own request-scoped cache.
    pub fn request(&self) -> Request<'_> {
        let id = Uuid::now_v7();
        Request {
            store: self,
            cache: RequestCache::new(self.config.request_cache_capacity),
            id,
            use_cache: self.config.cache_enabled,
            span: debug_span!("request", id = %id),
        }
    }

    pub fn to_properties<T: Entity>(&self, entity: &T) -> TesseraResult<PropertyList> {
        let d = self.describe::<T>()?;
        codec::to_properties(entity, &d, &self.options)
    }

    pub fn from_properties<T: Entity>(
        &self,
        properties: &PropertyList,
        entity: &mut T,
    ) -> TesseraResult<()> {
        let d = self.describe::<T>()?;
        codec::from_properties(properties, entity, &d, &self.options)
    }

    /// The storage key `entity`'s fields describe.
    ///
    /// Not a pure computation: an entity with a negative id gets a fresh id
    /// from the backend, written into the entity, so every such call uses up
    /// an id whether or not the entity is ever saved. Shape fields left empty
    /// are filled from the descriptor.
    pub fn resolve_key<T: Entity>(&self, entity: &mut T) -> TesseraResult<StorageKey> {
        let d = self.describe::<T>()?;
        keys::resolve_key(self.backend.as_ref(), entity, &d)
    }

    pub fn apply_key<T: Entity>(&self, entity: &mut T, key: &StorageKey) -> TesseraResult<()> {
        let d = self.describe::<T>()?;
        keys::apply_key(entity, key, &d)
    }

    /// Whether deletes of `key` reach the backend. Kinds nobody registered
    /// are assumed to live there.
    fn stored_in_backend(&self, key: &StorageKey) -> bool {
        self.registry
            .lookup(key.kind(), key.shape())
            .map(|d| d.use_datastore())
            .unwrap_or(true)
    }

    /// Decode one backend result into a fresh entity and run its post-load hook.
    fn materialize<T: Entity>(
        &self,
        properties: &PropertyList,
        key: &StorageKey,
        d: &TypeDescriptor,
    ) -> TesseraResult<T> {
        let mut entity = T::default();
        codec::from_properties(properties, &mut entity, d, &self.options)?;
        keys::apply_key(&mut entity, key, d)?;
        entity.post_load_hook().map_err(|source| hook_error(HookStage::PostLoad, key, source))?;
        Ok(entity)
    }

    /// Pre-save hook, key resolution and encoding for one entity.
    fn stage<T: Entity>(
        &self,
        entity: &mut T,
        d: &TypeDescriptor,
    ) -> TesseraResult<(StorageKey, PropertyList)> {
        entity.pre_save_hook().map_err(|source| {
            let provisional = StorageKey::new(d.kind(), d.shape(), entity.key_id().max(0), None);
            hook_error(HookStage::PreSave, &provisional, source)
        })?;
        let key = keys::resolve_key(self.backend.as_ref(), entity, d)?;
        let properties = codec::to_properties(entity, d, &self.options)?;
        Ok((key, properties))
    }
}

fn hook_error(stage: HookStage, key: &StorageKey, source: HookError) -> TesseraError {
    TesseraError::Hook {
        stage,
        key: key.encode(),
        source,
    }
}

/// The error of a one-element batch.
fn single(multi: MultiError) -> TesseraError {
    multi.get(0).cloned().unwrap_or(TesseraError::Multi(multi))
}

/// One logical request.
///
/// Holds the request-scoped cache tier, which is why operations take
/// `&mut self`: a request is used by one thread at a time.
pub struct Request<'a> {
    store: &'a Datastore,
    cache: RequestCache,
    id: Uuid,
    use_cache: bool,
    span: Span,
}

impl<'a> Request<'a> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn store(&self) -> &'a Datastore {
        self.store
    }

    /// Bypass every cache tier for the rest of this request.
    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Load the entity stored under `key` into `dst`.
    ///
    /// On error `dst` is left as it was.
    pub fn get<T: Entity>(&mut self, key: &StorageKey, dst: &mut T) -> TesseraResult<()> {
        match self.get_multi(std::slice::from_ref(key), std::slice::from_mut(dst)) {
            Err(TesseraError::Multi(multi)) => Err(single(multi)),
            other => other,
        }
    }

    /// Load `keys[i]` into `dst[i]`.
    ///
    /// Per-key failures come back as [`TesseraError::Multi`] with one slot
    /// per key; slots that succeeded are filled in `dst` regardless. A
    /// failure of the backend call as a whole is returned as-is.
    pub fn get_multi<T: Entity>(&mut self, keys: &[StorageKey], dst: &mut [T]) -> TesseraResult<()> {
        if keys.len() != dst.len() {
            return Err(TesseraError::BatchMismatch {
                keys: keys.len(),
                entities: dst.len(),
            });
        }
        if keys.is_empty() {
            return Ok(());
        }
        let span = self.span.clone();
        let _enter = span.enter();

        let store = self.store;
        let d = store.describe::<T>()?;
        let backend = store.backend.as_ref();
        let encoded: Vec<String> = keys.iter().map(|k| backend.encode_key(k)).collect();
        let mut errors = MultiError::new(keys.len());

        let mut pending = Vec::with_capacity(keys.len());
        for (i, key) in keys.iter().enumerate() {
            let found = kind_key(key.kind(), key.shape());
            if key.is_incomplete() {
                errors.set(
                    i,
                    KeyError::Incomplete {
                        key: encoded[i].clone(),
                    }
                    .into(),
                );
            } else if found != d.kind_key() {
                errors.set(
                    i,
                    TypeError::KindMismatch {
                        type_name: d.type_name().to_string(),
                        expected: d.kind_key(),
                        found,
                    }
                    .into(),
                );
            } else {
                pending.push(i);
            }
        }

        let plan = store.cache.plan(&d, self.use_cache);
        let pending_keys: Vec<&str> = pending.iter().map(|&i| encoded[i].as_str()).collect();
        let found = store.cache.lookup::<T>(&mut self.cache, plan, &pending_keys)?;

        let mut misses = Vec::new();
        for (&i, lookup) in pending.iter().zip(found) {
            match lookup {
                Lookup::Hit(entity, origin) => {
                    trace!(key = %encoded[i], %origin, "Entity found");
                    dst[i] = entity;
                }
                Lookup::Negative(origin) => {
                    trace!(key = %encoded[i], %origin, "Entity cached as absent");
                    errors.set(
                        i,
                        TesseraError::NotFound {
                            key: encoded[i].clone(),
                            origin,
                        },
                    );
                }
                Lookup::Miss => misses.push(i),
            }
        }

        let mut loaded: Vec<(usize, T)> = Vec::new();
        let mut absent: Vec<usize> = Vec::new();
        if !misses.is_empty() && !d.use_datastore() {
            for &i in &misses {
                errors.set(
                    i,
                    TesseraError::NotFound {
                        key: encoded[i].clone(),
                        origin: Origin::CacheOnly,
                    },
                );
                absent.push(i);
            }
        } else if !misses.is_empty() {
            let miss_keys: Vec<StorageKey> = misses.iter().map(|&i| keys[i].clone()).collect();
            let results = backend.get(&miss_keys)?;
            if results.len() != miss_keys.len() {
                return Err(BackendError::Failed {
                    operation: "get".to_string(),
                    reason: format!("{} results for {} keys", results.len(), miss_keys.len()),
                }
                .into());
            }
            for (&i, result) in misses.iter().zip(results) {
                match result {
                    Ok(properties) => match store.materialize::<T>(&properties, &keys[i], &d) {
                        Ok(entity) => {
                            trace!(key = %encoded[i], origin = %Origin::Backend, "Entity found");
                            loaded.push((i, entity));
                        }
                        Err(e) => errors.set(i, e),
                    },
                    Err(e) if backend.is_not_found(&e) => {
                        errors.set(
                            i,
                            TesseraError::NotFound {
                                key: encoded[i].clone(),
                                origin: Origin::Backend,
                            },
                        );
                        absent.push(i);
                    }
                    Err(e) => errors.set(i, e.into()),
                }
            }
        }

        let cached: Vec<(&str, &T)> = loaded
            .iter()
            .map(|(i, entity)| (encoded[*i].as_str(), entity))
            .collect();
        let negatives: Vec<&str> = absent.iter().map(|&i| encoded[i].as_str()).collect();
        store
            .cache
            .store(&mut self.cache, plan, &d, &cached, &negatives);

        debug!(
            kind = %d.kind_key(),
            requested = keys.len(),
            from_cache = pending.len() - misses.len(),
            from_backend = loaded.len(),
            absent = absent.len(),
            failed = errors.failed(),
            "get_multi"
        );
        for (i, entity) in loaded {
            dst[i] = entity;
        }
        errors.into_result()
    }

    /// Store one entity, returning its complete key.
    pub fn put<T: Entity>(&mut self, entity: &mut T) -> TesseraResult<StorageKey> {
        match self.put_multi(std::slice::from_mut(entity)) {
            Ok(mut keys) => keys.pop().ok_or(TesseraError::BatchMismatch {
                keys: 0,
                entities: 1,
            }),
            Err(TesseraError::Multi(multi)) => Err(single(multi)),
            Err(e) => Err(e),
        }
    }

    /// Store every entity, writing assigned ids back into them.
    ///
    /// An entity whose hook, key or encoding fails is skipped and reported
    /// in its slot; the rest are still written. Every written key is removed
    /// from all cache tiers afterwards.
    pub fn put_multi<T: Entity>(&mut self, entities: &mut [T]) -> TesseraResult<Vec<StorageKey>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let span = self.span.clone();
        let _enter = span.enter();

        let store = self.store;
        let d = store.describe::<T>()?;
        let mut errors = MultiError::new(entities.len());

        let mut staged: Vec<(usize, StorageKey, PropertyList)> = Vec::with_capacity(entities.len());
        for (i, entity) in entities.iter_mut().enumerate() {
            match store.stage(entity, &d) {
                Ok((key, properties)) => staged.push((i, key, properties)),
                Err(e) => errors.set(i, e),
            }
        }

        let mut written: Vec<(usize, StorageKey)> = Vec::with_capacity(staged.len());
        if d.use_datastore() {
            if !staged.is_empty() {
                let (indices, (put_keys, values)): (Vec<usize>, (Vec<StorageKey>, Vec<PropertyList>)) =
                    staged.into_iter().map(|(i, k, p)| (i, (k, p))).unzip();
                let assigned = store.backend.put(&put_keys, &values)?;
                if assigned.len() != put_keys.len() {
                    return Err(BackendError::Failed {
                        operation: "put".to_string(),
                        reason: format!("{} keys back for {} written", assigned.len(), put_keys.len()),
                    }
                    .into());
                }
                written.extend(indices.into_iter().zip(assigned));
            }
        } else {
            for (i, key, _) in staged {
                if key.is_incomplete() {
                    errors.set(
                        i,
                        KeyError::Incomplete {
                            key: store.backend.encode_key(&key),
                        }
                        .into(),
                    );
                } else {
                    written.push((i, key));
                }
            }
        }

        let mut saved: Vec<usize> = Vec::with_capacity(written.len());
        for (i, key) in &written {
            let entity = &mut entities[*i];
            let result = keys::apply_key(entity, key, &d).and_then(|_| {
                entity
                    .post_save_hook()
                    .map_err(|source| hook_error(HookStage::PostSave, key, source))
            });
            match result {
                Ok(()) => saved.push(*i),
                Err(e) => errors.set(*i, e),
            }
        }

        let encoded: Vec<String> = written
            .iter()
            .map(|(_, k)| store.backend.encode_key(k))
            .collect();
        let encoded_refs: Vec<&str> = encoded.iter().map(String::as_str).collect();
        store.cache.invalidate(&mut self.cache, &encoded_refs)?;
        if !written.is_empty() {
            store.cache.invalidate_queries(d.kind())?;
        }

        if !d.use_datastore() {
            // cache-only types live in the tiers, so the write goes there
            let plan = store.cache.plan(&d, self.use_cache);
            let cached: Vec<(&str, &T)> = written
                .iter()
                .zip(&encoded)
                .filter(|((i, _), _)| saved.contains(i))
                .map(|((i, _), k)| (k.as_str(), &entities[*i]))
                .collect();
            store.cache.store(&mut self.cache, plan, &d, &cached, &[]);
        }

        debug!(
            kind = %d.kind_key(),
            requested = entities.len(),
            written = written.len(),
            failed = errors.failed(),
            "put_multi"
        );
        errors.into_result()?;
        Ok(written.into_iter().map(|(_, k)| k).collect())
    }

    pub fn delete(&mut self, key: &StorageKey) -> TesseraResult<()> {
        self.delete_multi(std::slice::from_ref(key))
    }

    /// Delete from the backend, then from every cache tier.
    pub fn delete_multi(&mut self, keys: &[StorageKey]) -> TesseraResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let span = self.span.clone();
        let _enter = span.enter();

        let store = self.store;
        if let Some(key) = keys.iter().find(|k| k.is_incomplete()) {
            return Err(KeyError::Incomplete {
                key: store.backend.encode_key(key),
            }
            .into());
        }
        let stored: Vec<StorageKey> = keys
            .iter()
            .filter(|k| store.stored_in_backend(k))
            .cloned()
            .collect();
        if !stored.is_empty() {
            store.backend.delete(&stored)?;
        }

        let encoded: Vec<String> = keys.iter().map(|k| store.backend.encode_key(k)).collect();
        let encoded_refs: Vec<&str> = encoded.iter().map(String::as_str).collect();
        store.cache.invalidate(&mut self.cache, &encoded_refs)?;
        let mut kinds: Vec<&str> = keys.iter().map(|k| k.kind()).collect();
        kinds.sort_unstable();
        kinds.dedup();
        for kind in kinds {
            store.cache.invalidate_queries(kind)?;
        }
        debug!(requested = keys.len(), backend = stored.len(), "delete_multi");
        Ok(())
    }

    /// Load `entity` from the key its own fields describe.
    pub fn load<T: Entity>(&mut self, entity: &mut T) -> TesseraResult<()> {
        let key = self.store.resolve_key(entity)?;
        if key.is_incomplete() {
            return Err(KeyError::Incomplete {
                key: self.store.backend.encode_key(&key),
            }
            .into());
        }
        self.get(&key, entity)
    }

    /// Store `entity`, returning its complete key.
    pub fn save<T: Entity>(&mut self, entity: &mut T) -> TesseraResult<StorageKey> {
        self.put(entity)
    }

    /// Load `entity`; with `maybe_create`, save it instead when it does not
    /// exist yet.
    pub fn load_one<T: Entity>(&mut self, entity: &mut T, maybe_create: bool) -> TesseraResult<()> {
        match self.load(entity) {
            Err(e) if maybe_create && e.is_not_found() => {
                debug!(error = %e, "Entity absent; creating it");
                self.save(entity).map(|_| ())
            }
            other => other,
        }
    }

    /// A fresh entity carrying `key`, loaded from storage when `load` is set.
    pub fn entity_for_key<T: Entity>(&mut self, key: &StorageKey, load: bool) -> TesseraResult<T> {
        let mut entity = T::default();
        self.store.apply_key(&mut entity, key)?;
        if load {
            self.get(key, &mut entity)?;
        }
        Ok(entity)
    }

    /// [`entity_for_key`](Self::entity_for_key) over a batch.
    pub fn entities_for_keys<T: Entity>(
        &mut self,
        keys: &[StorageKey],
        load: bool,
    ) -> TesseraResult<Vec<T>> {
        let mut entities = Vec::with_capacity(keys.len());
        for key in keys {
            let mut entity = T::default();
            self.store.apply_key(&mut entity, key)?;
            entities.push(entity);
        }
        if load {
            self.get_multi(keys, &mut entities)?;
        }
        Ok(entities)
    }

    /// Apply `key` and run the post-load hook, without touching any cache
    /// tier. For entities that arrive through a query rather than a get.
    pub fn post_load_no_caching<T: Entity>(
        &self,
        entity: &mut T,
        key: &StorageKey,
    ) -> TesseraResult<()> {
        self.store.apply_key(entity, key)?;
        entity
            .post_load_hook()
            .map_err(|source| hook_error(HookStage::PostLoad, key, source))
    }

    /// Keys matching `query`, filtered to its kind and shape.
    ///
    /// When the queried type uses the process tier, results are cached there
    /// for the type's process TTL. A put or delete through this datastore
    /// drops the cached results for the written kind; writes made by other
    /// processes are only seen once the entry expires.
    pub fn query_keys(&mut self, query: &Query) -> TesseraResult<QueryResult> {
        let span = self.span.clone();
        let _enter = span.enter();

        let store = self.store;
        let descriptor = store.registry.lookup(&query.kind, &query.shape).ok();
        let cacheable = self.use_cache && descriptor.as_ref().is_some_and(|d| d.cache().process);

        if cacheable {
            if let Some(hit) = store.cache.get_query(query)? {
                trace!(kind = %query.kind, keys = hit.keys.len(), "Query served from process cache");
                return Ok(hit);
            }
        }

        let mut result = store.backend.query(query)?;
        result.keys.retain(|k| {
            (query.kind.is_empty() || k.kind() == query.kind)
                && (query.shape.is_empty() || k.shape() == query.shape)
        });

        if let Some(d) = descriptor.as_deref().filter(|_| cacheable) {
            store.cache.put_query(query, &result, d)?;
        }
        debug!(kind = %query.kind, keys = result.keys.len(), "query_keys");
        Ok(result)
    }

    /// Entities matching `query`, loaded through the cache tiers.
    pub fn query_entities<T: Entity>(&mut self, query: &Query) -> TesseraResult<Vec<T>> {
        let result = self.query_keys(query)?;
        self.entities_for_keys(&result.keys, true)
    }
}

// =============================================================================
// TESTS
// =============================================================================
