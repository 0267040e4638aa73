//! In-memory backend with call counters and failure injection.

use super::{evaluate_query, Backend};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use tessera_core::{BackendError, PropertyList, Query, QueryResult, StorageKey};

/// Number of calls made to each operation since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub get: usize,
    pub put: usize,
    pub delete: usize,
    pub query: usize,
    pub allocate: usize,
}

/// A [`Backend`] holding every entity in one map.
#[derive(Debug)]
pub struct MemoryBackend {
    entities: RwLock<HashMap<StorageKey, PropertyList>>,
    next_id: AtomicI64,
    indexes_only: bool,
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
    queries: AtomicUsize,
    allocations: AtomicUsize,
    /// Consumed by the next call of any operation.
    next_failure: Mutex<Option<BackendError>>,
    /// Returned in the slot of the matching key on every `get`.
    key_failures: RwLock<HashMap<StorageKey, BackendError>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            entities: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            indexes_only: false,
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            allocations: AtomicUsize::new(0),
            next_failure: Mutex::new(None),
            key_failures: RwLock::new(HashMap::new()),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// First id handed out to an incomplete key.
    pub fn with_next_id(self, id: i64) -> Self {
        self.next_id.store(id, Ordering::SeqCst);
        self
    }

    pub fn with_indexes_only(mut self, indexes_only: bool) -> Self {
        self.indexes_only = indexes_only;
        self
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            get: self.gets.load(Ordering::SeqCst),
            put: self.puts.load(Ordering::SeqCst),
            delete: self.deletes.load(Ordering::SeqCst),
            query: self.queries.load(Ordering::SeqCst),
            allocate: self.allocations.load(Ordering::SeqCst),
        }
    }

    /// Make the next call fail as a whole with `error`.
    pub fn fail_next(&self, error: BackendError) -> Result<(), BackendError> {
        let mut slot = self
            .next_failure
            .lock()
            .map_err(|_| BackendError::LockPoisoned)?;
        *slot = Some(error);
        Ok(())
    }

    /// Make every `get` of `key` fail in its own slot with `error`.
    pub fn fail_key(&self, key: StorageKey, error: BackendError) -> Result<(), BackendError> {
        self.key_failures
            .write()
            .map_err(|_| BackendError::LockPoisoned)?
            .insert(key, error);
        Ok(())
    }

    pub fn clear_failures(&self) -> Result<(), BackendError> {
        self.key_failures
            .write()
            .map_err(|_| BackendError::LockPoisoned)?
            .clear();
        *self
            .next_failure
            .lock()
            .map_err(|_| BackendError::LockPoisoned)? = None;
        Ok(())
    }

    /// The stored properties of `key`, bypassing counters and failures.
    pub fn raw(&self, key: &StorageKey) -> Result<Option<PropertyList>, BackendError> {
        let entities = self.entities.read().map_err(|_| BackendError::LockPoisoned)?;
        Ok(entities.get(key).cloned())
    }

    /// Store properties directly, bypassing counters and failures.
    pub fn insert_raw(&self, key: StorageKey, properties: PropertyList) -> Result<(), BackendError> {
        self.entities
            .write()
            .map_err(|_| BackendError::LockPoisoned)?
            .insert(key, properties);
        Ok(())
    }

    pub fn len(&self) -> Result<usize, BackendError> {
        Ok(self.entities.read().map_err(|_| BackendError::LockPoisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, BackendError> {
        Ok(self.len()? == 0)
    }

    fn take_failure(&self) -> Result<(), BackendError> {
        let mut slot = self
            .next_failure
            .lock()
            .map_err(|_| BackendError::LockPoisoned)?;
        match slot.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(
        &self,
        keys: &[StorageKey],
    ) -> Result<Vec<Result<PropertyList, BackendError>>, BackendError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let entities = self.entities.read().map_err(|_| BackendError::LockPoisoned)?;
        let failures = self
            .key_failures
            .read()
            .map_err(|_| BackendError::LockPoisoned)?;
        Ok(keys
            .iter()
            .map(|key| {
                if let Some(error) = failures.get(key) {
                    return Err(error.clone());
                }
                entities.get(key).cloned().ok_or_else(|| BackendError::NotFound {
                    key: key.encode(),
                })
            })
            .collect())
    }

    fn put(
        &self,
        keys: &[StorageKey],
        values: &[PropertyList],
    ) -> Result<Vec<StorageKey>, BackendError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        if keys.len() != values.len() {
            return Err(BackendError::Failed {
                operation: "put".to_string(),
                reason: format!("{} keys for {} values", keys.len(), values.len()),
            });
        }
        let mut entities = self
            .entities
            .write()
            .map_err(|_| BackendError::LockPoisoned)?;
        let mut assigned = Vec::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            let key = if key.is_incomplete() {
                key.clone().with_id(self.next_id())
            } else {
                key.clone()
            };
            entities.insert(key.clone(), value.clone());
            assigned.push(key);
        }
        Ok(assigned)
    }

    fn delete(&self, keys: &[StorageKey]) -> Result<(), BackendError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let mut entities = self
            .entities
            .write()
            .map_err(|_| BackendError::LockPoisoned)?;
        for key in keys {
            entities.remove(key);
        }
        Ok(())
    }

    fn allocate_id(&self, _key: &StorageKey) -> Result<i64, BackendError> {
        self.allocations.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        Ok(self.next_id())
    }

    fn query(&self, query: &Query) -> Result<QueryResult, BackendError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.take_failure()?;
        let entities = self.entities.read().map_err(|_| BackendError::LockPoisoned)?;
        evaluate_query(query, entities.iter())
    }

    fn indexes_only_in_properties(&self) -> bool {
        self.indexes_only
    }
}

// =============================================================================
// TESTS
// =============================================================================
