//! LMDB-backed persistent backend.
//!
//! Uses the heed crate (Rust bindings for LMDB). Two named databases live in
//! one environment:
//! - `entities`: encoded storage key to CBOR-encoded property list
//! - `sequences`: kind to the last id handed out for that kind
//!
//! Reads use read transactions; `put`, `delete` and id allocation use write
//! transactions, so ids are allocated atomically with the writes that use them.

use std::path::Path;

use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RwTxn};
use tessera_core::{BackendError, PropertyList, Query, QueryResult, StorageKey};
use tracing::debug;

use super::{evaluate_query, Backend};

/// Error type for LMDB backend operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbBackendError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbBackendError> for BackendError {
    fn from(e: LmdbBackendError) -> Self {
        match e {
            LmdbBackendError::EnvOpen(reason) => BackendError::Unavailable { reason },
            other => BackendError::Failed {
                operation: "lmdb".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

fn txn_error(e: heed::Error) -> LmdbBackendError {
    LmdbBackendError::Transaction(e.to_string())
}

/// A [`Backend`] persisted in an LMDB environment.
pub struct LmdbBackend {
    env: Env,
    entities: Database<Bytes, Bytes>,
    sequences: Database<Bytes, Bytes>,
}

impl LmdbBackend {
    /// Open (or create) the store under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbBackendError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per path by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbBackendError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_error)?;
        let entities: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("entities"))
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;
        let sequences: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some("sequences"))
            .map_err(|e| LmdbBackendError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_error)?;

        debug!(path = %path.as_ref().display(), max_size_mb, "Opened LMDB backend");
        Ok(Self {
            env,
            entities,
            sequences,
        })
    }

    fn encode_props(properties: &PropertyList) -> Result<Vec<u8>, LmdbBackendError> {
        serde_cbor::to_vec(properties).map_err(|e| LmdbBackendError::Serialization(e.to_string()))
    }

    fn decode_props(bytes: &[u8]) -> Result<PropertyList, LmdbBackendError> {
        serde_cbor::from_slice(bytes).map_err(|e| LmdbBackendError::Deserialization(e.to_string()))
    }

    /// Next id for `kind`, recorded in the sequence database of `wtxn`.
    fn next_id(&self, wtxn: &mut RwTxn<'_>, kind: &str) -> Result<i64, LmdbBackendError> {
        let last = match self.sequences.get(&*wtxn, kind.as_bytes()).map_err(txn_error)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes.try_into().map_err(|_| {
                    LmdbBackendError::Deserialization(format!("bad sequence for {}", kind))
                })?;
                i64::from_le_bytes(raw)
            }
            None => 0,
        };
        let next = last + 1;
        self.sequences
            .put(wtxn, kind.as_bytes(), &next.to_le_bytes())
            .map_err(txn_error)?;
        Ok(next)
    }

    /// Keep a sequence ahead of an explicitly chosen id.
    fn bump_sequence(&self, wtxn: &mut RwTxn<'_>, kind: &str, id: i64) -> Result<(), LmdbBackendError> {
        let last = match self.sequences.get(&*wtxn, kind.as_bytes()).map_err(txn_error)? {
            Some(bytes) => bytes.try_into().map(i64::from_le_bytes).unwrap_or(0),
            None => 0,
        };
        if id > last {
            self.sequences
                .put(wtxn, kind.as_bytes(), &id.to_le_bytes())
                .map_err(txn_error)?;
        }
        Ok(())
    }

    fn get_all(
        &self,
        keys: &[StorageKey],
    ) -> Result<Vec<Result<PropertyList, BackendError>>, LmdbBackendError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            let encoded = key.encode();
            let slot = match self.entities.get(&rtxn, encoded.as_bytes()).map_err(txn_error)? {
                Some(bytes) => Self::decode_props(bytes).map_err(BackendError::from),
                None => Err(BackendError::NotFound { key: encoded }),
            };
            out.push(slot);
        }
        Ok(out)
    }

    fn put_all(
        &self,
        keys: &[StorageKey],
        values: &[PropertyList],
    ) -> Result<Vec<StorageKey>, LmdbBackendError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let mut assigned = Vec::with_capacity(keys.len());
        for (key, value) in keys.iter().zip(values) {
            let key = if key.is_incomplete() {
                let id = self.next_id(&mut wtxn, key.kind())?;
                key.clone().with_id(id)
            } else {
                self.bump_sequence(&mut wtxn, key.kind(), key.id())?;
                key.clone()
            };
            let bytes = Self::encode_props(value)?;
            self.entities
                .put(&mut wtxn, key.encode().as_bytes(), &bytes)
                .map_err(txn_error)?;
            assigned.push(key);
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(assigned)
    }

    fn delete_all(&self, keys: &[StorageKey]) -> Result<(), LmdbBackendError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        for key in keys {
            self.entities
                .delete(&mut wtxn, key.encode().as_bytes())
                .map_err(txn_error)?;
        }
        wtxn.commit().map_err(txn_error)?;
        Ok(())
    }

    fn allocate(&self, kind: &str) -> Result<i64, LmdbBackendError> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        let id = self.next_id(&mut wtxn, kind)?;
        wtxn.commit().map_err(txn_error)?;
        Ok(id)
    }

    /// Every stored entity of `kind`.
    fn scan(&self, kind: &str) -> Result<Vec<(StorageKey, PropertyList)>, LmdbBackendError> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut out = Vec::new();
        for entry in self.entities.iter(&rtxn).map_err(txn_error)? {
            let (raw_key, raw_value) = entry.map_err(txn_error)?;
            let encoded = std::str::from_utf8(raw_key)
                .map_err(|e| LmdbBackendError::Deserialization(e.to_string()))?;
            let key = StorageKey::decode(encoded)
                .map_err(|e| LmdbBackendError::Deserialization(e.to_string()))?;
            if key.kind() == kind {
                out.push((key, Self::decode_props(raw_value)?));
            }
        }
        Ok(out)
    }
}

impl Backend for LmdbBackend {
    fn name(&self) -> &str {
        "lmdb"
    }

    fn get(
        &self,
        keys: &[StorageKey],
    ) -> Result<Vec<Result<PropertyList, BackendError>>, BackendError> {
        Ok(self.get_all(keys)?)
    }

    fn put(
        &self,
        keys: &[StorageKey],
        values: &[PropertyList],
    ) -> Result<Vec<StorageKey>, BackendError> {
        if keys.len() != values.len() {
            return Err(BackendError::Failed {
                operation: "put".to_string(),
                reason: format!("{} keys for {} values", keys.len(), values.len()),
            });
        }
        Ok(self.put_all(keys, values)?)
    }

    fn delete(&self, keys: &[StorageKey]) -> Result<(), BackendError> {
        Ok(self.delete_all(keys)?)
    }

    fn allocate_id(&self, key: &StorageKey) -> Result<i64, BackendError> {
        Ok(self.allocate(key.kind())?)
    }

    fn query(&self, query: &Query) -> Result<QueryResult, BackendError> {
        let entries = self.scan(&query.kind)?;
        evaluate_query(query, entries.iter().map(|(k, p)| (k, p)))
    }
}

// =============================================================================
// TESTS
// =============================================================================
