//! Key/value backend boundary.
//!
//! The datastore talks to storage only through [`Backend`]. Two
//! implementations ship with the crate: [`MemoryBackend`] for tests and
//! embedding, and [`LmdbBackend`] for a persistent local store.

pub mod lmdb;
pub mod memory;

pub use lmdb::{LmdbBackend, LmdbBackendError};
pub use memory::{CallCounts, MemoryBackend};

use std::cmp::Ordering;
use tessera_core::{BackendError, KeyError, PropertyList, Query, QueryResult, StorageKey};

/// A key/value store addressed by [`StorageKey`].
///
/// Batch calls line up with their input: slot `i` of a result answers key `i`.
/// An `Err` from the call itself means the whole batch failed.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Per-key results; absence is `BackendError::NotFound` in that slot.
    fn get(
        &self,
        keys: &[StorageKey],
    ) -> Result<Vec<Result<PropertyList, BackendError>>, BackendError>;

    /// Store `values[i]` under `keys[i]`. Incomplete keys get a fresh id; the
    /// returned keys are all complete.
    fn put(
        &self,
        keys: &[StorageKey],
        values: &[PropertyList],
    ) -> Result<Vec<StorageKey>, BackendError>;

    /// Deleting an absent key is not an error.
    fn delete(&self, keys: &[StorageKey]) -> Result<(), BackendError>;

    /// Reserve an id for an incomplete key without storing anything.
    fn allocate_id(&self, key: &StorageKey) -> Result<i64, BackendError>;

    /// Keys-only query. Matching is on kind; callers filter shape themselves.
    fn query(&self, query: &Query) -> Result<QueryResult, BackendError>;

    fn new_key(&self, kind: &str, shape: &str, id: i64, parent: Option<StorageKey>) -> StorageKey {
        StorageKey::new(kind, shape, id, parent)
    }

    fn encode_key(&self, key: &StorageKey) -> String {
        key.encode()
    }

    fn decode_key(&self, encoded: &str) -> Result<StorageKey, KeyError> {
        StorageKey::decode(encoded)
    }

    fn is_not_found(&self, error: &BackendError) -> bool {
        matches!(error, BackendError::NotFound { .. })
    }

    /// Whether unindexed properties should be dropped before `put`.
    fn indexes_only_in_properties(&self) -> bool {
        false
    }
}

fn parse_cursor(cursor: Option<&str>) -> Result<Option<usize>, BackendError> {
    cursor
        .map(|c| {
            c.parse::<usize>().map_err(|_| BackendError::Failed {
                operation: "query".to_string(),
                reason: format!("invalid cursor {:?}", c),
            })
        })
        .transpose()
}

/// Run `query` over a full scan of stored entities.
///
/// Cursors are positions in the ordered result set. The returned cursor
/// points just past the last key returned.
pub fn evaluate_query<'a, I>(query: &Query, entries: I) -> Result<QueryResult, BackendError>
where
    I: IntoIterator<Item = (&'a StorageKey, &'a PropertyList)>,
{
    let start = parse_cursor(query.start_cursor.as_deref())?.unwrap_or(0);
    let end = parse_cursor(query.end_cursor.as_deref())?;

    let mut matched: Vec<(&StorageKey, &PropertyList)> = entries
        .into_iter()
        .filter(|(key, _)| key.kind() == query.kind)
        .filter(|(key, _)| match &query.ancestor {
            Some(ancestor) => key.parent() == Some(ancestor),
            None => true,
        })
        .filter(|(_, props)| query.matches(props))
        .collect();

    match query.order_by() {
        Some((property, descending)) => {
            // entities without the order property never appear in ordered results
            matched.retain(|(_, props)| props.contains(property));
            matched.sort_by(|(ka, pa), (kb, pb)| {
                let ordering = match (pa.first_value(property), pb.first_value(property)) {
                    (Some(a), Some(b)) => a.compare(b).unwrap_or(Ordering::Equal),
                    _ => Ordering::Equal,
                };
                let ordering = if descending { ordering.reverse() } else { ordering };
                ordering.then_with(|| ka.cmp(kb))
            });
        }
        None => matched.sort_by(|(ka, _), (kb, _)| ka.cmp(kb)),
    }

    let first = start.saturating_add(query.offset).min(matched.len());
    let mut last = end.map_or(matched.len(), |e| e.min(matched.len()));
    if let Some(limit) = query.limit {
        last = last.min(first.saturating_add(limit));
    }
    let last = last.max(first);

    Ok(QueryResult {
        keys: matched[first..last]
            .iter()
            .map(|(key, _)| (*key).clone())
            .collect(),
        cursor: Some(last.to_string()),
    })
}

// =============================================================================
// TESTS
// =============================================================================
