//! Error types for Tessera operations

use std::fmt;
use thiserror::Error;

/// Configuration errors raised while describing or registering a type.
///
/// These are fatal at startup and never retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Malformed directive on {field}: {token:?} - {reason}")]
    MalformedDirective {
        field: String,
        token: String,
        reason: String,
    },

    #[error("Duplicate registration for kind {kind_key}: already bound to {existing}")]
    DuplicateKind { kind_key: String, existing: String },

    #[error("Storage name {storage_name} is bound twice in {type_name}")]
    DuplicateStorageName {
        type_name: String,
        storage_name: String,
    },

    #[error("Storage name {storage_name} in {type_name} falls under the {prefix}_ prefix of a flattened field")]
    ShadowedStorageName {
        type_name: String,
        storage_name: String,
        prefix: String,
    },

    #[error("Type {type_name} declares no key field")]
    MissingKeyField { type_name: String },

    #[error("Field {field} of {type_name} uses {field_kind} encoding, which requires auto hooks")]
    AutoHooksRequired {
        type_name: String,
        field: String,
        field_kind: String,
    },

    #[error("Invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Errors for types the registry cannot describe or bind.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("Type {type_name} is not registered")]
    Unregistered { type_name: String },

    #[error("No type registered for kind {kind:?} with shape {shape:?}")]
    UnknownKind { kind: String, shape: String },

    #[error("Key of kind {found} cannot be bound to {type_name} (kind {expected})")]
    KindMismatch {
        type_name: String,
        expected: String,
        found: String,
    },

    #[error("Field {field} is not declared on {type_name}")]
    UndeclaredField { type_name: String, field: String },

    #[error("Field {field} of {type_name} is declared {declared} but accessed as {accessed}")]
    FieldKindMismatch {
        type_name: String,
        field: String,
        declared: String,
        accessed: String,
    },

    #[error("Type registry lock poisoned")]
    RegistryPoisoned,
}

/// Key derivation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("Parent of kind {parent_kind} is not persisted (id {parent_id})")]
    ParentNotPersisted { parent_kind: String, parent_id: i64 },

    #[error("Key {key} is incomplete")]
    Incomplete { key: String },

    #[error("Malformed key {input:?}: {reason}")]
    Malformed { input: String, reason: String },
}

/// Property conversion errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Property {property} holds {found}, expected {expected}")]
    TypeMismatch {
        property: String,
        expected: String,
        found: String,
    },

    #[error("Encoding {field} failed: {reason}")]
    Encode { field: String, reason: String },

    #[error("Decoding {field} failed: {reason}")]
    Decode { field: String, reason: String },

    #[error("Malformed tree encoding at position {position}: {reason}")]
    MalformedTree { position: usize, reason: String },

    #[error("Tree value {value} collides with a reserved marker")]
    ReservedTreeValue { value: i64 },
}

/// Errors reported by a backend driver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("Entity not found: {key}")]
    NotFound { key: String },

    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Backend {operation} failed: {reason}")]
    Failed { operation: String, reason: String },

    #[error("Backend lock poisoned")]
    LockPoisoned,
}

/// Errors reported by a cache tier.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache tier {tier} unavailable: {reason}")]
    Unavailable { tier: String, reason: String },

    #[error("Cache entry {key} could not be decoded: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Cache lock poisoned")]
    LockPoisoned,
}

/// Error returned by an entity lifecycle hook.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct HookError {
    pub reason: String,
}

impl HookError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Lifecycle stage a hook runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    PostLoad,
    PreSave,
    PostSave,
}

impl fmt::Display for HookStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HookStage::PostLoad => "post-load",
            HookStage::PreSave => "pre-save",
            HookStage::PostSave => "post-save",
        };
        f.write_str(name)
    }
}

/// Where a lookup was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    RequestCache,
    ProcessCache,
    SharedCache,
    Backend,
    /// The type never touches the backend, so a cache miss is final.
    CacheOnly,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Origin::RequestCache => "request cache",
            Origin::ProcessCache => "process cache",
            Origin::SharedCache => "shared cache",
            Origin::Backend => "backend",
            Origin::CacheOnly => "cache-only tiers",
        };
        f.write_str(name)
    }
}

/// Ordered per-item errors for a batch operation.
///
/// Slot `i` lines up with input `i`; `None` marks an item that succeeded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiError {
    errors: Vec<Option<TesseraError>>,
}

impl MultiError {
    /// Create an aggregate with `len` empty slots.
    pub fn new(len: usize) -> Self {
        Self {
            errors: vec![None; len],
        }
    }

    pub fn set(&mut self, index: usize, error: TesseraError) {
        if let Some(slot) = self.errors.get_mut(index) {
            *slot = Some(error);
        }
    }

    pub fn get(&self, index: usize) -> Option<&TesseraError> {
        self.errors.get(index).and_then(Option::as_ref)
    }

    pub fn is_set(&self, index: usize) -> bool {
        self.get(index).is_some()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Number of slots holding an error.
    pub fn failed(&self) -> usize {
        self.errors.iter().filter(|e| e.is_some()).count()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Option<TesseraError>> {
        self.errors.iter()
    }

    /// Take the error in the first slot, if any.
    pub fn into_first(self) -> Option<TesseraError> {
        self.errors.into_iter().next().flatten()
    }

    pub fn into_inner(self) -> Vec<Option<TesseraError>> {
        self.errors
    }

    /// `Ok` when no slot holds an error, otherwise the whole aggregate.
    pub fn into_result(self) -> TesseraResult<()> {
        if self.errors.iter().any(Option::is_some) {
            Err(TesseraError::Multi(self))
        } else {
            Ok(())
        }
    }
}

impl From<Vec<Option<TesseraError>>> for MultiError {
    fn from(errors: Vec<Option<TesseraError>>) -> Self {
        Self { errors }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} batch items failed", self.failed(), self.len())?;
        if let Some(first) = self.errors.iter().flatten().next() {
            write!(f, " (first: {})", first)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

/// Master error type for all Tessera errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TesseraError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Type error: {0}")]
    Type(#[from] TypeError),

    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("{stage} hook failed for {key}: {source}")]
    Hook {
        stage: HookStage,
        key: String,
        source: HookError,
    },

    #[error("Entity not found in {origin}: {key}")]
    NotFound { key: String, origin: Origin },

    #[error("Batch size mismatch: {keys} keys for {entities} entities")]
    BatchMismatch { keys: usize, entities: usize },

    #[error("Batch error: {0}")]
    Multi(MultiError),
}

impl TesseraError {
    /// True for confirmed absence.
    ///
    /// An aggregate counts only when it is non-empty and every slot holds a
    /// not-found error; a successful slot makes the whole aggregate false.
    pub fn is_not_found(&self) -> bool {
        match self {
            TesseraError::NotFound { .. } => true,
            TesseraError::Backend(BackendError::NotFound { .. }) => true,
            TesseraError::Multi(multi) => {
                !multi.is_empty()
                    && multi
                        .iter()
                        .all(|slot| slot.as_ref().is_some_and(TesseraError::is_not_found))
            }
            _ => false,
        }
    }

    /// True for errors a caller should treat as a programming or setup mistake.
    pub fn is_fatal_config(&self) -> bool {
        matches!(self, TesseraError::Config(_) | TesseraError::Type(_))
    }
}

/// Result type alias for Tessera operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

// =============================================================================
// TESTS
// =============================================================================
