//! Storage keys.
//!
//! A key names one entity: its kind, an optional shape discriminator, a
//! numeric id and at most one parent key. The canonical text form lists the
//! ancestry root first, one `kind[~shape]:id` segment per level, joined by `/`.

use crate::{ConfigError, KeyError};
use serde::{Deserialize, Serialize};
use std::fmt;

const SEGMENT_SEPARATOR: char = '/';
const SHAPE_SEPARATOR: char = '~';
const ID_SEPARATOR: char = ':';

/// Characters a kind or shape may not contain.
const RESERVED: &[char] = &[SEGMENT_SEPARATOR, SHAPE_SEPARATOR, ID_SEPARATOR, '^', '|'];

/// Check a kind or shape name.
pub fn validate_name(name: &str, what: &str) -> Result<(), ConfigError> {
    if name.is_empty() {
        return Err(ConfigError::InvalidName {
            name: name.to_string(),
            reason: format!("{} must not be empty", what),
        });
    }
    if let Some(c) = name.chars().find(|c| RESERVED.contains(c) || c.is_whitespace()) {
        return Err(ConfigError::InvalidName {
            name: name.to_string(),
            reason: format!("{} contains reserved character {:?}", what, c),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StorageKey {
    kind: String,
    shape: String,
    id: i64,
    parent: Option<Box<StorageKey>>,
}

impl StorageKey {
    pub fn new(
        kind: impl Into<String>,
        shape: impl Into<String>,
        id: i64,
        parent: Option<StorageKey>,
    ) -> Self {
        Self {
            kind: kind.into(),
            shape: shape.into(),
            id,
            parent: parent.map(Box::new),
        }
    }

    /// A key still waiting for a backend-assigned id.
    pub fn incomplete(
        kind: impl Into<String>,
        shape: impl Into<String>,
        parent: Option<StorageKey>,
    ) -> Self {
        Self::new(kind, shape, 0, parent)
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn shape(&self) -> &str {
        &self.shape
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn parent(&self) -> Option<&StorageKey> {
        self.parent.as_deref()
    }

    pub fn is_incomplete(&self) -> bool {
        self.id <= 0
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// Canonical text form. Decodes back to an equal key.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut String) {
        if let Some(parent) = &self.parent {
            parent.encode_into(out);
            out.push(SEGMENT_SEPARATOR);
        }
        out.push_str(&self.kind);
        if !self.shape.is_empty() {
            out.push(SHAPE_SEPARATOR);
            out.push_str(&self.shape);
        }
        out.push(ID_SEPARATOR);
        out.push_str(&self.id.to_string());
    }

    pub fn decode(input: &str) -> Result<Self, KeyError> {
        let malformed = |reason: String| KeyError::Malformed {
            input: input.to_string(),
            reason,
        };
        if input.is_empty() {
            return Err(malformed("empty key".to_string()));
        }

        let mut key: Option<StorageKey> = None;
        for segment in input.split(SEGMENT_SEPARATOR) {
            let (head, id) = segment
                .rsplit_once(ID_SEPARATOR)
                .ok_or_else(|| malformed(format!("segment {:?} has no id", segment)))?;
            let id: i64 = id
                .parse()
                .map_err(|_| malformed(format!("segment {:?} has a non-numeric id", segment)))?;
            let (kind, shape) = match head.split_once(SHAPE_SEPARATOR) {
                Some((kind, shape)) => (kind, shape),
                None => (head, ""),
            };
            validate_name(kind, "kind").map_err(|e| malformed(e.to_string()))?;
            if !shape.is_empty() {
                validate_name(shape, "shape").map_err(|e| malformed(e.to_string()))?;
            }
            key = Some(StorageKey::new(kind, shape, id, key.take()));
        }
        key.ok_or_else(|| malformed("no segments".to_string()))
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

// =============================================================================
// TESTS
// =============================================================================
