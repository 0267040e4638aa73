//! Tessera Core - Leaf Types
//!
//! Values, properties, keys, type descriptors and the error taxonomy shared by
//! every Tessera crate. Nothing in here performs I/O.

pub mod config;
pub mod descriptor;
pub mod directive;
pub mod error;
pub mod key;
pub mod property;
pub mod query;
pub mod tree;
pub mod value;

pub use config::{CodecKind, DatastoreConfig};
pub use descriptor::{
    kind_key, CachePolicy, FieldDescriptor, FieldKind, FieldSet, ParentSpec, Policy,
    TypeDescriptor, TypeDescriptorBuilder, ValuePredicate, DEFAULT_CACHE_TTL,
};
pub use directive::{parse_bool, parse_duration, parse_field_directive};
pub use error::{
    BackendError, CacheError, CodecError, ConfigError, HookError, HookStage, KeyError,
    MultiError, Origin, TesseraError, TesseraResult, TypeError,
};
pub use key::{validate_name, StorageKey};
pub use property::{Property, PropertyList};
pub use query::{Filter, FilterOp, Query, QueryResult};
pub use tree::{Int64Node, TreeCodec};
pub use value::{Blob, FieldValue, Scalar, Value};
