//! Per-type storage configuration.
//!
//! A [`TypeDescriptor`] is built once per entity type through
//! [`TypeDescriptorBuilder`] and is immutable afterwards. It names the key,
//! kind and shape of the type, its optional parent, which cache tiers it uses
//! and how each stored field is flattened.

use crate::key::validate_name;
use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

/// Default TTL for both the process and the shared tier.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

// ============================================================================
// FIELD POLICIES
// ============================================================================

/// Condition evaluated against a field value before storing or indexing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValuePredicate {
    Always,
    Never,
    /// Only when the value is the zero value of its type.
    Empty,
    /// Only when the value differs from the zero value of its type.
    NotEmpty,
}

impl ValuePredicate {
    pub fn holds(self, is_empty: bool) -> bool {
        match self {
            ValuePredicate::Always => true,
            ValuePredicate::Never => false,
            ValuePredicate::Empty => is_empty,
            ValuePredicate::NotEmpty => !is_empty,
        }
    }

    /// Directive token form: `y`, `!y`, `z`, `!z`.
    pub fn token(self) -> &'static str {
        match self {
            ValuePredicate::Always => "y",
            ValuePredicate::Never => "!y",
            ValuePredicate::Empty => "z",
            ValuePredicate::NotEmpty => "!z",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token {
            "y" => Some(ValuePredicate::Always),
            "!y" => Some(ValuePredicate::Never),
            "z" => Some(ValuePredicate::Empty),
            "!z" => Some(ValuePredicate::NotEmpty),
            _ => None,
        }
    }
}

/// Conjunction of predicates; the field passes when every predicate holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy(Vec<ValuePredicate>);

impl Policy {
    pub fn only(predicate: ValuePredicate) -> Self {
        Policy(vec![predicate])
    }

    pub fn all(predicates: impl IntoIterator<Item = ValuePredicate>) -> Self {
        let predicates: Vec<ValuePredicate> = predicates.into_iter().collect();
        if predicates.is_empty() {
            Policy::default()
        } else {
            Policy(predicates)
        }
    }

    pub fn allows(&self, is_empty: bool) -> bool {
        self.0.iter().all(|p| p.holds(is_empty))
    }

    pub fn predicates(&self) -> &[ValuePredicate] {
        &self.0
    }
}

impl Default for Policy {
    fn default() -> Self {
        Policy(vec![ValuePredicate::NotEmpty])
    }
}

/// How a field is flattened into properties.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Stored as-is, one value or one repeated run.
    #[default]
    Plain,
    /// Serialized into one opaque byte property.
    Marshal,
    /// Sub-structure, list of sub-structures, or map, flattened with a name prefix.
    Nested,
    /// Map expanded into one property per entry.
    Expando,
    /// Ordered tree linearized into a run of integers.
    Tree,
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldKind::Plain => "plain",
            FieldKind::Marshal => "marshal",
            FieldKind::Nested => "nested",
            FieldKind::Expando => "expando",
            FieldKind::Tree => "tree",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    field_name: String,
    storage_name: String,
    kind: FieldKind,
    store: Policy,
    index: Policy,
}

impl FieldDescriptor {
    /// A plain field stored under its own name with the not-empty policy.
    pub fn new(field_name: impl Into<String>) -> Self {
        let field_name = field_name.into();
        Self {
            storage_name: field_name.clone(),
            field_name,
            kind: FieldKind::Plain,
            store: Policy::default(),
            index: Policy::default(),
        }
    }

    pub fn with_storage_name(mut self, storage_name: impl Into<String>) -> Self {
        self.storage_name = storage_name.into();
        self
    }

    pub fn with_kind(mut self, kind: FieldKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_store(mut self, predicate: ValuePredicate) -> Self {
        self.store = Policy::only(predicate);
        self
    }

    pub fn with_index(mut self, predicate: ValuePredicate) -> Self {
        self.index = Policy::only(predicate);
        self
    }

    pub fn with_store_policy(mut self, policy: Policy) -> Self {
        self.store = policy;
        self
    }

    pub fn with_index_policy(mut self, policy: Policy) -> Self {
        self.index = policy;
        self
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn store(&self) -> &Policy {
        &self.store
    }

    pub fn index(&self) -> &Policy {
        &self.index
    }
}

/// A reusable group of fields, flattened into every type that embeds it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet(Vec<FieldDescriptor>);

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.0.push(field);
        self
    }

    pub fn embed(mut self, other: FieldSet) -> Self {
        self.0.extend(other.0);
        self
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FieldDescriptor> {
        self.0.iter()
    }
}

// ============================================================================
// TYPE DESCRIPTOR
// ============================================================================

/// One level of ancestry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentSpec {
    pub key_field: String,
    pub kind: String,
    pub shape: String,
    pub shape_field: Option<String>,
}

impl ParentSpec {
    pub fn new(key_field: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            kind: kind.into(),
            ..Default::default()
        }
    }

    pub fn with_shape(mut self, shape: impl Into<String>) -> Self {
        self.shape = shape.into();
        self
    }

    pub fn with_shape_field(mut self, field: impl Into<String>) -> Self {
        self.shape_field = Some(field.into());
        self
    }
}

/// Which cache tiers a type uses, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub request: bool,
    pub process: bool,
    pub shared: bool,
    /// Zero means no expiry.
    pub process_ttl: Duration,
    /// Zero means no expiry.
    pub shared_ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            request: true,
            process: false,
            shared: true,
            process_ttl: DEFAULT_CACHE_TTL,
            shared_ttl: DEFAULT_CACHE_TTL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDescriptor {
    type_name: String,
    kind: String,
    shape: String,
    key_field: String,
    shape_field: Option<String>,
    parent: Option<ParentSpec>,
    cache: CachePolicy,
    use_datastore: bool,
    auto_hooks: bool,
    pinned: bool,
    fields: Vec<FieldDescriptor>,
    by_field: HashMap<String, usize>,
}

impl TypeDescriptor {
    pub fn builder() -> TypeDescriptorBuilder {
        TypeDescriptorBuilder::default()
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn shape(&self) -> &str {
        &self.shape
    }

    /// Registry key: `kind`, or `kind:shape` for a shaped type.
    pub fn kind_key(&self) -> String {
        kind_key(&self.kind, &self.shape)
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn shape_field(&self) -> Option<&str> {
        self.shape_field.as_deref()
    }

    pub fn parent(&self) -> Option<&ParentSpec> {
        self.parent.as_ref()
    }

    pub fn cache(&self) -> &CachePolicy {
        &self.cache
    }

    pub fn use_datastore(&self) -> bool {
        self.use_datastore
    }

    pub fn auto_hooks(&self) -> bool {
        self.auto_hooks
    }

    pub fn pinned(&self) -> bool {
        self.pinned
    }

    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look a field up by its Rust field name.
    pub fn field(&self, field_name: &str) -> Option<&FieldDescriptor> {
        self.by_field.get(field_name).map(|&i| &self.fields[i])
    }
}

pub fn kind_key(kind: &str, shape: &str) -> String {
    if shape.is_empty() {
        kind.to_string()
    } else {
        format!("{}:{}", kind, shape)
    }
}

#[derive(Debug, Clone)]
pub struct TypeDescriptorBuilder {
    type_name: String,
    kind: String,
    shape: String,
    key_field: String,
    shape_field: Option<String>,
    parent: Option<ParentSpec>,
    cache: CachePolicy,
    use_datastore: bool,
    auto_hooks: bool,
    pinned: bool,
    fields: Vec<FieldDescriptor>,
}

impl Default for TypeDescriptorBuilder {
    fn default() -> Self {
        Self {
            type_name: String::new(),
            kind: String::new(),
            shape: String::new(),
            key_field: String::new(),
            shape_field: None,
            parent: None,
            cache: CachePolicy::default(),
            use_datastore: true,
            auto_hooks: false,
            pinned: false,
            fields: Vec::new(),
        }
    }
}

impl TypeDescriptorBuilder {
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = type_name.into();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn with_shape(mut self, shape: impl Into<String>) -> Self {
        self.shape = shape.into();
        self
    }

    pub fn with_key_field(mut self, field: impl Into<String>) -> Self {
        self.key_field = field.into();
        self
    }

    pub fn with_shape_field(mut self, field: impl Into<String>) -> Self {
        self.shape_field = Some(field.into());
        self
    }

    pub fn with_parent(mut self, parent: ParentSpec) -> Self {
        self.parent = Some(parent);
        self
    }

    pub(crate) fn parent_mut(&mut self) -> &mut ParentSpec {
        self.parent.get_or_insert_with(ParentSpec::default)
    }

    pub fn with_request_cache(mut self, enabled: bool) -> Self {
        self.cache.request = enabled;
        self
    }

    pub fn with_process_cache(mut self, enabled: bool) -> Self {
        self.cache.process = enabled;
        self
    }

    pub fn with_shared_cache(mut self, enabled: bool) -> Self {
        self.cache.shared = enabled;
        self
    }

    pub fn with_process_ttl(mut self, ttl: Duration) -> Self {
        self.cache.process_ttl = ttl;
        self
    }

    pub fn with_shared_ttl(mut self, ttl: Duration) -> Self {
        self.cache.shared_ttl = ttl;
        self
    }

    pub fn with_datastore(mut self, enabled: bool) -> Self {
        self.use_datastore = enabled;
        self
    }

    pub fn with_auto_hooks(mut self, enabled: bool) -> Self {
        self.auto_hooks = enabled;
        self
    }

    pub fn with_pinned(mut self, pinned: bool) -> Self {
        self.pinned = pinned;
        self
    }

    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Flatten an embedded field group into this type.
    pub fn embed(mut self, fields: FieldSet) -> Self {
        self.fields.extend(fields.0);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn shape(&self) -> &str {
        &self.shape
    }

    pub fn build(self) -> Result<TypeDescriptor, ConfigError> {
        let type_name = if self.type_name.is_empty() {
            self.kind.clone()
        } else {
            self.type_name
        };

        validate_name(&self.kind, "kind")?;
        if !self.shape.is_empty() {
            validate_name(&self.shape, "shape")?;
        }
        if self.key_field.is_empty() {
            return Err(ConfigError::MissingKeyField { type_name });
        }
        if let Some(parent) = &self.parent {
            if parent.key_field.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "pkeyf".to_string(),
                    value: String::new(),
                    reason: format!("parent of {} needs a key field", type_name),
                });
            }
            validate_name(&parent.kind, "parent kind")?;
            if !parent.shape.is_empty() {
                validate_name(&parent.shape, "parent shape")?;
            }
        }

        let mut by_field = HashMap::with_capacity(self.fields.len());
        let mut storage_names = HashSet::with_capacity(self.fields.len());
        for (i, field) in self.fields.iter().enumerate() {
            if field.kind != FieldKind::Plain && !self.auto_hooks {
                return Err(ConfigError::AutoHooksRequired {
                    type_name,
                    field: field.field_name.clone(),
                    field_kind: field.kind.to_string(),
                });
            }
            if field.storage_name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.field_name.clone(),
                    value: String::new(),
                    reason: "storage name must not be empty".to_string(),
                });
            }
            if !storage_names.insert(field.storage_name.as_str()) {
                return Err(ConfigError::DuplicateStorageName {
                    type_name,
                    storage_name: field.storage_name.clone(),
                });
            }
            if by_field.insert(field.field_name.clone(), i).is_some() {
                return Err(ConfigError::InvalidValue {
                    field: field.field_name.clone(),
                    value: field.storage_name.clone(),
                    reason: "field declared twice".to_string(),
                });
            }
        }

        // flattened fields read back every property under `<storage>_`
        for prefixed in self
            .fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Nested | FieldKind::Expando))
        {
            let prefix = prefixed.storage_name.as_str();
            if let Some(other) = self.fields.iter().find(|f| {
                f.storage_name
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('_'))
            }) {
                return Err(ConfigError::ShadowedStorageName {
                    type_name,
                    storage_name: other.storage_name.clone(),
                    prefix: prefix.to_string(),
                });
            }
        }

        Ok(TypeDescriptor {
            type_name,
            kind: self.kind,
            shape: self.shape,
            key_field: self.key_field,
            shape_field: self.shape_field,
            parent: self.parent,
            cache: self.cache,
            use_datastore: self.use_datastore,
            auto_hooks: self.auto_hooks,
            pinned: self.pinned,
            fields: self.fields,
            by_field,
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn user_builder() -> TypeDescriptorBuilder {
        TypeDescriptor::builder()
            .with_type_name("User")
            .with_kind("U")
            .with_key_field("id")
            .field(FieldDescriptor::new("name"))
            .field(FieldDescriptor::new("tags").with_storage_name("t"))
    }

    #[test]
    fn test_defaults_follow_tier_policy() {
        let d = user_builder().build().expect("valid descriptor");
        assert!(d.cache().request);
        assert!(!d.cache().process);
        assert!(d.cache().shared);
        assert_eq!(d.cache().process_ttl, DEFAULT_CACHE_TTL);
        assert_eq!(d.cache().shared_ttl, DEFAULT_CACHE_TTL);
        assert!(d.use_datastore());
        assert!(!d.auto_hooks());
        assert_eq!(d.kind_key(), "U");
    }

    #[test]
    fn test_field_lookup_and_default_policy() {
        let d = user_builder().build().expect("valid descriptor");
        let tags = d.field("tags").expect("declared");
        assert_eq!(tags.storage_name(), "t");
        assert!(tags.store().allows(false));
        assert!(!tags.store().allows(true));
        assert!(d.field("missing").is_none());
    }

    #[test]
    fn test_duplicate_storage_name_rejected() {
        let err = user_builder()
            .field(FieldDescriptor::new("other").with_storage_name("name"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateStorageName { .. }));
    }

    #[test]
    fn test_storage_name_under_flattened_prefix_rejected() {
        let err = user_builder()
            .with_auto_hooks(true)
            .field(FieldDescriptor::new("previous").with_kind(FieldKind::Nested))
            .field(FieldDescriptor::new("previous_owner"))
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ShadowedStorageName { ref storage_name, ref prefix, .. }
                if storage_name == "previous_owner" && prefix == "previous"
        ));

        // a shared stem without the separator is fine
        user_builder()
            .with_auto_hooks(true)
            .field(FieldDescriptor::new("previous").with_kind(FieldKind::Nested))
            .field(FieldDescriptor::new("previousowner"))
            .build()
            .expect("valid");

        let err = user_builder()
            .with_auto_hooks(true)
            .field(FieldDescriptor::new("extra").with_kind(FieldKind::Expando))
            .field(FieldDescriptor::new("notes").with_storage_name("extra_notes"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ShadowedStorageName { .. }));
    }

    #[test]
    fn test_missing_key_field_rejected() {
        let err = TypeDescriptor::builder()
            .with_kind("U")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingKeyField { .. }));
    }

    #[test]
    fn test_empty_kind_rejected() {
        let err = TypeDescriptor::builder()
            .with_key_field("id")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidName { .. }));
    }

    #[test]
    fn test_non_plain_field_requires_auto_hooks() {
        let nested = FieldDescriptor::new("address").with_kind(FieldKind::Nested);
        let err = user_builder().field(nested.clone()).build().unwrap_err();
        assert!(matches!(err, ConfigError::AutoHooksRequired { .. }));

        let d = user_builder()
            .with_auto_hooks(true)
            .field(nested)
            .build()
            .expect("auto hooks enabled");
        assert_eq!(d.field("address").map(|f| f.kind()), Some(FieldKind::Nested));
    }

    #[test]
    fn test_embed_flattens_fields() {
        let audit = FieldSet::new()
            .field(FieldDescriptor::new("created_by"))
            .field(FieldDescriptor::new("updated_by"));
        let d = user_builder().embed(audit).build().expect("valid");
        assert_eq!(d.fields().len(), 4);
        assert!(d.field("created_by").is_some());
    }

    #[test]
    fn test_shaped_kind_key() {
        let d = user_builder().with_shape("dg").build().expect("valid");
        assert_eq!(d.kind_key(), "U:dg");
    }

    #[test]
    fn test_policy_conjunction() {
        let p = Policy::all([ValuePredicate::Always, ValuePredicate::NotEmpty]);
        assert!(p.allows(false));
        assert!(!p.allows(true));
        assert_eq!(Policy::all([]), Policy::default());
        assert!(!Policy::only(ValuePredicate::Never).allows(false));
        assert!(Policy::only(ValuePredicate::Empty).allows(true));
    }

    #[test]
    fn test_parent_requires_kind() {
        let err = user_builder()
            .with_parent(ParentSpec::new("account_id", ""))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidName { .. }));
    }
}
