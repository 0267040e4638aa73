//! Process-wide type registry.
//!
//! Each entity type is described exactly once. The first registration of a
//! kind wins; a second type claiming the same kind and shape is rejected and
//! leaves the first binding intact.

use crate::entity::Entity;
use dashmap::DashMap;
use std::any::{type_name, TypeId};
use std::sync::{Arc, Mutex};
use tessera_core::{kind_key, ConfigError, TesseraResult, TypeDescriptor, TypeError};
use tracing::debug;

#[derive(Debug)]
pub struct TypeRegistry {
    by_type: DashMap<TypeId, Arc<TypeDescriptor>>,
    by_kind: DashMap<String, (TypeId, Arc<TypeDescriptor>)>,
    /// Serializes populating registrations; lookups never take it.
    populate: Mutex<()>,
    lazy: bool,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new(true)
    }
}

impl TypeRegistry {
    /// With `lazy` set, [`describe`](Self::describe) registers unknown types
    /// on first use.
    pub fn new(lazy: bool) -> Self {
        Self {
            by_type: DashMap::new(),
            by_kind: DashMap::new(),
            populate: Mutex::new(()),
            lazy,
        }
    }

    pub fn register<T: Entity>(&self) -> TesseraResult<Arc<TypeDescriptor>> {
        let id = TypeId::of::<T>();
        if let Some(found) = self.by_type.get(&id) {
            return Ok(Arc::clone(found.value()));
        }

        let _guard = self
            .populate
            .lock()
            .map_err(|_| TypeError::RegistryPoisoned)?;
        // another caller may have finished while we waited
        if let Some(found) = self.by_type.get(&id) {
            return Ok(Arc::clone(found.value()));
        }

        let descriptor = Arc::new(T::describe().with_type_name(type_name::<T>()).build()?);
        let key = descriptor.kind_key();
        if let Some(existing) = self.by_kind.get(&key) {
            return Err(ConfigError::DuplicateKind {
                kind_key: key,
                existing: existing.value().1.type_name().to_string(),
            }
            .into());
        }

        self.by_kind.insert(key.clone(), (id, Arc::clone(&descriptor)));
        self.by_type.insert(id, Arc::clone(&descriptor));
        debug!(type_name = descriptor.type_name(), kind = %key, "Registered entity type");
        Ok(descriptor)
    }

    /// The descriptor of `T`, registering it first when the registry is lazy.
    pub fn describe<T: Entity>(&self) -> TesseraResult<Arc<TypeDescriptor>> {
        if let Some(found) = self.by_type.get(&TypeId::of::<T>()) {
            return Ok(Arc::clone(found.value()));
        }
        if self.lazy {
            return self.register::<T>();
        }
        Err(TypeError::Unregistered {
            type_name: type_name::<T>().to_string(),
        }
        .into())
    }

    /// The descriptor bound to a kind and shape.
    pub fn lookup(&self, kind: &str, shape: &str) -> TesseraResult<Arc<TypeDescriptor>> {
        self.by_kind
            .get(&kind_key(kind, shape))
            .map(|entry| Arc::clone(&entry.value().1))
            .ok_or_else(|| {
                TypeError::UnknownKind {
                    kind: kind.to_string(),
                    shape: shape.to_string(),
                }
                .into()
            })
    }

    pub fn is_registered<T: Entity>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PropertyReader, PropertyWriter};
    use serde::{Deserialize, Serialize};
    use std::thread;
    use tessera_core::{FieldDescriptor, TesseraError, TypeDescriptorBuilder};

    macro_rules! bare_entity {
        ($name:ident, $kind:expr, $shape:expr) => {
            #[derive(Debug, Clone, Default, Serialize, Deserialize)]
            struct $name {
                id: i64,
            }

            impl Entity for $name {
                fn describe() -> TypeDescriptorBuilder {
                    TypeDescriptorBuilder::default()
                        .with_kind($kind)
                        .with_shape($shape)
                        .with_key_field("id")
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
        };
    }

    bare_entity!(Cat, "Animal", "ct");
    bare_entity!(Dog, "Animal", "dg");
    bare_entity!(Impostor, "Animal", "dg");

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Broken {
        id: i64,
    }

    impl Entity for Broken {
        fn describe() -> TypeDescriptorBuilder {
            TypeDescriptorBuilder::default()
                .with_kind("Broken")
                .field(FieldDescriptor::new("x"))
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

    #[test]
    fn test_register_is_idempotent() {
        let registry = TypeRegistry::default();
        let first = registry.register::<Cat>().expect("register");
        let second = registry.register::<Cat>().expect("register again");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert!(first.type_name().ends_with("Cat"));
    }

    #[test]
    fn test_shapes_share_a_kind() {
        let registry = TypeRegistry::default();
        registry.register::<Cat>().expect("cat");
        registry.register::<Dog>().expect("dog");
        assert!(registry.lookup("Animal", "dg").expect("dog").type_name().ends_with("Dog"));
        assert!(registry.lookup("Animal", "ct").expect("cat").type_name().ends_with("Cat"));
    }

    #[test]
    fn test_duplicate_kind_rejected_first_binding_kept() {
        let registry = TypeRegistry::default();
        registry.register::<Dog>().expect("dog");
        let err = registry.register::<Impostor>().unwrap_err();
        assert!(matches!(err, TesseraError::Config(ConfigError::DuplicateKind { .. })));
        assert!(err.is_fatal_config());
        assert!(!registry.is_registered::<Impostor>());
        assert!(registry.lookup("Animal", "dg").expect("dog").type_name().ends_with("Dog"));
    }

    #[test]
    fn test_invalid_descriptor_not_registered() {
        let registry = TypeRegistry::default();
        let err = registry.register::<Broken>().unwrap_err();
        assert!(matches!(err, TesseraError::Config(ConfigError::MissingKeyField { .. })));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_strict_registry_requires_registration() {
        let registry = TypeRegistry::new(false);
        let err = registry.describe::<Cat>().unwrap_err();
        assert!(matches!(err, TesseraError::Type(TypeError::Unregistered { .. })));
        registry.register::<Cat>().expect("register");
        assert!(registry.describe::<Cat>().is_ok());
    }

    #[test]
    fn test_lookup_unknown_kind() {
        let registry = TypeRegistry::default();
        let err = registry.lookup("Nope", "").unwrap_err();
        assert!(matches!(err, TesseraError::Type(TypeError::UnknownKind { .. })));
    }

    #[test]
    fn test_concurrent_registration_yields_one_descriptor() {
        let registry = Arc::new(TypeRegistry::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || registry.describe::<Dog>().expect("describe"))
            })
            .collect();
        let descriptors: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .collect();
        assert!(descriptors.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
        assert_eq!(registry.len(), 1);
    }
}
