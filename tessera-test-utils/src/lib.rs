//! Tessera Test Utilities
//!
//! Shared test infrastructure for the Tessera workspace:
//! - Fixture entity types covering every descriptor feature
//! - Proptest generators for those fixtures
//! - A recording cache tier wrapper
//! - Custom assertions for Tessera errors

pub use tessera_core::{
    BackendError, CacheError, DatastoreConfig, HookError, HookStage, KeyError, MultiError,
    Origin, StorageKey, TesseraError, TesseraResult, TypeError,
};
pub use tessera_storage::{
    CacheItem, CacheStats, CacheTier, CacheValue, Datastore, Entity, InMemorySharedCache,
    MemoryBackend, MemoryCache,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a `RUST_LOG`-driven subscriber that writes through the test
/// harness. Safe to call from every test.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// RECORDING CACHE TIER
// ============================================================================

/// Wraps a tier and counts the calls made through it.
#[derive(Debug)]
pub struct RecordingCache<C> {
    inner: C,
    gets: AtomicUsize,
    puts: AtomicUsize,
    deletes: AtomicUsize,
}

impl<C: CacheTier> RecordingCache<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn puts(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

impl<C: CacheTier> CacheTier for RecordingCache<C> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get_multi(&self, keys: &[String]) -> Result<Vec<Option<CacheValue>>, CacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get_multi(keys)
    }

    fn put_multi(&self, items: Vec<CacheItem>) -> Result<(), CacheError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put_multi(items)
    }

    fn delete_multi(&self, keys: &[String]) -> Result<(), CacheError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_multi(keys)
    }

    fn is_reachable(&self) -> bool {
        self.inner.is_reachable()
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}

/// A datastore over a fresh memory backend, with handles to both the backend
/// and a recording process tier.
pub fn memory_datastore() -> (Datastore, Arc<MemoryBackend>, Arc<RecordingCache<MemoryCache>>) {
    memory_datastore_with(DatastoreConfig::default())
}

pub fn memory_datastore_with(
    config: DatastoreConfig,
) -> (Datastore, Arc<MemoryBackend>, Arc<RecordingCache<MemoryCache>>) {
    let backend = Arc::new(MemoryBackend::new());
    let process = Arc::new(RecordingCache::new(MemoryCache::new()));
    let store = match Datastore::new(backend.clone(), config) {
        Ok(store) => store.with_process_cache(process.clone()),
        Err(e) => panic!("test datastore config rejected: {}", e),
    };
    (store, backend, process)
}

// ============================================================================
// FIXTURE ENTITIES
// ============================================================================

pub mod fixtures {
    //! Entity types exercising each descriptor feature.

    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use tessera_core::{
        CodecError, FieldDescriptor, FieldKind, HookError, Int64Node, ParentSpec, TesseraResult,
        TypeDescriptorBuilder, ValuePredicate,
    };
    use tessera_storage::{Embedded, Entity, NestedReader, NestedWriter, PropertyReader, PropertyWriter};

    /// Plain fields only, process cache on.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct User {
        pub id: i64,
        pub name: String,
        pub tags: Vec<String>,
        pub email: Option<String>,
        pub score: i64,
    }

    impl User {
        pub fn new(name: &str, tags: &[&str]) -> Self {
            Self {
                name: name.to_string(),
                tags: tags.iter().map(|t| t.to_string()).collect(),
                ..Default::default()
            }
        }
    }

    impl Entity for User {
        fn describe() -> TypeDescriptorBuilder {
            TypeDescriptorBuilder::default()
                .with_kind("U")
                .with_key_field("id")
                .with_process_cache(true)
                .field(FieldDescriptor::new("name").with_index(ValuePredicate::Always))
                .field(FieldDescriptor::new("tags"))
                .field(FieldDescriptor::new("email").with_index(ValuePredicate::Never))
                .field(FieldDescriptor::new("score").with_store(ValuePredicate::Always))
        }

        fn write_properties(&self, w: &mut PropertyWriter<'_>) -> TesseraResult<()> {
            w.plain("name", &self.name)?;
            w.plain("tags", &self.tags)?;
            w.plain("email", &self.email)?;
            w.plain("score", &self.score)
        }

        fn read_properties(&mut self, r: &PropertyReader<'_>) -> TesseraResult<()> {
            r.plain("name", &mut self.name)?;
            r.plain("tags", &mut self.tags)?;
            r.plain("email", &mut self.email)?;
            r.plain("score", &mut self.score)
        }

        fn key_id(&self) -> i64 {
            self.id
        }

        fn set_key_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    /// Parent of [`Session`].
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Account {
        pub id: i64,
        pub owner: String,
    }

    impl Entity for Account {
        fn describe() -> TypeDescriptorBuilder {
            TypeDescriptorBuilder::default()
                .with_kind("Account")
                .with_key_field("id")
                .field(FieldDescriptor::new("owner"))
        }

        fn write_properties(&self, w: &mut PropertyWriter<'_>) -> TesseraResult<()> {
            w.plain("owner", &self.owner)
        }

        fn read_properties(&mut self, r: &PropertyReader<'_>) -> TesseraResult<()> {
            r.plain("owner", &mut self.owner)
        }

        fn key_id(&self) -> i64 {
            self.id
        }

        fn set_key_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    /// Keyed under an [`Account`].
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Session {
        pub id: i64,
        pub account_id: i64,
        pub token: String,
    }

    impl Entity for Session {
        fn describe() -> TypeDescriptorBuilder {
            TypeDescriptorBuilder::default()
                .with_kind("Session")
                .with_key_field("id")
                .with_parent(ParentSpec::new("account_id", "Account"))
                .field(FieldDescriptor::new("token"))
        }

        fn write_properties(&self, w: &mut PropertyWriter<'_>) -> TesseraResult<()> {
            w.plain("token", &self.token)
        }

        fn read_properties(&mut self, r: &PropertyReader<'_>) -> TesseraResult<()> {
            r.plain("token", &mut self.token)
        }

        fn key_id(&self) -> i64 {
            self.id
        }

        fn set_key_id(&mut self, id: i64) {
            self.id = id;
        }

        fn parent_key_id(&self) -> i64 {
            self.account_id
        }

        fn set_parent_key_id(&mut self, id: i64) {
            self.account_id = id;
        }
    }

    macro_rules! animal {
        ($name:ident, $shape:literal) => {
            /// An `Animal` of one shape; the shape is filled in on key resolution.
            #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
            pub struct $name {
                pub id: i64,
                pub shape: String,
                pub name: String,
                pub age: i64,
            }

            impl Entity for $name {
                fn describe() -> TypeDescriptorBuilder {
                    TypeDescriptorBuilder::default()
                        .with_kind("Animal")
                        .with_shape($shape)
                        .with_key_field("id")
                        .with_shape_field("shape")
                        .with_process_cache(true)
                        .field(FieldDescriptor::new("name"))
                        .field(FieldDescriptor::new("age").with_index(ValuePredicate::Always))
                }

                fn write_properties(&self, w: &mut PropertyWriter<'_>) -> TesseraResult<()> {
                    w.plain("name", &self.name)?;
                    w.plain("age", &self.age)
                }

                fn read_properties(&mut self, r: &PropertyReader<'_>) -> TesseraResult<()> {
                    r.plain("name", &mut self.name)?;
                    r.plain("age", &mut self.age)
                }

                fn key_id(&self) -> i64 {
                    self.id
                }

                fn set_key_id(&mut self, id: i64) {
                    self.id = id;
                }

                fn shape_field_mut(&mut self) -> Option<&mut String> {
                    Some(&mut self.shape)
                }
            }
        };
    }

    animal!(Dog, "dg");
    animal!(Cat, "ct");

    /// Sub-structure of [`Profile`].
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Address {
        pub city: String,
        pub zip: Option<u32>,
    }

    impl Embedded for Address {
        fn write_fields(&self, writer: &mut NestedWriter) {
            writer.field("city", &self.city);
            writer.field("zip", &self.zip);
        }

        fn read_fields(&mut self, reader: &NestedReader<'_>) -> Result<(), CodecError> {
            reader.field("city", &mut self.city)?;
            reader.field("zip", &mut self.zip)
        }
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Theme {
        pub palette: String,
        pub contrast: u8,
    }

    /// One field of every non-plain kind.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Profile {
        pub id: i64,
        pub handle: String,
        pub home: Address,
        pub previous: Vec<Address>,
        pub attrs: HashMap<String, String>,
        pub theme: Theme,
        pub outline: Int64Node,
    }

    impl Entity for Profile {
        fn describe() -> TypeDescriptorBuilder {
            TypeDescriptorBuilder::default()
                .with_kind("Profile")
                .with_key_field("id")
                .with_auto_hooks(true)
                .field(FieldDescriptor::new("handle"))
                .field(FieldDescriptor::new("home").with_kind(FieldKind::Nested))
                .field(
                    FieldDescriptor::new("previous")
                        .with_storage_name("prev")
                        .with_kind(FieldKind::Nested),
                )
                .field(FieldDescriptor::new("attrs").with_kind(FieldKind::Expando))
                .field(FieldDescriptor::new("theme").with_kind(FieldKind::Marshal))
                .field(FieldDescriptor::new("outline").with_kind(FieldKind::Tree))
        }

        fn write_properties(&self, w: &mut PropertyWriter<'_>) -> TesseraResult<()> {
            w.plain("handle", &self.handle)?;
            w.nested("home", &self.home)?;
            w.nested_list("previous", &self.previous)?;
            w.expando("attrs", &self.attrs)?;
            w.marshal("theme", &self.theme)?;
            w.tree("outline", &self.outline)
        }

        fn read_properties(&mut self, r: &PropertyReader<'_>) -> TesseraResult<()> {
            r.plain("handle", &mut self.handle)?;
            r.nested("home", &mut self.home)?;
            r.nested_list("previous", &mut self.previous)?;
            r.expando("attrs", &mut self.attrs)?;
            r.marshal("theme", &mut self.theme)?;
            r.tree("outline", &mut self.outline)
        }

        fn key_id(&self) -> i64 {
            self.id
        }

        fn set_key_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    /// Lives in the cache tiers only.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Setting {
        pub id: i64,
        pub value: String,
    }

    impl Entity for Setting {
        fn describe() -> TypeDescriptorBuilder {
            TypeDescriptorBuilder::default()
                .with_kind("Setting")
                .with_key_field("id")
                .with_datastore(false)
                .with_process_cache(true)
                .field(FieldDescriptor::new("value"))
        }

        fn write_properties(&self, w: &mut PropertyWriter<'_>) -> TesseraResult<()> {
            w.plain("value", &self.value)
        }

        fn read_properties(&mut self, r: &PropertyReader<'_>) -> TesseraResult<()> {
            r.plain("value", &mut self.value)
        }

        fn key_id(&self) -> i64 {
            self.id
        }

        fn set_key_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    /// Counts hook calls and fails them on request.
    ///
    /// `fail_load` is stored, so a loaded copy fails its post-load hook too.
    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    pub struct Hooked {
        pub id: i64,
        pub label: String,
        pub fail_load: bool,
        pub fail_pre_save: bool,
        pub fail_post_save: bool,
        pub loads: u32,
        pub pre_saves: u32,
        pub post_saves: u32,
    }

    impl Entity for Hooked {
        fn describe() -> TypeDescriptorBuilder {
            TypeDescriptorBuilder::default()
                .with_kind("Hooked")
                .with_key_field("id")
                .field(FieldDescriptor::new("label"))
                .field(FieldDescriptor::new("fail_load"))
        }

        fn write_properties(&self, w: &mut PropertyWriter<'_>) -> TesseraResult<()> {
            w.plain("label", &self.label)?;
            w.plain("fail_load", &self.fail_load)
        }

        fn read_properties(&mut self, r: &PropertyReader<'_>) -> TesseraResult<()> {
            r.plain("label", &mut self.label)?;
            r.plain("fail_load", &mut self.fail_load)
        }

        fn key_id(&self) -> i64 {
            self.id
        }

        fn set_key_id(&mut self, id: i64) {
            self.id = id;
        }

        fn post_load_hook(&mut self) -> Result<(), HookError> {
            self.loads += 1;
            if self.fail_load {
                return Err(HookError::new("refusing to load"));
            }
            Ok(())
        }

        fn pre_save_hook(&mut self) -> Result<(), HookError> {
            self.pre_saves += 1;
            if self.fail_pre_save {
                return Err(HookError::new("refusing to save"));
            }
            Ok(())
        }

        fn post_save_hook(&mut self) -> Result<(), HookError> {
            self.post_saves += 1;
            if self.fail_post_save {
                return Err(HookError::new("saved but unhappy"));
            }
            Ok(())
        }
    }

    pub fn sample_profile() -> Profile {
        Profile {
            handle: "ada".to_string(),
            home: Address {
                city: "London".to_string(),
                zip: Some(1815),
            },
            previous: vec![
                Address {
                    city: "Marylebone".to_string(),
                    zip: None,
                },
                Address {
                    city: "Ockham".to_string(),
                    zip: Some(7),
                },
            ],
            attrs: HashMap::from([("lang".to_string(), "en".to_string())]),
            theme: Theme {
                palette: "dark".to_string(),
                contrast: 3,
            },
            outline: Int64Node::default()
                .with_child(Int64Node::new(1).with_child(Int64Node::new(2)))
                .with_child(Int64Node::new(3)),
            ..Default::default()
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for the fixture entities.

    use super::fixtures::{Address, Dog, Profile, Theme, User};
    use proptest::prelude::*;
    use std::collections::HashMap;
    use tessera_core::Int64Node;

    /// Users without an id, ready to be put.
    pub fn arb_user() -> impl Strategy<Value = User> {
        (
            "[a-z]{0,12}",
            prop::collection::vec("[a-z]{1,8}", 0..4),
            prop::option::of("[a-z]{1,8}@[a-z]{1,8}\\.org"),
            any::<i64>(),
        )
            .prop_map(|(name, tags, email, score)| User {
                id: 0,
                name,
                tags,
                email,
                score,
            })
    }

    pub fn arb_dog() -> impl Strategy<Value = Dog> {
        ("[A-Z][a-z]{0,8}", 0i64..30).prop_map(|(name, age)| Dog {
            name,
            age,
            ..Default::default()
        })
    }

    pub fn arb_address() -> impl Strategy<Value = Address> {
        ("[A-Za-z ]{0,16}", prop::option::of(any::<u32>()))
            .prop_map(|(city, zip)| Address { city, zip })
    }

    /// Trees two levels deep whose values stay clear of the codec markers.
    pub fn arb_outline() -> impl Strategy<Value = Int64Node> {
        prop::collection::vec((0i64..1000, prop::collection::vec(0i64..1000, 0..3)), 0..4)
            .prop_map(|branches| {
                branches
                    .into_iter()
                    .fold(Int64Node::default(), |root, (value, leaves)| {
                        let branch = leaves
                            .into_iter()
                            .fold(Int64Node::new(value), |node, leaf| {
                                node.with_child(Int64Node::new(leaf))
                            });
                        root.with_child(branch)
                    })
            })
    }

    pub fn arb_profile() -> impl Strategy<Value = Profile> {
        (
            "[a-z]{1,10}",
            arb_address(),
            prop::collection::vec(arb_address(), 0..4),
            prop::collection::hash_map("[a-z]{1,6}", "[a-z]{1,6}", 0..4),
            ("[a-z]{0,6}", any::<u8>()),
            arb_outline(),
        )
            .prop_map(|(handle, home, previous, attrs, (palette, contrast), outline)| Profile {
                id: 0,
                handle,
                home,
                previous,
                attrs: attrs.into_iter().collect::<HashMap<_, _>>(),
                theme: Theme { palette, contrast },
                outline,
            })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over Tessera results.

    use super::*;

    /// Assert that a result is a confirmed absence settled at `origin`.
    #[track_caller]
    pub fn assert_not_found_in<T: std::fmt::Debug>(result: &TesseraResult<T>, origin: Origin) {
        match result {
            Err(TesseraError::NotFound { origin: o, .. }) => {
                assert_eq!(*o, origin, "Absence settled at the wrong tier");
            }
            other => panic!("Expected NotFound from {}, got: {:?}", origin, other),
        }
    }

    /// Assert that a result is a hook failure at `stage`.
    #[track_caller]
    pub fn assert_hook_failed<T: std::fmt::Debug>(result: &TesseraResult<T>, stage: HookStage) {
        match result {
            Err(TesseraError::Hook { stage: s, .. }) => {
                assert_eq!(*s, stage, "Wrong hook stage");
            }
            other => panic!("Expected {} hook failure, got: {:?}", stage, other),
        }
    }

    /// Unwrap a batch error, panicking on anything else.
    #[track_caller]
    pub fn expect_multi<T: std::fmt::Debug>(result: TesseraResult<T>) -> MultiError {
        match result {
            Err(TesseraError::Multi(multi)) => multi,
            other => panic!("Expected a batch error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
