//! Property tests: entities survive a trip through the datastore.

use proptest::prelude::*;
use tessera_core::DatastoreConfig;
use tessera_storage::{from_properties, to_properties, CodecOptions, Entity};
use tessera_test_utils::fixtures::{Profile, User};
use tessera_test_utils::generators::{arb_profile, arb_user};
use tessera_test_utils::memory_datastore_with;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: FromProperties(ToProperties(e)) reproduces e
    #[test]
    fn prop_profile_codec_round_trip(profile in arb_profile()) {
        let d = Profile::describe().build().expect("descriptor");
        let options = CodecOptions::default();
        let props = to_properties(&profile, &d, &options).expect("encode");
        let mut back = Profile::default();
        from_properties(&props, &mut back, &d, &options).expect("decode");
        prop_assert_eq!(back, profile);
    }

    /// Property: put then get, bypassing every cache, returns the same user
    #[test]
    fn prop_user_backend_round_trip(user in arb_user()) {
        let (store, _, _) = memory_datastore_with(DatastoreConfig {
            cache_enabled: false,
            ..Default::default()
        });
        let mut stored = user.clone();
        let key = store.request().put(&mut stored).expect("put");
        let mut loaded = User::default();
        store.request().get(&key, &mut loaded).expect("get");
        prop_assert_eq!(loaded, User { id: key.id(), ..user });
    }

    /// Property: the JSON marshal codec round-trips as well as CBOR
    #[test]
    fn prop_profile_through_json_codec(profile in arb_profile()) {
        let (store, _, _) = memory_datastore_with(DatastoreConfig {
            codec: tessera_core::CodecKind::Json,
            ..Default::default()
        });
        let mut stored = profile.clone();
        let key = store.request().put(&mut stored).expect("put");
        let mut loaded = Profile::default();
        store.request().get(&key, &mut loaded).expect("get");
        prop_assert_eq!(loaded, Profile { id: key.id(), ..profile });
    }
}
