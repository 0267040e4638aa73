//! Fuzz test for storage key decoding
//!
//! Run with: cargo +nightly fuzz run key_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_core::StorageKey;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(key) = StorageKey::decode(input) {
            // Decoded keys re-encode to something that decodes to the same key
            let encoded = key.encode();
            assert_eq!(StorageKey::decode(&encoded).ok(), Some(key));
        }
    }
});
