//! Fuzz test for the ordered-tree codec
//!
//! Decoding arbitrary integer runs must not panic, and anything that decodes
//! must encode back to a run that decodes to the same tree.
//!
//! Run with: cargo +nightly fuzz run tree_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_core::TreeCodec;

fuzz_target!(|data: &[u8]| {
    // Small values so the markers (-1, -2) come up often
    let values: Vec<i64> = data.iter().map(|b| i64::from(*b as i8) % 8).collect();
    let codec = TreeCodec::default();

    if let Ok(tree) = codec.decode_children(&values) {
        let encoded = codec
            .encode_children(&tree)
            .expect("decoded trees hold no marker values");
        let again = codec
            .decode_children(&encoded)
            .expect("encoded trees decode");
        assert_eq!(tree, again, "Tree changed across a round trip");
    }
});
