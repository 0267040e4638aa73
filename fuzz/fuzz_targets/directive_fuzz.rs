//! Fuzz test for the struct and field directive parsers
//!
//! Any UTF-8 input must yield a builder or a ConfigError, never a panic.
//!
//! Run with: cargo +nightly fuzz run directive_fuzz -- -max_total_time=60

#![no_main]

use libfuzzer_sys::fuzz_target;
use tessera_core::{parse_duration, parse_field_directive, TypeDescriptorBuilder};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // First line is the struct directive, the rest are field directives
        let mut lines = input.lines();
        let struct_directive = lines.next().unwrap_or_default();
        let fields: Vec<(String, &str)> = lines
            .enumerate()
            .map(|(i, line)| (format!("f{}", i), line))
            .collect();
        let field_refs: Vec<(&str, &str)> =
            fields.iter().map(|(name, d)| (name.as_str(), *d)).collect();

        if let Ok(builder) = TypeDescriptorBuilder::from_directives(struct_directive, &field_refs) {
            if let Ok(descriptor) = builder.build() {
                assert!(!descriptor.kind().is_empty(), "Built descriptor must have a kind");
                assert!(!descriptor.key_field().is_empty(), "Built descriptor must have a key field");
            }
        }

        for (name, directive) in &field_refs {
            let _ = parse_field_directive(name, directive);
        }
        let _ = parse_duration(input);
    }
});
