//! Directive mini-language.
//!
//! A compact string form of type configuration, parsed into the same
//! [`TypeDescriptorBuilder`] the typed API produces. Parsing happens once per
//! type at registration and never on the read or write path.
//!
//! Struct directives are comma-separated:
//!
//! ```text
//! keyf=id,kind=U,shape=dg,shapef=shape,pkeyf=account_id,pkind=A,
//! auto,rc,pc=true,mc=false,ds,pinned,pcto=5m,mcto=1h30m
//! ```
//!
//! Field directives use `dbname=`, `ftype=struc|marshal|expando|tree` and
//! `store=`/`index=` with `|`-separated predicates `y`, `!y`, `z`, `!z`.

use crate::descriptor::{FieldDescriptor, FieldKind, Policy, TypeDescriptorBuilder, ValuePredicate};
use crate::ConfigError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

static DURATION_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:\d+(?:ms|s|m|h|d))+$").expect("Invalid duration regex"));
static DURATION_GROUP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)(ms|s|m|h|d)").expect("Invalid duration group regex"));

/// Field name used in errors raised by the struct-level directive.
const TYPE_SCOPE: &str = "type";

fn malformed(field: &str, token: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::MalformedDirective {
        field: field.to_string(),
        token: token.to_string(),
        reason: reason.into(),
    }
}

/// Parse a boolean the way configuration tags traditionally spell them.
pub fn parse_bool(input: &str) -> Option<bool> {
    match input {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Parse a TTL such as `90s`, `10m` or `1h30m`. `0` means no expiry.
pub fn parse_duration(input: &str) -> Option<Duration> {
    if input == "0" {
        return Some(Duration::ZERO);
    }
    if !DURATION_FORMAT.is_match(input) {
        return None;
    }
    let mut total = Duration::ZERO;
    for group in DURATION_GROUP.captures_iter(input) {
        let amount: u64 = group[1].parse().ok()?;
        let unit = match &group[2] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.checked_mul(60)?),
            "h" => Duration::from_secs(amount.checked_mul(3_600)?),
            "d" => Duration::from_secs(amount.checked_mul(86_400)?),
            _ => return None,
        };
        total = total.checked_add(unit)?;
    }
    Some(total)
}

fn tokens(directive: &str) -> impl Iterator<Item = &str> {
    directive.split(',').map(str::trim).filter(|t| !t.is_empty())
}

fn flag(field: &str, token: &str, value: Option<&str>) -> Result<bool, ConfigError> {
    match value {
        None => Ok(true),
        Some(v) => parse_bool(v).ok_or_else(|| malformed(field, token, "expected a boolean")),
    }
}

fn required<'a>(field: &str, token: &str, value: Option<&'a str>) -> Result<&'a str, ConfigError> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(malformed(field, token, "expected a value")),
    }
}

fn ttl(field: &str, token: &str, value: Option<&str>) -> Result<Duration, ConfigError> {
    let raw = required(field, token, value)?;
    parse_duration(raw).ok_or_else(|| malformed(field, token, "expected a duration like 10m"))
}

impl TypeDescriptorBuilder {
    /// Build from a struct directive and one directive per stored field.
    ///
    /// Fields are declared in the order given. A field with an empty
    /// directive is a plain field stored under its own name.
    pub fn from_directives(
        struct_directive: &str,
        field_directives: &[(&str, &str)],
    ) -> Result<Self, ConfigError> {
        let mut builder = TypeDescriptorBuilder::default().apply_struct_directive(struct_directive)?;
        for (field_name, directive) in field_directives {
            builder = builder.field(parse_field_directive(field_name, directive)?);
        }
        Ok(builder)
    }

    /// Apply every token of a struct directive on top of the current settings.
    pub fn apply_struct_directive(mut self, directive: &str) -> Result<Self, ConfigError> {
        for token in tokens(directive) {
            let (name, value) = match token.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim())),
                None => (token, None),
            };
            self = match name {
                "keyf" => self.with_key_field(required(TYPE_SCOPE, token, value)?),
                "kind" => self.with_kind(required(TYPE_SCOPE, token, value)?),
                "shape" => self.with_shape(value.unwrap_or_default()),
                "shapef" => self.with_shape_field(required(TYPE_SCOPE, token, value)?),
                "pkeyf" => {
                    self.parent_mut().key_field = required(TYPE_SCOPE, token, value)?.to_string();
                    self
                }
                "pkind" => {
                    self.parent_mut().kind = required(TYPE_SCOPE, token, value)?.to_string();
                    self
                }
                "pshape" => {
                    self.parent_mut().shape = value.unwrap_or_default().to_string();
                    self
                }
                "pshapef" => {
                    self.parent_mut().shape_field =
                        Some(required(TYPE_SCOPE, token, value)?.to_string());
                    self
                }
                "auto" => self.with_auto_hooks(flag(TYPE_SCOPE, token, value)?),
                "rc" => self.with_request_cache(flag(TYPE_SCOPE, token, value)?),
                "pc" => self.with_process_cache(flag(TYPE_SCOPE, token, value)?),
                "mc" => self.with_shared_cache(flag(TYPE_SCOPE, token, value)?),
                "ds" => self.with_datastore(flag(TYPE_SCOPE, token, value)?),
                "pinned" => self.with_pinned(flag(TYPE_SCOPE, token, value)?),
                "pcto" => self.with_process_ttl(ttl(TYPE_SCOPE, token, value)?),
                "mcto" => self.with_shared_ttl(ttl(TYPE_SCOPE, token, value)?),
                _ => return Err(malformed(TYPE_SCOPE, token, "unknown directive")),
            };
        }
        Ok(self)
    }
}

fn parse_policy(field: &str, token: &str, value: Option<&str>) -> Result<Policy, ConfigError> {
    let raw = required(field, token, value)?;
    let predicates = raw
        .split('|')
        .map(|p| {
            ValuePredicate::from_token(p.trim())
                .ok_or_else(|| malformed(field, token, format!("unknown predicate {:?}", p)))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Policy::all(predicates))
}

/// Parse the directive of one stored field.
pub fn parse_field_directive(field_name: &str, directive: &str) -> Result<FieldDescriptor, ConfigError> {
    let mut field = FieldDescriptor::new(field_name);
    for token in tokens(directive) {
        let (name, value) = match token.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (token, None),
        };
        field = match name {
            "dbname" => field.with_storage_name(required(field_name, token, value)?),
            "ftype" => {
                let kind = match required(field_name, token, value)? {
                    "struc" => FieldKind::Nested,
                    "marshal" => FieldKind::Marshal,
                    "expando" => FieldKind::Expando,
                    "tree" => FieldKind::Tree,
                    _ => return Err(malformed(field_name, token, "unknown field type")),
                };
                field.with_kind(kind)
            }
            "store" => field.with_store_policy(parse_policy(field_name, token, value)?),
            "index" => field.with_index_policy(parse_policy(field_name, token, value)?),
            _ => return Err(malformed(field_name, token, "unknown directive")),
        };
    }
    Ok(field)
}

// =============================================================================
// TESTS
// =============================================================================


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_minutes_parse_exactly(m in 1u64..10_000) {
            prop_assert_eq!(parse_duration(&format!("{}m", m)), Some(Duration::from_secs(m * 60)));
        }

        #[test]
        fn prop_directive_parser_never_panics(input in ".{0,80}") {
            let _ = TypeDescriptorBuilder::from_directives(&input, &[("f", input.as_str())]);
        }
    }
}
