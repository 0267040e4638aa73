//! Process-level datastore configuration.

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Byte codec used for marshaled fields and shared-cache payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Cbor,
    Json,
}

impl FromStr for CodecKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cbor" => Ok(CodecKind::Cbor),
            "json" => Ok(CodecKind::Json),
            _ => Err(ConfigError::InvalidValue {
                field: "codec".to_string(),
                value: s.to_string(),
                reason: "codec must be cbor or json".to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatastoreConfig {
    /// Master switch; when false every request bypasses all cache tiers.
    pub cache_enabled: bool,
    /// Register types on first use instead of requiring explicit registration.
    pub lazy_registration: bool,
    pub codec: CodecKind,
    /// Text values longer than this are stored but never indexed.
    pub index_string_limit: usize,
    /// Maximum entries in one request cache. 0 means unbounded.
    pub request_cache_capacity: usize,
}

impl Default for DatastoreConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            lazy_registration: true,
            codec: CodecKind::Cbor,
            index_string_limit: 500,
            request_cache_capacity: 0,
        }
    }
}

impl DatastoreConfig {
    /// Read `TESSERA_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            cache_enabled: std::env::var("TESSERA_CACHE_ENABLED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.cache_enabled),
            lazy_registration: std::env::var("TESSERA_LAZY_REGISTRATION")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.lazy_registration),
            codec: std::env::var("TESSERA_CODEC")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.codec),
            index_string_limit: std::env::var("TESSERA_INDEX_STRING_LIMIT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.index_string_limit),
            request_cache_capacity: std::env::var("TESSERA_REQUEST_CACHE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.request_cache_capacity),
        }
    }

    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input).map_err(|e| ConfigError::InvalidValue {
            field: "toml".to_string(),
            value: String::new(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.index_string_limit == 0 {
            return Err(ConfigError::InvalidValue {
                field: "index_string_limit".to_string(),
                value: self.index_string_limit.to_string(),
                reason: "index_string_limit must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
