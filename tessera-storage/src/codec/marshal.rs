//! Pluggable byte codec for marshaled fields and shared-cache payloads.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tessera_core::{CodecError, CodecKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MarshalCodec {
    #[default]
    Cbor,
    Json,
}

impl From<CodecKind> for MarshalCodec {
    fn from(kind: CodecKind) -> Self {
        match kind {
            CodecKind::Cbor => MarshalCodec::Cbor,
            CodecKind::Json => MarshalCodec::Json,
        }
    }
}

impl MarshalCodec {
    /// `field` names the value in errors.
    pub fn encode<T: Serialize>(&self, field: &str, value: &T) -> Result<Vec<u8>, CodecError> {
        let encoded = match self {
            MarshalCodec::Cbor => serde_cbor::to_vec(value).map_err(|e| e.to_string()),
            MarshalCodec::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
        };
        encoded.map_err(|reason| CodecError::Encode {
            field: field.to_string(),
            reason,
        })
    }

    pub fn decode<T: DeserializeOwned>(&self, field: &str, bytes: &[u8]) -> Result<T, CodecError> {
        let decoded = match self {
            MarshalCodec::Cbor => serde_cbor::from_slice(bytes).map_err(|e| e.to_string()),
            MarshalCodec::Json => serde_json::from_slice(bytes).map_err(|e| e.to_string()),
        };
        decoded.map_err(|reason| CodecError::Decode {
            field: field.to_string(),
            reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_both_codecs_restore_values() {
        let mut value = BTreeMap::new();
        value.insert("a".to_string(), vec![1u32, 2, 3]);
        for codec in [MarshalCodec::Cbor, MarshalCodec::Json] {
            let bytes = codec.encode("prefs", &value).expect("encode");
            let back: BTreeMap<String, Vec<u32>> = codec.decode("prefs", &bytes).expect("decode");
            assert_eq!(back, value);
        }
    }

    #[test]
    fn test_decode_error_names_field() {
        let err = MarshalCodec::Json.decode::<u32>("prefs", b"not json").unwrap_err();
        assert!(matches!(err, CodecError::Decode { ref field, .. } if field == "prefs"));
    }

    #[test]
    fn test_from_codec_kind() {
        assert_eq!(MarshalCodec::from(CodecKind::Json), MarshalCodec::Json);
        assert_eq!(MarshalCodec::from(CodecKind::default()), MarshalCodec::Cbor);
    }
}
