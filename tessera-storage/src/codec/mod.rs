//! Entity codec.
//!
//! Converts between an [`Entity`] and its flattened [`PropertyList`]:
//!
//! - plain fields are copied as one value or one repeated run
//! - marshaled fields become one opaque byte property
//! - nested sub-structures become `parent_child` properties; a list of them
//!   becomes one run per element, zipped back by position on read
//! - maps become paired `name_k` / `name_v` runs
//! - expando maps become one `name_key` property per entry
//! - trees are linearized into a run of integers
//!
//! Byte values are never indexed, and neither is text longer than the
//! configured limit.

mod marshal;
mod reader;
mod writer;

pub use marshal::MarshalCodec;
pub use reader::PropertyReader;
pub use writer::PropertyWriter;

use crate::entity::Entity;
use tessera_core::{DatastoreConfig, PropertyList, TesseraResult, TypeDescriptor};

/// Settings shared by every codec call of one datastore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecOptions {
    pub marshal: MarshalCodec,
    pub index_string_limit: usize,
    /// Drop unindexed properties before they reach the backend.
    pub indexes_only: bool,
}

impl Default for CodecOptions {
    fn default() -> Self {
        Self::from_config(&DatastoreConfig::default(), false)
    }
}

impl CodecOptions {
    pub fn from_config(config: &DatastoreConfig, indexes_only: bool) -> Self {
        Self {
            marshal: config.codec.into(),
            index_string_limit: config.index_string_limit,
            indexes_only,
        }
    }
}

pub fn to_properties<T: Entity>(
    entity: &T,
    descriptor: &TypeDescriptor,
    options: &CodecOptions,
) -> TesseraResult<PropertyList> {
    let mut writer = PropertyWriter::new(descriptor, options);
    entity.write_properties(&mut writer)?;
    Ok(writer.finish())
}

pub fn from_properties<T: Entity>(
    properties: &PropertyList,
    entity: &mut T,
    descriptor: &TypeDescriptor,
    options: &CodecOptions,
) -> TesseraResult<()> {
    let reader = PropertyReader::new(descriptor, options, properties);
    entity.read_properties(&reader)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Embedded, NestedReader, NestedWriter};
    use serde::{Deserialize, Serialize};
    use std::collections::{BTreeMap, HashMap};
    use tessera_core::{
        Blob, CodecError, FieldDescriptor, FieldKind, Int64Node, Property, TesseraError,
        TypeDescriptorBuilder, TypeError, Value, ValuePredicate,
    };

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Address {
        city: String,
        zip: Option<u32>,
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
    struct Prefs {
        theme: String,
        volume: u8,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: i64,
        name: String,
        tags: Vec<String>,
        score: i32,
        avatar: Blob,
        home: Address,
        previous: Vec<Address>,
        counts: BTreeMap<String, i64>,
        attrs: HashMap<String, String>,
        prefs: Prefs,
        outline: Int64Node,
    }

    impl Entity for Record {
        fn describe() -> TypeDescriptorBuilder {
            TypeDescriptorBuilder::default()
                .with_kind("R")
                .with_key_field("id")
                .with_auto_hooks(true)
                .field(FieldDescriptor::new("name").with_index(ValuePredicate::Always))
                .field(FieldDescriptor::new("tags").with_storage_name("t"))
                .field(FieldDescriptor::new("score").with_store(ValuePredicate::Always))
                .field(FieldDescriptor::new("avatar").with_index(ValuePredicate::Always))
                .field(FieldDescriptor::new("home").with_kind(FieldKind::Nested))
                .field(FieldDescriptor::new("previous").with_kind(FieldKind::Nested))
                .field(FieldDescriptor::new("counts").with_kind(FieldKind::Nested))
                .field(FieldDescriptor::new("attrs").with_kind(FieldKind::Expando))
                .field(FieldDescriptor::new("prefs").with_kind(FieldKind::Marshal))
                .field(FieldDescriptor::new("outline").with_kind(FieldKind::Tree))
        }

        fn write_properties(&self, w: &mut PropertyWriter<'_>) -> TesseraResult<()> {
            w.plain("name", &self.name)?;
            w.plain("tags", &self.tags)?;
            w.plain("score", &self.score)?;
            w.plain("avatar", &self.avatar)?;
            w.nested("home", &self.home)?;
            w.nested_list("previous", &self.previous)?;
            w.nested_map("counts", &self.counts)?;
            w.expando("attrs", &self.attrs)?;
            w.marshal("prefs", &self.prefs)?;
            w.tree("outline", &self.outline)
        }

        fn read_properties(&mut self, r: &PropertyReader<'_>) -> TesseraResult<()> {
            r.plain("name", &mut self.name)?;
            r.plain("tags", &mut self.tags)?;
            r.plain("score", &mut self.score)?;
            r.plain("avatar", &mut self.avatar)?;
            r.nested("home", &mut self.home)?;
            r.nested_list("previous", &mut self.previous)?;
            r.nested_map("counts", &mut self.counts)?;
            r.expando("attrs", &mut self.attrs)?;
            r.marshal("prefs", &mut self.prefs)?;
            r.tree("outline", &mut self.outline)
        }

        fn key_id(&self) -> i64 {
            self.id
        }

        fn set_key_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    fn descriptor() -> TypeDescriptor {
        Record::describe().build().expect("valid descriptor")
    }

    fn full_record() -> Record {
        Record {
            id: 9,
            name: "n".to_string(),
            tags: vec!["a".to_string(), "b".to_string()],
            score: 0,
            avatar: Blob(vec![1, 2, 3]),
            home: Address {
                city: "Lagos".to_string(),
                zip: Some(100_001),
            },
            previous: vec![
                Address {
                    city: "Accra".to_string(),
                    zip: None,
                },
                Address {
                    city: "Lome".to_string(),
                    zip: Some(7),
                },
            ],
            counts: BTreeMap::from([("x".to_string(), 1), ("y".to_string(), 2)]),
            attrs: HashMap::from([("colour".to_string(), "red".to_string())]),
            prefs: Prefs {
                theme: "dark".to_string(),
                volume: 3,
            },
            outline: Int64Node::default()
                .with_child(Int64Node::new(1).with_child(Int64Node::new(2)))
                .with_child(Int64Node::new(3)),
        }
    }

    #[test]
    fn test_full_record_survives_flattening() {
        let d = descriptor();
        let options = CodecOptions::default();
        let record = full_record();
        let props = to_properties(&record, &d, &options).expect("encode");

        let mut back = Record {
            id: 9,
            ..Default::default()
        };
        from_properties(&props, &mut back, &d, &options).expect("decode");
        assert_eq!(back, record);
    }

    #[test]
    fn test_property_layout() {
        let d = descriptor();
        let props = to_properties(&full_record(), &d, &CodecOptions::default()).expect("encode");

        assert_eq!(props.values_of("t").len(), 2);
        assert!(props.iter().filter(|p| p.name == "t").all(|p| p.multiple));
        assert_eq!(props.first_value("home_city"), Some(&Value::Text("Lagos".into())));
        assert_eq!(props.values_of("previous_city").len(), 2);
        assert_eq!(props.values_of("previous_zip"), vec![&Value::Null, &Value::Int(7)]);
        assert_eq!(props.values_of("counts_k").len(), 2);
        assert_eq!(props.first_value("attrs_colour"), Some(&Value::Text("red".into())));
        assert!(matches!(props.first_value("prefs"), Some(Value::Bytes(_))));
        assert_eq!(
            props.values_of("outline"),
            vec![&Value::Int(1), &Value::Int(-2), &Value::Int(2), &Value::Int(-1), &Value::Int(3)]
        );
    }

    #[test]
    fn test_store_and_index_policies() {
        let d = descriptor();
        let record = Record {
            name: String::new(),
            ..full_record()
        };
        let props = to_properties(&record, &d, &CodecOptions::default()).expect("encode");

        // empty name is skipped by the default store policy
        assert!(!props.contains("name"));
        // zero score is stored because its store policy is Always, but not indexed
        let score = props.iter().find(|p| p.name == "score").expect("stored");
        assert!(!score.indexed);
        // bytes are never indexed, even with an Always index policy
        let avatar = props.iter().find(|p| p.name == "avatar").expect("stored");
        assert!(!avatar.indexed);
        // marshaled bytes are not indexed either
        assert!(props.iter().filter(|p| p.name == "prefs").all(|p| !p.indexed));
    }

    #[test]
    fn test_long_text_is_not_indexed() {
        let d = descriptor();
        let options = CodecOptions {
            index_string_limit: 4,
            ..CodecOptions::default()
        };
        let record = Record {
            name: "long name".to_string(),
            tags: vec!["ok".to_string()],
            ..Default::default()
        };
        let props = to_properties(&record, &d, &options).expect("encode");
        let name = props.iter().find(|p| p.name == "name").expect("stored");
        assert!(!name.indexed);
        let tag = props.iter().find(|p| p.name == "t").expect("stored");
        assert!(tag.indexed);
    }

    #[test]
    fn test_indexes_only_drops_unindexed() {
        let d = descriptor();
        let options = CodecOptions {
            indexes_only: true,
            ..CodecOptions::default()
        };
        let props = to_properties(&full_record(), &d, &options).expect("encode");
        assert!(props.iter().all(|p| p.indexed));
        assert!(!props.contains("avatar"));
    }

    #[test]
    fn test_absent_properties_leave_fields_untouched() {
        let d = descriptor();
        let mut record = Record {
            name: "keep".to_string(),
            ..Default::default()
        };
        from_properties(&PropertyList::new(), &mut record, &d, &CodecOptions::default())
            .expect("decode");
        assert_eq!(record.name, "keep");
    }

    #[test]
    fn test_type_mismatch_reported() {
        let d = descriptor();
        let props: PropertyList = vec![Property::new("name", Value::Int(4))].into();
        let err = from_properties(&props, &mut Record::default(), &d, &CodecOptions::default())
            .unwrap_err();
        assert!(matches!(err, TesseraError::Codec(CodecError::TypeMismatch { .. })));
    }

    #[test]
    fn test_unbalanced_map_runs_rejected() {
        let d = descriptor();
        let props: PropertyList = vec![
            Property::new("counts_k", Value::Text("x".into())).multiple(true),
            Property::new("counts_k", Value::Text("y".into())).multiple(true),
            Property::new("counts_v", Value::Int(1)).multiple(true),
        ]
        .into();
        let err = from_properties(&props, &mut Record::default(), &d, &CodecOptions::default())
            .unwrap_err();
        assert!(matches!(err, TesseraError::Codec(CodecError::Decode { .. })));
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Sloppy {
        id: i64,
        name: String,
    }

    impl Entity for Sloppy {
        fn describe() -> TypeDescriptorBuilder {
            TypeDescriptorBuilder::default()
                .with_kind("S")
                .with_key_field("id")
                .field(FieldDescriptor::new("name"))
        }

        fn write_properties(&self, w: &mut PropertyWriter<'_>) -> TesseraResult<()> {
            w.plain("name", &self.name)?;
            w.plain("nickname", &self.name)
        }

        fn read_properties(&mut self, r: &PropertyReader<'_>) -> TesseraResult<()> {
            r.marshal("name", &mut self.name)
        }

        fn key_id(&self) -> i64 {
            self.id
        }

        fn set_key_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    #[test]
    fn test_undeclared_and_misdeclared_fields() {
        let d = Sloppy::describe().build().expect("valid");
        let options = CodecOptions::default();
        let err = to_properties(&Sloppy::default(), &d, &options).unwrap_err();
        assert!(matches!(err, TesseraError::Type(TypeError::UndeclaredField { .. })));

        let err = from_properties(&PropertyList::new(), &mut Sloppy::default(), &d, &options)
            .unwrap_err();
        assert!(matches!(err, TesseraError::Type(TypeError::FieldKindMismatch { .. })));
    }
}
