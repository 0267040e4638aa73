//! Entity trait and lifecycle hooks.
//!
//! An entity type describes its storage configuration once through
//! [`Entity::describe`] and flattens itself through a [`PropertyWriter`] /
//! [`PropertyReader`] pair. The writer and reader apply the field rules of
//! the descriptor, so an implementation only names its fields.

use crate::codec::{PropertyReader, PropertyWriter};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use tessera_core::{CodecError, HookError, Scalar, TesseraResult, TypeDescriptorBuilder, Value};

/// A type persisted through the datastore.
///
/// `Serialize`/`DeserializeOwned` are used for the shared cache tier, which
/// holds entities as encoded bytes.
pub trait Entity: Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Storage configuration. Called once per type, at registration.
    fn describe() -> TypeDescriptorBuilder;

    fn write_properties(&self, writer: &mut PropertyWriter<'_>) -> TesseraResult<()>;

    fn read_properties(&mut self, reader: &PropertyReader<'_>) -> TesseraResult<()>;

    /// Numeric id. Zero means not yet persisted; negative asks for an id
    /// to be allocated during key resolution.
    fn key_id(&self) -> i64;

    fn set_key_id(&mut self, id: i64);

    fn parent_key_id(&self) -> i64 {
        0
    }

    fn set_parent_key_id(&mut self, _id: i64) {}

    /// The field holding this entity's shape, when the type has one.
    fn shape_field_mut(&mut self) -> Option<&mut String> {
        None
    }

    fn parent_shape_field_mut(&mut self) -> Option<&mut String> {
        None
    }

    fn post_load_hook(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    fn pre_save_hook(&mut self) -> Result<(), HookError> {
        Ok(())
    }

    fn post_save_hook(&mut self) -> Result<(), HookError> {
        Ok(())
    }
}

/// A sub-structure flattened into its parent's properties.
pub trait Embedded: Default + PartialEq {
    fn write_fields(&self, writer: &mut NestedWriter);

    fn read_fields(&mut self, reader: &NestedReader<'_>) -> Result<(), CodecError>;
}

/// Collects the sub-fields of one embedded value, in order.
#[derive(Debug, Default)]
pub struct NestedWriter {
    fields: Vec<(String, Value)>,
}

impl NestedWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every sub-field is recorded, empty or not, so sibling runs stay aligned.
    pub fn field<V: Scalar>(&mut self, name: &str, value: &V) {
        self.fields.push((name.to_string(), value.to_value()));
    }

    pub(crate) fn into_fields(self) -> Vec<(String, Value)> {
        self.fields
    }
}

/// Reads the sub-fields of one embedded value.
///
/// For a list of embedded values, `index` selects the element; sub-field
/// runs are zipped by position.
#[derive(Debug)]
pub struct NestedReader<'a> {
    prefix: &'a str,
    values: &'a HashMap<String, Vec<&'a Value>>,
    index: usize,
}

impl<'a> NestedReader<'a> {
    pub(crate) fn new(prefix: &'a str, values: &'a HashMap<String, Vec<&'a Value>>, index: usize) -> Self {
        Self { prefix, values, index }
    }

    /// Leaves `target` untouched when the sub-field was not stored.
    pub fn field<V: Scalar>(&self, name: &str, target: &mut V) -> Result<(), CodecError> {
        let Some(value) = self.values.get(name).and_then(|run| run.get(self.index)) else {
            return Ok(());
        };
        *target = V::from_value(value).ok_or_else(|| CodecError::TypeMismatch {
            property: format!("{}_{}", self.prefix, name),
            expected: V::TYPE_NAME.to_string(),
            found: value.type_name().to_string(),
        })?;
        Ok(())
    }
}
