use super::writer::declared_field;
use super::CodecOptions;
use crate::entity::{Embedded, NestedReader};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tessera_core::{
    CodecError, FieldDescriptor, FieldKind, FieldValue, Int64Node, PropertyList, Scalar,
    TesseraResult, TreeCodec, TypeDescriptor, Value,
};

/// Rebuilds entity fields from a [`PropertyList`].
///
/// A field whose properties are absent is left as it was.
pub struct PropertyReader<'a> {
    descriptor: &'a TypeDescriptor,
    options: &'a CodecOptions,
    properties: &'a PropertyList,
}

fn mismatch(property: &str, expected: impl Into<String>, found: &Value) -> CodecError {
    CodecError::TypeMismatch {
        property: property.to_string(),
        expected: expected.into(),
        found: found.type_name().to_string(),
    }
}

impl<'a> PropertyReader<'a> {
    pub(crate) fn new(
        descriptor: &'a TypeDescriptor,
        options: &'a CodecOptions,
        properties: &'a PropertyList,
    ) -> Self {
        Self {
            descriptor,
            options,
            properties,
        }
    }

    fn declared(&self, field: &str, kind: FieldKind) -> TesseraResult<&'a FieldDescriptor> {
        declared_field(self.descriptor, field, kind)
    }

    /// Sub-field runs under `prefix_`, keyed by sub-field name.
    fn prefixed(&self, prefix: &str) -> HashMap<String, Vec<&'a Value>> {
        let mut runs: HashMap<String, Vec<&'a Value>> = HashMap::new();
        let properties: &'a PropertyList = self.properties;
        for p in properties {
            if let Some(sub) = p
                .name
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('_'))
            {
                runs.entry(sub.to_string()).or_default().push(&p.value);
            }
        }
        runs
    }

    pub fn plain<V: FieldValue>(&self, field: &str, target: &mut V) -> TesseraResult<()> {
        let fd = self.declared(field, FieldKind::Plain)?;
        let values = self.properties.values_of(fd.storage_name());
        let Some(first) = values.first() else {
            return Ok(());
        };
        *target = V::from_values(&values)
            .ok_or_else(|| mismatch(fd.storage_name(), V::type_label(), first))?;
        Ok(())
    }

    pub fn marshal<V: DeserializeOwned>(&self, field: &str, target: &mut V) -> TesseraResult<()> {
        let fd = self.declared(field, FieldKind::Marshal)?;
        match self.properties.first_value(fd.storage_name()) {
            None => Ok(()),
            Some(Value::Bytes(bytes)) => {
                *target = self.options.marshal.decode(fd.field_name(), bytes)?;
                Ok(())
            }
            Some(other) => Err(mismatch(fd.storage_name(), "bytes", other).into()),
        }
    }

    pub fn nested<E: Embedded>(&self, field: &str, target: &mut E) -> TesseraResult<()> {
        let fd = self.declared(field, FieldKind::Nested)?;
        let runs = self.prefixed(fd.storage_name());
        if runs.is_empty() {
            return Ok(());
        }
        target.read_fields(&NestedReader::new(fd.storage_name(), &runs, 0))?;
        Ok(())
    }

    pub fn nested_opt<E: Embedded>(&self, field: &str, target: &mut Option<E>) -> TesseraResult<()> {
        let fd = self.declared(field, FieldKind::Nested)?;
        let runs = self.prefixed(fd.storage_name());
        if runs.is_empty() {
            return Ok(());
        }
        let mut value = E::default();
        value.read_fields(&NestedReader::new(fd.storage_name(), &runs, 0))?;
        *target = Some(value);
        Ok(())
    }

    /// Element `i` is assembled from the `i`th value of every sub-field run.
    pub fn nested_list<E: Embedded>(&self, field: &str, target: &mut Vec<E>) -> TesseraResult<()> {
        let fd = self.declared(field, FieldKind::Nested)?;
        let runs = self.prefixed(fd.storage_name());
        let count = runs.values().map(Vec::len).max().unwrap_or(0);
        if count == 0 {
            return Ok(());
        }
        let mut out = Vec::with_capacity(count);
        for index in 0..count {
            let mut value = E::default();
            value.read_fields(&NestedReader::new(fd.storage_name(), &runs, index))?;
            out.push(value);
        }
        *target = out;
        Ok(())
    }

    pub fn nested_map<K, V, M>(&self, field: &str, target: &mut M) -> TesseraResult<()>
    where
        K: Scalar,
        V: Scalar,
        M: FromIterator<(K, V)>,
    {
        let fd = self.declared(field, FieldKind::Nested)?;
        let key_name = format!("{}_k", fd.storage_name());
        let value_name = format!("{}_v", fd.storage_name());
        let keys = self.properties.values_of(&key_name);
        let values = self.properties.values_of(&value_name);
        if keys.is_empty() && values.is_empty() {
            return Ok(());
        }
        if keys.len() != values.len() {
            return Err(CodecError::Decode {
                field: fd.field_name().to_string(),
                reason: format!("{} keys for {} values", keys.len(), values.len()),
            }
            .into());
        }
        let mut entries = Vec::with_capacity(keys.len());
        for (k, v) in keys.into_iter().zip(values) {
            let k = K::from_value(k).ok_or_else(|| mismatch(&key_name, K::TYPE_NAME, k))?;
            let v = V::from_value(v).ok_or_else(|| mismatch(&value_name, V::TYPE_NAME, v))?;
            entries.push((k, v));
        }
        *target = entries.into_iter().collect();
        Ok(())
    }

    pub fn expando<V, M>(&self, field: &str, target: &mut M) -> TesseraResult<()>
    where
        V: Scalar,
        M: FromIterator<(String, V)>,
    {
        let fd = self.declared(field, FieldKind::Expando)?;
        let runs = self.prefixed(fd.storage_name());
        if runs.is_empty() {
            return Ok(());
        }
        let mut entries = Vec::with_capacity(runs.len());
        for (key, values) in runs {
            let Some(value) = values.first() else {
                continue;
            };
            let name = format!("{}_{}", fd.storage_name(), key);
            let v = V::from_value(value).ok_or_else(|| mismatch(&name, V::TYPE_NAME, value))?;
            entries.push((key, v));
        }
        *target = entries.into_iter().collect();
        Ok(())
    }

    pub fn tree(&self, field: &str, target: &mut Int64Node) -> TesseraResult<()> {
        let fd = self.declared(field, FieldKind::Tree)?;
        let values = self.properties.values_of(fd.storage_name());
        if values.is_empty() {
            return Ok(());
        }
        let flat = values
            .iter()
            .map(|v| v.as_int().ok_or_else(|| mismatch(fd.storage_name(), "int", v)))
            .collect::<Result<Vec<i64>, CodecError>>()?;
        *target = TreeCodec::default().decode_children(&flat)?;
        Ok(())
    }
}
