use super::CodecOptions;
use crate::entity::{Embedded, NestedWriter};
use serde::Serialize;
use tessera_core::{
    FieldDescriptor, FieldKind, FieldValue, Int64Node, Property, PropertyList, Scalar,
    TesseraResult, TreeCodec, TypeDescriptor, TypeError, Value,
};

/// Flattens one entity into a [`PropertyList`].
///
/// Each method looks the field up in the descriptor, evaluates the store
/// policy against the whole field and the index policy against each emitted
/// value.
pub struct PropertyWriter<'a> {
    descriptor: &'a TypeDescriptor,
    options: &'a CodecOptions,
    out: PropertyList,
}

impl<'a> PropertyWriter<'a> {
    pub(crate) fn new(descriptor: &'a TypeDescriptor, options: &'a CodecOptions) -> Self {
        Self {
            descriptor,
            options,
            out: PropertyList::with_capacity(descriptor.fields().len()),
        }
    }

    fn declared(&self, field: &str, kind: FieldKind) -> TesseraResult<&'a FieldDescriptor> {
        declared_field(self.descriptor, field, kind)
    }

    fn indexable(&self, value: &Value) -> bool {
        match value {
            Value::Bytes(_) => false,
            Value::Text(s) => s.len() <= self.options.index_string_limit,
            _ => true,
        }
    }

    fn emit(&mut self, fd: &FieldDescriptor, name: String, value: Value, multiple: bool) {
        let indexed = fd.index().allows(value.is_zero()) && self.indexable(&value);
        self.out.push(Property::new(name, value).indexed(indexed).multiple(multiple));
    }

    /// A value or list of values stored under the field's own name.
    pub fn plain<V: FieldValue>(&mut self, field: &str, value: &V) -> TesseraResult<()> {
        let fd = self.declared(field, FieldKind::Plain)?;
        if !fd.store().allows(value.is_empty_value()) {
            return Ok(());
        }
        for v in value.to_values() {
            self.emit(fd, fd.storage_name().to_string(), v, V::MULTIPLE);
        }
        Ok(())
    }

    /// One opaque byte property produced by the configured byte codec.
    pub fn marshal<V: Serialize>(&mut self, field: &str, value: &V) -> TesseraResult<()> {
        let fd = self.declared(field, FieldKind::Marshal)?;
        let bytes = self.options.marshal.encode(fd.field_name(), value)?;
        if !fd.store().allows(bytes.is_empty()) {
            return Ok(());
        }
        self.emit(fd, fd.storage_name().to_string(), Value::Bytes(bytes), false);
        Ok(())
    }

    /// A sub-structure stored as `field_sub` properties.
    pub fn nested<E: Embedded>(&mut self, field: &str, value: &E) -> TesseraResult<()> {
        let fd = self.declared(field, FieldKind::Nested)?;
        if !fd.store().allows(*value == E::default()) {
            return Ok(());
        }
        self.emit_nested(fd, value, false);
        Ok(())
    }

    /// Like [`nested`](Self::nested); `None` writes nothing.
    pub fn nested_opt<E: Embedded>(&mut self, field: &str, value: &Option<E>) -> TesseraResult<()> {
        match value {
            Some(inner) => self.nested(field, inner),
            None => self.declared(field, FieldKind::Nested).map(|_| ()),
        }
    }

    /// One run of `field_sub` properties per element.
    pub fn nested_list<E: Embedded>(&mut self, field: &str, values: &[E]) -> TesseraResult<()> {
        let fd = self.declared(field, FieldKind::Nested)?;
        if !fd.store().allows(values.is_empty()) {
            return Ok(());
        }
        for value in values {
            self.emit_nested(fd, value, true);
        }
        Ok(())
    }

    fn emit_nested<E: Embedded>(&mut self, fd: &FieldDescriptor, value: &E, multiple: bool) {
        let mut nested = NestedWriter::new();
        value.write_fields(&mut nested);
        for (sub, v) in nested.into_fields() {
            self.emit(fd, format!("{}_{}", fd.storage_name(), sub), v, multiple);
        }
    }

    /// Paired `field_k` / `field_v` properties, one pair per entry.
    pub fn nested_map<'m, K, V, I>(&mut self, field: &str, entries: I) -> TesseraResult<()>
    where
        K: Scalar + 'm,
        V: Scalar + 'm,
        I: IntoIterator<Item = (&'m K, &'m V)>,
    {
        let fd = self.declared(field, FieldKind::Nested)?;
        let entries: Vec<(&K, &V)> = entries.into_iter().collect();
        if !fd.store().allows(entries.is_empty()) {
            return Ok(());
        }
        let key_name = format!("{}_k", fd.storage_name());
        let value_name = format!("{}_v", fd.storage_name());
        for (k, v) in entries {
            self.emit(fd, key_name.clone(), k.to_value(), true);
            self.emit(fd, value_name.clone(), v.to_value(), true);
        }
        Ok(())
    }

    /// One `field_key` property per map entry.
    pub fn expando<'m, V, I>(&mut self, field: &str, entries: I) -> TesseraResult<()>
    where
        V: Scalar + 'm,
        I: IntoIterator<Item = (&'m String, &'m V)>,
    {
        let fd = self.declared(field, FieldKind::Expando)?;
        let entries: Vec<(&String, &V)> = entries.into_iter().collect();
        if !fd.store().allows(entries.is_empty()) {
            return Ok(());
        }
        for (key, v) in entries {
            self.emit(fd, format!("{}_{}", fd.storage_name(), key), v.to_value(), false);
        }
        Ok(())
    }

    /// The children of `root`, linearized with the default markers.
    pub fn tree(&mut self, field: &str, root: &Int64Node) -> TesseraResult<()> {
        let fd = self.declared(field, FieldKind::Tree)?;
        if !fd.store().allows(root.children.is_empty()) {
            return Ok(());
        }
        for v in TreeCodec::default().encode_children(root)? {
            self.emit(fd, fd.storage_name().to_string(), Value::Int(v), true);
        }
        Ok(())
    }

    pub(crate) fn finish(mut self) -> PropertyList {
        if self.options.indexes_only {
            self.out.retain_indexed();
        }
        self.out
    }
}

pub(super) fn declared_field<'d>(
    descriptor: &'d TypeDescriptor,
    field: &str,
    kind: FieldKind,
) -> TesseraResult<&'d FieldDescriptor> {
    let fd = descriptor
        .field(field)
        .ok_or_else(|| TypeError::UndeclaredField {
            type_name: descriptor.type_name().to_string(),
            field: field.to_string(),
        })?;
    if fd.kind() != kind {
        return Err(TypeError::FieldKindMismatch {
            type_name: descriptor.type_name().to_string(),
            field: field.to_string(),
            declared: fd.kind().to_string(),
            accessed: kind.to_string(),
        }
        .into());
    }
    Ok(fd)
}
