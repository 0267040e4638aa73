//! Key resolution.
//!
//! [`resolve_key`] derives the storage key of an entity from its key fields,
//! filling shape fields from the descriptor on the way. [`apply_key`] is the
//! inverse: it writes a backend-assigned key back into the entity.

use crate::backend::Backend;
use crate::entity::Entity;
use tessera_core::{kind_key, KeyError, StorageKey, TesseraResult, TypeDescriptor, TypeError};

fn fill_shape(field: Option<&mut String>, shape: &str) {
    if let Some(field) = field {
        if field.is_empty() {
            field.push_str(shape);
        }
    }
}

/// The storage key of `entity`.
///
/// An id of zero yields an incomplete key. A negative id asks the backend for
/// a fresh id now, which is written back into the entity. A configured parent
/// must already be persisted; otherwise no backend call is made.
pub fn resolve_key<T: Entity>(
    backend: &dyn Backend,
    entity: &mut T,
    descriptor: &TypeDescriptor,
) -> TesseraResult<StorageKey> {
    let parent = match descriptor.parent() {
        Some(spec) => {
            fill_shape(entity.parent_shape_field_mut(), &spec.shape);
            let parent_id = entity.parent_key_id();
            if parent_id <= 0 {
                return Err(KeyError::ParentNotPersisted {
                    parent_kind: kind_key(&spec.kind, &spec.shape),
                    parent_id,
                }
                .into());
            }
            Some(backend.new_key(&spec.kind, &spec.shape, parent_id, None))
        }
        None => None,
    };

    fill_shape(entity.shape_field_mut(), descriptor.shape());

    let mut id = entity.key_id();
    if id < 0 {
        let incomplete = backend.new_key(descriptor.kind(), descriptor.shape(), 0, parent.clone());
        id = backend.allocate_id(&incomplete)?;
        entity.set_key_id(id);
    }

    Ok(backend.new_key(descriptor.kind(), descriptor.shape(), id.max(0), parent))
}

/// Write `key` into the key fields of `entity`.
pub fn apply_key<T: Entity>(
    entity: &mut T,
    key: &StorageKey,
    descriptor: &TypeDescriptor,
) -> TesseraResult<()> {
    let found = kind_key(key.kind(), key.shape());
    if found != descriptor.kind_key() {
        return Err(TypeError::KindMismatch {
            type_name: descriptor.type_name().to_string(),
            expected: descriptor.kind_key(),
            found,
        }
        .into());
    }

    fill_shape(entity.shape_field_mut(), descriptor.shape());
    entity.set_key_id(key.id());
    if let Some(parent) = key.parent() {
        if let Some(spec) = descriptor.parent() {
            fill_shape(entity.parent_shape_field_mut(), &spec.shape);
        }
        entity.set_parent_key_id(parent.id());
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
