//! Detached copies of entities.
//!
//! When an entity must be marked but the live session does not know it,
//! the manager asks a [`DetachedCopy`] for an instance the session can
//! accept. The default [`ShapeCopier`] copies field values into a fresh
//! instance of the target shape.

use crate::error::{GateError, GateResult};
use entigate_engine::{EntityHandle, FieldKind, ShapeDescriptor, Value};

/// Produces instances compatible with a session's shape.
pub trait DetachedCopy: Send + Sync {
    /// Returns an entity of shape `target` carrying the values of `entity`.
    ///
    /// # Errors
    ///
    /// Returns a reflection error if the values cannot be carried over.
    fn detached_copy(&self, entity: &EntityHandle, target: &ShapeDescriptor) -> GateResult<EntityHandle>;
}

/// Copies declared fields by name into a fresh instance.
///
/// An entity already of the target shape is returned as is. Otherwise every
/// field declared by the target is taken from the source when present,
/// and keeps the target default when not. Collections are only copied when
/// `with_collections` is set.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShapeCopier {
    with_collections: bool,
}

impl ShapeCopier {
    /// Creates a copier that leaves child collections at their defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also copies child collections.
    #[must_use]
    pub fn with_collections(mut self) -> Self {
        self.with_collections = true;
        self
    }
}

impl DetachedCopy for ShapeCopier {
    fn detached_copy(&self, entity: &EntityHandle, target: &ShapeDescriptor) -> GateResult<EntityHandle> {
        if entity.shape() == target.name() {
            return Ok(entity.clone());
        }

        let source = entity.snapshot();
        let mut copy = target.instantiate();
        for field in target.fields() {
            if field.kind == FieldKind::Collection && !self.with_collections {
                continue;
            }
            if let Some(value) = source.fields.get(&field.name) {
                if field.kind == FieldKind::Collection && !matches!(value, Value::List(_) | Value::Null) {
                    return Err(GateError::reflection(
                        target.name(),
                        format!("field '{}' of {} is not a collection", field.name, source.shape),
                    ));
                }
                copy.fields.insert(field.name.clone(), value.clone());
            }
        }

        tracing::debug!(from = %source.shape, to = target.name(), "detached copy produced");
        Ok(EntityHandle::new(copy))
    }
}
