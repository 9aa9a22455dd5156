//! Entity representation and persistence states.

use crate::value::Value;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Plain field data of an entity.
///
/// This is the connection-independent form: it can be cloned, compared and
/// serialized freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityData {
    /// Shape name.
    pub shape: String,
    /// Field values by name.
    pub fields: BTreeMap<String, Value>,
}

impl EntityData {
    /// Creates an entity with no fields set.
    pub fn new(shape: impl Into<String>) -> Self {
        Self {
            shape: shape.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Sets a field, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Returns a field value, `Null` when the field is absent.
    #[must_use]
    pub fn get(&self, field: &str) -> Value {
        self.fields.get(field).cloned().unwrap_or(Value::Null)
    }
}

/// A shared reference to a live entity.
///
/// Identity is reference identity: two handles denote the same entity only
/// if they point to the same allocation ([`EntityHandle::ptr_eq`]). Equal
/// field values do not make two handles the same entity.
#[derive(Clone)]
pub struct EntityHandle {
    inner: Arc<RwLock<EntityData>>,
}

impl EntityHandle {
    /// Wraps entity data into a new handle with a fresh identity.
    #[must_use]
    pub fn new(data: EntityData) -> Self {
        Self {
            inner: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns the shape name.
    #[must_use]
    pub fn shape(&self) -> String {
        self.inner.read().shape.clone()
    }

    /// Returns a field value, `Null` when absent.
    #[must_use]
    pub fn get(&self, field: &str) -> Value {
        self.inner.read().get(field)
    }

    /// Sets a field value.
    pub fn set(&self, field: impl Into<String>, value: impl Into<Value>) {
        self.inner.write().fields.insert(field.into(), value.into());
    }

    /// Returns a copy of the entity data.
    #[must_use]
    pub fn snapshot(&self) -> EntityData {
        self.inner.read().clone()
    }

    /// Replaces all field values with those of `data`, keeping identity.
    pub fn assign(&self, data: &EntityData) {
        let mut inner = self.inner.write();
        inner.fields.clone_from(&data.fields);
    }

    /// Runs `f` with shared access to the entity data.
    pub fn read<R>(&self, f: impl FnOnce(&EntityData) -> R) -> R {
        f(&self.inner.read())
    }

    /// Runs `f` with exclusive access to the entity data.
    pub fn update<R>(&self, f: impl FnOnce(&mut EntityData) -> R) -> R {
        f(&mut self.inner.write())
    }

    /// Returns true if both handles denote the same entity.
    #[must_use]
    pub fn ptr_eq(&self, other: &EntityHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.inner.read();
        f.debug_struct("EntityHandle")
            .field("shape", &data.shape)
            .field("fields", &data.fields)
            .finish()
    }
}

impl From<EntityData> for EntityHandle {
    fn from(data: EntityData) -> Self {
        Self::new(data)
    }
}

/// Persistence state of an entity within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityState {
    /// Not associated with any session.
    Detached,
    /// Attached, no changes.
    Unchanged,
    /// Will be inserted on commit.
    Added,
    /// Will be updated on commit.
    Modified,
    /// Will be removed on commit.
    Deleted,
}

impl EntityState {
    /// Returns true for states that produce a write on commit.
    #[must_use]
    pub fn is_change(self) -> bool {
        matches!(self, Self::Added | Self::Modified | Self::Deleted)
    }
}

impl fmt::Display for EntityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Detached => "Detached",
            Self::Unchanged => "Unchanged",
            Self::Added => "Added",
            Self::Modified => "Modified",
            Self::Deleted => "Deleted",
        };
        f.write_str(name)
    }
}
