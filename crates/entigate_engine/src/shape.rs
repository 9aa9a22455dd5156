//! Shape descriptors and the shape registry.
//!
//! A shape is the logical structural type of an entity: its ordered field
//! list, its key field(s) and its optional capabilities. Shapes are
//! registered once, validated at registration, and looked up by name.

use crate::entity::EntityData;
use crate::error::{EngineError, EngineResult};
use crate::value::{Identifier, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Kind of a field within a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldKind {
    /// Plain value column.
    Scalar,
    /// Reference to another entity.
    Reference,
    /// Child collection of entities.
    Collection,
}

/// Describes one field of a shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    /// Field name.
    pub name: String,
    /// Field kind.
    pub kind: FieldKind,
    /// Value given to freshly instantiated entities.
    pub default: Value,
}

/// Optional capabilities an entity shape can opt into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Field carrying a human readable name.
    pub nameable: Option<String>,
    /// Modifications should keep their original values for history.
    pub archival: bool,
    /// Field holding the single meaningful value of the entity.
    pub single_value: Option<String>,
    /// Field holding a recognizable business code.
    pub recognizable_code: Option<String>,
}

/// Descriptor of an entity shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeDescriptor {
    name: String,
    table: String,
    fields: Vec<FieldDescriptor>,
    keys: Vec<String>,
    capabilities: Capabilities,
}

impl ShapeDescriptor {
    /// Starts building a shape.
    pub fn builder(name: impl Into<String>) -> ShapeBuilder {
        ShapeBuilder::new(name)
    }

    /// Shape name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the backing table.
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Ordered fields.
    #[must_use]
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Looks up a field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Key field names, in key order.
    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Capabilities of the shape.
    #[must_use]
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Returns true if `field` is declared as a child collection.
    #[must_use]
    pub fn is_collection(&self, field: &str) -> bool {
        self.field(field)
            .is_some_and(|f| f.kind == FieldKind::Collection)
    }

    /// Creates a fresh instance with every field at its default.
    #[must_use]
    pub fn instantiate(&self) -> EntityData {
        let mut data = EntityData::new(self.name.clone());
        for field in &self.fields {
            data.fields.insert(field.name.clone(), field.default.clone());
        }
        data
    }

    /// Reads the identifier of an entity of this shape.
    ///
    /// Returns `None` when any key part is null or not usable as a key.
    #[must_use]
    pub fn identifier_of(&self, data: &EntityData) -> Option<Identifier> {
        if let [key] = self.keys.as_slice() {
            return Identifier::from_value(&data.get(key));
        }
        let parts = self
            .keys
            .iter()
            .map(|key| Identifier::from_value(&data.get(key)))
            .collect::<Option<Vec<_>>>()?;
        Some(Identifier::Composite(parts))
    }

    /// Returns the `(key field, value)` pairs of an entity.
    #[must_use]
    pub fn key_values(&self, data: &EntityData) -> Vec<(String, Value)> {
        self.keys
            .iter()
            .map(|key| (key.clone(), data.get(key)))
            .collect()
    }

    /// Writes `identifier` into the key fields of `data`.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier does not have one part per key.
    pub fn assign_identifier(&self, data: &mut EntityData, identifier: &Identifier) -> EngineResult<()> {
        let values = identifier.to_values();
        if values.len() != self.keys.len() {
            return Err(EngineError::invalid_shape(
                &self.name,
                format!(
                    "identifier {identifier} has {} parts, expected {}",
                    values.len(),
                    self.keys.len()
                ),
            ));
        }
        for (key, value) in self.keys.iter().zip(values) {
            data.fields.insert(key.clone(), value);
        }
        Ok(())
    }

    /// Returns the display name of an entity if the shape is nameable.
    #[must_use]
    pub fn name_of(&self, data: &EntityData) -> Option<String> {
        let field = self.capabilities.nameable.as_deref()?;
        match data.get(field) {
            Value::Null => None,
            value => Some(value.to_string()),
        }
    }
}

/// Builder for [`ShapeDescriptor`].
#[derive(Debug)]
pub struct ShapeBuilder {
    name: String,
    table: Option<String>,
    fields: Vec<FieldDescriptor>,
    keys: Vec<String>,
    capabilities: Capabilities,
}

impl ShapeBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            fields: Vec::new(),
            keys: Vec::new(),
            capabilities: Capabilities::default(),
        }
    }

    /// Sets the backing table name (defaults to the shape name).
    #[must_use]
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Adds a key field.
    #[must_use]
    pub fn key(mut self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        let name = name.into();
        self.keys.push(name.clone());
        self.push(name, FieldKind::Scalar, default.into())
    }

    /// Adds a scalar field.
    #[must_use]
    pub fn field(self, name: impl Into<String>, default: impl Into<Value>) -> Self {
        self.push(name.into(), FieldKind::Scalar, default.into())
    }

    /// Adds a reference field, null by default.
    #[must_use]
    pub fn reference(self, name: impl Into<String>) -> Self {
        self.push(name.into(), FieldKind::Reference, Value::Null)
    }

    /// Adds a child collection field, empty by default.
    #[must_use]
    pub fn collection(self, name: impl Into<String>) -> Self {
        self.push(name.into(), FieldKind::Collection, Value::List(Vec::new()))
    }

    /// Marks `field` as the display name of the entity.
    #[must_use]
    pub fn nameable(mut self, field: impl Into<String>) -> Self {
        self.capabilities.nameable = Some(field.into());
        self
    }

    /// Marks the shape as keeping original values on modification.
    #[must_use]
    pub fn archival(mut self) -> Self {
        self.capabilities.archival = true;
        self
    }

    /// Marks `field` as the single meaningful value of the entity.
    #[must_use]
    pub fn single_value(mut self, field: impl Into<String>) -> Self {
        self.capabilities.single_value = Some(field.into());
        self
    }

    /// Marks `field` as a recognizable business code.
    #[must_use]
    pub fn recognizable_code(mut self, field: impl Into<String>) -> Self {
        self.capabilities.recognizable_code = Some(field.into());
        self
    }

    fn push(mut self, name: String, kind: FieldKind, default: Value) -> Self {
        self.fields.push(FieldDescriptor {
            name,
            kind,
            default,
        });
        self
    }

    /// Validates and builds the descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidShape`] if the shape has no name, no
    /// key, duplicate fields, or a capability pointing at a field that is
    /// not a declared scalar.
    pub fn build(self) -> EngineResult<ShapeDescriptor> {
        if self.name.trim().is_empty() {
            return Err(EngineError::invalid_shape("", "shape name is empty"));
        }
        if self.keys.is_empty() {
            return Err(EngineError::invalid_shape(&self.name, "no key field declared"));
        }
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(EngineError::invalid_shape(
                    &self.name,
                    format!("duplicate field '{}'", field.name),
                ));
            }
        }

        let caps = &self.capabilities;
        let declared = [
            ("nameable", caps.nameable.as_deref()),
            ("single value", caps.single_value.as_deref()),
            ("recognizable code", caps.recognizable_code.as_deref()),
        ];
        for (capability, field) in declared {
            let Some(field) = field else { continue };
            let is_scalar = self
                .fields
                .iter()
                .any(|f| f.name == field && f.kind == FieldKind::Scalar);
            if !is_scalar {
                return Err(EngineError::invalid_shape(
                    &self.name,
                    format!("{capability} capability refers to unknown scalar field '{field}'"),
                ));
            }
        }

        Ok(ShapeDescriptor {
            table: self.table.unwrap_or_else(|| self.name.clone()),
            name: self.name,
            fields: self.fields,
            keys: self.keys,
            capabilities: self.capabilities,
        })
    }
}

/// Registry of shapes known to an engine.
#[derive(Debug, Clone, Default)]
pub struct ShapeRegistry {
    shapes: BTreeMap<String, Arc<ShapeDescriptor>>,
}

impl ShapeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a shape.
    ///
    /// # Errors
    ///
    /// Returns an error if a shape with the same name is already registered.
    pub fn register(&mut self, shape: ShapeDescriptor) -> EngineResult<Arc<ShapeDescriptor>> {
        if self.shapes.contains_key(shape.name()) {
            return Err(EngineError::invalid_shape(shape.name(), "already registered"));
        }
        let shape = Arc::new(shape);
        self.shapes.insert(shape.name().to_string(), Arc::clone(&shape));
        Ok(shape)
    }

    /// Builds and registers a shape in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder fails validation or the name is taken.
    pub fn define(&mut self, builder: ShapeBuilder) -> EngineResult<Arc<ShapeDescriptor>> {
        self.register(builder.build()?)
    }

    /// Looks up a shape.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<ShapeDescriptor>> {
        self.shapes.get(name).cloned()
    }

    /// Looks up a shape, failing if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::UnknownShape`] if the shape is not registered.
    pub fn require(&self, name: &str) -> EngineResult<Arc<ShapeDescriptor>> {
        self.get(name)
            .ok_or_else(|| EngineError::UnknownShape(name.to_string()))
    }

    /// Registered shape names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.shapes.keys().map(String::as_str)
    }

    /// Number of registered shapes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shapes.len()
    }

    /// Returns true if no shape is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}
