//! # EntiGate Engine
//!
//! The mapping-engine contract and entity model used by EntiGate.
//!
//! This crate defines what the core needs from a relational-mapping
//! engine: sessions that track entities by reference identity, record
//! persistence states and commit pending changes. It also provides the
//! shape registry that replaces runtime type introspection, and an
//! in-memory engine used by tests and tools.
//!
//! ## Entities
//!
//! - [`EntityData`] - plain field values, cloneable and serializable
//! - [`EntityHandle`] - a shared live entity; identity is the allocation
//! - [`EntityState`] - persistence state inside a session
//!
//! ## Engines
//!
//! - [`MappingEngine`] / [`Session`] - the contract
//! - [`InMemoryEngine`] - versioned in-memory tables
//!
//! ## Example
//!
//! ```rust
//! use entigate_engine::{EntityData, EntityHandle, EntityState, InMemoryEngine,
//!     MappingEngine, SessionSettings, ShapeDescriptor, ShapeRegistry, Value};
//!
//! let mut shapes = ShapeRegistry::new();
//! shapes.define(ShapeDescriptor::builder("tag").key("id", 0).field("label", "")).unwrap();
//! let engine = InMemoryEngine::new(shapes);
//!
//! let mut session = engine.open_session(&SessionSettings::default()).unwrap();
//! let tag = EntityHandle::new(EntityData::new("tag").with("id", 0).with("label", "blue"));
//! session.set_state(&tag, EntityState::Added).unwrap();
//! assert_eq!(session.commit().unwrap(), 1);
//! assert_eq!(tag.get("id"), Value::Integer(1));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod entity;
mod error;
mod memory;
mod session;
mod shape;
mod value;

pub use entity::{EntityData, EntityHandle, EntityState};
pub use error::{EngineError, EngineResult, MALFORMED_QUERY_CODES};
pub use memory::{InMemoryEngine, DUPLICATE_KEY_CODE};
pub use session::{MappingEngine, Session, SessionEntry, SessionSettings};
pub use shape::{Capabilities, FieldDescriptor, FieldKind, ShapeBuilder, ShapeDescriptor, ShapeRegistry};
pub use value::{is_valid_identifier, Identifier, Value};
