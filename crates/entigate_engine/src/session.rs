//! The mapping-engine contract.
//!
//! A [`MappingEngine`] opens [`Session`]s. A session is a unit of work bound
//! to one connection: it tracks the entities it has handed out or been told
//! about, records their persistence state, and writes pending changes on
//! [`Session::commit`].

use crate::entity::{EntityData, EntityHandle, EntityState};
use crate::error::EngineResult;
use crate::shape::ShapeRegistry;
use crate::value::Identifier;

/// Settings used to open a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Logical connection name.
    pub connection_name: String,
    /// Engine-specific connection descriptor.
    pub connection_string: String,
    /// Command timeout in seconds.
    pub command_timeout: u32,
    /// Whether navigation properties load on access.
    pub lazy_loading: bool,
    /// Provider the settings were written for, if any.
    pub provider: Option<String>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connection_name: String::new(),
            connection_string: String::new(),
            command_timeout: 30,
            lazy_loading: true,
            provider: None,
        }
    }
}

/// An entity tracked by a session, with its current state.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// The tracked entity.
    pub entity: EntityHandle,
    /// Its state in the session.
    pub state: EntityState,
}

/// A relational-mapping engine.
///
/// Implementations must be `Send + Sync`; sessions are opened per manager.
pub trait MappingEngine: Send + Sync {
    /// Provider name, matched against the configured provider.
    fn name(&self) -> &str;

    /// Shapes known to the engine model.
    fn shapes(&self) -> &ShapeRegistry;

    /// Opens a new session.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    fn open_session(&self, settings: &SessionSettings) -> EngineResult<Box<dyn Session>>;
}

/// A unit of work against the store.
///
/// Entry operations (`state_of`, `set_state`, `reload`, ...) address an
/// entity by reference identity.
pub trait Session: Send {
    /// Shapes known to the session.
    fn shapes(&self) -> &ShapeRegistry;

    /// Finds an entity by identifier.
    ///
    /// An instance already tracked by the session is returned as is;
    /// otherwise the stored row is attached as `Unchanged`.
    ///
    /// # Errors
    ///
    /// Returns an error if the shape is unknown or the read fails.
    fn find(&mut self, shape: &str, identifier: &Identifier) -> EngineResult<Option<EntityHandle>>;

    /// Lists every entity of a shape.
    ///
    /// # Errors
    ///
    /// Returns an error if the shape is unknown or the read fails.
    fn list(&mut self, shape: &str) -> EngineResult<Box<dyn Iterator<Item = EntityHandle> + Send>>;

    /// Returns the state of an entity, `Detached` if not tracked.
    fn state_of(&self, entity: &EntityHandle) -> EntityState;

    /// Sets the state of an entity, attaching it if needed.
    ///
    /// Setting `Detached` stops tracking the entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the transition cannot be applied, for example
    /// because another instance with the same key is already tracked.
    fn set_state(&mut self, entity: &EntityHandle, state: EntityState) -> EngineResult<()>;

    /// Reloads an entity from the store, discarding local changes.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn reload(&mut self, entity: &EntityHandle) -> EngineResult<()>;

    /// Returns the values the entity had when it was attached.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::NotAttached`] if the entity is not tracked.
    fn original_values(&self, entity: &EntityHandle) -> EngineResult<EntityData>;

    /// Returns the names of fields whose value differs from the original.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::NotAttached`] if the entity is not tracked.
    fn modified_fields(&self, entity: &EntityHandle) -> EngineResult<Vec<String>>;

    /// Returns the current values of a tracked entity.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::NotAttached`] if the entity is not tracked.
    fn current_values(&self, entity: &EntityHandle) -> EngineResult<EntityData>;

    /// Overwrites the current values of a tracked entity.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::NotAttached`] if the entity is not tracked.
    fn set_current_values(&mut self, entity: &EntityHandle, values: &EntityData) -> EngineResult<()>;

    /// Returns true if a commit would write anything.
    fn has_pending_changes(&mut self) -> bool;

    /// Writes pending changes, returning the number of affected rows.
    ///
    /// # Errors
    ///
    /// Returns [`crate::EngineError::Concurrency`] when a row changed in the
    /// store since it was read, or any engine failure.
    fn commit(&mut self) -> EngineResult<usize>;

    /// Returns every tracked entry.
    fn entries(&self) -> Vec<SessionEntry>;

    /// Returns true if lazy loading is enabled.
    fn lazy_loading_enabled(&self) -> bool;

    /// Enables or disables lazy loading.
    fn set_lazy_loading_enabled(&mut self, enabled: bool);

    /// Stops tracking entities returned by queries.
    fn set_no_tracking(&mut self);

    /// Text of the last statement sent to the store, if any.
    fn last_statement(&self) -> Option<String>;
}
