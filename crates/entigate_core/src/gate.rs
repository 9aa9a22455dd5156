//! The entity manager.
//!
//! An [`EntityGate`] manages one current entity against a persistence
//! session. Every public operation follows the same sequence: the session
//! token is reset and a live session ensured, the work runs through the
//! retry loop, then the tracking set and original-values snapshot are
//! cleared.

use crate::config::ClientConfig;
use crate::detached::{DetachedCopy, ShapeCopier};
use crate::error::{GateError, GateResult};
use crate::notify::{ChangeKind, ChangeNotice, ChangeSubscriber};
use crate::portable::{PortableEntry, PortableState};
use crate::provider::Provider;
use crate::reconcile::apply_state;
use crate::retry::{self, AttemptFailure, RetryContext, RetryPolicy, Sleeper, ThreadSleeper};
use crate::token::SessionToken;
use crate::tracking::describe;
use entigate_engine::{
    is_valid_identifier, EntityHandle, EntityState, Identifier, MappingEngine, Session, Value,
};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

fn live(provider: &mut Option<Provider>) -> GateResult<&mut Provider> {
    provider
        .as_mut()
        .ok_or_else(|| GateError::provider("no live session"))
}

/// Builder for [`EntityGate`].
///
/// Cloning a builder gives a template that can produce several managers
/// sharing the same engine and collaborators.
#[derive(Clone)]
pub struct GateBuilder {
    engine: Arc<dyn MappingEngine>,
    config: Option<ClientConfig>,
    shape: Option<String>,
    entity: Option<EntityHandle>,
    subscriber: Option<Arc<dyn ChangeSubscriber>>,
    sleeper: Arc<dyn Sleeper>,
    copier: Arc<dyn DetachedCopy>,
}

impl GateBuilder {
    /// Starts a builder over `engine`.
    pub fn new(engine: Arc<dyn MappingEngine>) -> Self {
        Self {
            engine,
            config: None,
            shape: None,
            entity: None,
            subscriber: None,
            sleeper: Arc::new(ThreadSleeper),
            copier: Arc::new(ShapeCopier::new()),
        }
    }

    /// Sets the configuration of the manager.
    #[must_use]
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Binds the manager to one shape.
    ///
    /// A bound manager rejects entities of other shapes and can create
    /// entities without being given one first.
    #[must_use]
    pub fn with_shape(mut self, shape: impl Into<String>) -> Self {
        self.shape = Some(shape.into());
        self
    }

    /// Sets the initial current entity.
    #[must_use]
    pub fn with_entity(mut self, entity: EntityHandle) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Sets the receiver of change notices.
    #[must_use]
    pub fn with_subscriber(mut self, subscriber: Arc<dyn ChangeSubscriber>) -> Self {
        self.subscriber = Some(subscriber);
        self
    }

    /// Replaces the sleeper used between attempts.
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Replaces the detached-copy provider.
    #[must_use]
    pub fn with_copier(mut self, copier: Arc<dyn DetachedCopy>) -> Self {
        self.copier = copier;
        self
    }

    fn gate(self, config: ClientConfig, typed_shape: Option<String>, entity: Option<EntityHandle>) -> EntityGate {
        EntityGate {
            engine: self.engine,
            config,
            token: SessionToken::new(),
            provider: None,
            entity,
            typed_shape,
            primary_keys: None,
            original_snapshot: None,
            subscriber: self.subscriber,
            sleeper: self.sleeper,
            copier: self.copier,
            disposed: false,
        }
    }

    /// Builds the manager. No session is opened until the first operation.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no valid configuration was given, a
    /// reflection error if a shape is unknown, and an invalid state error if
    /// the entity does not match the bound shape.
    pub fn build(self) -> GateResult<EntityGate> {
        let config = self
            .config
            .clone()
            .ok_or_else(|| GateError::configuration("no connection configured"))?;
        config.validate()?;

        if let Some(shape) = &self.shape {
            self.engine
                .shapes()
                .require(shape)
                .map_err(|e| GateError::reflection_with(shape.as_str(), e))?;
        }
        if let Some(entity) = &self.entity {
            let name = entity.shape();
            self.engine
                .shapes()
                .require(&name)
                .map_err(|e| GateError::reflection_with(name.as_str(), e))?;
            if let Some(shape) = self.shape.as_ref().filter(|s| **s != name) {
                return Err(GateError::invalid_state_for(
                    format!("unable to handle an entity of shape '{name}' in a manager for '{shape}'"),
                    describe(entity),
                ));
            }
        }

        let shape = self.shape.clone();
        let entity = self.entity.clone();
        let mut gate = self.gate(config, shape, entity);
        gate.refresh_primary_keys();
        Ok(gate)
    }

    /// Rebuilds a suspended manager.
    ///
    /// Configuration, shape and entity come from `state`; the builder only
    /// contributes its engine and collaborators. A new session is opened
    /// and the tracked intent replayed into it.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error if the state does not have exactly
    /// one primary entry, and any error raised while opening the session.
    pub fn resume(self, state: PortableState) -> GateResult<EntityGate> {
        let config = ClientConfig::from_connection(&state.connection)?;
        state.main_entry()?;

        let mut provider = Provider::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.copier),
            state.lazy_loading,
        );
        if let Some(shape) = &state.shape {
            provider.set_shape(shape)?;
        }

        let mut entity = None;
        for entry in state.entries {
            let handle = EntityHandle::new(entry.entity);
            if entry.primary {
                entity = Some(handle.clone());
            }
            provider.tracking_mut().mark(handle, entry.state, entry.primary)?;
        }

        let typed_shape = if state.typed { state.shape } else { None };
        let mut gate = self.gate(config, typed_shape, entity);
        gate.token = state.token;
        gate.original_snapshot = state.original_values;
        gate.provider = Some(provider);
        gate.refresh_primary_keys();
        gate.check_provider()?;

        tracing::info!(
            connection = gate.config.connection_name(),
            entity = %gate.friendly_name(),
            "manager resumed"
        );
        Ok(gate)
    }
}

/// Manager of one current entity against a persistence session.
///
/// The manager owns its session. Operations take `&mut self`, so a manager
/// runs one operation at a time; share work across threads by giving each
/// thread its own manager.
///
/// # Example
///
/// ```rust
/// use entigate_core::{ClientConfig, EntityGate};
/// use entigate_engine::{InMemoryEngine, ShapeDescriptor, ShapeRegistry};
/// use std::sync::Arc;
///
/// let mut shapes = ShapeRegistry::new();
/// shapes.define(ShapeDescriptor::builder("tag").key("id", 0).field("label", "")).unwrap();
/// let engine = Arc::new(InMemoryEngine::new(shapes));
///
/// let mut gate = EntityGate::builder(engine.clone())
///     .with_config(ClientConfig::new().with_connection("Main", "mem://main"))
///     .with_shape("tag")
///     .build()
///     .unwrap();
///
/// let tag = gate.new_entity().unwrap();
/// tag.set("label", "red");
/// assert!(gate.save().unwrap());
/// assert_eq!(engine.row_count("tag"), 1);
/// ```
pub struct EntityGate {
    engine: Arc<dyn MappingEngine>,
    config: ClientConfig,
    token: SessionToken,
    provider: Option<Provider>,
    entity: Option<EntityHandle>,
    typed_shape: Option<String>,
    primary_keys: Option<Vec<(String, Value)>>,
    original_snapshot: Option<Vec<(String, Value)>>,
    subscriber: Option<Arc<dyn ChangeSubscriber>>,
    sleeper: Arc<dyn Sleeper>,
    copier: Arc<dyn DetachedCopy>,
    disposed: bool,
}

impl fmt::Debug for EntityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityGate")
            .field("connection", &self.config.connection_name())
            .field("shape", &self.typed_shape)
            .field("entity", &self.entity)
            .field("token", &self.token)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl EntityGate {
    /// Starts building a manager over `engine`.
    pub fn builder(engine: Arc<dyn MappingEngine>) -> GateBuilder {
        GateBuilder::new(engine)
    }

    /// Rebuilds a suspended manager with default collaborators.
    ///
    /// # Errors
    ///
    /// See [`GateBuilder::resume`].
    pub fn resume(engine: Arc<dyn MappingEngine>, state: PortableState) -> GateResult<Self> {
        GateBuilder::new(engine).resume(state)
    }

    // -- operation lifecycle -------------------------------------------------

    fn check_provider(&mut self) -> GateResult<()> {
        if self.disposed {
            return Err(GateError::Disposed);
        }
        match self.provider.as_mut() {
            Some(provider) => provider.initialize(&mut self.config, &mut self.token),
            None => self.make_provider(),
        }
    }

    fn make_provider(&mut self) -> GateResult<()> {
        let mut provider = Provider::new(
            Arc::clone(&self.engine),
            Arc::clone(&self.copier),
            self.config.lazy_loading(),
        );
        if let Some(shape) = &self.typed_shape {
            provider.set_shape(shape)?;
        } else if let Some(entity) = &self.entity {
            provider.set_shape(&entity.shape())?;
        }
        provider.initialize(&mut self.config, &mut self.token)?;
        self.provider = Some(provider);

        if let Some(entity) = self.entity.take() {
            self.append_entity(&entity)?;
        }
        Ok(())
    }

    fn execution_start(&mut self) -> GateResult<()> {
        self.token.reset();
        self.check_provider()
    }

    fn execution_end(&mut self) {
        if let Some(provider) = self.provider.as_mut() {
            provider.tracking_mut().clear();
        }
        self.original_snapshot = None;
    }

    fn run<T>(&mut self, operation: &str, f: impl FnOnce(&mut Self) -> GateResult<T>) -> GateResult<T> {
        self.execution_start()?;
        tracing::debug!(operation, connection = self.config.connection_name(), "operation started");

        let result = f(self);
        if let Err(err) = &result {
            self.log_failure(operation, err);
        }

        self.execution_end();
        tracing::debug!(operation, attempts = self.token.attempts(), rows = self.token.rows(), "operation ended");
        result
    }

    fn log_failure(&self, operation: &str, err: &GateError) {
        // Canceled operations were logged by the retry loop.
        if matches!(err, GateError::Canceled { .. }) {
            return;
        }
        tracing::warn!(
            operation,
            statement = self.token.statement().unwrap_or("unknown"),
            "unable to execute request"
        );
        tracing::error!(operation, error = %err, "operation failed");
    }

    fn provider_ref(&self) -> GateResult<&Provider> {
        self.provider
            .as_ref()
            .ok_or_else(|| GateError::provider("no live session"))
    }

    // -- entity adoption -----------------------------------------------------

    fn affect_entity(&mut self, entity: &EntityHandle) -> GateResult<()> {
        let provider = live(&mut self.provider)?;
        provider.set_shape(&entity.shape())?;
        let adopted = provider.managed_or_detached(entity)?;

        self.entity = Some(adopted);
        self.original_snapshot = None;
        self.refresh_primary_keys();
        Ok(())
    }

    fn append_entity(&mut self, entity: &EntityHandle) -> GateResult<()> {
        if !self.entity.as_ref().is_some_and(|e| e.ptr_eq(entity)) {
            self.affect_entity(entity)?;
        }
        let current = self
            .entity
            .clone()
            .ok_or_else(|| GateError::invalid_state("no current entity"))?;
        let marked = live(&mut self.provider)?.manage_entity(&current)?;
        if !marked.ptr_eq(&current) {
            self.entity = Some(marked);
        }
        Ok(())
    }

    fn fire_set_entity(&mut self, entity: &EntityHandle) -> GateResult<()> {
        if let Some(shape) = &self.typed_shape {
            let name = entity.shape();
            if name != *shape {
                return Err(GateError::invalid_state_for(
                    format!("unable to handle an entity of shape '{name}' in a manager for '{shape}'"),
                    describe(entity),
                ));
            }
        }
        self.append_entity(entity)
    }

    fn make_entity(&mut self) -> GateResult<EntityHandle> {
        let shape = self.provider_ref()?.shape()?;
        let entity = EntityHandle::new(shape.instantiate());
        self.affect_entity(&entity)?;
        self.entity
            .clone()
            .ok_or_else(|| GateError::reflection(shape.name(), "unable to create an instance"))
    }

    fn mark_as(&mut self, entity: &EntityHandle, state: EntityState) -> GateResult<EntityHandle> {
        let provider = live(&mut self.provider)?;
        let managed = provider.managed_or_detached(entity)?;
        provider
            .manage_entity_as(&managed, None, state)
            .inspect_err(|e| tracing::error!(entity = %describe(entity), %state, error = %e, "unable to mark entity"))
    }

    fn adopts_entities(&self) -> bool {
        self.typed_shape.is_none() && !self.provider.as_ref().is_some_and(Provider::has_shape)
    }

    pub(crate) fn identifier_of(&self, entity: &EntityHandle) -> Option<Identifier> {
        let shape = self.engine.shapes().get(&entity.shape())?;
        entity.read(|data| shape.identifier_of(data))
    }

    fn key_valid(&self, entity: &EntityHandle) -> bool {
        is_valid_identifier(self.identifier_of(entity).as_ref())
    }

    fn refresh_primary_keys(&mut self) {
        self.primary_keys = self.entity.as_ref().and_then(|entity| {
            let shape = self.engine.shapes().get(&entity.shape())?;
            Some(entity.read(|data| shape.key_values(data)))
        });
    }

    // -- data operations -----------------------------------------------------

    /// Loads an entity into the manager.
    ///
    /// Without an identifier the current entity's identifier is used.
    /// Returns `false` when no entity has that identifier.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error when no identifier is available and
    /// [`GateError::Canceled`] when the store keeps failing.
    pub fn load(&mut self, identifier: Option<Identifier>) -> GateResult<bool> {
        self.token.set_save_allowed(false);
        self.run("load", |gate| {
            let identifier = match identifier {
                Some(id) => id,
                None => gate.current_identifier()?,
            };
            gate.load_entity(&identifier)
        })
    }

    fn current_identifier(&self) -> GateResult<Identifier> {
        self.entity
            .as_ref()
            .and_then(|entity| self.identifier_of(entity))
            .filter(Identifier::is_valid)
            .ok_or_else(|| {
                GateError::invalid_state(format!("no identifier available for {}", self.table_name()))
            })
    }

    fn load_entity(&mut self, identifier: &Identifier) -> GateResult<bool> {
        let shape = self.provider_ref()?.shape()?;
        let found = retry::execute(self, "load", |gate| {
            Ok(live(&mut gate.provider)?
                .session_mut()?
                .find(shape.name(), identifier)?)
        })?;

        match found {
            Some(entity) => {
                self.append_entity(&entity)?;
                Ok(true)
            }
            None => {
                tracing::info!(shape = shape.name(), identifier = %identifier, "entity not found");
                Ok(false)
            }
        }
    }

    /// Lists every entity of the manager's shape.
    ///
    /// Intended for small tables; the engine decides how lazily rows are
    /// produced.
    ///
    /// # Errors
    ///
    /// Returns a provider error when the manager has no shape yet and
    /// [`GateError::Canceled`] when the store keeps failing.
    pub fn list(&mut self) -> GateResult<Box<dyn Iterator<Item = EntityHandle> + Send>> {
        self.token.set_save_allowed(false);
        self.run("list", |gate| {
            let shape = gate.provider_ref()?.shape()?;
            retry::execute(gate, "list", |gate| {
                Ok(live(&mut gate.provider)?.session_mut()?.list(shape.name())?)
            })
        })
    }

    /// Saves the current entity and whatever else the session holds.
    ///
    /// Returns `true` when rows were affected. A session without pending
    /// changes commits nothing.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error without a current entity, provider
    /// errors from reconciliation and [`GateError::Canceled`] when the store
    /// keeps failing.
    pub fn save(&mut self) -> GateResult<bool> {
        self.token.set_save_allowed(true);
        self.run("save", |gate| {
            gate.save_entity()?;
            gate.publish_changes();
            Ok(())
        })?;
        Ok(self.token.rows() > 0)
    }

    fn save_entity(&mut self) -> GateResult<()> {
        let entity = self
            .entity
            .clone()
            .ok_or_else(|| GateError::invalid_state("no entity to save"))?;
        if self.provider_ref()?.state_of(&entity)? == EntityState::Deleted {
            tracing::info!(entity = %describe(&entity), "deleting entity");
        } else {
            tracing::info!(entity = %describe(&entity), "saving entity");
        }
        retry::execute(self, "save", |gate| gate.save_attempt(&entity))
    }

    fn save_attempt(&mut self, entity: &EntityHandle) -> Result<(), AttemptFailure> {
        self.append_entity(entity)?;
        let current = self.entity.clone().unwrap_or_else(|| entity.clone());

        let provider = live(&mut self.provider)?;
        if !provider.has_changes()? {
            tracing::debug!(entity = %describe(&current), "no pending change");
            return Ok(());
        }
        let previous = provider.state_of(&current)?;

        let rows = match provider.save_changes(Some(&current), &self.token) {
            Ok(rows) => rows,
            Err(failure) => {
                if let AttemptFailure::Engine(err) = &failure {
                    if err.is_concurrency_conflict() {
                        tracing::warn!(entity = %describe(&current), "concurrency conflict, reloading entity");
                        if let Err(reload) = provider.refresh(&current) {
                            tracing::error!(error = %reload, "unable to reload entity");
                        }
                    }
                }
                provider.tracking_mut().clear();
                return Err(failure);
            }
        };

        self.refresh_after_save(i64::try_from(rows).unwrap_or(i64::MAX), previous);
        Ok(())
    }

    fn refresh_after_save(&mut self, rows: i64, previous: EntityState) {
        let rows = match previous {
            EntityState::Added => {
                self.refresh_primary_keys();
                rows
            }
            EntityState::Deleted if rows < 1 => 1,
            _ => rows,
        };
        self.token.set_rows(rows);
        tracing::info!(rows, state = %previous, "entity saved");
    }

    fn publish_changes(&self) {
        if !self.config.notifications() || !self.token.save_allowed() || self.token.rows() <= 0 {
            return;
        }
        let Some(subscriber) = &self.subscriber else {
            tracing::debug!("notifications enabled without subscriber");
            return;
        };
        let Some(provider) = &self.provider else {
            return;
        };

        for tracked in provider.tracking().changed_entries() {
            let Some(kind) = ChangeKind::from_state(tracked.state()) else {
                continue;
            };
            // The main entity carries the keys generated by the store.
            let entity = match (&self.entity, tracked.is_primary()) {
                (Some(current), true) if kind != ChangeKind::Delete => current,
                _ => tracked.entity(),
            };
            subscriber.publish(ChangeNotice::new(
                self.config.connection_name(),
                kind,
                self.identifier_of(entity),
                entity.snapshot(),
            ));
        }
    }

    /// Marks the current entity deleted and saves.
    ///
    /// A new entity has nothing stored, so it is neither marked deleted nor
    /// saved: it is only dropped from the session, stays the current entity,
    /// and `false` is returned.
    ///
    /// # Errors
    ///
    /// As [`EntityGate::save`].
    pub fn delete(&mut self) -> GateResult<bool> {
        let entity = self
            .entity
            .clone()
            .ok_or_else(|| GateError::invalid_state("no entity to delete"))?;
        if self.is_new_entity() {
            self.run("delete", |gate| gate.forget_entity(&entity))?;
            tracing::info!(entity = %describe(&entity), "new entity deleted before being saved");
            return Ok(false);
        }

        let marked = self.delete_entity(&entity)?;
        self.entity = Some(marked);
        self.save()
    }

    fn forget_entity(&mut self, entity: &EntityHandle) -> GateResult<()> {
        let current = self.entity.clone().unwrap_or_else(|| entity.clone());
        live(&mut self.provider)?
            .session_mut()?
            .set_state(&current, EntityState::Detached)
            .map_err(|e| GateError::provider_with("unable to drop new entity", e))
    }

    /// Marks `entity` deleted without saving.
    ///
    /// Returns the instance that was marked, which is the session's own
    /// instance when it already tracks one with the same identifier.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the session refuses the state.
    pub fn delete_entity(&mut self, entity: &EntityHandle) -> GateResult<EntityHandle> {
        self.run("delete", |gate| {
            if gate.adopts_entities() {
                gate.fire_set_entity(entity)?;
            }
            gate.mark_as(entity, EntityState::Deleted)
        })
    }

    /// Records `entity` as added (no valid key) or modified, without saving.
    ///
    /// A manager that does not know its shape yet adopts the entity as its
    /// current entity instead.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the session refuses the state.
    pub fn apply(&mut self, entity: &EntityHandle) -> GateResult<EntityHandle> {
        self.run("apply", |gate| {
            if gate.adopts_entities() {
                gate.fire_set_entity(entity)?;
                return gate
                    .entity
                    .clone()
                    .ok_or_else(|| GateError::invalid_state("no current entity"));
            }
            let state = apply_state(gate.key_valid(entity));
            gate.mark_as(entity, state)
        })
    }

    /// Creates a fresh entity of the manager's shape and makes it current.
    ///
    /// # Errors
    ///
    /// Returns a provider error when the manager has no shape yet.
    pub fn new_entity(&mut self) -> GateResult<EntityHandle> {
        self.token.set_save_allowed(true);
        self.run("new entity", Self::make_entity)
    }

    /// Makes `entity` the current entity.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error if the manager is bound to another
    /// shape.
    pub fn set_entity(&mut self, entity: &EntityHandle) -> GateResult<()> {
        self.run("set entity", |gate| gate.fire_set_entity(entity))
    }

    /// The current entity, created if there is none.
    ///
    /// # Errors
    ///
    /// Returns a provider error when an entity must be created but the
    /// manager has no shape.
    pub fn entity(&mut self) -> GateResult<EntityHandle> {
        if let Some(entity) = &self.entity {
            return Ok(entity.clone());
        }
        self.execution_start()?;
        self.make_entity()
    }

    /// The current entity, if any, without creating one.
    #[must_use]
    pub fn current_entity(&self) -> Option<&EntityHandle> {
        self.entity.as_ref()
    }

    /// Returns true if there is a current entity.
    #[must_use]
    pub fn has_entity(&self) -> bool {
        self.entity.is_some()
    }

    /// Returns true if the current entity has no valid key.
    #[must_use]
    pub fn is_new_entity(&self) -> bool {
        !self.entity.as_ref().is_some_and(|e| self.key_valid(e))
    }

    // -- entity information --------------------------------------------------

    /// Original values of the current entity.
    ///
    /// Only modified fields are returned unless `all_fields` is set. A new
    /// entity has none. When the token asks for original values to be kept,
    /// the first result is cached until the operation ends or the current
    /// entity changes.
    ///
    /// # Errors
    ///
    /// Returns a provider error if the session cannot report the values.
    pub fn original_values(&mut self, all_fields: bool) -> GateResult<Vec<(String, Value)>> {
        if let Some(cached) = &self.original_snapshot {
            return Ok(cached.clone());
        }
        let (Some(provider), Some(entity)) = (&self.provider, &self.entity) else {
            return Ok(Vec::new());
        };

        let values = if self.is_new_entity() || provider.state_of(entity)? == EntityState::Detached {
            Vec::new()
        } else {
            provider.original_values(entity, all_fields)?
        };
        if self.token.save_original_values() {
            self.original_snapshot = Some(values.clone());
        }
        Ok(values)
    }

    /// `(key field, value)` pairs of the current entity.
    ///
    /// # Errors
    ///
    /// Returns a reflection error if the entity's shape is not registered.
    pub fn primary_keys(&mut self) -> GateResult<Vec<(String, Value)>> {
        if let Some(keys) = &self.primary_keys {
            return Ok(keys.clone());
        }
        let Some(entity) = &self.entity else {
            return Ok(Vec::new());
        };
        let name = entity.shape();
        let shape = self
            .engine
            .shapes()
            .require(&name)
            .map_err(|e| GateError::reflection_with(name, e))?;
        let keys = entity.read(|data| shape.key_values(data));
        self.primary_keys = Some(keys.clone());
        Ok(keys)
    }

    /// The first key of the current entity.
    ///
    /// # Errors
    ///
    /// As [`EntityGate::primary_keys`].
    pub fn primary_key(&mut self) -> GateResult<Option<(String, Value)>> {
        let key = self.primary_keys()?.into_iter().next();
        if key.is_none() {
            tracing::warn!(table = %self.table_name(), "no primary key found");
        }
        Ok(key)
    }

    /// Value of a declared field of the current entity.
    #[must_use]
    pub fn field_value(&self, name: &str) -> Option<Value> {
        let entity = self.entity.as_ref()?;
        let shape = self.engine.shapes().get(&entity.shape())?;
        shape.field(name).map(|_| entity.get(name))
    }

    /// Table of the manager's shape.
    #[must_use]
    pub fn table_name(&self) -> String {
        let name = self
            .provider
            .as_ref()
            .and_then(|p| p.shape().ok())
            .map(|shape| shape.name().to_string())
            .or_else(|| self.entity.as_ref().map(EntityHandle::shape))
            .or_else(|| self.typed_shape.clone())
            .unwrap_or_default();
        self.engine
            .shapes()
            .get(&name)
            .map_or(name, |shape| shape.table().to_string())
    }

    /// Human readable description of the current entity.
    ///
    /// Uses the name field of nameable shapes, else `key=value` of the
    /// first key, `key=NewKey` for new entities.
    #[must_use]
    pub fn friendly_name(&self) -> String {
        let Some(entity) = &self.entity else {
            return format!("Virtual entity of {}", self.table_name());
        };
        let Some(shape) = self.engine.shapes().get(&entity.shape()) else {
            return entity.shape();
        };
        if let Some(name) = entity.read(|data| shape.name_of(data)) {
            return name;
        }

        let is_new = self.is_new_entity();
        entity
            .read(|data| shape.key_values(data))
            .into_iter()
            .next()
            .map_or_else(
                || shape.name().to_string(),
                |(key, value)| {
                    if is_new {
                        format!("{key}=NewKey")
                    } else {
                        format!("{key}={value}")
                    }
                },
            )
    }

    // -- session control -----------------------------------------------------

    /// Raw access to the live session.
    ///
    /// Once the session has been handed out the manager no longer controls
    /// it: lazy loading is switched off and the manager stops tracking for
    /// the rest of its life.
    ///
    /// # Errors
    ///
    /// Returns an error if no session can be opened.
    pub fn session(&mut self) -> GateResult<&mut (dyn Session + 'static)> {
        self.execution_start()?;
        self.original_snapshot = None;
        let provider = live(&mut self.provider)?;
        provider.set_lazy_loading(false);
        provider.no_tracking(&mut self.token);
        Ok(&mut **provider.session_mut()?)
    }

    /// Stops tracking: the tracking set is never replayed again.
    pub fn no_tracking(&mut self) {
        self.token.set_tracked(false);
        if let Some(provider) = self.provider.as_mut() {
            provider.no_tracking(&mut self.token);
        }
        self.original_snapshot = None;
    }

    /// Enables or disables lazy loading of related entities.
    ///
    /// # Errors
    ///
    /// Returns an error if no session can be opened.
    pub fn set_lazy_loading(&mut self, enabled: bool) -> GateResult<()> {
        self.check_provider()?;
        live(&mut self.provider)?.set_lazy_loading(enabled);
        Ok(())
    }

    /// Releases the session and every tracked entity.
    ///
    /// Any later operation fails with [`GateError::Disposed`].
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(mut provider) = self.provider.take() {
            provider.tracking_mut().clear();
        }
        self.original_snapshot = None;
        self.primary_keys = None;
        self.disposed = true;
        tracing::debug!(connection = self.config.connection_name(), "manager disposed");
    }

    /// Returns true once [`EntityGate::dispose`] has run.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    // -- suspend -------------------------------------------------------------

    /// Captures the manager's state so it can be rebuilt elsewhere.
    ///
    /// The current entity is attached first if the session does not know
    /// it, opening a session if none exists yet, then the session's change
    /// set is captured. The manager stays usable.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Disposed`] after disposal and provider errors
    /// raised while capturing.
    pub fn suspend(&mut self) -> GateResult<PortableState> {
        if self.disposed {
            return Err(GateError::Disposed);
        }
        // A resumed manager needs its current entity among the entries.
        if self.provider.is_none() && self.entity.is_some() {
            self.check_provider()?;
        }

        if self.provider.is_some() {
            if let Some(entity) = self.entity.clone() {
                if self.provider_ref()?.state_of(&entity)? == EntityState::Detached {
                    self.append_entity(&entity)?;
                }
            }
            let main = self.entity.clone();
            live(&mut self.provider)?.capture_tracking(main.as_ref(), &self.token)?;
            self.check_auto_save_original_values()?;
        }

        let (shape, lazy_loading, entries) = match self.provider.as_mut() {
            Some(provider) => {
                let entries = provider
                    .tracking()
                    .iter()
                    .map(|t| PortableEntry {
                        entity: t.entity().snapshot(),
                        state: t.state(),
                        primary: t.is_primary(),
                    })
                    .collect();
                provider.tracking_mut().clear();
                let shape = provider.shape().ok().map(|s| s.name().to_string());
                (shape, provider.lazy_loading(), entries)
            }
            None => (self.typed_shape.clone(), self.config.lazy_loading(), Vec::new()),
        };

        tracing::info!(entity = %self.friendly_name(), entries = entries.len(), "manager suspended");
        Ok(PortableState {
            connection: self.config.to_connection(),
            token: self.token.clone(),
            shape,
            typed: self.typed_shape.is_some(),
            lazy_loading,
            entries,
            original_values: self.original_snapshot.clone(),
        })
    }

    fn check_auto_save_original_values(&mut self) -> GateResult<()> {
        if !self.token.is_tracked() {
            return Ok(());
        }
        if self.config.automatic_original_values() {
            let archival = self
                .entity
                .as_ref()
                .and_then(|e| self.engine.shapes().get(&e.shape()))
                .is_some_and(|shape| shape.capabilities().archival);
            let previous = self.token.save_original_values();
            self.token.set_save_original_values(archival);
            if previous && !archival {
                self.original_snapshot = None;
            }
        }
        if self.token.save_original_values() && self.original_snapshot.is_none() {
            self.original_values(false)?;
        }
        Ok(())
    }

    // -- accessors -----------------------------------------------------------

    /// Token of the last operation.
    #[must_use]
    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    /// Asks the manager to keep original values of the current entity.
    pub fn set_save_original_values(&mut self, enabled: bool) {
        self.token.set_save_original_values(enabled);
        if !enabled {
            self.original_snapshot = None;
        }
    }

    /// Configuration of the manager.
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Mutable configuration. Changes that affect the session take effect
    /// at the start of the next operation.
    pub fn config_mut(&mut self) -> &mut ClientConfig {
        &mut self.config
    }
}

impl RetryContext for EntityGate {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config)
    }

    fn token_mut(&mut self) -> &mut SessionToken {
        &mut self.token
    }

    fn pause(&self, delay: Duration) {
        self.sleeper.sleep(delay);
    }

    fn last_statement(&self) -> Option<String> {
        self.provider.as_ref().and_then(Provider::last_statement)
    }
}

impl Drop for EntityGate {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigate_engine::{EntityData, InMemoryEngine, ShapeDescriptor, ShapeRegistry};

    fn engine() -> InMemoryEngine {
        let mut shapes = ShapeRegistry::new();
        shapes
            .define(
                ShapeDescriptor::builder("customer")
                    .table("customers")
                    .key("id", 0)
                    .field("name", "")
                    .nameable("name")
                    .archival(),
            )
            .unwrap();
        shapes
            .define(ShapeDescriptor::builder("tag").key("id", 0).field("label", ""))
            .unwrap();
        InMemoryEngine::new(shapes)
    }

    fn builder(engine: &InMemoryEngine) -> GateBuilder {
        EntityGate::builder(Arc::new(engine.clone())).with_config(
            ClientConfig::new()
                .with_connection("Main", "mem://main")
                .with_attempt_delay(Duration::from_millis(1)),
        )
    }

    #[test]
    fn build_requires_config() {
        let engine = engine();
        let err = EntityGate::builder(Arc::new(engine)).build().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn build_rejects_unknown_shape() {
        let engine = engine();
        let err = builder(&engine).with_shape("invoice").build().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Reflection);
    }

    #[test]
    fn typed_gate_rejects_other_shapes() {
        let engine = engine();
        let mut gate = builder(&engine).with_shape("customer").build().unwrap();
        let tag = EntityHandle::new(EntityData::new("tag").with("id", 1));
        let err = gate.set_entity(&tag).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidState);
    }

    #[test]
    fn no_session_until_first_operation() {
        let engine = engine();
        let mut gate = builder(&engine).with_shape("customer").build().unwrap();
        assert_eq!(engine.sessions_opened(), 0);
        gate.new_entity().unwrap();
        gate.new_entity().unwrap();
        assert_eq!(engine.sessions_opened(), 1);
    }

    #[test]
    fn generic_gate_without_shape_cannot_create() {
        let engine = engine();
        let mut gate = builder(&engine).build().unwrap();
        let err = gate.new_entity().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Provider);
        assert_eq!(gate.friendly_name(), "Virtual entity of ");
    }

    #[test]
    fn load_without_identifier_fails() {
        let engine = engine();
        let mut gate = builder(&engine).with_shape("customer").build().unwrap();
        let err = gate.load(None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidState);
    }

    #[test]
    fn load_missing_returns_false() {
        let engine = engine();
        let mut gate = builder(&engine).with_shape("customer").build().unwrap();
        assert!(!gate.load(Some(Identifier::from(42))).unwrap());
        assert!(!gate.has_entity());
        assert_eq!(gate.token().attempts(), 1);
        assert!(!gate.token().save_allowed());
    }

    #[test]
    fn friendly_names() {
        let engine = engine();
        engine.seed(EntityData::new("tag").with("id", 3).with("label", "red")).unwrap();

        let mut gate = builder(&engine).with_shape("tag").build().unwrap();
        assert_eq!(gate.friendly_name(), "Virtual entity of tag");
        gate.new_entity().unwrap();
        assert_eq!(gate.friendly_name(), "id=NewKey");
        assert!(gate.load(Some(Identifier::from(3))).unwrap());
        assert_eq!(gate.friendly_name(), "id=3");

        let mut gate = builder(&engine).with_shape("customer").build().unwrap();
        let customer = gate.new_entity().unwrap();
        customer.set("name", "Ada");
        assert_eq!(gate.friendly_name(), "Ada");
        assert_eq!(gate.table_name(), "customers");
    }

    #[test]
    fn field_value_requires_declared_field() {
        let engine = engine();
        let mut gate = builder(&engine).with_shape("tag").build().unwrap();
        gate.new_entity().unwrap().set("label", "blue");
        assert_eq!(gate.field_value("label"), Some(Value::from("blue")));
        assert_eq!(gate.field_value("colour"), None);
    }

    #[test]
    fn apply_marks_by_key() {
        let engine = engine();
        engine.seed(EntityData::new("tag").with("id", 3).with("label", "red")).unwrap();
        let mut gate = builder(&engine).with_shape("tag").build().unwrap();

        let fresh = EntityHandle::new(EntityData::new("tag").with("id", 0).with("label", "new"));
        let existing = EntityHandle::new(EntityData::new("tag").with("id", 3).with("label", "blue"));
        gate.apply(&fresh).unwrap();
        gate.apply(&existing).unwrap();

        let session = gate.session().unwrap();
        assert_eq!(session.state_of(&fresh), EntityState::Added);
        assert_eq!(session.state_of(&existing), EntityState::Modified);
        assert!(!gate.token().is_tracked());
    }

    #[test]
    fn generic_apply_adopts_entity() {
        let engine = engine();
        let mut gate = builder(&engine).build().unwrap();
        let tag = EntityHandle::new(EntityData::new("tag").with("id", 0));

        let current = gate.apply(&tag).unwrap();
        assert!(current.ptr_eq(&tag));
        assert!(gate.current_entity().is_some_and(|e| e.ptr_eq(&tag)));
        assert_eq!(gate.table_name(), "tag");
    }

    #[test]
    fn original_values_are_cached_when_requested() {
        let engine = engine();
        let id = engine
            .seed(EntityData::new("customer").with("id", 9).with("name", "Ada"))
            .unwrap();
        let mut gate = builder(&engine).with_shape("customer").build().unwrap();
        assert!(gate.load(Some(id)).unwrap());
        let customer = gate.entity().unwrap();

        gate.set_save_original_values(true);
        customer.set("name", "Grace");
        let first = gate.original_values(false).unwrap();
        assert_eq!(first, vec![("name".to_string(), Value::from("Ada"))]);

        customer.set("name", "Lin");
        assert_eq!(gate.original_values(false).unwrap(), first);
    }

    #[test]
    fn new_entity_has_no_original_values() {
        let engine = engine();
        let mut gate = builder(&engine).with_shape("customer").build().unwrap();
        gate.new_entity().unwrap();
        assert!(gate.original_values(true).unwrap().is_empty());
    }

    #[test]
    fn disposed_gate_refuses_work() {
        let engine = engine();
        let mut gate = builder(&engine).with_shape("tag").build().unwrap();
        gate.new_entity().unwrap();
        gate.dispose();
        gate.dispose();

        assert!(gate.is_disposed());
        assert!(matches!(gate.save(), Err(GateError::Disposed)));
        assert!(matches!(gate.suspend(), Err(GateError::Disposed)));
    }

    #[test]
    fn primary_key_follows_current_entity() {
        let engine = engine();
        let mut gate = builder(&engine).with_shape("tag").build().unwrap();
        assert!(gate.primary_key().unwrap().is_none());

        gate.new_entity().unwrap();
        assert_eq!(gate.primary_key().unwrap(), Some(("id".to_string(), Value::Integer(0))));
        assert!(gate.save().unwrap());
        assert_eq!(gate.primary_key().unwrap(), Some(("id".to_string(), Value::Integer(1))));
    }
}
