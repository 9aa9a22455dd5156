//! Session ownership and reconciliation against the live session.
//!
//! The provider owns the manager's session and tracking set. It knows the
//! shape the manager works with and applies the target-state rules of
//! [`crate::reconcile`] to the session.

use crate::config::ClientConfig;
use crate::detached::DetachedCopy;
use crate::error::{GateError, GateResult};
use crate::reconcile::{check_target, target_state};
use crate::retry::AttemptFailure;
use crate::token::SessionToken;
use crate::tracking::{describe, TrackingSet};
use entigate_engine::{
    is_valid_identifier, EngineError, EntityHandle, EntityState, Identifier, MappingEngine,
    Session, ShapeDescriptor, Value,
};
use std::sync::Arc;

pub(crate) struct Provider {
    engine: Arc<dyn MappingEngine>,
    copier: Arc<dyn DetachedCopy>,
    session: Option<Box<dyn Session>>,
    tracking: TrackingSet,
    shape: Option<Arc<ShapeDescriptor>>,
    lazy_loading: bool,
}

impl Provider {
    pub(crate) fn new(
        engine: Arc<dyn MappingEngine>,
        copier: Arc<dyn DetachedCopy>,
        lazy_loading: bool,
    ) -> Self {
        Self {
            engine,
            copier,
            session: None,
            tracking: TrackingSet::new(),
            shape: None,
            lazy_loading,
        }
    }

    /// Makes sure a session matching `config` is live.
    ///
    /// A new session is opened when there is none or the configuration
    /// changed. A fresh session replays the tracking set when the token is
    /// tracked; an untracked token always leaves the set empty.
    pub(crate) fn initialize(&mut self, config: &mut ClientConfig, token: &mut SessionToken) -> GateResult<()> {
        if self.session.is_none() || config.is_changed() {
            self.open_session(config)?;
            self.replay_tracking(token)?;
        }
        if !token.is_tracked() {
            self.tracking.clear();
        }
        Ok(())
    }

    fn open_session(&mut self, config: &mut ClientConfig) -> GateResult<()> {
        if let Some(expected) = config.provider() {
            if !expected.eq_ignore_ascii_case(self.engine.name()) {
                return Err(GateError::configuration(format!(
                    "connection '{}' expects provider '{expected}', engine is '{}'",
                    config.connection_name(),
                    self.engine.name()
                )));
            }
        }

        let mut session = self
            .engine
            .open_session(&config.to_session_settings())
            .map_err(|e| GateError::provider_with("unable to open a session", e))?;
        session.set_lazy_loading_enabled(self.lazy_loading);
        self.session = Some(session);
        config.mark_synchronized();
        tracing::debug!(connection = config.connection_name(), engine = self.engine.name(), "session opened");
        Ok(())
    }

    fn replay_tracking(&mut self, token: &mut SessionToken) -> GateResult<()> {
        if self.tracking.is_empty() || !token.is_tracked() {
            return Ok(());
        }

        token.set_tracked(false);
        let result = self.replay_entries();
        token.set_tracked(true);
        result
    }

    fn replay_entries(&mut self) -> GateResult<()> {
        let collapsed = self.tracking.collapse_empty_collections(self.engine.shapes());
        let entries: Vec<(EntityHandle, EntityState)> = self
            .tracking
            .iter()
            .map(|t| (t.entity().clone(), t.state()))
            .collect();
        tracing::debug!(entries = entries.len(), collapsed, "replaying tracked entities");

        for (entity, state) in entries {
            self.manage_entity_as(&entity, None, state)?;
        }
        Ok(())
    }

    /// Changes the shape the provider works with.
    pub(crate) fn set_shape(&mut self, name: &str) -> GateResult<Arc<ShapeDescriptor>> {
        if let Some(shape) = self.shape.as_ref().filter(|s| s.name() == name) {
            return Ok(Arc::clone(shape));
        }
        let shape = self
            .engine
            .shapes()
            .require(name)
            .map_err(|e| GateError::reflection_with(name, e))?;
        tracing::info!(shape = name, "entity shape selected");
        self.shape = Some(Arc::clone(&shape));
        Ok(shape)
    }

    pub(crate) fn has_shape(&self) -> bool {
        self.shape.is_some()
    }

    /// The shape the provider works with.
    pub(crate) fn shape(&self) -> GateResult<Arc<ShapeDescriptor>> {
        self.shape
            .clone()
            .ok_or_else(|| GateError::provider("entity shape undefined"))
    }

    /// Shape describing `entity`: the tracked shape when it matches, else
    /// the registered one.
    pub(crate) fn shape_of(&self, entity: &EntityHandle) -> GateResult<Arc<ShapeDescriptor>> {
        let name = entity.shape();
        if let Some(shape) = self.shape.as_ref().filter(|s| s.name() == name) {
            return Ok(Arc::clone(shape));
        }
        self.engine
            .shapes()
            .require(&name)
            .map_err(|e| GateError::reflection_with(name, e))
    }

    pub(crate) fn identifier_of(&self, entity: &EntityHandle) -> Option<Identifier> {
        let shape = self.shape_of(entity).ok()?;
        entity.read(|data| shape.identifier_of(data))
    }

    pub(crate) fn key_valid(&self, entity: &EntityHandle) -> bool {
        is_valid_identifier(self.identifier_of(entity).as_ref())
    }

    pub(crate) fn session_mut(&mut self) -> GateResult<&mut Box<dyn Session>> {
        self.session
            .as_mut()
            .ok_or_else(|| GateError::provider("no live session"))
    }

    fn session_ref(&self) -> GateResult<&dyn Session> {
        self.session
            .as_deref()
            .ok_or_else(|| GateError::provider("no live session"))
    }

    pub(crate) fn state_of(&self, entity: &EntityHandle) -> GateResult<EntityState> {
        Ok(self.session_ref()?.state_of(entity))
    }

    pub(crate) fn last_statement(&self) -> Option<String> {
        self.session.as_ref().and_then(|s| s.last_statement())
    }

    pub(crate) fn tracking(&self) -> &TrackingSet {
        &self.tracking
    }

    pub(crate) fn tracking_mut(&mut self) -> &mut TrackingSet {
        &mut self.tracking
    }

    pub(crate) fn lazy_loading(&self) -> bool {
        self.lazy_loading
    }

    pub(crate) fn set_lazy_loading(&mut self, enabled: bool) {
        self.lazy_loading = enabled;
        if let Some(session) = self.session.as_mut() {
            session.set_lazy_loading_enabled(enabled);
        }
        tracing::debug!(enabled, "lazy loading changed");
    }

    /// Stops tracking: the set is cleared and never replayed again.
    pub(crate) fn no_tracking(&mut self, token: &mut SessionToken) {
        token.set_tracked(false);
        self.tracking.clear();
    }

    /// Another instance with the same shape and identifier that the session
    /// already tracks. When `update_values` is set the values of `entity`
    /// are copied onto it.
    fn tracked_instance(&mut self, entity: &EntityHandle, update_values: bool) -> GateResult<Option<EntityHandle>> {
        let Some(id) = self.identifier_of(entity).filter(Identifier::is_valid) else {
            return Ok(None);
        };
        let shape = entity.shape();
        let session = self.session_mut()?;
        let found = session.entries().into_iter().map(|e| e.entity).find(|candidate| {
            !candidate.ptr_eq(entity)
                && candidate.shape() == shape
                && session
                    .shapes()
                    .get(&shape)
                    .and_then(|s| candidate.read(|data| s.identifier_of(data)))
                    .as_ref()
                    == Some(&id)
        });

        if let (Some(tracked), true) = (&found, update_values) {
            session
                .set_current_values(tracked, &entity.snapshot())
                .map_err(|e| GateError::provider_with("unable to copy values to the tracked instance", e))?;
        }
        Ok(found)
    }

    /// Returns `entity` if the session knows it, else the session-tracked
    /// instance with the same identifier, else a detached copy.
    pub(crate) fn managed_or_detached(&mut self, entity: &EntityHandle) -> GateResult<EntityHandle> {
        if self.state_of(entity)? != EntityState::Detached {
            return Ok(entity.clone());
        }
        if let Some(tracked) = self.tracked_instance(entity, true)? {
            return Ok(tracked);
        }
        let target = match &self.shape {
            Some(shape) => Arc::clone(shape),
            None => self.shape_of(entity)?,
        };
        self.copier.detached_copy(entity, &target)
    }

    /// Records the state the entity must be saved with.
    pub(crate) fn manage_entity(&mut self, entity: &EntityHandle) -> GateResult<EntityHandle> {
        let current = self.state_of(entity)?;
        let target = target_state(current, self.key_valid(entity));
        self.manage_entity_as(entity, Some(current), target)
    }

    /// Records `target` for `entity` and returns the instance that was
    /// actually marked.
    pub(crate) fn manage_entity_as(
        &mut self,
        entity: &EntityHandle,
        current: Option<EntityState>,
        target: EntityState,
    ) -> GateResult<EntityHandle> {
        tracing::debug!(entity = %describe(entity), state = %target, "changing entity state");
        check_target(target, &describe(entity))?;

        let current = match current {
            Some(state) => Some(state),
            None if target != EntityState::Added => Some(self.state_of(entity)?),
            None => None,
        };

        let entity = if current == Some(EntityState::Detached) {
            self.tracked_instance(entity, target != EntityState::Deleted)?
                .unwrap_or_else(|| entity.clone())
        } else {
            entity.clone()
        };

        self.session_mut()?.set_state(&entity, target).map_err(|e| GateError::Provider {
            message: format!("unable to mark entity as {target}"),
            entity: Some(describe(&entity)),
            source: Some(e),
        })?;
        Ok(entity)
    }

    pub(crate) fn has_changes(&mut self) -> GateResult<bool> {
        Ok(self.session_mut()?.has_pending_changes())
    }

    /// Fills the tracking set from the session's change set.
    ///
    /// A tracked token captures every changed entry plus the main entity;
    /// otherwise only the main entity is captured. Lazy loading is off while
    /// values are read.
    pub(crate) fn capture_tracking(&mut self, main: Option<&EntityHandle>, token: &SessionToken) -> GateResult<()> {
        let lazy_loading = self.lazy_loading;
        self.set_lazy_loading(false);
        let result = self.capture_entries(main, token.is_tracked());
        self.set_lazy_loading(lazy_loading);

        result.map_err(|e| {
            tracing::error!(error = %e, "failed to track entities");
            match e {
                GateError::Provider { .. } => e,
                other => GateError::provider(format!("failed to track entities: {other}")),
            }
        })
    }

    fn capture_entries(&mut self, main: Option<&EntityHandle>, tracked: bool) -> GateResult<()> {
        let session = self
            .session
            .as_deref()
            .ok_or_else(|| GateError::provider("no live session"))?;
        let is_main = |entity: &EntityHandle| main.is_some_and(|m| m.ptr_eq(entity));

        let selected: Vec<(EntityHandle, EntityState)> = if tracked {
            session
                .entries()
                .into_iter()
                .filter(|e| e.state != EntityState::Unchanged || is_main(&e.entity))
                .map(|e| (e.entity, e.state))
                .collect()
        } else {
            main.map(|m| (m.clone(), session.state_of(m))).into_iter().collect()
        };

        let mut copies = Vec::with_capacity(selected.len());
        for (entity, state) in selected {
            let values = if state == EntityState::Deleted {
                session.original_values(&entity)
            } else {
                session.current_values(&entity)
            }
            .map_err(|e| GateError::Provider {
                message: "unable to read tracked values".to_string(),
                entity: Some(describe(&entity)),
                source: Some(e),
            })?;
            copies.push((EntityHandle::new(values), state, is_main(&entity)));
        }

        for (copy, state, primary) in copies {
            self.tracking.mark(copy, state, primary)?;
        }
        Ok(())
    }

    /// Commits the session.
    ///
    /// The tracking set is captured first when empty; an empty set after
    /// capture means nothing can be committed.
    pub(crate) fn save_changes(
        &mut self,
        main: Option<&EntityHandle>,
        token: &SessionToken,
    ) -> Result<usize, AttemptFailure> {
        if self.tracking.is_empty() {
            self.capture_tracking(main, token)?;
        }
        if self.tracking.is_empty() {
            return Err(GateError::provider("no tracked entity to save").into());
        }
        Ok(self.session_mut()?.commit()?)
    }

    /// Reloads `entity` from the store.
    pub(crate) fn refresh(&mut self, entity: &EntityHandle) -> Result<(), EngineError> {
        match self.session.as_mut() {
            Some(session) => session.reload(entity),
            None => Ok(()),
        }
    }

    /// Original values of `entity`; only the modified fields unless `all`.
    pub(crate) fn original_values(&self, entity: &EntityHandle, all: bool) -> GateResult<Vec<(String, Value)>> {
        let session = self.session_ref()?;
        let wrap = |e| GateError::Provider {
            message: "unable to read original values".to_string(),
            entity: Some(describe(entity)),
            source: Some(e),
        };
        let original = session.original_values(entity).map_err(wrap)?;
        let names = if all {
            original.fields.keys().cloned().collect()
        } else {
            session.modified_fields(entity).map_err(wrap)?
        };
        Ok(names
            .into_iter()
            .map(|name| {
                let value = original.get(&name);
                (name, value)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detached::ShapeCopier;
    use entigate_engine::{EntityData, InMemoryEngine, ShapeRegistry};

    fn engine() -> InMemoryEngine {
        let mut shapes = ShapeRegistry::new();
        shapes
            .define(
                ShapeDescriptor::builder("customer")
                    .key("id", 0)
                    .field("name", "")
                    .collection("orders"),
            )
            .unwrap();
        InMemoryEngine::new(shapes)
    }

    fn open(engine: &InMemoryEngine) -> (Provider, ClientConfig, SessionToken) {
        let mut provider = Provider::new(Arc::new(engine.clone()), Arc::new(ShapeCopier::new()), true);
        let mut config = ClientConfig::new().with_connection("Main", "mem://main");
        let mut token = SessionToken::new();
        provider.initialize(&mut config, &mut token).unwrap();
        provider.set_shape("customer").unwrap();
        (provider, config, token)
    }

    fn customer(id: i64, name: &str) -> EntityHandle {
        EntityHandle::new(EntityData::new("customer").with("id", id).with("name", name))
    }

    #[test]
    fn provider_mismatch_is_configuration_error() {
        let engine = engine();
        let mut provider = Provider::new(Arc::new(engine), Arc::new(ShapeCopier::new()), true);
        let mut config = ClientConfig::new()
            .with_connection("Main", "mem://main")
            .with_provider("sqlserver");
        let err = provider
            .initialize(&mut config, &mut SessionToken::new())
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn changed_config_opens_new_session() {
        let engine = engine();
        let (mut provider, mut config, mut token) = open(&engine);
        provider.initialize(&mut config, &mut token).unwrap();
        assert_eq!(engine.sessions_opened(), 1);

        config.set_max_attempts(2).unwrap();
        provider.initialize(&mut config, &mut token).unwrap();
        assert_eq!(engine.sessions_opened(), 2);
        assert!(!config.is_changed());
    }

    #[test]
    fn unknown_shape_is_reflection_error() {
        let engine = engine();
        let (mut provider, _, _) = open(&engine);
        let err = provider.set_shape("invoice").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Reflection);
    }

    #[test]
    fn manage_new_entity_marks_added() {
        let engine = engine();
        let (mut provider, _, _) = open(&engine);
        let entity = customer(0, "Ada");

        provider.manage_entity(&entity).unwrap();
        assert_eq!(provider.state_of(&entity).unwrap(), EntityState::Added);
    }

    #[test]
    fn manage_detached_entity_marks_modified() {
        let engine = engine();
        engine.seed(EntityData::new("customer").with("id", 5).with("name", "Ada")).unwrap();
        let (mut provider, _, _) = open(&engine);
        let entity = customer(5, "Grace");

        provider.manage_entity(&entity).unwrap();
        assert_eq!(provider.state_of(&entity).unwrap(), EntityState::Modified);
    }

    #[test]
    fn marking_reuses_tracked_instance() {
        let engine = engine();
        let id = engine.seed(EntityData::new("customer").with("id", 5).with("name", "Ada")).unwrap();
        let (mut provider, _, _) = open(&engine);
        let loaded = provider.session_mut().unwrap().find("customer", &id).unwrap().unwrap();

        let outsider = customer(5, "Grace");
        let marked = provider
            .manage_entity_as(&outsider, None, EntityState::Modified)
            .unwrap();
        assert!(marked.ptr_eq(&loaded));
        assert_eq!(loaded.get("name").as_text(), Some("Grace"));

        let deleted = provider
            .manage_entity_as(&customer(5, "Hopper"), None, EntityState::Deleted)
            .unwrap();
        assert!(deleted.ptr_eq(&loaded));
        assert_eq!(loaded.get("name").as_text(), Some("Grace"));
        assert_eq!(provider.state_of(&loaded).unwrap(), EntityState::Deleted);
    }

    #[test]
    fn detached_target_is_provider_error() {
        let engine = engine();
        let (mut provider, _, _) = open(&engine);
        let err = provider
            .manage_entity_as(&customer(1, "Ada"), None, EntityState::Detached)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Provider);
    }

    #[test]
    fn capture_tracked_takes_changes_and_main() {
        let engine = engine();
        let id = engine.seed(EntityData::new("customer").with("id", 5).with("name", "Ada")).unwrap();
        let (mut provider, _, token) = open(&engine);
        let main = provider.session_mut().unwrap().find("customer", &id).unwrap().unwrap();
        provider
            .manage_entity_as(&customer(0, "Lin"), None, EntityState::Added)
            .unwrap();

        provider.capture_tracking(Some(&main), &token).unwrap();

        let set = provider.tracking();
        assert_eq!(set.len(), 2);
        let primary = set.main_entity().unwrap();
        assert_eq!(primary.state(), EntityState::Unchanged);
        assert!(!primary.entity().ptr_eq(&main));
        assert_eq!(primary.entity().get("name").as_text(), Some("Ada"));
        assert!(provider.lazy_loading());
    }

    #[test]
    fn capture_deleted_uses_original_values() {
        let engine = engine();
        let id = engine.seed(EntityData::new("customer").with("id", 5).with("name", "Ada")).unwrap();
        let (mut provider, _, token) = open(&engine);
        let main = provider.session_mut().unwrap().find("customer", &id).unwrap().unwrap();
        main.set("name", "Grace");
        provider
            .manage_entity_as(&main, None, EntityState::Deleted)
            .unwrap();

        provider.capture_tracking(Some(&main), &token).unwrap();
        let entry = provider.tracking().main_entity().unwrap();
        assert_eq!(entry.state(), EntityState::Deleted);
        assert_eq!(entry.entity().get("name").as_text(), Some("Ada"));
    }

    #[test]
    fn save_without_tracked_entity_fails() {
        let engine = engine();
        let (mut provider, _, mut token) = open(&engine);
        token.set_tracked(false);
        let err = match provider.save_changes(None, &token) {
            Err(AttemptFailure::Fatal(err)) => err,
            other => panic!("unexpected result: {other:?}"),
        };
        assert_eq!(err.kind(), crate::ErrorKind::Provider);
        assert_eq!(engine.commit_count(), 0);
    }

    #[test]
    fn replay_restores_intent_in_new_session() {
        let engine = engine();
        engine.seed(EntityData::new("customer").with("id", 5).with("name", "Ada")).unwrap();
        let (mut provider, mut config, mut token) = open(&engine);
        let copy = EntityHandle::new(
            EntityData::new("customer")
                .with("id", 5)
                .with("name", "Grace")
                .with("orders", Value::List(Vec::new())),
        );
        provider
            .tracking_mut()
            .mark(copy.clone(), EntityState::Modified, true)
            .unwrap();

        config.set_timeout_secs(60).unwrap();
        provider.initialize(&mut config, &mut token).unwrap();

        assert!(token.is_tracked());
        assert_eq!(copy.get("orders"), Value::Null);
        assert_eq!(provider.state_of(&copy).unwrap(), EntityState::Modified);
    }

    #[test]
    fn original_values_modified_only() {
        let engine = engine();
        let id = engine.seed(EntityData::new("customer").with("id", 5).with("name", "Ada")).unwrap();
        let (mut provider, _, _) = open(&engine);
        let entity = provider.session_mut().unwrap().find("customer", &id).unwrap().unwrap();
        entity.set("name", "Grace");

        let modified = provider.original_values(&entity, false).unwrap();
        assert_eq!(modified, vec![("name".to_string(), Value::from("Ada"))]);
        let all = provider.original_values(&entity, true).unwrap();
        assert!(all.len() >= 2);
    }
}
