//! In-memory mapping engine.

use crate::entity::{EntityData, EntityHandle, EntityState};
use crate::error::{EngineError, EngineResult};
use crate::session::{MappingEngine, Session, SessionEntry, SessionSettings};
use crate::shape::{ShapeDescriptor, ShapeRegistry};
use crate::value::{Identifier, Value};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Engine error code reported when an insert collides with an existing key.
pub const DUPLICATE_KEY_CODE: i32 = 2627;

#[derive(Debug, Clone)]
struct StoredRow {
    data: EntityData,
    version: u64,
}

#[derive(Debug, Clone, Default)]
struct Tables {
    rows: BTreeMap<String, BTreeMap<Identifier, StoredRow>>,
    next_key: BTreeMap<String, i64>,
}

impl Tables {
    fn get(&self, shape: &str, id: &Identifier) -> Option<&StoredRow> {
        self.rows.get(shape).and_then(|table| table.get(id))
    }

    fn contains(&self, shape: &str, id: &Identifier) -> bool {
        self.get(shape, id).is_some()
    }

    /// Inserts a row, generating a key when the entity has none.
    fn insert(&mut self, shape: &ShapeDescriptor, data: &mut EntityData) -> EngineResult<Identifier> {
        let id = match shape.identifier_of(data) {
            Some(id) if id.is_valid() => id,
            _ => self.generate_key(shape, data)?,
        };
        if self.contains(shape.name(), &id) {
            return Err(EngineError::statement(
                DUPLICATE_KEY_CODE,
                format!("cannot insert duplicate key {id} in {}", shape.table()),
            ));
        }
        if let Identifier::Integer(n) = id {
            let next = self.next_key.entry(shape.name().to_string()).or_insert(0);
            *next = (*next).max(n);
        }
        self.rows.entry(shape.name().to_string()).or_default().insert(
            id.clone(),
            StoredRow {
                data: data.clone(),
                version: 1,
            },
        );
        Ok(id)
    }

    fn generate_key(&mut self, shape: &ShapeDescriptor, data: &mut EntityData) -> EngineResult<Identifier> {
        let missing = || EngineError::MissingKey {
            shape: shape.name().to_string(),
        };
        let [key] = shape.keys() else {
            return Err(missing());
        };
        let (value, id) = match data.get(key) {
            Value::Null | Value::Integer(_) => {
                let next = self.next_key.entry(shape.name().to_string()).or_insert(0);
                *next += 1;
                (Value::Integer(*next), Identifier::Integer(*next))
            }
            Value::Uuid(_) => {
                let uuid = Uuid::new_v4();
                (Value::Uuid(uuid), Identifier::Uuid(uuid))
            }
            _ => return Err(missing()),
        };
        data.fields.insert(key.clone(), value);
        Ok(id)
    }
}

/// A mapping engine that keeps its tables in memory.
///
/// Rows carry a version number that is checked on update and delete, so
/// concurrent writers are detected the way an optimistic-concurrency store
/// would. Integer keys are generated on insert when the entity has none.
///
/// Cloning the engine shares its tables.
///
/// # Example
///
/// ```rust
/// use entigate_engine::{EntityData, InMemoryEngine, MappingEngine, SessionSettings,
///     ShapeDescriptor, ShapeRegistry};
///
/// let mut shapes = ShapeRegistry::new();
/// shapes.define(ShapeDescriptor::builder("tag").key("id", 0).field("label", "")).unwrap();
/// let engine = InMemoryEngine::new(shapes);
///
/// let id = engine.seed(EntityData::new("tag").with("label", "red")).unwrap();
/// let mut session = engine.open_session(&SessionSettings::default()).unwrap();
/// let tag = session.find("tag", &id).unwrap().unwrap();
/// assert_eq!(tag.get("label").as_text(), Some("red"));
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryEngine {
    shapes: Arc<ShapeRegistry>,
    tables: Arc<RwLock<Tables>>,
    sessions_opened: Arc<AtomicUsize>,
    commits: Arc<AtomicUsize>,
}

impl InMemoryEngine {
    /// Provider name of the in-memory engine.
    pub const NAME: &'static str = "memory";

    /// Creates an empty engine over the given shapes.
    #[must_use]
    pub fn new(shapes: ShapeRegistry) -> Self {
        Self {
            shapes: Arc::new(shapes),
            tables: Arc::new(RwLock::new(Tables::default())),
            sessions_opened: Arc::new(AtomicUsize::new(0)),
            commits: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Inserts a row directly, bypassing any session.
    ///
    /// # Errors
    ///
    /// Returns an error if the shape is unknown or the key already exists.
    pub fn seed(&self, mut data: EntityData) -> EngineResult<Identifier> {
        let shape = self.shapes.require(&data.shape)?;
        self.tables.write().insert(&shape, &mut data)
    }

    /// Returns a copy of a stored row.
    #[must_use]
    pub fn row(&self, shape: &str, id: &Identifier) -> Option<EntityData> {
        self.tables.read().get(shape, id).map(|row| row.data.clone())
    }

    /// Changes a stored row as another writer would, bumping its version.
    ///
    /// Returns false if the row does not exist.
    pub fn update_row(&self, shape: &str, id: &Identifier, f: impl FnOnce(&mut EntityData)) -> bool {
        let mut tables = self.tables.write();
        let Some(row) = tables.rows.get_mut(shape).and_then(|t| t.get_mut(id)) else {
            return false;
        };
        f(&mut row.data);
        row.version += 1;
        true
    }

    /// Removes a stored row. Returns false if it did not exist.
    pub fn remove_row(&self, shape: &str, id: &Identifier) -> bool {
        self.tables
            .write()
            .rows
            .get_mut(shape)
            .and_then(|t| t.remove(id))
            .is_some()
    }

    /// Number of rows stored for a shape.
    #[must_use]
    pub fn row_count(&self, shape: &str) -> usize {
        self.tables.read().rows.get(shape).map_or(0, BTreeMap::len)
    }

    /// Number of sessions opened so far.
    #[must_use]
    pub fn sessions_opened(&self) -> usize {
        self.sessions_opened.load(Ordering::SeqCst)
    }

    /// Number of commits attempted so far, across all sessions.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl MappingEngine for InMemoryEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    fn open_session(&self, settings: &SessionSettings) -> EngineResult<Box<dyn Session>> {
        self.sessions_opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(connection = %settings.connection_name, "opening in-memory session");
        Ok(Box::new(MemorySession {
            shapes: Arc::clone(&self.shapes),
            tables: Arc::clone(&self.tables),
            commits: Arc::clone(&self.commits),
            entries: Vec::new(),
            lazy_loading: settings.lazy_loading,
            tracking: true,
            last_statement: None,
        }))
    }
}

#[derive(Debug)]
struct Tracked {
    entity: EntityHandle,
    state: EntityState,
    original: EntityData,
    version: Option<u64>,
}

impl Tracked {
    /// The recorded state, with unrecorded value changes detected.
    fn effective_state(&self) -> EntityState {
        if self.state == EntityState::Unchanged
            && self.entity.read(|data| data.fields != self.original.fields)
        {
            EntityState::Modified
        } else {
            self.state
        }
    }
}

struct MemorySession {
    shapes: Arc<ShapeRegistry>,
    tables: Arc<RwLock<Tables>>,
    commits: Arc<AtomicUsize>,
    entries: Vec<Tracked>,
    lazy_loading: bool,
    tracking: bool,
    last_statement: Option<String>,
}

fn where_clause(shape: &ShapeDescriptor, id: &Identifier) -> String {
    shape
        .keys()
        .iter()
        .zip(id.to_values())
        .map(|(key, value)| format!("{key} = {value}"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

impl MemorySession {
    fn position(&self, entity: &EntityHandle) -> Option<usize> {
        self.entries.iter().position(|t| t.entity.ptr_eq(entity))
    }

    fn tracked(&self, entity: &EntityHandle) -> EngineResult<&Tracked> {
        self.position(entity)
            .map(|i| &self.entries[i])
            .ok_or(EngineError::NotAttached)
    }

    fn tracked_by_key(&self, shape: &ShapeDescriptor, id: &Identifier) -> Option<&Tracked> {
        self.entries.iter().find(|t| {
            t.entity.read(|data| {
                data.shape == shape.name() && shape.identifier_of(data).as_ref() == Some(id)
            })
        })
    }

    fn attach_row(&mut self, shape: &ShapeDescriptor, id: &Identifier, row: StoredRow) -> EntityHandle {
        if self.tracking {
            if let Some(t) = self.tracked_by_key(shape, id) {
                return t.entity.clone();
            }
        }
        let entity = EntityHandle::new(row.data.clone());
        if self.tracking {
            self.entries.push(Tracked {
                entity: entity.clone(),
                state: EntityState::Unchanged,
                original: row.data,
                version: Some(row.version),
            });
        }
        entity
    }

    fn key_of(&self, entity: &EntityHandle) -> EngineResult<(Arc<ShapeDescriptor>, Option<Identifier>)> {
        let shape = self.shapes.require(&entity.shape())?;
        let id = entity.read(|data| shape.identifier_of(data));
        Ok((shape, id))
    }
}

impl Session for MemorySession {
    fn shapes(&self) -> &ShapeRegistry {
        &self.shapes
    }

    fn find(&mut self, shape: &str, identifier: &Identifier) -> EngineResult<Option<EntityHandle>> {
        let descriptor = self.shapes.require(shape)?;
        if self.tracking {
            if let Some(t) = self.tracked_by_key(&descriptor, identifier) {
                return Ok(Some(t.entity.clone()));
            }
        }
        self.last_statement = Some(format!(
            "SELECT * FROM {} WHERE {}",
            descriptor.table(),
            where_clause(&descriptor, identifier)
        ));
        let row = self.tables.read().get(shape, identifier).cloned();
        Ok(row.map(|row| self.attach_row(&descriptor, identifier, row)))
    }

    fn list(&mut self, shape: &str) -> EngineResult<Box<dyn Iterator<Item = EntityHandle> + Send>> {
        let descriptor = self.shapes.require(shape)?;
        self.last_statement = Some(format!("SELECT * FROM {}", descriptor.table()));
        let rows: Vec<(Identifier, StoredRow)> = self
            .tables
            .read()
            .rows
            .get(shape)
            .map(|table| table.iter().map(|(id, row)| (id.clone(), row.clone())).collect())
            .unwrap_or_default();
        let entities: Vec<EntityHandle> = rows
            .into_iter()
            .map(|(id, row)| self.attach_row(&descriptor, &id, row))
            .collect();
        Ok(Box::new(entities.into_iter()))
    }

    fn state_of(&self, entity: &EntityHandle) -> EntityState {
        self.position(entity)
            .map_or(EntityState::Detached, |i| self.entries[i].effective_state())
    }

    fn set_state(&mut self, entity: &EntityHandle, state: EntityState) -> EngineResult<()> {
        let (shape, id) = self.key_of(entity)?;

        if let Some(i) = self.position(entity) {
            let tracked = &mut self.entries[i];
            match (tracked.state, state) {
                (_, EntityState::Detached) | (EntityState::Added, EntityState::Deleted) => {
                    self.entries.remove(i);
                }
                (_, EntityState::Unchanged) => {
                    tracked.original = entity.snapshot();
                    tracked.state = state;
                }
                _ => tracked.state = state,
            }
            return Ok(());
        }

        if state == EntityState::Detached {
            return Ok(());
        }

        let valid_id = id.filter(Identifier::is_valid);
        if let Some(id) = &valid_id {
            if self.tracked_by_key(&shape, id).is_some() {
                return Err(EngineError::InvalidTransition(format!(
                    "another instance of {} with key {id} is already tracked",
                    shape.name()
                )));
            }
        }

        let current = entity.snapshot();
        let stored = match (&valid_id, state) {
            (Some(id), s) if s != EntityState::Added => {
                self.tables.read().get(shape.name(), id).cloned()
            }
            _ => None,
        };
        let version = stored.as_ref().map(|row| row.version);
        let original = match stored {
            Some(row) if state != EntityState::Unchanged => row.data,
            _ => current,
        };
        self.entries.push(Tracked {
            entity: entity.clone(),
            state,
            original,
            version,
        });
        Ok(())
    }

    fn reload(&mut self, entity: &EntityHandle) -> EngineResult<()> {
        let (shape, id) = self.key_of(entity)?;
        let id = id
            .filter(Identifier::is_valid)
            .ok_or_else(|| EngineError::MissingKey {
                shape: shape.name().to_string(),
            })?;
        self.last_statement = Some(format!(
            "SELECT * FROM {} WHERE {}",
            shape.table(),
            where_clause(&shape, &id)
        ));
        let row = self.tables.read().get(shape.name(), &id).cloned();
        let position = self.position(entity);

        match (row, position) {
            (Some(row), Some(i)) => {
                entity.assign(&row.data);
                let tracked = &mut self.entries[i];
                tracked.state = EntityState::Unchanged;
                tracked.original = row.data;
                tracked.version = Some(row.version);
            }
            (Some(row), None) => {
                entity.assign(&row.data);
                if self.tracking {
                    self.entries.push(Tracked {
                        entity: entity.clone(),
                        state: EntityState::Unchanged,
                        original: row.data,
                        version: Some(row.version),
                    });
                }
            }
            (None, Some(i)) => {
                self.entries.remove(i);
            }
            (None, None) => {}
        }
        Ok(())
    }

    fn original_values(&self, entity: &EntityHandle) -> EngineResult<EntityData> {
        Ok(self.tracked(entity)?.original.clone())
    }

    fn modified_fields(&self, entity: &EntityHandle) -> EngineResult<Vec<String>> {
        let tracked = self.tracked(entity)?;
        let current = entity.snapshot();
        if tracked.state == EntityState::Added {
            return Ok(current.fields.into_keys().collect());
        }
        let mut names: Vec<String> = current
            .fields
            .keys()
            .chain(tracked.original.fields.keys())
            .filter(|name| current.get(name) != tracked.original.get(name))
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    fn current_values(&self, entity: &EntityHandle) -> EngineResult<EntityData> {
        self.tracked(entity)?;
        Ok(entity.snapshot())
    }

    fn set_current_values(&mut self, entity: &EntityHandle, values: &EntityData) -> EngineResult<()> {
        self.tracked(entity)?;
        entity.assign(values);
        Ok(())
    }

    fn has_pending_changes(&mut self) -> bool {
        self.entries.iter().any(|t| t.effective_state().is_change())
    }

    fn commit(&mut self) -> EngineResult<usize> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.tables.write();

        // Validate everything before writing anything.
        let mut claimed: Vec<(String, Identifier)> = Vec::new();
        for tracked in &self.entries {
            let state = tracked.effective_state();
            if !state.is_change() {
                continue;
            }
            let shape = self.shapes.require(&tracked.entity.shape())?;
            let id = tracked.entity.read(|data| shape.identifier_of(data));
            match state {
                EntityState::Added => {
                    if let Some(id) = id.filter(Identifier::is_valid) {
                        let key = (shape.name().to_string(), id);
                        if tables.contains(&key.0, &key.1) || claimed.contains(&key) {
                            return Err(EngineError::statement(
                                DUPLICATE_KEY_CODE,
                                format!("cannot insert duplicate key {} in {}", key.1, shape.table()),
                            ));
                        }
                        claimed.push(key);
                    }
                }
                _ => {
                    let stored = id
                        .as_ref()
                        .and_then(|id| tables.get(shape.name(), id))
                        .map(|row| row.version);
                    if stored.is_none() || stored != tracked.version {
                        return Err(EngineError::Concurrency {
                            shape: shape.name().to_string(),
                            identifier: id.map_or_else(|| "?".to_string(), |id| id.to_string()),
                        });
                    }
                }
            }
        }

        // Writes go to a staged copy; the store and the tracked entries only
        // change once every write succeeded.
        let mut staged = tables.clone();
        let mut written = Vec::new();
        let mut statements = Vec::new();
        for (i, tracked) in self.entries.iter().enumerate() {
            let state = tracked.effective_state();
            if !state.is_change() {
                continue;
            }
            let shape = self.shapes.require(&tracked.entity.shape())?;
            let mut data = tracked.entity.snapshot();
            let version = match state {
                EntityState::Added => {
                    let id = staged.insert(&shape, &mut data)?;
                    statements.push(format!("INSERT INTO {} VALUES ({id})", shape.table()));
                    Some(1)
                }
                EntityState::Modified => {
                    let Some(id) = shape.identifier_of(&data) else {
                        continue;
                    };
                    let version = staged
                        .rows
                        .get_mut(shape.name())
                        .and_then(|t| t.get_mut(&id))
                        .map(|row| {
                            row.data = data.clone();
                            row.version += 1;
                            row.version
                        });
                    statements.push(format!(
                        "UPDATE {} SET ... WHERE {}",
                        shape.table(),
                        where_clause(&shape, &id)
                    ));
                    version.or(tracked.version)
                }
                _ => {
                    let Some(id) = shape.identifier_of(&data) else {
                        continue;
                    };
                    if let Some(table) = staged.rows.get_mut(shape.name()) {
                        table.remove(&id);
                    }
                    statements.push(format!(
                        "DELETE FROM {} WHERE {}",
                        shape.table(),
                        where_clause(&shape, &id)
                    ));
                    tracked.version
                }
            };
            written.push((i, state, data, version));
        }
        *tables = staged;
        drop(tables);

        let rows = written.len();
        for (i, state, data, version) in written {
            let tracked = &mut self.entries[i];
            if state == EntityState::Added {
                tracked.entity.assign(&data);
            }
            tracked.version = version;
            tracked.original = data;
        }

        self.entries.retain(|t| t.state != EntityState::Deleted);
        for tracked in &mut self.entries {
            tracked.state = EntityState::Unchanged;
        }
        if !statements.is_empty() {
            self.last_statement = Some(statements.join("; "));
        }
        tracing::trace!(rows, "in-memory commit");
        Ok(rows)
    }

    fn entries(&self) -> Vec<SessionEntry> {
        self.entries
            .iter()
            .map(|t| SessionEntry {
                entity: t.entity.clone(),
                state: t.effective_state(),
            })
            .collect()
    }

    fn lazy_loading_enabled(&self) -> bool {
        self.lazy_loading
    }

    fn set_lazy_loading_enabled(&mut self, enabled: bool) {
        self.lazy_loading = enabled;
    }

    fn set_no_tracking(&mut self) {
        self.tracking = false;
    }

    fn last_statement(&self) -> Option<String> {
        self.last_statement.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> InMemoryEngine {
        let mut shapes = ShapeRegistry::new();
        shapes
            .define(
                ShapeDescriptor::builder("customer")
                    .table("customers")
                    .key("id", 0)
                    .field("name", Value::Null),
            )
            .unwrap();
        InMemoryEngine::new(shapes)
    }

    fn session(engine: &InMemoryEngine) -> Box<dyn Session> {
        engine.open_session(&SessionSettings::default()).unwrap()
    }

    #[test]
    fn memory_seed_generates_keys() {
        let engine = engine();
        let a = engine.seed(EntityData::new("customer").with("name", "a")).unwrap();
        let b = engine.seed(EntityData::new("customer").with("name", "b")).unwrap();
        assert_eq!(a, Identifier::Integer(1));
        assert_eq!(b, Identifier::Integer(2));
        assert_eq!(engine.row_count("customer"), 2);
        assert_eq!(engine.row("customer", &a).unwrap().get("id"), Value::Integer(1));
    }

    #[test]
    fn memory_find_attaches_once() {
        let engine = engine();
        let id = engine.seed(EntityData::new("customer").with("name", "a")).unwrap();
        let mut session = session(&engine);

        let first = session.find("customer", &id).unwrap().unwrap();
        let second = session.find("customer", &id).unwrap().unwrap();
        assert!(first.ptr_eq(&second));
        assert_eq!(session.state_of(&first), EntityState::Unchanged);
        assert_eq!(session.entries().len(), 1);
        assert!(session.find("customer", &Identifier::Integer(99)).unwrap().is_none());
    }

    #[test]
    fn memory_detects_value_changes() {
        let engine = engine();
        let id = engine.seed(EntityData::new("customer").with("name", "a")).unwrap();
        let mut session = session(&engine);
        let customer = session.find("customer", &id).unwrap().unwrap();

        assert!(!session.has_pending_changes());
        customer.set("name", "b");
        assert!(session.has_pending_changes());
        assert_eq!(session.state_of(&customer), EntityState::Modified);
        assert_eq!(session.modified_fields(&customer).unwrap(), vec!["name".to_string()]);
        assert_eq!(session.original_values(&customer).unwrap().get("name"), Value::from("a"));

        assert_eq!(session.commit().unwrap(), 1);
        assert_eq!(engine.row("customer", &id).unwrap().get("name"), Value::from("b"));
        assert_eq!(session.state_of(&customer), EntityState::Unchanged);
        assert!(session.last_statement().unwrap().starts_with("UPDATE customers"));
    }

    #[test]
    fn memory_commit_insert_assigns_key() {
        let engine = engine();
        let mut session = session(&engine);
        let customer = EntityHandle::new(EntityData::new("customer").with("id", 0).with("name", "new"));

        session.set_state(&customer, EntityState::Added).unwrap();
        assert_eq!(session.commit().unwrap(), 1);
        assert_eq!(customer.get("id"), Value::Integer(1));
        assert_eq!(session.state_of(&customer), EntityState::Unchanged);
        assert_eq!(engine.commit_count(), 1);
    }

    #[test]
    fn memory_commit_delete_removes_row() {
        let engine = engine();
        let id = engine.seed(EntityData::new("customer")).unwrap();
        let mut session = session(&engine);
        let customer = session.find("customer", &id).unwrap().unwrap();

        session.set_state(&customer, EntityState::Deleted).unwrap();
        assert_eq!(session.commit().unwrap(), 1);
        assert_eq!(engine.row_count("customer"), 0);
        assert_eq!(session.state_of(&customer), EntityState::Detached);
    }

    #[test]
    fn memory_commit_detects_concurrent_update() {
        let engine = engine();
        let id = engine.seed(EntityData::new("customer").with("name", "a")).unwrap();
        let mut session = session(&engine);
        let customer = session.find("customer", &id).unwrap().unwrap();

        assert!(engine.update_row("customer", &id, |row| {
            row.fields.insert("name".into(), "other".into());
        }));
        customer.set("name", "mine");

        let err = session.commit().unwrap_err();
        assert!(err.is_concurrency_conflict());

        session.reload(&customer).unwrap();
        assert_eq!(customer.get("name"), Value::from("other"));
        assert_eq!(session.state_of(&customer), EntityState::Unchanged);

        customer.set("name", "mine");
        assert_eq!(session.commit().unwrap(), 1);
    }

    #[test]
    fn memory_commit_missing_row_is_conflict() {
        let engine = engine();
        let id = engine.seed(EntityData::new("customer")).unwrap();
        let mut session = session(&engine);
        let customer = session.find("customer", &id).unwrap().unwrap();
        assert!(engine.remove_row("customer", &id));

        session.set_state(&customer, EntityState::Deleted).unwrap();
        assert!(session.commit().unwrap_err().is_concurrency_conflict());
    }

    #[test]
    fn memory_rejects_second_instance_with_same_key() {
        let engine = engine();
        let id = engine.seed(EntityData::new("customer")).unwrap();
        let mut session = session(&engine);
        let _tracked = session.find("customer", &id).unwrap().unwrap();

        let shadow = EntityHandle::new(EntityData::new("customer").with("id", 1));
        let err = session.set_state(&shadow, EntityState::Modified).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
    }

    #[test]
    fn memory_added_then_deleted_is_detached() {
        let engine = engine();
        let mut session = session(&engine);
        let customer = EntityHandle::new(EntityData::new("customer").with("id", 0));

        session.set_state(&customer, EntityState::Added).unwrap();
        session.set_state(&customer, EntityState::Deleted).unwrap();
        assert_eq!(session.state_of(&customer), EntityState::Detached);
        assert!(!session.has_pending_changes());
    }

    #[test]
    fn memory_duplicate_insert_fails_with_code() {
        let engine = engine();
        engine.seed(EntityData::new("customer").with("id", 5)).unwrap();
        let mut session = session(&engine);
        let customer = EntityHandle::new(EntityData::new("customer").with("id", 5));

        session.set_state(&customer, EntityState::Added).unwrap();
        let err = session.commit().unwrap_err();
        assert_eq!(err.code(), Some(DUPLICATE_KEY_CODE));
        assert!(!err.is_malformed_query());
    }

    #[test]
    fn memory_commit_rejects_duplicate_keys_within_one_batch() {
        let engine = engine();
        let mut session = session(&engine);
        let first = EntityHandle::new(EntityData::new("customer").with("id", 0).with("name", "a"));
        let second = EntityHandle::new(EntityData::new("customer").with("id", 0).with("name", "b"));
        session.set_state(&first, EntityState::Added).unwrap();
        session.set_state(&second, EntityState::Added).unwrap();
        first.set("id", 7);
        second.set("id", 7);

        let err = session.commit().unwrap_err();
        assert_eq!(err.code(), Some(DUPLICATE_KEY_CODE));
        assert_eq!(engine.row_count("customer"), 0);
        assert_eq!(session.state_of(&first), EntityState::Added);
        assert_eq!(session.state_of(&second), EntityState::Added);

        second.set("id", 8);
        assert_eq!(session.commit().unwrap(), 2);
        assert_eq!(engine.row_count("customer"), 2);
    }

    #[test]
    fn memory_failed_insert_leaves_store_untouched() {
        let engine = engine();
        let mut session = session(&engine);
        let generated = EntityHandle::new(EntityData::new("customer").with("id", 0));
        let explicit = EntityHandle::new(EntityData::new("customer").with("id", 1));
        session.set_state(&generated, EntityState::Added).unwrap();
        session.set_state(&explicit, EntityState::Added).unwrap();

        // The generated key collides with the explicit one.
        assert!(session.commit().is_err());
        assert_eq!(engine.row_count("customer"), 0);
        assert_eq!(generated.get("id"), Value::Integer(0));
    }

    #[test]
    fn memory_no_tracking_returns_detached_instances() {
        let engine = engine();
        engine.seed(EntityData::new("customer")).unwrap();
        engine.seed(EntityData::new("customer")).unwrap();
        let mut session = session(&engine);
        session.set_no_tracking();

        let all: Vec<_> = session.list("customer").unwrap().collect();
        assert_eq!(all.len(), 2);
        assert!(session.entries().is_empty());
        assert_eq!(session.state_of(&all[0]), EntityState::Detached);
    }

    #[test]
    fn memory_unknown_shape_fails() {
        let engine = engine();
        let mut session = session(&engine);
        assert!(matches!(
            session.find("invoice", &Identifier::Integer(1)),
            Err(EngineError::UnknownShape(_))
        ));
    }

    #[test]
    fn memory_lazy_loading_follows_settings() {
        let engine = engine();
        let settings = SessionSettings {
            lazy_loading: false,
            ..SessionSettings::default()
        };
        let mut session = engine.open_session(&settings).unwrap();
        assert!(!session.lazy_loading_enabled());
        session.set_lazy_loading_enabled(true);
        assert!(session.lazy_loading_enabled());
        assert_eq!(engine.sessions_opened(), 1);
    }
}
