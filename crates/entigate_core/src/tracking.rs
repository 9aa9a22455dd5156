//! Tracking set: the portable record of persistence intent.

use crate::error::{GateError, GateResult};
use entigate_engine::{EntityHandle, EntityState, ShapeRegistry, Value};

/// An entity with the persistence state recorded for it.
#[derive(Debug, Clone)]
pub struct TrackedEntity {
    entity: EntityHandle,
    state: EntityState,
    primary: bool,
}

impl TrackedEntity {
    /// The tracked entity.
    #[must_use]
    pub fn entity(&self) -> &EntityHandle {
        &self.entity
    }

    /// Its recorded state.
    #[must_use]
    pub fn state(&self) -> EntityState {
        self.state
    }

    /// Returns true for the entity the operation pivots on.
    #[must_use]
    pub fn is_primary(&self) -> bool {
        self.primary
    }
}

/// Ordered set of tracked entities, unique by entity identity.
#[derive(Debug, Clone, Default)]
pub struct TrackingSet {
    entries: Vec<TrackedEntity>,
}

impl TrackingSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `state` for `entity`.
    ///
    /// An entity already in the set has its state overwritten in place and
    /// keeps its position and primary flag.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error for `Detached`, which is never stored.
    pub fn mark(&mut self, entity: EntityHandle, state: EntityState, primary: bool) -> GateResult<()> {
        if state == EntityState::Detached {
            return Err(GateError::invalid_state_for(
                format!("state {state} cannot be tracked"),
                describe(&entity),
            ));
        }
        match self.entries.iter_mut().find(|t| t.entity.ptr_eq(&entity)) {
            Some(existing) => existing.state = state,
            None => self.entries.push(TrackedEntity {
                entity,
                state,
                primary,
            }),
        }
        Ok(())
    }

    /// Returns the single primary entry.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error if there is no primary entry or more
    /// than one.
    pub fn main_entity(&self) -> GateResult<&TrackedEntity> {
        let mut primaries = self.entries.iter().filter(|t| t.primary);
        match (primaries.next(), primaries.next()) {
            (Some(main), None) => Ok(main),
            (None, _) => Err(GateError::invalid_state("no main entity is tracked")),
            (Some(_), Some(_)) => Err(GateError::invalid_state(
                "more than one main entity is tracked",
            )),
        }
    }

    /// Entries whose state will produce a write.
    pub fn changed_entries(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entries.iter().filter(|t| t.state.is_change())
    }

    /// Iterates over all entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &TrackedEntity> {
        self.entries.iter()
    }

    /// Looks up the entry of an entity.
    #[must_use]
    pub fn get(&self, entity: &EntityHandle) -> Option<&TrackedEntity> {
        self.entries.iter().find(|t| t.entity.ptr_eq(entity))
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Sets every empty child collection of every tracked entity to null.
    ///
    /// Only fields declared as collections in the entity's shape are
    /// touched. Returns the number of fields changed.
    // TODO: confirm against real round trips whether empty collections
    // still need collapsing once copies carry explicit load markers.
    pub fn collapse_empty_collections(&self, shapes: &ShapeRegistry) -> usize {
        let mut collapsed = 0;
        for tracked in &self.entries {
            let Some(shape) = shapes.get(&tracked.entity.shape()) else {
                continue;
            };
            tracked.entity.update(|data| {
                for (name, value) in &mut data.fields {
                    let empty = matches!(value, Value::List(items) if items.is_empty());
                    if empty && shape.is_collection(name) {
                        *value = Value::Null;
                        collapsed += 1;
                    }
                }
            });
        }
        collapsed
    }
}

/// Short description of an entity for logs and errors.
pub(crate) fn describe(entity: &EntityHandle) -> String {
    entity.read(|data| {
        let fields = data
            .fields
            .iter()
            .filter(|(_, value)| !matches!(value, Value::List(_)))
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} ({fields})", data.shape)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use entigate_engine::{EntityData, ShapeDescriptor};

    fn entity(id: i64) -> EntityHandle {
        EntityHandle::new(EntityData::new("customer").with("id", id))
    }

    #[test]
    fn mark_same_identity_overwrites() {
        let mut set = TrackingSet::new();
        let a = entity(1);
        set.mark(a.clone(), EntityState::Modified, true).unwrap();
        set.mark(a.clone(), EntityState::Deleted, false).unwrap();

        assert_eq!(set.len(), 1);
        let entry = set.get(&a).unwrap();
        assert_eq!(entry.state(), EntityState::Deleted);
        assert!(entry.is_primary());
    }

    #[test]
    fn mark_equal_values_distinct_identity_appends() {
        let mut set = TrackingSet::new();
        set.mark(entity(1), EntityState::Modified, false).unwrap();
        set.mark(entity(1), EntityState::Modified, false).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn mark_rejects_detached() {
        let mut set = TrackingSet::new();
        let err = set.mark(entity(1), EntityState::Detached, false).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidState);
        assert!(err.to_string().contains("Detached"));
        assert!(set.is_empty());
    }

    #[test]
    fn main_entity_must_be_unique() {
        let mut set = TrackingSet::new();
        assert!(set.main_entity().is_err());

        let main = entity(1);
        set.mark(main.clone(), EntityState::Unchanged, true).unwrap();
        set.mark(entity(2), EntityState::Added, false).unwrap();
        assert!(set.main_entity().unwrap().entity().ptr_eq(&main));

        set.mark(entity(3), EntityState::Added, true).unwrap();
        assert!(set.main_entity().is_err());
    }

    #[test]
    fn changed_entries_skip_unchanged() {
        let mut set = TrackingSet::new();
        set.mark(entity(1), EntityState::Unchanged, true).unwrap();
        set.mark(entity(2), EntityState::Added, false).unwrap();
        set.mark(entity(3), EntityState::Deleted, false).unwrap();

        let states: Vec<_> = set.changed_entries().map(TrackedEntity::state).collect();
        assert_eq!(states, vec![EntityState::Added, EntityState::Deleted]);

        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn collapse_only_touches_collections() {
        let mut shapes = ShapeRegistry::new();
        shapes
            .define(
                ShapeDescriptor::builder("customer")
                    .key("id", 0)
                    .field("tags", Value::List(Vec::new()))
                    .collection("orders")
                    .collection("invoices"),
            )
            .unwrap();

        let customer = EntityHandle::new(
            shapes.get("customer").unwrap().instantiate()
                .with("invoices", Value::List(vec![Value::Integer(1)])),
        );
        let mut set = TrackingSet::new();
        set.mark(customer.clone(), EntityState::Modified, true).unwrap();

        assert_eq!(set.collapse_empty_collections(&shapes), 1);
        assert_eq!(customer.get("orders"), Value::Null);
        assert_eq!(customer.get("tags"), Value::List(Vec::new()));
        assert_eq!(customer.get("invoices").as_list().map(<[Value]>::len), Some(1));
    }

    #[test]
    fn describe_lists_scalar_fields() {
        let text = describe(&EntityHandle::new(
            EntityData::new("customer").with("id", 3).with("name", "Ada"),
        ));
        assert_eq!(text, "customer (id=3, name=Ada)");
    }
}
