//! Integration tests for suspending a manager and resuming it elsewhere.

use entigate_core::{EntityGate, ErrorKind, PortableState};
use entigate_engine::{EntityData, EntityHandle, EntityState, Value};
use entigate_testkit::prelude::*;

#[test]
fn new_entity_survives_a_byte_round_trip() {
    let store = TestStore::new();
    let mut gate = store.gate("customer");
    gate.new_entity().unwrap().set("name", "Ada");

    let bytes = gate.suspend().unwrap().to_bytes().unwrap();
    drop(gate);

    let state = PortableState::from_bytes(&bytes).unwrap();
    assert!(state.typed);
    assert_eq!(state.shape.as_deref(), Some("customer"));
    assert_eq!(state.entries.len(), 1);
    assert_eq!(state.entries[0].state, EntityState::Added);

    let mut resumed = EntityGate::resume(store.gate_engine(), state).unwrap();
    assert_eq!(resumed.friendly_name(), "Ada");
    assert!(resumed.save().unwrap());
    assert_eq!(store.engine.row_count("customer"), 1);
    assert_eq!(resumed.primary_key().unwrap(), Some(("id".to_string(), Value::Integer(1))));
}

#[test]
fn archival_entity_carries_its_original_values() {
    let store = TestStore::new();
    let id = store.seed_customer("Ada");
    let mut gate = store.gate("customer");
    assert!(gate.load(Some(id.clone())).unwrap());
    gate.entity().unwrap().set("name", "Grace");

    let state = gate.suspend().unwrap();
    assert!(state.token.save_original_values());
    assert_eq!(
        state.original_values,
        Some(vec![("name".to_string(), Value::from("Ada"))])
    );
    drop(gate);

    let mut resumed = store.template().resume(state).unwrap();
    assert_eq!(
        resumed.original_values(false).unwrap(),
        vec![("name".to_string(), Value::from("Ada"))]
    );
    assert!(resumed.save().unwrap());
    assert_eq!(store.stored("customer", &id).unwrap().get("name"), Value::from("Grace"));
}

#[test]
fn non_archival_entity_keeps_no_snapshot() {
    let store = TestStore::new();
    let id = store.seed_tag("red");
    let mut gate = store.gate("tag");
    assert!(gate.load(Some(id)).unwrap());
    gate.entity().unwrap().set("label", "blue");

    let state = gate.suspend().unwrap();
    assert!(!state.token.save_original_values());
    assert_eq!(state.original_values, None);
}

#[test]
fn tracked_gate_carries_every_pending_change() {
    let store = TestStore::new();
    let id = store.seed_tag("red");
    let mut gate = store.gate("tag");
    assert!(gate.load(Some(id.clone())).unwrap());
    gate.entity().unwrap().set("label", "blue");
    gate.apply(&EntityHandle::new(EntityData::new("tag").with("id", 0).with("label", "green")))
        .unwrap();

    let state = gate.suspend().unwrap();
    assert_eq!(state.entries.len(), 2);
    assert_eq!(state.entries.iter().filter(|e| e.primary).count(), 1);
    drop(gate);

    let mut resumed = store.template().resume(state).unwrap();
    assert!(resumed.save().unwrap());
    assert_eq!(resumed.token().rows(), 2);
    assert_eq!(store.engine.row_count("tag"), 2);
    assert_eq!(store.stored("tag", &id).unwrap().get("label"), Value::from("blue"));
}

#[test]
fn untracked_gate_carries_only_its_entity() {
    let store = TestStore::new();
    let id = store.seed_tag("red");
    let mut gate = store.gate("tag");
    gate.no_tracking();
    assert!(gate.load(Some(id)).unwrap());
    gate.entity().unwrap().set("label", "blue");
    gate.apply(&EntityHandle::new(EntityData::new("tag").with("id", 0).with("label", "green")))
        .unwrap();

    let state = gate.suspend().unwrap();
    assert!(!state.token.is_tracked());
    assert_eq!(state.entries.len(), 1);
    assert!(state.entries[0].primary);
    assert_eq!(state.entries[0].entity.get("label"), Value::from("blue"));
}

#[test]
fn suspend_keeps_the_gate_usable() {
    let store = TestStore::new();
    let mut gate = store.gate("tag");
    gate.new_entity().unwrap().set("label", "red");

    let state = gate.suspend().unwrap();
    assert_eq!(state.entries.len(), 1);
    assert!(gate.save().unwrap());
    assert_eq!(store.engine.row_count("tag"), 1);
}

#[test]
fn gate_without_session_suspends_empty() {
    let store = TestStore::new();
    let mut gate = store.gate("tag");

    let state = gate.suspend().unwrap();
    assert!(state.entries.is_empty());
    assert_eq!(store.engine.sessions_opened(), 0);

    let mut resumed = EntityGate::resume(store.gate_engine(), state).unwrap();
    assert!(!resumed.has_entity());
    resumed.new_entity().unwrap();
    assert!(resumed.save().unwrap());
}

#[test]
fn entity_given_at_build_survives_suspend_before_any_operation() {
    let store = TestStore::new();
    let id = store.seed_customer("Ada");
    let customer = EntityHandle::new(EntityData::new("customer").with("id", 1).with("name", "Grace"));
    let mut gate = store.template().with_shape("customer").with_entity(customer).build().unwrap();

    let bytes = gate.suspend().unwrap().to_bytes().unwrap();
    drop(gate);
    let state = PortableState::from_bytes(&bytes).unwrap();
    assert_eq!(state.entries.len(), 1);
    assert!(state.entries[0].primary);
    assert_eq!(state.entries[0].state, EntityState::Modified);

    let mut resumed = EntityGate::resume(store.gate_engine(), state).unwrap();
    assert!(resumed.has_entity());
    assert_eq!(resumed.friendly_name(), "Grace");
    assert!(resumed.save().unwrap());
    assert_eq!(store.stored("customer", &id).unwrap().get("name"), Value::from("Grace"));
}

#[test]
fn new_entity_given_at_build_resumes_as_added() {
    let store = TestStore::new();
    let tag = EntityHandle::new(EntityData::new("tag").with("id", 0).with("label", "draft"));
    let mut gate = store.template().with_entity(tag).build().unwrap();

    let state = gate.suspend().unwrap();
    assert_eq!(state.entries.len(), 1);
    assert_eq!(state.entries[0].state, EntityState::Added);

    let mut resumed = EntityGate::resume(store.gate_engine(), state).unwrap();
    assert!(resumed.save().unwrap());
    assert_eq!(store.engine.row_count("tag"), 1);
}

#[test]
fn manager_without_connection_name_is_not_built() {
    let store = TestStore::new();
    let err = store
        .template()
        .with_config(test_config().with_connection("", "mem://main"))
        .with_shape("tag")
        .build()
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn resume_requires_a_single_main_entity() {
    let store = TestStore::new();
    let mut gate = store.gate("tag");
    gate.new_entity().unwrap();
    let mut state = gate.suspend().unwrap();
    state.entries[0].primary = false;

    let err = EntityGate::resume(store.gate_engine(), state).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidState);
}

#[test]
fn resume_rejects_invalid_connection() {
    let store = TestStore::new();
    let mut gate = store.gate("tag");
    let mut state = gate.suspend().unwrap();
    state.connection.max_attempts = 0;

    let err = EntityGate::resume(store.gate_engine(), state).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn empty_collections_are_collapsed_on_resume() {
    let store = TestStore::new();
    let mut gate = store.gate("customer");
    gate.new_entity().unwrap().set("name", "Ada");

    let state = gate.suspend().unwrap();
    assert_eq!(state.entries[0].entity.get("orders"), Value::List(Vec::new()));

    let resumed = EntityGate::resume(store.gate_engine(), state).unwrap();
    let customer = resumed.current_entity().unwrap();
    assert_eq!(customer.get("orders"), Value::Null);
    assert_eq!(customer.get("name"), Value::from("Ada"));
}
