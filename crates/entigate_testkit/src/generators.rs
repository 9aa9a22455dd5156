//! Property-based test generators using proptest.
//!
//! Provides strategies for values, identifiers, states and entities of the
//! sample model.

use entigate_engine::{EntityData, EntityState, Identifier, Value};
use proptest::prelude::*;
use uuid::Uuid;

/// Strategy for scalar field values.
pub fn scalar_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        (-1.0e9..1.0e9f64).prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,24}".prop_map(Value::Text),
        any::<u128>().prop_map(|n| Value::Uuid(Uuid::from_u128(n))),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ]
}

/// Strategy for identifiers that designate persisted entities.
pub fn valid_identifier_strategy() -> impl Strategy<Value = Identifier> {
    prop_oneof![
        (1..i64::MAX).prop_map(Identifier::Integer),
        any::<u128>().prop_map(|n| Identifier::Uuid(Uuid::from_u128(n))),
        "[a-z]{1,12}".prop_map(Identifier::Text),
    ]
}

/// Strategy for numeric identifiers that do not designate any entity.
pub fn invalid_identifier_strategy() -> impl Strategy<Value = Identifier> {
    (i64::MIN..=0).prop_map(Identifier::Integer)
}

/// Strategy for any persistence state.
pub fn entity_state_strategy() -> impl Strategy<Value = EntityState> {
    prop_oneof![
        Just(EntityState::Detached),
        Just(EntityState::Unchanged),
        Just(EntityState::Added),
        Just(EntityState::Deleted),
        Just(EntityState::Modified),
    ]
}

/// Strategy for states a tracking set can hold.
pub fn trackable_state_strategy() -> impl Strategy<Value = EntityState> {
    entity_state_strategy().prop_filter("detached is never tracked", |s| *s != EntityState::Detached)
}

/// Strategy for labels of the `tag` shape.
pub fn label_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9-]{0,15}").expect("Invalid regex")
}

/// Strategy for unsaved `tag` entities.
pub fn new_tag_strategy() -> impl Strategy<Value = EntityData> {
    label_strategy().prop_map(|label| EntityData::new("tag").with("id", 0).with("label", label))
}
