//! Portable state of a suspended manager.
//!
//! [`crate::EntityGate::suspend`] captures everything needed to rebuild the
//! manager elsewhere: configuration, token, tracked entities with their
//! intended states, and the original-values snapshot. The live session is
//! never part of it. The state is plain serde data and encodes to CBOR.

use crate::config::ConnectionConfig;
use crate::error::{GateError, GateResult};
use crate::token::SessionToken;
use entigate_engine::{EntityData, EntityState, Value};
use serde::{Deserialize, Serialize};

/// One tracked entity in portable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableEntry {
    /// Values of the entity.
    pub entity: EntityData,
    /// State to restore.
    pub state: EntityState,
    /// Whether this is the entity the manager pivots on.
    pub primary: bool,
}

/// Everything a suspended manager carries across the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortableState {
    /// Connection the manager was using.
    pub connection: ConnectionConfig,
    /// Session token at suspension.
    pub token: SessionToken,
    /// Shape the manager was working with.
    pub shape: Option<String>,
    /// Whether the manager was bound to `shape` at construction.
    pub typed: bool,
    /// Lazy loading setting of the session.
    pub lazy_loading: bool,
    /// Tracked entities in tracking order.
    pub entries: Vec<PortableEntry>,
    /// Original values captured for the current entity.
    pub original_values: Option<Vec<(String, Value)>>,
}

impl PortableState {
    /// The primary entry, `None` when nothing is tracked.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error when entries exist but not exactly one
    /// of them is primary.
    pub fn main_entry(&self) -> GateResult<Option<&PortableEntry>> {
        if self.entries.is_empty() {
            return Ok(None);
        }
        let mut primaries = self.entries.iter().filter(|e| e.primary);
        match (primaries.next(), primaries.next()) {
            (Some(main), None) => Ok(Some(main)),
            (None, _) => Err(GateError::invalid_state("no main entity in suspended state")),
            (Some(_), Some(_)) => Err(GateError::invalid_state(
                "more than one main entity in suspended state",
            )),
        }
    }

    /// Encodes the state as CBOR.
    ///
    /// # Errors
    ///
    /// Returns an invalid state error if encoding fails.
    pub fn to_bytes(&self) -> GateResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(self, &mut bytes)
            .map_err(|e| GateError::invalid_state(format!("cannot encode suspended state: {e}")))?;
        Ok(bytes)
    }

    /// Decodes a state produced by [`PortableState::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns an invalid state error if the bytes are not a valid state.
    pub fn from_bytes(bytes: &[u8]) -> GateResult<Self> {
        ciborium::from_reader(bytes)
            .map_err(|e| GateError::invalid_state(format!("cannot decode suspended state: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn state(primaries: &[bool]) -> PortableState {
        PortableState {
            connection: ConnectionConfig::new("Main", "mem://main"),
            token: SessionToken::new(),
            shape: Some("customer".into()),
            typed: true,
            lazy_loading: true,
            entries: primaries
                .iter()
                .enumerate()
                .map(|(i, &primary)| PortableEntry {
                    entity: EntityData::new("customer").with("id", i as i64 + 1),
                    state: EntityState::Modified,
                    primary,
                })
                .collect(),
            original_values: None,
        }
    }

    #[test]
    fn main_entry_requires_exactly_one_primary() {
        assert!(state(&[]).main_entry().unwrap().is_none());
        assert!(state(&[false, true]).main_entry().unwrap().is_some());
        assert!(state(&[false, false]).main_entry().is_err());
        assert!(state(&[true, true]).main_entry().is_err());
    }

    #[test]
    fn cbor_preserves_values_and_states() {
        let mut original = state(&[true, false]);
        let key = Uuid::new_v4();
        original.entries[1].entity = EntityData::new("tag")
            .with("id", key)
            .with("weight", 0.5)
            .with("labels", Value::List(vec!["a".into(), Value::Null]));
        original.entries[1].state = EntityState::Deleted;
        original.original_values = Some(vec![("name".into(), Value::from("Ada"))]);

        let decoded = PortableState::from_bytes(&original.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.entries[1].entity.get("id"), Value::Uuid(key));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = PortableState::from_bytes(&[0xff, 0x00, 0x13]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidState);
    }
}
