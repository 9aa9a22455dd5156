//! Shortcuts over [`EntityGate`] for common one-shot tasks.
//!
//! Each helper takes a [`GateBuilder`] as a template: the builder carries
//! the engine, configuration and collaborators, and is cloned for every
//! manager it produces.

use crate::error::{GateError, GateResult};
use crate::gate::{EntityGate, GateBuilder};
use entigate_engine::{EntityHandle, Identifier};

/// Opens a manager on `entity`.
///
/// A new entity becomes the current entity as is. Otherwise the stored
/// version is loaded by identifier; when it is no longer stored the given
/// entity is kept.
///
/// # Errors
///
/// Returns any error raised while building the manager or loading.
pub fn open_for(template: &GateBuilder, entity: EntityHandle) -> GateResult<EntityGate> {
    let gate = template.clone().with_entity(entity.clone()).build()?;
    let Some(identifier) = gate.identifier_of(&entity).filter(Identifier::is_valid) else {
        return Ok(gate);
    };

    let mut gate = template.clone().with_shape(entity.shape()).build()?;
    if !gate.load(Some(identifier))? {
        tracing::debug!(entity = %gate.friendly_name(), "entity no longer stored");
        gate.set_entity(&entity)?;
    }
    Ok(gate)
}

/// Loads the entity of `shape` with `identifier`.
///
/// # Errors
///
/// Returns an invalid state error when no such entity is stored.
pub fn load_required(template: &GateBuilder, shape: &str, identifier: Identifier) -> GateResult<EntityGate> {
    let mut gate = template.clone().with_shape(shape).build()?;
    if !gate.load(Some(identifier.clone()))? {
        return Err(GateError::invalid_state(format!(
            "unable to load {shape} with identifier {identifier}"
        )));
    }
    Ok(gate)
}

/// Lists every stored entity of `shape`, untracked.
///
/// # Errors
///
/// Returns any error raised while listing.
pub fn load_all(template: &GateBuilder, shape: &str) -> GateResult<Vec<EntityHandle>> {
    let mut gate = template.clone().with_shape(shape).build()?;
    gate.session()?.set_no_tracking();
    Ok(gate.list()?.collect())
}

/// Loads the stored version of `entity` in a fresh manager.
///
/// Returns `None` when the entity is new or no longer stored.
///
/// # Errors
///
/// Returns any error raised while loading.
pub fn reload(template: &GateBuilder, entity: &EntityHandle) -> GateResult<Option<EntityHandle>> {
    let shape = entity.shape();
    let mut gate = template.clone().with_shape(shape.as_str()).build()?;
    let Some(identifier) = gate.identifier_of(entity).filter(Identifier::is_valid) else {
        return Ok(None);
    };
    if gate.load(Some(identifier))? {
        Ok(gate.current_entity().cloned())
    } else {
        Ok(None)
    }
}
