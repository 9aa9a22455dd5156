//! Target-state rules.
//!
//! These functions decide which persistence state an entity should be
//! given. They are pure; the provider applies their result to the session.

use crate::error::{GateError, GateResult};
use entigate_engine::EntityState;

/// Computes the state an entity must be given before saving.
///
/// An entity without a valid key is new whatever its current state says.
/// A detached entity that is being acted upon is assumed modified.
#[must_use]
pub fn target_state(current: EntityState, key_valid: bool) -> EntityState {
    if !key_valid {
        return EntityState::Added;
    }
    match current {
        EntityState::Detached => EntityState::Modified,
        other => other,
    }
}

/// State recorded by an explicit apply: decided from key validity alone.
#[must_use]
pub fn apply_state(key_valid: bool) -> EntityState {
    if key_valid {
        EntityState::Modified
    } else {
        EntityState::Added
    }
}

/// Rejects target states that cannot be committed.
///
/// # Errors
///
/// Returns a provider error for `Detached`.
pub fn check_target(target: EntityState, entity: &str) -> GateResult<()> {
    if target == EntityState::Detached {
        return Err(GateError::provider_for(
            format!("unexpected target state {target}"),
            entity,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_state() -> impl Strategy<Value = EntityState> {
        prop_oneof![
            Just(EntityState::Detached),
            Just(EntityState::Unchanged),
            Just(EntityState::Added),
            Just(EntityState::Modified),
            Just(EntityState::Deleted),
        ]
    }

    #[test]
    fn detached_escalates_to_modified() {
        assert_eq!(target_state(EntityState::Detached, true), EntityState::Modified);
        assert_eq!(target_state(EntityState::Unchanged, true), EntityState::Unchanged);
        assert_eq!(target_state(EntityState::Deleted, true), EntityState::Deleted);
    }

    #[test]
    fn apply_decides_from_key() {
        assert_eq!(apply_state(true), EntityState::Modified);
        assert_eq!(apply_state(false), EntityState::Added);
    }

    #[test]
    fn detached_target_is_rejected() {
        let err = check_target(EntityState::Detached, "tag (id=1)").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Provider);
        assert!(check_target(EntityState::Modified, "tag (id=1)").is_ok());
    }

    proptest! {
        #[test]
        fn invalid_key_always_targets_added(current in any_state()) {
            prop_assert_eq!(target_state(current, false), EntityState::Added);
        }

        #[test]
        fn valid_key_never_targets_detached(current in any_state()) {
            prop_assert_ne!(target_state(current, true), EntityState::Detached);
        }
    }
}
