//! CLI command implementations.

pub mod show;
pub mod state;
pub mod validate;
