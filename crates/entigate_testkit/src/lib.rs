//! # EntiGate Testkit
//!
//! Test utilities for EntiGate.
//!
//! This crate provides:
//! - A sample shape model and fast-retrying configuration
//! - [`TestStore`], an in-memory store with fault injection
//! - Recording sleeper and change subscriber
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use entigate_testkit::prelude::*;
//!
//! let store = TestStore::new();
//! let id = store.seed_tag("red");
//!
//! let mut gate = store.gate("tag");
//! assert!(gate.load(Some(id)).unwrap());
//! assert_eq!(gate.token().attempts(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faulty;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use faulty::*;
pub use fixtures::*;
pub use generators::*;
