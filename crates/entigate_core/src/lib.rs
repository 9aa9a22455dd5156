//! # EntiGate Core
//!
//! Entity-state tracking and retry execution over a mapping engine.
//!
//! This crate provides:
//! - [`EntityGate`], the manager of one current entity against a session
//! - A retry loop with a per-operation [`SessionToken`]
//! - Target-state reconciliation of entities before saving
//! - A [`TrackingSet`] replayed into new sessions
//! - Configuration through [`ClientConfig`] and a [`ConfigRegistry`]
//! - Change notices through a [`ChangeSubscriber`]
//! - Portable suspend/resume state
//!
//! ## Example
//!
//! ```rust
//! use entigate_core::{ClientConfig, EntityGate};
//! use entigate_engine::{EntityData, InMemoryEngine, ShapeDescriptor, ShapeRegistry, Value};
//! use std::sync::Arc;
//!
//! let mut shapes = ShapeRegistry::new();
//! shapes.define(ShapeDescriptor::builder("tag").key("id", 0).field("label", "")).unwrap();
//! let engine = Arc::new(InMemoryEngine::new(shapes));
//! let id = engine.seed(EntityData::new("tag").with("label", "red")).unwrap();
//!
//! let mut gate = EntityGate::builder(engine)
//!     .with_config(ClientConfig::new().with_connection("Main", "mem://main"))
//!     .with_shape("tag")
//!     .build()
//!     .unwrap();
//!
//! assert!(gate.load(Some(id)).unwrap());
//! assert_eq!(gate.field_value("label"), Some(Value::from("red")));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod detached;
mod error;
mod gate;
pub mod helpers;
mod notify;
mod portable;
mod provider;
mod reconcile;
mod retry;
mod token;
mod tracking;

pub use config::{
    ClientConfig, ConfigRegistry, ConfigSnapshot, ConnectionConfig, DEFAULT_ATTEMPT_DELAY_MS,
    DEFAULT_MAX_ATTEMPTS, DEFAULT_TIMEOUT_SECS, MIN_TIMEOUT_SECS,
};
pub use detached::{DetachedCopy, ShapeCopier};
pub use error::{BoxError, ErrorKind, GateError, GateResult};
pub use gate::{EntityGate, GateBuilder};
pub use notify::{ChangeFeed, ChangeKind, ChangeNotice, ChangeSubscriber, FeedEvent};
pub use portable::{PortableEntry, PortableState};
pub use reconcile::{apply_state, check_target, target_state};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use token::{SessionToken, NO_ROWS};
pub use tracking::{TrackedEntity, TrackingSet};

/// Version of the crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
