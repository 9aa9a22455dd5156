//! Test fixtures and store helpers.
//!
//! Provides a sample shape model, a fast-retrying configuration and a
//! [`TestStore`] bundling an in-memory engine behind a fault-injecting
//! wrapper.

use crate::faulty::{FaultPlan, FaultyEngine};
use entigate_core::{
    ChangeNotice, ChangeSubscriber, ClientConfig, EntityGate, GateBuilder, Sleeper,
};
use entigate_engine::{
    EntityData, Identifier, InMemoryEngine, ShapeDescriptor, ShapeRegistry, Value,
};
use parking_lot::Mutex;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Name of the connection used by [`test_config`].
pub const TEST_CONNECTION: &str = "Main";

/// Builds the sample model: `customer`, `order` and `tag`.
///
/// `customer` is nameable through `name`, archival, and holds an `orders`
/// collection. `order` has a composite key. `tag` is the smallest possible
/// shape.
pub fn sample_registry() -> ShapeRegistry {
    let mut shapes = ShapeRegistry::new();
    shapes
        .define(
            ShapeDescriptor::builder("customer")
                .table("customers")
                .key("id", 0)
                .field("name", "")
                .field("email", Value::Null)
                .collection("orders")
                .nameable("name")
                .archival(),
        )
        .expect("customer shape");
    shapes
        .define(
            ShapeDescriptor::builder("order")
                .table("orders")
                .key("customer_id", 0)
                .key("number", 0)
                .field("total", 0.0),
        )
        .expect("order shape");
    shapes
        .define(ShapeDescriptor::builder("tag").key("id", 0).field("label", ""))
        .expect("tag shape");
    shapes
}

/// Configuration with three attempts and a one millisecond delay.
pub fn test_config() -> ClientConfig {
    ClientConfig::new()
        .with_connection(TEST_CONNECTION, "mem://test")
        .with_max_attempts(3)
        .with_attempt_delay(Duration::from_millis(1))
}

/// Writes a connection registry file declaring `connections` as
/// `(name, connection string)` pairs.
///
/// The file is removed when the returned handle is dropped.
pub fn config_file(connections: &[(&str, &str)]) -> NamedTempFile {
    let document = serde_json::json!({
        "connections": connections
            .iter()
            .map(|(name, connection_string)| serde_json::json!({
                "connection_name": name,
                "connection_string": connection_string,
                "provider": InMemoryEngine::NAME,
                "attempt_delay_ms": 1,
            }))
            .collect::<Vec<_>>(),
    });
    let mut file = NamedTempFile::new().expect("Failed to create config file");
    serde_json::to_writer_pretty(&mut file, &document).expect("Failed to write config file");
    file.flush().expect("Failed to flush config file");
    file
}

/// Sleeper that records the requested pauses without sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    pauses: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pauses requested so far.
    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().clone()
    }

    /// Number of pauses requested so far.
    pub fn count(&self) -> usize {
        self.pauses.lock().len()
    }

    /// Forgets the recorded pauses.
    pub fn reset(&self) {
        self.pauses.lock().clear();
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, delay: Duration) {
        self.pauses.lock().push(delay);
    }
}

/// Subscriber that keeps every notice it receives.
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    notices: Mutex<Vec<ChangeNotice>>,
}

impl RecordingSubscriber {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices received so far.
    pub fn notices(&self) -> Vec<ChangeNotice> {
        self.notices.lock().clone()
    }
}

impl ChangeSubscriber for RecordingSubscriber {
    fn publish(&self, notice: ChangeNotice) {
        self.notices.lock().push(notice);
    }
}

/// An in-memory store with fault injection and recorded pauses.
pub struct TestStore {
    /// The backing engine, for seeding and inspecting rows.
    pub engine: InMemoryEngine,
    /// Failures injected into every session.
    pub faults: Arc<FaultPlan>,
    /// Pauses requested by managers built from this store.
    pub sleeper: Arc<RecordingSleeper>,
    gate_engine: Arc<FaultyEngine>,
    config: ClientConfig,
}

impl TestStore {
    /// Creates a store over [`sample_registry`] with [`test_config`].
    pub fn new() -> Self {
        let engine = InMemoryEngine::new(sample_registry());
        let faults = Arc::new(FaultPlan::new());
        let gate_engine = Arc::new(FaultyEngine::new(Arc::new(engine.clone()), Arc::clone(&faults)));
        Self {
            engine,
            faults,
            sleeper: Arc::new(RecordingSleeper::new()),
            gate_engine,
            config: test_config(),
        }
    }

    /// Replaces the configuration given to new managers.
    #[must_use]
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// The engine managers are built on.
    pub fn gate_engine(&self) -> Arc<FaultyEngine> {
        Arc::clone(&self.gate_engine)
    }

    /// A builder with the store's engine, configuration and sleeper.
    pub fn template(&self) -> GateBuilder {
        EntityGate::builder(self.gate_engine())
            .with_config(self.config.clone())
            .with_sleeper(Arc::clone(&self.sleeper) as Arc<dyn Sleeper>)
    }

    /// A manager bound to `shape`.
    pub fn gate(&self, shape: &str) -> EntityGate {
        self.template()
            .with_shape(shape)
            .build()
            .expect("failed to build gate")
    }

    /// A manager with no shape.
    pub fn generic_gate(&self) -> EntityGate {
        self.template().build().expect("failed to build gate")
    }

    /// Stores a customer and returns its identifier.
    pub fn seed_customer(&self, name: &str) -> Identifier {
        self.engine
            .seed(EntityData::new("customer").with("name", name))
            .expect("failed to seed customer")
    }

    /// Stores a tag and returns its identifier.
    pub fn seed_tag(&self, label: &str) -> Identifier {
        self.engine
            .seed(EntityData::new("tag").with("label", label))
            .expect("failed to seed tag")
    }

    /// Stored copy of a row.
    pub fn stored(&self, shape: &str, identifier: &Identifier) -> Option<EntityData> {
        self.engine.row(shape, identifier)
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}
