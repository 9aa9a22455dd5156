//! Concurrency tests: one manager per thread over a shared engine.

use entigate_core::{
    ChangeFeed, ConfigRegistry, ConfigSnapshot, ConnectionConfig, EntityGate, GateBuilder,
};
use entigate_engine::{Identifier, Value};
use entigate_testkit::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

const THREADS: usize = 8;
const INSERTS_PER_THREAD: usize = 25;

#[test]
fn managers_and_builders_move_across_threads() {
    fn assert_send<T: Send>() {}
    assert_send::<EntityGate>();
    assert_send::<GateBuilder>();

    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ConfigRegistry>();
    assert_send_sync::<ChangeFeed>();
}

#[test]
fn concurrent_inserts_get_unique_keys() {
    let store = TestStore::new();
    let template = store.template().with_shape("tag");

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let template = template.clone();
            thread::spawn(move || {
                let mut gate = template.build().unwrap();
                let mut ids = Vec::with_capacity(INSERTS_PER_THREAD);
                for i in 0..INSERTS_PER_THREAD {
                    gate.new_entity().unwrap().set("label", format!("t{t}-{i}"));
                    assert!(gate.save().unwrap());
                    match gate.primary_key().unwrap() {
                        Some((_, Value::Integer(id))) => ids.push(id),
                        other => panic!("unexpected key {other:?}"),
                    }
                }
                ids
            })
        })
        .collect();

    let mut ids = HashSet::new();
    for handle in handles {
        for id in handle.join().unwrap() {
            assert!(ids.insert(id));
        }
    }
    assert_eq!(ids.len(), THREADS * INSERTS_PER_THREAD);
    assert_eq!(store.engine.row_count("tag"), THREADS * INSERTS_PER_THREAD);
}

#[test]
fn concurrent_updates_of_distinct_rows() {
    let store = TestStore::new();
    let ids: Vec<Identifier> = (0..THREADS).map(|i| store.seed_tag(&format!("tag{i}"))).collect();
    let template = store.template().with_shape("tag");

    let handles: Vec<_> = ids
        .iter()
        .cloned()
        .map(|id| {
            let template = template.clone();
            thread::spawn(move || {
                let mut gate = template.build().unwrap();
                for round in 0..10 {
                    assert!(gate.load(Some(id.clone())).unwrap());
                    gate.entity().unwrap().set("label", format!("round{round}"));
                    assert!(gate.save().unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for id in &ids {
        assert_eq!(store.stored("tag", id).unwrap().get("label"), Value::from("round9"));
    }
}

#[test]
fn registry_reload_is_seen_atomically() {
    let registry = Arc::new(
        ConfigRegistry::from_connections(vec![ConnectionConfig::new("Main", "mem://v0")]).unwrap(),
    );

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || {
                for _ in 0..200 {
                    let snapshot = registry.snapshot();
                    assert_eq!(snapshot.connections.len(), 1);
                    let config = registry.client_config(Some("main")).unwrap();
                    assert!(config.connection_string().starts_with("mem://v"));
                }
            })
        })
        .collect();

    for version in 1..=50 {
        registry
            .reload(ConfigSnapshot {
                connections: vec![ConnectionConfig::new("Main", format!("mem://v{version}"))],
            })
            .unwrap();
    }
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(registry.get("MAIN").unwrap().connection_string, "mem://v50");
}

#[test]
fn change_feed_sequences_are_unique_across_managers() {
    let store = TestStore::new().with_config(test_config().with_notifications(true));
    let feed = Arc::new(ChangeFeed::new());
    let template = store.template().with_shape("tag").with_subscriber(feed.clone());

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let template = template.clone();
            thread::spawn(move || {
                let mut gate = template.build().unwrap();
                for i in 0..10 {
                    gate.new_entity().unwrap().set("label", format!("t{t}-{i}"));
                    assert!(gate.save().unwrap());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let events = feed.poll(0, usize::MAX);
    assert_eq!(events.len(), 40);
    let sequences: HashSet<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences.len(), 40);
    assert_eq!(feed.latest_sequence(), 40);
}
