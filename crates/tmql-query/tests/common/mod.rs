//! Shared fixtures for engine integration tests

#![allow(dead_code)]

use tmql_core::ConstructId;
use tmql_graph::MemoryTopicMap;
use tmql_query::{Engine, EngineConfig, ModificationDialect};
use tracing_subscriber::EnvFilter;

pub const BASE: &str = "http://example.org/";

/// Route engine logs to the test output; `RUST_LOG` picks the level
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn create_test_engine() -> Engine {
    init_tracing();
    let engine = Engine::new(EngineConfig::new(BASE)).unwrap();
    engine.register_dialect(&ModificationDialect).unwrap();
    engine
}

pub fn create_test_map() -> MemoryTopicMap {
    MemoryTopicMap::new(BASE)
}

/// Topic identified by `BASE` + `local`, created on first use
pub fn topic(map: &MemoryTopicMap, local: &str) -> ConstructId {
    map.create_topic_by_subject_identifier(&format!("{}{}", BASE, local))
        .unwrap()
}
