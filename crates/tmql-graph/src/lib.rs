//! TMQL Graph Store
//!
//! Provides the topic map store interface consumed by the query engine.
//!
//! # Overview
//!
//! The graph layer provides:
//! - The `TopicMapStore` trait with one navigation accessor per axis
//! - An in-memory backend for embedding and tests
//! - Buffered change sets committed atomically by modifying queries
//! - The relational schema description used by the SQL translator

pub mod changes;
pub mod memory;
pub mod schema;
pub mod store;

pub use changes::{ChangeSet, CommitSummary, Fragment, Removal, TopicReference};
pub use memory::MemoryTopicMap;
pub use schema::{RelationalSchema, Table};
pub use store::TopicMapStore;
