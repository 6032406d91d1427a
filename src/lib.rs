//! TMQL - Topic map query engine
//!
//! This is the main library crate that re-exports all TMQL components.

pub use tmql_core as core;
pub use tmql_graph as graph;
pub use tmql_query as query;

// Re-export commonly used types
pub use tmql_core::{psi, ConstructId, ConstructKind, Direction, EntityId, Error, Result, Value};

pub use tmql_graph::{MemoryTopicMap, RelationalSchema, TopicMapStore};
pub use tmql_query::{
    Engine, EngineConfig, ModificationDialect, PreparedQuery, ResultRow, ResultSet, SqlStatement,
};
