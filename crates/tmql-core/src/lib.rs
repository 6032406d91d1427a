//! TMQL Core Library
//!
//! This crate provides the fundamental types, values and error handling
//! shared by the topic map store and the query engine.
//!
//! # Modules
//!
//! - `types` - Construct kinds, axis directions and well-known identifiers
//! - `value` - Values bound to variables and stored in result cells
//! - `error` - Error types and result aliases
//! - `id` - Construct identification and generation

pub mod error;
pub mod id;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use id::{ConstructId, EntityId, IdGenerator, TopicMapId};
pub use types::{psi, ConstructKind, Direction};
pub use value::Value;
