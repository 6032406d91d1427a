//! Bundled dialects
//!
//! A dialect adds tokens, production overrides and extension evaluators to
//! an [`ExtensionRegistry`](crate::registry::ExtensionRegistry) without
//! touching the core grammar. See [`crate::registry::Dialect`].

pub mod ctm;
pub mod modification;

pub use modification::{
    DeleteEvaluator, DeleteProduction, InsertEvaluator, InsertProduction, ModificationDialect,
    CASCADE, DELETE, INSERT,
};
