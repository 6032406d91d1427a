//! TMQL Query Engine
//!
//! Provides parsing, evaluation and relational translation of topic map
//! queries.
//!
//! # Overview
//!
//! The query engine implements:
//! - Tokenizer and extensible token/production registry
//! - Recursive descent parser producing an immutable expression tree
//! - Tree-walking interpreter over any [`tmql_graph::TopicMapStore`]
//! - Two- and N-dimensional result reduction
//! - SQL translation against a relational topic map schema
//! - Prepared queries with a shared compiled-tree cache
//! - A modification dialect (`DELETE [CASCADE]`, `INSERT` of CTM text)

pub mod ast;
pub mod config;
pub mod dialect;
pub mod engine;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod registry;
pub mod results;
pub mod sql;
pub mod token;

pub use ast::{Axis, ExpressionTree, NodeIndex, NodeKind, NodeType};
pub use config::EngineConfig;
pub use dialect::ModificationDialect;
pub use engine::{Engine, PreparedQuery};
pub use interpreter::{FunctionContext, FunctionRegistry, Interpreter, QueryMatches};
pub use lexer::tokenize;
pub use parser::parse;
pub use registry::{Dialect, ExtensionEvaluator, ExtensionRegistry, ProductionEntry, TokenMatcher};
pub use results::{ExecutionStats, ReductionMode, ResultProcessor, ResultRow, ResultSet};
pub use sql::{SqlStatement, SqlTranslator};
pub use token::{Token, TokenKind};
