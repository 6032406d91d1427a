//! Error types for the TMQL engine
//!
//! Every stage (lexing, parsing, evaluation, translation) reports failures
//! through the single [`Error`] enum so callers can render one diagnostic.

use thiserror::Error;

/// The main error type for TMQL operations
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    // ========== Compilation Errors ==========
    #[error("Lexical error at position {position}: {message}")]
    Lexical { position: usize, message: String },

    #[error("Invalid syntax in {node_type}: {message} (tokens: {tokens:?})")]
    InvalidSyntax {
        node_type: String,
        tokens: Vec<String>,
        message: String,
    },

    #[error("Recursion limit of {0} exceeded while parsing")]
    RecursionLimit(usize),

    // ========== Function Errors ==========
    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Function {function} expects {expected} argument(s), found {found}")]
    Arity {
        function: String,
        expected: String,
        found: usize,
    },

    // ========== Evaluation Errors ==========
    #[error("Runtime evaluation error: {0}")]
    RuntimeEvaluation(String),

    #[error("Parameter {0} is not bound")]
    UnboundParameter(usize),

    #[error("Parameter index {index} out of range, query declares {count} parameter(s)")]
    ParameterIndex { index: usize, count: usize },

    // ========== Translation Errors ==========
    #[error("No relational translation for {0}")]
    UnsupportedTranslation(String),

    // ========== Registry Errors ==========
    #[error("Extension registry error: {0}")]
    ExtensionRegistry(String),

    // ========== Graph Errors ==========
    #[error("Construct not found: {0}")]
    ConstructNotFound(String),

    #[error("Invalid graph operation: {0}")]
    InvalidGraphOperation(String),

    // ========== Configuration Errors ==========
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ========== Internal Errors ==========
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for TMQL operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for an [`Error::InvalidSyntax`] built from a token window
    pub fn invalid_syntax<S: Into<String>>(
        node_type: impl std::fmt::Display,
        tokens: &[S],
        message: impl Into<String>,
    ) -> Self
    where
        S: Clone,
    {
        Error::InvalidSyntax {
            node_type: node_type.to_string(),
            tokens: tokens.iter().cloned().map(Into::into).collect(),
            message: message.into(),
        }
    }

    /// Returns true if the error was raised while compiling query text
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            Error::Lexical { .. } | Error::InvalidSyntax { .. } | Error::RecursionLimit(_)
        )
    }

    /// Returns true if the error was raised while evaluating a compiled query
    pub fn is_evaluation_error(&self) -> bool {
        matches!(
            self,
            Error::UnknownFunction(_)
                | Error::Arity { .. }
                | Error::RuntimeEvaluation(_)
                | Error::UnboundParameter(_)
        )
    }

    /// Source position for diagnostics, when the error carries one
    pub fn position(&self) -> Option<usize> {
        match self {
            Error::Lexical { position, .. } => Some(*position),
            _ => None,
        }
    }
}
