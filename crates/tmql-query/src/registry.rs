//! Token and extension registry
//!
//! Classification of literals into [`TokenKind`]s, grammar production
//! overrides and extension evaluators all live here. The engine owns one
//! [`ExtensionRegistry`]; dialects add to it before queries are compiled.

use crate::ast::{NodeIndex, NodeType, Window};
use crate::interpreter::{Interpreter, QueryMatches};
use crate::lexer::Lexeme;
use crate::parser::Parser;
use crate::token::{Token, TokenKind};
use std::collections::HashMap;
use std::sync::Arc;
use tmql_core::{Error, Result};
use tracing::debug;

/// What a matcher may look at besides the literal itself
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchContext {
    /// The literal was a quoted string
    pub quoted: bool,

    /// Kind assigned to the preceding token
    pub previous: Option<TokenKind>,
}

/// Recognises one token kind
pub trait TokenMatcher: Send + Sync {
    fn kind(&self) -> TokenKind;

    fn matches(&self, literal: &str, context: &MatchContext) -> bool;

    /// Literal stored in the classified token
    fn canonical(&self, literal: &str) -> String {
        literal.to_string()
    }
}

/// Exact keyword, uppercase only
pub struct KeywordMatcher {
    kind: TokenKind,
    keyword: &'static str,
}

impl KeywordMatcher {
    pub fn new(kind: TokenKind, keyword: &'static str) -> Self {
        Self { kind, keyword }
    }
}

impl TokenMatcher for KeywordMatcher {
    fn kind(&self) -> TokenKind {
        self.kind
    }

    fn matches(&self, literal: &str, context: &MatchContext) -> bool {
        !context.quoted && literal == self.keyword
    }
}

/// One or more symbol spellings mapped to a canonical one
pub struct SymbolMatcher {
    kind: TokenKind,
    spellings: &'static [&'static str],
}

impl SymbolMatcher {
    pub fn new(kind: TokenKind, spellings: &'static [&'static str]) -> Self {
        Self { kind, spellings }
    }
}

impl TokenMatcher for SymbolMatcher {
    fn kind(&self) -> TokenKind {
        self.kind
    }

    fn matches(&self, literal: &str, context: &MatchContext) -> bool {
        !context.quoted && self.spellings.contains(&literal)
    }

    fn canonical(&self, literal: &str) -> String {
        self.spellings
            .first()
            .map(|s| s.to_string())
            .unwrap_or_else(|| literal.to_string())
    }
}

/// Matcher driven by a predicate function
pub struct PatternMatcher {
    kind: TokenKind,
    predicate: fn(&str, &MatchContext) -> bool,
}

impl PatternMatcher {
    pub fn new(kind: TokenKind, predicate: fn(&str, &MatchContext) -> bool) -> Self {
        Self { kind, predicate }
    }
}

impl TokenMatcher for PatternMatcher {
    fn kind(&self) -> TokenKind {
        self.kind
    }

    fn matches(&self, literal: &str, context: &MatchContext) -> bool {
        (self.predicate)(literal, context)
    }
}

const KEYWORDS: &[(TokenKind, &str)] = &[
    (TokenKind::Select, "SELECT"),
    (TokenKind::For, "FOR"),
    (TokenKind::In, "IN"),
    (TokenKind::Let, "LET"),
    (TokenKind::Where, "WHERE"),
    (TokenKind::Order, "ORDER"),
    (TokenKind::By, "BY"),
    (TokenKind::Asc, "ASC"),
    (TokenKind::Desc, "DESC"),
    (TokenKind::Unique, "UNIQUE"),
    (TokenKind::Offset, "OFFSET"),
    (TokenKind::Limit, "LIMIT"),
    (TokenKind::Return, "RETURN"),
    (TokenKind::As, "AS"),
    (TokenKind::And, "AND"),
    (TokenKind::Or, "OR"),
    (TokenKind::Not, "NOT"),
    (TokenKind::Exists, "EXISTS"),
    (TokenKind::Some, "SOME"),
    (TokenKind::Every, "EVERY"),
    (TokenKind::At, "AT"),
    (TokenKind::Least, "LEAST"),
    (TokenKind::Most, "MOST"),
    (TokenKind::Satisfies, "SATISFIES"),
    (TokenKind::Isa, "ISA"),
    (TokenKind::Ako, "AKO"),
    (TokenKind::Div, "div"),
    (TokenKind::Mod, "mod"),
];

const SYMBOLS: &[(TokenKind, &[&str])] = &[
    (TokenKind::ForwardStep, &[">>"]),
    (TokenKind::BackwardStep, &["<<"]),
    (TokenKind::TypeShortcut, &["//"]),
    (TokenKind::ValueShortcut, &["/"]),
    (TokenKind::BackwardValueShortcut, &["\\"]),
    (TokenKind::SquareOpen, &["["]),
    (TokenKind::SquareClose, &["]"]),
    (TokenKind::RoundOpen, &["("]),
    (TokenKind::RoundClose, &[")"]),
    (TokenKind::CurlyOpen, &["{"]),
    (TokenKind::CurlyClose, &["}"]),
    (TokenKind::Comma, &[","]),
    (TokenKind::Dot, &["."]),
    (TokenKind::DoubleDot, &[".."]),
    (TokenKind::Ellipsis, &["..."]),
    (TokenKind::Colon, &[":"]),
    (TokenKind::Assign, &[":="]),
    (TokenKind::Scope, &["@"]),
    (TokenKind::Caret, &["^"]),
    (TokenKind::Equals, &["==", "="]),
    (TokenKind::NotEquals, &["!="]),
    (TokenKind::Less, &["<"]),
    (TokenKind::LessEquals, &["<="]),
    (TokenKind::Greater, &[">"]),
    (TokenKind::GreaterEquals, &[">="]),
    (TokenKind::RegexMatch, &["=~"]),
    (TokenKind::Plus, &["+"]),
    (TokenKind::Minus, &["-"]),
    (TokenKind::Star, &["*"]),
    (TokenKind::Union, &["++"]),
    (TokenKind::Difference, &["--"]),
    (TokenKind::Parameter, &["?"]),
];

const AXIS_NAMES: &[&str] = &[
    "instances",
    "types",
    "supertypes",
    "subtypes",
    "typed",
    "characteristics",
    "scope",
    "players",
    "roles",
    "traverse",
    "locators",
    "indicators",
    "item",
    "reifier",
    "atomify",
    "id",
];

fn is_word(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn builtin_matchers() -> Vec<Arc<dyn TokenMatcher>> {
    let mut matchers: Vec<Arc<dyn TokenMatcher>> = Vec::new();

    matchers.push(Arc::new(PatternMatcher::new(
        TokenKind::StringLiteral,
        |_, ctx| ctx.quoted,
    )));
    matchers.push(Arc::new(PatternMatcher::new(TokenKind::AxisName, |s, ctx| {
        !ctx.quoted
            && matches!(
                ctx.previous,
                Some(TokenKind::ForwardStep) | Some(TokenKind::BackwardStep)
            )
            && AXIS_NAMES.contains(&s)
    })));
    for (kind, spellings) in SYMBOLS {
        matchers.push(Arc::new(SymbolMatcher::new(*kind, spellings)));
    }
    for (kind, keyword) in KEYWORDS {
        matchers.push(Arc::new(KeywordMatcher::new(*kind, keyword)));
    }
    matchers.push(Arc::new(PatternMatcher::new(
        TokenKind::BooleanLiteral,
        |s, ctx| !ctx.quoted && (s == "true" || s == "false"),
    )));
    matchers.push(Arc::new(PatternMatcher::new(TokenKind::Prefix, |s, ctx| {
        !ctx.quoted && s == "%prefix"
    })));
    matchers.push(Arc::new(PatternMatcher::new(TokenKind::Pragma, |s, ctx| {
        !ctx.quoted && s == "%pragma"
    })));
    matchers.push(Arc::new(PatternMatcher::new(
        TokenKind::TopicMapVariable,
        |s, ctx| !ctx.quoted && s == "%_",
    )));
    matchers.push(Arc::new(PatternMatcher::new(
        TokenKind::IndexVariable,
        |s, ctx| !ctx.quoted && s == "$#",
    )));
    matchers.push(Arc::new(PatternMatcher::new(TokenKind::Variable, |s, ctx| {
        !ctx.quoted && s.len() > 1 && (s.starts_with('$') || s.starts_with('%'))
    })));
    matchers.push(Arc::new(PatternMatcher::new(
        TokenKind::IntegerLiteral,
        |s, ctx| !ctx.quoted && !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()),
    )));
    matchers.push(Arc::new(PatternMatcher::new(
        TokenKind::DecimalLiteral,
        |s, ctx| {
            !ctx.quoted
                && match s.split_once('.') {
                    Some((a, b)) => {
                        !a.is_empty()
                            && !b.is_empty()
                            && a.chars().chain(b.chars()).all(|c| c.is_ascii_digit())
                    }
                    None => false,
                }
        },
    )));
    matchers.push(Arc::new(PatternMatcher::new(TokenKind::Iri, |s, ctx| {
        !ctx.quoted && s.contains("://")
    })));
    matchers.push(Arc::new(PatternMatcher::new(TokenKind::QName, |s, ctx| {
        !ctx.quoted
            && match s.split_once(':') {
                Some((prefix, local)) => is_word(prefix) && is_word(local),
                None => false,
            }
    })));

    matchers
}

/// Ordered set of token matchers
///
/// Dialect matchers are consulted before the built-in ones. A literal no
/// matcher claims becomes a [`TokenKind::Placeholder`].
pub struct TokenRegistry {
    dialect: Vec<Arc<dyn TokenMatcher>>,
    builtin: Vec<Arc<dyn TokenMatcher>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self {
            dialect: Vec::new(),
            builtin: builtin_matchers(),
        }
    }

    pub fn is_registered(&self, kind: TokenKind) -> bool {
        self.dialect
            .iter()
            .chain(self.builtin.iter())
            .any(|m| m.kind() == kind)
    }

    /// Add a matcher; registering an existing kind again is a no-op
    pub fn register(&mut self, matcher: Arc<dyn TokenMatcher>) -> bool {
        if self.is_registered(matcher.kind()) {
            debug!("Token kind {} already registered", matcher.kind());
            return false;
        }
        debug!("Registered token kind {}", matcher.kind());
        self.dialect.push(matcher);
        true
    }

    /// Classify a single literal
    pub fn classify(&self, literal: &str, context: &MatchContext) -> (TokenKind, String) {
        self.dialect
            .iter()
            .chain(self.builtin.iter())
            .find(|m| m.matches(literal, context))
            .map(|m| (m.kind(), m.canonical(literal)))
            .unwrap_or_else(|| (TokenKind::Placeholder, literal.to_string()))
    }

    /// Classify a lexeme stream left to right
    pub fn classify_all(&self, lexemes: &[Lexeme]) -> Vec<Token> {
        let mut tokens: Vec<Token> = Vec::with_capacity(lexemes.len());
        for lexeme in lexemes {
            let context = MatchContext {
                quoted: lexeme.quoted,
                previous: tokens.last().map(|t| t.kind),
            };
            let (kind, literal) = self.classify(&lexeme.literal, &context);
            tokens.push(Token::new(kind, literal, lexeme.position));
        }
        tokens
    }
}

impl Default for TokenRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Validity check of a production override over a token window
pub type ValidityPredicate = Arc<dyn Fn(&[Token]) -> bool + Send + Sync>;

/// Builds the node of a production override
pub trait ProductionFactory: Send + Sync {
    fn build(&self, parser: &mut Parser<'_>, window: Window) -> Result<NodeIndex>;
}

/// Production override for one grammar rule
#[derive(Clone)]
pub struct ProductionEntry {
    pub node_type: NodeType,
    pub name: String,
    pub is_valid: ValidityPredicate,
    pub factory: Arc<dyn ProductionFactory>,
}

/// Evaluates extension nodes contributed by a dialect
pub trait ExtensionEvaluator: Send + Sync {
    fn evaluate(&self, interpreter: &mut Interpreter<'_>, node: NodeIndex) -> Result<QueryMatches>;

    /// True if the evaluator changes the topic map
    fn is_modification(&self) -> bool {
        false
    }
}

/// A bundle of tokens, productions and evaluators
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    fn token_matchers(&self) -> Vec<Arc<dyn TokenMatcher>>;

    fn productions(&self) -> Vec<ProductionEntry>;

    fn evaluators(&self) -> Vec<(String, Arc<dyn ExtensionEvaluator>)>;
}

/// Everything that can extend the language
pub struct ExtensionRegistry {
    tokens: TokenRegistry,
    productions: Vec<ProductionEntry>,
    evaluators: HashMap<String, Arc<dyn ExtensionEvaluator>>,
    dialects: Vec<String>,
}

impl ExtensionRegistry {
    pub fn new() -> Self {
        Self {
            tokens: TokenRegistry::new(),
            productions: Vec::new(),
            evaluators: HashMap::new(),
            dialects: Vec::new(),
        }
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn register_token(&mut self, matcher: Arc<dyn TokenMatcher>) -> bool {
        self.tokens.register(matcher)
    }

    pub fn register_production(&mut self, entry: ProductionEntry) {
        debug!(
            "Registered production {} for {}",
            entry.name, entry.node_type
        );
        self.productions.push(entry);
    }

    pub fn register_evaluator(
        &mut self,
        name: impl Into<String>,
        evaluator: Arc<dyn ExtensionEvaluator>,
    ) -> Result<()> {
        let name = name.into();
        if self.evaluators.contains_key(&name) {
            return Err(Error::ExtensionRegistry(format!(
                "Evaluator '{}' is already registered",
                name
            )));
        }
        self.evaluators.insert(name, evaluator);
        Ok(())
    }

    /// Register every part of a dialect; a dialect is registered only once
    pub fn register_dialect(&mut self, dialect: &dyn Dialect) -> Result<bool> {
        let name = dialect.name().to_string();
        if self.dialects.contains(&name) {
            return Ok(false);
        }
        for (evaluator_name, _) in dialect.evaluators() {
            if self.evaluators.contains_key(&evaluator_name) {
                return Err(Error::ExtensionRegistry(format!(
                    "Dialect '{}' redefines evaluator '{}'",
                    name, evaluator_name
                )));
            }
        }
        for matcher in dialect.token_matchers() {
            self.tokens.register(matcher);
        }
        for entry in dialect.productions() {
            self.register_production(entry);
        }
        for (evaluator_name, evaluator) in dialect.evaluators() {
            self.evaluators.insert(evaluator_name, evaluator);
        }
        debug!("Registered dialect {}", name);
        self.dialects.push(name);
        Ok(true)
    }

    /// First registered override valid for the window, if any
    pub fn resolve_production(
        &self,
        node_type: NodeType,
        tokens: &[Token],
    ) -> Option<ProductionEntry> {
        self.productions
            .iter()
            .find(|p| p.node_type == node_type && (p.is_valid)(tokens))
            .cloned()
    }

    pub fn has_productions(&self, node_type: NodeType) -> bool {
        self.productions.iter().any(|p| p.node_type == node_type)
    }

    pub fn evaluator(&self, name: &str) -> Option<Arc<dyn ExtensionEvaluator>> {
        self.evaluators.get(name).cloned()
    }

    pub fn dialects(&self) -> &[String] {
        &self.dialects
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;

    fn kinds(registry: &TokenRegistry, input: &str) -> Vec<TokenKind> {
        registry
            .classify_all(&tokenize(input).unwrap())
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_axis_name_needs_step() {
        let registry = TokenRegistry::new();
        assert_eq!(
            kinds(&registry, "types >> types"),
            vec![TokenKind::Placeholder, TokenKind::ForwardStep, TokenKind::AxisName]
        );
    }

    #[test]
    fn test_keywords_are_uppercase() {
        let registry = TokenRegistry::new();
        assert_eq!(kinds(&registry, "AND and"), vec![TokenKind::And, TokenKind::Placeholder]);
    }

    #[test]
    fn test_single_equals_is_canonical_double() {
        let registry = TokenRegistry::new();
        let tokens = registry.classify_all(&tokenize("$a = $b").unwrap());
        assert_eq!(tokens[1].kind, TokenKind::Equals);
        assert_eq!(tokens[1].literal, "==");
    }

    #[test]
    fn test_literals_and_references() {
        let registry = TokenRegistry::new();
        assert_eq!(
            kinds(
                &registry,
                r#""x" 12 - 3 1.5 true tm:name http://a.org/b myTopic $x $# %_ %prefix ?"#
            ),
            vec![
                TokenKind::StringLiteral,
                TokenKind::IntegerLiteral,
                TokenKind::Minus,
                TokenKind::IntegerLiteral,
                TokenKind::DecimalLiteral,
                TokenKind::BooleanLiteral,
                TokenKind::QName,
                TokenKind::Iri,
                TokenKind::Placeholder,
                TokenKind::Variable,
                TokenKind::IndexVariable,
                TokenKind::TopicMapVariable,
                TokenKind::Prefix,
                TokenKind::Parameter,
            ]
        );
    }

    #[test]
    fn test_quoted_keyword_stays_string() {
        let registry = TokenRegistry::new();
        assert_eq!(kinds(&registry, "\"AND\""), vec![TokenKind::StringLiteral]);
    }

    #[test]
    fn test_dialect_matcher_wins_and_duplicates_are_ignored() {
        let mut registry = TokenRegistry::new();
        assert!(registry.register(Arc::new(KeywordMatcher::new(
            TokenKind::Custom("DELETE"),
            "DELETE"
        ))));
        assert!(!registry.register(Arc::new(KeywordMatcher::new(
            TokenKind::Custom("DELETE"),
            "DELETE"
        ))));
        assert!(!registry.register(Arc::new(KeywordMatcher::new(TokenKind::And, "UND"))));
        assert_eq!(
            kinds(&registry, "DELETE myTopic"),
            vec![TokenKind::Custom("DELETE"), TokenKind::Placeholder]
        );
    }
}
