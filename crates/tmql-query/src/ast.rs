//! Expression tree
//!
//! A compiled query is an arena of [`ExpressionNode`]s. Children are owned
//! through indices into the arena and the parent link is a plain index, so
//! the tree has no reference cycles and can be shared read-only behind an
//! `Arc` by any number of executions.

use crate::token::Token;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use tmql_core::{psi, Direction, Error, Result, Value};

/// Grammar sub-types of a query expression
pub mod grammar {
    pub const SELECT: u8 = 0;
    pub const FLWR: u8 = 1;
    pub const PATH: u8 = 2;
    pub const EXTENSION: u8 = 3;

    // Filter postfixes
    pub const INDEX_FILTER: u8 = 0;
    pub const RANGE_FILTER: u8 = 1;
    pub const PREDICATE_FILTER: u8 = 2;
}

/// Token index range a node was built from
pub type Window = Range<usize>;

/// Handle of a node inside its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeIndex(usize);

impl NodeIndex {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Navigation axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Axis {
    Instances,
    Types,
    Supertypes,
    Subtypes,
    Typed,
    Characteristics,
    Scope,
    Players,
    Roles,
    Traverse,
    Locators,
    Indicators,
    Item,
    Reifier,
    Atomify,
    Id,
}

impl Axis {
    pub const ALL: [Axis; 16] = [
        Axis::Instances,
        Axis::Types,
        Axis::Supertypes,
        Axis::Subtypes,
        Axis::Typed,
        Axis::Characteristics,
        Axis::Scope,
        Axis::Players,
        Axis::Roles,
        Axis::Traverse,
        Axis::Locators,
        Axis::Indicators,
        Axis::Item,
        Axis::Reifier,
        Axis::Atomify,
        Axis::Id,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Axis::Instances => "instances",
            Axis::Types => "types",
            Axis::Supertypes => "supertypes",
            Axis::Subtypes => "subtypes",
            Axis::Typed => "typed",
            Axis::Characteristics => "characteristics",
            Axis::Scope => "scope",
            Axis::Players => "players",
            Axis::Roles => "roles",
            Axis::Traverse => "traverse",
            Axis::Locators => "locators",
            Axis::Indicators => "indicators",
            Axis::Item => "item",
            Axis::Reifier => "reifier",
            Axis::Atomify => "atomify",
            Axis::Id => "id",
        }
    }

    pub fn from_name(name: &str) -> Option<Axis> {
        Axis::ALL.into_iter().find(|a| a.name() == name)
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Quantifier {
    Some,
    Every,
    AtLeast(usize),
    AtMost(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompareOp {
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    RegexMatch,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Equals => "==",
            CompareOp::NotEquals => "!=",
            CompareOp::Less => "<",
            CompareOp::LessEquals => "<=",
            CompareOp::Greater => ">",
            CompareOp::GreaterEquals => ">=",
            CompareOp::RegexMatch => "=~",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
}

/// Item reference as written in the query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Reference {
    /// Absolute IRI, QNames already expanded
    Absolute(String),
    /// Relative reference resolved against the base locator
    Relative(String),
}

impl Reference {
    /// Absolute IRI of the reference
    pub fn resolve(&self, base_locator: &str) -> String {
        match self {
            Reference::Absolute(iri) => iri.clone(),
            Reference::Relative(local) => format!("{}{}", base_locator, local),
        }
    }
}

/// Clause modifiers shared by SELECT and FLWR expressions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Modifiers {
    pub unique: bool,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

/// Node discriminant plus kind-specific payload
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum NodeKind {
    // ========== Query level ==========
    Query,
    Environment,
    Select(Modifiers),
    Flwr(Modifiers),
    For { variable: String },
    Let { variable: String },
    Where,
    OrderBy,
    OrderItem { descending: bool },
    Return,
    Tuple,
    TupleItem { alias: Option<String> },

    // ========== Boolean ==========
    Or,
    And,
    Not,
    Exists,
    Quantified { quantifier: Quantifier, variable: String },
    Isa,
    Ako,
    Comparison(CompareOp),
    /// Children: association type, then role type and player pairs
    PredicateInvocation { strict: bool },

    // ========== Content ==========
    Union,
    Difference,
    Arithmetic(ArithmeticOp),
    /// Children: primary, then steps and filters in order
    Path,
    /// Optional child: type argument
    Step { axis: Axis, direction: Direction },
    /// Grammar type tells index, range and predicate filters apart
    Filter,

    // ========== Primaries ==========
    ItemReference(Reference),
    Literal(Value),
    Variable(String),
    IndexVariable,
    Current,
    TopicMap,
    Parameter(usize),
    FunctionCall(String),
    SubQuery,

    /// Node contributed by a dialect
    Extension { name: String, flags: Vec<String> },
}

/// Grammar rule a node instance belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeType {
    QueryExpression,
    EnvironmentClause,
    SelectExpression,
    FlwrExpression,
    ForClause,
    LetClause,
    WhereClause,
    OrderByClause,
    ReturnClause,
    TupleExpression,
    BooleanExpression,
    BooleanPrimitive,
    QuantifiedExpression,
    PredicateInvocation,
    ValueExpression,
    PathExpression,
    Step,
    FilterPostfix,
    Anchor,
    FunctionInvocation,
    Extension,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl NodeKind {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeKind::Query => NodeType::QueryExpression,
            NodeKind::Environment => NodeType::EnvironmentClause,
            NodeKind::Select(_) => NodeType::SelectExpression,
            NodeKind::Flwr(_) => NodeType::FlwrExpression,
            NodeKind::For { .. } => NodeType::ForClause,
            NodeKind::Let { .. } => NodeType::LetClause,
            NodeKind::Where => NodeType::WhereClause,
            NodeKind::OrderBy | NodeKind::OrderItem { .. } => NodeType::OrderByClause,
            NodeKind::Return => NodeType::ReturnClause,
            NodeKind::Tuple | NodeKind::TupleItem { .. } => NodeType::TupleExpression,
            NodeKind::Or | NodeKind::And | NodeKind::Not => NodeType::BooleanExpression,
            NodeKind::Exists
            | NodeKind::Isa
            | NodeKind::Ako
            | NodeKind::Comparison(_) => NodeType::BooleanPrimitive,
            NodeKind::Quantified { .. } => NodeType::QuantifiedExpression,
            NodeKind::PredicateInvocation { .. } => NodeType::PredicateInvocation,
            NodeKind::Union | NodeKind::Difference | NodeKind::Arithmetic(_) => {
                NodeType::ValueExpression
            }
            NodeKind::Path => NodeType::PathExpression,
            NodeKind::Step { .. } => NodeType::Step,
            NodeKind::Filter => NodeType::FilterPostfix,
            NodeKind::ItemReference(_)
            | NodeKind::Literal(_)
            | NodeKind::Variable(_)
            | NodeKind::IndexVariable
            | NodeKind::Current
            | NodeKind::TopicMap
            | NodeKind::Parameter(_)
            | NodeKind::SubQuery => NodeType::Anchor,
            NodeKind::FunctionCall(_) => NodeType::FunctionInvocation,
            NodeKind::Extension { .. } => NodeType::Extension,
        }
    }

    /// True for the boolean connectives and primitives
    pub fn is_boolean(&self) -> bool {
        matches!(
            self.node_type(),
            NodeType::BooleanExpression
                | NodeType::BooleanPrimitive
                | NodeType::QuantifiedExpression
                | NodeType::PredicateInvocation
        )
    }
}

/// One grammar production instance
#[derive(Debug, Clone, Serialize)]
pub struct ExpressionNode {
    pub kind: NodeKind,

    /// Owned children in order
    pub children: Vec<NodeIndex>,

    /// Non-owning back reference
    pub parent: Option<NodeIndex>,

    /// Token window the node was built from
    pub span: Window,

    /// Disambiguates alternative productions of the same rule
    pub grammar_type: Option<u8>,
}

/// Prefixes and pragmas declared by the environment clause
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Environment {
    pub prefixes: Vec<(String, String)>,
    pub pragmas: Vec<(String, String)>,
}

impl Environment {
    /// Absolute IRI of `prefix:local`; declared prefixes shadow predefined ones
    pub fn expand(&self, qname: &str) -> Option<String> {
        let (prefix, local) = qname.split_once(':')?;
        let declared = self
            .prefixes
            .iter()
            .rev()
            .find(|(name, _)| name == prefix)
            .map(|(_, iri)| iri.as_str());
        declared
            .or_else(|| psi::predefined_prefix(prefix))
            .map(|iri| format!("{}{}", iri, local))
    }

    pub fn pragma(&self, key: &str) -> Option<&str> {
        self.pragmas
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

/// A compiled query
#[derive(Debug, Clone, Serialize)]
pub struct ExpressionTree {
    text: String,
    tokens: Vec<Token>,
    nodes: Vec<ExpressionNode>,
    root: Option<NodeIndex>,
    environment: Environment,
    parameter_count: usize,
    dialects: Vec<String>,
}

impl ExpressionTree {
    pub(crate) fn new(text: impl Into<String>, tokens: Vec<Token>) -> Self {
        Self {
            text: text.into(),
            tokens,
            nodes: Vec::new(),
            root: None,
            environment: Environment::default(),
            parameter_count: 0,
            dialects: Vec::new(),
        }
    }

    pub(crate) fn push(
        &mut self,
        kind: NodeKind,
        span: Window,
        children: Vec<NodeIndex>,
        grammar_type: Option<u8>,
    ) -> NodeIndex {
        let index = NodeIndex(self.nodes.len());
        for child in &children {
            self.nodes[child.0].parent = Some(index);
        }
        self.nodes.push(ExpressionNode {
            kind,
            children,
            parent: None,
            span,
            grammar_type,
        });
        index
    }

    pub(crate) fn set_root(&mut self, root: NodeIndex) {
        self.root = Some(root);
    }

    pub(crate) fn set_environment(&mut self, environment: Environment) {
        self.environment = environment;
    }

    pub(crate) fn set_parameter_count(&mut self, count: usize) {
        self.parameter_count = count;
    }

    pub(crate) fn set_dialects(&mut self, dialects: Vec<String>) {
        self.dialects = dialects;
    }

    /// Replace the child order of a node.
    ///
    /// The new order must be a permutation of the current children.
    pub(crate) fn reorder_children(
        &mut self,
        node: NodeIndex,
        order: Vec<NodeIndex>,
    ) -> Result<()> {
        let current = &self.nodes[node.0].children;
        let mut counts: HashMap<NodeIndex, isize> = HashMap::new();
        for child in current {
            *counts.entry(*child).or_default() += 1;
        }
        for child in &order {
            *counts.entry(*child).or_default() -= 1;
        }
        if order.len() != current.len() || counts.values().any(|c| *c != 0) {
            return Err(Error::Internal(format!(
                "Reordering children of {} must preserve them",
                node
            )));
        }
        self.nodes[node.0].children = order;
        Ok(())
    }

    /// Root node of the query
    pub fn root(&self) -> NodeIndex {
        self.root.unwrap_or(NodeIndex(self.nodes.len().saturating_sub(1)))
    }

    pub fn node(&self, index: NodeIndex) -> &ExpressionNode {
        &self.nodes[index.0]
    }

    pub fn kind(&self, index: NodeIndex) -> &NodeKind {
        &self.nodes[index.0].kind
    }

    pub fn children(&self, index: NodeIndex) -> &[NodeIndex] {
        &self.nodes[index.0].children
    }

    pub fn child(&self, index: NodeIndex, position: usize) -> Result<NodeIndex> {
        self.nodes[index.0]
            .children
            .get(position)
            .copied()
            .ok_or_else(|| {
                Error::Internal(format!(
                    "{} node {} has no child {}",
                    self.node(index).kind.node_type(),
                    index,
                    position
                ))
            })
    }

    pub fn parent(&self, index: NodeIndex) -> Option<NodeIndex> {
        self.nodes[index.0].parent
    }

    /// Tokens a node was built from
    pub fn tokens_of(&self, index: NodeIndex) -> &[Token] {
        let span = &self.nodes[index.0].span;
        &self.tokens[span.start.min(self.tokens.len())..span.end.min(self.tokens.len())]
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Query text the tree was compiled from
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Number of `?` placeholders
    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// Dialects active when the tree was compiled
    pub fn dialects(&self) -> &[String] {
        &self.dialects
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Grammar type of the root query expression
    pub fn query_type(&self) -> Option<u8> {
        self.node(self.root()).grammar_type
    }

    /// Indices of all nodes matching a predicate, in creation order
    pub fn find<F>(&self, predicate: F) -> Vec<NodeIndex>
    where
        F: Fn(&NodeKind) -> bool,
    {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| predicate(&n.kind))
            .map(|(i, _)| NodeIndex(i))
            .collect()
    }

    /// Indented outline of the tree for diagnostics
    pub fn outline(&self) -> String {
        let mut out = String::new();
        if !self.nodes.is_empty() {
            self.outline_node(self.root(), 0, &mut out);
        }
        out
    }

    fn outline_node(&self, index: NodeIndex, depth: usize, out: &mut String) {
        let node = self.node(index);
        out.push_str(&"  ".repeat(depth));
        out.push_str(&format!("{:?}", node.kind));
        if let Some(g) = node.grammar_type {
            out.push_str(&format!(" [{}]", g));
        }
        out.push('\n');
        for child in &node.children {
            self.outline_node(*child, depth + 1, out);
        }
    }
}
