//! Recursive descent parser building an [`ExpressionTree`]
//!
//! Every grammar rule works on a window of token indices. A rule validates
//! its window, asks the registry for a dialect override, and otherwise
//! splits the window at top-level marker tokens and recurses. The query
//! shape (SELECT, FLWR or path) is picked by scanning for marker tokens, not
//! by trial parsing, and the first failing rule aborts the whole parse.

use crate::ast::{
    grammar, ArithmeticOp, Axis, CompareOp, Environment, ExpressionTree, Modifiers, NodeIndex,
    NodeKind, NodeType, Quantifier, Reference, Window,
};
use crate::lexer::tokenize;
use crate::registry::ExtensionRegistry;
use crate::token::{Token, TokenKind};
use std::collections::HashMap;
use tmql_core::{Direction, Error, Result, Value};
use tracing::{debug, trace};

/// Tokenize, classify and parse query text
pub fn parse(text: &str, registry: &ExtensionRegistry, max_depth: usize) -> Result<ExpressionTree> {
    let lexemes = tokenize(text)?;
    let tokens = registry.tokens().classify_all(&lexemes);
    trace!("Classified {} tokens", tokens.len());
    Parser::new(text, tokens, registry, max_depth).parse()
}

/// Parser state for one query
///
/// Production factories of dialects receive a `&mut Parser` and build their
/// nodes through the public rule entry points and [`Parser::push_node`].
pub struct Parser<'a> {
    tree: ExpressionTree,
    registry: &'a ExtensionRegistry,
    max_depth: usize,
    depth: usize,
    environment: Environment,
    /// Token index of each `?` to its parameter number
    parameters: HashMap<usize, usize>,
}

impl<'a> Parser<'a> {
    pub fn new(
        text: &str,
        tokens: Vec<Token>,
        registry: &'a ExtensionRegistry,
        max_depth: usize,
    ) -> Self {
        let parameters = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind == TokenKind::Parameter)
            .enumerate()
            .map(|(number, (index, _))| (index, number))
            .collect();

        Self {
            tree: ExpressionTree::new(text, tokens),
            registry,
            max_depth,
            depth: 0,
            environment: Environment::default(),
            parameters,
        }
    }

    /// Parse the whole token stream
    pub fn parse(mut self) -> Result<ExpressionTree> {
        let all = 0..self.tree.tokens().len();
        self.check_balanced(&all)?;
        let root = self.parse_query(all)?;

        self.tree.set_root(root);
        self.tree.set_environment(std::mem::take(&mut self.environment));
        self.tree.set_parameter_count(self.parameters.len());
        self.tree.set_dialects(self.registry.dialects().to_vec());
        debug!(
            "Parsed query into {} nodes with {} parameter(s)",
            self.tree.len(),
            self.tree.parameter_count()
        );
        Ok(self.tree)
    }

    // ========== Public building blocks ==========

    /// Add a node; children get their parent link set
    pub fn push_node(
        &mut self,
        kind: NodeKind,
        span: Window,
        children: Vec<NodeIndex>,
        grammar_type: Option<u8>,
    ) -> NodeIndex {
        self.tree.push(kind, span, children, grammar_type)
    }

    pub fn tokens(&self, window: &Window) -> &[Token] {
        &self.tree.tokens()[window.clone()]
    }

    pub fn syntax_error(
        &self,
        node_type: NodeType,
        window: &Window,
        message: impl Into<String>,
    ) -> Error {
        let end = window.end.min(self.tree.tokens().len());
        let start = window.start.min(end);
        let literals: Vec<String> = self.tree.tokens()[start..end]
            .iter()
            .map(|t| t.to_string())
            .collect();
        Error::invalid_syntax(node_type, &literals, message)
    }

    pub fn parse_query(&mut self, window: Window) -> Result<NodeIndex> {
        self.descend(|p| p.query_expression(window))
    }

    pub fn parse_boolean(&mut self, window: Window) -> Result<NodeIndex> {
        self.descend(|p| p.boolean_expression(window))
    }

    pub fn parse_content(&mut self, window: Window) -> Result<NodeIndex> {
        self.descend(|p| p.value_expression(window))
    }

    // ========== Token helpers ==========

    fn kind(&self, index: usize) -> TokenKind {
        self.tree.tokens()[index].kind
    }

    /// Kind of a token if it lies inside the window
    fn kind_in(&self, index: usize, window: &Window) -> Option<TokenKind> {
        if window.contains(&index) {
            Some(self.kind(index))
        } else {
            None
        }
    }

    fn literal(&self, index: usize) -> String {
        self.tree.tokens()[index].literal.clone()
    }

    fn descend<T>(&mut self, rule: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= self.max_depth {
            return Err(Error::RecursionLimit(self.max_depth));
        }
        self.depth += 1;
        let result = rule(self);
        self.depth -= 1;
        result
    }

    fn override_for(&mut self, node_type: NodeType, window: &Window) -> Result<Option<NodeIndex>> {
        let registry = self.registry;
        if !registry.has_productions(node_type) {
            return Ok(None);
        }
        match registry.resolve_production(node_type, &self.tree.tokens()[window.clone()]) {
            Some(entry) => {
                debug!("Using production {} for {}", entry.name, node_type);
                entry.factory.build(self, window.clone()).map(Some)
            }
            None => Ok(None),
        }
    }

    fn check_balanced(&self, window: &Window) -> Result<()> {
        let mut open: Vec<(usize, TokenKind)> = Vec::new();
        for i in window.clone() {
            let kind = self.kind(i);
            if kind.is_opening_bracket() {
                open.push((i, kind));
            } else if kind.is_closing_bracket() {
                let expected = match kind {
                    TokenKind::SquareClose => TokenKind::SquareOpen,
                    TokenKind::RoundClose => TokenKind::RoundOpen,
                    _ => TokenKind::CurlyOpen,
                };
                match open.pop() {
                    Some((_, k)) if k == expected => {}
                    _ => {
                        return Err(self.syntax_error(
                            NodeType::QueryExpression,
                            &(i..i + 1),
                            "unbalanced closing bracket",
                        ))
                    }
                }
            }
        }
        match open.pop() {
            Some((i, _)) => Err(self.syntax_error(
                NodeType::QueryExpression,
                &(i..i + 1),
                "unclosed bracket",
            )),
            None => Ok(()),
        }
    }

    fn matching_close(&self, open: usize, end: usize) -> Result<usize> {
        let mut depth = 0usize;
        for i in open..end {
            let kind = self.kind(i);
            if kind.is_opening_bracket() {
                depth += 1;
            } else if kind.is_closing_bracket() {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(i);
                }
            }
        }
        Err(self.syntax_error(NodeType::QueryExpression, &(open..end), "unclosed bracket"))
    }

    /// Positions of bracket-depth-zero tokens accepted by `accept`
    fn top_level(&self, window: &Window, accept: impl Fn(TokenKind) -> bool) -> Vec<usize> {
        let mut depth = 0usize;
        let mut found = Vec::new();
        for i in window.clone() {
            let kind = self.kind(i);
            if kind.is_closing_bracket() {
                depth = depth.saturating_sub(1);
            } else if kind.is_opening_bracket() {
                depth += 1;
            } else if depth == 0 && accept(kind) {
                found.push(i);
            }
        }
        found
    }

    /// Split at top-level separators
    fn split(&self, window: &Window, separator: TokenKind) -> Vec<Window> {
        let mut parts = Vec::new();
        let mut start = window.start;
        for i in self.top_level(window, |k| k == separator) {
            parts.push(start..i);
            start = i + 1;
        }
        parts.push(start..window.end);
        parts
    }

    fn opens_quantifier(&self, index: usize, window: &Window) -> bool {
        match self.kind(index) {
            TokenKind::Some | TokenKind::Every | TokenKind::At => true,
            TokenKind::Exists => {
                self.kind_in(index + 1, window) == Some(TokenKind::Variable)
                    && self.kind_in(index + 2, window) == Some(TokenKind::In)
            }
            _ => false,
        }
    }

    /// Split a boolean window at a connective.
    ///
    /// A quantifier body extends to the end of the window, so scanning
    /// stops at the first top-level quantifier.
    fn boolean_split(&self, window: &Window, connective: TokenKind) -> Vec<Window> {
        let mut parts = Vec::new();
        let mut start = window.start;
        let mut depth = 0usize;
        for i in window.clone() {
            let kind = self.kind(i);
            if kind.is_closing_bracket() {
                depth = depth.saturating_sub(1);
                continue;
            }
            if kind.is_opening_bracket() {
                depth += 1;
                continue;
            }
            if depth > 0 {
                continue;
            }
            if self.opens_quantifier(i, window) {
                break;
            }
            if kind == connective {
                parts.push(start..i);
                start = i + 1;
            }
        }
        parts.push(start..window.end);
        parts
    }

    /// True if the window must be read as a boolean expression
    fn looks_boolean(&self, window: &Window) -> bool {
        if window.is_empty() {
            return false;
        }
        let markers = self.top_level(window, |k| {
            k.is_comparison()
                || matches!(
                    k,
                    TokenKind::And
                        | TokenKind::Or
                        | TokenKind::Not
                        | TokenKind::Isa
                        | TokenKind::Ako
                        | TokenKind::Exists
                        | TokenKind::Some
                        | TokenKind::Every
                        | TokenKind::At
                )
        });
        if !markers.is_empty() {
            return true;
        }
        if self.kind(window.start) == TokenKind::RoundOpen {
            if let Ok(close) = self.matching_close(window.start, window.end) {
                if close == window.end - 1 {
                    return self.looks_boolean(&(window.start + 1..close));
                }
            }
        }
        false
    }

    fn expand_qname(&self, index: usize) -> Result<String> {
        let literal = self.literal(index);
        let (prefix, _) = literal.split_once(':').ok_or_else(|| {
            self.syntax_error(NodeType::Anchor, &(index..index + 1), "malformed QName")
        })?;
        self.environment.expand(&literal).ok_or_else(|| {
            self.syntax_error(
                NodeType::Anchor,
                &(index..index + 1),
                format!("unknown prefix '{}'", prefix),
            )
        })
    }

    // ========== Query level ==========

    fn query_expression(&mut self, window: Window) -> Result<NodeIndex> {
        if window.is_empty() {
            return Err(self.syntax_error(NodeType::QueryExpression, &window, "empty query"));
        }

        let mut children = Vec::new();
        let mut body = window.clone();
        if matches!(self.kind(window.start), TokenKind::Prefix | TokenKind::Pragma) {
            let (environment, rest) = self.environment_clause(&window)?;
            children.push(environment);
            body = rest;
            if body.is_empty() {
                return Err(self.syntax_error(
                    NodeType::QueryExpression,
                    &window,
                    "environment clause without a query",
                ));
            }
        }

        if let Some(node) = self.override_for(NodeType::QueryExpression, &body)? {
            children.push(node);
            return Ok(self.push_node(NodeKind::Query, window, children, Some(grammar::EXTENSION)));
        }

        let (node, grammar_type) = if self.kind(body.start) == TokenKind::Select {
            (self.descend(|p| p.select_expression(body))?, grammar::SELECT)
        } else if !self
            .top_level(&body, |k| matches!(k, TokenKind::Return | TokenKind::For))
            .is_empty()
        {
            (self.descend(|p| p.flwr_expression(body))?, grammar::FLWR)
        } else {
            (self.parse_content(body)?, grammar::PATH)
        };
        children.push(node);
        Ok(self.push_node(NodeKind::Query, window, children, Some(grammar_type)))
    }

    /// Consume directives up to the last marker plus its two operands
    fn environment_clause(&mut self, window: &Window) -> Result<(NodeIndex, Window)> {
        let last = self
            .top_level(window, |k| matches!(k, TokenKind::Prefix | TokenKind::Pragma))
            .last()
            .copied()
            .unwrap_or(window.start);
        let end = last + 3;
        if end > window.end {
            return Err(self.syntax_error(
                NodeType::EnvironmentClause,
                window,
                "incomplete directive",
            ));
        }
        let clause = window.start..end;
        if let Some(node) = self.override_for(NodeType::EnvironmentClause, &clause)? {
            return Ok((node, end..window.end));
        }

        let mut i = clause.start;
        while i < end {
            let directive = i..i + 3;
            let name = self.literal(i + 1);
            let value = self.literal(i + 2);
            match self.kind(i) {
                TokenKind::Prefix => {
                    let valid_name = self.kind(i + 1) == TokenKind::Placeholder;
                    let valid_iri =
                        matches!(self.kind(i + 2), TokenKind::Iri | TokenKind::StringLiteral);
                    if !valid_name || !valid_iri {
                        return Err(self.syntax_error(
                            NodeType::EnvironmentClause,
                            &directive,
                            "expected %prefix name iri",
                        ));
                    }
                    trace!("Declared prefix {} as {}", name, value);
                    self.environment.prefixes.push((name, value));
                }
                TokenKind::Pragma => {
                    if !matches!(self.kind(i + 1), TokenKind::Placeholder | TokenKind::QName) {
                        return Err(self.syntax_error(
                            NodeType::EnvironmentClause,
                            &directive,
                            "expected %pragma key value",
                        ));
                    }
                    self.environment.pragmas.push((name, value));
                }
                _ => {
                    return Err(self.syntax_error(
                        NodeType::EnvironmentClause,
                        &directive,
                        "expected %prefix or %pragma",
                    ))
                }
            }
            i += 3;
        }

        let node = self.push_node(NodeKind::Environment, clause, Vec::new(), None);
        Ok((node, end..window.end))
    }

    /// Clause windows, each starting at its keyword
    fn clauses(&self, window: &Window, rule: NodeType) -> Result<Vec<(TokenKind, Window)>> {
        let starts =
            self.top_level(window, |k| k.is_clause_keyword() || k == TokenKind::Select);
        match starts.first() {
            Some(first) if *first == window.start => {}
            _ => {
                return Err(self.syntax_error(rule, window, "expected a clause keyword"));
            }
        }
        let mut clauses = Vec::with_capacity(starts.len());
        for (n, start) in starts.iter().enumerate() {
            let end = starts.get(n + 1).copied().unwrap_or(window.end);
            clauses.push((self.kind(*start), *start..end));
        }
        Ok(clauses)
    }

    fn modifier(&self, modifiers: &mut Modifiers, kind: TokenKind, clause: &Window) -> Result<()> {
        match kind {
            TokenKind::Unique => {
                if clause.len() != 1 {
                    return Err(self.syntax_error(
                        NodeType::QueryExpression,
                        clause,
                        "UNIQUE takes no operand",
                    ));
                }
                modifiers.unique = true;
            }
            TokenKind::Offset | TokenKind::Limit => {
                let count = if clause.len() == 2
                    && self.kind(clause.start + 1) == TokenKind::IntegerLiteral
                {
                    self.literal(clause.start + 1).parse::<usize>().ok()
                } else {
                    None
                };
                let count = count.ok_or_else(|| {
                    self.syntax_error(
                        NodeType::QueryExpression,
                        clause,
                        "expected a non-negative integer",
                    )
                })?;
                if kind == TokenKind::Offset {
                    modifiers.offset = Some(count);
                } else {
                    modifiers.limit = Some(count);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn select_expression(&mut self, window: Window) -> Result<NodeIndex> {
        if let Some(node) = self.override_for(NodeType::SelectExpression, &window)? {
            return Ok(node);
        }

        let mut modifiers = Modifiers::default();
        let mut children = Vec::new();
        let mut seen: Vec<TokenKind> = Vec::new();
        for (kind, clause) in self.clauses(&window, NodeType::SelectExpression)? {
            if seen.contains(&kind) {
                return Err(self.syntax_error(
                    NodeType::SelectExpression,
                    &clause,
                    format!("duplicate {} clause", kind),
                ));
            }
            seen.push(kind);
            match kind {
                TokenKind::Select => {
                    let tuple = self.tuple_expression(clause.start + 1..clause.end)?;
                    children.push(tuple);
                }
                TokenKind::Where => children.push(self.where_clause(clause)?),
                TokenKind::Order => children.push(self.order_by_clause(clause)?),
                TokenKind::Unique | TokenKind::Offset | TokenKind::Limit => {
                    self.modifier(&mut modifiers, kind, &clause)?
                }
                _ => {
                    return Err(self.syntax_error(
                        NodeType::SelectExpression,
                        &clause,
                        format!("{} clause is not allowed in SELECT", kind),
                    ))
                }
            }
        }
        Ok(self.push_node(NodeKind::Select(modifiers), window, children, None))
    }

    fn flwr_expression(&mut self, window: Window) -> Result<NodeIndex> {
        if let Some(node) = self.override_for(NodeType::FlwrExpression, &window)? {
            return Ok(node);
        }

        let mut modifiers = Modifiers::default();
        let mut children = Vec::new();
        let mut seen: Vec<TokenKind> = Vec::new();
        for (kind, clause) in self.clauses(&window, NodeType::FlwrExpression)? {
            let repeatable = matches!(kind, TokenKind::For | TokenKind::Let);
            if !repeatable && seen.contains(&kind) {
                return Err(self.syntax_error(
                    NodeType::FlwrExpression,
                    &clause,
                    format!("duplicate {} clause", kind),
                ));
            }
            seen.push(kind);
            match kind {
                TokenKind::For => children.extend(self.for_clause(clause)?),
                TokenKind::Let => children.push(self.let_clause(clause)?),
                TokenKind::Where => children.push(self.where_clause(clause)?),
                TokenKind::Order => children.push(self.order_by_clause(clause)?),
                TokenKind::Return => children.push(self.return_clause(clause)?),
                TokenKind::Unique | TokenKind::Offset | TokenKind::Limit => {
                    self.modifier(&mut modifiers, kind, &clause)?
                }
                _ => {
                    return Err(self.syntax_error(
                        NodeType::FlwrExpression,
                        &clause,
                        format!("{} clause is not allowed in a FLWR expression", kind),
                    ))
                }
            }
        }
        if !seen.contains(&TokenKind::Return) {
            return Err(self.syntax_error(
                NodeType::FlwrExpression,
                &window,
                "missing RETURN clause",
            ));
        }
        Ok(self.push_node(NodeKind::Flwr(modifiers), window, children, None))
    }

    /// `FOR $a IN x , $b IN y` yields one node per binding
    fn for_clause(&mut self, clause: Window) -> Result<Vec<NodeIndex>> {
        if let Some(node) = self.override_for(NodeType::ForClause, &clause)? {
            return Ok(vec![node]);
        }

        let mut nodes = Vec::new();
        for binding in self.split(&(clause.start + 1..clause.end), TokenKind::Comma) {
            let well_formed = binding.len() >= 3
                && self.kind(binding.start) == TokenKind::Variable
                && self.kind(binding.start + 1) == TokenKind::In;
            if !well_formed {
                return Err(self.syntax_error(
                    NodeType::ForClause,
                    &clause,
                    "expected FOR $variable IN expression",
                ));
            }
            let variable = self.literal(binding.start);
            let domain = self.parse_content(binding.start + 2..binding.end)?;
            nodes.push(self.push_node(NodeKind::For { variable }, binding, vec![domain], None));
        }
        Ok(nodes)
    }

    fn let_clause(&mut self, clause: Window) -> Result<NodeIndex> {
        if let Some(node) = self.override_for(NodeType::LetClause, &clause)? {
            return Ok(node);
        }
        let well_formed = clause.len() >= 4
            && self.kind(clause.start + 1) == TokenKind::Variable
            && matches!(
                self.kind(clause.start + 2),
                TokenKind::Assign | TokenKind::Equals
            );
        if !well_formed {
            return Err(self.syntax_error(
                NodeType::LetClause,
                &clause,
                "expected LET $variable := expression",
            ));
        }
        let variable = self.literal(clause.start + 1);
        let value = self.parse_content(clause.start + 3..clause.end)?;
        Ok(self.push_node(NodeKind::Let { variable }, clause, vec![value], None))
    }

    fn where_clause(&mut self, clause: Window) -> Result<NodeIndex> {
        if let Some(node) = self.override_for(NodeType::WhereClause, &clause)? {
            return Ok(node);
        }
        if clause.len() < 2 {
            return Err(self.syntax_error(NodeType::WhereClause, &clause, "empty WHERE clause"));
        }
        let condition = self.parse_boolean(clause.start + 1..clause.end)?;
        Ok(self.push_node(NodeKind::Where, clause, vec![condition], None))
    }

    fn order_by_clause(&mut self, clause: Window) -> Result<NodeIndex> {
        if let Some(node) = self.override_for(NodeType::OrderByClause, &clause)? {
            return Ok(node);
        }
        if clause.len() < 3 || self.kind(clause.start + 1) != TokenKind::By {
            return Err(self.syntax_error(
                NodeType::OrderByClause,
                &clause,
                "expected ORDER BY expression",
            ));
        }

        let mut items = Vec::new();
        for item in self.split(&(clause.start + 2..clause.end), TokenKind::Comma) {
            if item.is_empty() {
                return Err(self.syntax_error(NodeType::OrderByClause, &clause, "empty sort key"));
            }
            let last = item.end - 1;
            let (descending, content) = match self.kind(last) {
                TokenKind::Desc => (true, item.start..last),
                TokenKind::Asc => (false, item.start..last),
                _ => (false, item.clone()),
            };
            let key = self.parse_content(content)?;
            items.push(self.push_node(NodeKind::OrderItem { descending }, item, vec![key], None));
        }
        Ok(self.push_node(NodeKind::OrderBy, clause, items, None))
    }

    fn return_clause(&mut self, clause: Window) -> Result<NodeIndex> {
        if let Some(node) = self.override_for(NodeType::ReturnClause, &clause)? {
            return Ok(node);
        }
        let tuple = self.tuple_expression(clause.start + 1..clause.end)?;
        Ok(self.push_node(NodeKind::Return, clause, vec![tuple], None))
    }

    fn tuple_expression(&mut self, window: Window) -> Result<NodeIndex> {
        self.descend(|p| p.tuple_inner(window))
    }

    fn tuple_inner(&mut self, window: Window) -> Result<NodeIndex> {
        if window.is_empty() {
            return Err(self.syntax_error(NodeType::TupleExpression, &window, "empty tuple"));
        }
        if let Some(node) = self.override_for(NodeType::TupleExpression, &window)? {
            return Ok(node);
        }

        let mut inner = window.clone();
        if self.kind(window.start) == TokenKind::RoundOpen
            && self.matching_close(window.start, window.end)? == window.end - 1
        {
            inner = window.start + 1..window.end - 1;
        }

        let mut items = Vec::new();
        for item in self.split(&inner, TokenKind::Comma) {
            if item.is_empty() {
                return Err(self.syntax_error(
                    NodeType::TupleExpression,
                    &window,
                    "empty tuple item",
                ));
            }
            let aliased = item.len() >= 3 && self.kind(item.end - 2) == TokenKind::As;
            let (alias, content) = if aliased {
                let alias = self.literal(item.end - 1);
                (Some(alias), item.start..item.end - 2)
            } else {
                (None, item.clone())
            };
            let value = self.parse_content(content)?;
            items.push(self.push_node(NodeKind::TupleItem { alias }, item, vec![value], None));
        }
        Ok(self.push_node(NodeKind::Tuple, window, items, None))
    }

    // ========== Boolean expressions ==========

    fn boolean_expression(&mut self, window: Window) -> Result<NodeIndex> {
        if window.is_empty() {
            return Err(self.syntax_error(
                NodeType::BooleanExpression,
                &window,
                "empty boolean expression",
            ));
        }
        if let Some(node) = self.override_for(NodeType::BooleanExpression, &window)? {
            return Ok(node);
        }

        let parts = self.boolean_split(&window, TokenKind::Or);
        if parts.len() > 1 {
            let mut children = Vec::with_capacity(parts.len());
            for part in parts {
                children.push(self.parse_boolean(part)?);
            }
            return Ok(self.push_node(NodeKind::Or, window, children, None));
        }

        let parts = self.boolean_split(&window, TokenKind::And);
        if parts.len() > 1 {
            let mut children = Vec::with_capacity(parts.len());
            for part in parts {
                children.push(self.parse_boolean(part)?);
            }
            let node = self.push_node(NodeKind::And, window, children.clone(), None);
            // Negated conjuncts run last so they see the narrowed candidates
            let (positive, negated): (Vec<NodeIndex>, Vec<NodeIndex>) = children
                .into_iter()
                .partition(|c| !matches!(self.tree.kind(*c), NodeKind::Not));
            let order = positive.into_iter().chain(negated).collect();
            self.tree.reorder_children(node, order)?;
            return Ok(node);
        }

        if self.kind(window.start) == TokenKind::Not {
            let operand = self.parse_boolean(window.start + 1..window.end)?;
            return Ok(self.push_node(NodeKind::Not, window, vec![operand], None));
        }

        self.descend(|p| p.boolean_primitive(window))
    }

    fn boolean_primitive(&mut self, window: Window) -> Result<NodeIndex> {
        if let Some(node) = self.override_for(NodeType::BooleanPrimitive, &window)? {
            return Ok(node);
        }

        let first = self.kind(window.start);
        if self.opens_quantifier(window.start, &window) {
            return self.descend(|p| p.quantified_expression(window));
        }
        if first == TokenKind::Exists {
            if window.len() < 2 {
                return Err(self.syntax_error(
                    NodeType::BooleanPrimitive,
                    &window,
                    "EXISTS needs an expression",
                ));
            }
            let content = self.parse_content(window.start + 1..window.end)?;
            return Ok(self.push_node(NodeKind::Exists, window, vec![content], None));
        }

        if first == TokenKind::RoundOpen
            && self.matching_close(window.start, window.end)? == window.end - 1
        {
            let inner = window.start + 1..window.end - 1;
            if self.looks_boolean(&inner) {
                return self.parse_boolean(inner);
            }
        }

        if first.is_reference() && self.kind_in(window.start + 1, &window) == Some(TokenKind::RoundOpen)
        {
            let close = self.matching_close(window.start + 1, window.end)?;
            let inner = window.start + 2..close;
            if close == window.end - 1
                && !self.top_level(&inner, |k| k == TokenKind::Colon).is_empty()
            {
                return self.descend(|p| p.predicate_invocation(window));
            }
        }

        let kinds = self.top_level(&window, |k| matches!(k, TokenKind::Isa | TokenKind::Ako));
        if let Some(&at) = kinds.first() {
            if kinds.len() > 1 {
                return Err(self.syntax_error(
                    NodeType::BooleanPrimitive,
                    &window,
                    "chained ISA/AKO",
                ));
            }
            let kind = if self.kind(at) == TokenKind::Isa {
                NodeKind::Isa
            } else {
                NodeKind::Ako
            };
            let left = self.parse_content(window.start..at)?;
            let right = self.parse_content(at + 1..window.end)?;
            return Ok(self.push_node(kind, window, vec![left, right], None));
        }

        let comparisons = self.top_level(&window, |k| k.is_comparison());
        if let Some(&at) = comparisons.first() {
            if comparisons.len() > 1 {
                return Err(self.syntax_error(
                    NodeType::BooleanPrimitive,
                    &window,
                    "chained comparison",
                ));
            }
            let op = match self.kind(at) {
                TokenKind::Equals => CompareOp::Equals,
                TokenKind::NotEquals => CompareOp::NotEquals,
                TokenKind::Less => CompareOp::Less,
                TokenKind::LessEquals => CompareOp::LessEquals,
                TokenKind::Greater => CompareOp::Greater,
                TokenKind::GreaterEquals => CompareOp::GreaterEquals,
                _ => CompareOp::RegexMatch,
            };
            let left = self.parse_content(window.start..at)?;
            let right = self.parse_content(at + 1..window.end)?;
            return Ok(self.push_node(NodeKind::Comparison(op), window, vec![left, right], None));
        }

        // A bare content is an existence test
        let content = self.parse_content(window.clone())?;
        Ok(self.push_node(NodeKind::Exists, window, vec![content], None))
    }

    fn quantified_expression(&mut self, window: Window) -> Result<NodeIndex> {
        if let Some(node) = self.override_for(NodeType::QuantifiedExpression, &window)? {
            return Ok(node);
        }

        let start = window.start;
        let (quantifier, binding) = match self.kind(start) {
            TokenKind::Some | TokenKind::Exists => (Quantifier::Some, start + 1),
            TokenKind::Every => (Quantifier::Every, start + 1),
            _ => {
                let bound = self.kind_in(start + 1, &window);
                let count = match self.kind_in(start + 2, &window) {
                    Some(TokenKind::IntegerLiteral) => self.literal(start + 2).parse::<usize>().ok(),
                    _ => None,
                };
                match (bound, count) {
                    (Some(TokenKind::Least), Some(n)) => (Quantifier::AtLeast(n), start + 3),
                    (Some(TokenKind::Most), Some(n)) => (Quantifier::AtMost(n), start + 3),
                    _ => {
                        return Err(self.syntax_error(
                            NodeType::QuantifiedExpression,
                            &window,
                            "expected AT LEAST n or AT MOST n",
                        ))
                    }
                }
            }
        };

        let well_formed = self.kind_in(binding, &window) == Some(TokenKind::Variable)
            && self.kind_in(binding + 1, &window) == Some(TokenKind::In);
        let satisfies = self
            .top_level(&(binding..window.end), |k| k == TokenKind::Satisfies)
            .first()
            .copied();
        let satisfies = match satisfies {
            Some(at) if well_formed && at > binding + 2 && at + 1 < window.end => at,
            _ => {
                return Err(self.syntax_error(
                    NodeType::QuantifiedExpression,
                    &window,
                    "expected $variable IN expression SATISFIES condition",
                ))
            }
        };

        let variable = self.literal(binding);
        let domain = self.parse_content(binding + 2..satisfies)?;
        let body = self.parse_boolean(satisfies + 1..window.end)?;
        Ok(self.push_node(
            NodeKind::Quantified {
                quantifier,
                variable,
            },
            window,
            vec![domain, body],
            None,
        ))
    }

    /// `assoc-type ( role : value , ... )`
    fn predicate_invocation(&mut self, window: Window) -> Result<NodeIndex> {
        if let Some(node) = self.override_for(NodeType::PredicateInvocation, &window)? {
            return Ok(node);
        }

        let association_type = self.anchor(window.start)?;
        let mut children = vec![association_type];
        let mut strict = true;
        let items = self.split(&(window.start + 2..window.end - 1), TokenKind::Comma);
        let count = items.len();
        for (n, item) in items.into_iter().enumerate() {
            if item.len() == 1 && self.kind(item.start) == TokenKind::Ellipsis {
                if n + 1 != count {
                    return Err(self.syntax_error(
                        NodeType::PredicateInvocation,
                        &window,
                        "'...' must close the role list",
                    ));
                }
                strict = false;
                continue;
            }
            let well_formed = item.len() >= 3
                && self.kind(item.start).is_reference()
                && self.kind(item.start + 1) == TokenKind::Colon;
            if !well_formed {
                return Err(self.syntax_error(
                    NodeType::PredicateInvocation,
                    &item,
                    "expected role-type : expression",
                ));
            }
            let role = self.anchor(item.start)?;
            let player = self.parse_content(item.start + 2..item.end)?;
            children.push(role);
            children.push(player);
        }
        if children.len() == 1 {
            return Err(self.syntax_error(
                NodeType::PredicateInvocation,
                &window,
                "predicate invocation without roles",
            ));
        }
        Ok(self.push_node(NodeKind::PredicateInvocation { strict }, window, children, None))
    }

    // ========== Content ==========

    fn value_expression(&mut self, window: Window) -> Result<NodeIndex> {
        if window.is_empty() {
            return Err(self.syntax_error(NodeType::ValueExpression, &window, "empty expression"));
        }
        if let Some(node) = self.override_for(NodeType::ValueExpression, &window)? {
            return Ok(node);
        }

        let levels: [&[TokenKind]; 3] = [
            &[TokenKind::Union, TokenKind::Difference],
            &[TokenKind::Plus, TokenKind::Minus],
            &[TokenKind::Star, TokenKind::Div, TokenKind::Mod],
        ];
        for level in levels {
            let operators: Vec<usize> = self
                .top_level(&window, |k| level.contains(&k))
                .into_iter()
                .filter(|i| *i > window.start && *i + 1 < window.end && !self.is_sign(*i))
                .collect();
            // Left associative: the last operator is the root
            if let Some(&at) = operators.last() {
                let kind = match self.kind(at) {
                    TokenKind::Union => NodeKind::Union,
                    TokenKind::Difference => NodeKind::Difference,
                    TokenKind::Plus => NodeKind::Arithmetic(ArithmeticOp::Add),
                    TokenKind::Minus => NodeKind::Arithmetic(ArithmeticOp::Subtract),
                    TokenKind::Star => NodeKind::Arithmetic(ArithmeticOp::Multiply),
                    TokenKind::Div => NodeKind::Arithmetic(ArithmeticOp::Divide),
                    _ => NodeKind::Arithmetic(ArithmeticOp::Modulo),
                };
                let left = self.parse_content(window.start..at)?;
                let right = self.parse_content(at + 1..window.end)?;
                return Ok(self.push_node(kind, window, vec![left, right], None));
            }
        }

        self.descend(|p| p.path_expression(window))
    }

    fn path_expression(&mut self, window: Window) -> Result<NodeIndex> {
        if let Some(node) = self.override_for(NodeType::PathExpression, &window)? {
            return Ok(node);
        }

        let (mut children, mut next) = self.primary(&window)?;
        while next < window.end {
            let (nodes, after) = self.postfix(&window, next)?;
            children.extend(nodes);
            next = after;
        }
        if children.len() == 1 {
            return Ok(children[0]);
        }
        Ok(self.push_node(NodeKind::Path, window, children, None))
    }

    /// True for a '-' that negates its right operand instead of subtracting
    fn is_sign(&self, index: usize) -> bool {
        self.kind(index) == TokenKind::Minus
            && matches!(
                self.kind(index - 1),
                TokenKind::Plus
                    | TokenKind::Minus
                    | TokenKind::Star
                    | TokenKind::Div
                    | TokenKind::Mod
                    | TokenKind::Union
                    | TokenKind::Difference
            )
    }

    /// Primary expression at the window start and the index after it
    fn primary(&mut self, window: &Window) -> Result<(Vec<NodeIndex>, usize)> {
        let start = window.start;
        match self.kind(start) {
            TokenKind::Minus => match self.kind_in(start + 1, window) {
                Some(TokenKind::IntegerLiteral | TokenKind::DecimalLiteral) => {
                    Ok((vec![self.negative_literal(start)?], start + 2))
                }
                Some(_) => {
                    let span = start..window.end;
                    let zero = self.push_node(
                        NodeKind::Literal(Value::Integer(0)),
                        start..start + 1,
                        Vec::new(),
                        None,
                    );
                    let operand = self.parse_content(start + 1..window.end)?;
                    let node = self.push_node(
                        NodeKind::Arithmetic(ArithmeticOp::Subtract),
                        span,
                        vec![zero, operand],
                        None,
                    );
                    Ok((vec![node], window.end))
                }
                None => Err(self.syntax_error(
                    NodeType::PathExpression,
                    window,
                    "expected an operand after '-'",
                )),
            },
            TokenKind::TypeShortcut => {
                let valid = self
                    .kind_in(start + 1, window)
                    .is_some_and(|k| k.is_reference() || k == TokenKind::Variable);
                if !valid {
                    return Err(self.syntax_error(
                        NodeType::PathExpression,
                        window,
                        "expected a type after '//'",
                    ));
                }
                let anchor = self.anchor(start + 1)?;
                let step = self.push_node(
                    NodeKind::Step {
                        axis: Axis::Instances,
                        direction: Direction::Forward,
                    },
                    start..start + 2,
                    Vec::new(),
                    None,
                );
                Ok((vec![anchor, step], start + 2))
            }
            TokenKind::RoundOpen => {
                let close = self.matching_close(start, window.end)?;
                let inner = start + 1..close;
                if !self.top_level(&inner, |k| k == TokenKind::Comma).is_empty() {
                    return Err(self.syntax_error(
                        NodeType::PathExpression,
                        window,
                        "tuple expression is not allowed here",
                    ));
                }
                Ok((vec![self.parse_content(inner)?], close + 1))
            }
            TokenKind::CurlyOpen => {
                let close = self.matching_close(start, window.end)?;
                let query = self.parse_query(start + 1..close)?;
                let node =
                    self.push_node(NodeKind::SubQuery, start..close + 1, vec![query], None);
                Ok((vec![node], close + 1))
            }
            TokenKind::QName | TokenKind::Iri
                if self.kind_in(start + 1, window) == Some(TokenKind::RoundOpen) =>
            {
                let close = self.matching_close(start + 1, window.end)?;
                let node = self.descend(|p| p.function_call(start..close + 1))?;
                Ok((vec![node], close + 1))
            }
            _ => Ok((vec![self.anchor(start)?], start + 1)),
        }
    }

    fn function_call(&mut self, window: Window) -> Result<NodeIndex> {
        if let Some(node) = self.override_for(NodeType::FunctionInvocation, &window)? {
            return Ok(node);
        }
        let name = match self.kind(window.start) {
            TokenKind::QName => self.expand_qname(window.start)?,
            _ => self.literal(window.start),
        };
        let arguments = window.start + 2..window.end - 1;
        let mut children = Vec::new();
        if !arguments.is_empty() {
            for argument in self.split(&arguments, TokenKind::Comma) {
                if argument.is_empty() {
                    return Err(self.syntax_error(
                        NodeType::FunctionInvocation,
                        &window,
                        "empty argument",
                    ));
                }
                children.push(self.parse_content(argument)?);
            }
        }
        Ok(self.push_node(NodeKind::FunctionCall(name), window, children, None))
    }

    /// Numeric literal preceded by a '-' at `minus`
    fn negative_literal(&mut self, minus: usize) -> Result<NodeIndex> {
        let span = minus..minus + 2;
        let text = format!("-{}", self.literal(minus + 1));
        let kind = match self.kind(minus + 1) {
            TokenKind::IntegerLiteral => {
                let value = text.parse::<i64>().map_err(|e| {
                    self.syntax_error(NodeType::Anchor, &span, format!("invalid integer: {}", e))
                })?;
                NodeKind::Literal(Value::Integer(value))
            }
            _ => {
                let value = text.parse::<f64>().map_err(|e| {
                    self.syntax_error(NodeType::Anchor, &span, format!("invalid decimal: {}", e))
                })?;
                NodeKind::Literal(Value::Decimal(value))
            }
        };
        Ok(self.push_node(kind, span, Vec::new(), None))
    }

    /// Single-token primary
    fn anchor(&mut self, index: usize) -> Result<NodeIndex> {
        let span = index..index + 1;
        let kind = match self.kind(index) {
            TokenKind::Placeholder => NodeKind::ItemReference(Reference::Relative(self.literal(index))),
            TokenKind::QName => NodeKind::ItemReference(Reference::Absolute(self.expand_qname(index)?)),
            TokenKind::Iri => NodeKind::ItemReference(Reference::Absolute(self.literal(index))),
            TokenKind::StringLiteral => NodeKind::Literal(Value::String(self.literal(index))),
            TokenKind::IntegerLiteral => {
                let value = self.literal(index).parse::<i64>().map_err(|e| {
                    self.syntax_error(NodeType::Anchor, &span, format!("invalid integer: {}", e))
                })?;
                NodeKind::Literal(Value::Integer(value))
            }
            TokenKind::DecimalLiteral => {
                let value = self.literal(index).parse::<f64>().map_err(|e| {
                    self.syntax_error(NodeType::Anchor, &span, format!("invalid decimal: {}", e))
                })?;
                NodeKind::Literal(Value::Decimal(value))
            }
            TokenKind::BooleanLiteral => NodeKind::Literal(Value::Boolean(self.literal(index) == "true")),
            TokenKind::Variable => NodeKind::Variable(self.literal(index)),
            TokenKind::IndexVariable => NodeKind::IndexVariable,
            TokenKind::Dot => NodeKind::Current,
            TokenKind::TopicMapVariable => NodeKind::TopicMap,
            TokenKind::Parameter => match self.parameters.get(&index) {
                Some(number) => NodeKind::Parameter(*number),
                None => {
                    return Err(Error::Internal(format!(
                        "Parameter at token {} was not numbered",
                        index
                    )))
                }
            },
            other => {
                return Err(self.syntax_error(
                    NodeType::Anchor,
                    &span,
                    format!("unexpected {} token", other),
                ))
            }
        };
        Ok(self.push_node(kind, span, Vec::new(), None))
    }

    // ========== Postfixes ==========

    fn postfix(&mut self, window: &Window, at: usize) -> Result<(Vec<NodeIndex>, usize)> {
        let kind = self.kind(at);
        match kind {
            TokenKind::ForwardStep | TokenKind::BackwardStep => {
                let direction = if kind == TokenKind::ForwardStep {
                    Direction::Forward
                } else {
                    Direction::Backward
                };
                let axis = match self.kind_in(at + 1, window) {
                    Some(TokenKind::AxisName) => Axis::from_name(&self.literal(at + 1)),
                    _ => None,
                };
                let axis = axis.ok_or_else(|| {
                    self.syntax_error(NodeType::Step, &(at..window.end), "expected an axis name")
                })?;

                let mut next = at + 2;
                let mut children = Vec::new();
                let typed = self.kind_in(next, window).is_some_and(|k| {
                    k.is_reference() || matches!(k, TokenKind::Variable | TokenKind::Parameter)
                });
                if typed {
                    children.push(self.anchor(next)?);
                    next += 1;
                }
                let step = self.push_node(NodeKind::Step { axis, direction }, at..next, children, None);
                Ok((vec![step], next))
            }
            TokenKind::SquareOpen => {
                let close = self.matching_close(at, window.end)?;
                let filter = self.descend(|p| p.filter_postfix(at + 1..close, at..close + 1))?;
                Ok((vec![filter], close + 1))
            }
            TokenKind::Scope | TokenKind::TypeShortcut => {
                let axis = if kind == TokenKind::Scope {
                    Axis::Scope
                } else {
                    Axis::Types
                };
                self.expect_operand(window, at)?;
                let filter = self.membership_filter(axis, at + 1, at..at + 2)?;
                Ok((vec![filter], at + 2))
            }
            TokenKind::ValueShortcut => {
                self.expect_operand(window, at)?;
                let value_type = self.anchor(at + 1)?;
                let characteristics = self.push_node(
                    NodeKind::Step {
                        axis: Axis::Characteristics,
                        direction: Direction::Forward,
                    },
                    at..at + 2,
                    vec![value_type],
                    None,
                );
                let atomify = self.push_node(
                    NodeKind::Step {
                        axis: Axis::Atomify,
                        direction: Direction::Forward,
                    },
                    at..at + 2,
                    Vec::new(),
                    None,
                );
                Ok((vec![characteristics, atomify], at + 2))
            }
            TokenKind::BackwardValueShortcut => {
                self.expect_operand(window, at)?;
                let atomify = self.push_node(
                    NodeKind::Step {
                        axis: Axis::Atomify,
                        direction: Direction::Backward,
                    },
                    at..at + 2,
                    Vec::new(),
                    None,
                );
                let value_type = self.anchor(at + 1)?;
                let characteristics = self.push_node(
                    NodeKind::Step {
                        axis: Axis::Characteristics,
                        direction: Direction::Backward,
                    },
                    at..at + 2,
                    vec![value_type],
                    None,
                );
                Ok((vec![atomify, characteristics], at + 2))
            }
            _ => Err(self.syntax_error(
                NodeType::PathExpression,
                window,
                format!("unexpected token '{}'", self.tree.tokens()[at]),
            )),
        }
    }

    fn expect_operand(&self, window: &Window, at: usize) -> Result<()> {
        let valid = self
            .kind_in(at + 1, window)
            .is_some_and(|k| k.is_reference() || matches!(k, TokenKind::Variable | TokenKind::Parameter));
        if valid {
            Ok(())
        } else {
            Err(self.syntax_error(
                NodeType::PathExpression,
                &(at..window.end),
                format!("'{}' needs a topic reference", self.tree.tokens()[at]),
            ))
        }
    }

    /// Predicate filter `[ . >> axis == operand ]`
    fn membership_filter(&mut self, axis: Axis, operand: usize, span: Window) -> Result<NodeIndex> {
        let current = self.push_node(NodeKind::Current, span.clone(), Vec::new(), None);
        let step = self.push_node(
            NodeKind::Step {
                axis,
                direction: Direction::Forward,
            },
            span.clone(),
            Vec::new(),
            None,
        );
        let path = self.push_node(NodeKind::Path, span.clone(), vec![current, step], None);
        let expected = self.anchor(operand)?;
        let comparison = self.push_node(
            NodeKind::Comparison(CompareOp::Equals),
            span.clone(),
            vec![path, expected],
            None,
        );
        Ok(self.push_node(
            NodeKind::Filter,
            span,
            vec![comparison],
            Some(grammar::PREDICATE_FILTER),
        ))
    }

    fn filter_postfix(&mut self, inner: Window, span: Window) -> Result<NodeIndex> {
        if inner.is_empty() {
            return Err(self.syntax_error(NodeType::FilterPostfix, &span, "empty filter"));
        }
        if let Some(node) = self.override_for(NodeType::FilterPostfix, &span)? {
            return Ok(node);
        }

        match self.kind(inner.start) {
            TokenKind::Caret | TokenKind::Scope if inner.len() == 2 => {
                let axis = if self.kind(inner.start) == TokenKind::Caret {
                    Axis::Types
                } else {
                    Axis::Scope
                };
                self.expect_operand(&inner, inner.start)?;
                return self.membership_filter(axis, inner.start + 1, span);
            }
            TokenKind::IntegerLiteral | TokenKind::Parameter if inner.len() == 1 => {
                let index = self.anchor(inner.start)?;
                return Ok(self.push_node(
                    NodeKind::Filter,
                    span,
                    vec![index],
                    Some(grammar::INDEX_FILTER),
                ));
            }
            TokenKind::Minus
                if inner.len() == 2 && self.kind(inner.start + 1) == TokenKind::IntegerLiteral =>
            {
                let index = self.negative_literal(inner.start)?;
                return Ok(self.push_node(
                    NodeKind::Filter,
                    span,
                    vec![index],
                    Some(grammar::INDEX_FILTER),
                ));
            }
            _ => {}
        }

        let dots = self.top_level(&inner, |k| k == TokenKind::DoubleDot);
        match dots.as_slice() {
            [] => {
                let condition = self.parse_boolean(inner)?;
                Ok(self.push_node(
                    NodeKind::Filter,
                    span,
                    vec![condition],
                    Some(grammar::PREDICATE_FILTER),
                ))
            }
            [at] => {
                let low = self.parse_content(inner.start..*at)?;
                let high = self.parse_content(*at + 1..inner.end)?;
                Ok(self.push_node(
                    NodeKind::Filter,
                    span,
                    vec![low, high],
                    Some(grammar::RANGE_FILTER),
                ))
            }
            _ => Err(self.syntax_error(NodeType::FilterPostfix, &span, "more than one '..'")),
        }
    }
}
