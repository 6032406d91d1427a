//! Relational translation backend
//!
//! Compiles path expressions into one SQL statement over the tables
//! described by [`RelationalSchema`] instead of evaluating them. Every axis
//! step joins a fresh alias to the previous selection; the value kind of the
//! selection picks the rule used by the next step. Filter predicates are
//! translated on a branch of the state and come back as correlated
//! `EXISTS` conditions.

pub mod state;

pub use state::{FromPart, TranslationState, ValueKind};

use crate::ast::{grammar, Axis, CompareOp, ExpressionTree, NodeIndex, NodeKind, Reference};
use crate::interpreter::functions::qualified;
use serde::Serialize;
use std::fmt;
use tmql_core::{psi, Direction, Error, Result, Value};
use tmql_graph::{RelationalSchema, Table};
use tracing::debug;

/// Translated query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SqlStatement {
    pub sql: String,
    pub value_kind: ValueKind,
}

impl fmt::Display for SqlStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// One side of a comparison
enum Operand {
    /// Plain expression, no sources needed
    Scalar(String),
    /// Sub-select yielding a `value` column
    Set(String),
    /// Path relative to the filtered item
    Correlated(TranslationState),
}

pub struct SqlTranslator<'a> {
    tree: &'a ExpressionTree,
    schema: &'a RelationalSchema,
    base_locator: String,
    parameters: &'a [Option<Value>],
}

impl<'a> SqlTranslator<'a> {
    pub fn new(tree: &'a ExpressionTree, schema: &'a RelationalSchema) -> Self {
        Self {
            tree,
            schema,
            base_locator: String::new(),
            parameters: &[],
        }
    }

    pub fn with_base_locator(mut self, base_locator: impl Into<String>) -> Self {
        self.base_locator = base_locator.into();
        self
    }

    pub fn with_parameters(mut self, parameters: &'a [Option<Value>]) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn translate(&self) -> Result<SqlStatement> {
        let state = self.translate_node(self.tree.root(), TranslationState::new())?;
        let statement = SqlStatement {
            sql: state.to_sql()?,
            value_kind: state.value_kind(),
        };
        debug!("Translated query into {} byte(s) of SQL", statement.sql.len());
        Ok(statement)
    }

    fn table(&self, table: Table) -> String {
        self.schema.name(table)
    }

    fn unsupported(&self, node: NodeIndex) -> Error {
        Error::UnsupportedTranslation(self.tree.kind(node).node_type().to_string())
    }

    /// Translate a content node into a state selecting its values
    pub fn translate_node(&self, node: NodeIndex, state: TranslationState) -> Result<TranslationState> {
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::Query => {
                let body = tree.children(node).last().copied().ok_or_else(|| {
                    Error::Internal("Query expression without a body".to_string())
                })?;
                self.translate_node(body, state)
            }
            NodeKind::Path => {
                let children = tree.children(node);
                let (mut state, rest) = match self.scan(children) {
                    Some((table, kind)) => {
                        let mut state = state;
                        let alias = state.join(self.table(table));
                        state.select(format!("{}.id", alias), kind);
                        (state, &children[2..])
                    }
                    None => (self.translate_node(tree.child(node, 0)?, state)?, &children[1..]),
                };
                for &postfix in rest {
                    state = self.postfix(postfix, state)?;
                }
                Ok(state)
            }
            NodeKind::ItemReference(reference) => self.anchor(reference, state),
            NodeKind::Literal(value) => {
                let mut state = state;
                state.select(literal(value)?, ValueKind::Scalar);
                Ok(state)
            }
            NodeKind::Parameter(index) => {
                let value = self.parameter(*index)?;
                let kind = if value.is_construct() {
                    ValueKind::Any
                } else {
                    ValueKind::Scalar
                };
                let mut state = state;
                state.select(literal(&value)?, kind);
                Ok(state)
            }
            NodeKind::Union => {
                let left = self.translate_node(tree.child(node, 0)?, state.branch())?;
                let mut right_start = state.branch();
                right_start.absorb(&left);
                let right = self.translate_node(tree.child(node, 1)?, right_start)?;
                let kind = if left.value_kind() == right.value_kind() {
                    left.value_kind()
                } else {
                    ValueKind::Any
                };
                let mut union = TranslationState::new();
                union.absorb(&right);
                let alias = union.join(format!(
                    "( {} UNION ALL {} )",
                    left.to_sql()?,
                    right.to_sql()?
                ));
                union.select(format!("{}.value", alias), kind);
                Ok(union)
            }
            NodeKind::FunctionCall(name) => self.function(node, name, state),
            _ => Err(self.unsupported(node)),
        }
    }

    fn parameter(&self, index: usize) -> Result<Value> {
        match self.parameters.get(index) {
            Some(Some(value)) => Ok(value.clone()),
            _ => Err(Error::UnboundParameter(index)),
        }
    }

    // ========== Anchors ==========

    /// Topics carrying the IRI as subject identifier or subject locator
    fn topics_by_locator(&self, iri: &str) -> String {
        let reference = quote(iri);
        format!(
            "SELECT si.id_topic FROM {} AS si, {} AS l WHERE si.id_locator = l.id AND l.reference = {} \
             UNION SELECT sl.id_topic FROM {} AS sl, {} AS l2 WHERE sl.id_locator = l2.id AND l2.reference = {}",
            self.table(Table::RelSubjectIdentifiers),
            self.table(Table::Locators),
            reference,
            self.table(Table::RelSubjectLocators),
            self.table(Table::Locators),
            reference,
        )
    }

    /// Table scanned by `tm:subject >> instances` and its siblings
    fn scan(&self, children: &[NodeIndex]) -> Option<(Table, ValueKind)> {
        let (NodeKind::ItemReference(reference), Some(&step)) =
            (self.tree.kind(*children.first()?), children.get(1))
        else {
            return None;
        };
        let instances = NodeKind::Step {
            axis: Axis::Instances,
            direction: Direction::Forward,
        };
        if self.tree.kind(step) != &instances || !self.tree.children(step).is_empty() {
            return None;
        }
        match reference.resolve(&self.base_locator).as_str() {
            psi::SUBJECT => Some((Table::Topics, ValueKind::Topic)),
            psi::NAME => Some((Table::Names, ValueKind::Any)),
            psi::OCCURRENCE => Some((Table::Occurrences, ValueKind::Any)),
            _ => None,
        }
    }

    fn anchor(&self, reference: &Reference, mut state: TranslationState) -> Result<TranslationState> {
        let iri = reference.resolve(&self.base_locator);
        if is_kind_iri(&iri) {
            state.select(quote(&iri), ValueKind::Scalar);
            return Ok(state);
        }
        let alias = state.join(format!("( {} )", self.topics_by_locator(&iri)));
        state.select(format!("{}.id_topic", alias), ValueKind::Topic);
        Ok(state)
    }

    fn is_kind_argument(&self, node: NodeIndex) -> bool {
        match self.tree.kind(node) {
            NodeKind::ItemReference(reference) => is_kind_iri(&reference.resolve(&self.base_locator)),
            _ => false,
        }
    }

    /// Condition restricting `column` to the given type
    fn type_condition(&self, node: NodeIndex, column: &str, direct: bool) -> Result<String> {
        let types = match self.tree.kind(node) {
            NodeKind::ItemReference(reference) => {
                let iri = reference.resolve(&self.base_locator);
                let by_kind = match iri.as_str() {
                    psi::NAME => Some(Table::Names),
                    psi::OCCURRENCE => Some(Table::Occurrences),
                    psi::SUBJECT => Some(Table::Topics),
                    _ => None,
                };
                if let Some(table) = by_kind {
                    return Ok(format!("{} IN ( SELECT id FROM {} )", column, self.table(table)));
                }
                self.topics_by_locator(&iri)
            }
            NodeKind::Parameter(index) => literal(&self.parameter(*index)?)?,
            _ => return Err(self.unsupported(node)),
        };
        if direct {
            return Ok(format!("{} IN ( {} )", column, types));
        }
        Ok(format!(
            "{} IN ( SELECT id_instance FROM {} WHERE id_type IN ( {} ) UNION SELECT id FROM {} WHERE id_type IN ( {} ) )",
            column,
            self.table(Table::RelInstanceOf),
            types,
            self.table(Table::Typeables),
            types,
        ))
    }

    // ========== Postfixes ==========

    fn postfix(&self, node: NodeIndex, state: TranslationState) -> Result<TranslationState> {
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::Step { axis, direction } => {
                let state = if state.is_windowed() { state.wrap()? } else { state };
                self.step(node, *axis, *direction, state)
            }
            NodeKind::Filter => match tree.node(node).grammar_type {
                Some(grammar::INDEX_FILTER) => {
                    let index = self.bound(tree.child(node, 0)?)?;
                    let mut state = state;
                    if index < 0 {
                        state.restrict(0, Some(0));
                    } else {
                        state.restrict(index as usize, Some(index as usize + 1));
                    }
                    Ok(state)
                }
                Some(grammar::RANGE_FILTER) => {
                    let low = self.bound(tree.child(node, 0)?)?.max(0) as usize;
                    let high = self.bound(tree.child(node, 1)?)?.max(0) as usize;
                    let mut state = state;
                    state.restrict(low, Some(high));
                    Ok(state)
                }
                _ => {
                    let mut state = if state.is_windowed() { state.wrap()? } else { state };
                    let condition = self.condition(tree.child(node, 0)?, &mut state)?;
                    state.condition(condition);
                    Ok(state)
                }
            },
            _ => Err(self.unsupported(node)),
        }
    }

    fn bound(&self, node: NodeIndex) -> Result<i64> {
        let value = match self.tree.kind(node) {
            NodeKind::Literal(value) => value.clone(),
            NodeKind::Parameter(index) => self.parameter(*index)?,
            _ => return Err(self.unsupported(node)),
        };
        value.as_integer().ok_or_else(|| {
            Error::RuntimeEvaluation(format!(
                "Filter bound must be an integer, found {}",
                value.type_name()
            ))
        })
    }

    fn step(
        &self,
        node: NodeIndex,
        axis: Axis,
        direction: Direction,
        mut state: TranslationState,
    ) -> Result<TranslationState> {
        let input = state.selection()?.to_string();
        let kind = state.value_kind();
        let atomic_input = matches!(
            (axis, direction),
            (Axis::Atomify, Direction::Backward)
                | (Axis::Id, Direction::Backward)
                | (Axis::Locators | Axis::Indicators | Axis::Item, Direction::Backward)
        );
        if kind == ValueKind::Scalar && !atomic_input {
            return Err(Error::UnsupportedTranslation(format!(
                "{}{} over atomic values",
                direction.symbol(),
                axis
            )));
        }

        let type_argument = self.tree.children(node).first().copied();
        let (output, output_kind) = match (axis, direction) {
            (Axis::Instances, Direction::Forward) | (Axis::Types, Direction::Backward) => {
                let a = state.join(self.table(Table::RelInstanceOf));
                state.condition(format!("{}.id_type = {}", a, input));
                (format!("{}.id_instance", a), ValueKind::Topic)
            }
            (Axis::Instances, Direction::Backward) => {
                let a = state.join(self.table(Table::RelInstanceOf));
                state.condition(format!("{}.id_instance = {}", a, input));
                (format!("{}.id_type", a), ValueKind::Topic)
            }
            (Axis::Types, Direction::Forward) => {
                let source = match kind {
                    ValueKind::Topic => format!(
                        "( SELECT id_instance AS id, id_type FROM {} )",
                        self.table(Table::RelInstanceOf)
                    ),
                    _ => format!(
                        "( SELECT id_instance AS id, id_type FROM {} UNION SELECT id, id_type FROM {} )",
                        self.table(Table::RelInstanceOf),
                        self.table(Table::Typeables)
                    ),
                };
                let a = state.join(source);
                state.condition(format!("{}.id = {}", a, input));
                (format!("{}.id_type", a), ValueKind::Topic)
            }
            (Axis::Supertypes, Direction::Forward) | (Axis::Subtypes, Direction::Backward) => {
                let a = state.join(self.table(Table::RelKindOf));
                state.condition(format!("{}.id_subtype = {}", a, input));
                (format!("{}.id_supertype", a), ValueKind::Topic)
            }
            (Axis::Supertypes, Direction::Backward) | (Axis::Subtypes, Direction::Forward) => {
                let a = state.join(self.table(Table::RelKindOf));
                state.condition(format!("{}.id_supertype = {}", a, input));
                (format!("{}.id_subtype", a), ValueKind::Topic)
            }
            (Axis::Typed, Direction::Forward) => {
                let a = state.join(self.table(Table::Typeables));
                state.condition(format!("{}.id_type = {}", a, input));
                (format!("{}.id", a), ValueKind::Any)
            }
            (Axis::Typed, Direction::Backward) => {
                let a = state.join(self.table(Table::Typeables));
                state.condition(format!("{}.id = {}", a, input));
                (format!("{}.id_type", a), ValueKind::Topic)
            }
            (Axis::Characteristics, Direction::Forward) => {
                let a = state.join(self.table(Table::Characteristics));
                state.condition(format!("{}.id_parent = {}", a, input));
                if let Some(argument) = type_argument {
                    let column = if self.is_kind_argument(argument) {
                        format!("{}.id", a)
                    } else {
                        format!("{}.id_type", a)
                    };
                    state.condition(self.type_condition(argument, &column, true)?);
                }
                return self.finish(state, format!("{}.id", a), ValueKind::Any, None);
            }
            (Axis::Characteristics, Direction::Backward) => {
                let a = state.join(self.table(Table::Characteristics));
                state.condition(format!("{}.id = {}", a, input));
                if let Some(argument) = type_argument {
                    let condition = self.type_condition(argument, &format!("{}.id", a), false)?;
                    state.condition(condition);
                }
                return self.finish(state, format!("{}.id_parent", a), ValueKind::Topic, None);
            }
            (Axis::Scope, Direction::Forward) => {
                let s = state.join(self.table(Table::Scopeables));
                let r = state.join(self.table(Table::RelThemes));
                state.condition(format!("{}.id = {}", s, input));
                state.condition(format!("{}.id_scope = {}.id_scope", r, s));
                (format!("{}.id_theme", r), ValueKind::Topic)
            }
            (Axis::Scope, Direction::Backward) => {
                let r = state.join(self.table(Table::RelThemes));
                let s = state.join(self.table(Table::Scopeables));
                state.condition(format!("{}.id_theme = {}", r, input));
                state.condition(format!("{}.id_scope = {}.id_scope", s, r));
                (format!("{}.id", s), ValueKind::Any)
            }
            (Axis::Players, Direction::Forward) => {
                let a = state.join(self.table(Table::Roles));
                state.condition(format!("{}.id_parent = {}", a, input));
                if let Some(argument) = type_argument {
                    state.condition(self.type_condition(argument, &format!("{}.id_type", a), true)?);
                }
                return self.finish(state, format!("{}.id_player", a), ValueKind::Topic, None);
            }
            (Axis::Players, Direction::Backward) => {
                let a = state.join(self.table(Table::Roles));
                state.condition(format!("{}.id_player = {}", a, input));
                if let Some(argument) = type_argument {
                    state.condition(self.type_condition(argument, &format!("{}.id_type", a), true)?);
                }
                return self.finish(state, format!("{}.id_parent", a), ValueKind::Any, None);
            }
            (Axis::Roles, Direction::Forward) => {
                let a = state.join(self.table(Table::Roles));
                state.condition(format!("{}.id_parent = {}", a, input));
                if let Some(argument) = type_argument {
                    state.condition(self.type_condition(argument, &input, false)?);
                }
                return self.finish(state, format!("{}.id_type", a), ValueKind::Topic, None);
            }
            (Axis::Roles, Direction::Backward) => {
                let a = state.join(self.table(Table::Roles));
                state.condition(format!("{}.id_type = {}", a, input));
                (format!("{}.id_parent", a), ValueKind::Any)
            }
            (Axis::Traverse, _) => {
                let near = state.join(self.table(Table::Roles));
                let far = state.join(self.table(Table::Roles));
                let (association, output, output_kind) = if kind == ValueKind::Topic {
                    state.condition(format!("{}.id_player = {}", near, input));
                    state.condition(format!("{}.id_parent = {}.id_parent", far, near));
                    state.condition(format!("{}.id <> {}.id", far, near));
                    (format!("{}.id_parent", near), format!("{}.id_player", far), ValueKind::Topic)
                } else {
                    state.condition(format!("{}.id_parent = {}", near, input));
                    state.condition(format!("{}.id_player = {}.id_player", far, near));
                    state.condition(format!("{}.id_parent <> {}", far, input));
                    let output = format!("{}.id_parent", far);
                    let association = if direction == Direction::Forward {
                        output.clone()
                    } else {
                        input.clone()
                    };
                    (association, output, ValueKind::Any)
                };
                if let Some(argument) = type_argument {
                    state.condition(self.type_condition(argument, &association, false)?);
                }
                return self.finish(state, output, output_kind, None);
            }
            (Axis::Locators | Axis::Indicators | Axis::Item, _) => {
                let (table, owner) = match axis {
                    Axis::Locators => (Table::RelSubjectLocators, "id_topic"),
                    Axis::Indicators => (Table::RelSubjectIdentifiers, "id_topic"),
                    _ => (Table::RelItemIdentifiers, "id_construct"),
                };
                let r = state.join(self.table(table));
                let l = state.join(self.table(Table::Locators));
                state.condition(format!("{}.id_locator = {}.id", r, l));
                if direction == Direction::Forward {
                    state.condition(format!("{}.{} = {}", r, owner, input));
                    (format!("{}.reference", l), ValueKind::Scalar)
                } else {
                    state.condition(format!("{}.reference = {}", l, input));
                    let kind = if axis == Axis::Item {
                        ValueKind::Any
                    } else {
                        ValueKind::Topic
                    };
                    (format!("{}.{}", r, owner), kind)
                }
            }
            (Axis::Reifier, Direction::Forward) => {
                let a = state.join(self.table(Table::Reifiables));
                state.condition(format!("{}.id = {}", a, input));
                state.condition(format!("{}.id_reifier IS NOT NULL", a));
                (format!("{}.id_reifier", a), ValueKind::Topic)
            }
            (Axis::Reifier, Direction::Backward) => {
                let a = state.join(self.table(Table::Reifiables));
                state.condition(format!("{}.id_reifier = {}", a, input));
                (format!("{}.id", a), ValueKind::Any)
            }
            (Axis::Atomify, Direction::Forward) => {
                let a = state.join(self.table(Table::Literals));
                state.condition(format!("{}.id = {}", a, input));
                (format!("{}.value", a), ValueKind::Scalar)
            }
            (Axis::Atomify, Direction::Backward) => {
                let a = state.join(self.table(Table::Literals));
                state.condition(format!("{}.value = {}", a, input));
                (format!("{}.id", a), ValueKind::Any)
            }
            (Axis::Id, Direction::Forward) => (input.clone(), ValueKind::Scalar),
            (Axis::Id, Direction::Backward) => (input.clone(), ValueKind::Any),
        };
        self.finish(state, output, output_kind, type_argument)
    }

    /// Select the step output, applying a type argument if one is given
    fn finish(
        &self,
        mut state: TranslationState,
        output: String,
        kind: ValueKind,
        type_argument: Option<NodeIndex>,
    ) -> Result<TranslationState> {
        if let Some(argument) = type_argument {
            let condition = self.type_condition(argument, &output, false)?;
            state.condition(condition);
        }
        state.select(output, kind);
        Ok(state)
    }

    // ========== Filter predicates ==========

    /// SQL condition for a boolean node evaluated against the selection
    fn condition(&self, node: NodeIndex, state: &mut TranslationState) -> Result<String> {
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::And | NodeKind::Or => {
                let connective = if tree.kind(node) == &NodeKind::And {
                    " AND "
                } else {
                    " OR "
                };
                let mut parts = Vec::new();
                for &child in tree.children(node) {
                    parts.push(self.condition(child, state)?);
                }
                Ok(format!("( {} )", parts.join(connective)))
            }
            NodeKind::Not => Ok(format!(
                "NOT ( {} )",
                self.condition(tree.child(node, 0)?, state)?
            )),
            NodeKind::Exists => self.exists(tree.child(node, 0)?, state),
            NodeKind::Comparison(op) => {
                self.compare(*op, tree.child(node, 0)?, tree.child(node, 1)?, state)
            }
            NodeKind::FunctionCall(name) => match string_comparison(name) {
                Some(op) => {
                    let arguments = tree.children(node);
                    if arguments.len() != 2 {
                        return Err(Error::Arity {
                            function: name.clone(),
                            expected: "2".to_string(),
                            found: arguments.len(),
                        });
                    }
                    self.compare(op, arguments[0], arguments[1], state)
                }
                None => self.exists(node, state),
            },
            NodeKind::Path | NodeKind::Current => self.exists(node, state),
            _ => Err(self.unsupported(node)),
        }
    }

    fn exists(&self, node: NodeIndex, state: &mut TranslationState) -> Result<String> {
        match self.operand(node, state)? {
            Operand::Correlated(branch) => branch.to_exists(None),
            Operand::Set(sql) => Ok(format!("EXISTS ( {} )", sql)),
            Operand::Scalar(expression) => Ok(format!("{} IS NOT NULL", expression)),
        }
    }

    fn compare(
        &self,
        op: CompareOp,
        left: NodeIndex,
        right: NodeIndex,
        state: &mut TranslationState,
    ) -> Result<String> {
        let left = self.operand(left, state)?;
        let right = self.operand(right, state)?;
        let (op, left, right) = match (left, right) {
            (scalar @ (Operand::Scalar(_) | Operand::Set(_)), correlated @ Operand::Correlated(_)) => {
                (mirror(op), correlated, scalar)
            }
            pair => (op, pair.0, pair.1),
        };

        let test = |expression: &str, right: Operand| -> Result<String> {
            match right {
                Operand::Scalar(value) => Ok(format!("{} {} {}", expression, sql_operator(op, &value), value)),
                Operand::Set(sql) => match op {
                    CompareOp::Equals => Ok(format!("{} IN ( {} )", expression, sql)),
                    CompareOp::NotEquals => Ok(format!("{} NOT IN ( {} )", expression, sql)),
                    other => Ok(format!("{} {} ANY ( {} )", expression, sql_operator(other, ""), sql)),
                },
                Operand::Correlated(_) => Err(Error::UnsupportedTranslation(
                    "comparison between two item-relative paths".to_string(),
                )),
            }
        };

        match left {
            Operand::Correlated(branch) => {
                let condition = test(branch.selection()?, right)?;
                branch.to_exists(Some(condition))
            }
            Operand::Scalar(expression) => test(&expression, right),
            Operand::Set(sql) => match right {
                Operand::Scalar(value) => Ok(format!(
                    "EXISTS ( SELECT 1 FROM ( {} ) AS s WHERE s.value {} {} )",
                    sql,
                    sql_operator(op, &value),
                    value
                )),
                _ => Err(Error::UnsupportedTranslation(
                    "comparison between two sets".to_string(),
                )),
            },
        }
    }

    fn operand(&self, node: NodeIndex, state: &mut TranslationState) -> Result<Operand> {
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::Current => Ok(Operand::Correlated(state.branch())),
            NodeKind::Path
                if tree.children(node).first().map(|c| tree.kind(*c)) == Some(&NodeKind::Current) =>
            {
                let mut branch = state.branch();
                for &postfix in &tree.children(node)[1..] {
                    branch = self.postfix(postfix, branch)?;
                }
                state.absorb(&branch);
                Ok(Operand::Correlated(branch))
            }
            NodeKind::Literal(value) => Ok(Operand::Scalar(literal(value)?)),
            NodeKind::Parameter(index) => Ok(Operand::Scalar(literal(&self.parameter(*index)?)?)),
            NodeKind::ItemReference(reference) => {
                let iri = reference.resolve(&self.base_locator);
                Ok(Operand::Set(self.topics_by_locator(&iri)))
            }
            NodeKind::FunctionCall(name) if name == &qualified("count") => {
                let argument = tree.child(node, 0)?;
                match self.operand(argument, state)? {
                    Operand::Correlated(branch) if branch.from_parts().is_empty() => {
                        Ok(Operand::Scalar("1".to_string()))
                    }
                    Operand::Correlated(mut branch) => {
                        branch.select("COUNT(*)", ValueKind::Scalar);
                        Ok(Operand::Scalar(format!("( {} )", branch.to_scalar_sql()?)))
                    }
                    Operand::Set(sql) => Ok(Operand::Scalar(format!(
                        "( SELECT COUNT(*) FROM ( {} ) AS s )",
                        sql
                    ))),
                    Operand::Scalar(_) => Ok(Operand::Scalar("1".to_string())),
                }
            }
            NodeKind::FunctionCall(name) if name == &qualified("string-length") => {
                let argument = tree.child(node, 0)?;
                match self.operand(argument, state)? {
                    Operand::Correlated(branch) => {
                        let mut branch = self.atomic(branch)?;
                        state.absorb(&branch);
                        let length = format!("LENGTH({})", branch.selection()?);
                        branch.select(length, ValueKind::Scalar);
                        Ok(Operand::Correlated(branch))
                    }
                    Operand::Scalar(expression) => Ok(Operand::Scalar(format!("LENGTH({})", expression))),
                    Operand::Set(_) => Err(self.unsupported(node)),
                }
            }
            _ => {
                let mut independent = TranslationState::new();
                independent.absorb(state);
                let translated = self.translate_node(node, independent)?;
                state.absorb(&translated);
                if translated.from_parts().is_empty() && !translated.is_windowed() {
                    return Ok(Operand::Scalar(translated.selection()?.to_string()));
                }
                Ok(Operand::Set(translated.to_sql()?))
            }
        }
    }

    /// Move a construct-valued selection to its literal value
    fn atomic(&self, mut state: TranslationState) -> Result<TranslationState> {
        if state.value_kind() == ValueKind::Scalar {
            return Ok(state);
        }
        let input = state.selection()?.to_string();
        let a = state.join(self.table(Table::Literals));
        state.condition(format!("{}.id = {}", a, input));
        state.select(format!("{}.value", a), ValueKind::Scalar);
        Ok(state)
    }

    // ========== Functions ==========

    fn function(&self, node: NodeIndex, name: &str, state: TranslationState) -> Result<TranslationState> {
        let tree = self.tree;
        let arguments = tree.children(node);
        let arity = |expected: usize| -> Result<()> {
            if arguments.len() != expected {
                return Err(Error::Arity {
                    function: name.to_string(),
                    expected: expected.to_string(),
                    found: arguments.len(),
                });
            }
            Ok(())
        };

        if name == qualified("count") {
            arity(1)?;
            let counted = self.translate_node(arguments[0], state.branch())?;
            let mut result = TranslationState::new();
            result.absorb(&counted);
            result.join(format!("( {} )", counted.to_sql()?));
            result.select("COUNT(*)", ValueKind::Scalar);
            return Ok(result);
        }
        if name == qualified("string-length") {
            arity(1)?;
            let argument = self.translate_node(arguments[0], state)?;
            let mut argument = self.atomic(argument)?;
            let length = format!("LENGTH({})", argument.selection()?);
            argument.select(length, ValueKind::Scalar);
            return Ok(argument);
        }
        if name == qualified("substring") {
            arity(3)?;
            let from = self.bound(arguments[1])?.max(0);
            let to = self.bound(arguments[2])?.max(from);
            let argument = self.translate_node(arguments[0], state)?;
            let mut argument = self.atomic(argument)?;
            let part = format!(
                "SUBSTRING({}, {}, {})",
                argument.selection()?,
                from + 1,
                to - from
            );
            argument.select(part, ValueKind::Scalar);
            return Ok(argument);
        }
        if let Some(op) = string_comparison(name) {
            arity(2)?;
            let mut argument = self.translate_node(arguments[0], state)?;
            argument = self.atomic(argument)?;
            let right = self.operand(arguments[1], &mut argument)?;
            let Operand::Scalar(value) = right else {
                return Err(self.unsupported(arguments[1]));
            };
            let test = format!("({} {} {})", argument.selection()?, sql_operator(op, &value), value);
            argument.select(test, ValueKind::Scalar);
            return Ok(argument);
        }
        Err(Error::UnsupportedTranslation(format!("function {}", name)))
    }
}

fn string_comparison(name: &str) -> Option<CompareOp> {
    let local = name.strip_prefix(psi::FN_PREFIX)?;
    match local {
        "string-less-than" => Some(CompareOp::Less),
        "string-less-equal-than" => Some(CompareOp::LessEquals),
        "string-greater-than" => Some(CompareOp::Greater),
        "string-greater-equal-than" => Some(CompareOp::GreaterEquals),
        _ => None,
    }
}

/// Operator with its sides swapped
fn mirror(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Less => CompareOp::Greater,
        CompareOp::LessEquals => CompareOp::GreaterEquals,
        CompareOp::Greater => CompareOp::Less,
        CompareOp::GreaterEquals => CompareOp::LessEquals,
        other => other,
    }
}

fn sql_operator(op: CompareOp, right: &str) -> &'static str {
    match op {
        CompareOp::Equals if right == "NULL" => "IS",
        CompareOp::NotEquals if right == "NULL" => "IS NOT",
        CompareOp::Equals => "=",
        CompareOp::NotEquals => "<>",
        CompareOp::Less => "<",
        CompareOp::LessEquals => "<=",
        CompareOp::Greater => ">",
        CompareOp::GreaterEquals => ">=",
        CompareOp::RegexMatch => "~",
    }
}

fn is_kind_iri(iri: &str) -> bool {
    matches!(iri, psi::SUBJECT | psi::NAME | psi::OCCURRENCE)
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// SQL literal for an atomic value; constructs render as their id
pub fn literal(value: &Value) -> Result<String> {
    match value {
        Value::Null => Ok("NULL".to_string()),
        Value::Construct(id) => Ok(id.to_string()),
        Value::String(s) | Value::Iri(s) => Ok(quote(s)),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Decimal(d) => Ok(d.to_string()),
        Value::Boolean(true) => Ok("TRUE".to_string()),
        Value::Boolean(false) => Ok("FALSE".to_string()),
        Value::Sequence(_) => Err(Error::UnsupportedTranslation(
            "sequence literal".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use crate::registry::ExtensionRegistry;
    use tmql_core::{ConstructId, EntityId};

    fn translate(query: &str) -> Result<SqlStatement> {
        let registry = ExtensionRegistry::new();
        let tree = parse(query, &registry, 128)?;
        let schema = RelationalSchema::new();
        SqlTranslator::new(&tree, &schema)
            .with_base_locator("http://example.org/")
            .translate()
    }

    #[test]
    fn test_instances_of_item_reference() {
        let statement = translate("myTopic >> instances").unwrap();
        assert_eq!(statement.value_kind, ValueKind::Topic);
        assert!(statement.sql.starts_with("SELECT a1.id_instance AS value FROM ( SELECT si.id_topic"));
        assert!(statement.sql.contains("l.reference = 'http://example.org/myTopic'"));
        assert!(statement.sql.ends_with("rel_instance_of AS a1 WHERE a1.id_type = a0.id_topic"));
    }

    #[test]
    fn test_every_topic_anchor() {
        let statement = translate("// tm:subject").unwrap();
        assert_eq!(statement.sql, "SELECT a0.id AS value FROM topics AS a0");
        assert_eq!(statement.value_kind, ValueKind::Topic);

        let statement = translate("tm:subject").unwrap();
        assert_eq!(statement.sql, format!("SELECT '{}' AS value", psi::SUBJECT));
    }

    #[test]
    fn test_characteristics_with_name_type() {
        let statement = translate("myTopic >> characteristics tm:name >> atomify").unwrap();
        assert_eq!(statement.value_kind, ValueKind::Scalar);
        assert!(statement.sql.contains("a1.id_parent = a0.id_topic"));
        assert!(statement.sql.contains("a1.id IN ( SELECT id FROM names )"));
        assert!(statement.sql.contains("a2.id = a1.id"));
        assert!(statement.sql.starts_with("SELECT a2.value AS value"));
    }

    #[test]
    fn test_index_and_range_filters_become_limits() {
        let statement = translate("myTopic >> characteristics [ 2 ]").unwrap();
        assert!(statement.sql.ends_with("ORDER BY value LIMIT 1 OFFSET 2"));

        let statement = translate("myTopic >> characteristics [ 1 .. 4 ]").unwrap();
        assert!(statement.sql.ends_with("ORDER BY value LIMIT 3 OFFSET 1"));

        let statement = translate("myTopic >> characteristics [ -1 ]").unwrap();
        assert!(statement.sql.ends_with("LIMIT 0"));
    }

    #[test]
    fn test_roles_forward_restricts_association_type() {
        let statement = translate("myAssoc >> roles knows").unwrap();
        assert!(statement.sql.starts_with("SELECT a1.id_type AS value"));
        assert!(statement.sql.contains("a1.id_parent = a0.id_topic"));
        assert!(statement
            .sql
            .contains("a0.id_topic IN ( SELECT id_instance FROM rel_instance_of WHERE id_type IN ("));

        let plain = translate("myAssoc >> roles").unwrap();
        assert!(!plain.sql.contains("rel_instance_of"));
    }

    #[test]
    fn test_players_forward_reads_role_parents_only() {
        let statement = translate("myAssoc >> players").unwrap();
        assert!(statement.sql.starts_with("SELECT a1.id_player AS value"));
        assert!(statement.sql.ends_with("WHERE a1.id_parent = a0.id_topic"));
    }

    #[test]
    fn test_traverse_backward_restricts_input_association() {
        let forward = translate("myTopic << players >> traverse knows").unwrap();
        assert!(forward
            .sql
            .contains("a3.id_parent IN ( SELECT id_instance FROM rel_instance_of"));

        let backward = translate("myTopic << players << traverse knows").unwrap();
        assert!(backward
            .sql
            .contains("a1.id_parent IN ( SELECT id_instance FROM rel_instance_of"));
        assert!(backward.sql.starts_with("SELECT a3.id_parent AS value"));
    }

    #[test]
    fn test_step_after_window_wraps() {
        let statement = translate("myTopic >> characteristics [ 0 ] >> atomify").unwrap();
        assert!(statement.sql.contains("LIMIT 1 ) AS a2"));
        assert!(statement.sql.starts_with("SELECT a3.value AS value FROM ( SELECT a1.id AS value"));
    }

    #[test]
    fn test_predicate_filter_is_correlated() {
        let statement =
            translate("myTopic >> characteristics [ . >> atomify == \"x\" ]").unwrap();
        assert!(statement
            .sql
            .ends_with("WHERE a1.id_parent = a0.id_topic AND EXISTS ( SELECT 1 FROM literals AS a2 WHERE a2.id = a1.id AND a2.value = 'x' )"));
    }

    #[test]
    fn test_type_filter_shortcut() {
        let statement = translate("myTopic >> characteristics [ ^ theType ]").unwrap();
        assert!(statement.sql.contains("EXISTS ( SELECT 1 FROM"));
        assert!(statement.sql.contains("IN ( SELECT si.id_topic"));
        assert!(statement.sql.contains("'http://example.org/theType'"));
    }

    #[test]
    fn test_count_in_filter() {
        let statement = translate("// tm:subject [ fn:count ( . >> instances ) == 0 ]").unwrap();
        assert!(statement
            .sql
            .contains("WHERE ( SELECT COUNT(*) FROM rel_instance_of AS a1 WHERE a1.id_type = a0.id ) = 0"));
    }

    #[test]
    fn test_functions() {
        let statement = translate("fn:count ( myTopic >> instances )").unwrap();
        assert!(statement.sql.starts_with("SELECT COUNT(*) AS value FROM ( SELECT a1.id_instance AS value"));

        let statement = translate("fn:string-length ( myTopic >> characteristics )").unwrap();
        assert!(statement.sql.starts_with("SELECT LENGTH(a2.value) AS value"));

        let statement = translate("fn:substring ( myTopic >> characteristics , 1 , 3 )").unwrap();
        assert!(statement.sql.starts_with("SELECT SUBSTRING(a2.value, 2, 2) AS value"));

        let statement =
            translate("fn:string-less-than ( myTopic >> characteristics , \"m\" )").unwrap();
        assert!(statement.sql.starts_with("SELECT (a2.value < 'm') AS value"));
    }

    #[test]
    fn test_every_axis_translates_both_ways() {
        for axis in Axis::ALL {
            let forward = format!("myTopic >> {}", axis.name());
            let backward = format!("myTopic << {}", axis.name());
            if !matches!(axis, Axis::Atomify | Axis::Id | Axis::Locators | Axis::Indicators | Axis::Item) {
                assert!(translate(&forward).is_ok(), "{forward}");
                assert!(translate(&backward).is_ok(), "{backward}");
            }
        }
        assert!(translate("\"http://x.org/\" << indicators").is_ok());
        assert!(translate("myTopic >> indicators").is_ok());
        assert!(translate("\"v\" << atomify").is_ok());
    }

    #[test]
    fn test_unsupported() {
        assert!(matches!(
            translate("FOR $t IN // x RETURN $t"),
            Err(Error::UnsupportedTranslation(_))
        ));
        assert!(matches!(
            translate("\"text\" >> characteristics"),
            Err(Error::UnsupportedTranslation(_))
        ));
        assert!(matches!(
            translate("fn:best-label ( myTopic )"),
            Err(Error::UnsupportedTranslation(_))
        ));
    }

    #[test]
    fn test_bound_parameter_renders_as_id() {
        let registry = ExtensionRegistry::new();
        let tree = parse("? >> characteristics", &registry, 128).unwrap();
        let schema = RelationalSchema::with_prefix("tm_");
        let parameters = vec![Some(Value::Construct(ConstructId::from_internal(42)))];
        let statement = SqlTranslator::new(&tree, &schema)
            .with_parameters(&parameters)
            .translate()
            .unwrap();
        assert_eq!(
            statement.sql,
            "SELECT a0.id AS value FROM tm_characteristics AS a0 WHERE a0.id_parent = 42"
        );
        assert_eq!(statement.to_string(), statement.sql);
    }

    #[test]
    fn test_literal_quoting() {
        assert_eq!(literal(&Value::from("it's")).unwrap(), "'it''s'");
        assert_eq!(literal(&Value::Boolean(true)).unwrap(), "TRUE");
        assert!(literal(&Value::Sequence(vec![])).is_err());
    }
}
