//! Tree-walking interpreter
//!
//! Evaluates an [`ExpressionTree`] against a [`TopicMapStore`]. Content
//! expressions evaluate to value sequences, boolean expressions to truth
//! values, and query expressions to [`QueryMatches`]. Binding frames are
//! pushed on the [`Context`] stack for FOR bindings, quantifier bodies and
//! filter candidates and are popped again whether the body succeeds or not.

pub mod axis;
pub mod context;
pub mod functions;
pub mod matches;

pub use axis::{Navigator, TypeArgument};
pub use context::Context;
pub use functions::{FunctionContext, FunctionRegistry};
pub use matches::{column_name, QueryMatches, Tuple, VALUE_COLUMN};

use crate::ast::{grammar, ArithmeticOp, Axis, CompareOp, ExpressionTree, NodeIndex, NodeKind, Quantifier, Reference};
use crate::registry::ExtensionRegistry;
use context::{CURRENT, POSITION};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use tmql_core::{psi, ConstructId, ConstructKind, Direction, Error, Result, Value};
use tmql_graph::{ChangeSet, Fragment, Removal, TopicMapStore};
use tracing::{debug, trace};

/// Everything an evaluation reads besides the tree
pub struct Environment<'a> {
    pub store: &'a dyn TopicMapStore,
    pub registry: &'a ExtensionRegistry,
    pub functions: &'a FunctionRegistry,
    pub parameters: &'a [Option<Value>],
    /// Base for relative item references; empty means the store's own
    pub base_locator: &'a str,
    pub transitive: bool,
}

pub struct Interpreter<'a> {
    store: &'a dyn TopicMapStore,
    tree: &'a ExpressionTree,
    registry: &'a ExtensionRegistry,
    functions: &'a FunctionRegistry,
    parameters: &'a [Option<Value>],
    base_locator: String,
    transitive: bool,
    context: Context,
    regexes: HashMap<String, Regex>,
    changes: ChangeSet,
}

impl<'a> Interpreter<'a> {
    pub fn new(tree: &'a ExpressionTree, environment: Environment<'a>) -> Self {
        let base_locator = if environment.base_locator.is_empty() {
            environment.store.base_locator().to_string()
        } else {
            environment.base_locator.to_string()
        };
        let transitive = match tree.environment().pragma("taxonometry") {
            Some(value) if value.ends_with("intransitive") => false,
            Some(value) if value.ends_with("transitive") => true,
            _ => environment.transitive,
        };

        Self {
            store: environment.store,
            tree,
            registry: environment.registry,
            functions: environment.functions,
            parameters: environment.parameters,
            base_locator,
            transitive,
            context: Context::new(),
            regexes: HashMap::new(),
            changes: ChangeSet::default(),
        }
    }

    /// Evaluate the whole query
    pub fn run(&mut self) -> Result<QueryMatches> {
        let root = self.tree.root();
        let matches = self.evaluate(root)?;
        trace!("Evaluation produced {} tuple(s)", matches.len());
        Ok(matches)
    }

    pub fn tree(&self) -> &'a ExpressionTree {
        self.tree
    }

    pub fn store(&self) -> &'a dyn TopicMapStore {
        self.store
    }

    /// Base relative references resolve against
    pub fn base_locator(&self) -> &str {
        &self.base_locator
    }

    /// Buffer a removal; nothing changes until the engine commits
    pub fn buffer_removal(&mut self, constructs: Vec<ConstructId>, cascade: bool) {
        debug!("Buffered removal of {} construct(s)", constructs.len());
        self.changes.removals.push(Removal::new(constructs, cascade));
    }

    pub fn buffer_insertion(&mut self, fragments: Vec<Fragment>) {
        debug!("Buffered insertion of {} fragment(s)", fragments.len());
        self.changes.insertions.extend(fragments);
    }

    pub fn pending_changes(&self) -> &ChangeSet {
        &self.changes
    }

    pub fn take_changes(&mut self) -> ChangeSet {
        std::mem::take(&mut self.changes)
    }

    /// Run `body` with an extra binding frame
    pub fn with_frame<T>(
        &mut self,
        frame: Tuple,
        body: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.context.push(frame);
        let result = body(self);
        self.context.pop();
        result
    }

    // ========== Query expressions ==========

    pub fn evaluate(&mut self, node: NodeIndex) -> Result<QueryMatches> {
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::Query => {
                let body = tree.children(node).last().copied().ok_or_else(|| {
                    Error::Internal("Query expression without a body".to_string())
                })?;
                self.evaluate(body)
            }
            NodeKind::Flwr(modifiers) | NodeKind::Select(modifiers) => {
                self.flwr(node, modifiers.unique, modifiers.offset, modifiers.limit)
            }
            NodeKind::Extension { name, .. } => {
                let evaluator = self.registry.evaluator(name).ok_or_else(|| {
                    Error::ExtensionRegistry(format!("No evaluator for extension '{}'", name))
                })?;
                evaluator.evaluate(self, node)
            }
            _ => Ok(QueryMatches::from_values(self.values(node)?)),
        }
    }

    fn flwr(
        &mut self,
        node: NodeIndex,
        unique: bool,
        offset: Option<usize>,
        limit: Option<usize>,
    ) -> Result<QueryMatches> {
        let tree = self.tree;
        let mut bindings = vec![Tuple::new()];
        let mut introduced = HashSet::new();
        let mut condition = None;
        let mut order = None;
        let mut projection = None;

        for &clause in tree.children(node) {
            match tree.kind(clause) {
                NodeKind::For { variable } => {
                    let domain = tree.child(clause, 0)?;
                    let mut expanded = Vec::new();
                    for binding in bindings {
                        let values = self.with_frame(binding.clone(), |i| i.values(domain))?;
                        for value in values {
                            let mut extended = binding.clone();
                            extended.insert(variable.clone(), value);
                            expanded.push(extended);
                        }
                    }
                    bindings = expanded;
                    introduced.insert(variable.clone());
                }
                NodeKind::Let { variable } => {
                    let value = tree.child(clause, 0)?;
                    for binding in bindings.iter_mut() {
                        let values = self.with_frame(binding.clone(), |i| i.values(value))?;
                        binding.insert(variable.clone(), Value::from_values(values));
                    }
                    introduced.insert(variable.clone());
                }
                NodeKind::Where => condition = Some(tree.child(clause, 0)?),
                NodeKind::OrderBy => order = Some(clause),
                NodeKind::Return => projection = Some(tree.child(clause, 0)?),
                NodeKind::Tuple => projection = Some(clause),
                _ => {}
            }
        }
        let projection = projection
            .ok_or_else(|| Error::Internal("Query without a projection".to_string()))?;

        // Variables nobody binds range over every topic
        let free = self.free_variables(&[condition, order, Some(projection)], &introduced);
        if !free.is_empty() {
            let topics: Vec<Value> = self.store.topics()?.into_iter().map(Value::Construct).collect();
            debug!("Binding free variables {:?} over {} topic(s)", free, topics.len());
            for variable in free {
                let mut expanded = Vec::with_capacity(bindings.len() * topics.len());
                for binding in &bindings {
                    for topic in &topics {
                        let mut extended = binding.clone();
                        extended.insert(variable.clone(), topic.clone());
                        expanded.push(extended);
                    }
                }
                bindings = expanded;
            }
        }

        if let Some(condition) = condition {
            let kept = self.select(condition, &bindings, (0..bindings.len()).collect())?;
            let filtered: Vec<Tuple> = kept.into_iter().map(|i| bindings[i].clone()).collect();
            bindings = filtered;
        }
        if let Some(order) = order {
            bindings = self.sort(order, bindings)?;
        }

        let items = tree.children(projection);
        let mut matches = QueryMatches::with_columns((0..items.len()).map(column_name).collect());
        for binding in bindings {
            let row = self.with_frame(binding, |i| {
                let mut row = Tuple::new();
                for (position, item) in items.iter().enumerate() {
                    let content = tree.child(*item, 0)?;
                    row.insert(column_name(position), Value::from_values(i.values(content)?));
                }
                Ok(row)
            })?;
            matches.push(row);
        }

        if unique {
            matches.dedup();
        }
        matches.slice(offset.unwrap_or(0), limit);
        for (position, item) in items.iter().enumerate() {
            if let NodeKind::TupleItem { alias: Some(alias) } = tree.kind(*item) {
                matches.rename(&column_name(position), alias);
            }
        }
        Ok(matches)
    }

    /// Variables referenced below `roots` that nothing binds
    fn free_variables(&self, roots: &[Option<NodeIndex>], introduced: &HashSet<String>) -> Vec<String> {
        let tree = self.tree;
        let mut referenced = Vec::new();
        let mut declared = introduced.clone();
        let mut stack: Vec<NodeIndex> = roots.iter().flatten().copied().collect();
        while let Some(node) = stack.pop() {
            match tree.kind(node) {
                NodeKind::Variable(name) if !referenced.contains(name) => referenced.push(name.clone()),
                NodeKind::Quantified { variable, .. }
                | NodeKind::For { variable }
                | NodeKind::Let { variable } => {
                    declared.insert(variable.clone());
                }
                _ => {}
            }
            stack.extend(tree.children(node).iter().rev());
        }
        referenced
            .into_iter()
            .filter(|name| !declared.contains(name) && !self.context.is_bound(name))
            .collect()
    }

    fn sort(&mut self, order: NodeIndex, bindings: Vec<Tuple>) -> Result<Vec<Tuple>> {
        let tree = self.tree;
        let items = tree.children(order);
        let descending: Vec<bool> = items
            .iter()
            .map(|i| matches!(tree.kind(*i), NodeKind::OrderItem { descending: true }))
            .collect();

        let mut keyed = Vec::with_capacity(bindings.len());
        for binding in bindings {
            let keys = self.with_frame(binding.clone(), |i| {
                let mut keys = Vec::with_capacity(items.len());
                for item in items {
                    let key = tree.child(*item, 0)?;
                    keys.push(i.values(key)?.into_iter().next().unwrap_or(Value::Null));
                }
                Ok(keys)
            })?;
            keyed.push((keys, binding));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (position, desc) in descending.iter().enumerate() {
                let ordering = a[position].sort_cmp(&b[position]);
                let ordering = if *desc { ordering.reverse() } else { ordering };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, binding)| binding).collect())
    }

    // ========== Boolean expressions ==========

    /// Indices of the candidate tuples satisfying a condition, in order.
    ///
    /// Conjunctions narrow the candidates, disjunctions unite them and a
    /// negation keeps the candidates its operand rejects.
    fn select(&mut self, node: NodeIndex, tuples: &[Tuple], candidates: Vec<usize>) -> Result<Vec<usize>> {
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::And => {
                let mut remaining = candidates;
                for &child in tree.children(node) {
                    if remaining.is_empty() {
                        break;
                    }
                    remaining = self.select(child, tuples, remaining)?;
                }
                Ok(remaining)
            }
            NodeKind::Or => {
                let mut accepted = HashSet::new();
                for &child in tree.children(node) {
                    accepted.extend(self.select(child, tuples, candidates.clone())?);
                }
                Ok(candidates.into_iter().filter(|i| accepted.contains(i)).collect())
            }
            NodeKind::Not => {
                let operand = tree.child(node, 0)?;
                let rejected: HashSet<usize> =
                    self.select(operand, tuples, candidates.clone())?.into_iter().collect();
                Ok(candidates.into_iter().filter(|i| !rejected.contains(i)).collect())
            }
            _ => {
                let mut kept = Vec::new();
                for index in candidates {
                    if self.with_frame(tuples[index].clone(), |i| i.truth(node))? {
                        kept.push(index);
                    }
                }
                Ok(kept)
            }
        }
    }

    pub fn truth(&mut self, node: NodeIndex) -> Result<bool> {
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::And => {
                for &child in tree.children(node) {
                    if !self.truth(child)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            NodeKind::Or => {
                for &child in tree.children(node) {
                    if self.truth(child)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            NodeKind::Not => Ok(!self.truth(tree.child(node, 0)?)?),
            NodeKind::Exists => Ok(truthy(&self.values(tree.child(node, 0)?)?)),
            NodeKind::Isa | NodeKind::Ako => {
                let instance = tree.kind(node) == &NodeKind::Isa;
                let left = self.constructs(tree.child(node, 0)?)?;
                let right = self.constructs(tree.child(node, 1)?)?;
                for a in &left {
                    for b in &right {
                        let holds = if instance {
                            self.is_instance(*a, *b)?
                        } else {
                            self.is_subtype(*a, *b)?
                        };
                        if holds {
                            return Ok(true);
                        }
                    }
                }
                Ok(false)
            }
            NodeKind::Comparison(op) => {
                self.compare(*op, tree.child(node, 0)?, tree.child(node, 1)?)
            }
            NodeKind::Quantified {
                quantifier,
                variable,
            } => self.quantified(*quantifier, variable, tree.child(node, 0)?, tree.child(node, 1)?),
            NodeKind::PredicateInvocation { strict } => self.invoke_predicate(node, *strict),
            NodeKind::Extension { .. } => Ok(!self.evaluate(node)?.is_empty()),
            _ => Ok(truthy(&self.values(node)?)),
        }
    }

    fn constructs(&mut self, node: NodeIndex) -> Result<Vec<ConstructId>> {
        Ok(self
            .values(node)?
            .iter()
            .filter_map(Value::as_construct)
            .collect())
    }

    fn is_instance(&self, construct: ConstructId, construct_type: ConstructId) -> Result<bool> {
        match self.store.kind_of(construct)? {
            Some(ConstructKind::Topic) => {
                if self.transitive {
                    self.store.is_instance_of(construct, construct_type)
                } else {
                    Ok(self.store.types_of(construct)?.contains(&construct_type))
                }
            }
            Some(kind) if kind.is_typed() => match self.store.type_of(construct)? {
                Some(t) if self.transitive => self.store.is_kind_of(t, construct_type),
                Some(t) => Ok(t == construct_type),
                None => Ok(false),
            },
            _ => Ok(false),
        }
    }

    fn is_subtype(&self, subtype: ConstructId, supertype: ConstructId) -> Result<bool> {
        if subtype == supertype {
            return Ok(false);
        }
        let supertypes = if self.transitive {
            self.store.transitive_supertypes(subtype)?
        } else {
            self.store.supertypes_of(subtype)?
        };
        Ok(supertypes.contains(&supertype))
    }

    fn compare(&mut self, op: CompareOp, left: NodeIndex, right: NodeIndex) -> Result<bool> {
        let left = self.values(left)?;
        let right = self.values(right)?;

        if op == CompareOp::RegexMatch {
            let mut texts = Vec::with_capacity(left.len());
            for value in &left {
                texts.extend(self.text(value)?);
            }
            for pattern in right.iter().filter_map(Value::atomic_string) {
                let regex = self.regex(&pattern)?;
                if texts.iter().any(|t| regex.is_match(t)) {
                    return Ok(true);
                }
            }
            return Ok(false);
        }

        Ok(left
            .iter()
            .any(|a| right.iter().any(|b| compare_values(op, a, b))))
    }

    fn regex(&mut self, pattern: &str) -> Result<Regex> {
        if let Some(regex) = self.regexes.get(pattern) {
            return Ok(regex.clone());
        }
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            Error::RuntimeEvaluation(format!("Invalid regular expression '{}': {}", pattern, e))
        })?;
        self.regexes.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }

    fn text(&self, value: &Value) -> Result<Option<String>> {
        match value {
            Value::Construct(id) => self.store.value_of(*id),
            other => Ok(other.atomic_string()),
        }
    }

    fn quantified(
        &mut self,
        quantifier: Quantifier,
        variable: &str,
        domain: NodeIndex,
        body: NodeIndex,
    ) -> Result<bool> {
        let mut satisfied = 0usize;
        for value in self.values(domain)? {
            let frame = Tuple::from([(variable.to_string(), value)]);
            let holds = self.with_frame(frame, |i| i.truth(body))?;
            if holds {
                satisfied += 1;
            }
            match quantifier {
                Quantifier::Some if holds => return Ok(true),
                Quantifier::Every if !holds => return Ok(false),
                Quantifier::AtLeast(n) if satisfied >= n => return Ok(true),
                Quantifier::AtMost(n) if satisfied > n => return Ok(false),
                _ => {}
            }
        }
        Ok(match quantifier {
            Quantifier::Some => false,
            Quantifier::Every => true,
            Quantifier::AtLeast(n) => satisfied >= n,
            Quantifier::AtMost(n) => satisfied <= n,
        })
    }

    /// True if some association of the type plays out the listed roles
    fn invoke_predicate(&mut self, node: NodeIndex, strict: bool) -> Result<bool> {
        let tree = self.tree;
        let children = tree.children(node);
        let association_types = self.constructs(children[0])?;
        let mut pairs = Vec::new();
        for pair in children[1..].chunks(2) {
            if let [role, player] = pair {
                let role_types = self.constructs(*role)?;
                let players = self.constructs(*player)?;
                pairs.push((role_types, players));
            }
        }

        for association_type in association_types {
            for association in self.store.typed_by(association_type)? {
                if self.store.kind_of(association)? != Some(ConstructKind::Association) {
                    continue;
                }
                let mut roles = Vec::new();
                for role in self.store.roles_of(association)? {
                    roles.push((self.store.type_of(role)?, self.store.player_of(role)?));
                }
                if strict && roles.len() != pairs.len() {
                    continue;
                }
                let mut used = vec![false; roles.len()];
                if assign_roles(&pairs, &roles, 0, &mut used) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    // ========== Content expressions ==========

    /// Sequence a content expression evaluates to
    pub fn values(&mut self, node: NodeIndex) -> Result<Vec<Value>> {
        let tree = self.tree;
        match tree.kind(node) {
            NodeKind::ItemReference(reference) => self.resolve(reference),
            NodeKind::Literal(value) => Ok(vec![value.clone()]),
            NodeKind::Variable(name) => self.bound(name),
            NodeKind::IndexVariable => self.bound(POSITION),
            NodeKind::Current => self.bound(CURRENT),
            NodeKind::TopicMap => Ok(vec![Value::Construct(self.store.topic_map())]),
            NodeKind::Parameter(index) => match self.parameters.get(*index) {
                Some(Some(value)) => Ok(value.clone().flatten()),
                _ => Err(Error::UnboundParameter(*index)),
            },
            NodeKind::FunctionCall(name) => {
                let mut arguments = Vec::with_capacity(tree.children(node).len());
                for &argument in tree.children(node) {
                    arguments.push(self.values(argument)?);
                }
                let context = FunctionContext {
                    store: self.store,
                    transitive: self.transitive,
                };
                self.functions.call(name, &context, &arguments)
            }
            NodeKind::SubQuery => {
                let query = tree.child(node, 0)?;
                let matches = self.evaluate(query)?;
                Ok(sequence_of(&matches))
            }
            NodeKind::Path => self.path(node),
            NodeKind::Union => {
                let mut left = self.values(tree.child(node, 0)?)?;
                left.extend(self.values(tree.child(node, 1)?)?);
                Ok(left)
            }
            NodeKind::Difference => {
                let mut left = self.values(tree.child(node, 0)?)?;
                let right = self.values(tree.child(node, 1)?)?;
                left.retain(|v| !right.contains(v));
                Ok(left)
            }
            NodeKind::Arithmetic(op) => {
                let left = self.values(tree.child(node, 0)?)?;
                let right = self.values(tree.child(node, 1)?)?;
                let mut results = Vec::with_capacity(left.len() * right.len());
                for a in &left {
                    for b in &right {
                        results.push(arithmetic(*op, a, b)?);
                    }
                }
                Ok(results)
            }
            NodeKind::Query | NodeKind::Flwr(_) | NodeKind::Select(_) | NodeKind::Extension { .. } => {
                let matches = self.evaluate(node)?;
                Ok(sequence_of(&matches))
            }
            kind if kind.is_boolean() => Ok(vec![Value::Boolean(self.truth(node)?)]),
            other => Err(Error::Internal(format!(
                "{} node cannot be evaluated as a value",
                other.node_type()
            ))),
        }
    }

    fn bound(&self, name: &str) -> Result<Vec<Value>> {
        match self.context.lookup(name) {
            Some(value) => Ok(value.clone().flatten()),
            None if name == CURRENT => Err(Error::RuntimeEvaluation(
                "'.' is only bound inside a filter".to_string(),
            )),
            None => Err(Error::RuntimeEvaluation(format!(
                "Variable {} is not bound",
                name
            ))),
        }
    }

    /// Subject identifier, then item identifier, then subject locator
    fn resolve(&self, reference: &Reference) -> Result<Vec<Value>> {
        let iri = reference.resolve(&self.base_locator);
        if matches!(iri.as_str(), psi::SUBJECT | psi::NAME | psi::OCCURRENCE) {
            return Ok(vec![Value::Iri(iri)]);
        }
        if let Some(topic) = self.store.topic_by_subject_identifier(&iri)? {
            return Ok(vec![Value::Construct(topic)]);
        }
        if let Some(construct) = self.store.construct_by_item_identifier(&iri)? {
            return Ok(vec![Value::Construct(construct)]);
        }
        if let Some(topic) = self.store.topic_by_subject_locator(&iri)? {
            return Ok(vec![Value::Construct(topic)]);
        }
        trace!("Item reference {} resolves to nothing", iri);
        Ok(Vec::new())
    }

    fn path(&mut self, node: NodeIndex) -> Result<Vec<Value>> {
        let tree = self.tree;
        let children = tree.children(node);
        let mut current = self.values(tree.child(node, 0)?)?;
        for &postfix in &children[1..] {
            current = match tree.kind(postfix) {
                NodeKind::Step { axis, direction } => self.step(postfix, *axis, *direction, current)?,
                NodeKind::Filter => self.filter(postfix, current)?,
                other => {
                    return Err(Error::Internal(format!(
                        "Unexpected {} in path",
                        other.node_type()
                    )))
                }
            };
        }
        Ok(current)
    }

    fn step(
        &mut self,
        node: NodeIndex,
        axis: Axis,
        direction: Direction,
        input: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let filter = match self.tree.children(node).first() {
            Some(&argument) => Some(TypeArgument::from_values(&self.values(argument)?)),
            None => None,
        };
        let navigator = Navigator::new(self.store, self.transitive);
        let mut output = Vec::new();
        for value in &input {
            output.extend(navigator.navigate(axis, direction, value, filter.as_ref())?);
        }
        trace!(
            "{}{} mapped {} item(s) to {}",
            direction.symbol(),
            axis,
            input.len(),
            output.len()
        );
        Ok(output)
    }

    fn filter(&mut self, node: NodeIndex, input: Vec<Value>) -> Result<Vec<Value>> {
        let tree = self.tree;
        match tree.node(node).grammar_type {
            Some(grammar::INDEX_FILTER) => {
                let index = self.integer(tree.child(node, 0)?)?;
                if index < 0 || index as usize >= input.len() {
                    return Ok(Vec::new());
                }
                Ok(vec![input[index as usize].clone()])
            }
            Some(grammar::RANGE_FILTER) => {
                let len = input.len() as i64;
                let low = self.integer(tree.child(node, 0)?)?.clamp(0, len) as usize;
                let high = self.integer(tree.child(node, 1)?)?.clamp(0, len) as usize;
                if low >= high {
                    return Ok(Vec::new());
                }
                Ok(input[low..high].to_vec())
            }
            _ => {
                let condition = tree.child(node, 0)?;
                let mut kept = Vec::new();
                for (position, value) in input.into_iter().enumerate() {
                    let frame = Tuple::from([
                        (CURRENT.to_string(), value.clone()),
                        (POSITION.to_string(), Value::Integer(position as i64)),
                    ]);
                    if self.with_frame(frame, |i| i.truth(condition))? {
                        kept.push(value);
                    }
                }
                Ok(kept)
            }
        }
    }

    fn integer(&mut self, node: NodeIndex) -> Result<i64> {
        let values = self.values(node)?;
        values.first().and_then(Value::as_integer).ok_or_else(|| {
            Error::RuntimeEvaluation(format!(
                "Filter bound must be an integer, found {}",
                values.first().map(Value::type_name).unwrap_or("nothing")
            ))
        })
    }
}

/// Non-empty once nulls and `false` are dropped
fn truthy(values: &[Value]) -> bool {
    values
        .iter()
        .any(|v| !matches!(v, Value::Null | Value::Boolean(false)))
}

fn sequence_of(matches: &QueryMatches) -> Vec<Value> {
    match matches.columns() {
        [column] => matches.values(column),
        _ => matches
            .tuples()
            .iter()
            .map(|t| Value::Sequence(matches.row(t)))
            .collect(),
    }
}

fn compare_values(op: CompareOp, a: &Value, b: &Value) -> bool {
    let ordering = a.compare(b);
    let equal = a == b || ordering == Some(Ordering::Equal);
    match op {
        CompareOp::Equals => equal,
        CompareOp::NotEquals => !equal,
        CompareOp::Less => ordering == Some(Ordering::Less),
        CompareOp::LessEquals => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        CompareOp::Greater => ordering == Some(Ordering::Greater),
        CompareOp::GreaterEquals => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        CompareOp::RegexMatch => false,
    }
}

/// Backtracking assignment of distinct roles to the requested pairs
fn assign_roles(
    pairs: &[(Vec<ConstructId>, Vec<ConstructId>)],
    roles: &[(Option<ConstructId>, Option<ConstructId>)],
    next: usize,
    used: &mut [bool],
) -> bool {
    let Some((role_types, players)) = pairs.get(next) else {
        return true;
    };
    for (index, (role_type, player)) in roles.iter().enumerate() {
        if used[index] {
            continue;
        }
        let fits = role_type.is_some_and(|t| role_types.contains(&t))
            && player.is_some_and(|p| players.contains(&p));
        if fits {
            used[index] = true;
            if assign_roles(pairs, roles, next + 1, used) {
                return true;
            }
            used[index] = false;
        }
    }
    false
}

fn arithmetic(op: ArithmeticOp, a: &Value, b: &Value) -> Result<Value> {
    if op == ArithmeticOp::Add && (matches!(a, Value::String(_)) || matches!(b, Value::String(_))) {
        if let (Some(x), Some(y)) = (a.atomic_string(), b.atomic_string()) {
            return Ok(Value::String(format!("{}{}", x, y)));
        }
    }
    let invalid = || {
        Error::RuntimeEvaluation(format!(
            "Cannot apply {:?} to {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))
    };
    if !a.is_numeric() || !b.is_numeric() {
        return Err(invalid());
    }
    let divides_by_zero = matches!(op, ArithmeticOp::Divide | ArithmeticOp::Modulo)
        && b.as_decimal() == Some(0.0);
    if divides_by_zero {
        return Err(Error::RuntimeEvaluation("Division by zero".to_string()));
    }

    if let (Value::Integer(x), Value::Integer(y)) = (a, b) {
        let exact = match op {
            ArithmeticOp::Add => x.checked_add(*y),
            ArithmeticOp::Subtract => x.checked_sub(*y),
            ArithmeticOp::Multiply => x.checked_mul(*y),
            ArithmeticOp::Divide if x % y == 0 => x.checked_div(*y),
            ArithmeticOp::Divide => None,
            ArithmeticOp::Modulo => x.checked_rem(*y),
        };
        if let Some(result) = exact {
            return Ok(Value::Integer(result));
        }
    }

    let (x, y) = match (a.as_decimal(), b.as_decimal()) {
        (Some(x), Some(y)) => (x, y),
        _ => return Err(invalid()),
    };
    Ok(Value::Decimal(match op {
        ArithmeticOp::Add => x + y,
        ArithmeticOp::Subtract => x - y,
        ArithmeticOp::Multiply => x * y,
        ArithmeticOp::Divide => x / y,
        ArithmeticOp::Modulo => x % y,
    }))
}
