//! Axis navigation
//!
//! Every axis maps one input item to its neighbours in forward or backward
//! direction. Backward is the inverse of forward for the same axis and type
//! argument. Navigation never changes the topic map.

use crate::ast::Axis;
use std::collections::HashSet;
use tmql_core::{psi, ConstructId, ConstructKind, Direction, Error, Result, Value};
use tmql_graph::TopicMapStore;

/// Resolved type argument of a step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeArgument {
    pub topics: Vec<ConstructId>,
    /// Construct kinds selected by `tm:name` or `tm:occurrence`
    pub kinds: Vec<ConstructKind>,
}

impl TypeArgument {
    pub fn from_values(values: &[Value]) -> Self {
        let mut argument = TypeArgument::default();
        for value in values {
            match value {
                Value::Construct(id) => argument.topics.push(*id),
                Value::Iri(iri) if iri == psi::NAME => argument.kinds.push(ConstructKind::Name),
                Value::Iri(iri) if iri == psi::OCCURRENCE => {
                    argument.kinds.push(ConstructKind::Occurrence)
                }
                _ => {}
            }
        }
        argument
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty() && self.kinds.is_empty()
    }
}

/// Navigation over one store
pub struct Navigator<'a> {
    store: &'a dyn TopicMapStore,
    transitive: bool,
}

impl<'a> Navigator<'a> {
    pub fn new(store: &'a dyn TopicMapStore, transitive: bool) -> Self {
        Self { store, transitive }
    }

    /// Neighbours of one item
    pub fn navigate(
        &self,
        axis: Axis,
        direction: Direction,
        input: &Value,
        filter: Option<&TypeArgument>,
    ) -> Result<Vec<Value>> {
        if input.is_null() {
            return Ok(Vec::new());
        }
        let ids = match (axis, direction) {
            (Axis::Instances, Direction::Forward) => {
                if let Value::Iri(iri) = input {
                    return self.all_of(iri);
                }
                let id = self.construct(axis, input)?;
                self.when_kind(id, &[ConstructKind::Topic], || self.instances(id))?
            }
            (Axis::Instances, Direction::Backward) => {
                let id = self.construct(axis, input)?;
                self.when_kind(id, &[ConstructKind::Topic], || self.types(id))?
            }
            (Axis::Types, Direction::Forward) => {
                let id = self.construct(axis, input)?;
                match self.kind(id)? {
                    Some(ConstructKind::Topic) => self.types(id)?,
                    Some(kind) if kind.is_typed() => {
                        self.store.type_of(id)?.into_iter().collect()
                    }
                    _ => Vec::new(),
                }
            }
            (Axis::Types, Direction::Backward) => {
                let id = self.construct(axis, input)?;
                self.when_kind(id, &[ConstructKind::Topic], || {
                    let mut ids = self.instances(id)?;
                    ids.extend(self.store.typed_by(id)?);
                    Ok(ids)
                })?
            }
            (Axis::Supertypes, Direction::Forward) | (Axis::Subtypes, Direction::Backward) => {
                let id = self.construct(axis, input)?;
                self.when_kind(id, &[ConstructKind::Topic], || self.supertypes(id))?
            }
            (Axis::Subtypes, Direction::Forward) | (Axis::Supertypes, Direction::Backward) => {
                let id = self.construct(axis, input)?;
                self.when_kind(id, &[ConstructKind::Topic], || self.subtypes(id))?
            }
            (Axis::Typed, Direction::Forward) => {
                let id = self.construct(axis, input)?;
                self.when_kind(id, &[ConstructKind::Topic], || self.store.typed_by(id))?
            }
            (Axis::Typed, Direction::Backward) => {
                let id = self.construct(axis, input)?;
                match self.kind(id)? {
                    Some(kind) if kind.is_typed() => {
                        self.store.type_of(id)?.into_iter().collect()
                    }
                    _ => Vec::new(),
                }
            }
            (Axis::Characteristics, Direction::Forward) => {
                let id = self.construct(axis, input)?;
                let characteristics = self.when_kind(id, &[ConstructKind::Topic], || {
                    self.store.characteristics_of(id)
                })?;
                let mut selected = Vec::with_capacity(characteristics.len());
                for c in characteristics {
                    if self.characteristic_matches(c, filter)? {
                        selected.push(c);
                    }
                }
                selected
            }
            (Axis::Characteristics, Direction::Backward) => {
                let id = self.construct(axis, input)?;
                match self.kind(id)? {
                    Some(kind) if kind.is_characteristic() => {
                        if self.characteristic_matches(id, filter)? {
                            self.store.parent_of(id)?.into_iter().collect()
                        } else {
                            Vec::new()
                        }
                    }
                    _ => Vec::new(),
                }
            }
            (Axis::Scope, Direction::Forward) => {
                let id = self.construct(axis, input)?;
                match self.kind(id)? {
                    Some(kind) if kind.is_scoped() => self.store.scope_of(id)?,
                    _ => Vec::new(),
                }
            }
            (Axis::Scope, Direction::Backward) => {
                let id = self.construct(axis, input)?;
                self.when_kind(id, &[ConstructKind::Topic], || self.store.scoped_by(id))?
            }
            (Axis::Players, Direction::Forward) => {
                let id = self.construct(axis, input)?;
                self.when_kind(id, &[ConstructKind::Association], || self.players(id, filter))?
            }
            (Axis::Players, Direction::Backward) => {
                let id = self.construct(axis, input)?;
                self.when_kind(id, &[ConstructKind::Topic], || {
                    let mut associations = Vec::new();
                    for role in self.store.roles_played(id)? {
                        if self.type_matches(self.store.type_of(role)?, filter)? {
                            associations.extend(self.store.parent_of(role)?);
                        }
                    }
                    Ok(associations)
                })?
            }
            (Axis::Roles, Direction::Forward) => {
                let id = self.construct(axis, input)?;
                self.when_kind(id, &[ConstructKind::Association], || {
                    let mut role_types = Vec::new();
                    if !self.type_matches(self.store.type_of(id)?, filter)? {
                        return Ok(role_types);
                    }
                    for role in self.store.roles_of(id)? {
                        role_types.extend(self.store.type_of(role)?);
                    }
                    Ok(role_types)
                })?
            }
            (Axis::Roles, Direction::Backward) => {
                let id = self.construct(axis, input)?;
                self.when_kind(id, &[ConstructKind::Topic], || {
                    let mut associations = Vec::new();
                    for role in self.store.typed_by(id)? {
                        if self.kind(role)? != Some(ConstructKind::Role) {
                            continue;
                        }
                        if let Some(association) = self.store.parent_of(role)? {
                            if self.type_matches(self.store.type_of(association)?, filter)? {
                                associations.push(association);
                            }
                        }
                    }
                    Ok(associations)
                })?
            }
            (Axis::Traverse, _) => {
                let id = self.construct(axis, input)?;
                match self.kind(id)? {
                    Some(ConstructKind::Topic) => self.co_players(id, filter)?,
                    Some(ConstructKind::Association) if direction == Direction::Forward => {
                        self.neighbour_associations(id, filter)?
                    }
                    // Backward the type argument restricts the input association
                    Some(ConstructKind::Association) => {
                        if self.type_matches(self.store.type_of(id)?, filter)? {
                            self.neighbour_associations(id, None)?
                        } else {
                            Vec::new()
                        }
                    }
                    _ => Vec::new(),
                }
            }
            (Axis::Locators, Direction::Forward) => {
                let id = self.construct(axis, input)?;
                return Ok(self.iris(self.store.subject_locators(id)?));
            }
            (Axis::Indicators, Direction::Forward) => {
                let id = self.construct(axis, input)?;
                return Ok(self.iris(self.store.subject_identifiers(id)?));
            }
            (Axis::Item, Direction::Forward) => {
                let id = self.construct(axis, input)?;
                return Ok(self.iris(self.store.item_identifiers(id)?));
            }
            (Axis::Locators, Direction::Backward) => {
                let iri = self.locator(axis, input)?;
                self.store.topic_by_subject_locator(&iri)?.into_iter().collect()
            }
            (Axis::Indicators, Direction::Backward) => {
                let iri = self.locator(axis, input)?;
                self.store.topic_by_subject_identifier(&iri)?.into_iter().collect()
            }
            (Axis::Item, Direction::Backward) => {
                let iri = self.locator(axis, input)?;
                self.store.construct_by_item_identifier(&iri)?.into_iter().collect()
            }
            (Axis::Reifier, Direction::Forward) => {
                let id = self.construct(axis, input)?;
                self.store.reifier_of(id)?.into_iter().collect()
            }
            (Axis::Reifier, Direction::Backward) => {
                let id = self.construct(axis, input)?;
                self.store.reified_by(id)?.into_iter().collect()
            }
            (Axis::Atomify, Direction::Forward) => {
                if input.is_atomic() {
                    return Ok(vec![input.clone()]);
                }
                let id = self.construct(axis, input)?;
                return self.atomify(id);
            }
            (Axis::Atomify, Direction::Backward) => {
                let literal = input.atomic_string().ok_or_else(|| {
                    Error::RuntimeEvaluation(format!(
                        "<< atomify expects a literal, found {}",
                        input.type_name()
                    ))
                })?;
                self.store.constructs_by_value(&literal)?
            }
            (Axis::Id, Direction::Forward) => {
                let id = self.construct(axis, input)?;
                return Ok(vec![Value::String(id.to_string())]);
            }
            (Axis::Id, Direction::Backward) => {
                let literal = input.atomic_string().ok_or_else(|| {
                    Error::RuntimeEvaluation(format!(
                        "<< id expects a literal, found {}",
                        input.type_name()
                    ))
                })?;
                match literal.parse::<ConstructId>() {
                    Ok(id) if self.store.contains(id)? => vec![id],
                    _ => Vec::new(),
                }
            }
        };
        Ok(ids.into_iter().map(Value::Construct).collect())
    }

    fn construct(&self, axis: Axis, input: &Value) -> Result<ConstructId> {
        input.as_construct().ok_or_else(|| {
            Error::RuntimeEvaluation(format!(
                "Axis {} expects a construct, found {} {}",
                axis,
                input.type_name(),
                input
            ))
        })
    }

    fn locator(&self, axis: Axis, input: &Value) -> Result<String> {
        match input {
            Value::String(s) | Value::Iri(s) => Ok(s.clone()),
            other => Err(Error::RuntimeEvaluation(format!(
                "<< {} expects an IRI, found {}",
                axis,
                other.type_name()
            ))),
        }
    }

    fn kind(&self, id: ConstructId) -> Result<Option<ConstructKind>> {
        self.store.kind_of(id)
    }

    fn when_kind<F>(&self, id: ConstructId, kinds: &[ConstructKind], f: F) -> Result<Vec<ConstructId>>
    where
        F: FnOnce() -> Result<Vec<ConstructId>>,
    {
        match self.kind(id)? {
            Some(kind) if kinds.contains(&kind) => f(),
            _ => Ok(Vec::new()),
        }
    }

    fn iris(&self, locators: Vec<String>) -> Vec<Value> {
        locators.into_iter().map(Value::Iri).collect()
    }

    /// Every topic, name or occurrence of the map
    fn all_of(&self, iri: &str) -> Result<Vec<Value>> {
        let topics = self.store.topics()?;
        let ids = match iri {
            psi::SUBJECT => topics,
            psi::NAME => {
                let mut names = Vec::new();
                for topic in topics {
                    names.extend(self.store.names_of(topic)?);
                }
                names
            }
            psi::OCCURRENCE => {
                let mut occurrences = Vec::new();
                for topic in topics {
                    occurrences.extend(self.store.occurrences_of(topic)?);
                }
                occurrences
            }
            _ => Vec::new(),
        };
        Ok(ids.into_iter().map(Value::Construct).collect())
    }

    fn instances(&self, topic_type: ConstructId) -> Result<Vec<ConstructId>> {
        if !self.transitive {
            return self.store.instances_of(topic_type);
        }
        let mut seen = HashSet::new();
        let mut instances = Vec::new();
        let mut kinds = vec![topic_type];
        kinds.extend(self.store.transitive_subtypes(topic_type)?);
        for kind in kinds {
            for instance in self.store.instances_of(kind)? {
                if seen.insert(instance) {
                    instances.push(instance);
                }
            }
        }
        Ok(instances)
    }

    fn types(&self, topic: ConstructId) -> Result<Vec<ConstructId>> {
        let direct = self.store.types_of(topic)?;
        if !self.transitive {
            return Ok(direct);
        }
        let mut seen: HashSet<ConstructId> = direct.iter().copied().collect();
        let mut types = direct.clone();
        for t in direct {
            for supertype in self.store.transitive_supertypes(t)? {
                if seen.insert(supertype) {
                    types.push(supertype);
                }
            }
        }
        Ok(types)
    }

    fn supertypes(&self, topic: ConstructId) -> Result<Vec<ConstructId>> {
        if self.transitive {
            self.store.transitive_supertypes(topic)
        } else {
            self.store.supertypes_of(topic)
        }
    }

    fn subtypes(&self, topic: ConstructId) -> Result<Vec<ConstructId>> {
        if self.transitive {
            self.store.transitive_subtypes(topic)
        } else {
            self.store.subtypes_of(topic)
        }
    }

    /// True if a construct type satisfies the type argument
    fn type_matches(
        &self,
        construct_type: Option<ConstructId>,
        filter: Option<&TypeArgument>,
    ) -> Result<bool> {
        let filter = match filter {
            // A type argument naming nothing known selects nothing
            Some(f) if f.is_empty() => return Ok(false),
            Some(f) if !f.topics.is_empty() => f,
            _ => return Ok(true),
        };
        let construct_type = match construct_type {
            Some(t) => t,
            None => return Ok(false),
        };
        for expected in &filter.topics {
            let matched = if self.transitive {
                self.store.is_kind_of(construct_type, *expected)?
            } else {
                construct_type == *expected
            };
            if matched {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn characteristic_matches(
        &self,
        characteristic: ConstructId,
        filter: Option<&TypeArgument>,
    ) -> Result<bool> {
        let filter = match filter {
            Some(f) => f,
            None => return Ok(true),
        };
        if filter.is_empty() {
            return Ok(false);
        }
        if !filter.kinds.is_empty() {
            if let Some(kind) = self.kind(characteristic)? {
                if filter.kinds.contains(&kind) {
                    return Ok(true);
                }
            }
            if filter.topics.is_empty() {
                return Ok(false);
            }
        }
        self.type_matches(self.store.type_of(characteristic)?, Some(filter))
    }

    fn players(
        &self,
        association: ConstructId,
        role_type: Option<&TypeArgument>,
    ) -> Result<Vec<ConstructId>> {
        let mut players = Vec::new();
        for role in self.store.roles_of(association)? {
            if self.type_matches(self.store.type_of(role)?, role_type)? {
                players.extend(self.store.player_of(role)?);
            }
        }
        Ok(players)
    }

    /// Players sharing an association with the topic
    fn co_players(
        &self,
        topic: ConstructId,
        association_type: Option<&TypeArgument>,
    ) -> Result<Vec<ConstructId>> {
        let mut players = Vec::new();
        for role in self.store.roles_played(topic)? {
            let association = match self.store.parent_of(role)? {
                Some(a) => a,
                None => continue,
            };
            if !self.type_matches(self.store.type_of(association)?, association_type)? {
                continue;
            }
            for other in self.store.roles_of(association)? {
                if other != role {
                    players.extend(self.store.player_of(other)?);
                }
            }
        }
        Ok(players)
    }

    /// Associations sharing a player with the association
    fn neighbour_associations(
        &self,
        association: ConstructId,
        association_type: Option<&TypeArgument>,
    ) -> Result<Vec<ConstructId>> {
        let mut associations = Vec::new();
        for role in self.store.roles_of(association)? {
            let player = match self.store.player_of(role)? {
                Some(p) => p,
                None => continue,
            };
            for played in self.store.roles_played(player)? {
                if let Some(other) = self.store.parent_of(played)? {
                    if other != association
                        && self.type_matches(self.store.type_of(other)?, association_type)?
                    {
                        associations.push(other);
                    }
                }
            }
        }
        Ok(associations)
    }

    fn atomify(&self, id: ConstructId) -> Result<Vec<Value>> {
        let value = match self.store.value_of(id)? {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };
        let datatype = self.store.datatype_of(id)?;
        Ok(vec![typed_literal(value, datatype.as_deref())])
    }
}

/// Literal value interpreted through its datatype
pub fn typed_literal(value: String, datatype: Option<&str>) -> Value {
    match datatype {
        Some(psi::XSD_INTEGER) => value
            .trim()
            .parse::<i64>()
            .map(Value::Integer)
            .unwrap_or(Value::String(value)),
        Some(psi::XSD_DECIMAL) => value
            .trim()
            .parse::<f64>()
            .map(Value::Decimal)
            .unwrap_or(Value::String(value)),
        Some(psi::XSD_BOOLEAN) => match value.trim() {
            "true" | "1" => Value::Boolean(true),
            "false" | "0" => Value::Boolean(false),
            _ => Value::String(value),
        },
        Some(psi::XSD_ANY_URI) => Value::Iri(value),
        _ => Value::String(value),
    }
}
