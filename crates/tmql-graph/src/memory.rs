//! In-memory topic map backend

use crate::changes::{ChangeSet, CommitSummary, Fragment, Removal, TopicReference};
use crate::store::TopicMapStore;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tmql_core::{
    psi, ConstructId, ConstructKind, EntityId, Error, IdGenerator, Result, TopicMapId,
};
use tracing::debug;

/// Stored state of one construct
#[derive(Debug, Clone)]
struct ConstructRecord {
    kind: ConstructKind,
    parent: Option<ConstructId>,
    children: Vec<ConstructId>,
    construct_type: Option<ConstructId>,
    scope: Vec<ConstructId>,
    value: Option<String>,
    datatype: Option<String>,
    reifier: Option<ConstructId>,
    player: Option<ConstructId>,
    item_identifiers: Vec<String>,
    subject_identifiers: Vec<String>,
    subject_locators: Vec<String>,
    types: Vec<ConstructId>,
    supertypes: Vec<ConstructId>,
}

impl ConstructRecord {
    fn new(kind: ConstructKind) -> Self {
        Self {
            kind,
            parent: None,
            children: Vec::new(),
            construct_type: None,
            scope: Vec::new(),
            value: None,
            datatype: None,
            reifier: None,
            player: None,
            item_identifiers: Vec::new(),
            subject_identifiers: Vec::new(),
            subject_locators: Vec::new(),
            types: Vec::new(),
            supertypes: Vec::new(),
        }
    }

    /// True if the record refers to `topic` in a way that keeps it alive
    fn depends_on(&self, topic: ConstructId) -> bool {
        self.construct_type == Some(topic)
            || self.player == Some(topic)
            || self.reifier == Some(topic)
            || self.types.contains(&topic)
            || self.supertypes.contains(&topic)
            || self.scope.contains(&topic)
    }

    fn forget(&mut self, topic: ConstructId) {
        self.types.retain(|t| *t != topic);
        self.supertypes.retain(|t| *t != topic);
        self.scope.retain(|t| *t != topic);
        if self.reifier == Some(topic) {
            self.reifier = None;
        }
    }
}

#[derive(Debug, Default)]
struct TopicMapData {
    constructs: BTreeMap<ConstructId, ConstructRecord>,
    by_subject_identifier: HashMap<String, ConstructId>,
    by_subject_locator: HashMap<String, ConstructId>,
    by_item_identifier: HashMap<String, ConstructId>,
}

impl TopicMapData {
    fn get(&self, id: ConstructId) -> Result<&ConstructRecord> {
        self.constructs
            .get(&id)
            .ok_or_else(|| Error::ConstructNotFound(id.to_string()))
    }

    fn get_mut(&mut self, id: ConstructId) -> Result<&mut ConstructRecord> {
        self.constructs
            .get_mut(&id)
            .ok_or_else(|| Error::ConstructNotFound(id.to_string()))
    }

    fn expect_kind(&self, id: ConstructId, kind: ConstructKind) -> Result<&ConstructRecord> {
        let record = self.get(id)?;
        if record.kind != kind {
            return Err(Error::InvalidGraphOperation(format!(
                "Construct {} is a {}, expected a {}",
                id, record.kind, kind
            )));
        }
        Ok(record)
    }

    fn ids_where<F>(&self, predicate: F) -> Vec<ConstructId>
    where
        F: Fn(&ConstructRecord) -> bool,
    {
        self.constructs
            .iter()
            .filter(|(_, record)| predicate(record))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Topic a reference points at, if any
    fn lookup(&self, reference: &TopicReference) -> Result<Option<ConstructId>> {
        match reference {
            TopicReference::SubjectIdentifier(iri) => match self.by_subject_identifier.get(iri) {
                Some(id) => Ok(Some(*id)),
                None => Ok(self.topic_by_item_identifier(iri).ok().flatten()),
            },
            TopicReference::SubjectLocator(iri) => Ok(self.by_subject_locator.get(iri).copied()),
            TopicReference::ItemIdentifier(iri) => match self.topic_by_item_identifier(iri)? {
                Some(id) => Ok(Some(id)),
                None => Ok(self.by_subject_identifier.get(iri).copied()),
            },
        }
    }

    fn topic_by_item_identifier(&self, iri: &str) -> Result<Option<ConstructId>> {
        let id = match self.by_item_identifier.get(iri) {
            Some(id) => *id,
            None => return Ok(None),
        };
        if self.get(id)?.kind != ConstructKind::Topic {
            return Err(Error::InvalidGraphOperation(format!(
                "Item identifier {} identifies construct {}, which is not a topic",
                iri, id
            )));
        }
        Ok(Some(id))
    }

    /// Every construct the removals take away, dependents included
    fn doomed(&self, removals: &[Removal], topic_map: ConstructId) -> Result<BTreeSet<ConstructId>> {
        let mut doomed = BTreeSet::new();
        let mut cascaded = BTreeSet::new();
        let mut pending: Vec<(ConstructId, bool)> = removals
            .iter()
            .flat_map(|r| r.constructs.iter().map(move |id| (*id, r.cascade)))
            .collect();
        while let Some((id, cascade)) = pending.pop() {
            if id == topic_map {
                return Err(Error::InvalidGraphOperation(
                    "The topic map itself cannot be removed".to_string(),
                ));
            }
            let record = self.get(id)?;
            if doomed.insert(id) {
                pending.extend(record.children.iter().map(|c| (*c, cascade)));
            }
            if record.kind == ConstructKind::Topic && cascade && cascaded.insert(id) {
                for (other_id, other) in &self.constructs {
                    if other.construct_type == Some(id) {
                        pending.push((*other_id, true));
                    }
                    if other.player == Some(id) {
                        if let Some(association) = other.parent {
                            pending.push((association, true));
                        }
                    }
                }
            }
        }

        for id in &doomed {
            if cascaded.contains(id) || self.get(*id)?.kind != ConstructKind::Topic {
                continue;
            }
            let in_use = self
                .constructs
                .iter()
                .any(|(other_id, other)| !doomed.contains(other_id) && other.depends_on(*id));
            if in_use {
                return Err(Error::InvalidGraphOperation(format!(
                    "Cannot remove topic {}: it is still in use. Use cascading removal instead.",
                    id
                )));
            }
        }
        Ok(doomed)
    }

    fn drop_all(&mut self, doomed: &BTreeSet<ConstructId>) {
        for id in doomed {
            if let Some(record) = self.constructs.remove(id) {
                for iri in &record.subject_identifiers {
                    self.by_subject_identifier.remove(iri);
                }
                for iri in &record.subject_locators {
                    self.by_subject_locator.remove(iri);
                }
                for iri in &record.item_identifiers {
                    self.by_item_identifier.remove(iri);
                }
                if let Some(parent) = record.parent {
                    if let Some(parent_record) = self.constructs.get_mut(&parent) {
                        parent_record.children.retain(|c| c != id);
                    }
                }
            }
        }
        for record in self.constructs.values_mut() {
            for id in doomed {
                record.forget(*id);
            }
        }
    }

    fn children_of_kind(&self, id: ConstructId, kind: ConstructKind) -> Vec<ConstructId> {
        match self.constructs.get(&id) {
            Some(record) => record
                .children
                .iter()
                .copied()
                .filter(|c| self.constructs.get(c).map(|r| r.kind) == Some(kind))
                .collect(),
            None => Vec::new(),
        }
    }
}

/// A topic map held entirely in memory
///
/// Construct ids are handed out sequentially, so iteration in id order is
/// creation order.
pub struct MemoryTopicMap {
    /// Topic map identifier
    id: TopicMapId,

    /// Base locator used to resolve relative references
    base_locator: String,

    /// The topic map construct
    topic_map: ConstructId,

    /// ID generator for constructs of this map
    id_gen: IdGenerator,

    data: RwLock<TopicMapData>,
}

impl MemoryTopicMap {
    /// Create an empty topic map
    pub fn new(base_locator: impl Into<String>) -> Self {
        let base_locator = base_locator.into();
        let id_gen = IdGenerator::new();
        let topic_map = id_gen.next_id();
        let mut data = TopicMapData::default();
        data.constructs
            .insert(topic_map, ConstructRecord::new(ConstructKind::TopicMap));
        debug!("Created topic map {}", base_locator);
        Self {
            id: TopicMapId::from_locator(&base_locator),
            base_locator,
            topic_map,
            id_gen,
            data: RwLock::new(data),
        }
    }

    /// Get the topic map ID
    pub fn id(&self) -> TopicMapId {
        self.id
    }

    /// Number of constructs, the topic map itself included
    pub fn construct_count(&self) -> Result<usize> {
        Ok(self.read()?.constructs.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, TopicMapData>> {
        self.data
            .read()
            .map_err(|e| Error::Internal(format!("Failed to acquire read lock: {}", e)))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, TopicMapData>> {
        self.data
            .write()
            .map_err(|e| Error::Internal(format!("Failed to acquire write lock: {}", e)))
    }

    fn insert_child(
        &self,
        data: &mut TopicMapData,
        parent: ConstructId,
        mut record: ConstructRecord,
    ) -> Result<ConstructId> {
        let id = self.id_gen.next_id();
        record.parent = Some(parent);
        data.get_mut(parent)?.children.push(id);
        data.constructs.insert(id, record);
        Ok(id)
    }

    /// Topic for a reference, created with that identity if missing
    fn resolve(
        &self,
        data: &mut TopicMapData,
        reference: &TopicReference,
        created: &mut usize,
    ) -> Result<ConstructId> {
        if let Some(id) = data.lookup(reference)? {
            return Ok(id);
        }
        let id = self.id_gen.next_id();
        let mut record = ConstructRecord::new(ConstructKind::Topic);
        let iri = reference.iri().to_string();
        match reference {
            TopicReference::SubjectIdentifier(_) => {
                data.by_subject_identifier.insert(iri.clone(), id);
                record.subject_identifiers.push(iri);
            }
            TopicReference::SubjectLocator(_) => {
                data.by_subject_locator.insert(iri.clone(), id);
                record.subject_locators.push(iri);
            }
            TopicReference::ItemIdentifier(_) => {
                data.by_item_identifier.insert(iri.clone(), id);
                record.item_identifiers.push(iri);
            }
        }
        data.constructs.insert(id, record);
        *created += 1;
        Ok(id)
    }

    /// Add one fragment, returning the number of created constructs
    fn insert_fragment(&self, data: &mut TopicMapData, fragment: &Fragment) -> Result<usize> {
        let mut created = 0;
        match fragment {
            Fragment::Topic {
                identity,
                types,
                names,
                occurrences,
            } => {
                let topic = self.resolve(data, identity, &mut created)?;
                for reference in types {
                    let topic_type = self.resolve(data, reference, &mut created)?;
                    let record = data.get_mut(topic)?;
                    if !record.types.contains(&topic_type) {
                        record.types.push(topic_type);
                    }
                }
                if !names.is_empty() {
                    let name_type = self.resolve(
                        data,
                        &TopicReference::SubjectIdentifier(psi::TOPIC_NAME.to_string()),
                        &mut created,
                    )?;
                    for value in names {
                        let mut record = ConstructRecord::new(ConstructKind::Name);
                        record.construct_type = Some(name_type);
                        record.value = Some(value.clone());
                        record.datatype = Some(psi::XSD_STRING.to_string());
                        self.insert_child(data, topic, record)?;
                        created += 1;
                    }
                }
                for (reference, value) in occurrences {
                    let occurrence_type = self.resolve(data, reference, &mut created)?;
                    let mut record = ConstructRecord::new(ConstructKind::Occurrence);
                    record.construct_type = Some(occurrence_type);
                    record.value = Some(value.clone());
                    record.datatype = Some(psi::XSD_STRING.to_string());
                    self.insert_child(data, topic, record)?;
                    created += 1;
                }
            }
            Fragment::Association {
                association_type,
                roles,
            } => {
                let association_type = self.resolve(data, association_type, &mut created)?;
                let association = self.id_gen.next_id();
                let mut record = ConstructRecord::new(ConstructKind::Association);
                record.construct_type = Some(association_type);
                data.constructs.insert(association, record);
                created += 1;
                for (role_type, player) in roles {
                    let role_type = self.resolve(data, role_type, &mut created)?;
                    let player = self.resolve(data, player, &mut created)?;
                    let mut record = ConstructRecord::new(ConstructKind::Role);
                    record.construct_type = Some(role_type);
                    record.player = Some(player);
                    self.insert_child(data, association, record)?;
                    created += 1;
                }
            }
        }
        Ok(created)
    }

    // ========== Topic Operations ==========

    /// Create a topic without any identity
    pub fn create_topic(&self) -> Result<ConstructId> {
        let mut data = self.write()?;
        let id = self.id_gen.next_id();
        data.constructs
            .insert(id, ConstructRecord::new(ConstructKind::Topic));
        debug!("Created topic {} in {}", id, self.base_locator);
        Ok(id)
    }

    /// Get or create the topic with the given subject identifier
    pub fn create_topic_by_subject_identifier(&self, iri: &str) -> Result<ConstructId> {
        if let Some(existing) = self.read()?.by_subject_identifier.get(iri) {
            return Ok(*existing);
        }
        let topic = self.create_topic()?;
        self.add_subject_identifier(topic, iri)?;
        Ok(topic)
    }

    /// Get or create the topic with the given subject locator
    pub fn create_topic_by_subject_locator(&self, iri: &str) -> Result<ConstructId> {
        if let Some(existing) = self.read()?.by_subject_locator.get(iri) {
            return Ok(*existing);
        }
        let topic = self.create_topic()?;
        self.add_subject_locator(topic, iri)?;
        Ok(topic)
    }

    pub fn add_subject_identifier(&self, topic: ConstructId, iri: &str) -> Result<()> {
        let mut data = self.write()?;
        data.expect_kind(topic, ConstructKind::Topic)?;
        if let Some(owner) = data.by_subject_identifier.get(iri) {
            if *owner != topic {
                return Err(Error::InvalidGraphOperation(format!(
                    "Subject identifier {} already identifies topic {}",
                    iri, owner
                )));
            }
            return Ok(());
        }
        data.by_subject_identifier.insert(iri.to_string(), topic);
        data.get_mut(topic)?.subject_identifiers.push(iri.to_string());
        Ok(())
    }

    pub fn add_subject_locator(&self, topic: ConstructId, iri: &str) -> Result<()> {
        let mut data = self.write()?;
        data.expect_kind(topic, ConstructKind::Topic)?;
        if let Some(owner) = data.by_subject_locator.get(iri) {
            if *owner != topic {
                return Err(Error::InvalidGraphOperation(format!(
                    "Subject locator {} already identifies topic {}",
                    iri, owner
                )));
            }
            return Ok(());
        }
        data.by_subject_locator.insert(iri.to_string(), topic);
        data.get_mut(topic)?.subject_locators.push(iri.to_string());
        Ok(())
    }

    pub fn add_item_identifier(&self, construct: ConstructId, iri: &str) -> Result<()> {
        let mut data = self.write()?;
        data.get(construct)?;
        if let Some(owner) = data.by_item_identifier.get(iri) {
            if *owner != construct {
                return Err(Error::InvalidGraphOperation(format!(
                    "Item identifier {} already identifies construct {}",
                    iri, owner
                )));
            }
            return Ok(());
        }
        data.by_item_identifier.insert(iri.to_string(), construct);
        data.get_mut(construct)?.item_identifiers.push(iri.to_string());
        Ok(())
    }

    /// Make `topic` an instance of `topic_type`
    pub fn add_type(&self, topic: ConstructId, topic_type: ConstructId) -> Result<()> {
        let mut data = self.write()?;
        data.expect_kind(topic_type, ConstructKind::Topic)?;
        data.expect_kind(topic, ConstructKind::Topic)?;
        let record = data.get_mut(topic)?;
        if !record.types.contains(&topic_type) {
            record.types.push(topic_type);
        }
        Ok(())
    }

    /// Make `topic` a direct subtype of `supertype`
    pub fn add_supertype(&self, topic: ConstructId, supertype: ConstructId) -> Result<()> {
        let mut data = self.write()?;
        data.expect_kind(supertype, ConstructKind::Topic)?;
        data.expect_kind(topic, ConstructKind::Topic)?;
        let record = data.get_mut(topic)?;
        if !record.supertypes.contains(&supertype) {
            record.supertypes.push(supertype);
        }
        Ok(())
    }

    // ========== Characteristic Operations ==========

    /// Create a name; without an explicit type the default name type is used
    pub fn create_name(
        &self,
        topic: ConstructId,
        name_type: Option<ConstructId>,
        value: &str,
    ) -> Result<ConstructId> {
        let name_type = match name_type {
            Some(t) => t,
            None => self.create_topic_by_subject_identifier(psi::TOPIC_NAME)?,
        };
        let mut data = self.write()?;
        data.expect_kind(topic, ConstructKind::Topic)?;
        data.expect_kind(name_type, ConstructKind::Topic)?;
        let mut record = ConstructRecord::new(ConstructKind::Name);
        record.construct_type = Some(name_type);
        record.value = Some(value.to_string());
        record.datatype = Some(psi::XSD_STRING.to_string());
        let id = self.insert_child(&mut data, topic, record)?;
        debug!("Created name {} on topic {}", id, topic);
        Ok(id)
    }

    pub fn create_occurrence(
        &self,
        topic: ConstructId,
        occurrence_type: ConstructId,
        value: &str,
        datatype: &str,
    ) -> Result<ConstructId> {
        let mut data = self.write()?;
        data.expect_kind(topic, ConstructKind::Topic)?;
        data.expect_kind(occurrence_type, ConstructKind::Topic)?;
        let mut record = ConstructRecord::new(ConstructKind::Occurrence);
        record.construct_type = Some(occurrence_type);
        record.value = Some(value.to_string());
        record.datatype = Some(datatype.to_string());
        let id = self.insert_child(&mut data, topic, record)?;
        debug!("Created occurrence {} on topic {}", id, topic);
        Ok(id)
    }

    /// Create a variant of a name; variants need at least one theme
    pub fn create_variant(
        &self,
        name: ConstructId,
        value: &str,
        datatype: &str,
        scope: &[ConstructId],
    ) -> Result<ConstructId> {
        if scope.is_empty() {
            return Err(Error::InvalidGraphOperation(
                "A variant requires a non-empty scope".to_string(),
            ));
        }
        let mut data = self.write()?;
        data.expect_kind(name, ConstructKind::Name)?;
        for theme in scope {
            data.expect_kind(*theme, ConstructKind::Topic)?;
        }
        let mut record = ConstructRecord::new(ConstructKind::Variant);
        record.value = Some(value.to_string());
        record.datatype = Some(datatype.to_string());
        record.scope = scope.to_vec();
        self.insert_child(&mut data, name, record)
    }

    // ========== Association Operations ==========

    pub fn create_association(&self, association_type: ConstructId) -> Result<ConstructId> {
        let mut data = self.write()?;
        data.expect_kind(association_type, ConstructKind::Topic)?;
        let mut record = ConstructRecord::new(ConstructKind::Association);
        record.construct_type = Some(association_type);
        let id = self.id_gen.next_id();
        data.constructs.insert(id, record);
        debug!("Created association {} of type {}", id, association_type);
        Ok(id)
    }

    pub fn create_role(
        &self,
        association: ConstructId,
        role_type: ConstructId,
        player: ConstructId,
    ) -> Result<ConstructId> {
        let mut data = self.write()?;
        data.expect_kind(association, ConstructKind::Association)?;
        data.expect_kind(role_type, ConstructKind::Topic)?;
        data.expect_kind(player, ConstructKind::Topic)?;
        let mut record = ConstructRecord::new(ConstructKind::Role);
        record.construct_type = Some(role_type);
        record.player = Some(player);
        self.insert_child(&mut data, association, record)
    }

    // ========== Scope and Reification ==========

    pub fn add_theme(&self, construct: ConstructId, theme: ConstructId) -> Result<()> {
        let mut data = self.write()?;
        data.expect_kind(theme, ConstructKind::Topic)?;
        let record = data.get_mut(construct)?;
        if !record.kind.is_scoped() {
            return Err(Error::InvalidGraphOperation(format!(
                "A {} cannot be scoped",
                record.kind
            )));
        }
        if !record.scope.contains(&theme) {
            record.scope.push(theme);
        }
        Ok(())
    }

    /// Set (or with `None` clear) the reifier of a construct
    pub fn set_reifier(&self, construct: ConstructId, reifier: Option<ConstructId>) -> Result<()> {
        let mut data = self.write()?;
        if let Some(topic) = reifier {
            data.expect_kind(topic, ConstructKind::Topic)?;
            let taken = data
                .constructs
                .iter()
                .any(|(id, r)| *id != construct && r.reifier == Some(topic));
            if taken {
                return Err(Error::InvalidGraphOperation(format!(
                    "Topic {} already reifies another construct",
                    topic
                )));
            }
        }
        let record = data.get_mut(construct)?;
        if !record.kind.is_reifiable() {
            return Err(Error::InvalidGraphOperation(format!(
                "A {} cannot be reified",
                record.kind
            )));
        }
        record.reifier = reifier;
        Ok(())
    }
}

impl TopicMapStore for MemoryTopicMap {
    fn base_locator(&self) -> &str {
        &self.base_locator
    }

    fn topic_map(&self) -> ConstructId {
        self.topic_map
    }

    fn kind_of(&self, id: ConstructId) -> Result<Option<ConstructKind>> {
        Ok(self.read()?.constructs.get(&id).map(|r| r.kind))
    }

    fn topics(&self) -> Result<Vec<ConstructId>> {
        Ok(self.read()?.ids_where(|r| r.kind == ConstructKind::Topic))
    }

    fn associations(&self) -> Result<Vec<ConstructId>> {
        Ok(self.read()?.ids_where(|r| r.kind == ConstructKind::Association))
    }

    fn subject_identifiers(&self, topic: ConstructId) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .constructs
            .get(&topic)
            .map(|r| r.subject_identifiers.clone())
            .unwrap_or_default())
    }

    fn subject_locators(&self, topic: ConstructId) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .constructs
            .get(&topic)
            .map(|r| r.subject_locators.clone())
            .unwrap_or_default())
    }

    fn item_identifiers(&self, construct: ConstructId) -> Result<Vec<String>> {
        Ok(self
            .read()?
            .constructs
            .get(&construct)
            .map(|r| r.item_identifiers.clone())
            .unwrap_or_default())
    }

    fn topic_by_subject_identifier(&self, iri: &str) -> Result<Option<ConstructId>> {
        Ok(self.read()?.by_subject_identifier.get(iri).copied())
    }

    fn topic_by_subject_locator(&self, iri: &str) -> Result<Option<ConstructId>> {
        Ok(self.read()?.by_subject_locator.get(iri).copied())
    }

    fn construct_by_item_identifier(&self, iri: &str) -> Result<Option<ConstructId>> {
        Ok(self.read()?.by_item_identifier.get(iri).copied())
    }

    fn types_of(&self, topic: ConstructId) -> Result<Vec<ConstructId>> {
        Ok(self
            .read()?
            .constructs
            .get(&topic)
            .map(|r| r.types.clone())
            .unwrap_or_default())
    }

    fn instances_of(&self, topic_type: ConstructId) -> Result<Vec<ConstructId>> {
        Ok(self.read()?.ids_where(|r| {
            r.kind == ConstructKind::Topic && r.types.contains(&topic_type)
        }))
    }

    fn supertypes_of(&self, topic: ConstructId) -> Result<Vec<ConstructId>> {
        Ok(self
            .read()?
            .constructs
            .get(&topic)
            .map(|r| r.supertypes.clone())
            .unwrap_or_default())
    }

    fn subtypes_of(&self, topic: ConstructId) -> Result<Vec<ConstructId>> {
        Ok(self.read()?.ids_where(|r| r.supertypes.contains(&topic)))
    }

    fn type_of(&self, construct: ConstructId) -> Result<Option<ConstructId>> {
        Ok(self
            .read()?
            .constructs
            .get(&construct)
            .and_then(|r| r.construct_type))
    }

    fn typed_by(&self, construct_type: ConstructId) -> Result<Vec<ConstructId>> {
        Ok(self
            .read()?
            .ids_where(|r| r.construct_type == Some(construct_type)))
    }

    fn names_of(&self, topic: ConstructId) -> Result<Vec<ConstructId>> {
        Ok(self.read()?.children_of_kind(topic, ConstructKind::Name))
    }

    fn occurrences_of(&self, topic: ConstructId) -> Result<Vec<ConstructId>> {
        Ok(self.read()?.children_of_kind(topic, ConstructKind::Occurrence))
    }

    fn variants_of(&self, name: ConstructId) -> Result<Vec<ConstructId>> {
        Ok(self.read()?.children_of_kind(name, ConstructKind::Variant))
    }

    fn parent_of(&self, construct: ConstructId) -> Result<Option<ConstructId>> {
        Ok(self
            .read()?
            .constructs
            .get(&construct)
            .and_then(|r| r.parent))
    }

    fn roles_of(&self, association: ConstructId) -> Result<Vec<ConstructId>> {
        Ok(self.read()?.children_of_kind(association, ConstructKind::Role))
    }

    fn player_of(&self, role: ConstructId) -> Result<Option<ConstructId>> {
        Ok(self.read()?.constructs.get(&role).and_then(|r| r.player))
    }

    fn roles_played(&self, topic: ConstructId) -> Result<Vec<ConstructId>> {
        Ok(self.read()?.ids_where(|r| r.player == Some(topic)))
    }

    fn scope_of(&self, construct: ConstructId) -> Result<Vec<ConstructId>> {
        Ok(self
            .read()?
            .constructs
            .get(&construct)
            .map(|r| r.scope.clone())
            .unwrap_or_default())
    }

    fn scoped_by(&self, theme: ConstructId) -> Result<Vec<ConstructId>> {
        Ok(self.read()?.ids_where(|r| r.scope.contains(&theme)))
    }

    fn reifier_of(&self, construct: ConstructId) -> Result<Option<ConstructId>> {
        Ok(self
            .read()?
            .constructs
            .get(&construct)
            .and_then(|r| r.reifier))
    }

    fn reified_by(&self, topic: ConstructId) -> Result<Option<ConstructId>> {
        Ok(self
            .read()?
            .ids_where(|r| r.reifier == Some(topic))
            .into_iter()
            .next())
    }

    fn value_of(&self, construct: ConstructId) -> Result<Option<String>> {
        Ok(self
            .read()?
            .constructs
            .get(&construct)
            .and_then(|r| r.value.clone()))
    }

    fn datatype_of(&self, construct: ConstructId) -> Result<Option<String>> {
        Ok(self
            .read()?
            .constructs
            .get(&construct)
            .and_then(|r| r.datatype.clone()))
    }

    fn constructs_by_value(&self, value: &str) -> Result<Vec<ConstructId>> {
        Ok(self
            .read()?
            .ids_where(|r| r.value.as_deref() == Some(value)))
    }

    fn commit(&self, changes: &ChangeSet) -> Result<CommitSummary> {
        let mut data = self.write()?;

        // Check everything before touching the map
        let doomed = data.doomed(&changes.removals, self.topic_map)?;
        for fragment in &changes.insertions {
            for reference in fragment.references() {
                if let Some(id) = data.lookup(reference)? {
                    if doomed.contains(&id) {
                        return Err(Error::InvalidGraphOperation(format!(
                            "Inserted content refers to topic {} removed by the same query",
                            id
                        )));
                    }
                }
            }
        }

        data.drop_all(&doomed);
        let mut inserted = 0;
        for fragment in &changes.insertions {
            inserted += self.insert_fragment(&mut data, fragment)?;
        }

        debug!(
            "Committed to {}: {} construct(s) removed in {} batch entries, {} created from {} fragment(s)",
            self.base_locator,
            doomed.len(),
            changes.removals.len(),
            inserted,
            changes.insertions.len()
        );
        Ok(CommitSummary {
            removed: doomed.len(),
            inserted,
        })
    }
}

impl std::fmt::Debug for MemoryTopicMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTopicMap")
            .field("id", &self.id.as_internal())
            .field("base_locator", &self.base_locator)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_map() -> MemoryTopicMap {
        MemoryTopicMap::new("http://example.org/map/")
    }

    #[test]
    fn test_create_topic_by_subject_identifier_is_idempotent() {
        let map = create_test_map();
        let a = map
            .create_topic_by_subject_identifier("http://example.org/a")
            .unwrap();
        let b = map
            .create_topic_by_subject_identifier("http://example.org/a")
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(
            map.topic_by_subject_identifier("http://example.org/a").unwrap(),
            Some(a)
        );
        assert_eq!(map.topics().unwrap(), vec![a]);
    }

    #[test]
    fn test_typing_and_transitive_supertypes() {
        let map = create_test_map();
        let animal = map.create_topic().unwrap();
        let dog = map.create_topic().unwrap();
        let puppy = map.create_topic().unwrap();
        let rex = map.create_topic().unwrap();
        map.add_supertype(dog, animal).unwrap();
        map.add_supertype(puppy, dog).unwrap();
        map.add_type(rex, puppy).unwrap();

        assert_eq!(map.types_of(rex).unwrap(), vec![puppy]);
        assert_eq!(map.instances_of(puppy).unwrap(), vec![rex]);
        assert_eq!(map.transitive_supertypes(puppy).unwrap(), vec![dog, animal]);
        assert_eq!(map.transitive_subtypes(animal).unwrap(), vec![dog, puppy]);
        assert!(map.is_instance_of(rex, animal).unwrap());
        assert!(!map.is_instance_of(dog, animal).unwrap());
        assert!(map.is_kind_of(puppy, animal).unwrap());
    }

    #[test]
    fn test_characteristics_and_values() {
        let map = create_test_map();
        let topic = map.create_topic().unwrap();
        let occ_type = map.create_topic().unwrap();
        let name = map.create_name(topic, None, "Rex").unwrap();
        let occ = map
            .create_occurrence(topic, occ_type, "42", psi::XSD_INTEGER)
            .unwrap();

        assert_eq!(map.characteristics_of(topic).unwrap(), vec![name, occ]);
        assert_eq!(map.parent_of(occ).unwrap(), Some(topic));
        assert_eq!(map.value_of(name).unwrap().as_deref(), Some("Rex"));
        assert_eq!(
            map.datatype_of(occ).unwrap().as_deref(),
            Some(psi::XSD_INTEGER)
        );
        assert_eq!(map.constructs_by_value("42").unwrap(), vec![occ]);

        let default_type = map.type_of(name).unwrap().unwrap();
        assert_eq!(
            map.subject_identifiers(default_type).unwrap(),
            vec![psi::TOPIC_NAME.to_string()]
        );
    }

    #[test]
    fn test_associations_and_roles() {
        let map = create_test_map();
        let member_of = map.create_topic().unwrap();
        let member = map.create_topic().unwrap();
        let group = map.create_topic().unwrap();
        let alice = map.create_topic().unwrap();
        let club = map.create_topic().unwrap();

        let assoc = map.create_association(member_of).unwrap();
        let r1 = map.create_role(assoc, member, alice).unwrap();
        let r2 = map.create_role(assoc, group, club).unwrap();

        assert_eq!(map.roles_of(assoc).unwrap(), vec![r1, r2]);
        assert_eq!(map.player_of(r2).unwrap(), Some(club));
        assert_eq!(map.roles_played(alice).unwrap(), vec![r1]);
        assert_eq!(map.typed_by(member).unwrap(), vec![r1]);
        assert_eq!(map.associations().unwrap(), vec![assoc]);
    }

    #[test]
    fn test_scope_and_reification() {
        let map = create_test_map();
        let topic = map.create_topic().unwrap();
        let theme = map.create_topic().unwrap();
        let reifier = map.create_topic().unwrap();
        let name = map.create_name(topic, None, "n").unwrap();

        map.add_theme(name, theme).unwrap();
        map.set_reifier(name, Some(reifier)).unwrap();

        assert_eq!(map.scope_of(name).unwrap(), vec![theme]);
        assert_eq!(map.scoped_by(theme).unwrap(), vec![name]);
        assert_eq!(map.reifier_of(name).unwrap(), Some(reifier));
        assert_eq!(map.reified_by(reifier).unwrap(), Some(name));
        assert!(map.add_theme(topic, theme).is_err());
        assert!(map.set_reifier(topic, Some(reifier)).is_err());
    }

    #[test]
    fn test_variant_requires_scope() {
        let map = create_test_map();
        let topic = map.create_topic().unwrap();
        let theme = map.create_topic().unwrap();
        let name = map.create_name(topic, None, "n").unwrap();
        assert!(map.create_variant(name, "v", psi::XSD_STRING, &[]).is_err());
        let variant = map
            .create_variant(name, "v", psi::XSD_STRING, &[theme])
            .unwrap();
        assert_eq!(map.variants_of(name).unwrap(), vec![variant]);
    }

    #[test]
    fn test_remove_topic_in_use_requires_cascade() {
        let map = create_test_map();
        let person = map.create_topic().unwrap();
        let alice = map.create_topic().unwrap();
        map.add_type(alice, person).unwrap();
        map.create_name(alice, None, "Alice").unwrap();

        let err = map.remove_constructs(&[person], false).unwrap_err();
        assert!(matches!(err, Error::InvalidGraphOperation(_)));

        // alice plus her name
        assert_eq!(map.remove_constructs(&[alice], false).unwrap(), 2);
        assert_eq!(map.remove_constructs(&[person], false).unwrap(), 1);
    }

    #[test]
    fn test_cascading_removal() {
        let map = create_test_map();
        let member_of = map.create_topic().unwrap();
        let member = map.create_topic().unwrap();
        let alice = map
            .create_topic_by_subject_identifier("http://example.org/alice")
            .unwrap();
        let assoc = map.create_association(member_of).unwrap();
        map.create_role(assoc, member, alice).unwrap();

        // alice, the association and its role
        assert_eq!(map.remove_constructs(&[alice], true).unwrap(), 3);
        assert!(map.associations().unwrap().is_empty());
        assert_eq!(
            map.topic_by_subject_identifier("http://example.org/alice")
                .unwrap(),
            None
        );
        assert!(!map.contains(alice).unwrap());
        assert!(map.remove_constructs(&[map.topic_map()], true).is_err());
    }

    #[test]
    fn test_failing_batch_entry_removes_nothing() {
        let map = create_test_map();
        let person = map.create_topic().unwrap();
        let alice = map.create_topic().unwrap();
        let bob = map.create_topic().unwrap();
        map.add_type(bob, person).unwrap();
        map.create_name(alice, None, "Alice").unwrap();

        let err = map
            .remove_all(&[
                Removal::new(vec![alice], false),
                Removal::new(vec![person], false),
            ])
            .unwrap_err();
        assert!(matches!(err, Error::InvalidGraphOperation(_)));
        assert!(map.contains(alice).unwrap());
        assert_eq!(map.names_of(alice).unwrap().len(), 1);
        assert_eq!(map.topics().unwrap().len(), 3);
    }

    #[test]
    fn test_batch_mixes_cascading_and_plain_entries() {
        let map = create_test_map();
        let person = map.create_topic().unwrap();
        let alice = map.create_topic().unwrap();
        let bob = map.create_topic().unwrap();
        map.add_type(bob, person).unwrap();

        // plain entry for the in-use topic, cascading entry for the same topic
        let removed = map
            .remove_all(&[
                Removal::new(vec![person, alice], false),
                Removal::new(vec![person], true),
            ])
            .unwrap();
        assert_eq!(removed, 2);
        assert!(!map.contains(person).unwrap());
        assert!(!map.contains(alice).unwrap());
        assert!(map.types_of(bob).unwrap().is_empty());
    }

    fn si(iri: &str) -> TopicReference {
        TopicReference::SubjectIdentifier(format!("http://example.org/{}", iri))
    }

    #[test]
    fn test_commit_inserts_fragments() {
        let map = create_test_map();
        let alice = map
            .create_topic_by_subject_identifier("http://example.org/alice")
            .unwrap();
        let changes = ChangeSet {
            removals: Vec::new(),
            insertions: vec![
                Fragment::Topic {
                    identity: si("bob"),
                    types: vec![si("person")],
                    names: vec!["Bob".to_string()],
                    occurrences: vec![(si("age"), "42".to_string())],
                },
                Fragment::Association {
                    association_type: si("knows"),
                    roles: vec![(si("person"), si("alice")), (si("person"), si("bob"))],
                },
            ],
        };

        let summary = map.commit(&changes).unwrap();
        // bob, person, name type, name, age, occurrence, knows, association, two roles
        assert_eq!(summary, CommitSummary { removed: 0, inserted: 10 });
        let bob = map
            .topic_by_subject_identifier("http://example.org/bob")
            .unwrap()
            .unwrap();
        assert_eq!(map.characteristics_of(bob).unwrap().len(), 2);
        assert_eq!(map.roles_played(alice).unwrap().len(), 1);
        assert_eq!(map.associations().unwrap().len(), 1);

        // existing topics are reused
        let again = ChangeSet {
            removals: Vec::new(),
            insertions: vec![Fragment::Topic {
                identity: si("bob"),
                types: Vec::new(),
                names: Vec::new(),
                occurrences: Vec::new(),
            }],
        };
        assert_eq!(map.commit(&again).unwrap().inserted, 0);
    }

    #[test]
    fn test_insert_referring_to_removed_topic_changes_nothing() {
        let map = create_test_map();
        let alice = map
            .create_topic_by_subject_identifier("http://example.org/alice")
            .unwrap();
        let other = map.create_topic().unwrap();
        let changes = ChangeSet {
            removals: vec![Removal::new(vec![other, alice], false)],
            insertions: vec![Fragment::Association {
                association_type: si("knows"),
                roles: vec![(si("person"), si("alice"))],
            }],
        };

        assert!(matches!(map.commit(&changes), Err(Error::InvalidGraphOperation(_))));
        assert!(map.contains(alice).unwrap());
        assert!(map.contains(other).unwrap());
        assert!(map.associations().unwrap().is_empty());
    }

    #[test]
    fn test_item_identifier_of_non_topic_is_rejected() {
        let map = create_test_map();
        let topic = map.create_topic().unwrap();
        let name = map.create_name(topic, None, "n").unwrap();
        map.add_item_identifier(name, "http://example.org/ii").unwrap();
        let before = map.construct_count().unwrap();

        let changes = ChangeSet {
            removals: Vec::new(),
            insertions: vec![Fragment::Association {
                association_type: si("knows"),
                roles: vec![(
                    si("person"),
                    TopicReference::ItemIdentifier("http://example.org/ii".to_string()),
                )],
            }],
        };
        assert!(map.commit(&changes).is_err());
        assert_eq!(map.construct_count().unwrap(), before);
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let map = create_test_map();
        let a = map.create_topic().unwrap();
        let b = map.create_topic().unwrap();
        map.add_item_identifier(a, "http://example.org/ii").unwrap();
        assert!(map.add_item_identifier(b, "http://example.org/ii").is_err());
        assert_eq!(
            map.construct_by_item_identifier("http://example.org/ii")
                .unwrap(),
            Some(a)
        );
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn supertype_chain_closure(len in 1usize..12) {
                let map = create_test_map();
                let chain: Vec<ConstructId> =
                    (0..len).map(|_| map.create_topic().unwrap()).collect();
                for pair in chain.windows(2) {
                    map.add_supertype(pair[0], pair[1]).unwrap();
                }
                let supers = map.transitive_supertypes(chain[0]).unwrap();
                prop_assert_eq!(supers, chain[1..].to_vec());
                let subs = map.transitive_subtypes(chain[len - 1]).unwrap();
                prop_assert_eq!(subs.len(), len - 1);
            }

            #[test]
            fn instances_invert_types(types in 1usize..6, instances in 0usize..8) {
                let map = create_test_map();
                let type_ids: Vec<ConstructId> =
                    (0..types).map(|_| map.create_topic().unwrap()).collect();
                for i in 0..instances {
                    let topic = map.create_topic().unwrap();
                    map.add_type(topic, type_ids[i % types]).unwrap();
                }
                for t in &type_ids {
                    for instance in map.instances_of(*t).unwrap() {
                        prop_assert!(map.types_of(instance).unwrap().contains(t));
                    }
                }
            }
        }
    }
}
