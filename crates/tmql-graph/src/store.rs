//! Graph-store interface consumed by the query engine
//!
//! A [`TopicMapStore`] exposes the constructs of one topic map through
//! navigation accessors matching the query axes plus identity lookups.
//! Backends are interchangeable; the engine only ever sees this trait.

use std::collections::HashSet;
use crate::changes::{ChangeSet, CommitSummary, Removal};
use tmql_core::{ConstructId, ConstructKind, Result};

/// Read access (and atomic commits of buffered changes) over one topic map
///
/// All navigation accessors return direct neighbours only; transitive
/// closures are provided on top of them.
pub trait TopicMapStore: Send + Sync {
    // ========== Identity ==========

    /// Base locator of the topic map
    fn base_locator(&self) -> &str;

    /// The topic map construct itself
    fn topic_map(&self) -> ConstructId;

    /// Kind of a construct, `None` if the id is unknown
    fn kind_of(&self, id: ConstructId) -> Result<Option<ConstructKind>>;

    /// All topics in creation order
    fn topics(&self) -> Result<Vec<ConstructId>>;

    /// All associations in creation order
    fn associations(&self) -> Result<Vec<ConstructId>>;

    fn subject_identifiers(&self, topic: ConstructId) -> Result<Vec<String>>;

    fn subject_locators(&self, topic: ConstructId) -> Result<Vec<String>>;

    fn item_identifiers(&self, construct: ConstructId) -> Result<Vec<String>>;

    fn topic_by_subject_identifier(&self, iri: &str) -> Result<Option<ConstructId>>;

    fn topic_by_subject_locator(&self, iri: &str) -> Result<Option<ConstructId>>;

    fn construct_by_item_identifier(&self, iri: &str) -> Result<Option<ConstructId>>;

    // ========== Typing ==========

    /// Direct types of a topic
    fn types_of(&self, topic: ConstructId) -> Result<Vec<ConstructId>>;

    /// Topics directly typed by `topic_type`
    fn instances_of(&self, topic_type: ConstructId) -> Result<Vec<ConstructId>>;

    fn supertypes_of(&self, topic: ConstructId) -> Result<Vec<ConstructId>>;

    fn subtypes_of(&self, topic: ConstructId) -> Result<Vec<ConstructId>>;

    /// Type of an association, role, name or occurrence
    fn type_of(&self, construct: ConstructId) -> Result<Option<ConstructId>>;

    /// Associations, roles, names and occurrences typed by `construct_type`
    fn typed_by(&self, construct_type: ConstructId) -> Result<Vec<ConstructId>>;

    // ========== Structure ==========

    fn names_of(&self, topic: ConstructId) -> Result<Vec<ConstructId>>;

    fn occurrences_of(&self, topic: ConstructId) -> Result<Vec<ConstructId>>;

    fn variants_of(&self, name: ConstructId) -> Result<Vec<ConstructId>>;

    /// Owning construct: topic of a name or occurrence, association of a
    /// role, name of a variant
    fn parent_of(&self, construct: ConstructId) -> Result<Option<ConstructId>>;

    fn roles_of(&self, association: ConstructId) -> Result<Vec<ConstructId>>;

    fn player_of(&self, role: ConstructId) -> Result<Option<ConstructId>>;

    /// Roles played by a topic
    fn roles_played(&self, topic: ConstructId) -> Result<Vec<ConstructId>>;

    // ========== Scope, reification and values ==========

    fn scope_of(&self, construct: ConstructId) -> Result<Vec<ConstructId>>;

    /// Constructs whose scope contains `theme`
    fn scoped_by(&self, theme: ConstructId) -> Result<Vec<ConstructId>>;

    fn reifier_of(&self, construct: ConstructId) -> Result<Option<ConstructId>>;

    fn reified_by(&self, topic: ConstructId) -> Result<Option<ConstructId>>;

    /// Literal value of a name, occurrence or variant
    fn value_of(&self, construct: ConstructId) -> Result<Option<String>>;

    /// Datatype IRI of an occurrence or variant
    fn datatype_of(&self, construct: ConstructId) -> Result<Option<String>>;

    /// Names, occurrences and variants carrying the given value
    fn constructs_by_value(&self, value: &str) -> Result<Vec<ConstructId>>;

    // ========== Mutation ==========

    /// Apply a change set as one unit.
    ///
    /// Removals go first. Without `cascade` removing a topic still in use
    /// (as a type, theme, player or reifier) fails with
    /// `InvalidGraphOperation`; with `cascade` dependent constructs are
    /// removed as well. Insertions get or create the topics they refer to
    /// and must not refer to a topic removed by the same change set. The
    /// whole set is checked before anything changes: if one entry fails,
    /// the map is left untouched.
    fn commit(&self, changes: &ChangeSet) -> Result<CommitSummary>;

    // ========== Provided ==========

    /// Apply a batch of removals as one unit
    fn remove_all(&self, removals: &[Removal]) -> Result<usize> {
        let changes = ChangeSet {
            removals: removals.to_vec(),
            insertions: Vec::new(),
        };
        Ok(self.commit(&changes)?.removed)
    }

    fn remove_constructs(&self, ids: &[ConstructId], cascade: bool) -> Result<usize> {
        self.remove_all(&[Removal::new(ids.to_vec(), cascade)])
    }

    fn contains(&self, id: ConstructId) -> Result<bool> {
        Ok(self.kind_of(id)?.is_some())
    }

    /// Names followed by occurrences of a topic
    fn characteristics_of(&self, topic: ConstructId) -> Result<Vec<ConstructId>> {
        let mut result = self.names_of(topic)?;
        result.extend(self.occurrences_of(topic)?);
        Ok(result)
    }

    /// Transitive supertypes, nearest first, without `topic` itself
    fn transitive_supertypes(&self, topic: ConstructId) -> Result<Vec<ConstructId>> {
        closure(topic, |t| self.supertypes_of(t))
    }

    /// Transitive subtypes, nearest first, without `topic` itself
    fn transitive_subtypes(&self, topic: ConstructId) -> Result<Vec<ConstructId>> {
        closure(topic, |t| self.subtypes_of(t))
    }

    /// True if `topic` is `supertype` or a transitive subtype of it
    fn is_kind_of(&self, topic: ConstructId, supertype: ConstructId) -> Result<bool> {
        if topic == supertype {
            return Ok(true);
        }
        Ok(self.transitive_supertypes(topic)?.contains(&supertype))
    }

    /// True if one of the topic's types is `topic_type` or a subtype of it
    fn is_instance_of(&self, topic: ConstructId, topic_type: ConstructId) -> Result<bool> {
        for t in self.types_of(topic)? {
            if self.is_kind_of(t, topic_type)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn closure<F>(start: ConstructId, mut step: F) -> Result<Vec<ConstructId>>
where
    F: FnMut(ConstructId) -> Result<Vec<ConstructId>>,
{
    let mut seen = HashSet::new();
    seen.insert(start);
    let mut result = Vec::new();
    let mut frontier = vec![start];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for id in frontier {
            for neighbour in step(id)? {
                if seen.insert(neighbour) {
                    result.push(neighbour);
                    next.push(neighbour);
                }
            }
        }
        frontier = next;
    }
    Ok(result)
}
