//! Buffered modifications
//!
//! Modifying queries never touch the store while they evaluate. They collect
//! a [`ChangeSet`] which the store applies in one step through
//! [`TopicMapStore::commit`](crate::TopicMapStore::commit).

use tmql_core::ConstructId;

/// One requested removal inside a batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub constructs: Vec<ConstructId>,
    pub cascade: bool,
}

impl Removal {
    pub fn new(constructs: Vec<ConstructId>, cascade: bool) -> Self {
        Self { constructs, cascade }
    }
}

/// Identity a topic is looked up (or created) by
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicReference {
    SubjectIdentifier(String),
    SubjectLocator(String),
    ItemIdentifier(String),
}

impl TopicReference {
    pub fn iri(&self) -> &str {
        match self {
            TopicReference::SubjectIdentifier(iri)
            | TopicReference::SubjectLocator(iri)
            | TopicReference::ItemIdentifier(iri) => iri,
        }
    }
}

/// Content added by an insertion
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// A topic with optional types, names and occurrences
    Topic {
        identity: TopicReference,
        types: Vec<TopicReference>,
        names: Vec<String>,
        /// Occurrence type and value
        occurrences: Vec<(TopicReference, String)>,
    },
    /// An association with its (role type, player) pairs
    Association {
        association_type: TopicReference,
        roles: Vec<(TopicReference, TopicReference)>,
    },
}

impl Fragment {
    /// Every topic the fragment refers to
    pub fn references(&self) -> Vec<&TopicReference> {
        match self {
            Fragment::Topic {
                identity,
                types,
                occurrences,
                ..
            } => std::iter::once(identity)
                .chain(types)
                .chain(occurrences.iter().map(|(t, _)| t))
                .collect(),
            Fragment::Association {
                association_type,
                roles,
            } => std::iter::once(association_type)
                .chain(roles.iter().flat_map(|(r, p)| [r, p]))
                .collect(),
        }
    }
}

/// Everything one query asks to change
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet {
    pub removals: Vec<Removal>,
    pub insertions: Vec<Fragment>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.insertions.is_empty()
    }
}

/// Number of constructs a commit removed and created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub removed: usize,
    pub inserted: usize,
}
