//! Core topic map types for the TMQL engine
//!
//! Defines construct kinds, navigation directions and the well-known
//! subject identifiers of the topic maps data model.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a topic map construct
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstructKind {
    TopicMap,
    Topic,
    Association,
    Role,
    Name,
    Occurrence,
    Variant,
}

impl ConstructKind {
    /// Returns true if constructs of this kind carry a type
    pub fn is_typed(self) -> bool {
        matches!(
            self,
            ConstructKind::Association
                | ConstructKind::Role
                | ConstructKind::Name
                | ConstructKind::Occurrence
        )
    }

    /// Returns true if constructs of this kind carry a scope
    pub fn is_scoped(self) -> bool {
        matches!(
            self,
            ConstructKind::Association
                | ConstructKind::Name
                | ConstructKind::Occurrence
                | ConstructKind::Variant
        )
    }

    /// Returns true if constructs of this kind may be reified
    pub fn is_reifiable(self) -> bool {
        !matches!(self, ConstructKind::Topic)
    }

    /// Names and occurrences
    pub fn is_characteristic(self) -> bool {
        matches!(self, ConstructKind::Name | ConstructKind::Occurrence)
    }

    /// Returns true if constructs of this kind have a literal value
    pub fn has_value(self) -> bool {
        matches!(
            self,
            ConstructKind::Name | ConstructKind::Occurrence | ConstructKind::Variant
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            ConstructKind::TopicMap => "topic map",
            ConstructKind::Topic => "topic",
            ConstructKind::Association => "association",
            ConstructKind::Role => "role",
            ConstructKind::Name => "name",
            ConstructKind::Occurrence => "occurrence",
            ConstructKind::Variant => "variant",
        }
    }
}

impl fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Direction of an axis step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Forward navigation (>>)
    Forward,
    /// Backward navigation (<<)
    Backward,
}

impl Direction {
    /// Returns the opposite direction
    pub fn reverse(self) -> Self {
        match self {
            Direction::Forward => Direction::Backward,
            Direction::Backward => Direction::Forward,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Direction::Forward => ">>",
            Direction::Backward => "<<",
        }
    }
}

/// Well-known subject identifiers and namespace prefixes
pub mod psi {
    /// Prefix bound to `tm:` in every query
    pub const TM_PREFIX: &str = "http://psi.topicmaps.org/iso13250/model/";
    /// Prefix bound to `tmql:` in every query
    pub const TMQL_PREFIX: &str = "http://psi.topicmaps.org/tmql/1.0/";
    /// Prefix bound to `fn:` in every query
    pub const FN_PREFIX: &str = "http://psi.topicmaps.org/tmql/1.0/functions/";
    /// Prefix bound to `xsd:` in every query
    pub const XSD_PREFIX: &str = "http://www.w3.org/2001/XMLSchema#";

    /// The type of all topics
    pub const SUBJECT: &str = "http://psi.topicmaps.org/iso13250/model/subject";
    /// The type of all names
    pub const NAME: &str = "http://psi.topicmaps.org/iso13250/model/name";
    /// The default name type
    pub const TOPIC_NAME: &str = "http://psi.topicmaps.org/iso13250/model/topic-name";
    /// The type of all occurrences
    pub const OCCURRENCE: &str = "http://psi.topicmaps.org/iso13250/model/occurrence";
    pub const TYPE_INSTANCE: &str = "http://psi.topicmaps.org/iso13250/model/type-instance";
    pub const TYPE: &str = "http://psi.topicmaps.org/iso13250/model/type";
    pub const INSTANCE: &str = "http://psi.topicmaps.org/iso13250/model/instance";
    pub const SUPERTYPE_SUBTYPE: &str = "http://psi.topicmaps.org/iso13250/model/supertype-subtype";
    pub const SUPERTYPE: &str = "http://psi.topicmaps.org/iso13250/model/supertype";
    pub const SUBTYPE: &str = "http://psi.topicmaps.org/iso13250/model/subtype";

    pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
    pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
    pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
    pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
    pub const XSD_ANY_URI: &str = "http://www.w3.org/2001/XMLSchema#anyURI";

    /// Prefixes predefined for every query, in resolution order
    pub const PREDEFINED_PREFIXES: &[(&str, &str)] = &[
        ("tm", TM_PREFIX),
        ("tmql", TMQL_PREFIX),
        ("fn", FN_PREFIX),
        ("xsd", XSD_PREFIX),
    ];

    /// Resolve a predefined prefix
    pub fn predefined_prefix(prefix: &str) -> Option<&'static str> {
        PREDEFINED_PREFIXES
            .iter()
            .find(|(p, _)| *p == prefix)
            .map(|(_, iri)| *iri)
    }
}
