//! Identification types for topic map constructs
//!
//! Provides strongly-typed identifiers for constructs and topic maps.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Internal numeric ID for efficient storage and lookup
pub type InternalId = u64;

/// Trait for all entity identifiers
pub trait EntityId: Clone + Copy + Eq + std::hash::Hash + fmt::Debug + fmt::Display {
    /// Create from internal numeric ID
    fn from_internal(id: InternalId) -> Self;

    /// Get the internal numeric representation
    fn as_internal(&self) -> InternalId;
}

/// Identifier for a topic map instance
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicMapId(InternalId);

impl TopicMapId {
    /// Derive a topic map ID from its base locator
    pub fn from_locator(locator: &str) -> Self {
        Self(xxhash_rust::xxh3::xxh3_64(locator.as_bytes()))
    }
}

impl EntityId for TopicMapId {
    fn from_internal(id: InternalId) -> Self {
        Self(id)
    }

    fn as_internal(&self) -> InternalId {
        self.0
    }
}

impl fmt::Debug for TopicMapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicMapId({})", self.0)
    }
}

impl fmt::Display for TopicMapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for any construct of a topic map (topic, association, role,
/// name, occurrence, variant or the map itself)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConstructId(InternalId);

impl EntityId for ConstructId {
    fn from_internal(id: InternalId) -> Self {
        Self(id)
    }

    fn as_internal(&self) -> InternalId {
        self.0
    }
}

impl fmt::Debug for ConstructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConstructId({})", self.0)
    }
}

impl fmt::Display for ConstructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ConstructId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<InternalId>().map(Self)
    }
}

/// Identifier generator for sequential construct IDs within a topic map
#[derive(Debug)]
pub struct IdGenerator {
    next_id: AtomicU64,
}

impl IdGenerator {
    /// Create a new ID generator
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    /// Create with a starting value (for recovery)
    pub fn with_start(start: u64) -> Self {
        Self {
            next_id: AtomicU64::new(start),
        }
    }

    /// Generate the next construct ID
    pub fn next_id(&self) -> ConstructId {
        ConstructId::from_internal(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Get current counter value
    pub fn current(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construct_id_from_internal() {
        let id = ConstructId::from_internal(42);
        assert_eq!(id.as_internal(), 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!("42".parse::<ConstructId>().unwrap(), id);
        assert!("abc".parse::<ConstructId>().is_err());
    }

    #[test]
    fn test_topic_map_id_from_locator() {
        let id1 = TopicMapId::from_locator("http://example.org/map");
        let id2 = TopicMapId::from_locator("http://example.org/map");
        let id3 = TopicMapId::from_locator("http://example.org/other");

        assert_eq!(id1, id2);
        assert_ne!(id1, id3);
    }

    #[test]
    fn test_id_generator() {
        let id_gen = IdGenerator::new();

        let c1 = id_gen.next_id();
        let c2 = id_gen.next_id();
        assert_ne!(c1, c2);
        assert_eq!(c1.as_internal() + 1, c2.as_internal());
        assert_eq!(id_gen.current(), 3);
    }

    #[test]
    fn test_id_generator_with_start() {
        let id_gen = IdGenerator::with_start(100);
        assert_eq!(id_gen.next_id().as_internal(), 100);
    }
}
