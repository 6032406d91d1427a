//! Values flowing through query evaluation
//!
//! A [`Value`] is either a reference to a construct of the queried topic map,
//! an atomic scalar, or an ordered sequence of such values (used when a
//! variable is bound to a sequence rather than a singleton).

use crate::id::ConstructId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A value bound to a variable or stored in a result cell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    /// Missing value
    Null,

    /// Reference to a topic map construct
    Construct(ConstructId),

    /// UTF-8 string
    String(String),

    /// 64-bit signed integer
    Integer(i64),

    /// 64-bit floating point decimal
    Decimal(f64),

    /// Boolean value
    Boolean(bool),

    /// Absolute IRI (subject identifiers, locators, item identifiers)
    Iri(String),

    /// Ordered sequence of values
    Sequence(Vec<Value>),
}

impl Value {
    /// Returns true if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if the value references a construct
    pub fn is_construct(&self) -> bool {
        matches!(self, Value::Construct(_))
    }

    /// Returns true for strings, numbers, booleans and IRIs
    pub fn is_atomic(&self) -> bool {
        matches!(
            self,
            Value::String(_)
                | Value::Integer(_)
                | Value::Decimal(_)
                | Value::Boolean(_)
                | Value::Iri(_)
        )
    }

    /// Returns true if the value is a number
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::Decimal(_))
    }

    /// Returns true if the value is a sequence
    pub fn is_sequence(&self) -> bool {
        matches!(self, Value::Sequence(_))
    }

    /// Try to get as construct reference
    pub fn as_construct(&self) -> Option<ConstructId> {
        match self {
            Value::Construct(id) => Some(*id),
            _ => None,
        }
    }

    /// Try to get as string slice (strings and IRIs)
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) | Value::Iri(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as integer
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Decimal(d) if d.fract() == 0.0 => Some(*d as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to get as decimal
    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Integer(i) => Some(*i as f64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Try to get as boolean
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get as sequence reference
    pub fn as_sequence(&self) -> Option<&[Value]> {
        match self {
            Value::Sequence(values) => Some(values),
            _ => None,
        }
    }

    /// Lexical form of an atomic value, `None` for constructs and sequences
    pub fn atomic_string(&self) -> Option<String> {
        match self {
            Value::String(s) | Value::Iri(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Decimal(d) => Some(d.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Null | Value::Construct(_) | Value::Sequence(_) => None,
        }
    }

    /// Flatten into a list of non-sequence values. Null flattens to nothing.
    pub fn flatten(self) -> Vec<Value> {
        match self {
            Value::Null => Vec::new(),
            Value::Sequence(values) => values.into_iter().flat_map(Value::flatten).collect(),
            other => vec![other],
        }
    }

    /// Wrap a list of values: empty becomes null, one element stays atomic
    pub fn from_values(mut values: Vec<Value>) -> Value {
        match values.len() {
            0 => Value::Null,
            1 => values.remove(0),
            _ => Value::Sequence(values),
        }
    }

    /// Order two values where the ordering is meaningful.
    ///
    /// Numbers compare numerically across integer and decimal, strings and
    /// IRIs lexically, constructs by identifier. Mixed kinds do not compare.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
            (a, b) if a.is_numeric() && b.is_numeric() => {
                a.as_decimal()?.partial_cmp(&b.as_decimal()?)
            }
            (Value::String(a) | Value::Iri(a), Value::String(b) | Value::Iri(b)) => Some(a.cmp(b)),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Construct(a), Value::Construct(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Total order used for sorting; incomparable kinds order by kind rank
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        self.compare(other)
            .unwrap_or_else(|| self.kind_rank().cmp(&other.kind_rank()))
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Integer(_) | Value::Decimal(_) => 2,
            Value::String(_) => 3,
            Value::Iri(_) => 4,
            Value::Construct(_) => 5,
            Value::Sequence(_) => 6,
        }
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Construct(_) => "construct",
            Value::String(_) => "string",
            Value::Integer(_) => "integer",
            Value::Decimal(_) => "decimal",
            Value::Boolean(_) => "boolean",
            Value::Iri(_) => "iri",
            Value::Sequence(_) => "sequence",
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Construct(a), Value::Construct(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Iri(a), Value::Iri(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Decimal(a), Value::Decimal(b)) => a.to_bits() == b.to_bits(),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Construct(id) => id.hash(state),
            Value::String(s) | Value::Iri(s) => s.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Decimal(d) => d.to_bits().hash(state),
            Value::Boolean(b) => b.hash(state),
            Value::Sequence(values) => values.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Construct(id) => write!(f, "#{}", id),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::Iri(s) => write!(f, "<{}>", s),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Sequence(values) => {
                write!(f, "(")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", value)?;
                }
                write!(f, ")")
            }
        }
    }
}

// Convenience From implementations
impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Decimal(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<ConstructId> for Value {
    fn from(v: ConstructId) -> Self {
        Value::Construct(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Sequence(v.into_iter().map(Into::into).collect())
    }
}
