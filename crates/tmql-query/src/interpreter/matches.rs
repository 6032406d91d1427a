//! Tuple streams produced by evaluation

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use tmql_core::Value;

/// Column holding the value of a single-column stream
pub const VALUE_COLUMN: &str = "$0";

/// One set of variable bindings
pub type Tuple = BTreeMap<String, Value>;

/// Column name of the n-th projected value
pub fn column_name(position: usize) -> String {
    format!("${}", position)
}

/// Ordered sequence of binding tuples over a common column set
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryMatches {
    columns: Vec<String>,
    tuples: Vec<Tuple>,
    /// Renamed column to the column it came from
    origins: HashMap<String, String>,
}

impl QueryMatches {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_columns(columns: Vec<String>) -> Self {
        Self {
            columns,
            ..Self::default()
        }
    }

    /// One tuple per value in [`VALUE_COLUMN`]
    pub fn from_values(values: Vec<Value>) -> Self {
        let mut matches = Self::with_columns(vec![VALUE_COLUMN.to_string()]);
        for value in values {
            let mut tuple = Tuple::new();
            tuple.insert(VALUE_COLUMN.to_string(), value);
            matches.tuples.push(tuple);
        }
        matches
    }

    /// Append a tuple; unseen variables become new columns
    pub fn push(&mut self, tuple: Tuple) {
        for name in tuple.keys() {
            if !self.columns.contains(name) {
                self.columns.push(name.clone());
            }
        }
        self.tuples.push(tuple);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn tuples(&self) -> &[Tuple] {
        &self.tuples
    }

    pub fn into_tuples(self) -> Vec<Tuple> {
        self.tuples
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    /// Concatenate another stream
    pub fn union(&mut self, other: QueryMatches) {
        for (renamed, origin) in other.origins {
            self.origins.entry(renamed).or_insert(origin);
        }
        for tuple in other.tuples {
            self.push(tuple);
        }
        for column in other.columns {
            if !self.columns.contains(&column) {
                self.columns.push(column);
            }
        }
    }

    /// Rename a column, remembering where it came from
    pub fn rename(&mut self, from: &str, to: &str) {
        if from == to {
            return;
        }
        for column in self.columns.iter_mut() {
            if column == from {
                *column = to.to_string();
            }
        }
        for tuple in self.tuples.iter_mut() {
            if let Some(value) = tuple.remove(from) {
                tuple.insert(to.to_string(), value);
            }
        }
        let origin = self
            .origins
            .remove(from)
            .unwrap_or_else(|| from.to_string());
        self.origins.insert(to.to_string(), origin);
    }

    /// Column a renamed column was created from
    pub fn origin(&self, column: &str) -> Option<&str> {
        self.origins.get(column).map(String::as_str)
    }

    /// Values of one column in tuple order, sequences flattened
    pub fn values(&self, column: &str) -> Vec<Value> {
        self.tuples
            .iter()
            .filter_map(|t| t.get(column))
            .flat_map(|v| v.clone().flatten())
            .collect()
    }

    /// Distinct values a column takes, in first-seen order
    pub fn possible_values(&self, column: &str) -> Vec<Value> {
        let mut seen = HashSet::new();
        self.values(column)
            .into_iter()
            .filter(|v| seen.insert(v.clone()))
            .collect()
    }

    /// Drop repeated tuples, keeping the first occurrence
    pub fn dedup(&mut self) {
        let mut seen: HashSet<Tuple> = HashSet::new();
        self.tuples.retain(|t| seen.insert(t.clone()));
    }

    /// Keep at most `limit` tuples after skipping `offset`
    pub fn slice(&mut self, offset: usize, limit: Option<usize>) {
        let start = offset.min(self.tuples.len());
        self.tuples.drain(..start);
        if let Some(limit) = limit {
            self.tuples.truncate(limit);
        }
    }

    /// Cells of a tuple in column order, missing cells as null
    pub fn row(&self, tuple: &Tuple) -> Vec<Value> {
        self.columns
            .iter()
            .map(|c| tuple.get(c).cloned().unwrap_or(Value::Null))
            .collect()
    }
}
