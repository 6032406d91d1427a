//! Result materialization
//!
//! Reduces the tuple stream produced by the interpreter into a tabular
//! [`ResultSet`]. Two-dimensional reduction expands sequence-valued cells
//! into one flat row per combination; N-dimensional reduction keeps each
//! cell's sequence intact.

use crate::interpreter::QueryMatches;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tmql_core::{Error, Result, Value};
use tracing::trace;

/// One row of a result set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResultRow {
    cells: Vec<Value>,
}

impl ResultRow {
    pub fn new(cells: Vec<Value>) -> Self {
        Self { cells }
    }

    /// Cell at a column index
    pub fn get(&self, column: usize) -> Option<&Value> {
        self.cells.get(column)
    }

    pub fn first(&self) -> Option<&Value> {
        self.cells.first()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.cells.iter()
    }

    pub fn cells(&self) -> &[Value] {
        &self.cells
    }
}

/// Execution statistics for monitoring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionStats {
    pub tuples_produced: u64,
    pub rows_returned: u64,
    pub constructs_removed: u64,
    pub constructs_inserted: u64,
    pub elapsed_micros: u64,
}

/// Materialized query result
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultSet {
    rows: Vec<ResultRow>,
    aliases: HashMap<String, usize>,
    pub stats: ExecutionStats,
}

impl ResultSet {
    pub fn new(rows: Vec<ResultRow>, aliases: HashMap<String, usize>) -> Self {
        Self {
            rows,
            aliases,
            stats: ExecutionStats::default(),
        }
    }

    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<ResultRow> {
        self.rows
    }

    pub fn get(&self, row: usize) -> Option<&ResultRow> {
        self.rows.get(row)
    }

    pub fn first(&self) -> Option<&ResultRow> {
        self.rows.first()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of columns; zero for an empty set
    pub fn width(&self) -> usize {
        self.rows.first().map(ResultRow::len).unwrap_or(0)
    }

    pub fn column_index_for_alias(&self, alias: &str) -> Option<usize> {
        self.aliases.get(alias).copied()
    }

    pub fn aliases(&self) -> &HashMap<String, usize> {
        &self.aliases
    }

    /// Cell addressed by row index and alias
    pub fn value(&self, row: usize, alias: &str) -> Option<&Value> {
        let column = self.column_index_for_alias(alias)?;
        self.rows.get(row)?.get(column)
    }

    /// Drop structurally equal rows, keeping the first one seen
    pub fn unify(&mut self) {
        let mut seen = HashSet::new();
        self.rows.retain(|row| seen.insert(row.clone()));
    }

    /// Values of the first column
    pub fn first_column(&self) -> Vec<Value> {
        self.rows.iter().filter_map(|r| r.first().cloned()).collect()
    }

    /// JSON document with rows, aliases and statistics
    pub fn to_json(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| Error::Internal(format!("Failed to serialize result set: {}", e)))
    }
}

/// How tuple streams are turned into rows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ReductionMode {
    /// One flat row per combination of sequence items
    TwoDimensional,
    /// One row per tuple, sequences kept as cells
    NDimensional,
}

/// Turns tuple streams into result sets
///
/// Aliases registered with [`ResultProcessor::set_alias`] are merged over
/// the aliases the query itself declares.
#[derive(Debug)]
pub struct ResultProcessor {
    mode: ReductionMode,
    aliases: Mutex<HashMap<String, usize>>,
}

impl ResultProcessor {
    pub fn new(mode: ReductionMode) -> Self {
        Self {
            mode,
            aliases: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> ReductionMode {
        self.mode
    }

    /// Name a column; an existing alias is overwritten
    pub fn set_alias(&self, alias: &str, column: usize) -> Result<()> {
        let mut aliases = self
            .aliases
            .lock()
            .map_err(|e| Error::Internal(format!("Alias map poisoned: {}", e)))?;
        aliases.insert(alias.to_string(), column);
        Ok(())
    }

    pub fn alias(&self, alias: &str) -> Result<Option<usize>> {
        let aliases = self
            .aliases
            .lock()
            .map_err(|e| Error::Internal(format!("Alias map poisoned: {}", e)))?;
        Ok(aliases.get(alias).copied())
    }

    pub fn reduce(&self, matches: &QueryMatches) -> Result<ResultSet> {
        let mut aliases: HashMap<String, usize> = matches
            .columns()
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.starts_with('$'))
            .map(|(index, name)| (name.clone(), index))
            .collect();
        {
            let registered = self
                .aliases
                .lock()
                .map_err(|e| Error::Internal(format!("Alias map poisoned: {}", e)))?;
            for (alias, column) in registered.iter() {
                aliases.insert(alias.clone(), *column);
            }
        }

        let mut rows = Vec::with_capacity(matches.len());
        for tuple in matches.tuples() {
            let cells = matches.row(tuple);
            if cells.iter().all(Value::is_null) {
                continue;
            }
            match self.mode {
                ReductionMode::TwoDimensional => expand(cells, &mut rows),
                ReductionMode::NDimensional => rows.push(ResultRow::new(cells)),
            }
        }
        trace!(
            "Reduced {} tuple(s) into {} row(s) ({:?})",
            matches.len(),
            rows.len(),
            self.mode
        );
        Ok(ResultSet::new(rows, aliases))
    }
}

impl Default for ResultProcessor {
    fn default() -> Self {
        Self::new(ReductionMode::TwoDimensional)
    }
}

/// Cartesian product over the sequence-valued cells
fn expand(cells: Vec<Value>, rows: &mut Vec<ResultRow>) {
    let choices: Vec<Vec<Value>> = cells
        .into_iter()
        .map(|cell| match cell {
            Value::Sequence(items) if !items.is_empty() => items,
            Value::Sequence(_) => vec![Value::Null],
            other => vec![other],
        })
        .collect();

    let mut partial: Vec<Vec<Value>> = vec![Vec::with_capacity(choices.len())];
    for options in &choices {
        let mut next = Vec::with_capacity(partial.len() * options.len());
        for prefix in &partial {
            for option in options {
                let mut row = prefix.clone();
                row.push(option.clone());
                next.push(row);
            }
        }
        partial = next;
    }
    rows.extend(partial.into_iter().map(ResultRow::new));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{column_name, Tuple, VALUE_COLUMN};

    fn two_columns(rows: &[(Value, Value)]) -> QueryMatches {
        let mut matches = QueryMatches::with_columns(vec![column_name(0), column_name(1)]);
        for (a, b) in rows {
            let mut tuple = Tuple::new();
            tuple.insert(column_name(0), a.clone());
            tuple.insert(column_name(1), b.clone());
            matches.push(tuple);
        }
        matches
    }

    #[test]
    fn test_two_dimensional_expands_sequences() {
        let matches = two_columns(&[(
            Value::from("t"),
            Value::Sequence(vec![Value::from(1), Value::from(2)]),
        )]);
        let result = ResultProcessor::default().reduce(&matches).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.get(1).unwrap().get(1), Some(&Value::from(2)));
        assert!(result.rows().iter().all(|r| r.len() == 2));
    }

    #[test]
    fn test_n_dimensional_keeps_sequences() {
        let sequence = Value::Sequence(vec![Value::from(1), Value::from(2)]);
        let matches = two_columns(&[(Value::from("t"), sequence.clone())]);
        let result = ResultProcessor::new(ReductionMode::NDimensional)
            .reduce(&matches)
            .unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.first().unwrap().get(1), Some(&sequence));
    }

    #[test]
    fn test_all_null_rows_are_dropped() {
        let matches = two_columns(&[
            (Value::Null, Value::Null),
            (Value::Null, Value::from(1)),
        ]);
        let result = ResultProcessor::default().reduce(&matches).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.first().unwrap().get(0), Some(&Value::Null));
    }

    #[test]
    fn test_aliases_last_writer_wins() {
        let mut matches = QueryMatches::from_values(vec![Value::from("x")]);
        matches.rename(VALUE_COLUMN, "label");
        let processor = ResultProcessor::default();
        let result = processor.reduce(&matches).unwrap();
        assert_eq!(result.column_index_for_alias("label"), Some(0));
        assert_eq!(result.value(0, "label"), Some(&Value::from("x")));

        processor.set_alias("other", 0).unwrap();
        processor.set_alias("other", 3).unwrap();
        assert_eq!(processor.alias("other").unwrap(), Some(3));
        let result = processor.reduce(&matches).unwrap();
        assert_eq!(result.column_index_for_alias("other"), Some(3));
    }

    #[test]
    fn test_unify_keeps_first_seen_order() {
        let matches = QueryMatches::from_values(vec![
            Value::from(2),
            Value::from(1),
            Value::from(2),
        ]);
        let mut result = ResultProcessor::default().reduce(&matches).unwrap();
        result.unify();
        assert_eq!(result.first_column(), vec![Value::from(2), Value::from(1)]);
    }

    #[test]
    fn test_to_json() {
        let mut matches = QueryMatches::from_values(vec![Value::from("x")]);
        matches.rename(VALUE_COLUMN, "label");
        let json = ResultProcessor::default().reduce(&matches).unwrap().to_json().unwrap();
        assert_eq!(json["aliases"]["label"], 0);
        assert_eq!(json["rows"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["stats"]["rows_returned"], 0);
    }
}
