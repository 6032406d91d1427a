//! Accumulated translation state

use serde::Serialize;
use tmql_core::{Error, Result};

/// What the current selection yields; picks the rule for the next step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum ValueKind {
    /// Topic identifiers
    Topic,
    /// Strings, numbers and locators
    Scalar,
    /// Construct identifiers of any kind
    #[default]
    Any,
}

/// Aliased table, view or sub-select
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromPart {
    pub source: String,
    pub alias: String,
}

/// Fragments of one SELECT statement under construction
///
/// Cloning is how sub-translations branch: a filter predicate works on a
/// [`TranslationState::branch`] and only the alias counter flows back.
#[derive(Debug, Clone, Default)]
pub struct TranslationState {
    from: Vec<FromPart>,
    selection: Option<String>,
    conditions: Vec<String>,
    next_alias: usize,
    value_kind: ValueKind,
    offset: usize,
    limit: Option<usize>,
}

impl TranslationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused alias: `a0`, `a1`, ...
    pub fn fresh_alias(&mut self) -> String {
        let alias = format!("a{}", self.next_alias);
        self.next_alias += 1;
        alias
    }

    /// Add a source under a fresh alias and return the alias
    pub fn join(&mut self, source: impl Into<String>) -> String {
        let alias = self.fresh_alias();
        self.from.push(FromPart {
            source: source.into(),
            alias: alias.clone(),
        });
        alias
    }

    pub fn condition(&mut self, condition: impl Into<String>) {
        self.conditions.push(condition.into());
    }

    pub fn select(&mut self, expression: impl Into<String>, kind: ValueKind) {
        self.selection = Some(expression.into());
        self.value_kind = kind;
    }

    pub fn selection(&self) -> Result<&str> {
        self.selection
            .as_deref()
            .ok_or_else(|| Error::Internal("Translation without a selection".to_string()))
    }

    pub fn value_kind(&self) -> ValueKind {
        self.value_kind
    }

    pub fn from_parts(&self) -> &[FromPart] {
        &self.from
    }

    pub fn conditions(&self) -> &[String] {
        &self.conditions
    }

    pub fn alias_count(&self) -> usize {
        self.next_alias
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn is_windowed(&self) -> bool {
        self.offset > 0 || self.limit.is_some()
    }

    /// Narrow the result window to `low .. high` of the current window
    pub fn restrict(&mut self, low: usize, high: Option<usize>) {
        let mut limit = high.map(|h| h.saturating_sub(low));
        if let Some(available) = self.limit {
            let rest = available.saturating_sub(low);
            limit = Some(limit.map_or(rest, |l| l.min(rest)));
        }
        self.offset += low;
        self.limit = limit;
    }

    /// Same selection and counter, no fragments
    pub fn branch(&self) -> Self {
        let mut branch = self.clone();
        branch.from.clear();
        branch.conditions.clear();
        branch.offset = 0;
        branch.limit = None;
        branch
    }

    /// Keep aliases handed out by a branch unique
    pub fn absorb(&mut self, branch: &TranslationState) {
        self.next_alias = self.next_alias.max(branch.next_alias);
    }

    /// Render as one statement selecting a `value` column
    pub fn to_sql(&self) -> Result<String> {
        self.render(format!("SELECT {} AS value", self.selection()?))
    }

    /// Render for use as a scalar sub-select
    pub fn to_scalar_sql(&self) -> Result<String> {
        self.render(format!("SELECT {}", self.selection()?))
    }

    fn render(&self, mut sql: String) -> Result<String> {
        if !self.from.is_empty() {
            let sources: Vec<String> = self
                .from
                .iter()
                .map(|part| format!("{} AS {}", part.source, part.alias))
                .collect();
            sql.push_str(" FROM ");
            sql.push_str(&sources.join(", "));
        }
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if self.is_windowed() {
            sql.push_str(" ORDER BY value");
            if let Some(limit) = self.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
            if self.offset > 0 {
                sql.push_str(&format!(" OFFSET {}", self.offset));
            }
        }
        Ok(sql)
    }

    /// Correlated `EXISTS` over the fragments, optionally with a final test
    pub fn to_exists(&self, test: Option<String>) -> Result<String> {
        let mut conditions = self.conditions.clone();
        conditions.extend(test);
        if self.from.is_empty() {
            return Ok(if conditions.is_empty() {
                "TRUE".to_string()
            } else {
                conditions.join(" AND ")
            });
        }
        let sources: Vec<String> = self
            .from
            .iter()
            .map(|part| format!("{} AS {}", part.source, part.alias))
            .collect();
        let mut sql = format!("EXISTS ( SELECT 1 FROM {}", sources.join(", "));
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" )");
        Ok(sql)
    }

    /// Turn the statement so far into a sub-select of a new state
    pub fn wrap(self) -> Result<Self> {
        let sql = self.to_sql()?;
        let mut wrapped = Self {
            next_alias: self.next_alias,
            ..Self::default()
        };
        let alias = wrapped.join(format!("( {} )", sql));
        wrapped.select(format!("{}.value", alias), self.value_kind);
        Ok(wrapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render() {
        let mut state = TranslationState::new();
        let a = state.join("topics");
        let b = state.join("rel_instance_of");
        state.condition(format!("{}.id_type = {}.id", b, a));
        state.select(format!("{}.id_instance", b), ValueKind::Topic);
        assert_eq!(
            state.to_sql().unwrap(),
            "SELECT a1.id_instance AS value FROM topics AS a0, rel_instance_of AS a1 WHERE a1.id_type = a0.id"
        );
        assert_eq!(state.alias_count(), 2);
    }

    #[test]
    fn test_missing_selection() {
        assert!(matches!(TranslationState::new().to_sql(), Err(Error::Internal(_))));
    }

    #[test]
    fn test_restrict_composes() {
        let mut state = TranslationState::new();
        state.restrict(2, Some(5));
        assert_eq!((state.offset(), state.limit()), (2, Some(3)));
        state.restrict(1, Some(2));
        assert_eq!((state.offset(), state.limit()), (3, Some(1)));
        state.restrict(4, None);
        assert_eq!(state.limit(), Some(0));
    }

    #[test]
    fn test_branch_leaves_parent_untouched() {
        let mut parent = TranslationState::new();
        let a = parent.join("topics");
        parent.select(format!("{}.id", a), ValueKind::Topic);

        let mut branch = parent.branch();
        let b = branch.join("names");
        branch.condition(format!("{}.id_parent = {}.id", b, a));
        assert_eq!(parent.from_parts().len(), 1);
        assert!(parent.conditions().is_empty());

        parent.absorb(&branch);
        assert_eq!(parent.fresh_alias(), "a2");
        assert_eq!(
            branch.to_exists(None).unwrap(),
            "EXISTS ( SELECT 1 FROM names AS a1 WHERE a1.id_parent = a0.id )"
        );
    }

    #[test]
    fn test_wrap_keeps_counter_and_kind() {
        let mut state = TranslationState::new();
        let a = state.join("topics");
        state.select(format!("{}.id", a), ValueKind::Topic);
        state.restrict(0, Some(1));
        let wrapped = state.wrap().unwrap();
        assert_eq!(wrapped.value_kind(), ValueKind::Topic);
        assert_eq!(wrapped.selection().unwrap(), "a1.value");
        assert!(wrapped
            .to_sql()
            .unwrap()
            .starts_with("SELECT a1.value AS value FROM ( SELECT a0.id AS value FROM topics AS a0 ORDER BY value LIMIT 1 ) AS a1"));
    }
}
