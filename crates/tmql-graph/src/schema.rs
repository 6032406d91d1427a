//! Relational schema description for the translation backend
//!
//! The SQL translator never talks to a database. It only needs to know the
//! tables, views and columns a relational topic map store exposes, which is
//! what this module describes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Tables and views of a relational topic map store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    Topics,
    Names,
    Occurrences,
    Variants,
    Associations,
    Roles,
    Locators,
    RelInstanceOf,
    RelKindOf,
    RelThemes,
    RelSubjectIdentifiers,
    RelSubjectLocators,
    RelItemIdentifiers,
    /// View over every scoped construct: `id`, `id_scope`
    Scopeables,
    /// View over every typed construct: `id`, `id_type`
    Typeables,
    /// View over every reifiable construct: `id`, `id_reifier`
    Reifiables,
    /// View over names and occurrences: `id`, `id_parent`, `id_type`, `value`
    Characteristics,
    /// View over every construct carrying a value: `id`, `value`
    Literals,
}

impl Table {
    /// Every table and view, in DDL order
    pub const ALL: [Table; 18] = [
        Table::Topics,
        Table::Names,
        Table::Occurrences,
        Table::Variants,
        Table::Associations,
        Table::Roles,
        Table::Locators,
        Table::RelInstanceOf,
        Table::RelKindOf,
        Table::RelThemes,
        Table::RelSubjectIdentifiers,
        Table::RelSubjectLocators,
        Table::RelItemIdentifiers,
        Table::Scopeables,
        Table::Typeables,
        Table::Reifiables,
        Table::Characteristics,
        Table::Literals,
    ];

    /// Unprefixed table name
    pub fn base_name(self) -> &'static str {
        match self {
            Table::Topics => "topics",
            Table::Names => "names",
            Table::Occurrences => "occurrences",
            Table::Variants => "variants",
            Table::Associations => "associations",
            Table::Roles => "roles",
            Table::Locators => "locators",
            Table::RelInstanceOf => "rel_instance_of",
            Table::RelKindOf => "rel_kind_of",
            Table::RelThemes => "rel_themes",
            Table::RelSubjectIdentifiers => "rel_subject_identifiers",
            Table::RelSubjectLocators => "rel_subject_locators",
            Table::RelItemIdentifiers => "rel_item_identifiers",
            Table::Scopeables => "scopeables",
            Table::Typeables => "typeables",
            Table::Reifiables => "reifiables",
            Table::Characteristics => "characteristics",
            Table::Literals => "literals",
        }
    }

    /// Column names
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            Table::Topics => &["id", "id_topicmap", "id_reification"],
            Table::Names => &["id", "id_parent", "id_type", "id_scope", "value", "id_reifier"],
            Table::Occurrences => &[
                "id",
                "id_parent",
                "id_type",
                "id_scope",
                "value",
                "reference",
                "id_reifier",
            ],
            Table::Variants => &["id", "id_parent", "id_scope", "value", "reference", "id_reifier"],
            Table::Associations => &["id", "id_type", "id_scope", "id_reifier"],
            Table::Roles => &["id", "id_parent", "id_type", "id_player", "id_reifier"],
            Table::Locators => &["id", "reference"],
            Table::RelInstanceOf => &["id_instance", "id_type"],
            Table::RelKindOf => &["id_subtype", "id_supertype"],
            Table::RelThemes => &["id_scope", "id_theme"],
            Table::RelSubjectIdentifiers => &["id_topic", "id_locator"],
            Table::RelSubjectLocators => &["id_topic", "id_locator"],
            Table::RelItemIdentifiers => &["id_construct", "id_locator"],
            Table::Scopeables => &["id", "id_scope"],
            Table::Typeables => &["id", "id_type"],
            Table::Reifiables => &["id", "id_reifier"],
            Table::Characteristics => &["id", "id_parent", "id_type", "value"],
            Table::Literals => &["id", "value"],
        }
    }

    /// True for views derived from the base tables
    pub fn is_view(self) -> bool {
        matches!(
            self,
            Table::Scopeables
                | Table::Typeables
                | Table::Reifiables
                | Table::Characteristics
                | Table::Literals
        )
    }

    pub fn has_column(self, column: &str) -> bool {
        self.columns().contains(&column)
    }
}

/// Naming of the relational store a query is translated against
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationalSchema {
    /// Prefix prepended to every table and view name
    pub table_prefix: String,
}

impl RelationalSchema {
    /// Schema with the standard, unprefixed table names
    pub fn new() -> Self {
        Self {
            table_prefix: String::new(),
        }
    }

    /// Schema whose tables share a common prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            table_prefix: prefix.into(),
        }
    }

    /// Qualified name of a table or view
    pub fn name(&self, table: Table) -> String {
        format!("{}{}", self.table_prefix, table.base_name())
    }

    /// Resolve a qualified name back to its table
    pub fn table(&self, name: &str) -> Option<Table> {
        let base = name.strip_prefix(self.table_prefix.as_str())?;
        Table::ALL.into_iter().find(|t| t.base_name() == base)
    }

    /// Render a `CREATE TABLE` outline for every base table
    pub fn ddl(&self) -> String {
        let mut out = String::new();
        for table in Table::ALL.into_iter().filter(|t| !t.is_view()) {
            out.push_str(&format!("CREATE TABLE {} (", self.name(table)));
            let columns: Vec<String> = table
                .columns()
                .iter()
                .map(|c| {
                    let sql_type = if matches!(*c, "value" | "reference") {
                        "TEXT"
                    } else {
                        "BIGINT"
                    };
                    format!("{} {}", c, sql_type)
                })
                .collect();
            out.push_str(&columns.join(", "));
            out.push_str(");\n");
        }
        out
    }
}

impl Default for RelationalSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_names() {
        let schema = RelationalSchema::new();
        assert_eq!(schema.name(Table::RelThemes), "rel_themes");
        assert_eq!(
            schema.name(Table::RelSubjectIdentifiers),
            "rel_subject_identifiers"
        );
        assert_eq!(schema.table("scopeables"), Some(Table::Scopeables));
        assert_eq!(schema.table("nope"), None);
    }

    #[test]
    fn test_prefixed_names() {
        let schema = RelationalSchema::with_prefix("tm_");
        assert_eq!(schema.name(Table::Topics), "tm_topics");
        assert_eq!(schema.table("tm_roles"), Some(Table::Roles));
        assert_eq!(schema.table("roles"), None);
    }

    #[test]
    fn test_columns() {
        assert!(Table::RelItemIdentifiers.has_column("id_construct"));
        assert!(Table::Roles.has_column("id_player"));
        assert!(!Table::Topics.has_column("value"));
        assert!(Table::Characteristics.is_view());
    }

    #[test]
    fn test_ddl_skips_views() {
        let ddl = RelationalSchema::new().ddl();
        assert!(ddl.contains("CREATE TABLE rel_kind_of (id_subtype BIGINT, id_supertype BIGINT);"));
        assert!(ddl.contains("value TEXT"));
        assert!(!ddl.contains("CREATE TABLE scopeables"));
    }
}
