//! Modification dialect
//!
//! `DELETE [CASCADE] content` removes the constructs the content evaluates
//! to. `INSERT content` adds the topics and associations written as CTM text
//! in the content (see [`ctm`](super::ctm) for the accepted subset).
//! Evaluation only buffers changes on the interpreter; the engine commits
//! all of them at once after the whole query has succeeded, so a failing
//! query never leaves a partially modified topic map behind.

use super::ctm::read_fragments;
use crate::ast::{grammar, NodeIndex, NodeKind, NodeType, Window};
use crate::interpreter::{Interpreter, QueryMatches};
use crate::parser::Parser;
use crate::registry::{
    Dialect, ExtensionEvaluator, KeywordMatcher, ProductionEntry, ProductionFactory, TokenMatcher,
};
use crate::token::{Token, TokenKind};
use std::collections::HashSet;
use std::sync::Arc;
use tmql_core::{Error, Result, Value};
use tracing::debug;

pub const DELETE: TokenKind = TokenKind::Custom("DELETE");
pub const CASCADE: TokenKind = TokenKind::Custom("CASCADE");
pub const INSERT: TokenKind = TokenKind::Custom("INSERT");

/// Name of the extension node and its evaluator
const EXTENSION_NAME: &str = "delete";
const INSERT_EXTENSION_NAME: &str = "insert";

/// Flag set on the extension node of `DELETE CASCADE`
const CASCADE_FLAG: &str = "CASCADE";

pub struct ModificationDialect;

impl Dialect for ModificationDialect {
    fn name(&self) -> &'static str {
        "modification"
    }

    fn token_matchers(&self) -> Vec<Arc<dyn TokenMatcher>> {
        vec![
            Arc::new(KeywordMatcher::new(DELETE, "DELETE")),
            Arc::new(KeywordMatcher::new(CASCADE, "CASCADE")),
            Arc::new(KeywordMatcher::new(INSERT, "INSERT")),
        ]
    }

    fn productions(&self) -> Vec<ProductionEntry> {
        vec![
            ProductionEntry {
                node_type: NodeType::QueryExpression,
                name: "delete-expression".to_string(),
                is_valid: Arc::new(|tokens: &[Token]| {
                    tokens.first().map(|t| t.is(DELETE)).unwrap_or(false)
                }),
                factory: Arc::new(DeleteProduction),
            },
            ProductionEntry {
                node_type: NodeType::QueryExpression,
                name: "insert-expression".to_string(),
                is_valid: Arc::new(|tokens: &[Token]| {
                    tokens.first().map(|t| t.is(INSERT)).unwrap_or(false)
                }),
                factory: Arc::new(InsertProduction),
            },
        ]
    }

    fn evaluators(&self) -> Vec<(String, Arc<dyn ExtensionEvaluator>)> {
        vec![
            (EXTENSION_NAME.to_string(), Arc::new(DeleteEvaluator)),
            (INSERT_EXTENSION_NAME.to_string(), Arc::new(InsertEvaluator)),
        ]
    }
}

/// Builds `Extension { name: "delete" }` over the addressed content
pub struct DeleteProduction;

impl ProductionFactory for DeleteProduction {
    fn build(&self, parser: &mut Parser<'_>, window: Window) -> Result<NodeIndex> {
        let tokens = parser.tokens(&window);
        let cascade = tokens.get(1).map(|t| t.is(CASCADE)).unwrap_or(false);
        let start = window.start + if cascade { 2 } else { 1 };
        let content = start..window.end;
        if content.is_empty() {
            return Err(parser.syntax_error(
                NodeType::Extension,
                &window,
                "DELETE without content",
            ));
        }

        let child = parser.parse_content(content)?;
        let flags = if cascade {
            vec![CASCADE_FLAG.to_string()]
        } else {
            Vec::new()
        };
        Ok(parser.push_node(
            NodeKind::Extension {
                name: EXTENSION_NAME.to_string(),
                flags,
            },
            window,
            vec![child],
            Some(grammar::EXTENSION),
        ))
    }
}

/// Buffers the removal of every construct the content yields
pub struct DeleteEvaluator;

impl ExtensionEvaluator for DeleteEvaluator {
    fn evaluate(&self, interpreter: &mut Interpreter<'_>, node: NodeIndex) -> Result<QueryMatches> {
        let tree = interpreter.tree();
        let cascade = match tree.kind(node) {
            NodeKind::Extension { flags, .. } => flags.iter().any(|f| f == CASCADE_FLAG),
            other => {
                return Err(Error::Internal(format!(
                    "Delete evaluator called on {}",
                    other.node_type()
                )))
            }
        };
        let content = tree.child(node, 0)?;

        let mut seen = HashSet::new();
        let mut constructs = Vec::new();
        for value in interpreter.values(content)? {
            match value {
                Value::Construct(id) => {
                    if seen.insert(id) {
                        constructs.push(id);
                    }
                }
                Value::Null => {}
                other => {
                    return Err(Error::RuntimeEvaluation(format!(
                        "DELETE expects constructs, found {}",
                        other.type_name()
                    )))
                }
            }
        }

        let count = constructs.len();
        debug!("DELETE addresses {} construct(s), cascade: {}", count, cascade);
        if count > 0 {
            interpreter.buffer_removal(constructs, cascade);
        }
        Ok(QueryMatches::from_values(vec![Value::Integer(count as i64)]))
    }

    fn is_modification(&self) -> bool {
        true
    }
}

/// Builds `Extension { name: "insert" }` over the CTM content
pub struct InsertProduction;

impl ProductionFactory for InsertProduction {
    fn build(&self, parser: &mut Parser<'_>, window: Window) -> Result<NodeIndex> {
        let content = window.start + 1..window.end;
        if content.is_empty() {
            return Err(parser.syntax_error(
                NodeType::Extension,
                &window,
                "INSERT without content",
            ));
        }

        let child = parser.parse_content(content)?;
        Ok(parser.push_node(
            NodeKind::Extension {
                name: INSERT_EXTENSION_NAME.to_string(),
                flags: Vec::new(),
            },
            window,
            vec![child],
            Some(grammar::EXTENSION),
        ))
    }
}

/// Reads the CTM strings of the content and buffers their fragments
///
/// Yields the number of buffered fragments; the constructs a commit creates
/// end up in the execution statistics.
pub struct InsertEvaluator;

impl ExtensionEvaluator for InsertEvaluator {
    fn evaluate(&self, interpreter: &mut Interpreter<'_>, node: NodeIndex) -> Result<QueryMatches> {
        let tree = interpreter.tree();
        let content = tree.child(node, 0)?;

        let mut fragments = Vec::new();
        for value in interpreter.values(content)? {
            match value {
                Value::String(text) => fragments.extend(read_fragments(
                    &text,
                    interpreter.base_locator(),
                    tree.environment(),
                )?),
                Value::Null => {}
                other => {
                    return Err(Error::RuntimeEvaluation(format!(
                        "INSERT expects CTM text, found {}",
                        other.type_name()
                    )))
                }
            }
        }

        let count = fragments.len();
        debug!("INSERT adds {} fragment(s)", count);
        if count > 0 {
            interpreter.buffer_insertion(fragments);
        }
        Ok(QueryMatches::from_values(vec![Value::Integer(count as i64)]))
    }

    fn is_modification(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{Environment, FunctionRegistry, VALUE_COLUMN};
    use crate::parser::parse;
    use crate::registry::ExtensionRegistry;
    use tmql_core::ConstructId;
    use tmql_graph::{MemoryTopicMap, TopicMapStore};

    const BASE: &str = "http://example.org/";

    fn create_test_registry() -> ExtensionRegistry {
        let mut registry = ExtensionRegistry::new();
        assert!(registry.register_dialect(&ModificationDialect).unwrap());
        registry
    }

    fn create_test_map() -> (MemoryTopicMap, ConstructId, Vec<ConstructId>) {
        let map = MemoryTopicMap::new(BASE);
        let person = map
            .create_topic_by_subject_identifier(&format!("{}person", BASE))
            .unwrap();
        let people = (0..3)
            .map(|i| {
                let topic = map
                    .create_topic_by_subject_identifier(&format!("{}p{}", BASE, i))
                    .unwrap();
                map.add_type(topic, person).unwrap();
                topic
            })
            .collect();
        (map, person, people)
    }

    #[test]
    fn test_delete_parses_to_extension() {
        let registry = create_test_registry();
        let tree = parse("DELETE CASCADE // person", &registry, 128).unwrap();
        assert_eq!(tree.query_type(), Some(grammar::EXTENSION));

        let body = tree.child(tree.root(), 0).unwrap();
        assert_eq!(
            tree.kind(body),
            &NodeKind::Extension {
                name: "delete".to_string(),
                flags: vec!["CASCADE".to_string()],
            }
        );
        assert_eq!(tree.dialects(), &["modification".to_string()]);
    }

    #[test]
    fn test_delete_without_content() {
        let registry = create_test_registry();
        assert!(matches!(
            parse("DELETE CASCADE", &registry, 128),
            Err(Error::InvalidSyntax { .. })
        ));
    }

    #[test]
    fn test_delete_is_plain_text_without_dialect() {
        let registry = ExtensionRegistry::new();
        let tree = parse("DELETE // person", &registry, 128);
        assert!(tree.map(|t| t.query_type() != Some(grammar::EXTENSION)).unwrap_or(true));
    }

    #[test]
    fn test_evaluation_only_buffers() {
        let registry = create_test_registry();
        let functions = FunctionRegistry::new();
        let (map, person, _) = create_test_map();
        let tree = parse("DELETE // person", &registry, 128).unwrap();

        let mut interpreter = Interpreter::new(
            &tree,
            Environment {
                store: &map,
                registry: &registry,
                functions: &functions,
                parameters: &[],
                base_locator: "",
                transitive: true,
            },
        );
        let matches = interpreter.run().unwrap();
        assert_eq!(matches.values(VALUE_COLUMN), vec![Value::Integer(3)]);
        assert_eq!(map.instances_of(person).unwrap().len(), 3);
        assert_eq!(map.topics().unwrap().len(), 4);

        let changes = interpreter.take_changes();
        assert_eq!(changes.removals.len(), 1);
        assert!(!changes.removals[0].cascade);
        assert_eq!(changes.removals[0].constructs.len(), 3);
        assert!(changes.insertions.is_empty());
        assert!(interpreter.pending_changes().is_empty());
    }

    #[test]
    fn test_delete_of_scalars_fails() {
        let registry = create_test_registry();
        let functions = FunctionRegistry::new();
        let (map, _, _) = create_test_map();
        let tree = parse("DELETE \"text\"", &registry, 128).unwrap();

        let mut interpreter = Interpreter::new(
            &tree,
            Environment {
                store: &map,
                registry: &registry,
                functions: &functions,
                parameters: &[],
                base_locator: "",
                transitive: true,
            },
        );
        assert!(matches!(interpreter.run(), Err(Error::RuntimeEvaluation(_))));
        assert!(interpreter.pending_changes().is_empty());
    }

    fn interpret(
        map: &MemoryTopicMap,
        registry: &ExtensionRegistry,
        tree: &crate::ast::ExpressionTree,
    ) -> Result<(Vec<Value>, tmql_graph::ChangeSet)> {
        let functions = FunctionRegistry::new();
        let mut interpreter = Interpreter::new(
            tree,
            Environment {
                store: map,
                registry,
                functions: &functions,
                parameters: &[],
                base_locator: BASE,
                transitive: true,
            },
        );
        let matches = interpreter.run()?;
        Ok((matches.values(VALUE_COLUMN), interpreter.take_changes()))
    }

    #[test]
    fn test_insert_parses_to_extension() {
        let registry = create_test_registry();
        let tree = parse("INSERT ''' alice isa person . '''", &registry, 128).unwrap();
        assert_eq!(tree.query_type(), Some(grammar::EXTENSION));

        let body = tree.child(tree.root(), 0).unwrap();
        assert_eq!(
            tree.kind(body),
            &NodeKind::Extension {
                name: "insert".to_string(),
                flags: Vec::new(),
            }
        );
        assert!(matches!(
            parse("INSERT", &registry, 128),
            Err(Error::InvalidSyntax { .. })
        ));
    }

    #[test]
    fn test_insert_only_buffers() {
        let registry = create_test_registry();
        let (map, _, _) = create_test_map();
        let tree = parse(
            r#"INSERT ''' alice isa person ; - "Alice" . knows ( person : alice , person : p0 ) '''"#,
            &registry,
            128,
        )
        .unwrap();

        let (values, changes) = interpret(&map, &registry, &tree).unwrap();
        assert_eq!(values, vec![Value::Integer(2)]);
        assert_eq!(changes.insertions.len(), 2);
        assert!(changes.removals.is_empty());
        assert_eq!(map.topics().unwrap().len(), 4);
        assert!(map
            .topic_by_subject_identifier(&format!("{}alice", BASE))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_insert_of_malformed_text_fails() {
        let registry = create_test_registry();
        let (map, _, _) = create_test_map();
        for query in ["INSERT ''' alice isa '''", "INSERT 42"] {
            let tree = parse(query, &registry, 128).unwrap();
            assert!(
                matches!(interpret(&map, &registry, &tree), Err(Error::RuntimeEvaluation(_))),
                "{query}"
            );
        }
    }

    #[test]
    fn test_dialect_registers_once() {
        let mut registry = create_test_registry();
        assert!(!registry.register_dialect(&ModificationDialect).unwrap());
        assert!(registry.evaluator("delete").map(|e| e.is_modification()).unwrap_or(false));
        assert!(registry.evaluator("insert").map(|e| e.is_modification()).unwrap_or(false));
    }
}
