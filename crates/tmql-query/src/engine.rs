//! Query engine facade
//!
//! The [`Engine`] owns the extension registry, the function library and a
//! cache of compiled expression trees. Compiling yields a [`PreparedQuery`]
//! that shares its tree with every other compilation of the same text;
//! parameter bindings live on the prepared query and never touch the tree.

use crate::ast::{ExpressionTree, NodeKind, NodeType};
use crate::config::EngineConfig;
use crate::interpreter::{Environment, FunctionContext, FunctionRegistry, Interpreter};
use crate::parser::parse;
use crate::registry::{Dialect, ExtensionRegistry, ProductionEntry, TokenMatcher};
use crate::results::{ExecutionStats, ReductionMode, ResultProcessor, ResultSet};
use crate::sql::{SqlStatement, SqlTranslator};
use crate::token::TokenKind;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tmql_core::{Error, Result, Value};
use tmql_graph::{CommitSummary, RelationalSchema, TopicMapStore};
use tracing::{debug, info, trace};

/// Compiled trees keyed by query text, oldest evicted first
struct TreeCache {
    capacity: usize,
    trees: HashMap<String, Arc<ExpressionTree>>,
    order: VecDeque<String>,
}

impl TreeCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            trees: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, text: &str) -> Option<Arc<ExpressionTree>> {
        self.trees.get(text).cloned()
    }

    /// Insert unless present; returns the tree now cached for the text
    fn insert(&mut self, text: &str, tree: Arc<ExpressionTree>) -> Arc<ExpressionTree> {
        if let Some(existing) = self.trees.get(text) {
            return existing.clone();
        }
        while self.trees.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.trees.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(text.to_string());
        self.trees.insert(text.to_string(), tree.clone());
        tree
    }

    fn clear(&mut self) {
        self.trees.clear();
        self.order.clear();
    }

    fn len(&self) -> usize {
        self.trees.len()
    }
}

struct EngineInner {
    config: EngineConfig,
    registry: RwLock<ExtensionRegistry>,
    functions: RwLock<FunctionRegistry>,
    cache: Mutex<TreeCache>,
}

/// Shared handle to a query engine
///
/// Cloning is cheap; all clones see the same registry and cache.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine with the built-in function library
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        info!(
            "Created query engine (cache capacity {}, transitive types: {})",
            config.cache_capacity, config.transitive_types
        );
        Ok(Self {
            inner: Arc::new(EngineInner {
                cache: Mutex::new(TreeCache::new(config.cache_capacity)),
                registry: RwLock::new(ExtensionRegistry::new()),
                functions: RwLock::new(FunctionRegistry::new()),
                config,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // ========== Registration ==========

    /// Add a token matcher; false if its kind is already known
    pub fn register_token(&self, matcher: Arc<dyn TokenMatcher>) -> Result<bool> {
        let registered = self.write_registry()?.register_token(matcher);
        self.invalidate()?;
        Ok(registered)
    }

    pub fn register_production(&self, entry: ProductionEntry) -> Result<()> {
        self.write_registry()?.register_production(entry);
        self.invalidate()
    }

    /// Register a dialect; false if it was registered before
    pub fn register_dialect(&self, dialect: &dyn Dialect) -> Result<bool> {
        let registered = self.write_registry()?.register_dialect(dialect)?;
        if registered {
            info!("Registered dialect {}", dialect.name());
            self.invalidate()?;
        }
        Ok(registered)
    }

    /// Add a function to the library
    pub fn register_function<F>(
        &self,
        name: impl Into<String>,
        min_arity: usize,
        max_arity: usize,
        evaluator: F,
    ) -> Result<()>
    where
        F: Fn(&FunctionContext<'_>, &[Vec<Value>]) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        self.write_functions()?
            .register(name, min_arity, max_arity, evaluator)
    }

    pub fn is_token_registered(&self, kind: TokenKind) -> Result<bool> {
        Ok(self.read_registry()?.tokens().is_registered(kind))
    }

    // ========== Compilation ==========

    /// Compile query text, reusing a cached tree for identical text
    pub fn compile(&self, text: &str) -> Result<PreparedQuery> {
        let tree = self.cached_tree(text)?;
        self.check_modifications(&tree)?;
        Ok(PreparedQuery::new(self.clone(), tree))
    }

    /// Compile and execute without touching the cache
    pub fn run(&self, store: &dyn TopicMapStore, text: &str) -> Result<ResultSet> {
        let tree = Arc::new(self.parse(text)?);
        self.check_modifications(&tree)?;
        PreparedQuery::new(self.clone(), tree).execute(store)
    }

    /// Translate query text into one SQL statement
    pub fn translate(&self, text: &str, schema: &RelationalSchema) -> Result<SqlStatement> {
        self.compile(text)?.translate(schema)
    }

    /// Number of cached trees
    pub fn cached_trees(&self) -> Result<usize> {
        Ok(self.lock_cache()?.len())
    }

    fn cached_tree(&self, text: &str) -> Result<Arc<ExpressionTree>> {
        if self.inner.config.cache_capacity == 0 {
            return Ok(Arc::new(self.parse(text)?));
        }
        if let Some(tree) = self.lock_cache()?.get(text) {
            trace!("Tree cache hit");
            return Ok(tree);
        }
        trace!("Tree cache miss");
        let tree = Arc::new(self.parse(text)?);
        Ok(self.lock_cache()?.insert(text, tree))
    }

    fn parse(&self, text: &str) -> Result<ExpressionTree> {
        let registry = self.read_registry()?;
        let tree = parse(text, &registry, self.inner.config.max_recursion_depth)?;
        debug!(
            "Compiled query of {} bytes: {} tokens, {} nodes",
            text.len(),
            tree.tokens().len(),
            tree.len()
        );
        Ok(tree)
    }

    fn check_modifications(&self, tree: &ExpressionTree) -> Result<()> {
        if self.inner.config.allow_modifications {
            return Ok(());
        }
        let registry = self.read_registry()?;
        for node in tree.find(|kind| matches!(kind, NodeKind::Extension { .. })) {
            let NodeKind::Extension { name, .. } = tree.kind(node) else {
                continue;
            };
            let modifying = registry
                .evaluator(name)
                .map(|evaluator| evaluator.is_modification())
                .unwrap_or(false);
            if modifying {
                let literals: Vec<String> =
                    tree.tokens_of(node).iter().map(|t| t.to_string()).collect();
                return Err(Error::invalid_syntax(
                    NodeType::Extension,
                    &literals,
                    format!("modifying extension '{}' is disabled", name),
                ));
            }
        }
        Ok(())
    }

    /// Drop cached trees compiled against an older registry
    fn invalidate(&self) -> Result<()> {
        self.lock_cache()?.clear();
        Ok(())
    }

    // ========== Locks ==========

    fn read_registry(&self) -> Result<RwLockReadGuard<'_, ExtensionRegistry>> {
        self.inner
            .registry
            .read()
            .map_err(|_| Error::Internal("Failed to acquire registry lock".to_string()))
    }

    fn write_registry(&self) -> Result<RwLockWriteGuard<'_, ExtensionRegistry>> {
        self.inner
            .registry
            .write()
            .map_err(|_| Error::Internal("Failed to acquire registry lock".to_string()))
    }

    fn read_functions(&self) -> Result<RwLockReadGuard<'_, FunctionRegistry>> {
        self.inner
            .functions
            .read()
            .map_err(|_| Error::Internal("Failed to acquire function lock".to_string()))
    }

    fn write_functions(&self) -> Result<RwLockWriteGuard<'_, FunctionRegistry>> {
        self.inner
            .functions
            .write()
            .map_err(|_| Error::Internal("Failed to acquire function lock".to_string()))
    }

    fn lock_cache(&self) -> Result<MutexGuard<'_, TreeCache>> {
        self.inner
            .cache
            .lock()
            .map_err(|_| Error::Internal("Failed to acquire tree cache lock".to_string()))
    }
}

/// A compiled query plus its parameter bindings
pub struct PreparedQuery {
    engine: Engine,
    tree: Arc<ExpressionTree>,
    parameters: Vec<Option<Value>>,
    processor: ResultProcessor,
}

impl PreparedQuery {
    fn new(engine: Engine, tree: Arc<ExpressionTree>) -> Self {
        let mode = if engine.inner.config.auto_reduction {
            ReductionMode::TwoDimensional
        } else {
            ReductionMode::NDimensional
        };
        Self {
            parameters: vec![None; tree.parameter_count()],
            processor: ResultProcessor::new(mode),
            engine,
            tree,
        }
    }

    /// Bind the placeholder at `index` (counted from 0, left to right)
    pub fn bind(&mut self, index: usize, value: impl Into<Value>) -> Result<&mut Self> {
        let count = self.parameters.len();
        let slot = self
            .parameters
            .get_mut(index)
            .ok_or(Error::ParameterIndex { index, count })?;
        *slot = Some(value.into());
        Ok(self)
    }

    pub fn clear_bindings(&mut self) {
        self.parameters.iter_mut().for_each(|slot| *slot = None);
    }

    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }

    /// The shared compiled tree
    pub fn tree(&self) -> &Arc<ExpressionTree> {
        &self.tree
    }

    /// Name a result column for every later execution
    pub fn set_alias(&self, alias: &str, column: usize) -> Result<()> {
        self.processor.set_alias(alias, column)
    }

    /// Evaluate against a store
    ///
    /// Changes buffered by modifying extensions are committed as one unit
    /// only after evaluation and reduction succeeded.
    pub fn execute(&self, store: &dyn TopicMapStore) -> Result<ResultSet> {
        let started = Instant::now();
        if let Some(index) = self.parameters.iter().position(Option::is_none) {
            return Err(Error::UnboundParameter(index));
        }

        let config = &self.engine.inner.config;
        let registry = self.engine.read_registry()?;
        let functions = self.engine.read_functions()?;
        let mut interpreter = Interpreter::new(
            &self.tree,
            Environment {
                store,
                registry: &registry,
                functions: &functions,
                parameters: &self.parameters,
                base_locator: &config.base_locator,
                transitive: config.transitive_types,
            },
        );
        let matches = interpreter.run()?;
        let mut result = self.processor.reduce(&matches)?;
        if config.unify_results {
            result.unify();
        }

        let changes = interpreter.take_changes();
        let committed = if changes.is_empty() {
            CommitSummary::default()
        } else {
            store.commit(&changes)?
        };
        if committed.removed > 0 || committed.inserted > 0 {
            info!(
                "Committed changes: {} construct(s) removed, {} created",
                committed.removed, committed.inserted
            );
        }

        result.stats = ExecutionStats {
            tuples_produced: matches.len() as u64,
            rows_returned: result.len() as u64,
            constructs_removed: committed.removed as u64,
            constructs_inserted: committed.inserted as u64,
            elapsed_micros: started.elapsed().as_micros() as u64,
        };
        debug!(
            "Executed query: {} tuple(s), {} row(s) in {}us",
            result.stats.tuples_produced, result.stats.rows_returned, result.stats.elapsed_micros
        );
        Ok(result)
    }

    /// Translate into SQL with the current bindings
    pub fn translate(&self, schema: &RelationalSchema) -> Result<SqlStatement> {
        let statement = SqlTranslator::new(&self.tree, schema)
            .with_base_locator(self.engine.inner.config.base_locator.clone())
            .with_parameters(&self.parameters)
            .translate()?;
        debug!("Translated query into SQL: {}", statement);
        Ok(statement)
    }

    /// Query text with every bound placeholder replaced by a literal
    pub fn to_query_string(&self) -> String {
        let text = self.tree.text();
        let mut out = String::with_capacity(text.len());
        let mut copied = 0;
        let placeholders = self
            .tree
            .tokens()
            .iter()
            .filter(|t| t.kind == TokenKind::Parameter);
        for (token, binding) in placeholders.zip(&self.parameters) {
            let Some(value) = binding else {
                continue;
            };
            out.push_str(&text[copied..token.position]);
            out.push_str(&render_literal(value));
            copied = token.position + token.literal.len();
        }
        out.push_str(&text[copied..]);
        out
    }
}

/// Query-language literal for a bound value
fn render_literal(value: &Value) -> String {
    match value {
        Value::Construct(id) => format!("\"{}\" << id", id),
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Iri(iri) => format!("\"{}\" << si", iri),
        Value::Sequence(items) => {
            let rendered: Vec<String> = items.iter().map(render_literal).collect();
            format!("( {} )", rendered.join(" ++ "))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::ModificationDialect;
    use tmql_core::ConstructId;
    use tmql_graph::MemoryTopicMap;

    const BASE: &str = "http://example.org/";

    fn create_test_engine() -> Engine {
        Engine::new(EngineConfig::new(BASE)).unwrap()
    }

    fn create_test_map() -> (MemoryTopicMap, ConstructId) {
        let map = MemoryTopicMap::new(BASE);
        let topic = map
            .create_topic_by_subject_identifier(&format!("{}myTopic", BASE))
            .unwrap();
        let kind = map
            .create_topic_by_subject_identifier(&format!("{}kind", BASE))
            .unwrap();
        map.create_name(topic, Some(kind), "first").unwrap();
        map.create_name(topic, Some(kind), "second").unwrap();
        (map, topic)
    }

    #[test]
    fn test_compile_reuses_tree() {
        let engine = create_test_engine();
        let a = engine.compile("myTopic >> characteristics").unwrap();
        let b = engine.compile("myTopic >> characteristics").unwrap();
        assert!(Arc::ptr_eq(a.tree(), b.tree()));
        assert_eq!(engine.cached_trees().unwrap(), 1);
    }

    #[test]
    fn test_disabled_cache() {
        let engine = Engine::new(EngineConfig::for_development(BASE)).unwrap();
        let a = engine.compile("myTopic").unwrap();
        let b = engine.compile("myTopic").unwrap();
        assert!(!Arc::ptr_eq(a.tree(), b.tree()));
        assert_eq!(engine.cached_trees().unwrap(), 0);
    }

    #[test]
    fn test_cache_evicts_oldest() {
        let engine = Engine::new(EngineConfig::new(BASE).cache_capacity(2)).unwrap();
        let first = engine.compile("a").unwrap();
        engine.compile("b").unwrap();
        engine.compile("c").unwrap();
        assert_eq!(engine.cached_trees().unwrap(), 2);
        let again = engine.compile("a").unwrap();
        assert!(!Arc::ptr_eq(first.tree(), again.tree()));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = EngineConfig::new(BASE);
        config.max_recursion_depth = 0;
        assert!(matches!(Engine::new(config), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_bind_and_execute() {
        let engine = create_test_engine();
        let (map, topic) = create_test_map();
        let mut query = engine.compile("? >> characteristics").unwrap();
        assert_eq!(query.parameter_count(), 1);
        assert!(matches!(query.execute(&map), Err(Error::UnboundParameter(0))));
        assert!(matches!(
            query.bind(1, Value::Null),
            Err(Error::ParameterIndex { index: 1, count: 1 })
        ));

        query.bind(0, Value::Construct(topic)).unwrap();
        let result = query.execute(&map).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.stats.rows_returned, 2);
        assert_eq!(result.stats.tuples_produced, 2);

        query.clear_bindings();
        assert!(matches!(query.execute(&map), Err(Error::UnboundParameter(0))));
    }

    #[test]
    fn test_run_does_not_cache() {
        let engine = create_test_engine();
        let (map, _) = create_test_map();
        let result = engine.run(&map, "myTopic >> characteristics >> atomify").unwrap();
        let mut values: Vec<Value> = result.first_column();
        values.sort_by(|a, b| a.sort_cmp(b));
        assert_eq!(values, vec![Value::from("first"), Value::from("second")]);
        assert_eq!(engine.cached_trees().unwrap(), 0);
    }

    #[test]
    fn test_unify_results() {
        let engine = Engine::new(EngineConfig::new(BASE).unify()).unwrap();
        let (map, _) = create_test_map();
        let result = engine
            .run(&map, "myTopic >> characteristics >> types")
            .unwrap();
        assert_eq!(result.len(), 1);
    }

    #[test]
    fn test_to_query_string() {
        let engine = create_test_engine();
        let mut query = engine.compile("? >> characteristics [ ? ]").unwrap();
        assert_eq!(query.to_query_string(), "? >> characteristics [ ? ]");
        query.bind(1, 3).unwrap();
        assert_eq!(query.to_query_string(), "? >> characteristics [ 3 ]");
        query.bind(0, "say \"hi\"").unwrap();
        assert_eq!(
            query.to_query_string(),
            "\"say \\\"hi\\\"\" >> characteristics [ 3 ]"
        );
    }

    #[test]
    fn test_delete_commits_after_success() {
        let engine = create_test_engine();
        assert!(engine.register_dialect(&ModificationDialect).unwrap());
        assert!(!engine.register_dialect(&ModificationDialect).unwrap());
        let (map, topic) = create_test_map();

        let result = engine.run(&map, "DELETE myTopic >> characteristics").unwrap();
        assert_eq!(result.first_column(), vec![Value::Integer(2)]);
        assert_eq!(result.stats.constructs_removed, 2);
        assert!(map.names_of(topic).unwrap().is_empty());
    }

    #[test]
    fn test_read_only_engine_rejects_delete() {
        let engine = Engine::new(EngineConfig::strict(BASE)).unwrap();
        engine.register_dialect(&ModificationDialect).unwrap();
        let (map, topic) = create_test_map();

        assert!(matches!(
            engine.compile("DELETE myTopic >> characteristics"),
            Err(Error::InvalidSyntax { .. })
        ));
        assert!(engine.run(&map, "DELETE myTopic").is_err());
        assert_eq!(map.names_of(topic).unwrap().len(), 2);
    }

    #[test]
    fn test_read_only_engine_rejects_insert() {
        let engine = Engine::new(EngineConfig::strict(BASE)).unwrap();
        engine.register_dialect(&ModificationDialect).unwrap();
        let (map, _) = create_test_map();
        let before = map.topics().unwrap().len();

        assert!(matches!(
            engine.compile("INSERT ''' alice . '''"),
            Err(Error::InvalidSyntax { .. })
        ));
        assert_eq!(map.topics().unwrap().len(), before);
    }

    #[test]
    fn test_registration_clears_cache() {
        let engine = create_test_engine();
        engine.compile("myTopic").unwrap();
        assert_eq!(engine.cached_trees().unwrap(), 1);
        engine.register_dialect(&ModificationDialect).unwrap();
        assert_eq!(engine.cached_trees().unwrap(), 0);
        assert!(engine.is_token_registered(crate::dialect::DELETE).unwrap());
    }

    #[test]
    fn test_registered_function() {
        let engine = create_test_engine();
        engine
            .register_function("http://example.org/fn/twice", 1, 1, |_, args| {
                Ok(args[0]
                    .iter()
                    .filter_map(Value::as_integer)
                    .map(|i| Value::Integer(i * 2))
                    .collect())
            })
            .unwrap();
        let (map, _) = create_test_map();
        let result = engine
            .run(&map, "%prefix my http://example.org/fn/ my:twice ( 21 )")
            .unwrap();
        assert_eq!(result.first_column(), vec![Value::Integer(42)]);
    }
}
