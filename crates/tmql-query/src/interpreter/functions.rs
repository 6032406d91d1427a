//! Function library
//!
//! Functions are registered under their full IRI. Every argument arrives as
//! the flattened sequence its expression evaluated to; string functions work
//! element-wise over the cartesian product of their arguments.

use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tmql_core::{psi, ConstructId, ConstructKind, Error, Result, Value};
use tmql_graph::TopicMapStore;
use tracing::debug;

/// What a function may use besides its arguments
pub struct FunctionContext<'a> {
    pub store: &'a dyn TopicMapStore,
    pub transitive: bool,
}

pub type FunctionImpl =
    Arc<dyn Fn(&FunctionContext<'_>, &[Vec<Value>]) -> Result<Vec<Value>> + Send + Sync>;

#[derive(Clone)]
pub struct FunctionDefinition {
    pub name: String,
    pub min_arity: usize,
    pub max_arity: usize,
    evaluator: FunctionImpl,
}

impl FunctionDefinition {
    fn expected(&self) -> String {
        if self.min_arity == self.max_arity {
            self.min_arity.to_string()
        } else {
            format!("{}..{}", self.min_arity, self.max_arity)
        }
    }
}

/// Full IRI of a built-in function
pub fn qualified(local: &str) -> String {
    format!("{}{}", psi::FN_PREFIX, local)
}

/// Name to evaluator map with arity checking
pub struct FunctionRegistry {
    functions: HashMap<String, FunctionDefinition>,
}

impl FunctionRegistry {
    /// Registry holding the built-in library
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_builtins();
        registry
    }

    pub fn empty() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    pub fn register<F>(
        &mut self,
        name: impl Into<String>,
        min_arity: usize,
        max_arity: usize,
        evaluator: F,
    ) -> Result<()>
    where
        F: Fn(&FunctionContext<'_>, &[Vec<Value>]) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.functions.contains_key(&name) {
            return Err(Error::ExtensionRegistry(format!(
                "Function '{}' is already registered",
                name
            )));
        }
        if min_arity > max_arity {
            return Err(Error::ExtensionRegistry(format!(
                "Function '{}' has minimum arity {} above maximum {}",
                name, min_arity, max_arity
            )));
        }
        debug!("Registered function {}", name);
        self.functions.insert(
            name.clone(),
            FunctionDefinition {
                name,
                min_arity,
                max_arity,
                evaluator: Arc::new(evaluator),
            },
        );
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&FunctionDefinition> {
        self.functions.get(name)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Check arity and evaluate
    pub fn call(
        &self,
        name: &str,
        context: &FunctionContext<'_>,
        arguments: &[Vec<Value>],
    ) -> Result<Vec<Value>> {
        let function = self
            .functions
            .get(name)
            .ok_or_else(|| Error::UnknownFunction(name.to_string()))?;
        if arguments.len() < function.min_arity || arguments.len() > function.max_arity {
            return Err(Error::Arity {
                function: name.to_string(),
                expected: function.expected(),
                found: arguments.len(),
            });
        }
        (function.evaluator)(context, arguments)
    }

    fn builtin<F>(&mut self, local: &str, min_arity: usize, max_arity: usize, evaluator: F)
    where
        F: Fn(&FunctionContext<'_>, &[Vec<Value>]) -> Result<Vec<Value>> + Send + Sync + 'static,
    {
        let name = qualified(local);
        self.functions.insert(
            name.clone(),
            FunctionDefinition {
                name,
                min_arity,
                max_arity,
                evaluator: Arc::new(evaluator),
            },
        );
    }

    fn register_builtins(&mut self) {
        // ========== Sequences ==========
        self.builtin("count", 1, 1, |_, args| {
            Ok(vec![Value::Integer(args[0].len() as i64)])
        });
        self.builtin("uniq", 1, 1, |_, args| {
            let mut seen = HashSet::new();
            Ok(args[0]
                .iter()
                .filter(|v| seen.insert((*v).clone()))
                .cloned()
                .collect())
        });

        // ========== Strings ==========
        self.builtin("string-length", 1, 1, |ctx, args| {
            let mut lengths = Vec::new();
            for value in &args[0] {
                if let Some(text) = text_of(ctx, value)? {
                    lengths.push(Value::Integer(text.chars().count() as i64));
                }
            }
            Ok(lengths)
        });
        self.builtin("string-concat", 2, 2, |ctx, args| {
            pairwise(ctx, &args[0], &args[1], |a, b| Ok(Value::String(format!("{}{}", a, b))))
        });
        self.builtin("substring", 3, 3, |ctx, args| {
            let mut parts = Vec::new();
            for value in &args[0] {
                let Some(text) = text_of(ctx, value)? else {
                    continue;
                };
                let chars: Vec<char> = text.chars().collect();
                for from in args[1].iter().filter_map(Value::as_integer) {
                    for to in args[2].iter().filter_map(Value::as_integer) {
                        let start = from.clamp(0, chars.len() as i64) as usize;
                        let end = to.clamp(start as i64, chars.len() as i64) as usize;
                        parts.push(Value::String(chars[start..end].iter().collect()));
                    }
                }
            }
            Ok(parts)
        });
        self.builtin("string-starts-with", 2, 2, |ctx, args| {
            pairwise(ctx, &args[0], &args[1], |a, b| Ok(Value::Boolean(a.starts_with(b))))
        });
        self.builtin("string-ends-with", 2, 2, |ctx, args| {
            pairwise(ctx, &args[0], &args[1], |a, b| Ok(Value::Boolean(a.ends_with(b))))
        });
        self.builtin("string-contains", 2, 2, |ctx, args| {
            pairwise(ctx, &args[0], &args[1], |a, b| Ok(Value::Boolean(a.contains(b))))
        });
        self.builtin("regexp", 2, 2, |ctx, args| {
            pairwise(ctx, &args[0], &args[1], |a, pattern| {
                let regex = Regex::new(pattern).map_err(|e| {
                    Error::RuntimeEvaluation(format!("Invalid regular expression: {}", e))
                })?;
                Ok(Value::Boolean(regex.is_match(a)))
            })
        });
        self.builtin("string-less-than", 2, 2, |ctx, args| {
            pairwise(ctx, &args[0], &args[1], |a, b| Ok(Value::Boolean(a < b)))
        });
        self.builtin("string-less-equal-than", 2, 2, |ctx, args| {
            pairwise(ctx, &args[0], &args[1], |a, b| Ok(Value::Boolean(a <= b)))
        });
        self.builtin("string-greater-than", 2, 2, |ctx, args| {
            pairwise(ctx, &args[0], &args[1], |a, b| Ok(Value::Boolean(a > b)))
        });
        self.builtin("string-greater-equal-than", 2, 2, |ctx, args| {
            pairwise(ctx, &args[0], &args[1], |a, b| Ok(Value::Boolean(a >= b)))
        });
        self.builtin("has-datatype", 1, 1, |ctx, args| {
            let mut datatypes = Vec::new();
            for value in &args[0] {
                let datatype = match value {
                    Value::Construct(id) => ctx.store.datatype_of(*id)?,
                    Value::String(_) => Some(psi::XSD_STRING.to_string()),
                    Value::Integer(_) => Some(psi::XSD_INTEGER.to_string()),
                    Value::Decimal(_) => Some(psi::XSD_DECIMAL.to_string()),
                    Value::Boolean(_) => Some(psi::XSD_BOOLEAN.to_string()),
                    Value::Iri(_) => Some(psi::XSD_ANY_URI.to_string()),
                    Value::Null | Value::Sequence(_) => None,
                };
                datatypes.extend(datatype.map(Value::Iri));
            }
            Ok(datatypes)
        });

        // ========== Topic map ==========
        self.builtin("best-label", 1, 1, |ctx, args| {
            let mut labels = Vec::new();
            for value in &args[0] {
                if let Value::Construct(id) = value {
                    labels.push(Value::String(best_label(ctx.store, *id)?));
                }
            }
            Ok(labels)
        });
        self.builtin("get-topic-types", 0, 0, |ctx, _| {
            let mut types = Vec::new();
            for topic in ctx.store.topics()? {
                types.extend(ctx.store.types_of(topic)?);
            }
            Ok(distinct(types))
        });
        self.builtin("get-name-types", 0, 0, |ctx, _| {
            let mut types = Vec::new();
            for topic in ctx.store.topics()? {
                for name in ctx.store.names_of(topic)? {
                    types.extend(ctx.store.type_of(name)?);
                }
            }
            Ok(distinct(types))
        });
        self.builtin("get-occurrence-types", 0, 0, |ctx, _| {
            let mut types = Vec::new();
            for topic in ctx.store.topics()? {
                for occurrence in ctx.store.occurrences_of(topic)? {
                    types.extend(ctx.store.type_of(occurrence)?);
                }
            }
            Ok(distinct(types))
        });
        self.builtin("get-association-types", 0, 0, |ctx, _| {
            let mut types = Vec::new();
            for association in ctx.store.associations()? {
                types.extend(ctx.store.type_of(association)?);
            }
            Ok(distinct(types))
        });
        self.builtin("get-role-types", 0, 0, |ctx, _| {
            let mut types = Vec::new();
            for association in ctx.store.associations()? {
                for role in ctx.store.roles_of(association)? {
                    types.extend(ctx.store.type_of(role)?);
                }
            }
            Ok(distinct(types))
        });
        self.builtin("get-supertypes", 0, 1, |ctx, args| {
            hierarchy(ctx, args, |store, topic, transitive| {
                if transitive {
                    store.transitive_supertypes(topic)
                } else {
                    store.supertypes_of(topic)
                }
            })
        });
        self.builtin("get-subtypes", 0, 1, |ctx, args| {
            hierarchy(ctx, args, |store, topic, transitive| {
                if transitive {
                    store.transitive_subtypes(topic)
                } else {
                    store.subtypes_of(topic)
                }
            })
        });
        self.builtin("topics-by-subjectidentifier", 1, 1, |ctx, args| {
            lookup(&args[0], |iri| ctx.store.topic_by_subject_identifier(iri))
        });
        self.builtin("topics-by-subjectlocator", 1, 1, |ctx, args| {
            lookup(&args[0], |iri| ctx.store.topic_by_subject_locator(iri))
        });
        self.builtin("topics-by-itemidentifier", 1, 1, |ctx, args| {
            lookup(&args[0], |iri| ctx.store.construct_by_item_identifier(iri))
        });
        self.builtin("get-topics-by-name-value", 1, 1, |ctx, args| {
            let mut topics = Vec::new();
            for literal in args[0].iter().filter_map(Value::atomic_string) {
                for construct in ctx.store.constructs_by_value(&literal)? {
                    if ctx.store.kind_of(construct)? == Some(ConstructKind::Name) {
                        topics.extend(ctx.store.parent_of(construct)?);
                    }
                }
            }
            Ok(distinct(topics))
        });
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Text of a literal or of a construct carrying a value
fn text_of(ctx: &FunctionContext<'_>, value: &Value) -> Result<Option<String>> {
    match value {
        Value::Construct(id) => ctx.store.value_of(*id),
        other => Ok(other.atomic_string()),
    }
}

fn pairwise<F>(ctx: &FunctionContext<'_>, left: &[Value], right: &[Value], f: F) -> Result<Vec<Value>>
where
    F: Fn(&str, &str) -> Result<Value>,
{
    let mut right_texts = Vec::with_capacity(right.len());
    for value in right {
        right_texts.extend(text_of(ctx, value)?);
    }
    let mut results = Vec::new();
    for value in left {
        let Some(a) = text_of(ctx, value)? else {
            continue;
        };
        for b in &right_texts {
            results.push(f(&a, b)?);
        }
    }
    Ok(results)
}

fn distinct(ids: Vec<ConstructId>) -> Vec<Value> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| seen.insert(*id))
        .map(Value::Construct)
        .collect()
}

fn lookup<F>(iris: &[Value], find: F) -> Result<Vec<Value>>
where
    F: Fn(&str) -> Result<Option<ConstructId>>,
{
    let mut found = Vec::new();
    for iri in iris {
        if let Some(iri) = iri.as_str() {
            found.extend(find(iri)?.map(Value::Construct));
        }
    }
    Ok(found)
}

fn hierarchy<F>(ctx: &FunctionContext<'_>, args: &[Vec<Value>], step: F) -> Result<Vec<Value>>
where
    F: Fn(&dyn TopicMapStore, ConstructId, bool) -> Result<Vec<ConstructId>>,
{
    let topics: Vec<ConstructId> = match args.first() {
        Some(values) => values.iter().filter_map(Value::as_construct).collect(),
        None => ctx.store.topics()?,
    };
    let mut related = Vec::new();
    for topic in topics {
        related.extend(step(ctx.store, topic, ctx.transitive)?);
    }
    Ok(distinct(related))
}

/// Default-typed unscoped name, then any name, then an identifier
fn best_label(store: &dyn TopicMapStore, id: ConstructId) -> Result<String> {
    if store.kind_of(id)? != Some(ConstructKind::Topic) {
        return Ok(store.value_of(id)?.unwrap_or_else(|| id.to_string()));
    }
    let default_type = store.topic_by_subject_identifier(psi::TOPIC_NAME)?;
    let names = store.names_of(id)?;
    for name in &names {
        if default_type.is_some()
            && store.type_of(*name)? == default_type
            && store.scope_of(*name)?.is_empty()
        {
            if let Some(value) = store.value_of(*name)? {
                return Ok(value);
            }
        }
    }
    if let Some(name) = names.first() {
        if let Some(value) = store.value_of(*name)? {
            return Ok(value);
        }
    }
    let identifiers = [
        store.subject_identifiers(id)?,
        store.subject_locators(id)?,
        store.item_identifiers(id)?,
    ];
    Ok(identifiers
        .into_iter()
        .flatten()
        .next()
        .unwrap_or_else(|| id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmql_graph::MemoryTopicMap;

    fn create_test_map() -> MemoryTopicMap {
        MemoryTopicMap::new("http://example.org/")
    }

    fn call(map: &MemoryTopicMap, local: &str, args: &[Vec<Value>]) -> Result<Vec<Value>> {
        let registry = FunctionRegistry::new();
        let ctx = FunctionContext {
            store: map,
            transitive: true,
        };
        registry.call(&qualified(local), &ctx, args)
    }

    #[test]
    fn test_count_and_arity() {
        let map = create_test_map();
        let values = vec![Value::from(1), Value::from(2)];
        assert_eq!(call(&map, "count", &[values.clone()]).unwrap(), vec![Value::Integer(2)]);
        match call(&map, "count", &[values.clone(), values]).unwrap_err() {
            Error::Arity { expected, found, .. } => {
                assert_eq!(expected, "1");
                assert_eq!(found, 2);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(matches!(
            call(&map, "no-such-function", &[]),
            Err(Error::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_string_functions() {
        let map = create_test_map();
        let text = vec![Value::from("topic maps")];
        assert_eq!(call(&map, "string-length", &[text.clone()]).unwrap(), vec![Value::Integer(10)]);
        assert_eq!(
            call(&map, "substring", &[text.clone(), vec![Value::from(0)], vec![Value::from(5)]]).unwrap(),
            vec![Value::from("topic")]
        );
        assert_eq!(
            call(&map, "substring", &[text.clone(), vec![Value::from(6)], vec![Value::from(99)]]).unwrap(),
            vec![Value::from("maps")]
        );
        assert_eq!(
            call(&map, "string-starts-with", &[text.clone(), vec![Value::from("topic")]]).unwrap(),
            vec![Value::Boolean(true)]
        );
        assert_eq!(
            call(&map, "string-concat", &[text, vec![Value::from("!")]]).unwrap(),
            vec![Value::from("topic maps!")]
        );
        assert_eq!(
            call(&map, "string-less-than", &[vec![Value::from("a")], vec![Value::from("b")]]).unwrap(),
            vec![Value::Boolean(true)]
        );
    }

    #[test]
    fn test_regexp_reports_bad_pattern() {
        let map = create_test_map();
        assert!(matches!(
            call(&map, "regexp", &[vec![Value::from("x")], vec![Value::from("(")]]),
            Err(Error::RuntimeEvaluation(_))
        ));
        assert_eq!(
            call(&map, "regexp", &[vec![Value::from("abc")], vec![Value::from("^a")]]).unwrap(),
            vec![Value::Boolean(true)]
        );
    }

    #[test]
    fn test_type_hierarchy_functions() {
        let map = create_test_map();
        let animal = map.create_topic().unwrap();
        let dog = map.create_topic().unwrap();
        let puppy = map.create_topic().unwrap();
        map.add_supertype(dog, animal).unwrap();
        map.add_supertype(puppy, dog).unwrap();

        let all = call(&map, "get-supertypes", &[]).unwrap();
        assert_eq!(all, vec![Value::Construct(animal), Value::Construct(dog)]);
        let of_puppy = call(&map, "get-supertypes", &[vec![Value::Construct(puppy)]]).unwrap();
        assert_eq!(of_puppy, vec![Value::Construct(dog), Value::Construct(animal)]);
        let subtypes = call(&map, "get-subtypes", &[vec![Value::Construct(animal)]]).unwrap();
        assert_eq!(subtypes.len(), 2);
    }

    #[test]
    fn test_best_label_prefers_default_name() {
        let map = create_test_map();
        let topic = map.create_topic_by_subject_identifier("http://example.org/t").unwrap();
        assert_eq!(
            call(&map, "best-label", &[vec![Value::Construct(topic)]]).unwrap(),
            vec![Value::from("http://example.org/t")]
        );
        let other_type = map.create_topic().unwrap();
        map.create_name(topic, Some(other_type), "Other").unwrap();
        map.create_name(topic, None, "Default").unwrap();
        assert_eq!(
            call(&map, "best-label", &[vec![Value::Construct(topic)]]).unwrap(),
            vec![Value::from("Default")]
        );
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = FunctionRegistry::new();
        registry
            .register("urn:fn:double", 1, 1, |_, args| {
                Ok(args[0]
                    .iter()
                    .filter_map(Value::as_integer)
                    .map(|i| Value::Integer(i * 2))
                    .collect())
            })
            .unwrap();
        assert!(registry.register("urn:fn:double", 1, 1, |_, _| Ok(vec![])).is_err());
        let map = create_test_map();
        let ctx = FunctionContext { store: &map, transitive: true };
        assert_eq!(
            registry.call("urn:fn:double", &ctx, &[vec![Value::from(21)]]).unwrap(),
            vec![Value::Integer(42)]
        );
    }
}
