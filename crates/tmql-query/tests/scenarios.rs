//! End-to-end scenarios against the in-memory topic map

mod common;

use common::{create_test_engine, create_test_map, topic, BASE};
use std::collections::HashSet;
use std::sync::Arc;
use tmql_core::{psi, ConstructId, Error, Value};
use tmql_graph::{RelationalSchema, TopicMapStore};
use tmql_query::{Engine, EngineConfig};

fn constructs(values: Vec<Value>) -> HashSet<ConstructId> {
    values.iter().filter_map(Value::as_construct).collect()
}

#[test]
fn characteristics_of_one_type_among_many() {
    let engine = create_test_engine();
    let map = create_test_map();
    let subject = topic(&map, "myTopic");
    let x = topic(&map, "x");
    let other = topic(&map, "other");

    let mut expected = HashSet::new();
    for i in 0..50 {
        map.create_name(subject, None, &format!("name {}", i)).unwrap();
        let wanted = map
            .create_occurrence(subject, x, &format!("x {}", i), psi::XSD_STRING)
            .unwrap();
        expected.insert(wanted);
        map.create_occurrence(subject, other, &format!("other {}", i), psi::XSD_STRING)
            .unwrap();
    }
    assert_eq!(map.characteristics_of(subject).unwrap().len(), 150);

    let result = engine.run(&map, "myTopic >> characteristics x").unwrap();
    assert_eq!(result.len(), 50);
    assert!(result.rows().iter().all(|row| row.len() == 1));
    assert_eq!(constructs(result.first_column()), expected);
}

#[test]
fn at_least_one_qualifying_instance() {
    let engine = create_test_engine();
    let map = create_test_map();
    let team = topic(&map, "team");
    let lead = topic(&map, "lead");
    let member = topic(&map, "member");
    map.add_type(lead, team).unwrap();
    map.add_type(member, team).unwrap();
    map.create_name(lead, None, "lead").unwrap();
    map.create_name(member, None, "member").unwrap();

    let result = engine
        .run(
            &map,
            r#"WHERE AT LEAST 1 $i IN $t >> instances SATISFIES $i >> characteristics >> atomify == "lead" RETURN $t"#,
        )
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.first_column(), vec![Value::Construct(team)]);
}

#[test]
fn prepared_query_over_ten_thousand_bindings() {
    let engine = create_test_engine();
    let map = create_test_map();

    let mut expected = Vec::with_capacity(10_000);
    for i in 0..10_000 {
        let t = map.create_topic().unwrap();
        map.create_name(t, None, &format!("topic {}", i)).unwrap();
        if i % 3 == 0 {
            let kind = topic(&map, "kind");
            map.create_occurrence(t, kind, &i.to_string(), psi::XSD_INTEGER)
                .unwrap();
        }
        let characteristics: HashSet<ConstructId> =
            map.characteristics_of(t).unwrap().into_iter().collect();
        expected.push((t, characteristics));
    }

    let mut query = engine.compile("? >> characteristics").unwrap();
    let tree = Arc::clone(query.tree());
    for (t, characteristics) in &expected {
        query.bind(0, *t).unwrap();
        let result = query.execute(&map).unwrap();
        assert_eq!(&constructs(result.first_column()), characteristics);
    }

    assert!(Arc::ptr_eq(&tree, query.tree()));
    let again = engine.compile("? >> characteristics").unwrap();
    assert!(Arc::ptr_eq(&tree, again.tree()));
    assert_eq!(engine.cached_trees().unwrap(), 1);
}

#[test]
fn failed_evaluation_removes_nothing() {
    let engine = create_test_engine();
    let map = create_test_map();
    let subject = topic(&map, "myTopic");
    map.create_name(subject, None, "kept").unwrap();

    let error = engine
        .run(&map, r#"DELETE myTopic >> characteristics [ . >> atomify =~ "(" ]"#)
        .unwrap_err();
    assert!(error.is_evaluation_error());
    assert_eq!(map.names_of(subject).unwrap().len(), 1);
}

#[test]
fn delete_in_use_topic_needs_cascade() {
    let engine = create_test_engine();
    let map = create_test_map();
    let person = topic(&map, "person");
    let alice = topic(&map, "alice");
    map.add_type(alice, person).unwrap();

    assert!(matches!(
        engine.run(&map, "DELETE person"),
        Err(Error::InvalidGraphOperation(_))
    ));
    assert!(map.contains(person).unwrap());

    let result = engine.run(&map, "DELETE CASCADE person").unwrap();
    assert_eq!(result.first_column(), vec![Value::Integer(1)]);
    assert_eq!(result.stats.constructs_removed, 1);
    assert!(!map.contains(person).unwrap());
    assert!(map.types_of(alice).unwrap().is_empty());
}

#[test]
fn deletes_of_one_query_commit_together() {
    let engine = create_test_engine();
    let map = create_test_map();
    let person = topic(&map, "person");
    let a = topic(&map, "a");
    let p = topic(&map, "p");
    map.add_type(p, person).unwrap();
    let before = map.topics().unwrap().len();

    assert!(matches!(
        engine.run(&map, "{ DELETE a } ++ { DELETE person }"),
        Err(Error::InvalidGraphOperation(_))
    ));
    assert!(map.contains(a).unwrap());
    assert!(map.contains(person).unwrap());
    assert_eq!(map.topics().unwrap().len(), before);

    let result = engine
        .run(&map, "{ DELETE a } ++ { DELETE CASCADE person }")
        .unwrap();
    assert_eq!(result.stats.constructs_removed, 2);
    assert!(!map.contains(a).unwrap());
    assert!(!map.contains(person).unwrap());
    assert!(map.contains(p).unwrap());
}

#[test]
fn insert_creates_topics_from_ctm() {
    let engine = create_test_engine();
    let map = create_test_map();
    let person = topic(&map, "person");

    let result = engine
        .run(&map, r#"INSERT ''' alice isa person ; - "Alice" . '''"#)
        .unwrap();
    assert_eq!(result.first_column(), vec![Value::Integer(1)]);
    // alice, the default name type and the name
    assert_eq!(result.stats.constructs_inserted, 3);

    let alice = map
        .topic_by_subject_identifier(&format!("{}alice", BASE))
        .unwrap()
        .unwrap();
    assert_eq!(map.types_of(alice).unwrap(), vec![person]);
    let names = engine
        .run(&map, "alice >> characteristics >> atomify")
        .unwrap();
    assert_eq!(names.first_column(), vec![Value::from("Alice")]);

    let again = engine
        .run(&map, r#"INSERT ''' alice isa person . '''"#)
        .unwrap();
    assert_eq!(again.stats.constructs_inserted, 0);
}

#[test]
fn insert_and_delete_of_one_query_commit_together() {
    let engine = create_test_engine();
    let map = create_test_map();
    let person = topic(&map, "person");
    let before = map.topics().unwrap().len();

    assert!(matches!(
        engine.run(
            &map,
            "{ DELETE CASCADE person } ++ { INSERT ''' bob isa person . ''' }"
        ),
        Err(Error::InvalidGraphOperation(_))
    ));
    assert!(map.contains(person).unwrap());
    assert_eq!(map.topics().unwrap().len(), before);

    let result = engine
        .run(
            &map,
            "{ DELETE CASCADE person } ++ { INSERT ''' bob isa employee . ''' }",
        )
        .unwrap();
    assert_eq!(result.stats.constructs_removed, 1);
    assert_eq!(result.stats.constructs_inserted, 2);
    assert!(!map.contains(person).unwrap());
}

#[test]
fn reduction_modes() {
    let map = create_test_map();
    let subject = topic(&map, "myTopic");
    map.create_name(subject, None, "a").unwrap();
    map.create_name(subject, None, "b").unwrap();
    let query = "FOR $t IN myTopic RETURN $t , $t >> characteristics >> atomify AS label";

    let flat = create_test_engine().run(&map, query).unwrap();
    assert_eq!(flat.len(), 2);
    assert_eq!(flat.width(), 2);
    assert_eq!(flat.column_index_for_alias("label"), Some(1));
    assert_eq!(flat.value(0, "label"), Some(&Value::from("a")));

    let nested = Engine::new(EngineConfig::new(BASE).n_dimensional())
        .unwrap()
        .run(&map, query)
        .unwrap();
    assert_eq!(nested.len(), 1);
    assert_eq!(
        nested.value(0, "label"),
        Some(&Value::Sequence(vec![Value::from("a"), Value::from("b")]))
    );
}

#[test]
fn translation_through_the_engine() {
    let engine = create_test_engine();
    let schema = RelationalSchema::new();

    let statement = engine.translate("// tm:subject", &schema).unwrap();
    assert_eq!(statement.sql, "SELECT a0.id AS value FROM topics AS a0");

    assert!(matches!(
        engine.translate("FOR $x IN // tm:subject RETURN $x", &schema),
        Err(Error::UnsupportedTranslation(_))
    ));
}

#[test]
fn compile_errors_surface_before_execution() {
    let engine = create_test_engine();
    let error = engine.compile("FOR $t // x RETURN $t").err().unwrap();
    assert!(error.is_compile_error());

    let map = create_test_map();
    assert!(matches!(
        engine.run(&map, "? >> characteristics"),
        Err(Error::UnboundParameter(0))
    ));
}

#[test]
fn query_string_of_bound_construct() {
    let engine = create_test_engine();
    let map = create_test_map();
    let subject = topic(&map, "myTopic");

    let mut query = engine.compile("? >> characteristics").unwrap();
    query.bind(0, subject).unwrap();
    assert_eq!(
        query.to_query_string(),
        format!("\"{}\" << id >> characteristics", subject)
    );
}
