//! Property tests for filters, reduction and axis navigation

mod common;

use common::{create_test_engine, create_test_map, topic, BASE};
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::HashSet;
use tmql_core::{psi, ConstructId, Direction, Value};
use tmql_graph::{MemoryTopicMap, TopicMapStore};
use tmql_query::interpreter::{Navigator, TypeArgument};
use tmql_query::{Axis, QueryMatches, ReductionMode, ResultProcessor};

const TOPICS: usize = 6;

/// Axes whose backward direction takes constructs
const CONSTRUCT_AXES: [Axis; 11] = [
    Axis::Instances,
    Axis::Types,
    Axis::Supertypes,
    Axis::Subtypes,
    Axis::Typed,
    Axis::Characteristics,
    Axis::Scope,
    Axis::Players,
    Axis::Roles,
    Axis::Traverse,
    Axis::Reifier,
];

/// Axes whose forward direction yields literals
const LITERAL_AXES: [Axis; 4] = [Axis::Locators, Axis::Indicators, Axis::Item, Axis::Id];

#[derive(Debug, Clone)]
struct Shape {
    typing: Vec<(usize, usize)>,
    supertypes: Vec<(usize, usize)>,
    /// topic, name type, theme, variant theme
    names: Vec<(usize, Option<usize>, Option<usize>, Option<usize>)>,
    /// topic, occurrence type, theme
    occurrences: Vec<(usize, usize, Option<usize>)>,
    /// association type, (role type, player) pairs, theme
    associations: Vec<(usize, Vec<(usize, usize)>, Option<usize>)>,
    /// reifiable construct, reifying topic
    reifiers: Vec<(usize, usize)>,
    locators: Vec<usize>,
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    let index = || 0..TOPICS;
    (
        prop::collection::vec((index(), index()), 0..8),
        prop::collection::vec((index(), index()), 0..5),
        prop::collection::vec(
            (index(), prop::option::of(index()), prop::option::of(index()), prop::option::of(index())),
            0..6,
        ),
        prop::collection::vec((index(), index(), prop::option::of(index())), 0..6),
        prop::collection::vec(
            (
                index(),
                prop::collection::vec((index(), index()), 1..4),
                prop::option::of(index()),
            ),
            0..5,
        ),
        prop::collection::vec((0usize..16, index()), 0..4),
        prop::collection::vec(index(), 0..3),
    )
        .prop_map(
            |(typing, supertypes, names, occurrences, associations, reifiers, locators)| Shape {
                typing,
                supertypes,
                names,
                occurrences,
                associations,
                reifiers,
                locators,
            },
        )
}

fn build(shape: &Shape) -> MemoryTopicMap {
    let map = create_test_map();
    let topics: Vec<ConstructId> = (0..TOPICS).map(|i| topic(&map, &format!("t{}", i))).collect();

    for (instance, kind) in &shape.typing {
        if instance != kind {
            map.add_type(topics[*instance], topics[*kind]).unwrap();
        }
    }
    // subtype below supertype keeps the hierarchy acyclic
    for (a, b) in &shape.supertypes {
        if a != b {
            map.add_supertype(topics[*a.min(b)], topics[*a.max(b)]).unwrap();
        }
    }

    let mut reifiable = Vec::new();
    for (i, (owner, name_type, theme, variant_theme)) in shape.names.iter().enumerate() {
        let name = map
            .create_name(topics[*owner], name_type.map(|t| topics[t]), &format!("n{}", i % 3))
            .unwrap();
        if let Some(theme) = theme {
            map.add_theme(name, topics[*theme]).unwrap();
        }
        if let Some(theme) = variant_theme {
            map.create_variant(name, &format!("v{}", i), psi::XSD_STRING, &[topics[*theme]])
                .unwrap();
        }
        reifiable.push(name);
    }
    for (i, (owner, kind, theme)) in shape.occurrences.iter().enumerate() {
        let occurrence = map
            .create_occurrence(topics[*owner], topics[*kind], &format!("o{}", i % 2), psi::XSD_STRING)
            .unwrap();
        if let Some(theme) = theme {
            map.add_theme(occurrence, topics[*theme]).unwrap();
        }
        reifiable.push(occurrence);
    }
    for (i, (kind, roles, theme)) in shape.associations.iter().enumerate() {
        let association = map.create_association(topics[*kind]).unwrap();
        for (role_type, player) in roles {
            map.create_role(association, topics[*role_type], topics[*player])
                .unwrap();
        }
        if let Some(theme) = theme {
            map.add_theme(association, topics[*theme]).unwrap();
        }
        map.add_item_identifier(association, &format!("{}assoc/{}", BASE, i))
            .unwrap();
        reifiable.push(association);
    }

    let mut reified = HashSet::new();
    let mut reifying = HashSet::new();
    for (construct, reifier) in &shape.reifiers {
        let Some(&construct) = reifiable.get(*construct) else {
            continue;
        };
        if reified.insert(construct) && reifying.insert(*reifier) {
            map.set_reifier(construct, Some(topics[*reifier])).unwrap();
        }
    }
    for owner in shape.locators.iter().collect::<HashSet<_>>() {
        map.add_subject_locator(topics[*owner], &format!("{}subject/{}", BASE, owner))
            .unwrap();
    }
    map
}

/// Every construct below the topic map
fn universe(map: &MemoryTopicMap) -> Vec<ConstructId> {
    let mut all = Vec::new();
    for t in map.topics().unwrap() {
        all.push(t);
        for characteristic in map.characteristics_of(t).unwrap() {
            all.push(characteristic);
            all.extend(map.variants_of(characteristic).unwrap());
        }
    }
    for association in map.associations().unwrap() {
        all.push(association);
        all.extend(map.roles_of(association).unwrap());
    }
    all
}

fn type_arguments(map: &MemoryTopicMap) -> Vec<Option<TypeArgument>> {
    let mut arguments = vec![
        None,
        Some(TypeArgument::default()),
        Some(TypeArgument::from_values(&[Value::Iri(psi::NAME.to_string())])),
    ];
    for t in map.topics().unwrap() {
        arguments.push(Some(TypeArgument::from_values(&[Value::Construct(t)])));
    }
    arguments
}

/// `y` in forward(`x`) exactly when `x` in backward(`y`)
fn check_inverse(
    nav: &Navigator<'_>,
    axis: Axis,
    constructs: &[ConstructId],
    argument: Option<&TypeArgument>,
) -> Result<(), TestCaseError> {
    for &x in constructs {
        let input = Value::Construct(x);
        for y in nav.navigate(axis, Direction::Forward, &input, argument).unwrap() {
            let back = nav.navigate(axis, Direction::Backward, &y, argument).unwrap();
            prop_assert!(back.contains(&input), "{} >> {} yields {} but not back", x, axis, y);
        }
        for y in nav.navigate(axis, Direction::Backward, &input, argument).unwrap() {
            let forth = nav.navigate(axis, Direction::Forward, &y, argument).unwrap();
            prop_assert!(forth.contains(&input), "{} << {} yields {} but not forth", x, axis, y);
        }
    }
    Ok(())
}

fn map_with_names(count: usize) -> tmql_graph::MemoryTopicMap {
    let map = create_test_map();
    let subject = topic(&map, "myTopic");
    for i in 0..count {
        map.create_name(subject, None, &format!("n{}", i)).unwrap();
    }
    map
}

fn cell_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        (0i64..5).prop_map(Value::Integer),
        "[a-c]{1,2}".prop_map(Value::String),
        prop::collection::vec((0i64..3).prop_map(Value::Integer), 2..4).prop_map(Value::Sequence),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn index_filter_yields_at_most_one(count in 0usize..20, index in -5i64..30) {
        let engine = create_test_engine();
        let map = map_with_names(count);
        let result = engine
            .run(&map, &format!("myTopic >> characteristics [ {} ]", index))
            .unwrap();
        let inside = index >= 0 && (index as usize) < count;
        prop_assert!(result.len() <= 1);
        prop_assert_eq!(result.len() == 1, inside);
    }

    #[test]
    fn range_filter_size_is_clamped(count in 0usize..20, low in -5i64..30, high in -5i64..30) {
        let engine = create_test_engine();
        let map = map_with_names(count);
        let result = engine
            .run(&map, &format!("myTopic >> characteristics [ {} .. {} ]", low, high))
            .unwrap();
        let clamp = |v: i64| v.clamp(0, count as i64) as usize;
        prop_assert_eq!(result.len(), clamp(high).saturating_sub(clamp(low)));
    }

    #[test]
    fn unify_is_idempotent(rows in prop::collection::vec(cell_strategy(), 0..30)) {
        let matches = QueryMatches::from_values(rows);
        let mut once = ResultProcessor::default().reduce(&matches).unwrap();
        once.unify();
        let mut twice = once.clone();
        twice.unify();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn reduction_is_stable(rows in prop::collection::vec(cell_strategy(), 0..30), nested in any::<bool>()) {
        let mode = if nested { ReductionMode::NDimensional } else { ReductionMode::TwoDimensional };
        let matches = QueryMatches::from_values(rows);
        let processor = ResultProcessor::new(mode);
        let first = processor.reduce(&matches).unwrap();
        let second = processor.reduce(&matches).unwrap();
        prop_assert_eq!(first.rows(), second.rows());
    }

    #[test]
    fn instances_round_trip_contains_the_type(
        typing in prop::collection::vec((0usize..6, 0usize..6), 1..12)
    ) {
        let engine = create_test_engine();
        let map = create_test_map();
        let topics: Vec<_> = (0..6).map(|i| topic(&map, &format!("t{}", i))).collect();
        for (instance, kind) in &typing {
            if instance != kind {
                map.add_type(topics[*instance], topics[*kind]).unwrap();
            }
        }

        for (i, t) in topics.iter().enumerate() {
            let instances = engine.run(&map, &format!("t{} >> instances", i)).unwrap();
            if instances.is_empty() {
                continue;
            }
            let back = engine
                .run(&map, &format!("t{} >> instances << instances", i))
                .unwrap();
            prop_assert!(back.first_column().contains(&Value::Construct(*t)));
        }
    }

    #[test]
    fn backward_inverts_forward_on_every_axis(shape in shape_strategy(), transitive in any::<bool>()) {
        let map = build(&shape);
        let nav = Navigator::new(&map, transitive);
        let constructs = universe(&map);

        for argument in type_arguments(&map) {
            for axis in CONSTRUCT_AXES {
                check_inverse(&nav, axis, &constructs, argument.as_ref())?;
            }
        }
        for axis in LITERAL_AXES {
            for &x in &constructs {
                let input = Value::Construct(x);
                for literal in nav.navigate(axis, Direction::Forward, &input, None).unwrap() {
                    let back = nav.navigate(axis, Direction::Backward, &literal, None).unwrap();
                    prop_assert_eq!(back, vec![input.clone()]);
                }
            }
        }
        for &x in &constructs {
            let input = Value::Construct(x);
            for literal in nav.navigate(Axis::Atomify, Direction::Forward, &input, None).unwrap() {
                let back = nav.navigate(Axis::Atomify, Direction::Backward, &literal, None).unwrap();
                prop_assert!(back.contains(&input));
            }
        }
    }
}
