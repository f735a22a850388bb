//! End-to-end serialize and deserialize through one factory.

mod common;

use carapace_engine::{Bytes, ErrorKind, SerializerFactory};
use common::*;
use pretty_assertions::assert_eq;
use std::collections::{BTreeMap, BTreeSet, HashMap};

// =============================================================================
// COMPOSITES
// =============================================================================

#[test]
fn person_round_trips() {
    let factory = SerializerFactory::new();
    let person = alice();
    assert_eq!(round_trip(&factory, &person).unwrap(), person);
}

#[test]
fn absent_optional_round_trips() {
    let factory = SerializerFactory::new();
    let mut person = alice();
    person.age = None;
    person.tags.clear();
    assert_eq!(round_trip(&factory, &person).unwrap(), person);
}

#[test]
fn schema_is_cached_per_type() {
    let factory = SerializerFactory::new();
    let first = factory.build_schema::<Person>().unwrap();
    let second = factory.build_schema::<Person>().unwrap();
    assert!(std::sync::Arc::ptr_eq(&first, &second));
}

#[test]
fn schema_lists_nested_composites() {
    let factory = SerializerFactory::new();
    let schema = factory.build_schema::<Person>().unwrap();
    assert_eq!(schema.root_model().unwrap().type_name, "app.Person");
    assert!(schema.fingerprint_of("app.Address").is_some());
}

#[test]
fn fingerprint_is_stable_across_factories() {
    let a = SerializerFactory::new().fingerprint::<Person>().unwrap();
    let b = SerializerFactory::new().fingerprint::<Person>().unwrap();
    assert_eq!(a, b);
    assert_ne!(a, SerializerFactory::new().fingerprint::<Address>().unwrap());
}

#[test]
fn identical_values_encode_identically() {
    let factory = SerializerFactory::new();
    let context = context();
    let a = factory.serialize(&alice(), &context).unwrap();
    let b = factory.serialize(&alice(), &context).unwrap();
    assert_eq!(a.as_slice(), b.as_slice());
}

// =============================================================================
// ENUMS AND PRIMITIVES
// =============================================================================

#[test]
fn enum_constants_round_trip() {
    let factory = SerializerFactory::new();
    for color in [Color::Red, Color::Green, Color::Blue] {
        assert_eq!(round_trip(&factory, &color).unwrap(), color);
    }
}

#[test]
fn primitive_roots_round_trip() {
    let factory = SerializerFactory::new();
    assert_eq!(round_trip(&factory, &i64::MIN).unwrap(), i64::MIN);
    assert_eq!(round_trip(&factory, &u64::MAX).unwrap(), u64::MAX);
    assert_eq!(round_trip(&factory, &-0.5f64).unwrap(), -0.5);
    assert_eq!(round_trip(&factory, &'λ').unwrap(), 'λ');
    assert!(round_trip(&factory, &true).unwrap());
    assert_eq!(round_trip(&factory, &"héllo".to_string()).unwrap(), "héllo");
}

#[test]
fn bytes_round_trip() {
    let factory = SerializerFactory::new();
    let bytes = Bytes(vec![0, 1, 2, 255]);
    assert_eq!(round_trip(&factory, &bytes).unwrap(), bytes);
}

// =============================================================================
// COLLECTIONS
// =============================================================================

#[test]
fn maps_and_sets_round_trip() {
    let factory = SerializerFactory::new();

    let mut by_city: BTreeMap<String, Vec<Address>> = BTreeMap::new();
    by_city.insert("Springfield".into(), vec![alice().address]);
    by_city.insert("Nowhere".into(), Vec::new());
    assert_eq!(round_trip(&factory, &by_city).unwrap(), by_city);

    let colors: BTreeSet<Color> = [Color::Blue, Color::Red].into_iter().collect();
    assert_eq!(round_trip(&factory, &colors).unwrap(), colors);

    let mut counts: HashMap<u32, Option<String>> = HashMap::new();
    counts.insert(1, Some("one".into()));
    counts.insert(2, None);
    assert_eq!(round_trip(&factory, &counts).unwrap(), counts);
}

#[test]
fn arrays_round_trip() {
    let factory = SerializerFactory::new();
    let grid = [[1u8, 2, 3], [4, 5, 6]];
    assert_eq!(round_trip(&factory, &grid).unwrap(), grid);
}

#[test]
fn root_type_must_match() {
    let factory = SerializerFactory::new();
    let context = context();
    let bytes = factory.serialize(&alice(), &context).unwrap();
    let err = factory.deserialize::<Address>(bytes.as_slice(), &context).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EvolutionIncompatible);
}

// =============================================================================
// COVARIANT ELEMENTS
// =============================================================================

#[test]
fn figures_keep_their_runtime_type() {
    let factory = figure_factory();
    let drawing = Drawing {
        title: "shapes".into(),
        figures: vec![circle(Circle { radius: 1.0 }), square(Square { side: 2.0 })],
    };
    let back = round_trip(&factory, &drawing).unwrap();
    assert_eq!(back.title, "shapes");
    assert_eq!(back.figures.len(), 2);
    assert_eq!(
        back.figures[0].as_any().downcast_ref::<Circle>(),
        Some(&Circle { radius: 1.0 })
    );
    assert_eq!(back.figures[1].area(), 4.0);
}

#[test]
fn unregistered_subtype_is_not_readable() {
    let writer = figure_factory();
    let context = context();
    let drawing = Drawing {
        title: "one".into(),
        figures: vec![square(Square { side: 1.0 })],
    };
    let bytes = writer.serialize(&drawing, &context).unwrap();

    let err = SerializerFactory::new()
        .deserialize::<Drawing>(bytes.as_slice(), &context)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSerializable);
    assert!(err.to_string().contains("geo.Figure"), "{err}");
}
