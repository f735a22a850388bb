use carapace_model::{
    EnumTransform, FieldSpec, ModelError, PrimitiveType, Schema, TransformsSchema, TypeModel,
    TypeRef,
};
use pretty_assertions::assert_eq;

fn point() -> TypeModel {
    TypeModel::composite(
        "geo.Point",
        vec![
            FieldSpec::new("x", PrimitiveType::F64),
            FieldSpec::new("y", PrimitiveType::F64),
        ],
    )
}

#[test]
fn insert_deduplicates_identical_entries() {
    let mut schema = Schema::new();
    assert!(schema.insert(point()).unwrap());
    assert!(!schema.insert(point()).unwrap());
    assert_eq!(schema.len(), 1);
}

#[test]
fn insert_rejects_conflicting_shape() {
    let mut schema = Schema::new();
    schema.insert(point()).unwrap();
    let other = TypeModel::composite("geo.Point", vec![FieldSpec::new("x", PrimitiveType::I32)]);
    assert_eq!(
        schema.insert(other),
        Err(ModelError::ConflictingDefinition("geo.Point".into()))
    );
}

#[test]
fn from_entries_rejects_duplicates() {
    let err = Schema::from_entries(vec![point(), point()]).unwrap_err();
    assert_eq!(err, ModelError::DuplicateType("geo.Point".into()));
}

#[test]
fn entries_keep_insertion_order() {
    let mut schema = Schema::new();
    schema.insert(point()).unwrap();
    schema
        .insert(TypeModel::enumeration("geo.Axis", vec!["X".into(), "Y".into()]))
        .unwrap();
    let names: Vec<&str> = schema.iter().map(|m| m.type_name.as_str()).collect();
    assert_eq!(names, vec!["geo.Point", "geo.Axis"]);
    assert_eq!(schema.index_of("geo.Axis"), Some(1));
    assert_eq!(schema.entry(0).unwrap().type_name, "geo.Point");
}

#[test]
fn check_references_finds_dangling_names() {
    let line = TypeModel::composite(
        "geo.Line",
        vec![
            FieldSpec::new("from", TypeRef::named("geo.Point")),
            FieldSpec::new("to", TypeRef::named("geo.Point")),
        ],
    );
    let incomplete = Schema::from_entries(vec![line.clone()]).unwrap();
    assert!(matches!(
        incomplete.check_references(),
        Err(ModelError::DanglingReference { ref from, ref to }) if from == "geo.Line" && to == "geo.Point"
    ));

    let complete = Schema::from_entries(vec![line, point()]).unwrap();
    assert!(complete.check_references().is_ok());
}

#[test]
fn any_bounds_are_not_schema_references() {
    let holder = TypeModel::composite(
        "geo.Holder",
        vec![FieldSpec::new("shape", TypeRef::any("geo.Shape"))],
    );
    let schema = Schema::from_entries(vec![holder]).unwrap();
    assert!(schema.check_references().is_ok());
}

#[test]
fn mark_proxy_requires_existing_entry() {
    let mut schema = Schema::new();
    schema.insert(point()).unwrap();
    schema.mark_proxy("geo.Point", "geo.NativePoint").unwrap();
    assert_eq!(
        schema.get("geo.Point").unwrap().proxies.as_deref(),
        Some("geo.NativePoint")
    );
    assert_eq!(
        schema.mark_proxy("geo.Nope", "x"),
        Err(ModelError::UnknownType("geo.Nope".into()))
    );
}

#[test]
fn field_defaults_follow_constructor() {
    assert!(!FieldSpec::new("a", PrimitiveType::I32).has_default());
    assert!(FieldSpec::nullable("a", PrimitiveType::I32).has_default());
    let defaulted = FieldSpec::defaulted("a", PrimitiveType::I32);
    assert!(defaulted.has_default());
    assert!(!defaulted.nullable);
}

#[test]
fn transforms_merge_keeps_existing() {
    let mut local = TransformsSchema::new();
    local.insert(
        "app.Color",
        vec![EnumTransform::Rename {
            from: "RED".into(),
            to: "CRIMSON".into(),
        }],
    );
    let mut remote = TransformsSchema::new();
    remote.insert(
        "app.Color",
        vec![EnumTransform::Default {
            new: "BLUE".into(),
            old: "GREEN".into(),
        }],
    );
    remote.insert("app.Size", vec![]);
    local.merge(&remote);

    assert_eq!(local.len(), 1);
    assert_eq!(
        local.get("app.Color"),
        &[EnumTransform::Rename {
            from: "RED".into(),
            to: "CRIMSON".into()
        }]
    );
    assert!(local.get("app.Size").is_empty());
}
