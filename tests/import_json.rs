mod common;

use common::Fixture;
use item_import::ImportError;
use item_import::id::ItemId;
use item_import::import::{CHUNK_SIZE, Format, Importer, Strategy};
use item_import::memory::DenyUpdates;
use item_import::schema::{Field, FieldType};
use item_import::value::Value;

#[test]
fn upsert_infers_fields_and_inserts_both_records() {
    let fixture = Fixture::empty();
    let supplied = ItemId::new();
    let body = format!(r#"[{{"id":"{supplied}","name":"A"}},{{"name":"B"}}]"#);

    let outcome = fixture.importer().import(
        &fixture.request(Format::Json, Strategy::Upsert, true),
        body.as_bytes(),
    );

    assert!(outcome.is_ok(), "unexpected error: {:?}", outcome.error);
    let result = outcome.result;
    assert_eq!(result.total, 2);
    assert_eq!(result.inserted, 2);
    assert_eq!(result.updated, 0);
    assert_eq!(result.ignored, 0);
    assert_eq!(result.new_fields.len(), 1);
    assert_eq!(result.new_fields[0].key, "name");
    assert_eq!(result.new_fields[0].field_type, FieldType::Text);

    // The inferred field was persisted once, before any chunk.
    let schema = fixture.current_schema();
    assert!(schema.field_by_key("name").is_some());

    // The supplied ID was adopted so later runs can address the item.
    let adopted = fixture.stores.item(supplied).expect("item with supplied id");
    let name_field = schema.field_by_key("name").unwrap();
    assert_eq!(
        adopted.field(name_field.id, None).map(|f| &f.value),
        Some(&Value::Text("A".to_string()))
    );
    assert_eq!(fixture.stores.item_count(), 2);
}

#[test]
fn insert_never_updates_a_pre_existing_item() {
    let fixture = Fixture::empty();
    let existing = ItemId::new();
    fixture.seed_item(existing);
    let body = format!(r#"[{{"id":"{existing}","name":"A"}}]"#);

    let outcome = fixture.importer().import(
        &fixture.request(Format::Json, Strategy::Insert, true),
        body.as_bytes(),
    );

    assert!(outcome.is_ok());
    assert_eq!(outcome.result.total, 1);
    assert_eq!(outcome.result.ignored, 1);
    assert_eq!(outcome.result.inserted, 0);
    let untouched = fixture.stores.item(existing).unwrap();
    assert!(untouched.fields.is_empty());
    assert_eq!(untouched.updated_by, None);
}

#[test]
fn update_never_creates_a_new_item() {
    let fixture = Fixture::empty();
    let body = format!(r#"[{{"id":"{}","name":"A"}},{{"name":"B"}}]"#, ItemId::new());

    let outcome = fixture.importer().import(
        &fixture.request(Format::Json, Strategy::Update, true),
        body.as_bytes(),
    );

    assert!(outcome.is_ok());
    assert_eq!(outcome.result.ignored, 2);
    assert_eq!(outcome.result.updated, 0);
    assert_eq!(fixture.stores.item_count(), 0);
}

#[test]
fn counters_are_jointly_exhaustive() {
    let fixture = Fixture::empty();
    let existing = ItemId::new();
    fixture.seed_item(existing);
    let body = format!(
        r#"[{{"id":"{existing}","name":"updated"}},{{"name":"fresh"}},{{"id":"{}","name":"absent"}}]"#,
        ItemId::new()
    );

    // Upsert: one update, two inserts (an unresolved supplied ID inserts).
    let outcome = fixture.importer().import(
        &fixture.request(Format::Json, Strategy::Upsert, true),
        body.as_bytes(),
    );
    assert!(outcome.is_ok());
    let result = outcome.result;
    assert_eq!(result.updated, 1);
    assert_eq!(result.inserted, 2);
    assert_eq!(result.ignored, 0);
    assert_eq!(
        result.inserted + result.updated + result.ignored,
        result.total
    );
}

#[test]
fn malformed_id_aborts_the_import_with_nothing_committed() {
    let fixture = Fixture::empty();
    let body = br#"[{"id":"not-an-id","name":"A"}]"#;

    let outcome = fixture.importer().import(
        &fixture.request(Format::Json, Strategy::Upsert, true),
        &body[..],
    );

    assert!(matches!(outcome.error, Some(ImportError::InvalidItemId(_))));
    assert_eq!(outcome.result.total, 0);
    assert_eq!(fixture.stores.item_count(), 0);
}

#[test]
fn a_fatal_error_preserves_the_committed_prefix() {
    let fixture = Fixture::empty();
    let mut records: Vec<String> = (0..CHUNK_SIZE)
        .map(|i| format!(r#"{{"name":"r{i}"}}"#))
        .collect();
    records.push(r#"{"id":"broken","name":"tail"}"#.to_string());
    let body = format!("[{}]", records.join(","));

    let outcome = fixture.importer().import(
        &fixture.request(Format::Json, Strategy::Insert, true),
        body.as_bytes(),
    );

    // Chunk 1 committed; the malformed record in chunk 2 stopped the run.
    assert!(matches!(outcome.error, Some(ImportError::InvalidItemId(_))));
    assert_eq!(outcome.result.total, CHUNK_SIZE);
    assert_eq!(outcome.result.inserted, CHUNK_SIZE);
    assert_eq!(fixture.stores.item_count(), CHUNK_SIZE);
}

#[test]
fn json_value_not_matching_a_declared_type_is_a_hard_error() {
    let fixture =
        Fixture::with_fields(vec![Field::new("score", FieldType::Number).unwrap()]);
    let body = br#"[{"score":"twelve"}]"#;

    let outcome = fixture.importer().import(
        &fixture.request(Format::Json, Strategy::Insert, false),
        &body[..],
    );

    assert!(matches!(outcome.error, Some(ImportError::InvalidValue(ref key)) if key == "score"));
    assert_eq!(fixture.stores.item_count(), 0);
}

#[test]
fn unknown_field_without_schema_mutation_is_rejected() {
    let fixture = Fixture::empty();
    let body = br#"[{"name":"A"}]"#;

    let outcome = fixture.importer().import(
        &fixture.request(Format::Json, Strategy::Insert, false),
        &body[..],
    );

    assert!(matches!(outcome.error, Some(ImportError::FieldNotFound(ref key)) if key == "name"));
    assert_eq!(fixture.stores.item_count(), 0);
}

#[test]
fn denied_update_aborts_the_chunk() {
    let fixture = Fixture::empty();
    let existing = ItemId::new();
    fixture.seed_item(existing);
    let importer = Importer::new(
        &fixture.stores,
        &fixture.stores,
        &fixture.stores,
        &DenyUpdates,
    );
    let body = format!(r#"[{{"id":"{existing}"}}]"#);

    let outcome = importer.import(
        &fixture.request(Format::Json, Strategy::Update, false),
        body.as_bytes(),
    );

    assert!(matches!(
        outcome.error,
        Some(ImportError::PermissionDenied(id)) if id == existing
    ));
    assert_eq!(outcome.result.total, 0);
    let untouched = fixture.stores.item(existing).unwrap();
    assert_eq!(untouched.updated_by, None);
}

#[test]
fn unique_fields_reject_duplicates_against_the_store_and_within_a_chunk() {
    let slug = Field::new("slug", FieldType::Text).unwrap().unique();
    let slug_id = slug.id;
    let fixture = Fixture::with_fields(vec![slug]);

    let holder = ItemId::new();
    let mut seeded = fixture.seed_item(holder);
    seeded.apply_field(slug_id, Value::Text("hello".into()), None);
    fixture.stores.seed_item(seeded);

    let against_store = fixture.importer().import(
        &fixture.request(Format::Json, Strategy::Insert, false),
        &br#"[{"slug":"hello"}]"#[..],
    );
    assert!(matches!(
        against_store.error,
        Some(ImportError::DuplicateValue(id)) if id == slug_id
    ));

    let within_chunk = fixture.importer().import(
        &fixture.request(Format::Json, Strategy::Insert, false),
        &br#"[{"slug":"fresh"},{"slug":"fresh"}]"#[..],
    );
    assert!(matches!(
        within_chunk.error,
        Some(ImportError::DuplicateValue(_))
    ));
    // The failed chunk rolled back whole: not even the first record landed.
    assert_eq!(fixture.stores.item_count(), 1);
}

#[test]
fn reference_fields_maintain_the_forward_index() {
    let parent = Field::new("parent", FieldType::Reference).unwrap();
    let parent_id = parent.id;
    let fixture = Fixture::with_fields(vec![parent]);
    let target = ItemId::new();
    fixture.seed_item(target);

    let child = ItemId::new();
    let body = format!(r#"[{{"id":"{child}","parent":"{target}"}}]"#);
    let outcome = fixture.importer().import(
        &fixture.request(Format::Json, Strategy::Upsert, false),
        body.as_bytes(),
    );

    assert!(outcome.is_ok(), "unexpected error: {:?}", outcome.error);
    let saved = fixture.stores.item(child).unwrap();
    assert!(saved.references.contains(&target));
    assert_eq!(
        saved.field(parent_id, None).and_then(|f| f.value.as_reference()),
        Some(target)
    );
}
