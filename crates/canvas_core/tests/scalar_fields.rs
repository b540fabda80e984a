use canvas_core::keys::{TITLE, WIDTH};
use canvas_core::model::basic::{NumberField, TextField};
use canvas_core::{
    intern, DocGraph, FieldKind, FieldRecord, GraphError, Lookup, MemoryTransport, RecordValue,
};
use serde_json::json;

#[test]
fn setting_the_same_value_twice_records_one_undo_entry() {
    let server = MemoryTransport::new();
    let mut graph = DocGraph::new(server.clone());
    let width = graph.create_number(10.0).unwrap();
    let pushes_before = server.push_count();

    graph.set_value(width, 42.0).unwrap();
    graph.set_value(width, 42.0).unwrap();

    assert_eq!(graph.history().undo_depth(), 1);
    assert_eq!(server.push_count(), pushes_before + 1);
}

#[test]
fn non_finite_numbers_are_rejected_without_side_effects() {
    let server = MemoryTransport::new();
    let mut graph = DocGraph::new(server.clone());
    let doc = graph.new_document();
    let width = graph.create_number(10.0).unwrap();
    let pushes_before = server.push_count();

    assert_eq!(graph.create_number(f64::NAN), Err(GraphError::NonFiniteNumber));
    assert_eq!(graph.set_value(width, f64::NAN), Err(GraphError::NonFiniteNumber));
    assert_eq!(graph.set_value(width, f64::INFINITY), Err(GraphError::NonFiniteNumber));
    assert_eq!(
        graph.set_number(doc, &WIDTH, f64::NEG_INFINITY),
        Err(GraphError::NonFiniteNumber)
    );

    assert_eq!(graph.value::<f64>(width), Some(10.0));
    assert!(graph.get(doc, &WIDTH, false).is_absent());
    assert_eq!(graph.history().undo_depth(), 0);
    assert_eq!(server.push_count(), pushes_before);
}

#[test]
fn undo_and_redo_walk_a_mixed_sequence_both_ways() {
    let mut graph = DocGraph::new(MemoryTransport::new());
    let doc = graph.new_document();
    let count = graph.create_number(0.0).unwrap();
    let label = graph.create_text("start");
    let items = graph.create_list(Vec::new());

    graph.set_value(count, 1.0).unwrap();
    graph.set_value(label, "middle".to_string()).unwrap();
    graph.push_element(items, count).unwrap();
    graph.set(doc, &TITLE, Some(label), false).unwrap();
    graph.set_value(count, 2.0).unwrap();
    let steps = graph.history().undo_depth();
    assert_eq!(steps, 5);

    for _ in 0..steps {
        assert!(graph.undo());
    }
    assert_eq!(graph.value::<f64>(count), Some(0.0));
    assert_eq!(graph.value::<String>(label).as_deref(), Some("start"));
    assert_eq!(graph.list_elements(items), Some(Vec::new()));
    assert_eq!(graph.get(doc, &TITLE, false), Lookup::Absent);
    assert!(!graph.undo());

    for _ in 0..steps {
        assert!(graph.redo());
    }
    assert_eq!(graph.value::<f64>(count), Some(2.0));
    assert_eq!(graph.value::<String>(label).as_deref(), Some("middle"));
    assert_eq!(graph.list_elements(items), Some(vec![count]));
    assert_eq!(graph.get(doc, &TITLE, false), Lookup::Resolved(label));
    assert!(!graph.redo());
}

#[test]
fn undo_does_not_grow_the_log_or_push_twice() {
    let server = MemoryTransport::new();
    let mut graph = DocGraph::new(server.clone());
    let id = graph.create_text("a");
    graph.set_value(id, "b".to_string()).unwrap();

    graph.undo();
    assert_eq!(graph.history().undo_depth(), 0);
    assert_eq!(graph.history().redo_depth(), 1);
    assert_eq!(
        server.last_push(id).map(|record| record.value),
        Some(RecordValue::Text {
            data: "a".to_string()
        })
    );
}

#[test]
fn typed_getters_fall_back_on_kind_mismatch() {
    let mut graph = DocGraph::new(MemoryTransport::new());
    let doc = graph.new_document();
    graph.set_text(doc, &WIDTH, "wide").unwrap();

    assert_eq!(graph.get_t::<NumberField>(doc, &WIDTH, false), Lookup::Absent);
    assert_eq!(graph.get_number(doc, &WIDTH, 7.5), 7.5);
    assert_eq!(graph.get_text(doc, &WIDTH, ""), "wide");
    assert_eq!(graph.get_url(doc, &WIDTH), None);
    assert_eq!(graph.get_list(doc, &WIDTH), None);
}

#[test]
fn set_data_updates_in_place_or_respects_wrong_type_policy() {
    let mut graph = DocGraph::new(MemoryTransport::new());
    let doc = graph.new_document();
    let key = intern("Opacity");

    let first = graph.set_data(doc, &key, 0.5, false).unwrap().unwrap();
    let second = graph.set_data(doc, &key, 0.8, false).unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(graph.value::<f64>(first), Some(0.8));

    assert_eq!(graph.set_data(doc, &key, true, false).unwrap(), None);
    assert_eq!(graph.get_number(doc, &key, 0.0), 0.8);

    let replaced = graph.set_data(doc, &key, true, true).unwrap().unwrap();
    assert_ne!(replaced, first);
    assert!(graph.get_bool(doc, &key, false));
}

#[test]
fn set_val_coerces_existing_field_and_creates_missing_one() {
    let mut graph = DocGraph::new(MemoryTransport::new());
    let doc = graph.new_document();

    assert!(graph
        .set_val(doc, &WIDTH, &json!(120), FieldKind::Number)
        .unwrap());
    assert_eq!(graph.get_number(doc, &WIDTH, 0.0), 120.0);

    assert!(!graph
        .set_val(doc, &WIDTH, &json!("wide"), FieldKind::Number)
        .unwrap());
    assert!(graph
        .set_val(doc, &WIDTH, &json!(64.5), FieldKind::Number)
        .unwrap());
    assert_eq!(graph.get_number(doc, &WIDTH, 0.0), 64.5);

    let missing = intern("Caption");
    assert!(!graph
        .set_val(doc, &missing, &json!(3), FieldKind::Text)
        .unwrap());
    assert_eq!(graph.get(doc, &missing, false), Lookup::Absent);
}

#[test]
fn title_defaults_when_unset_or_not_text() {
    let mut graph = DocGraph::new(MemoryTransport::new());
    let doc = graph.new_document();
    assert_eq!(graph.title(doc), "<untitled>");

    let number = graph.create_number(3.0).unwrap();
    graph.set(doc, &TITLE, Some(number), false).unwrap();
    assert_eq!(graph.title(doc), "<untitled>");

    graph.set_text(doc, &TITLE, "Sketch").unwrap();
    assert_eq!(graph.title(doc), "Sketch");
    assert!(graph.get_t::<TextField>(doc, &TITLE, true).is_resolved());
}

#[test]
fn remote_scalar_update_is_applied_without_undo() {
    let server = MemoryTransport::new();
    let mut graph = DocGraph::new(server.clone());
    let id = graph.create_number(1.0).unwrap();
    let pushes = server.push_count();

    server.emit_update(FieldRecord {
        id,
        value: RecordValue::Number { data: 5.0 },
    });
    assert_eq!(graph.pump(), 1);

    assert_eq!(graph.value::<f64>(id), Some(5.0));
    assert!(!graph.can_undo());
    assert_eq!(server.push_count(), pushes);
}

#[test]
fn remote_update_of_another_kind_is_ignored() {
    let server = MemoryTransport::new();
    let mut graph = DocGraph::new(server.clone());
    let id = graph.create_number(1.0).unwrap();

    server.emit_update(FieldRecord {
        id,
        value: RecordValue::Text {
            data: "x".to_string(),
        },
    });
    graph.pump();
    assert_eq!(graph.value::<f64>(id), Some(1.0));
}
