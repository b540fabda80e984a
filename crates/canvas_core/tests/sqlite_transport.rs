use canvas_core::db::migrations::latest_version;
use canvas_core::db::{open_db, open_db_in_memory, DbError};
use canvas_core::keys::{TITLE, WIDTH};
use canvas_core::{DocGraph, FieldKind, Lookup, RecordValue, SqliteTransport};
use rusqlite::Connection;

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn in_memory_database_is_fully_migrated() {
    let conn = open_db_in_memory().unwrap();
    assert_eq!(schema_version(&conn), latest_version());
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'field_records'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(tables, 1);
}

#[test]
fn newer_schema_version_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");
    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion { found, supported } => {
            assert_eq!(found, 999);
            assert_eq!(supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn graph_state_survives_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("canvas.sqlite3");

    let (doc, width) = {
        let mut graph = DocGraph::new(SqliteTransport::open(&path).unwrap());
        let doc = graph.new_document();
        graph.set_text(doc, &TITLE, "Board").unwrap();
        let width = graph.set_number(doc, &WIDTH, 640.0).unwrap();
        graph.set_value(width, 800.0).unwrap();
        (doc, width)
    };

    let transport = SqliteTransport::open(&path).unwrap();
    assert_eq!(transport.record_count().unwrap(), 3);
    assert_eq!(
        transport.load(width).unwrap().map(|record| record.value),
        Some(RecordValue::Number { data: 800.0 })
    );

    let mut graph = DocGraph::new(transport);
    assert_eq!(graph.resolve(doc), Lookup::Pending);
    graph.pump();
    assert_eq!(graph.kind(doc), Some(FieldKind::Document));

    assert_eq!(graph.get(doc, &WIDTH, false), Lookup::Pending);
    graph.pump();
    assert_eq!(graph.get_number(doc, &WIDTH, 0.0), 800.0);

    let title = graph.get(doc, &TITLE, false);
    assert_eq!(title, Lookup::Pending);
    graph.pump();
    assert_eq!(graph.title(doc), "Board");
}

#[test]
fn unknown_id_resolves_as_missing() {
    let mut graph = DocGraph::new(SqliteTransport::open_in_memory().unwrap());
    let ghost = canvas_core::FieldId::generate();
    let answer = std::rc::Rc::new(std::cell::Cell::new(Some(ghost)));
    let sink = std::rc::Rc::clone(&answer);

    graph.resolve_with(ghost, move |_, resolved| sink.set(resolved));
    graph.pump();
    assert_eq!(answer.get(), None);
}
