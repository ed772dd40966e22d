use psp_core::db::migrations::latest_version;
use psp_core::db::{open_db, open_db_in_memory, DbError};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "hinata_records");
    assert_table_exists(&conn, "tags");
    assert_table_exists(&conn, "record_tags");
    assert_table_exists(&conn, "hinata_fts");
    assert_table_exists(&conn, "psp_fragments");
    assert_table_exists(&conn, "psp_invocations");
    assert_table_exists(&conn, "psp_invocation_fragments");
    assert_table_exists(&conn, "psp_feedback");
    assert_table_exists(&conn, "strategy_weights");
    assert_table_exists(&conn, "production_runs");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("psp.sqlite3");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "psp_fragments");
}

#[test]
fn strategy_weights_are_seeded_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("psp.sqlite3");

    drop(open_db(&path).unwrap());
    let conn = open_db(&path).unwrap();

    let rows: i64 = conn
        .query_row("SELECT COUNT(*) FROM strategy_weights;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(rows, 1);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.sqlite3");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn foreign_keys_are_enforced() {
    let conn = open_db_in_memory().unwrap();

    let result = conn.execute(
        "INSERT INTO record_tags (record_uuid, tag_id) VALUES ('missing', 1);",
        [],
    );
    assert!(result.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
