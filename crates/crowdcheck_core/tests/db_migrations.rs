use crowdcheck_core::db::migrations::latest_version;
use crowdcheck_core::db::{
    open_db, open_db_in_memory, open_db_in_memory_with_timeout, open_db_with_timeout, DbError,
};
use crowdcheck_core::{ErrorKind, MetadataIndex, RepoError, SqlitePackageRepository};
use rusqlite::Connection;
use std::sync::Arc;
use std::time::Duration;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "packages");
    assert_table_exists(&conn, "package_index");
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crowdcheck.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "packages");
}

#[test]
fn busy_timeout_follows_open_arguments() {
    assert_eq!(busy_timeout_ms(&open_db_in_memory().unwrap()), 5_000);
    let conn = open_db_in_memory_with_timeout(Duration::from_millis(250)).unwrap();
    assert_eq!(busy_timeout_ms(&conn), 250);

    let dir = tempfile::tempdir().unwrap();
    let conn = open_db_with_timeout(dir.path().join("timeout.db"), Duration::from_secs(2)).unwrap();
    assert_eq!(busy_timeout_ms(&conn), 2_000);
}

fn busy_timeout_ms(conn: &Connection) -> i64 {
    conn.query_row("PRAGMA busy_timeout;", [], |row| row.get(0)).unwrap()
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Storage);
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
fn repository_rejects_unmigrated_connection() {
    let conn = Connection::open_in_memory().unwrap();
    let result = SqlitePackageRepository::try_new(conn, Arc::new(MetadataIndex::new()));

    match result {
        Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        }) => {
            assert_eq!(expected_version, latest_version());
            assert_eq!(actual_version, 0);
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("expected unmigrated connection to be rejected"),
    }
}

#[test]
fn package_version_must_be_positive() {
    let conn = open_db_in_memory().unwrap();
    let result = conn.execute(
        "INSERT INTO packages (package_uuid, version, body) VALUES ('p', 0, '{}');",
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
