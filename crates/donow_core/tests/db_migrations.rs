use donow_core::db::migrations::latest_version;
use donow_core::db::{open_db, open_db_in_memory, DbError};
use donow_core::{CreateItemRequest, ItemService, ItemType, SqliteItemRepository};
use rusqlite::Connection;

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "items");
    assert_table_exists(&conn, "tags");
    assert_table_exists(&conn, "item_tags");
    assert_table_exists(&conn, "item_status_history");
}

#[test]
fn reopening_file_database_keeps_schema_and_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("donow.db");

    let conn_first = open_db(&path).unwrap();
    let id = {
        let service = ItemService::new(SqliteItemRepository::try_new(&conn_first).unwrap());
        service
            .create("user-1", &CreateItemRequest::new(ItemType::Note, "persisted"))
            .unwrap()
            .id
    };
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    let service = ItemService::new(SqliteItemRepository::try_new(&conn_second).unwrap());
    let history = service.get_status_history(id).unwrap();
    assert_eq!(history.len(), 1);
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
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
    assert!(SqliteItemRepository::try_new(&conn).is_err());
}

#[test]
fn schema_rejects_inconsistent_completion_rows() {
    let conn = open_db_in_memory().unwrap();
    let result = conn.execute(
        "INSERT INTO items (uuid, type, title, status, is_completed, completed_at, created_at, updated_at)
         VALUES ('6f1c1d1e-0000-4000-8000-000000000001', 'task', 'x', 'Completed', 0, NULL, 1, 1);",
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
