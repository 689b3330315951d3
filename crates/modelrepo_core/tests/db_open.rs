use modelrepo_core::db::found_rows::{read_found_rows, FOUND_ROWS_SQL};
use modelrepo_core::{
    open_db, open_db_in_memory, prepare_connection, Hooks, LoaderError, ModelCollectionLoader,
    ModelDescriptor, ModelFactory, Value,
};
use rusqlite::Connection;
use std::sync::Arc;

#[test]
fn opened_connections_are_configured() {
    let conn = open_db_in_memory().expect("open in-memory db");
    let foreign_keys: i64 = conn
        .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
        .expect("read pragma");
    assert_eq!(foreign_keys, 1);

    let found_rows: i64 = conn
        .query_row(FOUND_ROWS_SQL, [], |row| row.get(0))
        .expect("found_rows function registered");
    assert_eq!(found_rows, 0);
}

#[test]
fn file_databases_keep_rows_across_connections() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("models.sqlite3");

    {
        let conn = open_db(&path).expect("create file db");
        conn.execute_batch(
            "CREATE TABLE tags (id TEXT PRIMARY KEY, label TEXT);
             INSERT INTO tags (id, label) VALUES ('rust', 'Rust'), ('sql', 'SQL');",
        )
        .expect("seed tags");
    }

    let conn = open_db(&path).expect("reopen file db");
    let factory = Arc::new(ModelFactory::new().with(ModelDescriptor::new("tag", "tags")));
    let loader = ModelCollectionLoader::for_model(&conn, factory, "tag").expect("bind tag");
    let models = loader.load_many(["sql", "rust"]).expect("load tags");
    assert_eq!(
        models.iter().map(|model| model.get("label").cloned()).collect::<Vec<_>>(),
        vec![Some(Value::from("SQL")), Some(Value::from("Rust"))]
    );
}

#[test]
fn externally_opened_connections_can_be_prepared() {
    let conn = Connection::open_in_memory().expect("plain connection");
    conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t (id) VALUES (1), (2), (3);")
        .expect("seed");

    let factory = Arc::new(ModelFactory::new().with(ModelDescriptor::new("row", "t")));
    let mut loader = ModelCollectionLoader::for_model(&conn, factory.clone(), "row").expect("bind");
    assert!(matches!(
        loader.load_from_query("SELECT SQL_CALC_FOUND_ROWS * FROM t LIMIT 1", Hooks::none()),
        Err(LoaderError::Db(_))
    ));

    prepare_connection(&conn).expect("prepare");
    let mut loader = ModelCollectionLoader::for_model(&conn, factory, "row").expect("bind");
    let page = loader
        .load_from_query("SELECT SQL_CALC_FOUND_ROWS * FROM t LIMIT 1", Hooks::none())
        .expect("tracked query");
    assert_eq!(page.len(), 1);
    assert_eq!(page.found_rows(), Some(3));
    assert_eq!(read_found_rows(&conn).expect("read"), 3);
}

#[test]
fn missing_database_directory_is_reported() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("missing").join("models.sqlite3");
    assert!(open_db(&path).is_err());
}
