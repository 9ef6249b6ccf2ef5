use dbrelay_core::{
    CellUpdate, ConnectTarget, DbError, Driver, DriverConnection, QueryRequest, RowDelete,
    RowIdentity, RowInsert, RowPatch, Value,
};
use dbrelay_driver_sqlite::SqliteDriver;

fn connect_sqlite() -> Result<Box<dyn DriverConnection>, DbError> {
    let temp_dir = tempfile::tempdir()?;
    let db_path = temp_dir.path().join("test.sqlite");

    let driver = SqliteDriver::new();
    let target = ConnectTarget::Sqlite {
        path: db_path.to_string_lossy().to_string(),
    };
    let connection = driver.connect(&target, None)?;

    // Leak the tempdir so it doesn't get cleaned up while the connection is alive;
    // the OS reclaims it on process exit.
    std::mem::forget(temp_dir);

    Ok(connection)
}

#[test]
fn connect_exec_query_and_list_tables() -> Result<(), DbError> {
    let connection = connect_sqlite()?;

    connection.exec("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")?;
    connection.exec("INSERT INTO users (name) VALUES ('alice')")?;

    let result = connection.query(&QueryRequest::new("SELECT id, name FROM users"), 1024)?;
    assert_eq!(result.row_count(), 1);
    assert_eq!(result.rows[0][1], Value::Text("alice".into()));

    assert_eq!(connection.list_tables()?, vec!["users".to_string()]);

    Ok(())
}

#[test]
fn get_schema_reports_columns_and_primary_key() -> Result<(), DbError> {
    let connection = connect_sqlite()?;
    connection.exec(
        "CREATE TABLE accounts (id INTEGER PRIMARY KEY, email TEXT NOT NULL, balance REAL)",
    )?;

    let schema = connection.get_schema("accounts", None)?;
    assert_eq!(schema.name, "accounts");
    assert_eq!(schema.columns.len(), 3);
    assert!(schema.columns.iter().any(|c| c.name == "id" && c.is_primary_key));

    Ok(())
}

#[test]
fn paginated_query_honors_offset_and_limit() -> Result<(), DbError> {
    let connection = connect_sqlite()?;
    connection.exec("CREATE TABLE items (id INTEGER PRIMARY KEY, label TEXT)")?;
    for i in 1..=5 {
        connection.exec(&format!("INSERT INTO items (id, label) VALUES ({i}, 'item-{i}')"))?;
    }

    let page = connection.paginated_query("items", None, 2, 2, Some("id"), 1024)?;
    assert_eq!(page.row_count(), 2);
    assert_eq!(page.rows[0][0], Value::Int(3));

    Ok(())
}

#[test]
fn row_crud_round_trip() -> Result<(), DbError> {
    let connection = connect_sqlite()?;
    connection.exec("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)")?;

    let insert = RowInsert::new(
        "notes".into(),
        None,
        vec!["id".into(), "body".into()],
        vec![Value::Int(1), Value::Text("first".into())],
    );
    let inserted = connection.insert_row(&insert)?;
    assert_eq!(inserted.affected_rows, 1);

    let patch = RowPatch::new(
        RowIdentity::new(vec!["id".into()], vec![Value::Int(1)]),
        "notes".into(),
        None,
        vec![CellUpdate {
            column: "body".into(),
            value: Value::Text("edited".into()),
        }],
    );
    let updated = connection.update_row(&patch)?;
    assert_eq!(updated.affected_rows, 1);
    assert_eq!(
        updated.returning_row.unwrap()[1],
        Value::Text("edited".into())
    );

    let delete = RowDelete::new(
        RowIdentity::new(vec!["id".into()], vec![Value::Int(1)]),
        "notes".into(),
        None,
    );
    let deleted = connection.delete_row(&delete)?;
    assert_eq!(deleted.affected_rows, 1);

    let remaining = connection.list_tables()?;
    assert_eq!(remaining, vec!["notes".to_string()]);
    let rows = connection.query(&QueryRequest::new("SELECT * FROM notes"), 1024)?;
    assert_eq!(rows.row_count(), 0);

    Ok(())
}

#[test]
fn cancel_handle_can_be_invoked_without_a_running_query() -> Result<(), DbError> {
    let connection = connect_sqlite()?;
    let handle = connection.prepare_cancel();
    assert!(handle.cancel().is_ok());
    Ok(())
}
