use dbrelay_core::{
    CellUpdate, ConnectTarget, DbError, Driver, DriverConnection, QueryRequest, RowDelete,
    RowIdentity, RowInsert, RowPatch, Value,
};
use dbrelay_driver_mysql::MysqlDriver;
use dbrelay_test_support::containers;
use std::time::Duration;

fn connect_mysql(uri: String) -> Result<Box<dyn DriverConnection>, DbError> {
    let driver = MysqlDriver::new();
    let target = ConnectTarget::MySql { url: uri };

    containers::retry_db_operation(Duration::from_secs(30), || driver.connect(&target, None))
}

#[test]
#[ignore = "requires Docker daemon"]
fn connect_exec_query_and_list_tables() -> Result<(), DbError> {
    containers::with_mysql_url(|uri| {
        let connection = connect_mysql(uri)?;

        connection
            .exec("CREATE TABLE users (id INT AUTO_INCREMENT PRIMARY KEY, name TEXT NOT NULL)")?;
        connection.exec("INSERT INTO users (name) VALUES ('alice')")?;

        let result = connection.query(&QueryRequest::new("SELECT id, name FROM users"), 1024)?;
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.rows[0][1], Value::Text("alice".into()));

        assert_eq!(connection.list_tables()?, vec!["users".to_string()]);

        Ok(())
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn get_schema_reports_columns_primary_key_and_foreign_keys() -> Result<(), DbError> {
    containers::with_mysql_url(|uri| {
        let connection = connect_mysql(uri)?;

        connection.exec(
            "CREATE TABLE accounts (id INT AUTO_INCREMENT PRIMARY KEY, email VARCHAR(255) NOT NULL UNIQUE, balance DECIMAL(10,2))",
        )?;
        connection.exec(
            "CREATE TABLE orders (id INT AUTO_INCREMENT PRIMARY KEY, account_id INT, FOREIGN KEY (account_id) REFERENCES accounts(id))",
        )?;

        let schema = connection.get_schema("accounts", Some("testdb"))?;
        assert_eq!(schema.name, "accounts");
        assert_eq!(schema.columns.len(), 3);
        assert!(schema.columns.iter().any(|c| c.name == "id" && c.is_primary_key));

        let orders_schema = connection.get_schema("orders", Some("testdb"))?;
        assert!(!orders_schema.foreign_keys.is_empty());
        assert_eq!(orders_schema.foreign_keys[0].referenced_table, "accounts");

        Ok(())
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn paginated_query_honors_offset_and_limit() -> Result<(), DbError> {
    containers::with_mysql_url(|uri| {
        let connection = connect_mysql(uri)?;
        connection.exec("CREATE TABLE items (id INT AUTO_INCREMENT PRIMARY KEY, label TEXT)")?;
        for i in 1..=5 {
            connection.exec(&format!("INSERT INTO items (id, label) VALUES ({i}, 'item-{i}')"))?;
        }

        let page = connection.paginated_query("items", Some("testdb"), 2, 2, Some("id"), 1024)?;
        assert_eq!(page.row_count(), 2);
        assert_eq!(page.rows[0][0], Value::Int(3));

        Ok(())
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn row_crud_round_trip() -> Result<(), DbError> {
    containers::with_mysql_url(|uri| {
        let connection = connect_mysql(uri)?;
        connection.exec("CREATE TABLE notes (id INT AUTO_INCREMENT PRIMARY KEY, body TEXT)")?;

        let insert = RowInsert::new(
            "notes".into(),
            Some("testdb".into()),
            vec!["body".into()],
            vec![Value::Text("first".into())],
        );
        let inserted = connection.insert_row(&insert)?;
        assert_eq!(inserted.affected_rows, 1);
        let inserted_id = inserted.returning_row.unwrap()[0].clone();

        let patch = RowPatch::new(
            RowIdentity::new(vec!["id".into()], vec![inserted_id.clone()]),
            "notes".into(),
            Some("testdb".into()),
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
            RowIdentity::new(vec!["id".into()], vec![inserted_id]),
            "notes".into(),
            Some("testdb".into()),
        );
        let deleted = connection.delete_row(&delete)?;
        assert_eq!(deleted.affected_rows, 1);

        let rows = connection.query(&QueryRequest::new("SELECT * FROM notes"), 1024)?;
        assert_eq!(rows.row_count(), 0);

        Ok(())
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn estimate_row_count_reflects_table_statistics() -> Result<(), DbError> {
    containers::with_mysql_url(|uri| {
        let connection = connect_mysql(uri)?;
        connection.exec("CREATE TABLE counted (id INT AUTO_INCREMENT PRIMARY KEY)")?;
        for _ in 0..10 {
            connection.exec("INSERT INTO counted VALUES (DEFAULT)")?;
        }
        connection.exec("ANALYZE TABLE counted")?;

        let estimate = connection.estimate_row_count("counted", Some("testdb"))?;
        assert!(estimate >= 0);

        Ok(())
    })
}

#[test]
#[ignore = "requires Docker daemon"]
fn cancel_handle_can_be_invoked_without_a_running_query() -> Result<(), DbError> {
    containers::with_mysql_url(|uri| {
        let connection = connect_mysql(uri)?;
        let handle = connection.prepare_cancel();
        assert!(handle.cancel().is_ok());
        Ok(())
    })
}
