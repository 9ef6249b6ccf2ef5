use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dbrelay_core::{
    ColumnInfo, ColumnMeta, ConnectTarget, ConnectionInfo, CrudResult, DbError, DbKind, Driver,
    DriverConnection, ForeignKeyInfo, IndexInfo, NoopCancelHandle, PlaceholderStyle,
    QueryCancelHandle, QueryRequest, ResultSet, Row, RowDelete, RowInsert, RowPatch, SqlDialect,
    TableSchema, Value,
};
use rusqlite::{Connection as RusqliteConnection, InterruptHandle};

pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn quote_identifier(&self, name: &str) -> String {
        sqlite_quote_ident(name)
    }

    fn qualified_table(&self, _schema: Option<&str>, table: &str) -> String {
        // SQLite has no schema prefix for ordinary table references.
        sqlite_quote_ident(table)
    }

    fn value_to_literal(&self, value: &Value) -> String {
        value_to_sqlite_literal(value)
    }

    fn escape_string(&self, s: &str) -> String {
        sqlite_escape_string(s)
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }
}

static SQLITE_DIALECT: SqliteDialect = SqliteDialect;

pub struct SqliteDriver;

impl SqliteDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for SqliteDriver {
    fn kind(&self) -> DbKind {
        DbKind::Sqlite
    }

    fn connect(
        &self,
        target: &ConnectTarget,
        _password: Option<&str>,
    ) -> Result<Box<dyn DriverConnection>, DbError> {
        let path = match target {
            ConnectTarget::Sqlite { path } => path.clone(),
            _ => {
                return Err(DbError::connection_failed(
                    "sqlite driver given a non-sqlite connection target",
                ));
            }
        };

        let conn =
            RusqliteConnection::open(&path).map_err(|e| DbError::ConnectionFailed(e.to_string()))?;
        let interrupt_handle = conn.get_interrupt_handle();

        Ok(Box::new(SqliteConnection {
            conn: Mutex::new(conn),
            interrupt_handle,
            cancelled: Arc::new(AtomicBool::new(false)),
            path,
        }))
    }
}

pub struct SqliteConnection {
    conn: Mutex<RusqliteConnection>,
    interrupt_handle: InterruptHandle,
    cancelled: Arc<AtomicBool>,
    path: String,
}

struct SqliteCancelHandle {
    cancelled: Arc<AtomicBool>,
    interrupt_handle: InterruptHandle,
}

impl QueryCancelHandle for SqliteCancelHandle {
    fn cancel(&self) -> Result<(), DbError> {
        self.cancelled.store(true, Ordering::SeqCst);
        self.interrupt_handle.interrupt();
        log::info!("[cancel] sqlite interrupt sent");
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl DriverConnection for SqliteConnection {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            driver: "sqlite",
            database: Some(self.path.clone()),
            host: None,
            port: None,
            user: None,
        }
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &SQLITE_DIALECT
    }

    fn query(&self, request: &QueryRequest, max_rows: usize) -> Result<ResultSet, DbError> {
        self.cancelled.store(false, Ordering::SeqCst);

        let start = Instant::now();
        let conn = self.lock()?;

        let mut stmt = conn
            .prepare(&request.sql)
            .map_err(|e| self.query_error(e))?;

        let columns: Vec<ColumnMeta> = stmt
            .column_names()
            .iter()
            .map(|name| ColumnMeta {
                name: name.to_string(),
                type_name: "TEXT".to_string(),
                nullable: true,
            })
            .collect();
        let column_count = columns.len();

        let params = sqlite_params(&request.params);
        let mut result_rows = stmt
            .query(rusqlite::params_from_iter(params.iter()))
            .map_err(|e| self.query_error(e))?;

        let mut rows: Vec<Row> = Vec::new();
        loop {
            match result_rows.next() {
                Ok(Some(row)) => {
                    let values: Row = (0..column_count)
                        .map(|i| sqlite_value_to_value(row, i))
                        .collect();
                    rows.push(values);
                }
                Ok(None) => break,
                Err(e) => return Err(self.query_error(e)),
            }
        }

        Ok(ResultSet {
            columns,
            rows,
            affected_rows: None,
            execution_time: start.elapsed(),
            truncated: false,
        }
        .cap(max_rows))
    }

    fn exec(&self, sql: &str) -> Result<i64, DbError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let conn = self.lock()?;
        let affected = conn
            .execute(sql, [])
            .map_err(|e| self.query_error(e))?;
        Ok(affected as i64)
    }

    fn ping(&self) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))
            .map_err(|e| self.query_error(e))
    }

    fn paginated_query(
        &self,
        table: &str,
        schema: Option<&str>,
        offset: u64,
        limit: u64,
        order_by: Option<&str>,
        max_rows: usize,
    ) -> Result<ResultSet, DbError> {
        let table_ref = self.dialect().qualified_table(schema, table);
        let order_clause = match order_by {
            Some(col) => format!(" ORDER BY {}", self.dialect().quote_identifier(col)),
            None => String::new(),
        };
        let sql = format!(
            "SELECT * FROM {table_ref}{order_clause} LIMIT {limit} OFFSET {offset}"
        );
        self.query(&QueryRequest::new(sql), max_rows)
    }

    fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .map_err(|e| self.query_error(e))?;

        let names = stmt
            .query_map([], |row| row.get(0))
            .map_err(|e| self.query_error(e))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(names)
    }

    fn get_schema(&self, table: &str, _schema: Option<&str>) -> Result<TableSchema, DbError> {
        let conn = self.lock()?;

        let columns = self.get_columns(&conn, table)?;
        let indexes = self.get_indexes(&conn, table)?;
        let foreign_keys = self.get_foreign_keys(&conn, table)?;

        Ok(TableSchema {
            name: table.to_string(),
            schema: None,
            columns,
            indexes,
            foreign_keys,
        })
    }

    fn update_row(&self, patch: &RowPatch) -> Result<CrudResult, DbError> {
        if !patch.identity.is_valid() {
            return Err(DbError::query_failed(
                "cannot update row: missing primary key identity",
            ));
        }
        if !patch.has_changes() {
            return Err(DbError::query_failed("no changes to apply"));
        }

        let conn = self.lock()?;
        let (where_clause, mut params) = identity_where_clause(self.dialect(), &patch.identity);

        let set_clause = patch
            .changes
            .iter()
            .map(|c| format!("{} = ?", self.dialect().quote_identifier(&c.column)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut set_params: Vec<Value> = patch.changes.iter().map(|c| c.value.clone()).collect();
        set_params.append(&mut params);

        let table_ref = self.dialect().qualified_table(patch.schema.as_deref(), &patch.table);
        let sql = format!("UPDATE {table_ref} SET {set_clause} WHERE {where_clause}");

        let affected = conn
            .execute(&sql, rusqlite::params_from_iter(sqlite_params(&set_params)))
            .map_err(|e| self.query_error(e))?;

        if affected == 0 {
            return Ok(CrudResult::empty());
        }

        let returning = self.select_by_identity(&conn, &patch.table, patch.schema.as_deref(), &patch.identity)?;
        Ok(CrudResult::new(affected as u64, returning))
    }

    fn insert_row(&self, insert: &RowInsert) -> Result<CrudResult, DbError> {
        if !insert.is_valid() {
            return Err(DbError::query_failed("cannot insert row: no columns given"));
        }

        let conn = self.lock()?;
        let cols = insert
            .columns
            .iter()
            .map(|c| self.dialect().quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; insert.values.len()].join(", ");
        let table_ref = self.dialect().qualified_table(insert.schema.as_deref(), &insert.table);
        let sql = format!("INSERT INTO {table_ref} ({cols}) VALUES ({placeholders})");

        conn.execute(&sql, rusqlite::params_from_iter(sqlite_params(&insert.values)))
            .map_err(|e| self.query_error(e))?;

        let rowid = conn.last_insert_rowid();
        let select_sql = format!("SELECT * FROM {table_ref} WHERE rowid = {rowid} LIMIT 1");
        let returning = self.select_one(&conn, &select_sql)?;

        Ok(CrudResult::new(1, returning))
    }

    fn delete_row(&self, delete: &RowDelete) -> Result<CrudResult, DbError> {
        if !delete.is_valid() {
            return Err(DbError::query_failed(
                "cannot delete row: missing primary key identity",
            ));
        }

        let conn = self.lock()?;
        let returning = self.select_by_identity(&conn, &delete.table, delete.schema.as_deref(), &delete.identity)?;

        let (where_clause, params) = identity_where_clause(self.dialect(), &delete.identity);
        let table_ref = self.dialect().qualified_table(delete.schema.as_deref(), &delete.table);
        let sql = format!("DELETE FROM {table_ref} WHERE {where_clause}");

        let affected = conn
            .execute(&sql, rusqlite::params_from_iter(sqlite_params(&params)))
            .map_err(|e| self.query_error(e))?;

        if affected == 0 {
            return Ok(CrudResult::empty());
        }

        Ok(CrudResult::new(affected as u64, returning))
    }

    fn estimate_row_count(&self, table: &str, _schema: Option<&str>) -> Result<i64, DbError> {
        let conn = self.lock()?;
        let estimate: Option<i64> = conn
            .query_row(
                "SELECT stat FROM sqlite_stat1 WHERE tbl = ?",
                [table],
                |row| {
                    let stat: String = row.get(0)?;
                    Ok(stat
                        .split_whitespace()
                        .next()
                        .and_then(|s| s.parse::<i64>().ok()))
                },
            )
            .ok()
            .flatten();

        Ok(estimate.unwrap_or(-1))
    }

    fn prepare_cancel(&self) -> Arc<dyn QueryCancelHandle> {
        match self.conn.lock() {
            Ok(conn) => Arc::new(SqliteCancelHandle {
                cancelled: self.cancelled.clone(),
                interrupt_handle: conn.get_interrupt_handle(),
            }),
            Err(_) => Arc::new(NoopCancelHandle),
        }
    }

    fn close(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}

impl SqliteConnection {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, RusqliteConnection>, DbError> {
        self.conn
            .lock()
            .map_err(|e| DbError::query_failed(format!("connection lock poisoned: {e}")))
    }

    fn query_error(&self, e: rusqlite::Error) -> DbError {
        if self.cancelled.load(Ordering::SeqCst) {
            return DbError::Cancelled;
        }
        match &e {
            rusqlite::Error::SqliteFailure(err, msg) => {
                let message = msg.clone().unwrap_or_else(|| format!("{:?}", err.code));
                match err.code {
                    rusqlite::ErrorCode::ConstraintViolation => {
                        DbError::ConstraintViolation(message)
                    }
                    _ => DbError::QueryFailed(message),
                }
            }
            _ => DbError::QueryFailed(e.to_string()),
        }
    }

    fn select_one(&self, conn: &RusqliteConnection, sql: &str) -> Result<Option<Row>, DbError> {
        let mut stmt = conn.prepare(sql).map_err(|e| self.query_error(e))?;
        let column_count = stmt.column_count();
        let mut rows_iter = stmt.query([]).map_err(|e| self.query_error(e))?;

        match rows_iter.next().map_err(|e| self.query_error(e))? {
            Some(row) => Ok(Some(
                (0..column_count)
                    .map(|i| sqlite_value_to_value(row, i))
                    .collect(),
            )),
            None => Ok(None),
        }
    }

    fn select_by_identity(
        &self,
        conn: &RusqliteConnection,
        table: &str,
        schema: Option<&str>,
        identity: &dbrelay_core::RowIdentity,
    ) -> Result<Option<Row>, DbError> {
        let (where_clause, params) = identity_where_clause(self.dialect(), identity);
        let table_ref = self.dialect().qualified_table(schema, table);
        let sql = format!("SELECT * FROM {table_ref} WHERE {where_clause}");

        let mut stmt = conn.prepare(&sql).map_err(|e| self.query_error(e))?;
        let column_count = stmt.column_count();
        let mut rows_iter = stmt
            .query(rusqlite::params_from_iter(sqlite_params(&params)))
            .map_err(|e| self.query_error(e))?;

        match rows_iter.next().map_err(|e| self.query_error(e))? {
            Some(row) => Ok(Some(
                (0..column_count)
                    .map(|i| sqlite_value_to_value(row, i))
                    .collect(),
            )),
            None => Ok(None),
        }
    }

    fn get_columns(
        &self,
        conn: &RusqliteConnection,
        table: &str,
    ) -> Result<Vec<ColumnInfo>, DbError> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA table_info('{}')", table))
            .map_err(|e| self.query_error(e))?;

        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    type_name: row.get::<_, String>(2).unwrap_or_default(),
                    nullable: row.get::<_, i32>(3).unwrap_or(1) == 0,
                    is_primary_key: row.get::<_, i32>(5).unwrap_or(0) == 1,
                    default_value: row.get::<_, Option<String>>(4).unwrap_or(None),
                })
            })
            .map_err(|e| self.query_error(e))?
            .filter_map(|r| r.ok())
            .collect();

        Ok(columns)
    }

    fn get_indexes(
        &self,
        conn: &RusqliteConnection,
        table: &str,
    ) -> Result<Vec<IndexInfo>, DbError> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA index_list('{}')", table))
            .map_err(|e| self.query_error(e))?;

        let index_list: Vec<(String, bool, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(1)?,
                    row.get::<_, i32>(2)? == 1,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| self.query_error(e))?
            .filter_map(|r| r.ok())
            .collect();

        let mut indexes = Vec::new();
        for (index_name, is_unique, origin) in index_list {
            let mut col_stmt = conn
                .prepare(&format!("PRAGMA index_info('{}')", index_name))
                .map_err(|e| self.query_error(e))?;

            let columns: Vec<String> = col_stmt
                .query_map([], |row| row.get(2))
                .map_err(|e| self.query_error(e))?
                .filter_map(|r| r.ok())
                .collect();

            indexes.push(IndexInfo {
                name: index_name,
                columns,
                is_unique,
                is_primary: origin == "pk",
            });
        }

        Ok(indexes)
    }

    fn get_foreign_keys(
        &self,
        conn: &RusqliteConnection,
        table: &str,
    ) -> Result<Vec<ForeignKeyInfo>, DbError> {
        let mut stmt = conn
            .prepare(&format!("PRAGMA foreign_key_list('{}')", table))
            .map_err(|e| self.query_error(e))?;

        let fk_rows: Vec<(i32, String, String, String)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| self.query_error(e))?
            .filter_map(|r| r.ok())
            .collect();

        let mut fk_map: HashMap<i32, ForeignKeyInfo> = HashMap::new();
        for (id, ref_table, from_col, to_col) in fk_rows {
            let entry = fk_map.entry(id).or_insert_with(|| ForeignKeyInfo {
                name: format!("fk_{}", id),
                columns: Vec::new(),
                referenced_table: ref_table,
                referenced_columns: Vec::new(),
            });
            entry.columns.push(from_col);
            entry.referenced_columns.push(to_col);
        }

        Ok(fk_map.into_values().collect())
    }
}

fn identity_where_clause(
    dialect: &dyn SqlDialect,
    identity: &dbrelay_core::RowIdentity,
) -> (String, Vec<Value>) {
    let clause = identity
        .columns
        .iter()
        .map(|c| format!("{} = ?", dialect.quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    (clause, identity.values.clone())
}

fn sqlite_params(values: &[Value]) -> Vec<Box<dyn rusqlite::ToSql>> {
    values
        .iter()
        .map(|v| -> Box<dyn rusqlite::ToSql> {
            match v {
                Value::Null => Box::new(Option::<i64>::None),
                Value::Bool(b) => Box::new(*b),
                Value::Int(i) => Box::new(*i),
                Value::Float(f) => Box::new(*f),
                Value::Text(s) => Box::new(s.clone()),
                Value::Bytes(b) => Box::new(b.clone()),
                Value::DateTime(dt) => Box::new(dt.to_rfc3339()),
                Value::Date(d) => Box::new(d.format("%Y-%m-%d").to_string()),
                Value::Time(t) => Box::new(t.format("%H:%M:%S%.f").to_string()),
            }
        })
        .collect()
}

fn sqlite_value_to_value(row: &rusqlite::Row, idx: usize) -> Value {
    use rusqlite::types::ValueRef;

    match row.get_ref(idx) {
        Ok(ValueRef::Null) => Value::Null,
        Ok(ValueRef::Integer(i)) => Value::Int(i),
        Ok(ValueRef::Real(f)) => Value::Float(f),
        Ok(ValueRef::Text(t)) => Value::Text(String::from_utf8_lossy(t).to_string()),
        Ok(ValueRef::Blob(b)) => Value::Bytes(b.to_vec()),
        Err(_) => Value::Null,
    }
}

fn sqlite_quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn value_to_sqlite_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if f.is_nan() || f.is_infinite() {
                "NULL".to_string()
            } else {
                f.to_string()
            }
        }
        Value::Text(s) => format!("'{}'", sqlite_escape_string(s)),
        Value::Bytes(b) => format!("X'{}'", hex::encode(b)),
        Value::DateTime(dt) => format!("'{}'", dt.to_rfc3339()),
        Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
        Value::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
    }
}

fn sqlite_escape_string(s: &str) -> String {
    s.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbrelay_core::{CellUpdate, QueryRequest, RowIdentity};

    fn open_memory() -> SqliteConnection {
        let conn = RusqliteConnection::open_in_memory().unwrap();
        let interrupt_handle = conn.get_interrupt_handle();
        conn.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER);
             INSERT INTO users (id, name, age) VALUES (1, 'alice', 30), (2, 'bob', 25);",
        )
        .unwrap();

        SqliteConnection {
            conn: Mutex::new(conn),
            interrupt_handle,
            cancelled: Arc::new(AtomicBool::new(false)),
            path: ":memory:".into(),
        }
    }

    #[test]
    fn query_returns_rows_in_insertion_order() {
        let conn = open_memory();
        let result = conn
            .query(&QueryRequest::new("SELECT id, name FROM users ORDER BY id"), 1024)
            .unwrap();
        assert_eq!(result.row_count(), 2);
        assert_eq!(result.rows[0][1], Value::Text("alice".into()));
    }

    #[test]
    fn list_tables_excludes_sqlite_internal_tables() {
        let conn = open_memory();
        let tables = conn.list_tables().unwrap();
        assert_eq!(tables, vec!["users".to_string()]);
    }

    #[test]
    fn update_row_applies_changes_and_returns_row() {
        let conn = open_memory();
        let patch = RowPatch::new(
            RowIdentity::new(vec!["id".into()], vec![Value::Int(1)]),
            "users".into(),
            None,
            vec![CellUpdate {
                column: "age".into(),
                value: Value::Int(31),
            }],
        );
        let result = conn.update_row(&patch).unwrap();
        assert_eq!(result.affected_rows, 1);
        assert_eq!(result.returning_row.unwrap()[2], Value::Int(31));
    }

    #[test]
    fn delete_row_removes_matching_row() {
        let conn = open_memory();
        let delete = RowDelete::new(
            RowIdentity::new(vec!["id".into()], vec![Value::Int(2)]),
            "users".into(),
            None,
        );
        let result = conn.delete_row(&delete).unwrap();
        assert_eq!(result.affected_rows, 1);
        assert_eq!(conn.list_tables().unwrap().len(), 1);

        let remaining = conn
            .query(&QueryRequest::new("SELECT id FROM users"), 1024)
            .unwrap();
        assert_eq!(remaining.row_count(), 1);
    }

    #[test]
    fn estimate_row_count_without_stats_is_unavailable() {
        let conn = open_memory();
        assert_eq!(conn.estimate_row_count("users", None).unwrap(), -1);
    }
}
