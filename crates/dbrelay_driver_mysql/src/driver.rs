use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{Datelike, Timelike};
use dbrelay_core::{
    ColumnInfo, ColumnMeta, ConnectTarget, ConnectionInfo, CrudResult, DbError, DbKind, Driver,
    DriverConnection, ForeignKeyInfo, IndexInfo, MySqlDialect, QueryCancelHandle, QueryRequest,
    ResultSet, Row, RowDelete, RowIdentity, RowInsert, RowPatch, SqlDialect, TableSchema, Value,
};
use mysql::prelude::*;
use mysql::{Conn, Opts, OptsBuilder, Params};

static DIALECT: MySqlDialect = MySqlDialect;

pub struct MysqlDriver;

impl MysqlDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for MysqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for MysqlDriver {
    fn kind(&self) -> DbKind {
        DbKind::MySql
    }

    fn connect(
        &self,
        target: &ConnectTarget,
        password: Option<&str>,
    ) -> Result<Box<dyn DriverConnection>, DbError> {
        let url = match target {
            ConnectTarget::MySql { url } => url,
            _ => {
                return Err(DbError::connection_failed(
                    "mysql driver given a non-mysql connection target",
                ));
            }
        };

        let opts = Opts::from_url(url)
            .map_err(|e| DbError::InvalidConnectionString(e.to_string()))?;
        let opts = match password {
            Some(pw) => OptsBuilder::from_opts(opts).pass(Some(pw)).into(),
            None => opts,
        };

        let host = opts.ip_or_hostname().to_string();
        let port = opts.tcp_port();
        let database = opts.db_name().map(|s| s.to_string());
        let user = opts.user().map(|s| s.to_string());

        let conn = Conn::new(opts.clone()).map_err(|e| format_mysql_error(&e, &host, port))?;

        let mut kill_conn_holder = conn;
        let connection_id: u64 = kill_conn_holder
            .query_first("SELECT CONNECTION_ID()")
            .map_err(|e| format_mysql_query_error(&e))?
            .unwrap_or(0);

        Ok(Box::new(MysqlConnection {
            conn: Mutex::new(kill_conn_holder),
            kill_opts: opts,
            connection_id,
            cancelled: Arc::new(AtomicBool::new(false)),
            host,
            port,
            database,
            user,
        }))
    }
}

pub struct MysqlConnection {
    conn: Mutex<Conn>,
    kill_opts: Opts,
    connection_id: u64,
    cancelled: Arc<AtomicBool>,
    host: String,
    port: u16,
    database: Option<String>,
    user: Option<String>,
}

struct MysqlCancelHandle {
    kill_opts: Opts,
    connection_id: u64,
    cancelled: Arc<AtomicBool>,
}

impl QueryCancelHandle for MysqlCancelHandle {
    fn cancel(&self) -> Result<(), DbError> {
        self.cancelled.store(true, Ordering::SeqCst);

        let mut kill_conn = Conn::new(self.kill_opts.clone())
            .map_err(|e| DbError::query_failed(format!("failed to open kill connection: {e}")))?;

        let kill_query = format!("KILL QUERY {}", self.connection_id);
        match kill_conn.query_drop(&kill_query) {
            Ok(()) => {
                log::info!("[cancel] KILL QUERY {} sent successfully", self.connection_id);
                Ok(())
            }
            Err(e) => {
                log::warn!("[cancel] KILL QUERY failed ({e}), trying KILL...");
                let kill_cmd = format!("KILL {}", self.connection_id);
                kill_conn.query_drop(&kill_cmd).map_err(|e2| {
                    log::error!("[cancel] both KILL QUERY and KILL failed: {e2}");
                    DbError::query_failed(format!(
                        "permission denied to cancel query. KILL QUERY: {e}, KILL: {e2}"
                    ))
                })
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl DriverConnection for MysqlConnection {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            driver: "mysql",
            database: self.database.clone(),
            host: Some(self.host.clone()),
            port: Some(self.port),
            user: self.user.clone(),
        }
    }

    fn dialect(&self) -> &dyn SqlDialect {
        &DIALECT
    }

    fn query(&self, request: &QueryRequest, max_rows: usize) -> Result<ResultSet, DbError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let start = Instant::now();

        let mut conn = self.lock()?;
        let stmt = conn.prep(&request.sql).map_err(|e| self.query_error(e))?;

        let columns: Vec<ColumnMeta> = stmt
            .columns()
            .iter()
            .map(|col| ColumnMeta {
                name: col.name_str().to_string(),
                type_name: format!("{:?}", col.column_type()),
                nullable: true,
            })
            .collect();

        let params = mysql_params(&request.params);
        let rows: Vec<mysql::Row> = conn
            .exec(&stmt, params)
            .map_err(|e| self.query_error(e))?;

        let result_rows: Vec<Row> = rows
            .iter()
            .map(|row| {
                let row_cols = row.columns_ref();
                (0..columns.len())
                    .map(|i| mysql_value_to_value(row, i, &row_cols[i]))
                    .collect()
            })
            .collect();

        Ok(ResultSet {
            columns,
            rows: result_rows,
            affected_rows: None,
            execution_time: start.elapsed(),
            truncated: false,
        }
        .cap(max_rows))
    }

    fn exec(&self, sql: &str) -> Result<i64, DbError> {
        self.cancelled.store(false, Ordering::SeqCst);
        let mut conn = self.lock()?;
        conn.query_drop(sql).map_err(|e| self.query_error(e))?;
        Ok(conn.affected_rows() as i64)
    }

    fn ping(&self) -> Result<(), DbError> {
        let mut conn = self.lock()?;
        conn.query_drop("SELECT 1").map_err(|e| self.query_error(e))
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
        let sql = format!("SELECT * FROM {table_ref}{order_clause} LIMIT {limit} OFFSET {offset}");
        self.query(&QueryRequest::new(sql), max_rows)
    }

    fn list_tables(&self) -> Result<Vec<String>, DbError> {
        let mut conn = self.lock()?;
        let database = self.current_database()?;
        let rows: Vec<String> = conn
            .exec(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = ? AND table_type = 'BASE TABLE' ORDER BY table_name",
                (database,),
            )
            .map_err(|e| self.query_error(e))?;
        Ok(rows)
    }

    fn get_schema(&self, table: &str, schema: Option<&str>) -> Result<TableSchema, DbError> {
        let mut conn = self.lock()?;
        let database = match schema {
            Some(s) => s.to_string(),
            None => self.current_database()?,
        };

        let columns = fetch_columns(&mut conn, &database, table).map_err(|e| self.wrap(e))?;
        let indexes = fetch_indexes(&mut conn, &database, table).map_err(|e| self.wrap(e))?;
        let foreign_keys =
            fetch_foreign_keys(&mut conn, &database, table).map_err(|e| self.wrap(e))?;

        Ok(TableSchema {
            name: table.to_string(),
            schema: Some(database),
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

        let mut conn = self.lock()?;
        let set_clause = patch
            .changes
            .iter()
            .map(|c| format!("{} = ?", self.dialect().quote_identifier(&c.column)))
            .collect::<Vec<_>>()
            .join(", ");
        let mut params: Vec<Value> = patch.changes.iter().map(|c| c.value.clone()).collect();
        params.extend(patch.identity.values.clone());

        let where_clause = identity_where_clause(&patch.identity);
        let table_ref = self
            .dialect()
            .qualified_table(patch.schema.as_deref(), &patch.table);
        let sql = format!("UPDATE {table_ref} SET {set_clause} WHERE {where_clause}");

        conn.exec_drop(&sql, mysql_params(&params))
            .map_err(|e| self.query_error(e))?;
        let affected = conn.affected_rows();

        if affected == 0 {
            return Ok(CrudResult::empty());
        }

        let returning = select_by_identity(
            &mut conn,
            self.dialect(),
            &patch.table,
            patch.schema.as_deref(),
            &patch.identity,
        )
        .map_err(|e| self.wrap(e))?;
        Ok(CrudResult::new(affected, returning))
    }

    fn insert_row(&self, insert: &RowInsert) -> Result<CrudResult, DbError> {
        if !insert.is_valid() {
            return Err(DbError::query_failed("cannot insert row: no columns given"));
        }

        let mut conn = self.lock()?;
        let cols = insert
            .columns
            .iter()
            .map(|c| self.dialect().quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; insert.values.len()].join(", ");
        let table_ref = self
            .dialect()
            .qualified_table(insert.schema.as_deref(), &insert.table);
        let sql = format!("INSERT INTO {table_ref} ({cols}) VALUES ({placeholders})");

        conn.exec_drop(&sql, mysql_params(&insert.values))
            .map_err(|e| self.query_error(e))?;

        let last_id = conn.last_insert_id();
        let returning = if last_id > 0 {
            let select_sql = format!(
                "SELECT * FROM {table_ref} WHERE {} = {last_id} LIMIT 1",
                primary_key_column(&mut conn, insert.schema.as_deref(), &insert.table)
                    .map_err(|e| self.wrap(e))?
                    .unwrap_or_else(|| "id".to_string())
            );
            select_one(&mut conn, &select_sql).map_err(|e| self.wrap(e))?
        } else {
            None
        };

        Ok(CrudResult::new(1, returning))
    }

    fn delete_row(&self, delete: &RowDelete) -> Result<CrudResult, DbError> {
        if !delete.is_valid() {
            return Err(DbError::query_failed(
                "cannot delete row: missing primary key identity",
            ));
        }

        let mut conn = self.lock()?;
        let returning = select_by_identity(
            &mut conn,
            self.dialect(),
            &delete.table,
            delete.schema.as_deref(),
            &delete.identity,
        )
        .map_err(|e| self.wrap(e))?;

        let where_clause = identity_where_clause(&delete.identity);
        let table_ref = self
            .dialect()
            .qualified_table(delete.schema.as_deref(), &delete.table);
        let sql = format!("DELETE FROM {table_ref} WHERE {where_clause}");

        conn.exec_drop(&sql, mysql_params(&delete.identity.values))
            .map_err(|e| self.query_error(e))?;
        let affected = conn.affected_rows();

        if affected == 0 {
            return Ok(CrudResult::empty());
        }

        Ok(CrudResult::new(affected, returning))
    }

    fn estimate_row_count(&self, table: &str, schema: Option<&str>) -> Result<i64, DbError> {
        let mut conn = self.lock()?;
        let database = match schema {
            Some(s) => s.to_string(),
            None => self.current_database().map_err(|e| self.wrap(e))?,
        };

        let row: Option<Option<i64>> = conn
            .exec_first(
                "SELECT table_rows FROM information_schema.tables \
                 WHERE table_schema = ? AND table_name = ?",
                (database, table),
            )
            .map_err(|e| self.query_error(e))?;

        match row {
            Some(Some(n)) => Ok(n.max(0)),
            _ => Ok(-1),
        }
    }

    fn prepare_cancel(&self) -> Arc<dyn QueryCancelHandle> {
        Arc::new(MysqlCancelHandle {
            kill_opts: self.kill_opts.clone(),
            connection_id: self.connection_id,
            cancelled: self.cancelled.clone(),
        })
    }

    fn close(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}

impl MysqlConnection {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Conn>, DbError> {
        self.conn
            .lock()
            .map_err(|e| DbError::query_failed(format!("connection lock poisoned: {e}")))
    }

    fn current_database(&self) -> Result<String, DbError> {
        self.database
            .clone()
            .ok_or_else(|| DbError::query_failed("no database selected on this connection"))
    }

    fn wrap(&self, e: mysql::Error) -> DbError {
        self.query_error(e)
    }

    fn query_error(&self, e: mysql::Error) -> DbError {
        if self.cancelled.load(Ordering::SeqCst) {
            return DbError::Cancelled;
        }
        let message = e.to_string();
        if message.contains("Duplicate entry") || message.contains("foreign key constraint") {
            return DbError::ConstraintViolation(message);
        }
        if message.contains("You have an error in your SQL syntax") {
            return DbError::SyntaxError(message);
        }
        if message.contains("doesn't exist") {
            return DbError::ObjectNotFound(message);
        }
        DbError::QueryFailed(message)
    }
}

fn identity_where_clause(identity: &RowIdentity) -> String {
    identity
        .columns
        .iter()
        .map(|c| format!("{} = ?", DIALECT.quote_identifier(c)))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn select_by_identity(
    conn: &mut Conn,
    dialect: &dyn SqlDialect,
    table: &str,
    schema: Option<&str>,
    identity: &RowIdentity,
) -> Result<Option<Row>, mysql::Error> {
    let where_clause = identity_where_clause(identity);
    let table_ref = dialect.qualified_table(schema, table);
    let sql = format!("SELECT * FROM {table_ref} WHERE {where_clause}");
    let rows: Vec<mysql::Row> = conn.exec(&sql, mysql_params(&identity.values))?;
    Ok(rows.first().map(row_to_vec))
}

fn select_one(conn: &mut Conn, sql: &str) -> Result<Option<Row>, mysql::Error> {
    let rows: Vec<mysql::Row> = conn.query(sql)?;
    Ok(rows.first().map(row_to_vec))
}

fn row_to_vec(row: &mysql::Row) -> Row {
    let row_cols = row.columns_ref();
    (0..row_cols.len())
        .map(|i| mysql_value_to_value(row, i, &row_cols[i]))
        .collect()
}

fn primary_key_column(
    conn: &mut Conn,
    schema: Option<&str>,
    table: &str,
) -> Result<Option<String>, mysql::Error> {
    let database = schema.map(|s| s.to_string());
    if let Some(database) = database {
        let row: Option<String> = conn.exec_first(
            "SELECT column_name FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? AND column_key = 'PRI' LIMIT 1",
            (database, table),
        )?;
        Ok(row)
    } else {
        Ok(None)
    }
}

fn fetch_columns(conn: &mut Conn, database: &str, table: &str) -> Result<Vec<ColumnInfo>, DbError> {
    let rows: Vec<(String, String, String, Option<String>, String)> = conn
        .exec(
            "SELECT column_name, column_type, is_nullable, column_default, column_key \
             FROM information_schema.columns \
             WHERE table_schema = ? AND table_name = ? ORDER BY ordinal_position",
            (database, table),
        )
        .map_err(|e| DbError::QueryFailed(e.to_string()))?;

    Ok(rows
        .into_iter()
        .map(|(name, type_name, nullable, default, key)| ColumnInfo {
            name,
            type_name,
            nullable: nullable == "YES",
            default_value: default,
            is_primary_key: key == "PRI",
        })
        .collect())
}

fn fetch_indexes(conn: &mut Conn, database: &str, table: &str) -> Result<Vec<IndexInfo>, DbError> {
    let table_ref = DIALECT.qualified_table(Some(database), table);
    let sql = format!("SHOW INDEX FROM {table_ref}");
    let rows: Vec<mysql::Row> = conn.query(&sql).map_err(|e| DbError::QueryFailed(e.to_string()))?;

    let mut indexes_map: HashMap<String, IndexInfo> = HashMap::new();

    for row in rows {
        let key_name: String = row.get("Key_name").unwrap_or_default();
        let column_name: String = row.get("Column_name").unwrap_or_default();
        let non_unique: i32 = row.get("Non_unique").unwrap_or(1);

        let entry = indexes_map
            .entry(key_name.clone())
            .or_insert_with(|| IndexInfo {
                name: key_name,
                columns: Vec::new(),
                is_unique: non_unique == 0,
                is_primary: false,
            });
        entry.columns.push(column_name);
    }

    if let Some(pk) = indexes_map.get_mut("PRIMARY") {
        pk.is_primary = true;
    }

    Ok(indexes_map.into_values().collect())
}

fn fetch_foreign_keys(
    conn: &mut Conn,
    database: &str,
    table: &str,
) -> Result<Vec<ForeignKeyInfo>, DbError> {
    let rows: Vec<(String, String, String, String)> = conn
        .exec(
            "SELECT kcu.constraint_name, kcu.column_name, kcu.referenced_table_name, kcu.referenced_column_name \
             FROM information_schema.key_column_usage kcu \
             WHERE kcu.table_schema = ? AND kcu.table_name = ? AND kcu.referenced_table_name IS NOT NULL \
             ORDER BY kcu.constraint_name, kcu.ordinal_position",
            (database, table),
        )
        .map_err(|e| DbError::QueryFailed(e.to_string()))?;

    let mut fk_map: HashMap<String, ForeignKeyInfo> = HashMap::new();
    for (constraint_name, column, ref_table, ref_column) in rows {
        let entry = fk_map
            .entry(constraint_name.clone())
            .or_insert_with(|| ForeignKeyInfo {
                name: constraint_name,
                columns: Vec::new(),
                referenced_table: ref_table,
                referenced_columns: Vec::new(),
            });
        entry.columns.push(column);
        entry.referenced_columns.push(ref_column);
    }

    Ok(fk_map.into_values().collect())
}

fn mysql_value_to_value(row: &mysql::Row, idx: usize, col: &mysql::Column) -> Value {
    use mysql::consts::{ColumnFlags, ColumnType};

    let col_type = col.column_type();

    if col_type == ColumnType::MYSQL_TYPE_TINY && col.column_length() == 1 {
        if let Some(Ok(val)) = row.get_opt::<Option<i8>, _>(idx) {
            return match val {
                Some(v) => Value::Bool(v != 0),
                None => Value::Null,
            };
        }
    }

    if col_type == ColumnType::MYSQL_TYPE_LONGLONG && col.flags().contains(ColumnFlags::UNSIGNED_FLAG) {
        if let Some(Ok(val)) = row.get_opt::<Option<u64>, _>(idx) {
            return match val {
                Some(v) if v <= i64::MAX as u64 => Value::Int(v as i64),
                Some(v) => Value::Text(v.to_string()),
                None => Value::Null,
            };
        }
    }

    if matches!(
        col_type,
        ColumnType::MYSQL_TYPE_DATETIME | ColumnType::MYSQL_TYPE_TIMESTAMP
    ) {
        if let Some(mysql_val) = row.as_ref(idx) {
            match mysql_val {
                mysql::Value::Date(year, month, day, hour, min, sec, micro) => {
                    if let (Some(date), Some(time)) = (
                        chrono::NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32),
                        chrono::NaiveTime::from_hms_micro_opt(*hour as u32, *min as u32, *sec as u32, *micro),
                    ) {
                        let naive = chrono::NaiveDateTime::new(date, time);
                        return Value::DateTime(chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(
                            naive,
                            chrono::Utc,
                        ));
                    }
                }
                mysql::Value::NULL => return Value::Null,
                _ => {}
            }
        }
    }

    if col_type == ColumnType::MYSQL_TYPE_DATE {
        if let Some(mysql_val) = row.as_ref(idx) {
            match mysql_val {
                mysql::Value::Date(year, month, day, _, _, _, _) => {
                    if let Some(date) = chrono::NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32) {
                        return Value::Date(date);
                    }
                }
                mysql::Value::NULL => return Value::Null,
                _ => {}
            }
        }
    }

    if col_type == ColumnType::MYSQL_TYPE_TIME {
        if let Some(mysql_val) = row.as_ref(idx) {
            match mysql_val {
                mysql::Value::Time(_neg, _days, hours, mins, secs, micros) => {
                    if let Some(time) =
                        chrono::NaiveTime::from_hms_micro_opt(*hours as u32, *mins as u32, *secs as u32, *micros)
                    {
                        return Value::Time(time);
                    }
                }
                mysql::Value::NULL => return Value::Null,
                _ => {}
            }
        }
    }

    if let Some(Ok(val)) = row.get_opt::<Option<i64>, _>(idx) {
        return val.map(Value::Int).unwrap_or(Value::Null);
    }
    if let Some(Ok(val)) = row.get_opt::<Option<f64>, _>(idx) {
        return val.map(Value::Float).unwrap_or(Value::Null);
    }
    if let Some(Ok(val)) = row.get_opt::<Option<Vec<u8>>, _>(idx) {
        return val.map(Value::Bytes).unwrap_or(Value::Null);
    }
    match row.get_opt::<Option<String>, _>(idx) {
        Some(Ok(val)) => val.map(Value::Text).unwrap_or(Value::Null),
        _ => Value::Null,
    }
}

fn mysql_params(values: &[Value]) -> Params {
    if values.is_empty() {
        return Params::Empty;
    }

    let converted: Vec<mysql::Value> = values.iter().map(value_to_mysql_param).collect();
    Params::Positional(converted)
}

fn value_to_mysql_param(value: &Value) -> mysql::Value {
    match value {
        Value::Null => mysql::Value::NULL,
        Value::Bool(b) => mysql::Value::Int(if *b { 1 } else { 0 }),
        Value::Int(i) => mysql::Value::Int(*i),
        Value::Float(f) => mysql::Value::Double(*f),
        Value::Text(s) => mysql::Value::Bytes(s.clone().into_bytes()),
        Value::Bytes(b) => mysql::Value::Bytes(b.clone()),
        Value::DateTime(dt) => {
            let naive = dt.naive_utc();
            mysql::Value::Date(
                naive.date().year() as u16,
                naive.date().month() as u8,
                naive.date().day() as u8,
                naive.time().hour() as u8,
                naive.time().minute() as u8,
                naive.time().second() as u8,
                naive.time().nanosecond() / 1000,
            )
        }
        Value::Date(d) => mysql::Value::Date(d.year() as u16, d.month() as u8, d.day() as u8, 0, 0, 0, 0),
        Value::Time(t) => mysql::Value::Time(
            false,
            0,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1000,
        ),
    }
}

fn format_mysql_error(e: &mysql::Error, host: &str, port: u16) -> DbError {
    let source = e.to_string();

    let message = if source.contains("timed out") {
        format!(
            "Connection to {host}:{port} timed out. Check that the host is reachable and the port is open."
        )
    } else if source.contains("Connection refused") {
        format!("Connection refused at {host}:{port}. Verify MySQL is running and accepting connections.")
    } else if source.contains("Access denied") {
        "Authentication failed. Check your username and password.".to_string()
    } else if source.contains("Unknown database") {
        format!("Database does not exist: {source}")
    } else {
        format!("Connection error: {source}")
    };

    log::error!("mysql connection failed: {message}");
    DbError::ConnectionFailed(message)
}

fn format_mysql_query_error(e: &mysql::Error) -> DbError {
    DbError::QueryFailed(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_where_clause_joins_with_and() {
        let identity = RowIdentity::new(
            vec!["id".into(), "tenant".into()],
            vec![Value::Int(1), Value::Text("acme".into())],
        );
        assert_eq!(identity_where_clause(&identity), "`id` = ? AND `tenant` = ?");
    }

    #[test]
    fn value_to_mysql_param_converts_datetime() {
        let dt = chrono::DateTime::parse_from_rfc3339("2024-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        match value_to_mysql_param(&Value::DateTime(dt)) {
            mysql::Value::Date(year, month, day, hour, min, sec, _) => {
                assert_eq!(year, 2024);
                assert_eq!(month, 1);
                assert_eq!(day, 2);
                assert_eq!(hour, 3);
                assert_eq!(min, 4);
                assert_eq!(sec, 5);
            }
            other => panic!("expected Date value, got {other:?}"),
        }
    }

    #[test]
    fn dialect_quotes_with_backticks() {
        assert_eq!(DIALECT.quote_identifier("users"), "`users`");
    }
}
