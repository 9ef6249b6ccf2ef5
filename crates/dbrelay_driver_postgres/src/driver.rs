use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dbrelay_core::{
    ColumnInfo, ColumnMeta, ConnectTarget, ConnectionInfo, CrudResult, DbError, DbKind, Driver,
    DriverConnection, ForeignKeyInfo, IndexInfo, PostgresDialect, QueryCancelHandle, QueryRequest,
    ResultSet, Row, RowDelete, RowIdentity, RowInsert, RowPatch, SqlDialect, TableSchema, Value,
};
use postgres::{CancelToken, Client, Config, NoTls};

static DIALECT: PostgresDialect = PostgresDialect;

pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Driver for PostgresDriver {
    fn kind(&self) -> DbKind {
        DbKind::Postgres
    }

    fn connect(
        &self,
        target: &ConnectTarget,
        password: Option<&str>,
    ) -> Result<Box<dyn DriverConnection>, DbError> {
        let url = match target {
            ConnectTarget::Postgres { url } => url,
            _ => {
                return Err(DbError::connection_failed(
                    "postgres driver given a non-postgres connection target",
                ));
            }
        };

        let mut config =
            Config::from_str(url).map_err(|e| DbError::InvalidConnectionString(e.to_string()))?;
        if let Some(pw) = password {
            config.password(pw);
        }

        let host = config
            .get_hosts()
            .first()
            .map(host_to_string)
            .unwrap_or_else(|| "localhost".to_string());
        let port = config.get_ports().first().copied().unwrap_or(5432);
        let dbname = config.get_dbname().map(|s| s.to_string());
        let user = config.get_user().map(|s| s.to_string());

        let client = config
            .connect(NoTls)
            .map_err(|e| format_pg_error(&e, &host, port))?;

        let cancel_token = client.cancel_token();

        Ok(Box::new(PostgresConnection {
            client: Mutex::new(client),
            cancel_token,
            cancelled: Arc::new(AtomicBool::new(false)),
            host,
            port,
            dbname,
            user,
        }))
    }
}

fn host_to_string(host: &postgres::config::Host) -> String {
    match host {
        postgres::config::Host::Tcp(s) => s.clone(),
        #[cfg(unix)]
        postgres::config::Host::Unix(p) => p.to_string_lossy().to_string(),
    }
}

pub struct PostgresConnection {
    client: Mutex<Client>,
    cancel_token: CancelToken,
    cancelled: Arc<AtomicBool>,
    host: String,
    port: u16,
    dbname: Option<String>,
    user: Option<String>,
}

struct PostgresCancelHandle {
    cancel_token: CancelToken,
    cancelled: Arc<AtomicBool>,
}

impl QueryCancelHandle for PostgresCancelHandle {
    fn cancel(&self) -> Result<(), DbError> {
        self.cancelled.store(true, Ordering::SeqCst);

        self.cancel_token.cancel_query(NoTls).map_err(|e| {
            log::error!("[cancel] postgres cancel request failed: {}", e);
            DbError::query_failed(format!("failed to cancel query: {}", e))
        })?;

        log::info!("[cancel] postgres cancel request sent");
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl DriverConnection for PostgresConnection {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            driver: "postgres",
            database: self.dbname.clone(),
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

        let mut client = self.lock()?;
        let params = pg_params(&request.params);
        let param_refs: Vec<&(dyn postgres::types::ToSql + Sync)> =
            params.iter().map(|p| p.as_ref()).collect();

        let rows = client
            .query(&request.sql, &param_refs)
            .map_err(|e| self.query_error(e))?;

        if rows.is_empty() {
            return Ok(ResultSet {
                columns: Vec::new(),
                rows: Vec::new(),
                affected_rows: None,
                execution_time: start.elapsed(),
                truncated: false,
            });
        }

        let columns: Vec<ColumnMeta> = rows[0]
            .columns()
            .iter()
            .map(|col| ColumnMeta {
                name: col.name().to_string(),
                type_name: col.type_().name().to_string(),
                nullable: true,
            })
            .collect();

        let result_rows: Vec<Row> = rows
            .iter()
            .map(|row| (0..columns.len()).map(|i| postgres_value_to_value(row, i)).collect())
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
        let mut client = self.lock()?;
        let affected = client
            .execute(sql, &[])
            .map_err(|e| self.query_error(e))?;
        Ok(affected as i64)
    }

    fn ping(&self) -> Result<(), DbError> {
        let mut client = self.lock()?;
        client
            .execute("SELECT 1", &[])
            .map_err(|e| self.query_error(e))?;
        Ok(())
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
        let mut client = self.lock()?;
        let rows = client
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = 'public' AND table_type = 'BASE TABLE' \
                 ORDER BY table_name",
                &[],
            )
            .map_err(|e| self.query_error(e))?;
        Ok(rows.iter().map(|row| row.get::<_, String>(0)).collect())
    }

    fn get_schema(&self, table: &str, schema: Option<&str>) -> Result<TableSchema, DbError> {
        let mut client = self.lock()?;
        let schema_name = schema.unwrap_or("public");

        let columns = get_columns(&mut client, schema_name, table)?;
        let indexes = get_indexes(&mut client, schema_name, table)?;
        let foreign_keys = get_foreign_keys(&mut client, schema_name, table)?;

        Ok(TableSchema {
            name: table.to_string(),
            schema: Some(schema_name.to_string()),
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

        let mut client = self.lock()?;

        let mut param_values: Vec<Value> = patch.changes.iter().map(|c| c.value.clone()).collect();
        param_values.extend(patch.identity.values.clone());

        let set_clause = patch
            .changes
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", self.dialect().quote_identifier(&c.column), i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let where_clause = identity_where_clause(&patch.identity, patch.changes.len());

        let table_ref = self
            .dialect()
            .qualified_table(patch.schema.as_deref(), &patch.table);
        let sql = format!("UPDATE {table_ref} SET {set_clause} WHERE {where_clause}");

        let params = pg_params(&param_values);
        let param_refs: Vec<&(dyn postgres::types::ToSql + Sync)> =
            params.iter().map(|p| p.as_ref()).collect();

        let affected = client
            .execute(&sql, &param_refs)
            .map_err(|e| self.query_error(e))?;

        if affected == 0 {
            return Ok(CrudResult::empty());
        }

        let returning = select_by_identity(&mut client, self.dialect(), &patch.table, patch.schema.as_deref(), &patch.identity)?;
        Ok(CrudResult::new(affected, returning))
    }

    fn insert_row(&self, insert: &RowInsert) -> Result<CrudResult, DbError> {
        if !insert.is_valid() {
            return Err(DbError::query_failed("cannot insert row: no columns given"));
        }

        let mut client = self.lock()?;

        let cols = insert
            .columns
            .iter()
            .map(|c| self.dialect().quote_identifier(c))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = (1..=insert.values.len())
            .map(|i| format!("${i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let table_ref = self
            .dialect()
            .qualified_table(insert.schema.as_deref(), &insert.table);
        let sql = format!("INSERT INTO {table_ref} ({cols}) VALUES ({placeholders}) RETURNING *");

        let params = pg_params(&insert.values);
        let param_refs: Vec<&(dyn postgres::types::ToSql + Sync)> =
            params.iter().map(|p| p.as_ref()).collect();

        let rows = client
            .query(&sql, &param_refs)
            .map_err(|e| self.query_error(e))?;

        let returning = rows
            .first()
            .map(|row| (0..row.columns().len()).map(|i| postgres_value_to_value(row, i)).collect());

        Ok(CrudResult::new(1, returning))
    }

    fn delete_row(&self, delete: &RowDelete) -> Result<CrudResult, DbError> {
        if !delete.is_valid() {
            return Err(DbError::query_failed(
                "cannot delete row: missing primary key identity",
            ));
        }

        let mut client = self.lock()?;
        let returning = select_by_identity(
            &mut client,
            self.dialect(),
            &delete.table,
            delete.schema.as_deref(),
            &delete.identity,
        )?;

        let where_clause = identity_where_clause(&delete.identity, 0);
        let table_ref = self
            .dialect()
            .qualified_table(delete.schema.as_deref(), &delete.table);
        let sql = format!("DELETE FROM {table_ref} WHERE {where_clause}");

        let params = pg_params(&delete.identity.values);
        let param_refs: Vec<&(dyn postgres::types::ToSql + Sync)> =
            params.iter().map(|p| p.as_ref()).collect();

        let affected = client
            .execute(&sql, &param_refs)
            .map_err(|e| self.query_error(e))?;

        if affected == 0 {
            return Ok(CrudResult::empty());
        }

        Ok(CrudResult::new(affected, returning))
    }

    fn estimate_row_count(&self, table: &str, schema: Option<&str>) -> Result<i64, DbError> {
        let mut client = self.lock()?;
        let schema_name = schema.unwrap_or("public");

        let row = client
            .query_opt(
                "SELECT reltuples::bigint FROM pg_class c \
                 JOIN pg_namespace n ON n.oid = c.relnamespace \
                 WHERE n.nspname = $1 AND c.relname = $2",
                &[&schema_name, &table],
            )
            .map_err(|e| self.query_error(e))?;

        match row {
            Some(row) => Ok(row.get::<_, i64>(0).max(0)),
            None => Ok(-1),
        }
    }

    fn prepare_cancel(&self) -> Arc<dyn QueryCancelHandle> {
        Arc::new(PostgresCancelHandle {
            cancel_token: self.cancel_token.clone(),
            cancelled: self.cancelled.clone(),
        })
    }

    fn close(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}

impl PostgresConnection {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Client>, DbError> {
        self.client
            .lock()
            .map_err(|e| DbError::query_failed(format!("connection lock poisoned: {e}")))
    }

    fn query_error(&self, e: postgres::Error) -> DbError {
        if self.cancelled.load(Ordering::SeqCst)
            || e.code() == Some(&postgres::error::SqlState::QUERY_CANCELED)
        {
            return DbError::Cancelled;
        }
        if let Some(db_err) = e.as_db_error() {
            if db_err.code() == &postgres::error::SqlState::UNIQUE_VIOLATION
                || db_err.code() == &postgres::error::SqlState::FOREIGN_KEY_VIOLATION
                || db_err.code() == &postgres::error::SqlState::NOT_NULL_VIOLATION
            {
                return DbError::ConstraintViolation(db_err.message().to_string());
            }
            if db_err.code() == &postgres::error::SqlState::SYNTAX_ERROR {
                return DbError::SyntaxError(db_err.message().to_string());
            }
            if db_err.code() == &postgres::error::SqlState::UNDEFINED_TABLE
                || db_err.code() == &postgres::error::SqlState::UNDEFINED_COLUMN
            {
                return DbError::ObjectNotFound(db_err.message().to_string());
            }
        }
        DbError::QueryFailed(e.to_string())
    }
}

fn identity_where_clause(identity: &RowIdentity, param_offset: usize) -> String {
    identity
        .columns
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} = ${}", DIALECT.quote_identifier(c), param_offset + i + 1))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn select_by_identity(
    client: &mut Client,
    dialect: &dyn SqlDialect,
    table: &str,
    schema: Option<&str>,
    identity: &RowIdentity,
) -> Result<Option<Row>, DbError> {
    let where_clause = identity_where_clause(identity, 0);
    let table_ref = dialect.qualified_table(schema, table);
    let sql = format!("SELECT * FROM {table_ref} WHERE {where_clause}");

    let params = pg_params(&identity.values);
    let param_refs: Vec<&(dyn postgres::types::ToSql + Sync)> =
        params.iter().map(|p| p.as_ref()).collect();

    let rows = client
        .query(&sql, &param_refs)
        .map_err(|e| DbError::QueryFailed(e.to_string()))?;

    Ok(rows
        .first()
        .map(|row| (0..row.columns().len()).map(|i| postgres_value_to_value(row, i)).collect()))
}

fn get_columns(client: &mut Client, schema: &str, table: &str) -> Result<Vec<ColumnInfo>, DbError> {
    let rows = client
        .query(
            r#"
            SELECT
                c.column_name,
                c.data_type,
                c.is_nullable = 'YES' as nullable,
                c.column_default,
                COALESCE(
                    (SELECT true FROM information_schema.table_constraints tc
                     JOIN information_schema.key_column_usage kcu
                       ON tc.constraint_name = kcu.constraint_name
                      AND tc.table_schema = kcu.table_schema
                     WHERE tc.constraint_type = 'PRIMARY KEY'
                       AND tc.table_schema = c.table_schema
                       AND tc.table_name = c.table_name
                       AND kcu.column_name = c.column_name),
                    false
                ) as is_pk
            FROM information_schema.columns c
            WHERE c.table_schema = $1 AND c.table_name = $2
            ORDER BY c.ordinal_position
            "#,
            &[&schema, &table],
        )
        .map_err(|e| DbError::QueryFailed(e.to_string()))?;

    Ok(rows
        .iter()
        .map(|row| ColumnInfo {
            name: row.get(0),
            type_name: row.get(1),
            nullable: row.get(2),
            default_value: row.get(3),
            is_primary_key: row.get(4),
        })
        .collect())
}

fn get_indexes(client: &mut Client, schema: &str, table: &str) -> Result<Vec<IndexInfo>, DbError> {
    let rows = client
        .query(
            r#"
            SELECT
                i.relname as index_name,
                array_agg(a.attname ORDER BY k.n) as columns,
                ix.indisunique as is_unique,
                ix.indisprimary as is_primary
            FROM pg_index ix
            JOIN pg_class i ON i.oid = ix.indexrelid
            JOIN pg_class t ON t.oid = ix.indrelid
            JOIN pg_namespace n ON n.oid = t.relnamespace
            JOIN LATERAL unnest(ix.indkey) WITH ORDINALITY AS k(attnum, n) ON true
            JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
            WHERE n.nspname = $1 AND t.relname = $2
            GROUP BY i.relname, ix.indisunique, ix.indisprimary
            ORDER BY i.relname
            "#,
            &[&schema, &table],
        )
        .map_err(|e| DbError::QueryFailed(e.to_string()))?;

    Ok(rows
        .iter()
        .map(|row| {
            let columns: Vec<String> = row.get(1);
            IndexInfo {
                name: row.get(0),
                columns,
                is_unique: row.get(2),
                is_primary: row.get(3),
            }
        })
        .collect())
}

fn get_foreign_keys(
    client: &mut Client,
    schema: &str,
    table: &str,
) -> Result<Vec<ForeignKeyInfo>, DbError> {
    let rows = client
        .query(
            r#"
            SELECT
                tc.constraint_name,
                kcu.column_name,
                ccu.table_name as referenced_table,
                ccu.column_name as referenced_column
            FROM information_schema.table_constraints tc
            JOIN information_schema.key_column_usage kcu
              ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
            JOIN information_schema.constraint_column_usage ccu
              ON tc.constraint_name = ccu.constraint_name AND tc.table_schema = ccu.table_schema
            WHERE tc.constraint_type = 'FOREIGN KEY'
              AND tc.table_schema = $1 AND tc.table_name = $2
            ORDER BY tc.constraint_name, kcu.ordinal_position
            "#,
            &[&schema, &table],
        )
        .map_err(|e| DbError::QueryFailed(e.to_string()))?;

    let mut fk_map: HashMap<String, ForeignKeyInfo> = HashMap::new();
    for row in rows {
        let name: String = row.get(0);
        let column: String = row.get(1);
        let referenced_table: String = row.get(2);
        let referenced_column: String = row.get(3);

        let entry = fk_map.entry(name.clone()).or_insert_with(|| ForeignKeyInfo {
            name,
            columns: Vec::new(),
            referenced_table,
            referenced_columns: Vec::new(),
        });
        entry.columns.push(column);
        entry.referenced_columns.push(referenced_column);
    }

    Ok(fk_map.into_values().collect())
}

fn postgres_value_to_value(row: &postgres::Row, idx: usize) -> Value {
    let col_type = row.columns()[idx].type_();

    match col_type.name() {
        "bool" => row
            .try_get::<_, bool>(idx)
            .map(Value::Bool)
            .unwrap_or(Value::Null),
        "int2" => row
            .try_get::<_, i16>(idx)
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),
        "int4" => row
            .try_get::<_, i32>(idx)
            .map(|v| Value::Int(v as i64))
            .unwrap_or(Value::Null),
        "int8" => row
            .try_get::<_, i64>(idx)
            .map(Value::Int)
            .unwrap_or(Value::Null),
        "float4" => row
            .try_get::<_, f32>(idx)
            .map(|v| Value::Float(v as f64))
            .unwrap_or(Value::Null),
        "float8" | "numeric" => row
            .try_get::<_, f64>(idx)
            .map(Value::Float)
            .unwrap_or(Value::Null),
        "bytea" => row
            .try_get::<_, Vec<u8>>(idx)
            .map(Value::Bytes)
            .unwrap_or(Value::Null),
        "timestamp" | "timestamptz" => row
            .try_get::<_, chrono::NaiveDateTime>(idx)
            .map(|dt| Value::DateTime(chrono::DateTime::from_naive_utc_and_offset(dt, chrono::Utc)))
            .unwrap_or(Value::Null),
        "date" => row
            .try_get::<_, chrono::NaiveDate>(idx)
            .map(Value::Date)
            .unwrap_or(Value::Null),
        "time" => row
            .try_get::<_, chrono::NaiveTime>(idx)
            .map(Value::Time)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<_, String>(idx)
            .map(Value::Text)
            .unwrap_or(Value::Null),
    }
}

fn pg_params(values: &[Value]) -> Vec<Box<dyn postgres::types::ToSql + Sync>> {
    values
        .iter()
        .map(|v| -> Box<dyn postgres::types::ToSql + Sync> {
            match v {
                Value::Null => Box::new(Option::<String>::None),
                Value::Bool(b) => Box::new(*b),
                Value::Int(i) => Box::new(*i),
                Value::Float(f) => Box::new(*f),
                Value::Text(s) => Box::new(s.clone()),
                Value::Bytes(b) => Box::new(b.clone()),
                Value::DateTime(dt) => Box::new(dt.naive_utc()),
                Value::Date(d) => Box::new(*d),
                Value::Time(t) => Box::new(*t),
            }
        })
        .collect()
}

fn format_pg_error(e: &postgres::Error, host: &str, port: u16) -> DbError {
    let source = e.to_string();

    let message = if source.contains("timed out") {
        format!(
            "Connection to {}:{} timed out. Check that the host is reachable and the port is open.",
            host, port
        )
    } else if source.contains("Connection refused") {
        format!(
            "Connection refused at {}:{}. Verify PostgreSQL is running and accepting connections.",
            host, port
        )
    } else if source.contains("password authentication failed") {
        "Authentication failed. Check your username and password.".to_string()
    } else if source.contains("does not exist") {
        format!("Database or user does not exist: {}", source)
    } else if source.contains("no pg_hba.conf entry") {
        format!(
            "Server rejected connection from this host. Check pg_hba.conf on {}.",
            host
        )
    } else if source.contains("error connecting to server") || source.contains("could not connect")
    {
        format!(
            "Could not connect to {}:{}. The server may be unreachable or behind a firewall.",
            host, port
        )
    } else if source.contains("Name or service not known")
        || source.contains("nodename nor servname")
    {
        format!("Could not resolve hostname: {}", host)
    } else {
        format!("Connection error: {}", source)
    };

    log::error!("postgres connection failed: {}", message);
    DbError::ConnectionFailed(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_where_clause_orders_params_after_offset() {
        let identity = RowIdentity::new(vec!["id".into()], vec![Value::Int(1)]);
        assert_eq!(identity_where_clause(&identity, 2), "\"id\" = $3");
    }

    #[test]
    fn dialect_uses_dollar_number_placeholders_and_returning() {
        assert_eq!(
            DIALECT.placeholder_style(),
            dbrelay_core::PlaceholderStyle::DollarNumber
        );
        assert!(DIALECT.supports_returning());
    }
}
