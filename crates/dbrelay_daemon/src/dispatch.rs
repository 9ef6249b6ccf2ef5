//! Method table and request parsing (spec §4.4 "Dispatch").

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dbrelay_core::{DbError, RowDelete, RowPatch, TableSchema};
use serde_json::{Map, Value as Json, json};

use crate::json::json_to_value;
use crate::queue::{AsyncQueryKind, CompletionQueue};
use crate::session::{CancelOutcome, SessionManager};
use crate::worker;

pub const ERR_PARSE: i64 = -32700;
pub const ERR_INVALID_REQUEST: i64 = -32600;
pub const ERR_METHOD_NOT_FOUND: i64 = -32601;
pub const ERR_INVALID_PARAMS: i64 = -32602;
pub const ERR_INTERNAL: i64 = -32603;

/// A parsed (but not yet validated-against-the-method-table) JSON-RPC frame.
pub struct ParsedRequest {
    pub jsonrpc_is_2_0: bool,
    /// `Some` iff the `id` member was present in the frame (including an
    /// explicit `null`) — its absence, not its value, is what makes a
    /// message a notification.
    pub id: Option<Json>,
    pub method: Option<String>,
    pub params: Json,
}

pub fn parse_frame(bytes: &[u8]) -> Result<ParsedRequest, serde_json::Error> {
    let value: Json = serde_json::from_slice(bytes)?;
    let obj: Map<String, Json> = value.as_object().cloned().unwrap_or_default();

    Ok(ParsedRequest {
        jsonrpc_is_2_0: obj.get("jsonrpc").and_then(|v| v.as_str()) == Some("2.0"),
        id: obj.get("id").cloned(),
        method: obj
            .get("method")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
        params: obj.get("params").cloned().unwrap_or(Json::Null),
    })
}

pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcError {
    fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<DbError> for RpcError {
    fn from(e: DbError) -> Self {
        Self::new(e.to_rpc_code(), e.to_string())
    }
}

/// What the dispatcher did with a request (spec §4.4 "Handlers return a
/// three-way result").
pub enum HandlerOutcome {
    Sync(Result<Json, RpcError>),
    /// A worker has been launched; the response will arrive later via the
    /// completion queue. The writer must not emit anything now.
    Deferred,
}

impl HandlerOutcome {
    fn ok(value: Json) -> Self {
        HandlerOutcome::Sync(Ok(value))
    }

    fn err(code: i64, message: impl Into<String>) -> Self {
        HandlerOutcome::Sync(Err(RpcError::new(code, message)))
    }
}

/// Holds everything a handler needs: the session pool and the completion
/// queue it hands async work off to, plus the process-wide shutdown flag
/// `shutdown` sets.
pub struct Dispatcher {
    pub session: Arc<SessionManager>,
    pub queue: Arc<CompletionQueue>,
    pub shutdown_requested: Arc<AtomicBool>,
}

impl Dispatcher {
    /// `request_id` is `None` for a notification, `Some(_)` (possibly
    /// `Json::Null`) for a request expecting a response. Only the deferred
    /// methods (`query`, `exec`) need it — it rides along on the async
    /// query record so the eventual completion can be matched back to the
    /// client's original `id`, or silently dropped if it was a notification.
    pub fn dispatch(&self, method: &str, params: &Json, request_id: Option<Json>) -> HandlerOutcome {
        match method {
            "connect" => self.handle_connect(params),
            "disconnect" => self.handle_disconnect(params),
            "connections" => self.handle_connections(),
            "tables" => self.handle_tables(params),
            "schema" => self.handle_schema(params),
            "query" => self.handle_query(params, request_id),
            "count" => self.handle_count(params),
            "exec" => self.handle_exec(params, request_id),
            "update" => self.handle_update(params),
            "delete" => self.handle_delete(params),
            "cancel" => self.handle_cancel(params),
            "ping" => HandlerOutcome::ok(json!({ "status": "ok" })),
            "version" => self.handle_version(),
            "shutdown" => self.handle_shutdown(),
            _ => HandlerOutcome::err(ERR_METHOD_NOT_FOUND, format!("method not found: {method}")),
        }
    }

    fn handle_connect(&self, params: &Json) -> HandlerOutcome {
        let connstr = match get_str(params, "connstr") {
            Some(s) => s,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "missing 'connstr'"),
        };
        let password = get_str(params, "password");
        let max_result_rows = get_u64(params, "max_result_rows").map(|n| n as usize);

        match self.session.connect(connstr, password.as_deref(), max_result_rows) {
            Ok(conn_id) => HandlerOutcome::ok(json!({ "conn_id": conn_id })),
            Err(e) => HandlerOutcome::err(e.to_rpc_code(), e.to_string()),
        }
    }

    fn handle_disconnect(&self, params: &Json) -> HandlerOutcome {
        let conn_id = match get_conn_id(params) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };

        match self.session.disconnect(conn_id) {
            Ok(()) => HandlerOutcome::ok(json!({})),
            Err(_) => HandlerOutcome::err(ERR_INVALID_PARAMS, "Invalid connection ID"),
        }
    }

    fn handle_connections(&self) -> HandlerOutcome {
        let summaries = self.session.list();
        let array: Vec<Json> = summaries
            .into_iter()
            .map(|s| {
                json!({
                    "id": s.id,
                    "driver": s.driver,
                    "database": s.database,
                    "host": s.host,
                    "port": s.port,
                    "user": s.user,
                })
            })
            .collect();
        HandlerOutcome::ok(Json::Array(array))
    }

    fn handle_tables(&self, params: &Json) -> HandlerOutcome {
        let conn_id = match get_conn_id(params) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        let conn = match self.session.get(conn_id) {
            Some(conn) => conn,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "Invalid connection ID"),
        };

        match conn.list_tables() {
            Ok(tables) => HandlerOutcome::ok(json!(tables)),
            Err(e) => HandlerOutcome::err(e.to_rpc_code(), e.to_string()),
        }
    }

    fn handle_schema(&self, params: &Json) -> HandlerOutcome {
        let conn_id = match get_conn_id(params) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        let table = match get_str(params, "table") {
            Some(t) => t,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "missing 'table'"),
        };
        let conn = match self.session.get(conn_id) {
            Some(conn) => conn,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "Invalid connection ID"),
        };

        let (schema_name, table_name) = split_qualified_table(&table);
        match conn.get_schema(&table_name, schema_name.as_deref()) {
            Ok(schema) => HandlerOutcome::ok(schema_to_json(&schema)),
            Err(e) => HandlerOutcome::err(e.to_rpc_code(), e.to_string()),
        }
    }

    fn handle_query(&self, params: &Json, request_id: Option<Json>) -> HandlerOutcome {
        let conn_id = match get_conn_id(params) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        let table = match get_str(params, "table") {
            Some(t) => t,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "missing 'table'"),
        };
        if !self.session.contains(conn_id) {
            return HandlerOutcome::err(ERR_INVALID_PARAMS, "Invalid connection ID");
        }

        let offset = get_u64(params, "offset").unwrap_or(0);
        let limit = get_u64(params, "limit")
            .unwrap_or(worker::MAX_QUERY_LIMIT)
            .min(worker::MAX_QUERY_LIMIT);
        let (schema_name, table_name) = split_qualified_table(&table);

        worker::spawn(
            self.session.clone(),
            self.queue.clone(),
            conn_id,
            request_id,
            AsyncQueryKind::PaginatedRead {
                table: table_name,
                schema: schema_name,
                offset,
                limit,
            },
            self.session.max_result_rows(conn_id),
        );
        HandlerOutcome::Deferred
    }

    fn handle_count(&self, params: &Json) -> HandlerOutcome {
        let conn_id = match get_conn_id(params) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        let table = match get_str(params, "table") {
            Some(t) => t,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "missing 'table'"),
        };
        let conn = match self.session.get(conn_id) {
            Some(conn) => conn,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "Invalid connection ID"),
        };

        let (schema_name, table_name) = split_qualified_table(&table);
        match conn.estimate_row_count(&table_name, schema_name.as_deref()) {
            Ok(estimate) if estimate >= 0 => {
                HandlerOutcome::ok(json!({ "count": estimate, "approximate": true }))
            }
            _ => {
                let sql = format!(
                    "SELECT COUNT(*) FROM {}",
                    conn.dialect().qualified_table(schema_name.as_deref(), &table_name)
                );
                match conn.query(&dbrelay_core::QueryRequest::new(sql), 1) {
                    Ok(result) => {
                        let count = result
                            .rows
                            .first()
                            .and_then(|row| row.first())
                            .and_then(|v| match v {
                                dbrelay_core::Value::Int(i) => Some(*i),
                                dbrelay_core::Value::Float(f) => Some(*f as i64),
                                _ => None,
                            })
                            .unwrap_or(0);
                        HandlerOutcome::ok(json!({ "count": count, "approximate": false }))
                    }
                    Err(e) => HandlerOutcome::err(e.to_rpc_code(), e.to_string()),
                }
            }
        }
    }

    fn handle_exec(&self, params: &Json, request_id: Option<Json>) -> HandlerOutcome {
        let conn_id = match get_conn_id(params) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        let sql = match get_str(params, "sql") {
            Some(s) => s,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "missing 'sql'"),
        };
        if !self.session.contains(conn_id) {
            return HandlerOutcome::err(ERR_INVALID_PARAMS, "Invalid connection ID");
        }

        worker::spawn(
            self.session.clone(),
            self.queue.clone(),
            conn_id,
            request_id,
            AsyncQueryKind::RawStatement { sql },
            self.session.max_result_rows(conn_id),
        );
        HandlerOutcome::Deferred
    }

    fn handle_update(&self, params: &Json) -> HandlerOutcome {
        let conn_id = match get_conn_id(params) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        let table = match get_str(params, "table") {
            Some(t) => t,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "missing 'table'"),
        };
        let column = match get_str(params, "column") {
            Some(c) => c,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "missing 'column'"),
        };
        let value = params.get("value").cloned().unwrap_or(Json::Null);
        let pk_values = match get_pk_values(params) {
            Some(v) => v,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "missing 'pk'"),
        };

        let conn = match self.session.get(conn_id) {
            Some(conn) => conn,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "Invalid connection ID"),
        };

        let (schema_name, table_name) = split_qualified_table(&table);
        let identity = match resolve_primary_key_identity(
            conn.as_ref(),
            &table_name,
            schema_name.as_deref(),
            pk_values,
        ) {
            Ok(identity) => identity,
            Err(e) => return HandlerOutcome::err(e.to_rpc_code(), e.to_string()),
        };

        let patch = RowPatch::new(
            identity,
            table_name,
            schema_name,
            vec![dbrelay_core::CellUpdate {
                column,
                value: json_to_value(&value),
            }],
        );

        match conn.update_row(&patch) {
            Ok(_) => HandlerOutcome::ok(json!({})),
            Err(e) => HandlerOutcome::err(e.to_rpc_code(), e.to_string()),
        }
    }

    fn handle_delete(&self, params: &Json) -> HandlerOutcome {
        let conn_id = match get_conn_id(params) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        let table = match get_str(params, "table") {
            Some(t) => t,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "missing 'table'"),
        };
        let pk_values = match get_pk_values(params) {
            Some(v) => v,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "missing 'pk'"),
        };

        let conn = match self.session.get(conn_id) {
            Some(conn) => conn,
            None => return HandlerOutcome::err(ERR_INVALID_PARAMS, "Invalid connection ID"),
        };

        let (schema_name, table_name) = split_qualified_table(&table);
        let identity = match resolve_primary_key_identity(
            conn.as_ref(),
            &table_name,
            schema_name.as_deref(),
            pk_values,
        ) {
            Ok(identity) => identity,
            Err(e) => return HandlerOutcome::err(e.to_rpc_code(), e.to_string()),
        };

        let delete = RowDelete::new(identity, table_name, schema_name);
        match conn.delete_row(&delete) {
            Ok(_) => HandlerOutcome::ok(json!({})),
            Err(e) => HandlerOutcome::err(e.to_rpc_code(), e.to_string()),
        }
    }

    fn handle_cancel(&self, params: &Json) -> HandlerOutcome {
        let conn_id = match get_conn_id(params) {
            Ok(id) => id,
            Err(outcome) => return outcome,
        };
        if !self.session.contains(conn_id) {
            return HandlerOutcome::err(ERR_INVALID_PARAMS, "Invalid connection ID");
        }

        // Flag the in-flight async record first (the worker checks this
        // after its driver call returns), then ask the driver to interrupt
        // whatever is actually running.
        self.queue.request_cancel(conn_id);
        match self.session.cancel_query(conn_id) {
            Ok(CancelOutcome::Cancelled) => HandlerOutcome::ok(json!(true)),
            Ok(CancelOutcome::NoOp) => HandlerOutcome::ok(json!(false)),
            Err(e) => HandlerOutcome::err(e.to_rpc_code(), e.to_string()),
        }
    }

    fn handle_version(&self) -> HandlerOutcome {
        HandlerOutcome::ok(json!({
            "daemon_version": env!("CARGO_PKG_VERSION"),
            "protocol_version": "2.0",
            "drivers": ["sqlite", "postgres", "mysql", "mariadb"],
        }))
    }

    fn handle_shutdown(&self) -> HandlerOutcome {
        self.shutdown_requested.store(true, Ordering::SeqCst);
        HandlerOutcome::ok(json!({}))
    }
}

fn get_str(params: &Json, key: &str) -> Option<String> {
    params.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn get_u64(params: &Json, key: &str) -> Option<u64> {
    params.get(key).and_then(|v| v.as_u64())
}

fn get_conn_id(params: &Json) -> Result<u64, HandlerOutcome> {
    match params.get("conn_id").and_then(|v| v.as_u64()) {
        Some(id) => Ok(id),
        None => Err(HandlerOutcome::err(ERR_INVALID_PARAMS, "missing 'conn_id'")),
    }
}

fn get_pk_values(params: &Json) -> Option<Vec<dbrelay_core::Value>> {
    params
        .get("pk")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().map(json_to_value).collect())
}

/// Splits a possibly schema-qualified table reference (`"schema.table"`)
/// into its parts. Unqualified names are left as-is; the driver folds the
/// `None` schema to whatever its connection is already scoped to.
fn split_qualified_table(table: &str) -> (Option<String>, String) {
    match table.split_once('.') {
        Some((schema, name)) => (Some(schema.to_string()), name.to_string()),
        None => (None, table.to_string()),
    }
}

fn resolve_primary_key_identity(
    conn: &dyn dbrelay_core::DriverConnection,
    table: &str,
    schema: Option<&str>,
    pk_values: Vec<dbrelay_core::Value>,
) -> Result<dbrelay_core::RowIdentity, DbError> {
    let table_schema = conn.get_schema(table, schema)?;
    let pk_columns: Vec<String> = table_schema
        .columns
        .iter()
        .filter(|c| c.is_primary_key)
        .map(|c| c.name.clone())
        .collect();

    if pk_columns.is_empty() {
        return Err(DbError::query_failed(format!(
            "table '{table}' has no primary key columns to address a row by"
        )));
    }
    if pk_columns.len() != pk_values.len() {
        return Err(DbError::query_failed(format!(
            "expected {} primary key value(s) for table '{table}', got {}",
            pk_columns.len(),
            pk_values.len()
        )));
    }

    Ok(dbrelay_core::RowIdentity::new(pk_columns, pk_values))
}

fn schema_to_json(schema: &TableSchema) -> Json {
    let columns: Vec<Json> = schema
        .columns
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "type": c.type_name,
                "nullable": c.nullable,
                "primary_key": c.is_primary_key,
                "default": c.default_value,
            })
        })
        .collect();
    let indexes: Vec<Json> = schema
        .indexes
        .iter()
        .map(|i| {
            json!({
                "name": i.name,
                "columns": i.columns,
                "unique": i.is_unique,
                "primary": i.is_primary,
            })
        })
        .collect();
    let foreign_keys: Vec<Json> = schema
        .foreign_keys
        .iter()
        .map(|fk| {
            json!({
                "name": fk.name,
                "columns": fk.columns,
                "referenced_table": fk.referenced_table,
                "referenced_columns": fk.referenced_columns,
            })
        })
        .collect();

    json!({
        "columns": columns,
        "indexes": indexes,
        "foreign_keys": foreign_keys,
    })
}
