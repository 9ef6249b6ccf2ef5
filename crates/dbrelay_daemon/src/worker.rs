//! Thread-per-query worker (spec §4.3). Runs the blocking driver call off
//! the protocol thread and reports exactly one terminal outcome back
//! through the completion queue.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;

use dbrelay_core::{DbError, QueryRequest, ResultSet};
use serde_json::json;

use crate::json::{result_set_to_json, value_to_json};
use crate::queue::{AsyncOutcome, AsyncQueryHandle, AsyncQueryKind, CompletionQueue};
use crate::session::SessionManager;

const ERR_INVALID_CONN_ID: i64 = -32602;
const ERR_INTERNAL: i64 = -32603;
const ERR_CANCELLED: i64 = -32000;

/// Default cap on `query`'s `limit` parameter (spec §4.4 method table).
pub const MAX_QUERY_LIMIT: u64 = 10_000;

/// Launches a detached worker thread for `kind` targeting `slot_id`.
///
/// Registers the async query on the completion queue and asks the session
/// manager to prepare cancellation *before* spawning, so a `cancel` request
/// arriving in the window between dispatch and the worker actually entering
/// the driver call still finds an active entry.
///
/// If thread creation itself fails, the query goes straight to the error
/// terminal state and is pushed immediately — the failure path reuses the
/// same response channel as success (spec §4.3).
pub fn spawn(
    session: Arc<SessionManager>,
    queue: Arc<CompletionQueue>,
    slot_id: u64,
    request_id: Option<serde_json::Value>,
    kind: AsyncQueryKind,
    max_rows: usize,
) {
    let handle = queue.register(slot_id, request_id);
    session.prepare_cancel(slot_id);

    let spawned = thread::Builder::new()
        .name(format!("dbrelay-worker-{}", handle.query_id))
        .spawn({
            let handle = handle.clone();
            let queue = queue.clone();
            let session = session.clone();
            move || run(session, queue, handle, kind, max_rows)
        });

    if let Err(e) = spawned {
        log::error!("failed to spawn worker thread: {e}");
        handle.set_outcome(AsyncOutcome::Error {
            code: ERR_INTERNAL,
            message: format!("failed to start worker: {e}"),
        });
        queue.push(handle);
    }
}

fn run(
    session: Arc<SessionManager>,
    queue: Arc<CompletionQueue>,
    handle: Arc<AsyncQueryHandle>,
    kind: AsyncQueryKind,
    max_rows: usize,
) {
    let conn = match session.get(handle.slot_id) {
        Some(conn) => conn,
        None => {
            handle.set_outcome(AsyncOutcome::Error {
                code: ERR_INVALID_CONN_ID,
                message: "Invalid connection ID".to_string(),
            });
            queue.push(handle);
            return;
        }
    };

    let result: Result<serde_json::Value, DbError> = match &kind {
        AsyncQueryKind::PaginatedRead {
            table,
            schema,
            offset,
            limit,
        } => run_paginated_read(conn.as_ref(), table, schema.as_deref(), *offset, *limit, max_rows),
        AsyncQueryKind::RawStatement { sql } => run_raw_statement(conn.as_ref(), sql, max_rows),
    };

    session.finish_query(handle.slot_id);

    let outcome = if handle.cancel_requested.load(Ordering::SeqCst) {
        AsyncOutcome::Cancelled
    } else {
        match result {
            Ok(value) => AsyncOutcome::Completed(value),
            Err(e) => AsyncOutcome::Error {
                code: e.to_rpc_code(),
                message: e.to_string(),
            },
        }
    };

    handle.set_outcome(outcome);
    queue.push(handle);
}

fn run_paginated_read(
    conn: &dyn dbrelay_core::DriverConnection,
    table: &str,
    schema: Option<&str>,
    offset: u64,
    limit: u64,
    max_rows: usize,
) -> Result<serde_json::Value, DbError> {
    let capped_limit = limit.min(MAX_QUERY_LIMIT);
    let result = conn.paginated_query(table, schema, offset, capped_limit, None, max_rows)?;

    let total = match conn.estimate_row_count(table, schema) {
        Ok(estimate) if estimate >= 0 => estimate,
        _ => exact_row_count(conn, table, schema).unwrap_or(result.row_count() as i64),
    };

    Ok(result_set_to_json(&result, total))
}

fn run_raw_statement(
    conn: &dyn dbrelay_core::DriverConnection,
    sql: &str,
    max_rows: usize,
) -> Result<serde_json::Value, DbError> {
    if is_result_returning(sql) {
        let result = conn.query(&QueryRequest::new(sql), max_rows)?;
        let total = result.row_count() as i64;
        Ok(json!({
            "type": "select",
            "data": result_set_to_json(&result, total),
        }))
    } else {
        let affected = conn.exec(sql)?;
        Ok(json!({
            "type": "exec",
            "affected": affected,
        }))
    }
}

fn exact_row_count(
    conn: &dyn dbrelay_core::DriverConnection,
    table: &str,
    schema: Option<&str>,
) -> Result<i64, DbError> {
    exact_row_count_via_query(conn, table, schema, 1)
}

fn exact_row_count_via_query(
    conn: &dyn dbrelay_core::DriverConnection,
    table: &str,
    schema: Option<&str>,
    max_rows: usize,
) -> Result<i64, DbError> {
    let table_ref = conn.dialect().qualified_table(schema, table);
    let sql = format!("SELECT COUNT(*) FROM {table_ref}");
    let result: ResultSet = conn.query(&QueryRequest::new(sql), max_rows.max(1))?;
    let count = result
        .rows
        .first()
        .and_then(|row| row.first())
        .map(value_to_count)
        .unwrap_or(0);
    Ok(count)
}

fn value_to_count(v: &dbrelay_core::Value) -> i64 {
    match v {
        dbrelay_core::Value::Int(i) => *i,
        dbrelay_core::Value::Float(f) => *f as i64,
        _ => 0,
    }
}

/// Leading-keyword check used by the `exec` method to route raw statements
/// between the result-returning and affected-rows paths (spec §4.3).
fn is_result_returning(sql: &str) -> bool {
    const RESULT_RETURNING: [&str; 5] = ["SELECT", "PRAGMA", "SHOW", "DESCRIBE", "EXPLAIN"];
    let trimmed = sql.trim_start();
    let leading_word: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    let upper = leading_word.to_ascii_uppercase();
    RESULT_RETURNING.contains(&upper.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_result_returning_keywords_case_insensitively() {
        assert!(is_result_returning("select * from t"));
        assert!(is_result_returning("  SeLeCt 1"));
        assert!(is_result_returning("PRAGMA table_info(t)"));
        assert!(is_result_returning("explain query plan select 1"));
    }

    #[test]
    fn treats_everything_else_as_an_exec_statement() {
        assert!(!is_result_returning("insert into t values (1)"));
        assert!(!is_result_returning("update t set x = 1"));
        assert!(!is_result_returning("delete from t"));
        assert!(!is_result_returning(""));
    }

    #[test]
    fn value_to_count_only_trusts_numeric_cells() {
        assert_eq!(value_to_count(&dbrelay_core::Value::Int(5)), 5);
        assert_eq!(value_to_count(&dbrelay_core::Value::Float(2.9)), 2);
        assert_eq!(value_to_count(&dbrelay_core::Value::Null), 0);
    }
}
