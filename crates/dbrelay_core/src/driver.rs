use std::sync::Arc;

use crate::{
    ConnectTarget, CrudResult, DbError, DbKind, QueryCancelHandle, QueryRequest, ResultSet,
    RowDelete, RowInsert, RowPatch, SqlDialect, TableSchema,
};

/// Connection-identifying metadata surfaced by the `connections` method.
///
/// The session manager owns the integer id; everything else here comes from
/// the driver (what it was told to connect to, in a form safe to echo back
/// to the client — no password).
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub driver: &'static str,
    pub database: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
}

/// Per-backend connection factory. One implementation per supported
/// [`DbKind`], registered in the daemon's static driver table.
pub trait Driver: Send + Sync {
    fn kind(&self) -> DbKind;

    /// Open a new connection to `target`, using `password` when the scheme
    /// doesn't already carry credentials.
    fn connect(
        &self,
        target: &ConnectTarget,
        password: Option<&str>,
    ) -> Result<Box<dyn DriverConnection>, DbError>;
}

/// Everything the session manager and workers need from a single live
/// connection, independent of which back-end is mounted.
///
/// Mirrors the capability table in the design notes; `free_result` /
/// `free_schema` / `free_string_list` / `free_cancel_handle` have no
/// counterpart here because ownership of `ResultSet`/`TableSchema`/
/// `Vec<String>`/`Arc<dyn QueryCancelHandle>` is released by normal Rust
/// drop semantics instead of an explicit free call.
pub trait DriverConnection: Send + Sync {
    fn info(&self) -> ConnectionInfo;

    fn dialect(&self) -> &dyn SqlDialect;

    /// Cheapest possible round trip to the back-end ("SELECT 1" or
    /// equivalent). The session manager calls this once right after
    /// `Driver::connect` succeeds, so a connection string that parses but
    /// names an unreachable or misconfigured server fails the `connect`
    /// request itself rather than surfacing on the first real query.
    fn ping(&self) -> Result<(), DbError>;

    /// Run a free-form query and return its full result set, already capped
    /// per `max_rows`.
    fn query(&self, request: &QueryRequest, max_rows: usize) -> Result<ResultSet, DbError>;

    /// Run a statement that doesn't return rows. Returns the affected-row
    /// count, or `-1` when the backend can't report one.
    fn exec(&self, sql: &str) -> Result<i64, DbError>;

    /// Scan `table` starting at `offset`, capped at `limit` rows (callers
    /// enforce the 10,000-row method cap before calling this).
    fn paginated_query(
        &self,
        table: &str,
        schema: Option<&str>,
        offset: u64,
        limit: u64,
        order_by: Option<&str>,
        max_rows: usize,
    ) -> Result<ResultSet, DbError>;

    fn list_tables(&self) -> Result<Vec<String>, DbError>;

    fn get_schema(&self, table: &str, schema: Option<&str>) -> Result<TableSchema, DbError>;

    fn update_row(&self, patch: &RowPatch) -> Result<CrudResult, DbError>;

    fn insert_row(&self, insert: &RowInsert) -> Result<CrudResult, DbError>;

    fn delete_row(&self, delete: &RowDelete) -> Result<CrudResult, DbError>;

    /// Fast approximate row count from catalogue statistics. `-1` means no
    /// estimate is available; the caller decides whether to fall back to an
    /// exact `COUNT(*)`.
    fn estimate_row_count(&self, table: &str, schema: Option<&str>) -> Result<i64, DbError>;

    /// Produce a handle a second thread can use to interrupt whatever
    /// statement runs next on this connection. Called once per in-flight
    /// query by the worker, before the blocking driver call.
    fn prepare_cancel(&self) -> Arc<dyn QueryCancelHandle>;

    fn close(&mut self) -> Result<(), DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_info_has_no_password_field() {
        let info = ConnectionInfo {
            driver: "sqlite",
            database: Some("/tmp/t.db".into()),
            host: None,
            port: None,
            user: None,
        };
        assert_eq!(info.driver, "sqlite");
    }
}
