use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dbrelay_core::{
    ConnectTarget, ConnectionInfo, CrudResult, DbError, DbKind, DefaultSqlDialect, Driver,
    DriverConnection, NoopCancelHandle, QueryCancelHandle, QueryRequest, ResultSet, RowDelete,
    RowInsert, RowPatch, SqlDialect, TableSchema,
};

#[derive(Debug, Clone)]
pub enum FakeQueryOutcome {
    Success(ResultSet),
    Error(String),
    Cancelled,
}

impl FakeQueryOutcome {
    fn into_result(self) -> Result<ResultSet, DbError> {
        match self {
            Self::Success(result) => Ok(result),
            Self::Error(message) => Err(DbError::query_failed(message)),
            Self::Cancelled => Err(DbError::Cancelled),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeDriverStats {
    pub executed_requests: Vec<QueryRequest>,
    pub close_calls: usize,
    pub cancel_prepared: usize,
}

#[derive(Default)]
struct FakeDriverState {
    tables: RwLock<Vec<String>>,
    schemas: RwLock<HashMap<String, TableSchema>>,
    query_outcomes: RwLock<HashMap<String, FakeQueryOutcome>>,
    default_outcome: RwLock<Option<FakeQueryOutcome>>,
    executed_requests: Mutex<Vec<QueryRequest>>,
    close_calls: AtomicUsize,
    cancel_prepared: AtomicUsize,
    connect_error: RwLock<Option<String>>,
}

/// A deterministic in-memory stand-in for a real [`Driver`], keyed by exact
/// SQL text rather than a live backend. One `FakeDriver` produces any number
/// of `FakeConnection`s that all share its configured outcomes.
#[derive(Clone)]
pub struct FakeDriver {
    kind: DbKind,
    state: Arc<FakeDriverState>,
}

impl FakeDriver {
    pub fn new(kind: DbKind) -> Self {
        Self {
            kind,
            state: Arc::new(FakeDriverState::default()),
        }
    }

    pub fn with_tables(self, tables: Vec<String>) -> Self {
        *rwlock_write(&self.state.tables) = tables;
        self
    }

    pub fn with_schema(self, table: impl Into<String>, schema: TableSchema) -> Self {
        rwlock_write(&self.state.schemas).insert(table.into(), schema);
        self
    }

    pub fn with_query_result(self, sql: impl Into<String>, result: ResultSet) -> Self {
        rwlock_write(&self.state.query_outcomes).insert(sql.into(), FakeQueryOutcome::Success(result));
        self
    }

    pub fn with_query_error(self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        rwlock_write(&self.state.query_outcomes)
            .insert(sql.into(), FakeQueryOutcome::Error(message.into()));
        self
    }

    pub fn with_default_result(self, result: ResultSet) -> Self {
        *rwlock_write(&self.state.default_outcome) = Some(FakeQueryOutcome::Success(result));
        self
    }

    pub fn with_default_error(self, message: impl Into<String>) -> Self {
        *rwlock_write(&self.state.default_outcome) = Some(FakeQueryOutcome::Error(message.into()));
        self
    }

    pub fn with_connect_error(self, message: impl Into<String>) -> Self {
        *rwlock_write(&self.state.connect_error) = Some(message.into());
        self
    }

    pub fn set_query_outcome(&self, sql: impl Into<String>, outcome: FakeQueryOutcome) {
        rwlock_write(&self.state.query_outcomes).insert(sql.into(), outcome);
    }

    pub fn stats(&self) -> FakeDriverStats {
        FakeDriverStats {
            executed_requests: mutex_lock(&self.state.executed_requests).clone(),
            close_calls: self.state.close_calls.load(Ordering::Relaxed),
            cancel_prepared: self.state.cancel_prepared.load(Ordering::Relaxed),
        }
    }

    pub fn as_driver_box(self) -> Box<dyn Driver> {
        Box::new(self)
    }
}

impl Driver for FakeDriver {
    fn kind(&self) -> DbKind {
        self.kind
    }

    fn connect(
        &self,
        _target: &ConnectTarget,
        _password: Option<&str>,
    ) -> Result<Box<dyn DriverConnection>, DbError> {
        if let Some(message) = rwlock_read(&self.state.connect_error).clone() {
            return Err(DbError::connection_failed(message));
        }

        Ok(Box::new(FakeConnection {
            kind: self.kind,
            state: self.state.clone(),
        }))
    }
}

pub struct FakeConnection {
    kind: DbKind,
    state: Arc<FakeDriverState>,
}

impl FakeConnection {
    fn execute_internal(&self, sql: &str) -> Result<ResultSet, DbError> {
        if let Some(outcome) = rwlock_read(&self.state.query_outcomes).get(sql).cloned() {
            return outcome.into_result();
        }

        if let Some(outcome) = rwlock_read(&self.state.default_outcome).clone() {
            return outcome.into_result();
        }

        Ok(ResultSet::empty())
    }
}

impl DriverConnection for FakeConnection {
    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            driver: match self.kind {
                DbKind::Sqlite => "sqlite",
                DbKind::Postgres => "postgres",
                DbKind::MySql => "mysql",
                DbKind::MariaDb => "mariadb",
            },
            database: Some("fake".to_string()),
            host: None,
            port: None,
            user: None,
        }
    }

    fn dialect(&self) -> &dyn SqlDialect {
        static DIALECT: DefaultSqlDialect = DefaultSqlDialect;
        &DIALECT
    }

    fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    fn query(&self, request: &QueryRequest, max_rows: usize) -> Result<ResultSet, DbError> {
        mutex_lock(&self.state.executed_requests).push(request.clone());
        Ok(self.execute_internal(&request.sql)?.cap(max_rows))
    }

    fn exec(&self, sql: &str) -> Result<i64, DbError> {
        mutex_lock(&self.state.executed_requests).push(QueryRequest::new(sql));
        let result = self.execute_internal(sql)?;
        Ok(result.affected_rows.map(|n| n as i64).unwrap_or(0))
    }

    fn paginated_query(
        &self,
        table: &str,
        _schema: Option<&str>,
        _offset: u64,
        _limit: u64,
        _order_by: Option<&str>,
        max_rows: usize,
    ) -> Result<ResultSet, DbError> {
        let sql = format!("SELECT * FROM {table}");
        self.query(&QueryRequest::new(sql), max_rows)
    }

    fn list_tables(&self) -> Result<Vec<String>, DbError> {
        Ok(rwlock_read(&self.state.tables).clone())
    }

    fn get_schema(&self, table: &str, _schema: Option<&str>) -> Result<TableSchema, DbError> {
        rwlock_read(&self.state.schemas)
            .get(table)
            .cloned()
            .ok_or_else(|| DbError::query_failed(format!("no fake schema configured for {table}")))
    }

    fn update_row(&self, patch: &RowPatch) -> Result<CrudResult, DbError> {
        let _ = patch;
        Ok(CrudResult::new(1, None))
    }

    fn insert_row(&self, insert: &RowInsert) -> Result<CrudResult, DbError> {
        let _ = insert;
        Ok(CrudResult::new(1, None))
    }

    fn delete_row(&self, delete: &RowDelete) -> Result<CrudResult, DbError> {
        let _ = delete;
        Ok(CrudResult::new(1, None))
    }

    fn estimate_row_count(&self, _table: &str, _schema: Option<&str>) -> Result<i64, DbError> {
        Ok(-1)
    }

    fn prepare_cancel(&self) -> Arc<dyn QueryCancelHandle> {
        self.state.cancel_prepared.fetch_add(1, Ordering::Relaxed);
        Arc::new(NoopCancelHandle)
    }

    fn close(&mut self) -> Result<(), DbError> {
        self.state.close_calls.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

fn rwlock_read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn rwlock_write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

fn mutex_lock<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poison_error) => poison_error.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbrelay_core::ConnectTarget;

    fn connect(driver: &FakeDriver) -> Box<dyn DriverConnection> {
        driver
            .connect(&ConnectTarget::Sqlite { path: ":memory:".into() }, None)
            .expect("fake connection should succeed")
    }

    #[test]
    fn query_uses_configured_outcome_and_records_requests() {
        let driver = FakeDriver::new(DbKind::Sqlite)
            .with_query_error("SELECT boom", "boom")
            .with_default_result(ResultSet::empty());
        driver.set_query_outcome(
            "SELECT 1",
            FakeQueryOutcome::Success(ResultSet::empty()),
        );

        let conn = connect(&driver);

        assert!(conn.query(&QueryRequest::new("SELECT 1"), 100).is_ok());
        let err = conn.query(&QueryRequest::new("SELECT boom"), 100);
        assert!(matches!(err, Err(DbError::QueryFailed(_))));

        assert_eq!(driver.stats().executed_requests.len(), 2);
    }

    #[test]
    fn connect_error_is_returned_before_any_query() {
        let driver = FakeDriver::new(DbKind::Postgres).with_connect_error("refused");
        let result = driver.connect(&ConnectTarget::Postgres { url: "x".into() }, None);
        assert!(matches!(result, Err(DbError::ConnectionFailed(_))));
    }

    #[test]
    fn close_and_prepare_cancel_update_stats() {
        let driver = FakeDriver::new(DbKind::Sqlite);
        let mut conn = connect(&driver);
        let _handle = conn.prepare_cancel();
        conn.close().unwrap();

        let stats = driver.stats();
        assert_eq!(stats.cancel_prepared, 1);
        assert_eq!(stats.close_calls, 1);
    }

    #[test]
    fn list_tables_and_get_schema_reflect_configuration() {
        let driver = FakeDriver::new(DbKind::Sqlite)
            .with_tables(vec!["users".to_string()])
            .with_schema(
                "users",
                TableSchema {
                    name: "users".into(),
                    schema: None,
                    columns: vec![],
                    indexes: vec![],
                    foreign_keys: vec![],
                },
            );
        let conn = connect(&driver);

        assert_eq!(conn.list_tables().unwrap(), vec!["users".to_string()]);
        assert_eq!(conn.get_schema("users", None).unwrap().name, "users");
        assert!(conn.get_schema("missing", None).is_err());
    }
}
