#![allow(clippy::result_large_err)]

mod cancel;
mod connection_string;
mod crud;
mod dialect;
mod driver;
mod error;
mod result;
mod schema;
mod shutdown;
mod value;

pub use cancel::{NoopCancelHandle, QueryCancelHandle};
pub use connection_string::{ConnectTarget, ParseConnStrError, parse_connection_string};
pub use crud::{CellUpdate, CrudResult, RowDelete, RowIdentity, RowInsert, RowPatch};
pub use dialect::{DefaultSqlDialect, MySqlDialect, PlaceholderStyle, PostgresDialect, SqlDialect};
pub use driver::{ConnectionInfo, Driver, DriverConnection};
pub use error::DbError;
pub use result::{ColumnMeta, MAX_FIELD_SIZE, MAX_RESULT_ROWS, QueryRequest, ResultSet, Row};
pub use schema::{ColumnInfo, ForeignKeyInfo, IndexInfo, TableSchema};
pub use shutdown::{ShutdownCoordinator, ShutdownPhase};
pub use value::Value;

pub use chrono;

/// Supported back-end database kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbKind {
    Sqlite,
    Postgres,
    MySql,
    MariaDb,
}

impl DbKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            DbKind::Sqlite => "SQLite",
            DbKind::Postgres => "PostgreSQL",
            DbKind::MySql => "MySQL",
            DbKind::MariaDb => "MariaDB",
        }
    }
}

/// Safely truncate a string at a character boundary, appending "..." if truncated.
pub fn truncate_string_safe(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }

    let truncate_at = max_len.saturating_sub(3);
    let safe_end = s
        .char_indices()
        .take_while(|(idx, _)| *idx <= truncate_at)
        .last()
        .map(|(idx, _)| idx)
        .unwrap_or(0);

    format!("{}...", &s[..safe_end])
}
