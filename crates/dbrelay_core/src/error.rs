use thiserror::Error;

/// Database operation errors.
///
/// All driver operations return this error type so the daemon's dispatcher
/// and workers have one taxonomy to map onto JSON-RPC error codes, instead of
/// every handler inventing its own classification.
#[derive(Debug, Error)]
pub enum DbError {
    /// Failed to establish a connection to the database.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed (general catch-all for query errors).
    #[error("{0}")]
    QueryFailed(String),

    /// Authentication failed (wrong password, expired credentials, etc.).
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    /// A constraint was violated (unique, foreign key, check, not null).
    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    /// Query has a syntax error.
    #[error("Syntax error: {0}")]
    SyntaxError(String),

    /// Referenced object (table, column, connection id) does not exist.
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Query was cancelled via the session manager's cancel path.
    #[error("Query cancelled")]
    Cancelled,

    /// Operation not supported by this driver (e.g., SQLite cancellation is
    /// always supported, but a future driver might not implement an entry).
    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Connection string is malformed or missing required fields.
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// No free connection slot (pool at capacity).
    #[error("Connection pool exhausted (max {0} connections)")]
    PoolExhausted(usize),

    /// Filesystem or network I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DbError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn query_failed(msg: impl Into<String>) -> Self {
        Self::QueryFailed(msg.into())
    }

    /// Maps this error onto the daemon's JSON-RPC error code taxonomy.
    ///
    /// `Cancelled` is handled separately by the worker (it always reports
    /// `-32000` regardless of what the driver call itself returned), so it
    /// is not expected to reach this mapping in practice; it is included for
    /// completeness.
    pub fn to_rpc_code(&self) -> i64 {
        match self {
            DbError::ObjectNotFound(_) | DbError::InvalidConnectionString(_) => -32602,
            DbError::Cancelled => -32000,
            _ => -32603,
        }
    }
}
