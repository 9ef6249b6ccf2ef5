use crate::DbKind;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseConnStrError {
    #[error("connection string is empty")]
    Empty,
    #[error("missing scheme (expected e.g. \"sqlite://\", \"postgres://\")")]
    MissingScheme,
    #[error("unrecognized scheme \"{0}\"")]
    UnknownScheme(String),
    #[error("sqlite connection string must name a file path after the scheme")]
    MissingSqlitePath,
}

/// A connection target resolved from a `connect` request's `connstr`.
///
/// For SQLite this is just a filesystem path; for PostgreSQL/MySQL the
/// scheme-specific authority/path/query portion is kept verbatim and handed
/// to the driver crate's own URI parser (`postgres::Config`,
/// `mysql::Opts::from_url`) rather than re-parsed here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    Sqlite { path: String },
    Postgres { url: String },
    MySql { url: String },
}

impl ConnectTarget {
    pub fn kind(&self) -> DbKind {
        match self {
            ConnectTarget::Sqlite { .. } => DbKind::Sqlite,
            ConnectTarget::Postgres { .. } => DbKind::Postgres,
            ConnectTarget::MySql { .. } => DbKind::MySql,
        }
    }
}

/// Parse a `connstr` into a driver-selecting target.
///
/// Recognized schemes: `sqlite://`, `postgres://`/`postgresql://`/`pg://`,
/// `mysql://`/`mariadb://`. The password, if supplied separately by the
/// `connect` request, is spliced into the URL form by the caller before the
/// driver crate parses it further — this function only resolves which
/// driver owns the string.
pub fn parse_connection_string(connstr: &str) -> Result<ConnectTarget, ParseConnStrError> {
    if connstr.is_empty() {
        return Err(ParseConnStrError::Empty);
    }

    let (scheme, rest) = connstr
        .split_once("://")
        .ok_or(ParseConnStrError::MissingScheme)?;

    match scheme {
        "sqlite" | "sqlite3" | "file" => {
            if rest.is_empty() {
                return Err(ParseConnStrError::MissingSqlitePath);
            }
            Ok(ConnectTarget::Sqlite {
                path: rest.to_string(),
            })
        }
        "postgres" | "postgresql" | "pg" => Ok(ConnectTarget::Postgres {
            url: format!("postgres://{rest}"),
        }),
        "mysql" | "mariadb" => Ok(ConnectTarget::MySql {
            url: format!("mysql://{rest}"),
        }),
        other => Err(ParseConnStrError::UnknownScheme(other.to_string())),
    }
}
