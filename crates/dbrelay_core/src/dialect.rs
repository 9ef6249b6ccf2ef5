use crate::Value;

/// Placeholder style for parameterized queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` placeholders (SQLite, MySQL).
    QuestionMark,
    /// `$1`, `$2`, etc. (PostgreSQL).
    DollarNumber,
}

/// Database-specific SQL syntax (quoting, escaping, literals).
///
/// Drivers use this to build the `list_tables`/`get_schema`/row-CRUD
/// statements without hardcoding per-backend quoting rules in the dispatcher.
pub trait SqlDialect: Send + Sync {
    /// Quote an identifier (table/column name).
    ///
    /// - PostgreSQL/SQLite: `"name"` (double quotes)
    /// - MySQL: `` `name` `` (backticks)
    fn quote_identifier(&self, name: &str) -> String;

    /// Build a qualified table reference.
    ///
    /// - PostgreSQL: `"schema"."table"`
    /// - MySQL: `` `database`.`table` ``
    /// - SQLite: `"table"` (no schema prefix)
    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String;

    /// Convert a Value to a SQL literal string, used when a driver falls back
    /// to building an UPDATE/DELETE statement by value rather than by bound
    /// parameter.
    fn value_to_literal(&self, value: &Value) -> String;

    /// Escape a string for use inside a single-quoted literal.
    fn escape_string(&self, s: &str) -> String;

    /// Returns the placeholder style for this dialect.
    fn placeholder_style(&self) -> PlaceholderStyle;

    /// Whether this dialect supports RETURNING clause in INSERT/UPDATE/DELETE.
    /// PostgreSQL supports it natively; SQLite/MySQL require re-query.
    fn supports_returning(&self) -> bool {
        false
    }
}

/// Default SQL dialect using ANSI SQL conventions (double-quote identifiers).
pub struct DefaultSqlDialect;

impl SqlDialect for DefaultSqlDialect {
    fn quote_identifier(&self, name: &str) -> String {
        let escaped = name.replace('"', "\"\"");
        format!("\"{}\"", escaped)
    }

    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(s) => format!(
                "{}.{}",
                self.quote_identifier(s),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    fn value_to_literal(&self, value: &Value) -> String {
        match value {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => {
                if f.is_nan() {
                    "'NaN'".to_string()
                } else if f.is_infinite() {
                    if *f > 0.0 {
                        "'Infinity'".to_string()
                    } else {
                        "'-Infinity'".to_string()
                    }
                } else {
                    f.to_string()
                }
            }
            Value::Text(s) => format!("'{}'", self.escape_string(s)),
            Value::Bytes(b) => {
                let hex: String = b.iter().map(|byte| format!("{:02x}", byte)).collect();
                format!("X'{}'", hex)
            }
            Value::DateTime(dt) => format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f")),
            Value::Date(d) => format!("'{}'", d.format("%Y-%m-%d")),
            Value::Time(t) => format!("'{}'", t.format("%H:%M:%S%.f")),
        }
    }

    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }
}

/// PostgreSQL dialect: `$1`-style placeholders, RETURNING support.
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn quote_identifier(&self, name: &str) -> String {
        let escaped = name.replace('"', "\"\"");
        format!("\"{}\"", escaped)
    }

    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(s) => format!(
                "{}.{}",
                self.quote_identifier(s),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    fn value_to_literal(&self, value: &Value) -> String {
        DefaultSqlDialect.value_to_literal(value)
    }

    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''")
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::DollarNumber
    }

    fn supports_returning(&self) -> bool {
        true
    }
}

/// MySQL/MariaDB dialect: backtick identifiers, `?` placeholders.
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn quote_identifier(&self, name: &str) -> String {
        let escaped = name.replace('`', "``");
        format!("`{}`", escaped)
    }

    fn qualified_table(&self, schema: Option<&str>, table: &str) -> String {
        match schema {
            Some(s) => format!(
                "{}.{}",
                self.quote_identifier(s),
                self.quote_identifier(table)
            ),
            None => self.quote_identifier(table),
        }
    }

    fn value_to_literal(&self, value: &Value) -> String {
        DefaultSqlDialect.value_to_literal(value)
    }

    fn escape_string(&self, s: &str) -> String {
        s.replace('\'', "''").replace('\\', "\\\\")
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::QuestionMark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_dialect_quotes_with_double_quotes() {
        assert_eq!(DefaultSqlDialect.quote_identifier("users"), "\"users\"");
        assert_eq!(
            DefaultSqlDialect.quote_identifier("weird\"name"),
            "\"weird\"\"name\""
        );
    }

    #[test]
    fn mysql_dialect_quotes_with_backticks() {
        assert_eq!(MySqlDialect.quote_identifier("users"), "`users`");
    }

    #[test]
    fn postgres_dialect_uses_dollar_number_placeholders() {
        assert_eq!(
            PostgresDialect.placeholder_style(),
            PlaceholderStyle::DollarNumber
        );
        assert!(PostgresDialect.supports_returning());
    }

    #[test]
    fn qualified_table_includes_schema_when_present() {
        assert_eq!(
            DefaultSqlDialect.qualified_table(Some("public"), "users"),
            "\"public\".\"users\""
        );
        assert_eq!(
            DefaultSqlDialect.qualified_table(None, "users"),
            "\"users\""
        );
    }

    #[test]
    fn value_to_literal_escapes_quotes() {
        assert_eq!(
            DefaultSqlDialect.value_to_literal(&Value::Text("o'brien".into())),
            "'o''brien'"
        );
        assert_eq!(DefaultSqlDialect.value_to_literal(&Value::Null), "NULL");
    }
}
