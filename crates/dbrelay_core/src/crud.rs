use crate::{Row, Value};

/// Unique identification of a row for UPDATE/DELETE, expressed as a
/// composite primary key: column names paired with their current values.
#[derive(Debug, Clone)]
pub struct RowIdentity {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl RowIdentity {
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        debug_assert_eq!(
            columns.len(),
            values.len(),
            "RowIdentity: columns and values must have same length"
        );
        Self { columns, values }
    }

    pub fn is_valid(&self) -> bool {
        !self.columns.is_empty() && self.columns.len() == self.values.len()
    }
}

/// A single column change applied by `update_row`.
#[derive(Debug, Clone)]
pub struct CellUpdate {
    pub column: String,
    pub value: Value,
}

/// Changes to apply to a single row via UPDATE.
#[derive(Debug, Clone)]
pub struct RowPatch {
    pub identity: RowIdentity,
    pub table: String,
    /// Schema name (PostgreSQL) or None (SQLite/MySQL).
    pub schema: Option<String>,
    pub changes: Vec<CellUpdate>,
}

impl RowPatch {
    pub fn new(
        identity: RowIdentity,
        table: String,
        schema: Option<String>,
        changes: Vec<CellUpdate>,
    ) -> Self {
        Self {
            identity,
            table,
            schema,
            changes,
        }
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }
}

/// Data for an INSERT operation.
#[derive(Debug, Clone)]
pub struct RowInsert {
    pub table: String,
    pub schema: Option<String>,
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

impl RowInsert {
    pub fn new(
        table: String,
        schema: Option<String>,
        columns: Vec<String>,
        values: Vec<Value>,
    ) -> Self {
        debug_assert_eq!(
            columns.len(),
            values.len(),
            "RowInsert: columns and values must have same length"
        );
        Self {
            table,
            schema,
            columns,
            values,
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.columns.is_empty() && self.columns.len() == self.values.len()
    }
}

/// Data for a DELETE operation.
#[derive(Debug, Clone)]
pub struct RowDelete {
    pub identity: RowIdentity,
    pub table: String,
    pub schema: Option<String>,
}

impl RowDelete {
    pub fn new(identity: RowIdentity, table: String, schema: Option<String>) -> Self {
        Self {
            identity,
            table,
            schema,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.identity.is_valid()
    }
}

/// Result of a row-level CRUD operation.
#[derive(Debug, Clone)]
pub struct CrudResult {
    pub affected_rows: u64,
    /// The updated/inserted row data, when the driver can cheaply return it
    /// (PostgreSQL `RETURNING`, or a re-query by primary key).
    pub returning_row: Option<Row>,
}

impl CrudResult {
    pub fn new(affected_rows: u64, returning_row: Option<Row>) -> Self {
        Self {
            affected_rows,
            returning_row,
        }
    }

    pub fn empty() -> Self {
        Self {
            affected_rows: 0,
            returning_row: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_identity_requires_matching_lengths() {
        let valid = RowIdentity::new(vec!["id".into()], vec![Value::Int(1)]);
        assert!(valid.is_valid());

        let empty = RowIdentity::new(vec![], vec![]);
        assert!(!empty.is_valid());
    }

    #[test]
    fn row_patch_reports_whether_it_has_changes() {
        let identity = RowIdentity::new(vec!["id".into()], vec![Value::Int(1)]);
        let empty_patch = RowPatch::new(identity.clone(), "users".into(), None, vec![]);
        assert!(!empty_patch.has_changes());

        let patch = RowPatch::new(
            identity,
            "users".into(),
            None,
            vec![CellUpdate {
                column: "name".into(),
                value: Value::Text("new".into()),
            }],
        );
        assert!(patch.has_changes());
    }
}
