use crate::Value;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-connection cap on returned row count unless overridden at connect time.
///
/// `2^20` rows.
pub const MAX_RESULT_ROWS: usize = 1 << 20;

/// Cells (text/blob) larger than this are replaced by a placeholder string
/// of the form `"[<kind>: N bytes]"` to bound memory. Not overridable.
pub const MAX_FIELD_SIZE: usize = 1 << 18;

#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<Value>) -> Self {
        self.params = params;
        self
    }
}

pub type Row = Vec<Value>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
}

/// A rectangular result table with typed cells, as produced by a driver's
/// query/paginated-query/row-count capabilities.
///
/// Oversized cells are replaced with a placeholder *before* the rows reach
/// this struct's caller-visible state (see [`ResultSet::cap`]); row count is
/// similarly capped at [`MAX_RESULT_ROWS`] (or the connection's override).
#[derive(Debug, Clone)]
pub struct ResultSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Row>,
    pub affected_rows: Option<u64>,
    pub execution_time: Duration,
    /// Set when `rows` was truncated to fit the row cap.
    pub truncated: bool,
}

impl ResultSet {
    pub fn empty() -> Self {
        Self {
            columns: Vec::new(),
            rows: Vec::new(),
            affected_rows: None,
            execution_time: Duration::ZERO,
            truncated: false,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// Apply the `MAX_FIELD_SIZE` placeholder substitution and the
    /// `MAX_RESULT_ROWS` row truncation (or `max_rows` if the connection
    /// overrode the default). Drivers call this once, right after building
    /// the raw rowset, so no caller can observe an uncapped result.
    pub fn cap(mut self, max_rows: usize) -> Self {
        if self.rows.len() > max_rows {
            self.rows.truncate(max_rows);
            self.truncated = true;
        }

        for row in &mut self.rows {
            for cell in row.iter_mut() {
                if cell.byte_len() > MAX_FIELD_SIZE {
                    let placeholder = format!("[{}: {} bytes]", cell.kind_label(), cell.byte_len());
                    *cell = Value::Text(placeholder);
                }
            }
        }

        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cap_truncates_rows_and_flags_truncation() {
        let rs = ResultSet {
            columns: vec![],
            rows: (0..10).map(|i| vec![Value::Int(i)]).collect(),
            affected_rows: None,
            execution_time: Duration::ZERO,
            truncated: false,
        }
        .cap(3);

        assert_eq!(rs.rows.len(), 3);
        assert!(rs.truncated);
    }

    #[test]
    fn cap_replaces_oversized_cells_with_placeholder() {
        let big = "x".repeat(MAX_FIELD_SIZE + 1);
        let rs = ResultSet {
            columns: vec![],
            rows: vec![vec![Value::Text(big.clone()), Value::Int(1)]],
            affected_rows: None,
            execution_time: Duration::ZERO,
            truncated: false,
        }
        .cap(MAX_RESULT_ROWS);

        assert_eq!(
            rs.rows[0][0],
            Value::Text(format!("[TEXT: {} bytes]", big.len()))
        );
        assert_eq!(rs.rows[0][1], Value::Int(1));
        assert!(!rs.truncated);
    }

    #[test]
    fn cap_leaves_small_results_untouched() {
        let rs = ResultSet {
            columns: vec![],
            rows: vec![vec![Value::Text("ok".into())]],
            affected_rows: None,
            execution_time: Duration::ZERO,
            truncated: false,
        }
        .cap(MAX_RESULT_ROWS);

        assert_eq!(rs.rows[0][0], Value::Text("ok".into()));
        assert!(!rs.truncated);
    }
}
