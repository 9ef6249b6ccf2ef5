use std::time::Duration;

use dbrelay_core::{ColumnInfo, ColumnMeta, ResultSet, Row, TableSchema, Value};

pub fn table_result(columns: Vec<ColumnMeta>, rows: Vec<Row>) -> ResultSet {
    ResultSet {
        columns,
        rows,
        affected_rows: None,
        execution_time: Duration::ZERO,
        truncated: false,
    }
}

pub fn exec_result(affected_rows: u64) -> ResultSet {
    ResultSet {
        columns: Vec::new(),
        rows: Vec::new(),
        affected_rows: Some(affected_rows),
        execution_time: Duration::ZERO,
        truncated: false,
    }
}

pub fn column(name: impl Into<String>, type_name: impl Into<String>, nullable: bool) -> ColumnMeta {
    ColumnMeta {
        name: name.into(),
        type_name: type_name.into(),
        nullable,
    }
}

pub fn int_cell(value: i64) -> Value {
    Value::Int(value)
}

pub fn text_cell(value: impl Into<String>) -> Value {
    Value::Text(value.into())
}

pub fn table_schema_with_primary_key(
    table_name: impl Into<String>,
    schema_name: Option<String>,
    pk_column: impl Into<String>,
) -> TableSchema {
    TableSchema {
        name: table_name.into(),
        schema: schema_name,
        columns: vec![ColumnInfo {
            name: pk_column.into(),
            type_name: "integer".to_string(),
            nullable: false,
            is_primary_key: true,
            default_value: None,
        }],
        indexes: Vec::new(),
        foreign_keys: Vec::new(),
    }
}
