use serde::{Deserialize, Serialize};

/// Single table's structural description, returned by `get_schema`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    /// Schema/namespace the table lives in (PostgreSQL); `None` for
    /// SQLite/MySQL where a connection is scoped to one database already.
    pub schema: Option<String>,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,
    pub type_name: String,
    pub nullable: bool,
    pub is_primary_key: bool,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub is_unique: bool,
    pub is_primary: bool,
}

/// A foreign key constraint on a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeyInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_schema_round_trips_through_json() {
        let table = TableSchema {
            name: "users".into(),
            schema: Some("public".into()),
            columns: vec![ColumnInfo {
                name: "id".into(),
                type_name: "integer".into(),
                nullable: false,
                is_primary_key: true,
                default_value: None,
            }],
            indexes: vec![],
            foreign_keys: vec![],
        };

        let json = serde_json::to_string(&table).unwrap();
        let back: TableSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "users");
        assert_eq!(back.columns[0].name, "id");
    }
}
