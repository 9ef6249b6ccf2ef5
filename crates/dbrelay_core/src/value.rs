use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Database cell value.
///
/// Custom enum instead of `serde_json::Value` so drivers can hand back
/// type-aware cells (exact integers, raw blobs, timestamps) that the
/// dispatcher converts to JSON only at the protocol boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Timestamp with timezone.
    DateTime(DateTime<Utc>),
    /// Date without time component.
    Date(NaiveDate),
    /// Time without date component.
    Time(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short label used in oversized-cell placeholders (`"[TEXT: N bytes]"`).
    pub fn kind_label(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "BOOL",
            Value::Int(_) => "INT",
            Value::Float(_) => "FLOAT",
            Value::Text(_) => "TEXT",
            Value::Bytes(_) => "DATA",
            Value::DateTime(_) | Value::Date(_) | Value::Time(_) => "TIMESTAMP",
        }
    }

    /// Byte length of the cell payload, for the `MAX_FIELD_SIZE` cap.
    pub fn byte_len(&self) -> usize {
        match self {
            Value::Text(s) => s.len(),
            Value::Bytes(b) => b.len(),
            _ => 0,
        }
    }

    pub fn as_display_string(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => f.to_string(),
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::DateTime(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Time(t) => t.format("%H:%M:%S").to_string(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_display_string())
    }
}

impl Value {
    fn type_order(&self) -> u8 {
        match self {
            Value::Bool(_) => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::DateTime(_) => 4,
            Value::Date(_) => 5,
            Value::Time(_) => 6,
            Value::Bytes(_) => 7,
            Value::Null => 8,
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        use Value::*;

        match (self, other) {
            // Nulls last (SQL standard behavior).
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Greater,
            (_, Null) => Ordering::Less,

            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (Bytes(a), Bytes(b)) => a.cmp(b),
            (DateTime(a), DateTime(b)) => a.cmp(b),
            (Date(a), Date(b)) => a.cmp(b),
            (Time(a), Time(b)) => a.cmp(b),

            (Int(a), Float(b)) => (*a as f64).total_cmp(b),
            (Float(a), Int(b)) => a.total_cmp(&(*b as f64)),

            _ => self.type_order().cmp(&other.type_order()),
        }
    }
}

impl Eq for Value {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_labels_match_cell_kind() {
        assert_eq!(Value::Text("x".into()).kind_label(), "TEXT");
        assert_eq!(Value::Bytes(vec![1, 2, 3]).kind_label(), "DATA");
    }

    #[test]
    fn nulls_sort_last() {
        let mut values = vec![Value::Int(1), Value::Null, Value::Int(-5)];
        values.sort();
        assert_eq!(values, vec![Value::Int(-5), Value::Int(1), Value::Null]);
    }

    #[test]
    fn byte_len_only_counts_text_and_bytes() {
        assert_eq!(Value::Text("hello".into()).byte_len(), 5);
        assert_eq!(Value::Bytes(vec![0; 10]).byte_len(), 10);
        assert_eq!(Value::Int(42).byte_len(), 0);
    }
}
