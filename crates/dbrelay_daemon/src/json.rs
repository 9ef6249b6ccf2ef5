//! Boundary conversions between driver-side typed values (`dbrelay_core::Value`,
//! `ResultSet`) and the JSON shapes the protocol loop writes to the client.
//!
//! Kept separate from `dispatch`/`worker` so the "how do we spell a cell in
//! JSON" decision lives in one place.

use base64::Engine as _;
use dbrelay_core::{ResultSet, Value};
use serde_json::{Map, Value as Json, json};

pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => {
            if f.is_finite() {
                json!(f)
            } else {
                // NaN/Infinity have no JSON representation; surface them as
                // their display string rather than silently becoming `null`.
                json!(f.to_string())
            }
        }
        Value::Text(s) => json!(s),
        Value::Bytes(b) => json!(base64::engine::general_purpose::STANDARD.encode(b)),
        Value::DateTime(dt) => json!(dt.to_rfc3339()),
        Value::Date(d) => json!(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => json!(t.format("%H:%M:%S%.f").to_string()),
    }
}

/// Renders a full result set as `{columns, rows, total_rows, truncated}`.
/// `total_rows` is supplied by the caller (exact count, estimate, or simply
/// the row count of this page) since the meaning differs by method.
pub fn result_set_to_json(result: &ResultSet, total_rows: i64) -> Json {
    let columns: Vec<Json> = result
        .columns
        .iter()
        .map(|c| {
            json!({
                "name": c.name,
                "type": c.type_name,
                "nullable": c.nullable,
            })
        })
        .collect();

    let rows: Vec<Json> = result
        .rows
        .iter()
        .map(|row| Json::Array(row.iter().map(value_to_json).collect()))
        .collect();

    let mut obj = Map::new();
    obj.insert("columns".to_string(), Json::Array(columns));
    obj.insert("rows".to_string(), Json::Array(rows));
    obj.insert("total_rows".to_string(), json!(total_rows));
    if result.truncated {
        obj.insert("truncated".to_string(), json!(true));
    }
    Json::Object(obj)
}

/// Converts a client-supplied JSON scalar into a driver `Value`. Used only
/// for request parameters (update/insert cell values); clients have no way
/// to address the `Bytes`/`DateTime`/`Date`/`Time` variants directly, so
/// those are left to the driver side of a round trip.
pub fn json_to_value(value: &Json) -> Value {
    match value {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => Value::Text(s.clone()),
        other => Value::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_become_base64() {
        let json = value_to_json(&Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]));
        assert_eq!(json, Json::String("3q2+7w==".to_string()));
    }

    #[test]
    fn non_finite_floats_become_strings_not_null() {
        assert_eq!(value_to_json(&Value::Float(f64::NAN)), json!("NaN"));
        assert_eq!(value_to_json(&Value::Float(f64::INFINITY)), json!("inf"));
    }

    #[test]
    fn result_set_to_json_carries_truncated_flag_only_when_set() {
        use std::time::Duration;
        let rs = ResultSet {
            columns: vec![],
            rows: vec![],
            affected_rows: None,
            execution_time: Duration::ZERO,
            truncated: true,
        };
        let json = result_set_to_json(&rs, 5);
        assert_eq!(json["truncated"], json!(true));
        assert_eq!(json["total_rows"], json!(5));

        let rs_not_truncated = ResultSet {
            truncated: false,
            ..rs
        };
        let json2 = result_set_to_json(&rs_not_truncated, 5);
        assert!(json2.get("truncated").is_none());
    }
}
