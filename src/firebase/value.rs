//! JSON <-> Firestore REST value encoding
//!
//! Firestore's REST API wraps every value in a single-key object naming its
//! type, e.g. `{"integerValue": "50"}` or `{"mapValue": {"fields": {...}}}`.

use crate::firebase::error::StoreError;
use serde_json::{json, Map, Number, Value};

pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                // int64 travels as a decimal string
                json!({ "integerValue": i.to_string() })
            } else {
                json!({ "doubleValue": n.as_f64().unwrap_or(f64::MAX) })
            }
        }
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(fields) => json!({ "mapValue": { "fields": encode_fields(fields) } }),
    }
}

pub fn encode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(key, value)| (key.clone(), encode_value(value)))
        .collect()
}

pub fn decode_value(typed: &Value) -> Result<Value, StoreError> {
    let Some(object) = typed.as_object() else {
        return Err(StoreError::Decode(format!("expected a typed value, got {}", typed)));
    };
    let Some((kind, inner)) = object.iter().next() else {
        return Err(StoreError::Decode("empty typed value".to_string()));
    };

    match kind.as_str() {
        "nullValue" => Ok(Value::Null),
        "booleanValue" => inner
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| bad(kind, inner)),
        "integerValue" => {
            let parsed = match inner {
                Value::String(s) => s.parse::<i64>().ok(),
                Value::Number(n) => n.as_i64(),
                _ => None,
            };
            parsed.map(Value::from).ok_or_else(|| bad(kind, inner))
        }
        "doubleValue" => inner
            .as_f64()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| bad(kind, inner)),
        "stringValue" | "timestampValue" | "referenceValue" | "bytesValue" => inner
            .as_str()
            .map(|s| Value::String(s.to_string()))
            .ok_or_else(|| bad(kind, inner)),
        "geoPointValue" => {
            let latitude = inner.get("latitude").and_then(Value::as_f64).unwrap_or(0.0);
            let longitude = inner.get("longitude").and_then(Value::as_f64).unwrap_or(0.0);
            Ok(json!({ "latitude": latitude, "longitude": longitude }))
        }
        "arrayValue" => {
            let values = match inner.get("values") {
                None => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(decode_value)
                    .collect::<Result<Vec<_>, _>>()?,
                Some(other) => return Err(bad(kind, other)),
            };
            Ok(Value::Array(values))
        }
        "mapValue" => match inner.get("fields") {
            None => Ok(Value::Object(Map::new())),
            Some(Value::Object(fields)) => decode_fields(fields).map(Value::Object),
            Some(other) => Err(bad(kind, other)),
        },
        other => Err(StoreError::Decode(format!("unsupported value type `{}`", other))),
    }
}

pub fn decode_fields(fields: &Map<String, Value>) -> Result<Map<String, Value>, StoreError> {
    fields
        .iter()
        .map(|(key, typed)| -> Result<(String, Value), StoreError> {
            Ok((key.clone(), decode_value(typed)?))
        })
        .collect()
}

fn bad(kind: &str, inner: &Value) -> StoreError {
    StoreError::Decode(format!("malformed {}: {}", kind, inner))
}

/// Quotes a top-level field name for use in an update mask.
pub fn field_path(name: &str) -> String {
    let mut chars = name.chars();
    let simple = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        return name.to_string();
    }

    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('`');
    for c in name.chars() {
        if c == '`' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('`');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encodes_integers_as_strings_and_floats_as_doubles() {
        assert_eq!(encode_value(&json!(50)), json!({"integerValue": "50"}));
        assert_eq!(encode_value(&json!(-3)), json!({"integerValue": "-3"}));
        assert_eq!(encode_value(&json!(12.5)), json!({"doubleValue": 12.5}));
    }

    #[test]
    fn test_encodes_nested_structures() {
        let encoded = encode_value(&json!({"tags": ["a", true], "note": null}));
        assert_eq!(
            encoded,
            json!({"mapValue": {"fields": {
                "tags": {"arrayValue": {"values": [
                    {"stringValue": "a"},
                    {"booleanValue": true}
                ]}},
                "note": {"nullValue": null}
            }}})
        );
    }

    #[test]
    fn test_decodes_backend_only_types_to_plain_json() {
        let fields = json!({
            "date": {"timestampValue": "2024-03-01T00:00:00Z"},
            "where": {"geoPointValue": {"latitude": 40.4, "longitude": -3.7}},
            "empty": {"arrayValue": {}},
            "nested": {"mapValue": {}},
            "count": {"integerValue": "9007199254740993"}
        });
        let decoded = decode_fields(fields.as_object().unwrap()).unwrap();

        assert_eq!(decoded["date"], json!("2024-03-01T00:00:00Z"));
        assert_eq!(decoded["where"], json!({"latitude": 40.4, "longitude": -3.7}));
        assert_eq!(decoded["empty"], json!([]));
        assert_eq!(decoded["nested"], json!({}));
        assert_eq!(decoded["count"], json!(9007199254740993i64));
    }

    #[test]
    fn test_decode_rejects_unknown_or_malformed_values() {
        assert!(matches!(
            decode_value(&json!({"vectorValue": {}})),
            Err(StoreError::Decode(_))
        ));
        assert!(matches!(
            decode_value(&json!({"integerValue": "ten"})),
            Err(StoreError::Decode(_))
        ));
        assert!(matches!(decode_value(&json!(5)), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_field_paths_are_quoted_only_when_needed() {
        assert_eq!(field_path("amount"), "amount");
        assert_eq!(field_path("_private2"), "_private2");
        assert_eq!(field_path("2024"), "`2024`");
        assert_eq!(field_path("net amount"), "`net amount`");
        assert_eq!(field_path("a`b"), "`a\\`b`");
    }
}
