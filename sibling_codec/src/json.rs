//! Conversions between [`Value`] and `serde_json::Value`.

use crate::value::Value;
use serde_json::{Map, Number};

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64().map(i32::try_from) {
                Some(Ok(small)) => Value::Int32(small),
                _ => Value::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Value {
    /// JSON view of the value. Returns `None` for values JSON cannot express
    /// (buffers, maps, sets, host objects, functions, symbols).
    pub fn to_json(&self) -> Option<serde_json::Value> {
        Some(match self {
            Value::Undefined | Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int32(n) => serde_json::Value::from(*n),
            Value::Uint32(n) => serde_json::Value::from(*n),
            Value::Double(n) | Value::Date(n) => Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::BigInt(n) => serde_json::Value::String(n.to_string()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => serde_json::Value::Array(
                items.iter().map(Value::to_json).collect::<Option<Vec<_>>>()?,
            ),
            Value::Object(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(key.clone(), value.to_json()?);
                }
                serde_json::Value::Object(map)
            }
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_number_kinds() {
        assert_eq!(Value::from(json!(7)), Value::Int32(7));
        assert_eq!(Value::from(json!(1.5)), Value::Double(1.5));
        assert_eq!(
            Value::from(json!(10_000_000_000i64)),
            Value::Double(10_000_000_000.0)
        );
    }

    #[test]
    fn test_json_round_trip() {
        let source = json!({"message": "hello", "count": 2, "tags": ["a", "b"]});
        let value = Value::from(source.clone());
        assert_eq!(value.to_json(), Some(source));
    }

    #[test]
    fn test_to_json_rejects_host_shapes() {
        let value = Value::Array(vec![Value::Map(Vec::new())]);
        assert_eq!(value.to_json(), None);
    }
}
