//! Onboarding JSON data into the value model.
//!
//! JSON covers a strict subset of the model: arrays become lists, objects
//! become mappings with string keys. The reverse direction is lossy for
//! kinds JSON cannot carry (bytes, datetimes, sets, …) and renders those
//! through their canonical strings.

use serde_json::{Map as JsonMap, Number, Value as Json};

use crate::path::render_literal;
use crate::value::Value;

impl From<&Json> for Value {
    fn from(j: &Json) -> Self {
        match j {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => Value::Text(s.clone()),
            Json::Array(items) => Value::list(items.iter().map(Value::from).collect()),
            Json::Object(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (Value::Text(k.clone()), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Json> for Value {
    fn from(j: Json) -> Self {
        Value::from(&j)
    }
}

/// Project a value onto JSON, rendering non-JSON kinds as strings.
pub fn to_json_lossy(v: &Value) -> Json {
    match v {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::Number((*i).into()),
        Value::Float(x) => Number::from_f64(*x)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Text(s) => Json::String(s.clone()),
        Value::Seq(s) => Json::Array(s.items.iter().map(to_json_lossy).collect()),
        Value::Set(items) => Json::Array(items.iter().map(to_json_lossy).collect()),
        Value::Map(pairs) => {
            let mut out = JsonMap::new();
            for (k, val) in pairs {
                let key = match k {
                    Value::Text(s) => s.clone(),
                    other => render_literal(other),
                };
                out.insert(key, to_json_lossy(val));
            }
            Json::Object(out)
        }
        Value::Record(r) => Json::Object(
            r.fields
                .iter()
                .map(|(name, val)| (name.clone(), to_json_lossy(val)))
                .collect(),
        ),
        Value::Object(o) => Json::Object(
            o.attrs
                .iter()
                .map(|(name, val)| (name.clone(), to_json_lossy(val)))
                .collect(),
        ),
        other => Json::String(render_literal(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trips_through_the_model() {
        let j = json!({"a": 1, "b": [true, null, 2.5], "c": "x"});
        let v = Value::from(&j);
        assert_eq!(to_json_lossy(&v), j);
    }

    #[test]
    fn integers_stay_integers() {
        let v = Value::from(json!(7));
        assert_eq!(v, Value::Int(7));
        let v = Value::from(json!(7.0));
        assert_eq!(v, Value::Float(7.0));
    }

    #[test]
    fn non_json_kinds_render_as_strings() {
        let v = Value::Bytes(b"hi".to_vec());
        assert_eq!(to_json_lossy(&v), json!("b'hi'"));
    }
}
