//! Tagged atom encoding for values on the wire.
//!
//! Every value serializes as a JSON object `{"t": <tag>, ...}`. The
//! decoder only admits tags present in the active [`AtomPolicy`]; nothing
//! on the wire can name a type outside that list, and no atom ever carries
//! executable content.

use std::collections::BTreeSet;
use std::net::IpAddr;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta};
use ddx_types::{
    Decimal, EnumValue, IpRange, IpRole, ObjectValue, Record, RegexSpec, Value,
};
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::error::{DeltaError, DeltaResult};

/// Every tag the built-in decoder understands.
pub const BUILTIN_TAGS: &[&str] = &[
    "none", "bool", "int", "float", "decimal", "complex", "bytes", "str", "datetime", "date",
    "time", "duration", "uuid", "iprange", "regex", "enum", "map", "list", "tuple", "set",
    "namedtuple", "object",
];

/// The set of atom tags a wire document may use.
#[derive(Clone, Debug)]
pub struct AtomPolicy {
    allowed: BTreeSet<String>,
}

impl Default for AtomPolicy {
    fn default() -> Self {
        Self {
            allowed: BUILTIN_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl AtomPolicy {
    /// A policy admitting only the given tags.
    pub fn restricted(tags: &[&str]) -> Self {
        Self {
            allowed: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn permits(&self, tag: &str) -> bool {
        self.allowed.contains(tag)
    }
}

fn float_json(x: f64) -> Json {
    if x.is_finite() {
        json!(x)
    } else if x.is_nan() {
        json!("NaN")
    } else if x > 0.0 {
        json!("inf")
    } else {
        json!("-inf")
    }
}

fn json_float(j: &Json, field: &str) -> DeltaResult<f64> {
    match j {
        Json::Number(n) => n
            .as_f64()
            .ok_or_else(|| DeltaError::malformed(format!("{field} is not a float"))),
        Json::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            other => Err(DeltaError::malformed(format!(
                "{field} has unrecognized float literal {other:?}"
            ))),
        },
        _ => Err(DeltaError::malformed(format!("{field} is not a float"))),
    }
}

/// Encode one value as a tagged atom.
pub fn encode_atom(v: &Value) -> Json {
    match v {
        Value::Null => json!({"t": "none"}),
        Value::Bool(b) => json!({"t": "bool", "v": b}),
        Value::Int(i) => json!({"t": "int", "v": i}),
        Value::Float(x) => json!({"t": "float", "v": float_json(*x)}),
        Value::Decimal(d) => json!({"t": "decimal", "v": d.to_string()}),
        Value::Complex { re, im } => {
            json!({"t": "complex", "re": float_json(*re), "im": float_json(*im)})
        }
        Value::Bytes(b) => json!({"t": "bytes", "v": hex::encode(b)}),
        Value::Text(s) => json!({"t": "str", "v": s}),
        Value::DateTime(dt) => json!({"t": "datetime", "v": dt.to_rfc3339()}),
        Value::Date(d) => json!({"t": "date", "v": d.format("%Y-%m-%d").to_string()}),
        Value::Time(t) => json!({"t": "time", "v": t.format("%H:%M:%S%.f").to_string()}),
        Value::Duration(d) => {
            json!({"t": "duration", "secs": d.num_seconds(), "nanos": d.subsec_nanos()})
        }
        Value::Uuid(u) => json!({"t": "uuid", "v": u.to_string()}),
        Value::IpRange(ip) => json!({
            "t": "iprange",
            "addr": ip.addr.to_string(),
            "prefix": ip.prefix,
            "role": match ip.role {
                IpRole::Address => "address",
                IpRole::Network => "network",
                IpRole::Interface => "interface",
            },
        }),
        Value::Regex(r) => {
            json!({"t": "regex", "pattern": r.pattern, "flags": r.flags, "groups": r.groups})
        }
        Value::Enum(e) => json!({"t": "enum", "name": e.name, "v": encode_atom(&e.value)}),
        Value::Map(pairs) => {
            let entries: Vec<Json> = pairs
                .iter()
                .map(|(k, v)| json!([encode_atom(k), encode_atom(v)]))
                .collect();
            json!({"t": "map", "v": entries})
        }
        Value::Seq(seq) => {
            let tag = match seq.kind {
                ddx_types::SeqKind::List => "list",
                ddx_types::SeqKind::Tuple => "tuple",
            };
            let items: Vec<Json> = seq.items.iter().map(encode_atom).collect();
            json!({"t": tag, "v": items})
        }
        Value::Set(items) => {
            let items: Vec<Json> = items.iter().map(encode_atom).collect();
            json!({"t": "set", "v": items})
        }
        Value::Record(r) => {
            let fields: Vec<Json> = r
                .fields
                .iter()
                .map(|(n, v)| json!([n, encode_atom(v)]))
                .collect();
            json!({"t": "namedtuple", "tag": r.type_tag, "fields": fields})
        }
        Value::Object(o) => {
            let attrs: Vec<Json> = o
                .attrs
                .iter()
                .map(|(n, v)| json!([n, encode_atom(v)]))
                .collect();
            json!({"t": "object", "tag": o.type_tag, "attrs": attrs})
        }
    }
}

fn obj<'a>(j: &'a Json) -> DeltaResult<&'a JsonMap<String, Json>> {
    j.as_object()
        .ok_or_else(|| DeltaError::malformed("atom is not an object"))
}

fn field<'a>(m: &'a JsonMap<String, Json>, name: &str) -> DeltaResult<&'a Json> {
    m.get(name)
        .ok_or_else(|| DeltaError::malformed(format!("atom is missing field {name:?}")))
}

fn str_field<'a>(m: &'a JsonMap<String, Json>, name: &str) -> DeltaResult<&'a str> {
    field(m, name)?
        .as_str()
        .ok_or_else(|| DeltaError::malformed(format!("atom field {name:?} is not a string")))
}

fn named_pairs(j: &Json, what: &str) -> DeltaResult<Vec<(String, Json)>> {
    let arr = j
        .as_array()
        .ok_or_else(|| DeltaError::malformed(format!("{what} is not an array")))?;
    let mut out = Vec::with_capacity(arr.len());
    for entry in arr {
        let pair = entry
            .as_array()
            .filter(|p| p.len() == 2)
            .ok_or_else(|| DeltaError::malformed(format!("{what} entry is not a pair")))?;
        let name = pair[0]
            .as_str()
            .ok_or_else(|| DeltaError::malformed(format!("{what} entry name is not a string")))?;
        out.push((name.to_string(), pair[1].clone()));
    }
    Ok(out)
}

/// Decode one tagged atom under the given policy.
pub fn decode_atom(j: &Json, policy: &AtomPolicy) -> DeltaResult<Value> {
    let m = obj(j)?;
    let tag = str_field(m, "t")?;
    if !policy.permits(tag) {
        return Err(DeltaError::ForbiddenAtom {
            tag: tag.to_string(),
        });
    }
    Ok(match tag {
        "none" => Value::Null,
        "bool" => Value::Bool(
            field(m, "v")?
                .as_bool()
                .ok_or_else(|| DeltaError::malformed("bool atom without boolean"))?,
        ),
        "int" => Value::Int(
            field(m, "v")?
                .as_i64()
                .ok_or_else(|| DeltaError::malformed("int atom without integer"))?,
        ),
        "float" => Value::Float(json_float(field(m, "v")?, "float atom")?),
        "decimal" => Value::Decimal(
            str_field(m, "v")?
                .parse::<Decimal>()
                .map_err(DeltaError::Type)?,
        ),
        "complex" => Value::Complex {
            re: json_float(field(m, "re")?, "complex re")?,
            im: json_float(field(m, "im")?, "complex im")?,
        },
        "bytes" => Value::Bytes(
            hex::decode(str_field(m, "v")?)
                .map_err(|_| DeltaError::malformed("bytes atom is not valid hex"))?,
        ),
        "str" => Value::Text(str_field(m, "v")?.to_string()),
        "datetime" => Value::DateTime(
            DateTime::parse_from_rfc3339(str_field(m, "v")?)
                .map_err(|e| DeltaError::malformed(format!("bad datetime: {e}")))?,
        ),
        "date" => Value::Date(
            NaiveDate::parse_from_str(str_field(m, "v")?, "%Y-%m-%d")
                .map_err(|e| DeltaError::malformed(format!("bad date: {e}")))?,
        ),
        "time" => Value::Time(
            NaiveTime::parse_from_str(str_field(m, "v")?, "%H:%M:%S%.f")
                .map_err(|e| DeltaError::malformed(format!("bad time: {e}")))?,
        ),
        "duration" => {
            let secs = field(m, "secs")?
                .as_i64()
                .ok_or_else(|| DeltaError::malformed("duration secs is not an integer"))?;
            let nanos = field(m, "nanos")?
                .as_i64()
                .ok_or_else(|| DeltaError::malformed("duration nanos is not an integer"))?;
            Value::Duration(TimeDelta::seconds(secs) + TimeDelta::nanoseconds(nanos))
        }
        "uuid" => Value::Uuid(
            str_field(m, "v")?
                .parse()
                .map_err(|_| DeltaError::malformed("bad uuid literal"))?,
        ),
        "iprange" => {
            let addr: IpAddr = str_field(m, "addr")?
                .parse()
                .map_err(|_| DeltaError::malformed("bad ip address"))?;
            let prefix = match field(m, "prefix")? {
                Json::Null => None,
                Json::Number(n) => Some(
                    n.as_u64()
                        .filter(|&p| p <= 128)
                        .ok_or_else(|| DeltaError::malformed("bad ip prefix"))?
                        as u8,
                ),
                _ => return Err(DeltaError::malformed("bad ip prefix")),
            };
            let role = match str_field(m, "role")? {
                "address" => IpRole::Address,
                "network" => IpRole::Network,
                "interface" => IpRole::Interface,
                other => {
                    return Err(DeltaError::malformed(format!("unknown ip role {other:?}")))
                }
            };
            Value::IpRange(IpRange { addr, prefix, role })
        }
        "regex" => Value::Regex(RegexSpec {
            pattern: str_field(m, "pattern")?.to_string(),
            flags: field(m, "flags")?
                .as_u64()
                .ok_or_else(|| DeltaError::malformed("regex flags is not an integer"))?
                as u32,
            groups: field(m, "groups")?
                .as_u64()
                .ok_or_else(|| DeltaError::malformed("regex groups is not an integer"))?
                as u32,
        }),
        "enum" => Value::Enum(EnumValue {
            name: str_field(m, "name")?.to_string(),
            value: Box::new(decode_atom(field(m, "v")?, policy)?),
        }),
        "map" => {
            let v = field(m, "v")?
                .as_array()
                .ok_or_else(|| DeltaError::malformed("map atom is not an array"))?;
            let mut pairs = Vec::with_capacity(v.len());
            for entry in v {
                let pair = entry
                    .as_array()
                    .filter(|p| p.len() == 2)
                    .ok_or_else(|| DeltaError::malformed("map entry is not a pair"))?;
                pairs.push((
                    decode_atom(&pair[0], policy)?,
                    decode_atom(&pair[1], policy)?,
                ));
            }
            Value::Map(pairs)
        }
        "list" | "tuple" | "set" => {
            let v = field(m, "v")?
                .as_array()
                .ok_or_else(|| DeltaError::malformed("sequence atom is not an array"))?;
            let mut items = Vec::with_capacity(v.len());
            for entry in v {
                items.push(decode_atom(entry, policy)?);
            }
            match tag {
                "list" => Value::list(items),
                "tuple" => Value::tuple(items),
                _ => Value::Set(items),
            }
        }
        "namedtuple" => {
            let mut fields = Vec::new();
            for (name, raw) in named_pairs(field(m, "fields")?, "namedtuple fields")? {
                fields.push((name, decode_atom(&raw, policy)?));
            }
            Value::Record(Record {
                type_tag: str_field(m, "tag")?.to_string(),
                fields,
            })
        }
        "object" => {
            let mut attrs = Vec::new();
            for (name, raw) in named_pairs(field(m, "attrs")?, "object attrs")? {
                attrs.push((name, decode_atom(&raw, policy)?));
            }
            Value::Object(ObjectValue {
                type_tag: str_field(m, "tag")?.to_string(),
                attrs,
            })
        }
        other => {
            return Err(DeltaError::ForbiddenAtom {
                tag: other.to_string(),
            })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: Value) {
        let policy = AtomPolicy::default();
        let decoded = decode_atom(&encode_atom(&v), &policy).unwrap();
        assert_eq!(decoded, v);
    }

    #[test]
    fn scalars_round_trip() {
        round_trip(Value::Null);
        round_trip(Value::Bool(true));
        round_trip(Value::Int(-42));
        round_trip(Value::Float(1.5));
        round_trip(Value::text("héllo"));
        round_trip(Value::Bytes(vec![0, 255, 7]));
        round_trip(Value::Decimal("-1.50".parse().unwrap()));
        round_trip(Value::Complex { re: 1.0, im: -2.5 });
        round_trip(Value::Duration(TimeDelta::seconds(90) + TimeDelta::nanoseconds(250)));
    }

    #[test]
    fn nonfinite_floats_use_string_literals() {
        let atom = encode_atom(&Value::Float(f64::INFINITY));
        assert_eq!(atom["v"], json!("inf"));
        let back = decode_atom(&atom, &AtomPolicy::default()).unwrap();
        assert_eq!(back, Value::Float(f64::INFINITY));
    }

    #[test]
    fn containers_round_trip() {
        round_trip(Value::Map(vec![
            (Value::text("k"), Value::Int(1)),
            (Value::Int(2), Value::list(vec![Value::Bool(false)])),
        ]));
        round_trip(Value::tuple(vec![Value::Int(1), Value::text("x")]));
        round_trip(Value::Set(vec![Value::Int(1), Value::Int(2)]));
        round_trip(Value::Record(Record {
            type_tag: "Point".to_string(),
            fields: vec![
                ("x".to_string(), Value::Int(1)),
                ("y".to_string(), Value::Int(2)),
            ],
        }));
    }

    #[test]
    fn unknown_tag_is_forbidden() {
        let doc = json!({"t": "code", "v": "print(1)"});
        let err = decode_atom(&doc, &AtomPolicy::default()).unwrap_err();
        assert!(matches!(err, DeltaError::ForbiddenAtom { tag } if tag == "code"));
    }

    #[test]
    fn restricted_policy_rejects_builtin_tags() {
        let policy = AtomPolicy::restricted(&["int", "str"]);
        assert!(decode_atom(&encode_atom(&Value::Int(1)), &policy).is_ok());
        let err = decode_atom(&encode_atom(&Value::Bool(true)), &policy).unwrap_err();
        assert!(matches!(err, DeltaError::ForbiddenAtom { .. }));
    }
}
