//! The closed value model every DDX component operates on.
//!
//! A [`Value`] is a tagged union over the JSON-like and programmatic kinds
//! the engine can compare: scalars, mappings, ordered sequences, sets,
//! named records, and reflected objects. Host-specific types are onboarded
//! by converting into this model, never by opening the engine.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta};
use uuid::Uuid;

use crate::decimal::Decimal;

/// Discriminant for [`Value`]. List and tuple are distinct kinds: they are
/// diffed and hashed as different types unless a type group equates them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Null,
    Bool,
    Int,
    Float,
    Decimal,
    Complex,
    Bytes,
    Text,
    DateTime,
    Date,
    Time,
    Duration,
    Uuid,
    IpRange,
    Regex,
    Enum,
    Map,
    List,
    Tuple,
    Record,
    Set,
    Object,
}

impl ValueKind {
    /// The canonical type tag used in reports and hash prefixes.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Null => "none",
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Float => "float",
            Self::Decimal => "decimal",
            Self::Complex => "complex",
            Self::Bytes => "bytes",
            Self::Text => "str",
            Self::DateTime => "datetime",
            Self::Date => "date",
            Self::Time => "time",
            Self::Duration => "duration",
            Self::Uuid => "uuid",
            Self::IpRange => "iprange",
            Self::Regex => "regex",
            Self::Enum => "enum",
            Self::Map => "dict",
            Self::List => "list",
            Self::Tuple => "tuple",
            Self::Record => "namedtuple",
            Self::Set => "set",
            Self::Object => "object",
        }
    }

    /// True for the numeric kinds (int, float, decimal, complex).
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Float | Self::Decimal | Self::Complex)
    }

    /// True for the string-like kinds (str, bytes).
    pub fn is_string_like(&self) -> bool {
        matches!(self, Self::Text | Self::Bytes)
    }

    /// True for kinds with children.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            Self::Map | Self::List | Self::Tuple | Self::Record | Self::Set | Self::Object
        )
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Whether an ordered sequence is list-like or tuple-like.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SeqKind {
    List,
    Tuple,
}

/// An ordered sequence of values.
#[derive(Clone, Debug, PartialEq)]
pub struct Sequence {
    pub kind: SeqKind,
    pub items: Vec<Value>,
}

/// A record with a type tag and named fields in declaration order.
///
/// Diffs like a mapping, but is reported with attribute-style paths.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub type_tag: String,
    pub fields: Vec<(String, Value)>,
}

/// A reflected runtime object: a type tag plus named attributes.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjectValue {
    pub type_tag: String,
    pub attrs: Vec<(String, Value)>,
}

impl ObjectValue {
    /// Attributes, optionally excluding private names.
    ///
    /// Private means a leading `__`; single-underscore (including
    /// class-mangled `_Cls__name`) attributes are preserved.
    pub fn attrs_filtered(&self, ignore_private: bool) -> impl Iterator<Item = &(String, Value)> {
        self.attrs
            .iter()
            .filter(move |(name, _)| !(ignore_private && name.starts_with("__")))
    }
}

/// A named enum member with its underlying value.
#[derive(Clone, Debug, PartialEq)]
pub struct EnumValue {
    pub name: String,
    pub value: Box<Value>,
}

/// The role of an IP value: plain address, network, or interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IpRole {
    Address,
    Network,
    Interface,
}

/// An IP address, network, or interface, v4 or v6.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IpRange {
    pub addr: IpAddr,
    pub prefix: Option<u8>,
    pub role: IpRole,
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.prefix {
            Some(p) => write!(f, "{}/{}", self.addr, p),
            None => write!(f, "{}", self.addr),
        }
    }
}

/// A compiled regex reduced to what comparison needs: the source pattern,
/// its flag bits, and the capture-group count.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegexSpec {
    pub pattern: String,
    pub flags: u32,
    pub groups: u32,
}

impl fmt::Display for RegexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "re({:?}, flags={}, groups={})",
            self.pattern, self.flags, self.groups
        )
    }
}

/// A node in the typed value tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Complex { re: f64, im: f64 },
    Bytes(Vec<u8>),
    Text(String),
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
    Duration(TimeDelta),
    Uuid(Uuid),
    IpRange(IpRange),
    Regex(RegexSpec),
    Enum(EnumValue),
    /// Insertion-ordered mapping; keys are pairwise distinct values.
    Map(Vec<(Value, Value)>),
    Seq(Sequence),
    Record(Record),
    /// Unordered collection.
    Set(Vec<Value>),
    Object(ObjectValue),
}

impl Value {
    /// The kind discriminant of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Int(_) => ValueKind::Int,
            Self::Float(_) => ValueKind::Float,
            Self::Decimal(_) => ValueKind::Decimal,
            Self::Complex { .. } => ValueKind::Complex,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Text(_) => ValueKind::Text,
            Self::DateTime(_) => ValueKind::DateTime,
            Self::Date(_) => ValueKind::Date,
            Self::Time(_) => ValueKind::Time,
            Self::Duration(_) => ValueKind::Duration,
            Self::Uuid(_) => ValueKind::Uuid,
            Self::IpRange(_) => ValueKind::IpRange,
            Self::Regex(_) => ValueKind::Regex,
            Self::Enum(_) => ValueKind::Enum,
            Self::Map(_) => ValueKind::Map,
            Self::Seq(s) => match s.kind {
                SeqKind::List => ValueKind::List,
                SeqKind::Tuple => ValueKind::Tuple,
            },
            Self::Record(_) => ValueKind::Record,
            Self::Set(_) => ValueKind::Set,
            Self::Object(_) => ValueKind::Object,
        }
    }

    /// The type tag for reports. For objects and records this is the
    /// value's own tag; otherwise the kind tag.
    pub fn type_tag(&self) -> &str {
        match self {
            Self::Object(o) => &o.type_tag,
            Self::Record(r) => &r.type_tag,
            other => other.kind().tag(),
        }
    }

    /// Convenience list constructor.
    pub fn list(items: Vec<Value>) -> Self {
        Self::Seq(Sequence {
            kind: SeqKind::List,
            items,
        })
    }

    /// Convenience tuple constructor.
    pub fn tuple(items: Vec<Value>) -> Self {
        Self::Seq(Sequence {
            kind: SeqKind::Tuple,
            items,
        })
    }

    /// Convenience text constructor.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Look up a mapping entry by key equality.
    pub fn map_get(&self, key: &Value) -> Option<&Value> {
        match self {
            Self::Map(pairs) => pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Number of direct children.
    pub fn child_count(&self) -> usize {
        match self {
            Self::Map(pairs) => pairs.len(),
            Self::Seq(s) => s.items.len(),
            Self::Record(r) => r.fields.len(),
            Self::Set(items) => items.len(),
            Self::Object(o) => o.attrs.len(),
            _ => 0,
        }
    }

    /// True when the value is NaN or a complex with a NaN component.
    pub fn is_nan(&self) -> bool {
        match self {
            Self::Float(f) => f.is_nan(),
            Self::Complex { re, im } => re.is_nan() || im.is_nan(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_distinguish_list_and_tuple() {
        let l = Value::list(vec![Value::Int(1)]);
        let t = Value::tuple(vec![Value::Int(1)]);
        assert_eq!(l.kind(), ValueKind::List);
        assert_eq!(t.kind(), ValueKind::Tuple);
        assert_ne!(l, t);
    }

    #[test]
    fn type_tag_uses_object_tag() {
        let obj = Value::Object(ObjectValue {
            type_tag: "Point".into(),
            attrs: vec![("x".into(), Value::Int(1))],
        });
        assert_eq!(obj.type_tag(), "Point");
        assert_eq!(Value::Int(3).type_tag(), "int");
    }

    #[test]
    fn private_attr_filter_keeps_mangled_names() {
        let obj = ObjectValue {
            type_tag: "T".into(),
            attrs: vec![
                ("a".into(), Value::Int(1)),
                ("__secret".into(), Value::Int(2)),
                ("_T__mangled".into(), Value::Int(3)),
            ],
        };
        let kept: Vec<&str> = obj
            .attrs_filtered(true)
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(kept, vec!["a", "_T__mangled"]);
    }

    #[test]
    fn map_get_uses_value_equality() {
        let m = Value::Map(vec![
            (Value::Int(1), Value::text("one")),
            (Value::text("k"), Value::Int(2)),
        ]);
        assert_eq!(m.map_get(&Value::Int(1)), Some(&Value::text("one")));
        assert_eq!(m.map_get(&Value::text("k")), Some(&Value::Int(2)));
        assert_eq!(m.map_get(&Value::Int(9)), None);
    }

    #[test]
    fn nan_detection() {
        assert!(Value::Float(f64::NAN).is_nan());
        assert!(Value::Complex {
            re: 1.0,
            im: f64::NAN
        }
        .is_nan());
        assert!(!Value::Float(1.0).is_nan());
    }
}
