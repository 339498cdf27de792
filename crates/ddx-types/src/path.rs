//! Paths addressing a value inside a tree.
//!
//! A path is `root` followed by `.name` (attribute) and `[literal]`
//! (subscript) steps. Subscript literals are parsed with a restricted
//! evaluator: integers, floats, quoted strings, booleans, `None`, dates,
//! datetimes, and times. Anything else is kept as a raw string, which makes
//! set-element paths representable but not round-trippable.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveTime};

use crate::error::TypeError;
use crate::value::Value;

/// One step in a path.
#[derive(Clone, Debug, PartialEq)]
pub enum PathStep {
    /// Attribute access: `.name`.
    Attr(String),
    /// Subscript access: `[key]`. The key is a scalar literal value.
    Key(Value),
}

impl PathStep {
    /// Subscript step for a sequence index.
    pub fn index(i: usize) -> Self {
        Self::Key(Value::Int(i as i64))
    }

    /// Subscript step for an arbitrary key value.
    pub fn key(v: Value) -> Self {
        Self::Key(v)
    }

    /// Attribute step.
    pub fn attr(name: impl Into<String>) -> Self {
        Self::Attr(name.into())
    }
}

/// A location in a value tree, rendered as `root[1].name` etc.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Path {
    steps: Vec<PathStep>,
}

impl Path {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// The steps from root.
    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// True for the bare root.
    pub fn is_root(&self) -> bool {
        self.steps.is_empty()
    }

    /// Append a step in place.
    pub fn push(&mut self, step: PathStep) {
        self.steps.push(step);
    }

    /// A new path extended by one step.
    pub fn child(&self, step: PathStep) -> Self {
        let mut steps = self.steps.clone();
        steps.push(step);
        Self { steps }
    }

    /// A new path whose last index subscript is replaced, for reporting
    /// renamed positions on the `t2` side.
    pub fn with_last_index(&self, i: usize) -> Self {
        let mut p = self.clone();
        if let Some(last) = p.steps.last_mut() {
            *last = PathStep::index(i);
        }
        p
    }

    /// True when any attribute segment contains a double underscore.
    ///
    /// The delta applier refuses to traverse such paths.
    pub fn has_dunder_segment(&self) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, PathStep::Attr(name) if name.contains("__")))
    }

    /// Parse a rendered path string.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let bad = |reason: &str| TypeError::InvalidPath {
            path: s.to_string(),
            reason: reason.to_string(),
        };
        let rest = s
            .strip_prefix("root")
            .ok_or_else(|| bad("must start with 'root'"))?;
        let mut steps = Vec::new();
        let chars: Vec<char> = rest.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '.' => {
                    i += 1;
                    let start = i;
                    while i < chars.len() && chars[i] != '.' && chars[i] != '[' {
                        i += 1;
                    }
                    if start == i {
                        return Err(bad("empty attribute name"));
                    }
                    steps.push(PathStep::Attr(chars[start..i].iter().collect()));
                }
                '[' => {
                    i += 1;
                    let start = i;
                    let mut quote: Option<char> = None;
                    let mut escaped = false;
                    loop {
                        if i >= chars.len() {
                            return Err(bad("unterminated subscript"));
                        }
                        let c = chars[i];
                        if escaped {
                            escaped = false;
                        } else if let Some(q) = quote {
                            if c == '\\' {
                                escaped = true;
                            } else if c == q {
                                quote = None;
                            }
                        } else if c == '\'' || c == '"' {
                            quote = Some(c);
                        } else if c == ']' {
                            break;
                        }
                        i += 1;
                    }
                    let token: String = chars[start..i].iter().collect();
                    i += 1; // consume ']'
                    steps.push(PathStep::Key(parse_literal(token.trim())?));
                }
                _ => return Err(bad("expected '.' or '['")),
            }
        }
        Ok(Self { steps })
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("root")?;
        for step in &self.steps {
            match step {
                PathStep::Attr(name) => write!(f, ".{name}")?,
                PathStep::Key(v) => write!(f, "[{}]", render_literal(v))?,
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Render a scalar value as a path literal.
pub fn render_literal(v: &Value) -> String {
    match v {
        Value::Null => "None".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => format!("{x:?}"),
        Value::Decimal(d) => d.to_string(),
        Value::Text(s) => quote_single(s),
        Value::Bytes(b) => format!("b{}", quote_single(&String::from_utf8_lossy(b))),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::Time(t) => t.format("%H:%M:%S").to_string(),
        Value::DateTime(dt) => dt.to_rfc3339(),
        Value::Uuid(u) => u.to_string(),
        Value::Duration(d) => format!("{}s", d.num_seconds()),
        Value::IpRange(ip) => ip.to_string(),
        Value::Regex(r) => r.to_string(),
        Value::Enum(e) => e.name.clone(),
        // Containers only appear in set-element paths; the rendering is
        // opaque and not expected to round-trip.
        other => format!("<{}:{}>", other.type_tag(), other.child_count()),
    }
}

fn quote_single(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn unquote(token: &str) -> Option<String> {
    let mut chars = token.chars();
    let quote = chars.next()?;
    if (quote != '\'' && quote != '"') || !token.ends_with(quote) || token.len() < 2 {
        return None;
    }
    let inner = &token[1..token.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for c in inner.chars() {
        if escaped {
            out.push(c);
            escaped = false;
        } else if c == '\\' {
            escaped = true;
        } else {
            out.push(c);
        }
    }
    Some(out)
}

/// Parse a subscript literal with the restricted evaluator.
///
/// Unrecognized literals come back as raw strings rather than an error.
pub fn parse_literal(token: &str) -> Result<Value, TypeError> {
    match token {
        "None" | "null" => return Ok(Value::Null),
        "true" | "True" => return Ok(Value::Bool(true)),
        "false" | "False" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if token.starts_with('\'') || token.starts_with('"') {
        return match unquote(token) {
            Some(s) => Ok(Value::Text(s)),
            None => Err(TypeError::InvalidLiteral(token.to_string())),
        };
    }
    if let Some(rest) = token.strip_prefix('b') {
        if rest.starts_with('\'') || rest.starts_with('"') {
            return match unquote(rest) {
                Some(s) => Ok(Value::Bytes(s.into_bytes())),
                None => Err(TypeError::InvalidLiteral(token.to_string())),
            };
        }
    }
    if let Ok(i) = token.parse::<i64>() {
        return Ok(Value::Int(i));
    }
    if let Ok(x) = token.parse::<f64>() {
        return Ok(Value::Float(x));
    }
    if let Ok(d) = NaiveDate::parse_from_str(token, "%Y-%m-%d") {
        return Ok(Value::Date(d));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(token) {
        return Ok(Value::DateTime(dt));
    }
    if let Ok(t) = NaiveTime::parse_from_str(token, "%H:%M:%S") {
        return Ok(Value::Time(t));
    }
    // Raw-string fallback keeps unknown literals addressable.
    Ok(Value::Text(token.to_string()))
}

/// True when `path` equals `prefix` or sits under it.
///
/// Boundary-aware on the rendered form: `root[1]` covers `root[1].a` and
/// `root[1][0]` but not `root[10]`.
pub fn path_is_within(path: &str, prefix: &str) -> bool {
    if !path.starts_with(prefix) {
        return false;
    }
    match path.as_bytes().get(prefix.len()) {
        None => true,
        Some(b'.') | Some(b'[') => true,
        _ => false,
    }
}
