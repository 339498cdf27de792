//! Numeric normalization.
//!
//! When a significant-digits budget is set, every number is represented by
//! its decimal-expansion string to that many fractional digits. Comparison
//! and hashing both use this normalized form, so the two can never disagree.

use std::fmt;
use std::str::FromStr;

use crate::error::TypeError;
use crate::value::Value;

/// How normalized numbers are rendered: fixed-point or scientific.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Notation {
    #[default]
    Fixed,
    Scientific,
}

impl FromStr for Notation {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f" => Ok(Self::Fixed),
            "e" => Ok(Self::Scientific),
            other => Err(TypeError::InvalidLiteral(other.to_string())),
        }
    }
}

impl fmt::Display for Notation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fixed => "f",
            Self::Scientific => "e",
        })
    }
}

/// Render a float with `digits` fractional digits.
pub fn format_float(x: f64, digits: u32, notation: Notation) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let s = match notation {
        Notation::Fixed => format!("{:.*}", digits as usize, x),
        Notation::Scientific => format!("{:.*e}", digits as usize, x),
    };
    strip_negative_zero(s)
}

// "-0.000" and "0.000" must normalize identically.
fn strip_negative_zero(s: String) -> String {
    if let Some(rest) = s.strip_prefix('-') {
        if rest
            .chars()
            .all(|c| c == '0' || c == '.' || c == 'e' || c == '-' || c == '+')
        {
            return rest.to_string();
        }
    }
    s
}

/// The canonical string for a numeric value.
///
/// With a digits budget, the decimal expansion to that many fractional
/// digits; without one, the shortest exact rendering. Complex numbers
/// decompose into `re` and `im` and apply the same rule pairwise. Returns
/// `None` for non-numeric values.
pub fn number_to_string(v: &Value, digits: Option<u32>, notation: Notation) -> Option<String> {
    match v {
        Value::Int(i) => Some(match digits {
            Some(d) => format_float(*i as f64, d, notation),
            None => i.to_string(),
        }),
        Value::Float(x) => Some(match digits {
            Some(d) => format_float(*x, d, notation),
            None => format!("{x:?}"),
        }),
        Value::Decimal(dec) => Some(match (digits, notation) {
            (Some(d), Notation::Fixed) => dec.to_fixed_string(d),
            (Some(d), Notation::Scientific) => format_float(dec.to_f64(), d, notation),
            (None, _) => dec.to_string(),
        }),
        Value::Complex { re, im } => {
            let re_s = number_to_string(&Value::Float(*re), digits, notation)?;
            let im_s = number_to_string(&Value::Float(*im), digits, notation)?;
            let sep = if im_s.starts_with('-') { "" } else { "+" };
            Some(format!("{re_s}{sep}{im_s}j"))
        }
        _ => None,
    }
}

/// The value as an `f64`, when it has one.
pub fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Int(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        Value::Decimal(d) => Some(d.to_f64()),
        _ => None,
    }
}
