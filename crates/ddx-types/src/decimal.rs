//! Exact base-10 numbers.
//!
//! `Decimal` stores a sign, an unscaled integer, and a power-of-ten scale,
//! normalized so that the fractional part never carries trailing zeros.
//! Equality and ordering are numeric: `1.10 == 1.1`.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::TypeError;

/// An exact base-10 number: `(-1)^negative * unscaled * 10^(-scale)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Decimal {
    negative: bool,
    unscaled: u128,
    scale: u32,
}

impl Decimal {
    /// The decimal zero.
    pub const ZERO: Self = Self {
        negative: false,
        unscaled: 0,
        scale: 0,
    };

    /// Build from parts, normalizing trailing fractional zeros.
    pub fn from_parts(negative: bool, unscaled: u128, scale: u32) -> Self {
        let mut d = Self {
            negative,
            unscaled,
            scale,
        };
        d.normalize();
        d
    }

    /// Build from an integer.
    pub fn from_i64(v: i64) -> Self {
        Self::from_parts(v < 0, v.unsigned_abs() as u128, 0)
    }

    fn normalize(&mut self) {
        while self.scale > 0 && self.unscaled % 10 == 0 {
            self.unscaled /= 10;
            self.scale -= 1;
        }
        if self.unscaled == 0 {
            self.negative = false;
            self.scale = 0;
        }
    }

    /// True if the value is exactly zero.
    pub fn is_zero(&self) -> bool {
        self.unscaled == 0
    }

    /// True if the value is negative (zero is never negative).
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Approximate the value as an `f64`.
    pub fn to_f64(&self) -> f64 {
        let mag = self.unscaled as f64 / 10f64.powi(self.scale as i32);
        if self.negative {
            -mag
        } else {
            mag
        }
    }

    /// Render with exactly `digits` fractional digits, rounding half to even.
    pub fn to_fixed_string(&self, digits: u32) -> String {
        let mut d = *self;
        match d.scale.cmp(&digits) {
            Ordering::Greater => {
                // Round off the excess fractional digits.
                let drop = d.scale - digits;
                let pow = 10u128.checked_pow(drop);
                match pow {
                    Some(p) => {
                        let q = d.unscaled / p;
                        let r = d.unscaled % p;
                        let half = p / 2;
                        let round_up = match r.cmp(&half) {
                            Ordering::Greater => true,
                            Ordering::Less => false,
                            Ordering::Equal => q % 2 == 1,
                        };
                        d.unscaled = if round_up { q + 1 } else { q };
                        d.scale = digits;
                    }
                    None => {
                        d.unscaled = 0;
                        d.scale = digits;
                    }
                }
            }
            Ordering::Less => {
                let raise = digits - d.scale;
                match 10u128
                    .checked_pow(raise)
                    .and_then(|p| d.unscaled.checked_mul(p))
                {
                    Some(u) => {
                        d.unscaled = u;
                        d.scale = digits;
                    }
                    None => {
                        // Magnitude too large to widen exactly; pad textually below.
                        let body = render_parts(d.negative, d.unscaled, d.scale);
                        return pad_fraction(&body, digits);
                    }
                }
            }
            Ordering::Equal => {}
        }
        if d.unscaled == 0 {
            d.negative = false;
        }
        render_parts(d.negative, d.unscaled, d.scale)
    }

    fn magnitude_cmp(&self, other: &Self) -> Ordering {
        // Compare |self| and |other| by aligning scales.
        let (a, b) = (self, other);
        let common = a.scale.max(b.scale);
        let ua = scale_up(a.unscaled, common - a.scale);
        let ub = scale_up(b.unscaled, common - b.scale);
        match (ua, ub) {
            (Some(x), Some(y)) => x.cmp(&y),
            // Overflow while widening: fall back to a float comparison.
            _ => a
                .to_f64()
                .abs()
                .partial_cmp(&b.to_f64().abs())
                .unwrap_or(Ordering::Equal),
        }
    }
}

fn scale_up(unscaled: u128, by: u32) -> Option<u128> {
    10u128.checked_pow(by).and_then(|p| unscaled.checked_mul(p))
}

fn render_parts(negative: bool, unscaled: u128, scale: u32) -> String {
    let digits = unscaled.to_string();
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if scale == 0 {
        out.push_str(&digits);
        return out;
    }
    let scale = scale as usize;
    if digits.len() > scale {
        let split = digits.len() - scale;
        out.push_str(&digits[..split]);
        out.push('.');
        out.push_str(&digits[split..]);
    } else {
        out.push_str("0.");
        for _ in 0..(scale - digits.len()) {
            out.push('0');
        }
        out.push_str(&digits);
    }
    out
}

fn pad_fraction(body: &str, digits: u32) -> String {
    let mut out = body.to_string();
    let frac = match body.find('.') {
        Some(i) => body.len() - i - 1,
        None => {
            out.push('.');
            0
        }
    };
    for _ in frac..digits as usize {
        out.push('0');
    }
    out
}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => self.magnitude_cmp(other),
            (true, true) => other.magnitude_cmp(self),
        }
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_parts(self.negative, self.unscaled, self.scale))
    }
}

impl FromStr for Decimal {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TypeError::InvalidDecimal(s.to_string());
        let mut rest = s.trim();
        if rest.is_empty() {
            return Err(bad());
        }
        let negative = match rest.as_bytes()[0] {
            b'-' => {
                rest = &rest[1..];
                true
            }
            b'+' => {
                rest = &rest[1..];
                false
            }
            _ => false,
        };
        // Split off an exponent, if any.
        let (mantissa, exp) = match rest.find(['e', 'E']) {
            Some(i) => {
                let e: i32 = rest[i + 1..].parse().map_err(|_| bad())?;
                (&rest[..i], e)
            }
            None => (rest, 0),
        };
        let (int_part, frac_part) = match mantissa.find('.') {
            Some(i) => (&mantissa[..i], &mantissa[i + 1..]),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(bad());
        }
        let mut unscaled: u128 = 0;
        for c in int_part.chars().chain(frac_part.chars()) {
            let d = c.to_digit(10).ok_or_else(bad)? as u128;
            unscaled = unscaled
                .checked_mul(10)
                .and_then(|u| u.checked_add(d))
                .ok_or_else(bad)?;
        }
        let mut scale = frac_part.len() as i64 - exp as i64;
        if scale < 0 {
            // Positive net exponent: fold it into the unscaled value.
            let raise = (-scale) as u32;
            unscaled = scale_up(unscaled, raise).ok_or_else(bad)?;
            scale = 0;
        }
        if scale > u32::MAX as i64 {
            return Err(bad());
        }
        Ok(Self::from_parts(negative, unscaled, scale as u32))
    }
}
