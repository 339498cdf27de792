//! Rough distances in `[0, 1]` between candidate pair items.
//!
//! Used by the unordered matcher to decide whether a removed and an added
//! item are similar enough to pair. Scalars get type-specific numeric
//! distances; containers are weighted by subtree counts.

use chrono::Datelike;
use ddx_types::{as_f64, duration_total_seconds, seconds_of_day, Value};
use similar::TextDiff;

/// Penalty added when the two sides are of different kinds.
const TYPE_MISMATCH_PENALTY: f64 = 0.5;

/// Numeric distance `|x - y| / max(|x + y|, 1)`, clipped to `[0, 1]`.
pub fn numeric_distance(x: f64, y: f64) -> f64 {
    if x == y {
        return 0.0;
    }
    let d = (x - y).abs() / (x + y).abs().max(1.0);
    d.clamp(0.0, 1.0)
}

/// `|ln(x) - ln(y)|`, falling back to the absolute difference when either
/// side is not strictly positive.
pub fn logarithmic_distance(x: f64, y: f64) -> f64 {
    if x > 0.0 && y > 0.0 {
        (x.ln() - y.ln()).abs()
    } else {
        (x - y).abs()
    }
}

/// Rough distance between two scalar values.
///
/// Containers are handled by the matcher itself, which has subtree counts
/// available; this function covers leaves.
pub fn scalar_distance(a: &Value, b: &Value) -> f64 {
    let base = match (a, b) {
        (Value::Complex { re: r1, im: i1 }, Value::Complex { re: r2, im: i2 }) => {
            (numeric_distance(*r1, *r2) + numeric_distance(*i1, *i2)) / 2.0
        }
        (Value::DateTime(x), Value::DateTime(y)) => {
            numeric_distance(x.timestamp() as f64, y.timestamp() as f64)
        }
        (Value::Date(x), Value::Date(y)) => numeric_distance(
            x.num_days_from_ce() as f64,
            y.num_days_from_ce() as f64,
        ),
        (Value::Time(x), Value::Time(y)) => {
            (seconds_of_day(x) as f64 - seconds_of_day(y) as f64).abs() / 86_400.0
        }
        (Value::Duration(x), Value::Duration(y)) => {
            numeric_distance(duration_total_seconds(x), duration_total_seconds(y))
        }
        (Value::Text(x), Value::Text(y)) => 1.0 - TextDiff::from_chars(x, y).ratio() as f64,
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => numeric_distance(x, y),
            _ => {
                if a == b {
                    0.0
                } else {
                    1.0
                }
            }
        },
    };
    let penalty = if a.kind() == b.kind() {
        0.0
    } else {
        TYPE_MISMATCH_PENALTY
    };
    (base + penalty).clamp(0.0, 1.0)
}

/// Rough distance between two containers, from their subtree counts.
pub fn container_distance(count_a: usize, count_b: usize, same_kind: bool) -> f64 {
    let delta = count_a.abs_diff(count_b) as f64;
    let base = delta / (count_a as f64 + count_b as f64 + 1e-9);
    let penalty = if same_kind { 0.0 } else { TYPE_MISMATCH_PENALTY };
    (base + penalty).clamp(0.0, 1.0)
}

/// Fraction of the smaller subtree's fingerprints shared with the other
/// subtree (multiset intersection).
pub fn intersection_fraction(parts_a: &[String], parts_b: &[String]) -> f64 {
    if parts_a.is_empty() || parts_b.is_empty() {
        return 0.0;
    }
    let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
    for p in parts_a {
        *counts.entry(p.as_str()).or_insert(0) += 1;
    }
    let mut shared = 0usize;
    for p in parts_b {
        if let Some(n) = counts.get_mut(p.as_str()) {
            if *n > 0 {
                *n -= 1;
                shared += 1;
            }
        }
    }
    shared as f64 / parts_a.len().min(parts_b.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn numeric_distance_is_bounded_and_symmetric() {
        assert_eq!(numeric_distance(10.0, 10.0), 0.0);
        assert!((numeric_distance(10.0, 10.1) - numeric_distance(10.1, 10.0)).abs() < 1e-12);
        assert!(numeric_distance(1e9, -1e9) <= 1.0);
        // Near-zero sums use the absolute difference.
        assert!((numeric_distance(0.3, -0.3) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn log_distance_falls_back_on_non_positive() {
        assert!((logarithmic_distance(10.0, 100.0) - std::f64::consts::LN_10).abs() < 1e-12);
        assert_eq!(logarithmic_distance(0.0, 2.0), 2.0);
    }

    #[test]
    fn close_numbers_are_close() {
        let d_near = scalar_distance(&Value::Int(20), &Value::Int(21));
        let d_far = scalar_distance(&Value::Int(20), &Value::Int(400));
        assert!(d_near < d_far);
    }

    #[test]
    fn type_mismatch_carries_a_penalty() {
        let same = scalar_distance(&Value::Float(4.0), &Value::Float(5.0));
        let cross = scalar_distance(&Value::Int(4), &Value::Float(5.0));
        assert!(cross > same);
        // Incomparable kinds saturate.
        assert_eq!(scalar_distance(&Value::text("B"), &Value::Int(5)), 1.0);
    }

    #[test]
    fn time_of_day_distance_scales_by_day() {
        let a = Value::Time(chrono::NaiveTime::from_hms_opt(0, 0, 0).unwrap());
        let b = Value::Time(chrono::NaiveTime::from_hms_opt(12, 0, 0).unwrap());
        assert!((scalar_distance(&a, &b) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn datetime_distance_uses_timestamps() {
        let a = Value::DateTime(DateTime::parse_from_rfc3339("2023-01-01T00:00:00Z").unwrap());
        let b = Value::DateTime(DateTime::parse_from_rfc3339("2023-01-01T00:00:01Z").unwrap());
        assert!(scalar_distance(&a, &b) < 1e-6);
    }

    #[test]
    fn similar_strings_are_near() {
        let d = scalar_distance(&Value::text("kitten"), &Value::text("sitten"));
        assert!(d > 0.0 && d < 0.4);
    }

    #[test]
    fn container_distance_weighs_size_difference() {
        assert_eq!(container_distance(5, 5, true), 0.0);
        assert!(container_distance(2, 10, true) > container_distance(8, 10, true));
        assert!(container_distance(5, 5, false) >= 0.5);
    }

    proptest::proptest! {
        #[test]
        fn numeric_distance_stays_in_unit_interval(
            x in -1e12f64..1e12,
            y in -1e12f64..1e12,
        ) {
            let d = numeric_distance(x, y);
            proptest::prop_assert!((0.0..=1.0).contains(&d));
        }

        #[test]
        fn scalar_distance_is_bounded(
            a in -1_000_000_000i64..1_000_000_000,
            b in -1_000_000_000i64..1_000_000_000,
        ) {
            let d = scalar_distance(&Value::Int(a), &Value::Int(b));
            proptest::prop_assert!((0.0..=1.0).contains(&d));
            let sym = scalar_distance(&Value::Int(b), &Value::Int(a));
            proptest::prop_assert!((d - sym).abs() < 1e-12);
        }
    }

    #[test]
    fn intersection_fraction_counts_multiset_overlap() {
        let a = vec!["x".to_string(), "y".to_string(), "x".to_string()];
        let b = vec!["x".to_string(), "z".to_string()];
        assert!((intersection_fraction(&a, &b) - 0.5).abs() < 1e-12);
        let full = vec!["x".to_string()];
        assert_eq!(intersection_fraction(&full, &full.clone()), 1.0);
    }
}
