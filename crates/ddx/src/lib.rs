//! Structural deep-difference engine.
//!
//! This is the main entry point for applications embedding DDX. It
//! re-exports the value model, the hasher, the differ, and the delta
//! subsystem, plus a [`diff`] convenience for one-off comparisons with
//! default options.
//!
//! ```
//! use ddx::{diff, ChangeKind, Value};
//!
//! let t1 = Value::Map(vec![(Value::text("a"), Value::Int(1))]);
//! let t2 = Value::Map(vec![(Value::text("a"), Value::Int(2))]);
//! let report = diff(&t1, &t2)?;
//! assert_eq!(report.by_kind(ChangeKind::ValuesChanged).count(), 1);
//! # Ok::<(), ddx::DiffError>(())
//! ```

pub use ddx_types::{
    as_f64, normalize_datetime, number_to_string, parse_literal, path_is_within, render_literal,
    to_json_lossy, Decimal, EnumValue, IpRange, IpRole, Notation, ObjectValue, Path, PathStep,
    Record, RegexSpec, SeqKind, Sequence, TruncateLevel, TypeError, Value, ValueKind,
};

pub use ddx_hash::{DeepHasher, HashBackend, HashError, HashOptions, HashOutcome, HashResult};

pub use ddx_diff::{
    CancelToken, CannotCompare, ChangeKind, ChangeRecord, DeepDiff, DiffError, DiffOperator,
    DiffOptions, DiffReport, DiffResult, DiffStats, FlatEntry, FlatView, GroupBy, Level, OpTag,
    Opcode, OperatorSelector, Repetition, ReportSink, View,
};

pub use ddx_delta::{
    decode_atom, encode_atom, ApplyOptions, AtomPolicy, Delta, DeltaError, DeltaResult,
    RepetitionEntry, TypeChange, ValueChange, WIRE_HEADER,
};

/// Compare two values with default options.
pub fn diff(t1: &Value, t2: &Value) -> DiffResult<DiffReport> {
    DeepDiff::new(DiffOptions::default())?.compare(t1, t2)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_values_diff_end_to_end() {
        let a: serde_json::Value = serde_json::json!({"name": "ada", "scores": [1, 2, 3]});
        let b: serde_json::Value = serde_json::json!({"name": "ada", "scores": [1, 2, 4]});
        let report = diff(&Value::from(&a), &Value::from(&b)).unwrap();
        assert_eq!(report.len(), 1);
        let record = &report.records()[0];
        assert_eq!(record.kind, ChangeKind::ValuesChanged);
        assert_eq!(record.path.to_string(), "root['scores'][2]");
    }

    #[test]
    fn delta_round_trip_through_the_facade() {
        let t1 = Value::list(vec![Value::Int(1), Value::text("x")]);
        let t2 = Value::list(vec![Value::Int(1), Value::text("y")]);
        let report = diff(&t1, &t2).unwrap();
        let delta = Delta::from_report(&report);
        let mut patched = t1.clone();
        delta.apply(&mut patched, &ApplyOptions::default()).unwrap();
        assert_eq!(patched, t2);
    }
}
