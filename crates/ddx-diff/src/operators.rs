//! Custom operators: user policy objects that can pre-empt the default
//! comparison for a matching region of the tree.

use ddx_types::{Path, Value};
use regex::Regex;

use crate::report::{ChangeKind, ChangeRecord, DiffReport};

/// One node in the walker's traversal: both values and the path in `t1`.
#[derive(Clone, Copy, Debug)]
pub struct Level<'a> {
    pub path: &'a Path,
    pub t1: &'a Value,
    pub t2: &'a Value,
}

/// Where operators push their own records.
pub struct ReportSink<'r> {
    report: &'r mut DiffReport,
}

impl<'r> ReportSink<'r> {
    pub(crate) fn new(report: &'r mut DiffReport) -> Self {
        Self { report }
    }

    /// Push a custom record; `(kind, path)` uniqueness still applies.
    pub fn report(&mut self, record: ChangeRecord) -> bool {
        self.report.push(record)
    }

    /// Convenience for the common custom result.
    pub fn values_changed(&mut self, path: Path, old: Value, new: Value) -> bool {
        self.report(
            ChangeRecord::new(ChangeKind::ValuesChanged, path)
                .with_old(old)
                .with_new(new),
        )
    }
}

/// A user-supplied comparison policy.
///
/// When [`match_level`](Self::match_level) accepts a node,
/// [`give_up_diffing`](Self::give_up_diffing) runs; returning `true` skips
/// the default comparison for that branch (the operator may have pushed its
/// own records), returning `false` falls through to the engine.
///
/// Under unordered comparison the operator must also provide
/// [`normalize_value_for_hashing`](Self::normalize_value_for_hashing) and
/// advertise it via [`has_hash_normalizer`](Self::has_hash_normalizer),
/// because fingerprints must stay consistent with the operator's notion of
/// equality; configuration fails otherwise.
pub trait DiffOperator: Send + Sync {
    /// A short name used in error messages.
    fn name(&self) -> &str {
        "operator"
    }

    /// Whether this operator handles the given node.
    fn match_level(&self, level: &Level<'_>) -> bool;

    /// Handle the node; `true` means fully handled.
    fn give_up_diffing(&self, level: &Level<'_>, sink: &mut ReportSink<'_>) -> bool;

    /// Rewrite a value before hashing so fingerprint equality matches this
    /// operator's equality. `None` leaves the value unchanged.
    fn normalize_value_for_hashing(&self, _path: &Path, _value: &Value) -> Option<Value> {
        None
    }

    /// Must return `true` when `normalize_value_for_hashing` is
    /// implemented; checked at configuration time under `ignore_order`.
    fn has_hash_normalizer(&self) -> bool {
        false
    }
}

impl std::fmt::Debug for dyn DiffOperator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DiffOperator({})", self.name())
    }
}

/// Reusable matcher over rendered paths and kind pairs, for operators that
/// select their region the common way.
#[derive(Debug, Default)]
pub struct OperatorSelector {
    pub path_regexes: Vec<Regex>,
    pub kind_pairs: Vec<(ddx_types::ValueKind, ddx_types::ValueKind)>,
}

impl OperatorSelector {
    pub fn matches(&self, level: &Level<'_>) -> bool {
        if !self.path_regexes.is_empty() {
            let rendered = level.path.to_string();
            if !self.path_regexes.iter().any(|re| re.is_match(&rendered)) {
                return false;
            }
        }
        if !self.kind_pairs.is_empty() {
            let pair = (level.t1.kind(), level.t2.kind());
            if !self.kind_pairs.iter().any(|p| *p == pair) {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddx_types::{PathStep, ValueKind};

    #[test]
    fn selector_requires_both_axes_when_both_configured() {
        let sel = OperatorSelector {
            path_regexes: vec![Regex::new(r"^root\[\d+\]$").unwrap()],
            kind_pairs: vec![(ValueKind::Int, ValueKind::Int)],
        };
        let path = Path::root().child(PathStep::index(3));
        let a = Value::Int(1);
        let b = Value::Int(2);
        assert!(sel.matches(&Level {
            path: &path,
            t1: &a,
            t2: &b
        }));

        let text = Value::text("x");
        assert!(!sel.matches(&Level {
            path: &path,
            t1: &a,
            t2: &text
        }));

        let deep = path.child(PathStep::attr("x"));
        assert!(!sel.matches(&Level {
            path: &deep,
            t1: &a,
            t2: &b
        }));
    }

    #[test]
    fn sink_enforces_uniqueness() {
        let mut report = DiffReport::default();
        let mut sink = ReportSink::new(&mut report);
        let path = Path::root();
        assert!(sink.values_changed(path.clone(), Value::Int(1), Value::Int(2)));
        assert!(!sink.values_changed(path, Value::Int(1), Value::Int(3)));
    }
}
