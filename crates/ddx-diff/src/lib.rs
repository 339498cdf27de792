//! Structural deep comparison.
//!
//! [`DeepDiff`] compares two [`ddx_types::Value`] trees and produces a
//! [`DiffReport`] of typed change records: type changes, value changes,
//! mapping and attribute membership, sequence edits (ordered or
//! order-insensitive), set membership, and repetition changes.
//!
//! ```
//! use ddx_diff::{DeepDiff, DiffOptions, ChangeKind};
//! use ddx_types::Value;
//!
//! let t1 = Value::Map(vec![(Value::text("a"), Value::Int(1))]);
//! let t2 = Value::Map(vec![(Value::text("a"), Value::Int(2))]);
//! let report = DeepDiff::new(DiffOptions::default())?.compare(&t1, &t2)?;
//! assert_eq!(report.by_kind(ChangeKind::ValuesChanged).count(), 1);
//! # Ok::<(), ddx_diff::DiffError>(())
//! ```

mod cache;
mod differ;
mod distance;
mod error;
mod operators;
mod options;
mod pairs;
mod report;

pub use cache::{LfuCache, TunedCache};
pub use differ::DeepDiff;
pub use error::{DiffError, DiffResult};
pub use operators::{DiffOperator, Level, OperatorSelector, ReportSink};
pub use options::{
    CancelToken, CannotCompare, DiffOptions, GroupBy, IterableCompareFn, ObjCallback, ProgressFn,
    View,
};
pub use report::{
    ChangeKind, ChangeRecord, DiffReport, DiffStats, FlatEntry, FlatView, OpTag, Opcode,
    Repetition,
};

#[cfg(test)]
mod tests {
    use super::*;
    use ddx_types::Value;

    fn diff(opts: DiffOptions, t1: &Value, t2: &Value) -> DiffReport {
        DeepDiff::new(opts).unwrap().compare(t1, t2).unwrap()
    }

    fn int_map(pairs: &[(i64, i64)]) -> Value {
        Value::Map(
            pairs
                .iter()
                .map(|&(k, v)| (Value::Int(k), Value::Int(v)))
                .collect(),
        )
    }

    #[test]
    fn dict_add_remove_change() {
        let t1 = int_map(&[(1, 1), (2, 2), (3, 3), (4, 4)]);
        let t2 = int_map(&[(1, 1), (2, 4), (3, 3), (5, 5), (6, 6)]);
        let report = diff(DiffOptions::default(), &t1, &t2);

        let flat = report.flat_view(2);
        let mut added = flat.paths(ChangeKind::DictionaryItemAdded);
        added.sort();
        assert_eq!(added, vec!["root[5]", "root[6]"]);
        assert_eq!(flat.paths(ChangeKind::DictionaryItemRemoved), vec!["root[4]"]);
        let changed = flat.get(ChangeKind::ValuesChanged, "root[2]").unwrap();
        assert_eq!(changed.old, Some(Value::Int(2)));
        assert_eq!(changed.new, Some(Value::Int(4)));
        assert_eq!(report.len(), 4);
    }

    #[test]
    fn ignore_order_reports_repetitions() {
        let t1 = Value::list(vec![
            Value::Int(1),
            Value::Int(3),
            Value::Int(1),
            Value::Int(4),
        ]);
        let t2 = Value::list(vec![Value::Int(4), Value::Int(4), Value::Int(1)]);
        let opts = DiffOptions {
            ignore_order: true,
            report_repetition: true,
            ..DiffOptions::default()
        };
        let report = diff(opts, &t1, &t2);

        let removed: Vec<_> = report.by_kind(ChangeKind::IterableItemRemoved).collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].path.to_string(), "root[1]");
        assert_eq!(removed[0].old, Some(Value::Int(3)));

        let reps: Vec<_> = report.by_kind(ChangeKind::RepetitionChange).collect();
        assert_eq!(reps.len(), 2);
        let ones = reps
            .iter()
            .find(|r| r.path.to_string() == "root[0]")
            .unwrap();
        let rep = ones.repetition.as_ref().unwrap();
        assert_eq!((rep.old_repeat, rep.new_repeat), (2, 1));
        assert_eq!(rep.old_indexes, vec![0, 2]);
        assert_eq!(rep.new_indexes, vec![2]);
        let fours = reps
            .iter()
            .find(|r| r.path.to_string() == "root[3]")
            .unwrap();
        let rep = fours.repetition.as_ref().unwrap();
        assert_eq!((rep.old_repeat, rep.new_repeat), (1, 2));
        assert_eq!(rep.old_indexes, vec![3]);
        assert_eq!(rep.new_indexes, vec![0, 1]);
    }

    #[test]
    fn multiline_text_attaches_unified_diff() {
        let t1 = Value::text("world!\nGoodbye!\n1\n2\nEnd");
        let t2 = Value::text("world\n1\n2\nEnd");
        let report = diff(DiffOptions::default(), &t1, &t2);

        let changed: Vec<_> = report.by_kind(ChangeKind::ValuesChanged).collect();
        assert_eq!(changed.len(), 1);
        let attached = changed[0].diff.as_deref().unwrap();
        assert!(attached.contains("-world!"));
        assert!(attached.contains("-Goodbye!"));
        assert!(attached.contains("+world"));
    }

    #[test]
    fn significant_digits_tighten_progressively() {
        let t1 = Value::list(vec![
            Value::Float(1.2344),
            Value::Float(5.67881),
            Value::Float(6.778879),
        ]);
        let t2 = Value::list(vec![
            Value::Float(1.2343),
            Value::Float(5.67882),
            Value::Float(6.778878),
        ]);
        let with_digits = |digits| DiffOptions {
            significant_digits: Some(digits),
            ..DiffOptions::default()
        };

        assert!(diff(with_digits(3), &t1, &t2).is_empty());

        let at4 = diff(with_digits(4), &t1, &t2);
        assert_eq!(at4.len(), 1);
        assert_eq!(at4.records()[0].path.to_string(), "root[0]");

        let at5 = diff(with_digits(5), &t1, &t2);
        let mut paths: Vec<String> = at5.records().iter().map(|r| r.path.to_string()).collect();
        paths.sort();
        assert_eq!(paths, vec!["root[0]", "root[1]"]);
    }

    #[test]
    fn threshold_collapses_mostly_rekeyed_dicts() {
        let t1 = Value::Map(vec![(Value::text("veggie"), Value::text("carrots"))]);
        let t2 = Value::Map(vec![(Value::text("meat"), Value::text("carrots"))]);
        let report = diff(DiffOptions::default(), &t1, &t2);

        assert_eq!(report.len(), 1);
        let record = &report.records()[0];
        assert_eq!(record.kind, ChangeKind::ValuesChanged);
        assert_eq!(record.path.to_string(), "root");
        assert_eq!(record.old, Some(t1.clone()));
        assert_eq!(record.new, Some(t2.clone()));
    }

    #[test]
    fn threshold_zero_keeps_membership_records() {
        let t1 = Value::Map(vec![(Value::text("veggie"), Value::text("carrots"))]);
        let t2 = Value::Map(vec![(Value::text("meat"), Value::text("carrots"))]);
        let opts = DiffOptions {
            threshold_to_diff_deeper: 0.0,
            ..DiffOptions::default()
        };
        let report = diff(opts, &t1, &t2);
        assert_eq!(report.by_kind(ChangeKind::DictionaryItemAdded).count(), 1);
        assert_eq!(report.by_kind(ChangeKind::DictionaryItemRemoved).count(), 1);
    }

    #[test]
    fn equal_values_diff_empty() {
        let v = Value::Map(vec![
            (
                Value::text("items"),
                Value::list(vec![Value::Int(1), Value::text("x"), Value::Float(2.5)]),
            ),
            (Value::text("flag"), Value::Bool(true)),
        ]);
        assert!(diff(DiffOptions::default(), &v, &v.clone()).is_empty());
    }

    #[test]
    fn type_change_carries_both_values() {
        let t1 = Value::Int(5);
        let t2 = Value::text("5");
        let report = diff(DiffOptions::default(), &t1, &t2);
        let changes: Vec<_> = report.by_kind(ChangeKind::TypeChanges).collect();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].old, Some(Value::Int(5)));
        assert_eq!(changes[0].new, Some(Value::text("5")));
    }

    #[test]
    fn ignore_numeric_type_changes_compares_by_value() {
        let opts = DiffOptions {
            ignore_numeric_type_changes: true,
            ..DiffOptions::default()
        };
        let report = diff(opts, &Value::Int(2), &Value::Float(2.0));
        assert!(report.is_empty());
    }

    #[test]
    fn ordered_alignment_records_opcodes() {
        let t1 = Value::list(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
            Value::Int(4),
        ]);
        let t2 = Value::list(vec![Value::Int(1), Value::Int(3), Value::Int(9)]);
        let report = diff(DiffOptions::default(), &t1, &t2);

        assert!(report.opcodes.contains_key("root"));
        let ops = &report.opcodes["root"];
        assert!(ops.iter().any(|op| op.tag != OpTag::Equal));
        assert!(report.by_kind(ChangeKind::IterableItemRemoved).count() >= 1);
    }

    #[test]
    fn set_membership_by_content() {
        let t1 = Value::Set(vec![Value::Int(1), Value::Int(2), Value::text("a")]);
        let t2 = Value::Set(vec![Value::Int(2), Value::text("a"), Value::text("b")]);
        let report = diff(DiffOptions::default(), &t1, &t2);
        let added: Vec<_> = report.by_kind(ChangeKind::SetItemAdded).collect();
        let removed: Vec<_> = report.by_kind(ChangeKind::SetItemRemoved).collect();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].new, Some(Value::text("b")));
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].old, Some(Value::Int(1)));
    }

    #[test]
    fn exclude_paths_prune_branches() {
        let t1 = Value::Map(vec![
            (Value::text("keep"), Value::Int(1)),
            (Value::text("skip"), Value::Int(10)),
        ]);
        let t2 = Value::Map(vec![
            (Value::text("keep"), Value::Int(2)),
            (Value::text("skip"), Value::Int(20)),
        ]);
        let opts = DiffOptions {
            exclude_paths: ["root['skip']".to_string()].into(),
            ..DiffOptions::default()
        };
        let report = diff(opts, &t1, &t2);
        assert_eq!(report.len(), 1);
        assert_eq!(report.records()[0].path.to_string(), "root['keep']");
    }

    #[test]
    fn max_diffs_caps_output() {
        let t1 = Value::list((0..50).map(Value::Int).collect());
        let t2 = Value::list((100..150).map(Value::Int).collect());
        let opts = DiffOptions {
            max_diffs: Some(5),
            ..DiffOptions::default()
        };
        let report = diff(opts, &t1, &t2);
        assert!(report.max_diffs_reached);
        assert_eq!(report.stats.diff_count, 5);
    }

    #[test]
    fn verbose_zero_strips_membership_values() {
        let t1 = Value::Map(vec![(Value::text("a"), Value::Int(1))]);
        let t2 = Value::Map(vec![
            (Value::text("a"), Value::Int(1)),
            (Value::text("b"), Value::Int(2)),
        ]);
        let opts = DiffOptions {
            threshold_to_diff_deeper: 0.0,
            ..DiffOptions::default()
        };
        let report = diff(opts, &t1, &t2);
        let flat = report.flat_view(0);
        let entry = flat
            .get(ChangeKind::DictionaryItemAdded, "root['b']")
            .unwrap();
        assert_eq!(entry.new, None);
        let verbose = report.flat_view(2);
        let entry = verbose
            .get(ChangeKind::DictionaryItemAdded, "root['b']")
            .unwrap();
        assert_eq!(entry.new, Some(Value::Int(2)));
    }

    #[test]
    fn group_by_restructures_before_diffing() {
        let row = |id: &str, val: i64| {
            Value::Map(vec![
                (Value::text("id"), Value::text(id)),
                (Value::text("val"), Value::Int(val)),
            ])
        };
        let t1 = Value::list(vec![row("a", 1), row("b", 2)]);
        let t2 = Value::list(vec![row("a", 1), row("b", 3)]);
        let opts = DiffOptions {
            group_by: Some(GroupBy::single("id")),
            ..DiffOptions::default()
        };
        let report = diff(opts, &t1, &t2);
        assert_eq!(report.len(), 1);
        assert_eq!(report.records()[0].path.to_string(), "root['b']['val']");
    }

    #[test]
    fn unordered_pairing_recurses_into_near_matches() {
        let item = |w: i64| {
            Value::Map(vec![
                (Value::text("x"), Value::Int(1)),
                (Value::text("y"), Value::Int(2)),
                (Value::text("z"), Value::Int(3)),
                (Value::text("w"), Value::Int(w)),
            ])
        };
        let other = Value::Map(vec![(Value::text("q"), Value::Int(99))]);
        let t1 = Value::list(vec![item(10), other.clone()]);
        let t2 = Value::list(vec![other, item(11)]);
        let opts = DiffOptions {
            ignore_order: true,
            ..DiffOptions::default()
        };
        let report = diff(opts, &t1, &t2);
        let changed: Vec<_> = report.by_kind(ChangeKind::ValuesChanged).collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].path.to_string(), "root[0]['w']");
        assert_eq!(changed[0].old, Some(Value::Int(10)));
        assert_eq!(changed[0].new, Some(Value::Int(11)));
        assert!(report.by_kind(ChangeKind::IterableItemAdded).next().is_none());
        assert!(report
            .by_kind(ChangeKind::IterableItemRemoved)
            .next()
            .is_none());
    }

    #[test]
    fn cancellation_stops_the_walk() {
        let token = CancelToken::new();
        token.cancel();
        let opts = DiffOptions {
            cancellation: Some(token),
            ..DiffOptions::default()
        };
        let t1 = Value::list((0..10).map(Value::Int).collect());
        let t2 = Value::list((10..20).map(Value::Int).collect());
        let report = diff(opts, &t1, &t2);
        assert!(report.cancelled);
        assert!(report.is_empty());
    }

    #[test]
    fn raw_bytes_compare_without_decoding() {
        let blob = Value::Bytes(vec![0xff, 0xfe]);
        assert!(diff(DiffOptions::default(), &blob, &blob.clone()).is_empty());

        let other = Value::Bytes(vec![0xff]);
        let report = diff(DiffOptions::default(), &blob, &other);
        let changed: Vec<_> = report.by_kind(ChangeKind::ValuesChanged).collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].old, Some(blob));
        assert_eq!(changed[0].new, Some(other));
    }

    #[test]
    fn encoding_failures_surface_only_under_text_policies() {
        let blob = Value::Bytes(vec![0xff, 0xfe]);
        let strict = DiffOptions {
            ignore_string_type_changes: true,
            ..DiffOptions::default()
        };
        let err = DeepDiff::new(strict)
            .unwrap()
            .compare(&blob, &Value::text("ok"))
            .unwrap_err();
        assert!(matches!(err, DiffError::Hash(_)));

        let lenient = DiffOptions {
            ignore_string_type_changes: true,
            ignore_encoding_errors: true,
            ..DiffOptions::default()
        };
        let report = diff(lenient, &blob, &Value::text("ok"));
        assert_eq!(report.by_kind(ChangeKind::ValuesChanged).count(), 1);
    }

    #[test]
    fn ignore_order_equality_is_symmetric() {
        let a = Value::list(vec![
            int_map(&[(1, 1), (2, 2)]),
            int_map(&[(3, 3), (4, 4)]),
            Value::Int(7),
        ]);
        let b = Value::list(vec![
            Value::Int(7),
            int_map(&[(3, 3), (4, 4)]),
            int_map(&[(1, 1), (2, 2)]),
        ]);
        let opts = DiffOptions {
            ignore_order: true,
            ..DiffOptions::default()
        };
        assert!(diff(opts.clone(), &a, &b).is_empty());
        assert!(diff(opts.clone(), &b, &a).is_empty());

        let c = Value::list(vec![
            Value::Int(7),
            int_map(&[(3, 3), (4, 5)]),
            int_map(&[(1, 1), (2, 2)]),
        ]);
        assert!(!diff(opts.clone(), &a, &c).is_empty());
        assert!(!diff(opts, &c, &a).is_empty());
    }

    #[test]
    fn deep_nesting_terminates() {
        fn nest(depth: usize, leaf: i64) -> Value {
            let mut v = Value::Int(leaf);
            for _ in 0..depth {
                v = Value::list(vec![v]);
            }
            v
        }
        let t1 = nest(200, 1);
        let t2 = nest(200, 2);
        assert!(diff(DiffOptions::default(), &t1, &t1).is_empty());
        let report = diff(DiffOptions::default(), &t1, &t2);
        let changed: Vec<_> = report.by_kind(ChangeKind::ValuesChanged).collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].old, Some(Value::Int(1)));
    }

    #[test]
    fn log_scale_threshold_is_inclusive() {
        let threshold = crate::distance::logarithmic_distance(10.0, 25.0);
        let opts = DiffOptions {
            use_log_scale: true,
            log_scale_similarity_threshold: threshold,
            ..DiffOptions::default()
        };
        assert!(diff(opts.clone(), &Value::Float(10.0), &Value::Float(25.0)).is_empty());
        assert!(!diff(opts, &Value::Float(10.0), &Value::Float(30.0)).is_empty());
    }

    #[test]
    fn fingerprint_cache_amortizes_unordered_hashing() {
        // The element hash of each map stores every node of its subtree;
        // recursing into the paired maps re-requests the key nodes, which
        // must now hit instead of re-walking.
        let item = |w: i64| {
            Value::Map(vec![
                (Value::text("x"), Value::Int(1)),
                (Value::text("y"), Value::Int(2)),
                (Value::text("z"), Value::Int(3)),
                (Value::text("w"), Value::Int(w)),
            ])
        };
        let t1 = Value::list(vec![item(10)]);
        let t2 = Value::list(vec![item(11)]);
        let opts = DiffOptions {
            ignore_order: true,
            cache_size: 512,
            cache_purge_level: 0,
            ..DiffOptions::default()
        };
        let report = diff(opts, &t1, &t2);
        assert_eq!(report.by_kind(ChangeKind::ValuesChanged).count(), 1);
        assert!(report.stats.hash_cache_hits > 0);

        let uncached = diff(DiffOptions { ignore_order: true, ..DiffOptions::default() }, &t1, &t2);
        assert_eq!(uncached.stats.hash_cache_hits, 0);
    }
}
