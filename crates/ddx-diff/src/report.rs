//! The change report: records, statistics, and views.
//!
//! The differ accumulates [`ChangeRecord`]s into a [`DiffReport`]. The tree
//! view groups records by kind; the flat view maps each record to a
//! path-keyed entry whose payload depends on the verbosity level.

use std::collections::BTreeMap;
use std::fmt;

use ddx_types::{Path, Value};

/// The taxonomy of reportable changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    TypeChanges,
    ValuesChanged,
    DictionaryItemAdded,
    DictionaryItemRemoved,
    AttributeAdded,
    AttributeRemoved,
    IterableItemAdded,
    IterableItemRemoved,
    SetItemAdded,
    SetItemRemoved,
    RepetitionChange,
}

impl ChangeKind {
    /// The snake-case label used in flat views and deltas.
    pub fn label(&self) -> &'static str {
        match self {
            Self::TypeChanges => "type_changes",
            Self::ValuesChanged => "values_changed",
            Self::DictionaryItemAdded => "dictionary_item_added",
            Self::DictionaryItemRemoved => "dictionary_item_removed",
            Self::AttributeAdded => "attribute_added",
            Self::AttributeRemoved => "attribute_removed",
            Self::IterableItemAdded => "iterable_item_added",
            Self::IterableItemRemoved => "iterable_item_removed",
            Self::SetItemAdded => "set_item_added",
            Self::SetItemRemoved => "set_item_removed",
            Self::RepetitionChange => "repetition_change",
        }
    }

    /// True for the kinds that report an addition or a removal rather than
    /// an in-place change.
    pub fn is_add_or_remove(&self) -> bool {
        !matches!(
            self,
            Self::TypeChanges | Self::ValuesChanged | Self::RepetitionChange
        )
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Repetition details for unordered duplicate mismatches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Repetition {
    pub old_repeat: usize,
    pub new_repeat: usize,
    pub old_indexes: Vec<usize>,
    pub new_indexes: Vec<usize>,
}

/// One reported change.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeRecord {
    pub kind: ChangeKind,
    /// Where the change applies in `t1`.
    pub path: Path,
    /// The location in `t2` when indexes have shifted.
    pub new_path: Option<Path>,
    /// The old value; `None` means not present.
    pub old: Option<Value>,
    /// The new value; `None` means not present.
    pub new: Option<Value>,
    /// Unified diff attachment for multi-line string changes.
    pub diff: Option<String>,
    /// Repetition attachment for repetition changes.
    pub repetition: Option<Repetition>,
}

impl ChangeRecord {
    /// A bare record with no values attached.
    pub fn new(kind: ChangeKind, path: Path) -> Self {
        Self {
            kind,
            path,
            new_path: None,
            old: None,
            new: None,
            diff: None,
            repetition: None,
        }
    }

    pub fn with_old(mut self, old: Value) -> Self {
        self.old = Some(old);
        self
    }

    pub fn with_new(mut self, new: Value) -> Self {
        self.new = Some(new);
        self
    }

    pub fn with_new_path(mut self, new_path: Path) -> Self {
        self.new_path = Some(new_path);
        self
    }
}

/// Tag of an opcode span over an ordered sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpTag {
    Equal,
    Replace,
    Delete,
    Insert,
}

/// A contiguous edit over an ordered sequence, with the values involved.
#[derive(Clone, Debug, PartialEq)]
pub struct Opcode {
    pub tag: OpTag,
    /// Half-open index range in the old sequence.
    pub old_range: (usize, usize),
    /// Half-open index range in the new sequence.
    pub new_range: (usize, usize),
    pub old_values: Vec<Value>,
    pub new_values: Vec<Value>,
}

/// Counters maintained during one `compare` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiffStats {
    /// Number of pair expansions.
    pub passes: u64,
    /// Number of change records emitted.
    pub diff_count: u64,
    /// Distance-cache hits.
    pub distance_cache_hits: u64,
    /// Fingerprint-cache hits.
    pub hash_cache_hits: u64,
}

/// The product of a `compare` call: records, opcodes, flags, statistics.
#[derive(Clone, Debug, Default)]
pub struct DiffReport {
    records: Vec<ChangeRecord>,
    /// Opcode spans per rendered parent path, for ordered sequence edits.
    pub opcodes: BTreeMap<String, Vec<Opcode>>,
    /// Paths of subvalues the engine could not process.
    pub unprocessed: Vec<String>,
    pub stats: DiffStats,
    /// Sticky stop flags; partial output stays well-formed.
    pub max_passes_reached: bool,
    pub max_diffs_reached: bool,
    pub cancelled: bool,
}

impl DiffReport {
    /// True when no change was recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of change records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// All records in emission order.
    pub fn records(&self) -> &[ChangeRecord] {
        &self.records
    }

    /// Records of one kind.
    pub fn by_kind(&self, kind: ChangeKind) -> impl Iterator<Item = &ChangeRecord> {
        self.records.iter().filter(move |r| r.kind == kind)
    }

    /// Append a record, keeping `(kind, path)` pairs unique.
    ///
    /// Returns `false` when a record with the same kind and path already
    /// exists; the first record wins.
    pub fn push(&mut self, record: ChangeRecord) -> bool {
        let rendered = record.path.to_string();
        let duplicate = self
            .records
            .iter()
            .any(|r| r.kind == record.kind && r.path.to_string() == rendered);
        if duplicate {
            return false;
        }
        self.records.push(record);
        self.stats.diff_count += 1;
        true
    }

    /// Records grouped by kind.
    pub fn tree_view(&self) -> BTreeMap<ChangeKind, Vec<&ChangeRecord>> {
        let mut out: BTreeMap<ChangeKind, Vec<&ChangeRecord>> = BTreeMap::new();
        for r in &self.records {
            out.entry(r.kind).or_default().push(r);
        }
        out
    }

    /// Flatten into path-keyed entries per kind.
    ///
    /// Verbosity: 0 omits values from added/removed payloads, 2 includes
    /// values in every payload, 1 includes them for iterable and set items
    /// but not for dictionary items and attributes.
    pub fn flat_view(&self, verbose_level: u8) -> FlatView {
        let mut out: BTreeMap<ChangeKind, BTreeMap<String, FlatEntry>> = BTreeMap::new();
        for r in &self.records {
            let include_values = if r.kind.is_add_or_remove() {
                match verbose_level {
                    0 => false,
                    1 => matches!(
                        r.kind,
                        ChangeKind::IterableItemAdded
                            | ChangeKind::IterableItemRemoved
                            | ChangeKind::SetItemAdded
                            | ChangeKind::SetItemRemoved
                    ),
                    _ => true,
                }
            } else {
                true
            };
            let entry = FlatEntry {
                new_path: r.new_path.as_ref().map(|p| p.to_string()),
                old: if include_values { r.old.clone() } else { None },
                new: if include_values { r.new.clone() } else { None },
                old_type: r.old.as_ref().map(|v| v.type_tag().to_string()),
                new_type: r.new.as_ref().map(|v| v.type_tag().to_string()),
                diff: r.diff.clone(),
                repetition: r.repetition.clone(),
            };
            out.entry(r.kind)
                .or_default()
                .insert(r.path.to_string(), entry);
        }
        FlatView { entries: out }
    }
}

/// One entry in the flat view.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlatEntry {
    pub new_path: Option<String>,
    pub old: Option<Value>,
    pub new: Option<Value>,
    pub old_type: Option<String>,
    pub new_type: Option<String>,
    pub diff: Option<String>,
    pub repetition: Option<Repetition>,
}

/// Path-keyed dictionary of changes, grouped by kind.
#[derive(Clone, Debug, Default)]
pub struct FlatView {
    pub entries: BTreeMap<ChangeKind, BTreeMap<String, FlatEntry>>,
}

impl FlatView {
    /// The entry at `(kind, path)`, if any.
    pub fn get(&self, kind: ChangeKind, path: &str) -> Option<&FlatEntry> {
        self.entries.get(&kind)?.get(path)
    }

    /// Paths reported under a kind.
    pub fn paths(&self, kind: ChangeKind) -> Vec<&str> {
        self.entries
            .get(&kind)
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddx_types::PathStep;

    #[test]
    fn push_rejects_duplicate_kind_path_pairs() {
        let mut report = DiffReport::default();
        let path = Path::root().child(PathStep::index(1));
        assert!(report.push(
            ChangeRecord::new(ChangeKind::ValuesChanged, path.clone())
                .with_old(Value::Int(1))
                .with_new(Value::Int(2))
        ));
        assert!(!report.push(ChangeRecord::new(ChangeKind::ValuesChanged, path.clone())));
        // A different kind at the same path is fine.
        assert!(report.push(ChangeRecord::new(ChangeKind::TypeChanges, path)));
        assert_eq!(report.len(), 2);
        assert_eq!(report.stats.diff_count, 2);
    }

    #[test]
    fn flat_view_verbosity_controls_added_values() {
        let mut report = DiffReport::default();
        report.push(
            ChangeRecord::new(
                ChangeKind::DictionaryItemAdded,
                Path::root().child(PathStep::key(Value::Int(5))),
            )
            .with_new(Value::Int(5)),
        );
        assert!(report
            .flat_view(1)
            .get(ChangeKind::DictionaryItemAdded, "root[5]")
            .unwrap()
            .new
            .is_none());
        assert_eq!(
            report
                .flat_view(2)
                .get(ChangeKind::DictionaryItemAdded, "root[5]")
                .unwrap()
                .new,
            Some(Value::Int(5))
        );
    }

    #[test]
    fn flat_view_keeps_changed_values_at_low_verbosity() {
        let mut report = DiffReport::default();
        report.push(
            ChangeRecord::new(ChangeKind::ValuesChanged, Path::root())
                .with_old(Value::Int(1))
                .with_new(Value::Int(2)),
        );
        let entry = report.flat_view(0);
        let entry = entry.get(ChangeKind::ValuesChanged, "root").unwrap();
        assert_eq!(entry.old, Some(Value::Int(1)));
        assert_eq!(entry.new, Some(Value::Int(2)));
    }
}
