//! The recursive comparator.
//!
//! `DeepDiff` walks `t1` and `t2` in lock-step, dispatching on value kind
//! and emitting change records into a [`DiffReport`]. Unordered sequence
//! comparison delegates to the pairing module; ordered comparison aligns
//! by index or by Myers diff over element fingerprints.

use std::collections::HashMap;

use ddx_hash::DeepHasher;
use ddx_types::{
    as_f64, normalize_datetime, number_to_string, path_is_within, render_literal, Path, PathStep,
    Record, Value, ValueKind,
};
use similar::{capture_diff_slices, Algorithm, DiffOp, TextDiff};
use tracing::{debug, warn};

use crate::cache::{LfuCache, TunedCache};
use crate::distance::logarithmic_distance;
use crate::error::DiffResult;
use crate::operators::{Level, ReportSink};
use crate::options::{DiffOptions, GroupBy};
use crate::report::{ChangeKind, ChangeRecord, DiffReport, OpTag, Opcode};

/// The diff engine. Construction validates the options; comparison never
/// fails on configuration.
#[derive(Debug)]
pub struct DeepDiff {
    opts: DiffOptions,
}

impl DeepDiff {
    /// Create a differ, rejecting invalid option combinations.
    pub fn new(opts: DiffOptions) -> DiffResult<Self> {
        opts.validate()?;
        Ok(Self { opts })
    }

    /// The active options.
    pub fn options(&self) -> &DiffOptions {
        &self.opts
    }

    /// Compare two values and produce a report.
    pub fn compare(&self, t1: &Value, t2: &Value) -> DiffResult<DiffReport> {
        let mut report = DiffReport::default();
        let grouped: Option<(Value, Value)> = self.opts.group_by.as_ref().map(|gb| {
            (
                apply_group_by(t1, gb, "t1", &mut report),
                apply_group_by(t2, gb, "t2", &mut report),
            )
        });
        let (left, right) = match &grouped {
            Some((a, b)) => (a, b),
            None => (t1, t2),
        };
        let mut walker = Walker::new(&self.opts, report);
        if walker.begin_pass() {
            walker.diff_level(left, right, Path::root(), None)?;
        }
        Ok(walker.finish())
    }
}

pub(crate) struct Walker<'o> {
    pub(crate) opts: &'o DiffOptions,
    pub(crate) hasher: DeepHasher,
    pub(crate) report: DiffReport,
    pub(crate) distance_cache: TunedCache<(String, String), f64>,
    pub(crate) fingerprint_cache: LfuCache<usize, Option<(String, usize)>>,
    pub(crate) hash_cache_hits: u64,
    pub(crate) parts_cache: HashMap<String, Vec<String>>,
    pub(crate) ancestors: Vec<(usize, usize)>,
    pub(crate) stopped: bool,
}

impl<'o> Walker<'o> {
    pub(crate) fn new(opts: &'o DiffOptions, report: DiffReport) -> Self {
        let hasher = DeepHasher::new(opts.hash_options());
        // Exclusion rules make fingerprints path-dependent, so a value
        // keyed by node identity alone would be wrong.
        let fingerprint_capacity = if hasher.options().has_exclusions() {
            0
        } else {
            opts.cache_size
        };
        Self {
            opts,
            hasher,
            report,
            distance_cache: TunedCache::new(opts.cache_size, opts.cache_tuning_sample_size),
            fingerprint_cache: LfuCache::new(fingerprint_capacity),
            hash_cache_hits: 0,
            parts_cache: HashMap::new(),
            ancestors: Vec::new(),
            stopped: false,
        }
    }

    pub(crate) fn finish(mut self) -> DiffReport {
        self.report.stats.distance_cache_hits = self.distance_cache.hits();
        self.report.stats.hash_cache_hits = self.hash_cache_hits;
        self.report
    }

    /// Fingerprint a value through the bounded node-identity cache. A miss
    /// walks the subtree once and stores every node it visits, so later
    /// passes that descend into the same nodes hit. Node addresses are
    /// stable for the duration of one `compare` call.
    pub(crate) fn cached_fingerprint(
        &mut self,
        v: &Value,
        path: &Path,
    ) -> DiffResult<Option<(String, usize)>> {
        let key = v as *const Value as usize;
        if let Some(hit) = self.fingerprint_cache.get(&key) {
            self.hash_cache_hits += 1;
            return Ok(hit);
        }
        let (root, memo) = self.hasher.fingerprint_with_memo(v, path)?;
        for (ptr, entry) in memo {
            self.fingerprint_cache.insert(ptr, Some(entry));
        }
        self.fingerprint_cache.insert(key, root.clone());
        Ok(root)
    }

    /// Pass boundary: counts the expansion, observes cancellation and the
    /// pass cap, and drives the progress callback. Returns `false` when
    /// the walk must stop.
    pub(crate) fn begin_pass(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        if let Some(token) = &self.opts.cancellation {
            if token.is_cancelled() {
                self.report.cancelled = true;
                self.stopped = true;
                return false;
            }
        }
        self.report.stats.passes += 1;
        if self.report.stats.passes > self.opts.max_passes {
            self.report.max_passes_reached = true;
            self.stopped = true;
            return false;
        }
        if let Some(cb) = &self.opts.progress_callback {
            cb(&self.report.stats);
        }
        true
    }

    /// Emit one record, honoring the diff cap.
    pub(crate) fn emit(&mut self, record: ChangeRecord) {
        if self.stopped {
            return;
        }
        if let Some(max) = self.opts.max_diffs {
            if self.report.stats.diff_count >= max {
                self.report.max_diffs_reached = true;
                self.stopped = true;
                return;
            }
        }
        self.report.push(record);
    }

    /// Compare one pair of values at `path`.
    ///
    /// `new_path` is the shifted location in `t2` when an unordered pairing
    /// moved the item; it is attached to records emitted at exactly this
    /// level.
    pub(crate) fn diff_level(
        &mut self,
        t1: &Value,
        t2: &Value,
        path: Path,
        new_path: Option<Path>,
    ) -> DiffResult<()> {
        if self.stopped {
            return Ok(());
        }
        if std::ptr::eq(t1, t2) {
            return Ok(());
        }
        let rendered = path.to_string();
        if self.skip_branch(t1, t2, &rendered) {
            return Ok(());
        }
        {
            let level = Level {
                path: &path,
                t1,
                t2,
            };
            for op in &self.opts.custom_operators {
                if op.match_level(&level) {
                    let mut sink = ReportSink::new(&mut self.report);
                    if op.give_up_diffing(&level, &mut sink) {
                        return Ok(());
                    }
                }
            }
        }
        let key = (t1 as *const Value as usize, t2 as *const Value as usize);
        if self.ancestors.contains(&key) {
            return Ok(());
        }
        self.ancestors.push(key);
        let out = self.dispatch(t1, t2, &path, new_path);
        self.ancestors.pop();
        out
    }

    fn skip_branch(&self, t1: &Value, t2: &Value, rendered: &str) -> bool {
        if !self.opts.include_paths.is_empty() {
            let related = self.opts.include_paths.iter().any(|inc| {
                path_is_within(rendered, inc) || path_is_within(inc, rendered)
            });
            if !related {
                return true;
            }
        }
        if self
            .opts
            .exclude_paths
            .iter()
            .any(|ex| path_is_within(rendered, ex))
        {
            return true;
        }
        if self
            .opts
            .exclude_regex_paths
            .iter()
            .any(|re| re.is_match(rendered))
        {
            return true;
        }
        if self.opts.exclude_types.contains(&t1.kind()) || self.opts.exclude_types.contains(&t2.kind())
        {
            return true;
        }
        if let Some(cb) = &self.opts.exclude_obj_callback {
            if cb(t1, rendered) || cb(t2, rendered) {
                return true;
            }
        }
        if let Some(cb) = &self.opts.exclude_obj_callback_strict {
            if cb(t1, rendered) && cb(t2, rendered) {
                return true;
            }
        }
        if let Some(cb) = &self.opts.include_obj_callback {
            if !(cb(t1, rendered) || cb(t2, rendered)) {
                return true;
            }
        }
        if let Some(cb) = &self.opts.include_obj_callback_strict {
            if !(cb(t1, rendered) && cb(t2, rendered)) {
                return true;
            }
        }
        false
    }

    fn dispatch(
        &mut self,
        t1: &Value,
        t2: &Value,
        path: &Path,
        new_path: Option<Path>,
    ) -> DiffResult<()> {
        let (k1, k2) = (t1.kind(), t2.kind());
        if k1 != k2 {
            return self.dispatch_cross_kind(t1, t2, k1, k2, path, new_path);
        }
        match k1 {
            ValueKind::Null | ValueKind::Bool => self.diff_plain(t1, t2, path, new_path),
            ValueKind::Int | ValueKind::Float | ValueKind::Decimal | ValueKind::Complex => {
                self.diff_numbers(t1, t2, path, new_path)
            }
            ValueKind::Text | ValueKind::Bytes => self.diff_strings(t1, t2, path, new_path),
            ValueKind::DateTime => self.diff_datetimes(t1, t2, path, new_path),
            ValueKind::Date | ValueKind::Time | ValueKind::Duration | ValueKind::Uuid
            | ValueKind::IpRange => self.diff_plain(t1, t2, path, new_path),
            ValueKind::Regex => self.diff_regexes(t1, t2, path, new_path),
            ValueKind::Enum => self.diff_enums(t1, t2, path, new_path),
            ValueKind::Map => {
                let (Value::Map(p1), Value::Map(p2)) = (t1, t2) else {
                    unreachable!()
                };
                self.diff_mapping(t1, t2, p1, p2, path, new_path)
            }
            ValueKind::List | ValueKind::Tuple => {
                let (Value::Seq(s1), Value::Seq(s2)) = (t1, t2) else {
                    unreachable!()
                };
                self.diff_sequences(&s1.items, &s2.items, path, new_path)
            }
            ValueKind::Set => {
                let (Value::Set(s1), Value::Set(s2)) = (t1, t2) else {
                    unreachable!()
                };
                self.diff_sets(s1, s2, path)
            }
            ValueKind::Record => {
                let (Value::Record(r1), Value::Record(r2)) = (t1, t2) else {
                    unreachable!()
                };
                if r1.type_tag != r2.type_tag && !self.opts.ignore_type_subclasses {
                    self.report_type_change(t1, t2, path, new_path);
                    return Ok(());
                }
                self.diff_named(
                    &r1.fields,
                    &r2.fields,
                    path,
                    ChangeKind::AttributeAdded,
                    ChangeKind::AttributeRemoved,
                )
            }
            ValueKind::Object => {
                let (Value::Object(o1), Value::Object(o2)) = (t1, t2) else {
                    unreachable!()
                };
                if o1.type_tag != o2.type_tag && !self.opts.ignore_type_subclasses {
                    self.report_type_change(t1, t2, path, new_path);
                    return Ok(());
                }
                let f1: Vec<(String, Value)> = o1
                    .attrs_filtered(self.opts.ignore_private_variables)
                    .cloned()
                    .collect();
                let f2: Vec<(String, Value)> = o2
                    .attrs_filtered(self.opts.ignore_private_variables)
                    .cloned()
                    .collect();
                self.diff_named(
                    &f1,
                    &f2,
                    path,
                    ChangeKind::AttributeAdded,
                    ChangeKind::AttributeRemoved,
                )
            }
        }
    }

    fn dispatch_cross_kind(
        &mut self,
        t1: &Value,
        t2: &Value,
        k1: ValueKind,
        k2: ValueKind,
        path: &Path,
        new_path: Option<Path>,
    ) -> DiffResult<()> {
        if self.opts.ignore_uuid_types
            && ((k1 == ValueKind::Uuid && k2 == ValueKind::Text)
                || (k1 == ValueKind::Text && k2 == ValueKind::Uuid))
        {
            return self.diff_uuid_text(t1, t2, path, new_path);
        }
        if !self.opts.kinds_grouped(k1, k2) {
            self.report_type_change(t1, t2, path, new_path);
            return Ok(());
        }
        // The kinds are equated by a group; compare by shape family.
        if k1.is_numeric() && k2.is_numeric() {
            return self.diff_numbers(t1, t2, path, new_path);
        }
        if k1.is_string_like() && k2.is_string_like() {
            return self.diff_strings(t1, t2, path, new_path);
        }
        if let (Value::Seq(s1), Value::Seq(s2)) = (t1, t2) {
            return self.diff_sequences(&s1.items, &s2.items, path, new_path);
        }
        // Grouped but structurally incomparable: fall back to equality.
        if t1 != t2 {
            self.emit_values_changed(t1, t2, path, new_path, None);
        }
        Ok(())
    }

    fn report_type_change(&mut self, t1: &Value, t2: &Value, path: &Path, new_path: Option<Path>) {
        let mut record = ChangeRecord::new(ChangeKind::TypeChanges, path.clone())
            .with_old(t1.clone())
            .with_new(t2.clone());
        record.new_path = new_path;
        self.emit(record);
    }

    fn emit_values_changed(
        &mut self,
        t1: &Value,
        t2: &Value,
        path: &Path,
        new_path: Option<Path>,
        diff: Option<String>,
    ) {
        let mut record = ChangeRecord::new(ChangeKind::ValuesChanged, path.clone())
            .with_old(t1.clone())
            .with_new(t2.clone());
        record.new_path = new_path;
        record.diff = diff;
        self.emit(record);
    }

    /// Plain equality comparison for kinds with no tolerance policy.
    fn diff_plain(
        &mut self,
        t1: &Value,
        t2: &Value,
        path: &Path,
        new_path: Option<Path>,
    ) -> DiffResult<()> {
        if t1 != t2 {
            self.emit_values_changed(t1, t2, path, new_path, None);
        }
        Ok(())
    }

    fn diff_numbers(
        &mut self,
        t1: &Value,
        t2: &Value,
        path: &Path,
        new_path: Option<Path>,
    ) -> DiffResult<()> {
        if self.opts.ignore_nan_inequality && t1.is_nan() && t2.is_nan() {
            return Ok(());
        }
        let equal = if let Some(eps) = self.opts.math_epsilon {
            let (r1, i1) = complex_parts(t1);
            let (r2, i2) = complex_parts(t2);
            (r1 - r2).abs() <= eps && (i1 - i2).abs() <= eps
        } else if self.opts.use_log_scale {
            let (r1, i1) = complex_parts(t1);
            let (r2, i2) = complex_parts(t2);
            logarithmic_distance(r1, r2) <= self.opts.log_scale_similarity_threshold
                && logarithmic_distance(i1, i2) <= self.opts.log_scale_similarity_threshold
        } else if self.opts.significant_digits.is_some() {
            let digits = self.opts.significant_digits;
            number_to_string(t1, digits, self.opts.number_format_notation)
                == number_to_string(t2, digits, self.opts.number_format_notation)
        } else if t1.kind() == t2.kind() {
            t1 == t2
        } else {
            let (r1, i1) = complex_parts(t1);
            let (r2, i2) = complex_parts(t2);
            r1 == r2 && i1 == i2
        };
        if !equal {
            self.emit_values_changed(t1, t2, path, new_path, None);
        }
        Ok(())
    }

    fn diff_strings(
        &mut self,
        t1: &Value,
        t2: &Value,
        path: &Path,
        new_path: Option<Path>,
    ) -> DiffResult<()> {
        let rendered = path.to_string();
        if let (Value::Bytes(b1), Value::Bytes(b2)) = (t1, t2) {
            if !self.hasher.options().bytes_as_text() {
                // Opaque bytes compare by raw content; decoding happens
                // only for the unified-diff attachment and may fail
                // without consequence.
                if b1 != b2 {
                    let diff = {
                        let opts = self.hasher.options();
                        match (
                            opts.decode_bytes(b1, &rendered),
                            opts.decode_bytes(b2, &rendered),
                        ) {
                            (Ok(s1), Ok(s2)) if s1.contains('\n') || s2.contains('\n') => Some(
                                TextDiff::from_lines(&s1, &s2)
                                    .unified_diff()
                                    .context_radius(3)
                                    .header("t1", "t2")
                                    .to_string(),
                            ),
                            _ => None,
                        }
                    };
                    self.emit_values_changed(t1, t2, path, new_path, diff);
                }
                return Ok(());
            }
        }
        let s1 = self.string_form(t1, &rendered)?;
        let s2 = self.string_form(t2, &rendered)?;
        if s1 == s2 {
            return Ok(());
        }
        let diff = if s1.contains('\n') || s2.contains('\n') {
            Some(
                TextDiff::from_lines(&s1, &s2)
                    .unified_diff()
                    .context_radius(3)
                    .header("t1", "t2")
                    .to_string(),
            )
        } else {
            None
        };
        self.emit_values_changed(t1, t2, path, new_path, diff);
        Ok(())
    }

    fn string_form(&self, v: &Value, rendered_path: &str) -> DiffResult<String> {
        let raw = match v {
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => self.hasher.options().decode_bytes(b, rendered_path)?,
            other => render_literal(other),
        };
        Ok(if self.opts.ignore_string_case {
            raw.to_lowercase()
        } else {
            raw
        })
    }

    fn diff_datetimes(
        &mut self,
        t1: &Value,
        t2: &Value,
        path: &Path,
        new_path: Option<Path>,
    ) -> DiffResult<()> {
        let (Value::DateTime(a), Value::DateTime(b)) = (t1, t2) else {
            unreachable!()
        };
        let na = normalize_datetime(a, self.opts.truncate_datetime);
        let nb = normalize_datetime(b, self.opts.truncate_datetime);
        if na != nb {
            self.emit_values_changed(t1, t2, path, new_path, None);
        }
        Ok(())
    }

    fn diff_uuid_text(
        &mut self,
        t1: &Value,
        t2: &Value,
        path: &Path,
        new_path: Option<Path>,
    ) -> DiffResult<()> {
        let canon = |v: &Value| match v {
            Value::Uuid(u) => u.to_string(),
            Value::Text(s) => s
                .parse::<uuid::Uuid>()
                .map(|u| u.to_string())
                .unwrap_or_else(|_| s.clone()),
            other => render_literal(other),
        };
        if canon(t1) != canon(t2) {
            self.emit_values_changed(t1, t2, path, new_path, None);
        }
        Ok(())
    }

    /// Regex patterns compare as a named record of (pattern, flags, groups).
    fn diff_regexes(
        &mut self,
        t1: &Value,
        t2: &Value,
        path: &Path,
        new_path: Option<Path>,
    ) -> DiffResult<()> {
        let (Value::Regex(a), Value::Regex(b)) = (t1, t2) else {
            unreachable!()
        };
        if a == b {
            return Ok(());
        }
        let as_record = |r: &ddx_types::RegexSpec| {
            Value::Record(Record {
                type_tag: "re.Pattern".to_string(),
                fields: vec![
                    ("pattern".to_string(), Value::Text(r.pattern.clone())),
                    ("flags".to_string(), Value::Int(r.flags as i64)),
                    ("groups".to_string(), Value::Int(r.groups as i64)),
                ],
            })
        };
        let (ra, rb) = (as_record(a), as_record(b));
        self.diff_level(&ra, &rb, path.clone(), new_path)
    }

    fn diff_enums(
        &mut self,
        t1: &Value,
        t2: &Value,
        path: &Path,
        new_path: Option<Path>,
    ) -> DiffResult<()> {
        let (Value::Enum(a), Value::Enum(b)) = (t1, t2) else {
            unreachable!()
        };
        if a.name != b.name {
            self.emit_values_changed(t1, t2, path, new_path, None);
            return Ok(());
        }
        self.diff_level(
            &a.value,
            &b.value,
            path.child(PathStep::attr("value")),
            None,
        )
    }

    /// Normalized identity for a mapping key under the active options.
    fn key_id(&mut self, key: &Value) -> DiffResult<String> {
        match self.cached_fingerprint(key, &Path::root())? {
            Some((fp, _)) => Ok(fp),
            None => Ok(format!("raw:{}", render_literal(key))),
        }
    }

    fn diff_mapping(
        &mut self,
        t1: &Value,
        t2: &Value,
        p1: &[(Value, Value)],
        p2: &[(Value, Value)],
        path: &Path,
        new_path: Option<Path>,
    ) -> DiffResult<()> {
        let mut by_id1: Vec<(String, &Value, &Value)> = Vec::with_capacity(p1.len());
        for (k, v) in p1 {
            by_id1.push((self.key_id(k)?, k, v));
        }
        let mut by_id2: Vec<(String, &Value, &Value)> = Vec::with_capacity(p2.len());
        for (k, v) in p2 {
            by_id2.push((self.key_id(k)?, k, v));
        }
        let ids1: HashMap<&str, usize> = by_id1
            .iter()
            .enumerate()
            .map(|(i, (id, _, _))| (id.as_str(), i))
            .collect();
        let ids2: HashMap<&str, usize> = by_id2
            .iter()
            .enumerate()
            .map(|(i, (id, _, _))| (id.as_str(), i))
            .collect();

        let common: Vec<(usize, usize)> = by_id1
            .iter()
            .enumerate()
            .filter_map(|(i, (id, _, _))| ids2.get(id.as_str()).map(|&j| (i, j)))
            .collect();
        let union_len = by_id1.len() + by_id2.len() - common.len();

        // Whole-dict replacement when too few keys are shared.
        let threshold = self.opts.threshold_to_diff_deeper;
        if threshold > 0.0
            && union_len > 1
            && (common.len() as f64 / union_len as f64) < threshold
        {
            self.emit_values_changed(t1, t2, path, new_path, None);
            return Ok(());
        }

        for (id, k, v) in &by_id2 {
            if !ids1.contains_key(id.as_str()) {
                self.emit(
                    ChangeRecord::new(
                        ChangeKind::DictionaryItemAdded,
                        path.child(PathStep::key((*k).clone())),
                    )
                    .with_new((*v).clone()),
                );
            }
        }
        for (id, k, v) in &by_id1 {
            if !ids2.contains_key(id.as_str()) {
                self.emit(
                    ChangeRecord::new(
                        ChangeKind::DictionaryItemRemoved,
                        path.child(PathStep::key((*k).clone())),
                    )
                    .with_old((*v).clone()),
                );
            }
        }
        for (i, j) in common {
            let (_, k1, v1) = &by_id1[i];
            let (_, _, v2) = &by_id2[j];
            self.diff_level(v1, v2, path.child(PathStep::key((*k1).clone())), None)?;
        }
        Ok(())
    }

    fn diff_named(
        &mut self,
        f1: &[(String, Value)],
        f2: &[(String, Value)],
        path: &Path,
        added_kind: ChangeKind,
        removed_kind: ChangeKind,
    ) -> DiffResult<()> {
        let names1: HashMap<&str, &Value> = f1.iter().map(|(n, v)| (n.as_str(), v)).collect();
        let names2: HashMap<&str, &Value> = f2.iter().map(|(n, v)| (n.as_str(), v)).collect();
        for (name, v) in f2 {
            if !names1.contains_key(name.as_str()) {
                self.emit(
                    ChangeRecord::new(added_kind, path.child(PathStep::attr(name.clone())))
                        .with_new(v.clone()),
                );
            }
        }
        for (name, v) in f1 {
            if let Some(v2) = names2.get(name.as_str()) {
                self.diff_level(v, v2, path.child(PathStep::attr(name.clone())), None)?;
            } else {
                self.emit(
                    ChangeRecord::new(removed_kind, path.child(PathStep::attr(name.clone())))
                        .with_old(v.clone()),
                );
            }
        }
        Ok(())
    }

    fn diff_sequences(
        &mut self,
        s1: &[Value],
        s2: &[Value],
        path: &Path,
        new_path: Option<Path>,
    ) -> DiffResult<()> {
        if self.opts.ignore_order {
            return self.diff_unordered(s1, s2, path);
        }
        if self.opts.zip_ordered_iterables || s1.len() == s2.len() {
            return self.diff_zipped(s1, s2, path);
        }
        self.diff_aligned(s1, s2, path, new_path)
    }

    fn diff_zipped(&mut self, s1: &[Value], s2: &[Value], path: &Path) -> DiffResult<()> {
        let shared = s1.len().min(s2.len());
        for i in 0..shared {
            self.diff_level(&s1[i], &s2[i], path.child(PathStep::index(i)), None)?;
        }
        for (i, v) in s1.iter().enumerate().skip(shared) {
            self.emit(
                ChangeRecord::new(ChangeKind::IterableItemRemoved, path.child(PathStep::index(i)))
                    .with_old(v.clone()),
            );
        }
        for (i, v) in s2.iter().enumerate().skip(shared) {
            self.emit(
                ChangeRecord::new(ChangeKind::IterableItemAdded, path.child(PathStep::index(i)))
                    .with_new(v.clone()),
            );
        }
        Ok(())
    }

    /// Myers alignment over element fingerprints; opcode spans are recorded
    /// for delta replay.
    fn diff_aligned(
        &mut self,
        s1: &[Value],
        s2: &[Value],
        path: &Path,
        _new_path: Option<Path>,
    ) -> DiffResult<()> {
        let fp1 = self.element_fingerprints(s1, path)?;
        let fp2 = self.element_fingerprints(s2, path)?;
        let ops = capture_diff_slices(Algorithm::Myers, &fp1, &fp2);
        let mut opcodes: Vec<Opcode> = Vec::new();
        let mut interesting = false;
        for op in &ops {
            match *op {
                DiffOp::Equal {
                    old_index,
                    new_index,
                    len,
                } => {
                    opcodes.push(Opcode {
                        tag: OpTag::Equal,
                        old_range: (old_index, old_index + len),
                        new_range: (new_index, new_index + len),
                        old_values: Vec::new(),
                        new_values: Vec::new(),
                    });
                }
                DiffOp::Delete {
                    old_index,
                    old_len,
                    new_index,
                } => {
                    interesting = true;
                    for i in old_index..old_index + old_len {
                        self.emit(
                            ChangeRecord::new(
                                ChangeKind::IterableItemRemoved,
                                path.child(PathStep::index(i)),
                            )
                            .with_old(s1[i].clone()),
                        );
                    }
                    opcodes.push(Opcode {
                        tag: OpTag::Delete,
                        old_range: (old_index, old_index + old_len),
                        new_range: (new_index, new_index),
                        old_values: s1[old_index..old_index + old_len].to_vec(),
                        new_values: Vec::new(),
                    });
                }
                DiffOp::Insert {
                    old_index,
                    new_index,
                    new_len,
                } => {
                    interesting = true;
                    for i in new_index..new_index + new_len {
                        self.emit(
                            ChangeRecord::new(
                                ChangeKind::IterableItemAdded,
                                path.child(PathStep::index(i)),
                            )
                            .with_new(s2[i].clone()),
                        );
                    }
                    opcodes.push(Opcode {
                        tag: OpTag::Insert,
                        old_range: (old_index, old_index),
                        new_range: (new_index, new_index + new_len),
                        old_values: Vec::new(),
                        new_values: s2[new_index..new_index + new_len].to_vec(),
                    });
                }
                DiffOp::Replace {
                    old_index,
                    old_len,
                    new_index,
                    new_len,
                } => {
                    interesting = true;
                    let shared = old_len.min(new_len);
                    for j in 0..shared {
                        let (oi, ni) = (old_index + j, new_index + j);
                        let moved = if oi != ni {
                            Some(path.child(PathStep::index(ni)))
                        } else {
                            None
                        };
                        self.diff_level(&s1[oi], &s2[ni], path.child(PathStep::index(oi)), moved)?;
                    }
                    for i in old_index + shared..old_index + old_len {
                        self.emit(
                            ChangeRecord::new(
                                ChangeKind::IterableItemRemoved,
                                path.child(PathStep::index(i)),
                            )
                            .with_old(s1[i].clone()),
                        );
                    }
                    for i in new_index + shared..new_index + new_len {
                        self.emit(
                            ChangeRecord::new(
                                ChangeKind::IterableItemAdded,
                                path.child(PathStep::index(i)),
                            )
                            .with_new(s2[i].clone()),
                        );
                    }
                    opcodes.push(Opcode {
                        tag: OpTag::Replace,
                        old_range: (old_index, old_index + old_len),
                        new_range: (new_index, new_index + new_len),
                        old_values: s1[old_index..old_index + old_len].to_vec(),
                        new_values: s2[new_index..new_index + new_len].to_vec(),
                    });
                }
            }
        }
        if interesting {
            self.report.opcodes.insert(path.to_string(), opcodes);
        }
        Ok(())
    }

    /// Fingerprints for ordered alignment. Excluded elements get a shared
    /// sentinel so they align as equal and never produce records.
    pub(crate) fn element_fingerprints(
        &mut self,
        items: &[Value],
        path: &Path,
    ) -> DiffResult<Vec<String>> {
        let mut out = Vec::with_capacity(items.len());
        for (i, item) in items.iter().enumerate() {
            let child = path.child(PathStep::index(i));
            let normalized = self
                .opts
                .custom_operators
                .iter()
                .find_map(|op| op.normalize_value_for_hashing(&child, item));
            // Normalized values are temporaries, so their addresses are
            // not cacheable.
            let fingerprint = match &normalized {
                Some(target) => self.hasher.fingerprint_at(target, &child)?,
                None => self.cached_fingerprint(item, &child)?,
            };
            match fingerprint {
                Some((fp, _)) => out.push(fp),
                None => out.push("excluded".to_string()),
            }
        }
        Ok(out)
    }

    fn diff_sets(&mut self, s1: &[Value], s2: &[Value], path: &Path) -> DiffResult<()> {
        let mut fps1: HashMap<String, &Value> = HashMap::new();
        for item in s1 {
            if let Some((fp, _)) =
                self.cached_fingerprint(item, &path.child(PathStep::key(item.clone())))?
            {
                fps1.entry(fp).or_insert(item);
            }
        }
        let mut fps2: HashMap<String, &Value> = HashMap::new();
        for item in s2 {
            if let Some((fp, _)) =
                self.cached_fingerprint(item, &path.child(PathStep::key(item.clone())))?
            {
                fps2.entry(fp).or_insert(item);
            }
        }
        for (fp, item) in &fps2 {
            if !fps1.contains_key(fp) {
                self.emit(
                    ChangeRecord::new(
                        ChangeKind::SetItemAdded,
                        path.child(PathStep::key((*item).clone())),
                    )
                    .with_new((*item).clone()),
                );
            }
        }
        for (fp, item) in &fps1 {
            if !fps2.contains_key(fp) {
                self.emit(
                    ChangeRecord::new(
                        ChangeKind::SetItemRemoved,
                        path.child(PathStep::key((*item).clone())),
                    )
                    .with_old((*item).clone()),
                );
            }
        }
        Ok(())
    }
}

fn complex_parts(v: &Value) -> (f64, f64) {
    match v {
        Value::Complex { re, im } => (*re, *im),
        other => (as_f64(other).unwrap_or(f64::NAN), 0.0),
    }
}

/// Convert a sequence of mappings into a mapping keyed by the group fields.
///
/// Items missing a key are reported in `unprocessed` and skipped, never
/// silently dropped.
fn apply_group_by(v: &Value, gb: &GroupBy, side: &str, report: &mut DiffReport) -> Value {
    let Value::Seq(seq) = v else {
        warn!(side, "group_by requires a sequence of mappings");
        report
            .unprocessed
            .push(format!("{side}: root is not a sequence, group_by skipped"));
        return v.clone();
    };
    let mut groups: Vec<(Value, Value)> = Vec::new();
    for (i, item) in seq.items.iter().enumerate() {
        let Value::Map(pairs) = item else {
            report
                .unprocessed
                .push(format!("{side}: root[{i}] is not a mapping, skipped by group_by"));
            continue;
        };
        let primary = &gb.keys[0];
        let Some(primary_val) = item.map_get(&Value::text(primary.clone())) else {
            warn!(side, index = i, key = %primary, "group_by key missing");
            report.unprocessed.push(format!(
                "{side}: root[{i}] is missing the group_by key {primary:?}"
            ));
            continue;
        };
        let rest = Value::Map(
            pairs
                .iter()
                .filter(|(k, _)| !matches!(k, Value::Text(name) if gb.keys.contains(name)))
                .cloned()
                .collect(),
        );
        if gb.keys.len() == 2 {
            let secondary = &gb.keys[1];
            let Some(secondary_val) = item.map_get(&Value::text(secondary.clone())) else {
                warn!(side, index = i, key = %secondary, "group_by key missing");
                report.unprocessed.push(format!(
                    "{side}: root[{i}] is missing the group_by key {secondary:?}"
                ));
                continue;
            };
            let pos = match groups.iter().position(|(k, _)| k == primary_val) {
                Some(pos) => pos,
                None => {
                    groups.push((primary_val.clone(), Value::Map(Vec::new())));
                    groups.len() - 1
                }
            };
            if let (_, Value::Map(inner)) = &mut groups[pos] {
                insert_group(inner, secondary_val.clone(), rest, gb, side, i);
            }
        } else {
            insert_group(&mut groups, primary_val.clone(), rest, gb, side, i);
        }
    }
    sort_grouped_lists(&mut groups, gb);
    Value::Map(groups)
}

fn insert_group(
    slot: &mut Vec<(Value, Value)>,
    key: Value,
    rest: Value,
    gb: &GroupBy,
    side: &str,
    index: usize,
) {
    match slot.iter_mut().find(|(k, _)| *k == key) {
        Some((_, existing)) => {
            if gb.sort_key.is_some() {
                if let Value::Seq(s) = existing {
                    s.items.push(rest);
                }
            } else {
                debug!(side, index, "duplicate group_by key, last occurrence wins");
                *existing = rest;
            }
        }
        None => {
            let slotted = if gb.sort_key.is_some() {
                Value::list(vec![rest])
            } else {
                rest
            };
            slot.push((key, slotted));
        }
    }
}

fn sort_grouped_lists(groups: &mut [(Value, Value)], gb: &GroupBy) {
    let Some(sort_key) = &gb.sort_key else { return };
    for (_, v) in groups.iter_mut() {
        match v {
            Value::Seq(s) => {
                s.items.sort_by_key(|item| {
                    item.map_get(&Value::text(sort_key.clone()))
                        .map(render_literal)
                        .unwrap_or_default()
                });
            }
            Value::Map(inner) => sort_grouped_lists(inner, gb),
            _ => {}
        }
    }
}
