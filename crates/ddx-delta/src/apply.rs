//! Replaying a delta against a value.
//!
//! Apply order is fixed: type changes, value changes, dictionary and
//! attribute removals, additions, set removals, set additions, indexed
//! removals in decreasing index order, indexed additions in increasing
//! order, then opcode replays for ordered sequences. The order keeps
//! every later path valid while earlier steps run.

use std::collections::BTreeMap;

use ddx_diff::OpTag;
use ddx_types::{render_literal, Path, PathStep, Value};
use tracing::warn;

use crate::delta::{Delta, RepetitionEntry};
use crate::error::{DeltaError, DeltaResult};

/// Behavior switches for [`Delta::apply`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ApplyOptions {
    /// Check stored old values against the target before each
    /// removal or update.
    pub verify_old_values: bool,
    /// Raise on mismatch or unresolvable path instead of logging and
    /// skipping the operation.
    pub raise_errors: bool,
}

impl Delta {
    /// Apply this delta to `target` in place.
    ///
    /// Dunder attribute segments are always rejected, independent of
    /// `raise_errors`.
    pub fn apply(&self, target: &mut Value, opts: &ApplyOptions) -> DeltaResult<()> {
        let applier = Applier { opts };

        for (path, change) in &self.type_changes {
            applier.replace(target, path, &change.old, &change.new)?;
        }
        for (path, change) in &self.values_changed {
            applier.replace(target, path, &change.old, &change.new)?;
        }
        for (path, old) in &self.dictionary_item_removed {
            applier.remove_keyed(target, path, Some(old))?;
        }
        for (path, old) in &self.attribute_removed {
            applier.remove_attr(target, path, Some(old))?;
        }
        for (path, new) in &self.dictionary_item_added {
            applier.insert_keyed(target, path, new)?;
        }
        for (path, new) in &self.attribute_added {
            applier.insert_attr(target, path, new)?;
        }
        for (path, items) in &self.set_item_removed {
            applier.remove_set_items(target, path, items)?;
        }
        for (path, items) in &self.set_item_added {
            applier.add_set_items(target, path, items)?;
        }

        let (removals, additions) = self.indexed_operations()?;
        for (path, indexed) in &removals {
            applier.remove_at_indexes(target, path, indexed)?;
        }
        for (path, indexed) in &additions {
            applier.add_at_indexes(target, path, indexed)?;
        }
        for (path, ops) in &self.opcodes {
            applier.replay_opcodes(target, path, ops)?;
        }
        Ok(())
    }

    /// Fold repetition entries into the per-parent indexed maps.
    fn indexed_operations(
        &self,
    ) -> DeltaResult<(
        BTreeMap<String, BTreeMap<usize, Value>>,
        BTreeMap<String, BTreeMap<usize, Value>>,
    )> {
        let mut removals = self.iterable_items_removed_at_indexes.clone();
        let mut additions = self.iterable_items_added_at_indexes.clone();
        for (item_path, entry) in &self.repetition_change {
            let parsed = Path::parse(item_path)?;
            let parent = crate::delta::strip_last(&parsed).to_string();
            fold_repetition(&mut removals, &mut additions, &parent, entry);
        }
        Ok((removals, additions))
    }
}

fn fold_repetition(
    removals: &mut BTreeMap<String, BTreeMap<usize, Value>>,
    additions: &mut BTreeMap<String, BTreeMap<usize, Value>>,
    parent: &str,
    entry: &RepetitionEntry,
) {
    let slot = removals.entry(parent.to_string()).or_default();
    for &i in &entry.old_indexes {
        slot.insert(i, entry.value.clone());
    }
    let slot = additions.entry(parent.to_string()).or_default();
    for &i in &entry.new_indexes {
        slot.insert(i, entry.value.clone());
    }
}

struct Applier<'a> {
    opts: &'a ApplyOptions,
}

impl Applier<'_> {
    fn parse(&self, path: &str) -> DeltaResult<Path> {
        let parsed = Path::parse(path)?;
        if parsed.has_dunder_segment() {
            return Err(DeltaError::ForbiddenPath {
                path: path.to_string(),
            });
        }
        Ok(parsed)
    }

    /// Mismatch between stored and found values: raise or warn-and-skip.
    fn mismatch(&self, path: &str, expected: String, found: String) -> DeltaResult<()> {
        if self.opts.raise_errors {
            return Err(DeltaError::ApplyFailed {
                path: path.to_string(),
                expected,
                found,
            });
        }
        warn!(path, %expected, %found, "delta mismatch, operation skipped");
        Ok(())
    }

    fn missing(&self, path: &str) -> DeltaResult<()> {
        if self.opts.raise_errors {
            return Err(DeltaError::MissingPath {
                path: path.to_string(),
            });
        }
        warn!(path, "delta path does not resolve, operation skipped");
        Ok(())
    }

    /// True when the operation may proceed, per verification policy.
    fn verified(&self, path: &str, expected: &Value, found: &Value) -> DeltaResult<bool> {
        if !self.opts.verify_old_values || expected == found {
            return Ok(true);
        }
        self.mismatch(path, render_literal(expected), render_literal(found))?;
        Ok(false)
    }

    fn replace(&self, target: &mut Value, path: &str, old: &Value, new: &Value) -> DeltaResult<()> {
        let parsed = self.parse(path)?;
        let Some(slot) = resolve_mut(target, parsed.steps()) else {
            return self.missing(path);
        };
        if self.verified(path, old, slot)? {
            *slot = new.clone();
        }
        Ok(())
    }

    fn remove_keyed(&self, target: &mut Value, path: &str, old: Option<&Value>) -> DeltaResult<()> {
        let parsed = self.parse(path)?;
        let Some((PathStep::Key(key), front)) = parsed.steps().split_last() else {
            return self.missing(path);
        };
        let Some(Value::Map(pairs)) = resolve_mut(target, front) else {
            return self.missing(path);
        };
        let Some(pos) = pairs.iter().position(|(k, _)| k == key) else {
            return self.missing(path);
        };
        if let Some(old) = old {
            if !self.verified(path, old, &pairs[pos].1)? {
                return Ok(());
            }
        }
        pairs.remove(pos);
        Ok(())
    }

    fn insert_keyed(&self, target: &mut Value, path: &str, new: &Value) -> DeltaResult<()> {
        let parsed = self.parse(path)?;
        let Some((PathStep::Key(key), front)) = parsed.steps().split_last() else {
            return self.missing(path);
        };
        let Some(Value::Map(pairs)) = resolve_mut(target, front) else {
            return self.missing(path);
        };
        match pairs.iter_mut().find(|(k, _)| k == key) {
            Some((_, v)) => *v = new.clone(),
            None => pairs.push((key.clone(), new.clone())),
        }
        Ok(())
    }

    fn remove_attr(&self, target: &mut Value, path: &str, old: Option<&Value>) -> DeltaResult<()> {
        let parsed = self.parse(path)?;
        let Some((PathStep::Attr(name), front)) = parsed.steps().split_last() else {
            return self.missing(path);
        };
        let Some(parent) = resolve_mut(target, front) else {
            return self.missing(path);
        };
        let fields = match parent {
            Value::Record(r) => &mut r.fields,
            Value::Object(o) => &mut o.attrs,
            _ => return self.missing(path),
        };
        let Some(pos) = fields.iter().position(|(n, _)| n == name) else {
            return self.missing(path);
        };
        if let Some(old) = old {
            if !self.verified(path, old, &fields[pos].1)? {
                return Ok(());
            }
        }
        fields.remove(pos);
        Ok(())
    }

    fn insert_attr(&self, target: &mut Value, path: &str, new: &Value) -> DeltaResult<()> {
        let parsed = self.parse(path)?;
        let Some((PathStep::Attr(name), front)) = parsed.steps().split_last() else {
            return self.missing(path);
        };
        let Some(parent) = resolve_mut(target, front) else {
            return self.missing(path);
        };
        let fields = match parent {
            Value::Record(r) => &mut r.fields,
            Value::Object(o) => &mut o.attrs,
            _ => return self.missing(path),
        };
        match fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) => *v = new.clone(),
            None => fields.push((name.clone(), new.clone())),
        }
        Ok(())
    }

    fn remove_set_items(&self, target: &mut Value, path: &str, items: &[Value]) -> DeltaResult<()> {
        let parsed = self.parse(path)?;
        let Some(Value::Set(existing)) = resolve_mut(target, parsed.steps()) else {
            return self.missing(path);
        };
        for item in items {
            match existing.iter().position(|e| e == item) {
                Some(pos) => {
                    existing.remove(pos);
                }
                None => {
                    self.mismatch(path, render_literal(item), "absent".to_string())?;
                }
            }
        }
        Ok(())
    }

    fn add_set_items(&self, target: &mut Value, path: &str, items: &[Value]) -> DeltaResult<()> {
        let parsed = self.parse(path)?;
        let Some(Value::Set(existing)) = resolve_mut(target, parsed.steps()) else {
            return self.missing(path);
        };
        for item in items {
            if !existing.contains(item) {
                existing.push(item.clone());
            }
        }
        Ok(())
    }

    fn remove_at_indexes(
        &self,
        target: &mut Value,
        path: &str,
        indexed: &BTreeMap<usize, Value>,
    ) -> DeltaResult<()> {
        let parsed = self.parse(path)?;
        let Some(Value::Seq(seq)) = resolve_mut(target, parsed.steps()) else {
            return self.missing(path);
        };
        for (&i, expected) in indexed.iter().rev() {
            if i >= seq.items.len() {
                self.missing(&format!("{path}[{i}]"))?;
                continue;
            }
            if self.verified(&format!("{path}[{i}]"), expected, &seq.items[i])? {
                seq.items.remove(i);
            }
        }
        Ok(())
    }

    fn add_at_indexes(
        &self,
        target: &mut Value,
        path: &str,
        indexed: &BTreeMap<usize, Value>,
    ) -> DeltaResult<()> {
        let parsed = self.parse(path)?;
        let Some(Value::Seq(seq)) = resolve_mut(target, parsed.steps()) else {
            return self.missing(path);
        };
        for (&i, value) in indexed {
            if i <= seq.items.len() {
                seq.items.insert(i, value.clone());
            } else {
                self.missing(&format!("{path}[{i}]"))?;
                seq.items.push(value.clone());
            }
        }
        Ok(())
    }

    /// Rebuild an ordered sequence from its opcode spans.
    fn replay_opcodes(
        &self,
        target: &mut Value,
        path: &str,
        ops: &[ddx_diff::Opcode],
    ) -> DeltaResult<()> {
        let parsed = self.parse(path)?;
        let Some(Value::Seq(seq)) = resolve_mut(target, parsed.steps()) else {
            return self.missing(path);
        };
        let items = &seq.items;
        let mut rebuilt: Vec<Value> = Vec::new();
        for op in ops {
            let (a, b) = op.old_range;
            if b > items.len() || a > b {
                return self.missing(&format!("{path}[{a}..{b}]"));
            }
            match op.tag {
                OpTag::Equal => rebuilt.extend_from_slice(&items[a..b]),
                OpTag::Delete | OpTag::Replace => {
                    if self.opts.verify_old_values && items[a..b] != op.old_values[..] {
                        self.mismatch(
                            &format!("{path}[{a}..{b}]"),
                            format!("<{} items>", op.old_values.len()),
                            format!("<{} items>", b - a),
                        )?;
                        rebuilt.extend_from_slice(&items[a..b]);
                        continue;
                    }
                    rebuilt.extend(op.new_values.iter().cloned());
                }
                OpTag::Insert => rebuilt.extend(op.new_values.iter().cloned()),
            }
        }
        seq.items = rebuilt;
        Ok(())
    }
}

/// Walk `steps` down the target, yielding the addressed slot.
fn resolve_mut<'a>(root: &'a mut Value, steps: &[PathStep]) -> Option<&'a mut Value> {
    let mut cur = root;
    for step in steps {
        let next = match cur {
            Value::Map(pairs) => match step {
                PathStep::Key(k) => pairs.iter_mut().find(|(kk, _)| kk == k).map(|(_, v)| v),
                PathStep::Attr(_) => None,
            },
            Value::Seq(seq) => match step {
                PathStep::Key(Value::Int(i)) if *i >= 0 => seq.items.get_mut(*i as usize),
                _ => None,
            },
            Value::Record(r) => match step {
                PathStep::Attr(name) => r
                    .fields
                    .iter_mut()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v),
                _ => None,
            },
            Value::Object(o) => match step {
                PathStep::Attr(name) => {
                    o.attrs.iter_mut().find(|(n, _)| n == name).map(|(_, v)| v)
                }
                _ => None,
            },
            Value::Enum(e) => match step {
                PathStep::Attr(name) if name == "value" => Some(e.value.as_mut()),
                _ => None,
            },
            _ => None,
        };
        cur = next?;
    }
    Some(cur)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ddx_diff::{DeepDiff, DiffOptions};

    fn round_trip(opts: DiffOptions, t1: &Value, t2: &Value) {
        let differ = DeepDiff::new(opts).unwrap();
        let report = differ.compare(t1, t2).unwrap();
        let delta = Delta::from_report(&report);
        let mut patched = t1.clone();
        delta
            .apply(
                &mut patched,
                &ApplyOptions {
                    verify_old_values: true,
                    raise_errors: true,
                },
            )
            .unwrap();
        let residual = differ.compare(&patched, t2).unwrap();
        assert!(
            residual.is_empty(),
            "patched value still differs: {:?}",
            residual.records()
        );
    }

    #[test]
    fn dict_changes_round_trip() {
        let t1 = Value::Map(vec![
            (Value::text("a"), Value::Int(1)),
            (Value::text("b"), Value::Int(2)),
            (Value::text("c"), Value::Int(3)),
        ]);
        let t2 = Value::Map(vec![
            (Value::text("a"), Value::Int(9)),
            (Value::text("b"), Value::Int(2)),
            (Value::text("d"), Value::Int(4)),
        ]);
        round_trip(DiffOptions::default(), &t1, &t2);
    }

    #[test]
    fn ignore_order_round_trip() {
        let t1 = Value::list(vec![
            Value::Int(1),
            Value::Int(2),
            Value::text("B"),
            Value::Int(3),
        ]);
        let t2 = Value::list(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
            Value::Int(5),
        ]);
        let opts = DiffOptions {
            ignore_order: true,
            report_repetition: true,
            ..DiffOptions::default()
        };
        round_trip(opts, &t1, &t2);
    }

    #[test]
    fn repetition_round_trip() {
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
        round_trip(opts, &t1, &t2);
    }

    #[test]
    fn ordered_alignment_round_trip() {
        let t1 = Value::list(vec![
            Value::Int(1),
            Value::Int(2),
            Value::Int(3),
            Value::Int(4),
        ]);
        let t2 = Value::list(vec![Value::Int(1), Value::Int(3), Value::Int(9)]);
        round_trip(DiffOptions::default(), &t1, &t2);
    }

    #[test]
    fn nested_structures_round_trip() {
        let t1 = Value::Map(vec![
            (
                Value::text("user"),
                Value::Map(vec![
                    (Value::text("name"), Value::text("ada")),
                    (Value::text("age"), Value::Int(36)),
                ]),
            ),
            (Value::text("tags"), Value::Set(vec![Value::text("x")])),
        ]);
        let t2 = Value::Map(vec![
            (
                Value::text("user"),
                Value::Map(vec![
                    (Value::text("name"), Value::text("ada")),
                    (Value::text("age"), Value::Int(37)),
                ]),
            ),
            (
                Value::text("tags"),
                Value::Set(vec![Value::text("x"), Value::text("y")]),
            ),
        ]);
        round_trip(DiffOptions::default(), &t1, &t2);
    }

    #[test]
    fn verify_mismatch_raises_when_asked() {
        let t1 = Value::Map(vec![(Value::text("a"), Value::Int(1))]);
        let t2 = Value::Map(vec![(Value::text("a"), Value::Int(2))]);
        let report = DeepDiff::new(DiffOptions::default())
            .unwrap()
            .compare(&t1, &t2)
            .unwrap();
        let delta = Delta::from_report(&report);

        let mut drifted = Value::Map(vec![(Value::text("a"), Value::Int(7))]);
        let err = delta
            .apply(
                &mut drifted,
                &ApplyOptions {
                    verify_old_values: true,
                    raise_errors: true,
                },
            )
            .unwrap_err();
        assert!(matches!(err, DeltaError::ApplyFailed { .. }));

        // Without raising, the mismatched update is skipped.
        let mut drifted = Value::Map(vec![(Value::text("a"), Value::Int(7))]);
        delta
            .apply(
                &mut drifted,
                &ApplyOptions {
                    verify_old_values: true,
                    raise_errors: false,
                },
            )
            .unwrap();
        assert_eq!(drifted.map_get(&Value::text("a")), Some(&Value::Int(7)));
    }

    #[test]
    fn dunder_paths_are_always_rejected() {
        let mut delta = Delta::default();
        delta.attribute_added.insert(
            "root.__class__".to_string(),
            Value::text("boom"),
        );
        let mut target = Value::Object(ddx_types::ObjectValue {
            type_tag: "T".to_string(),
            attrs: vec![("a".to_string(), Value::Int(1))],
        });
        let err = delta.apply(&mut target, &ApplyOptions::default()).unwrap_err();
        assert!(matches!(err, DeltaError::ForbiddenPath { .. }));
    }
}
