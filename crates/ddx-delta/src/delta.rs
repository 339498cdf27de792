//! The applyable change document.
//!
//! A [`Delta`] is a projection of a [`DiffReport`] into path-keyed
//! sections that can be replayed against `t1` to reconstruct `t2`. The
//! wire form is a one-line ASCII header naming the format version,
//! followed by a JSON payload of tagged atoms.

use std::collections::BTreeMap;

use ddx_diff::{ChangeKind, DiffReport, OpTag, Opcode};
use ddx_types::{path_is_within, Path, PathStep, Value};
use serde_json::{json, Map as JsonMap, Value as Json};
use tracing::warn;

use crate::atom::{decode_atom, encode_atom, AtomPolicy};
use crate::error::{DeltaError, DeltaResult};

/// Header line of the wire form.
pub const WIRE_HEADER: &str = "ddx-delta 1";

/// Old/new pair for a value replacement.
#[derive(Clone, Debug, PartialEq)]
pub struct ValueChange {
    pub old: Value,
    pub new: Value,
}

/// A replacement where the kind itself changed.
#[derive(Clone, Debug, PartialEq)]
pub struct TypeChange {
    pub old_type: String,
    pub new_type: String,
    pub old: Value,
    pub new: Value,
}

/// A multiplicity change of one repeated item, keyed by the item's path.
#[derive(Clone, Debug, PartialEq)]
pub struct RepetitionEntry {
    pub value: Value,
    pub old_indexes: Vec<usize>,
    pub new_indexes: Vec<usize>,
    pub old_repeat: usize,
    pub new_repeat: usize,
}

/// A directed change document. Section keys are rendered paths.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Delta {
    pub type_changes: BTreeMap<String, TypeChange>,
    pub values_changed: BTreeMap<String, ValueChange>,
    pub dictionary_item_added: BTreeMap<String, Value>,
    pub dictionary_item_removed: BTreeMap<String, Value>,
    pub attribute_added: BTreeMap<String, Value>,
    pub attribute_removed: BTreeMap<String, Value>,
    /// Parent path to `{final index → value}`.
    pub iterable_items_added_at_indexes: BTreeMap<String, BTreeMap<usize, Value>>,
    /// Parent path to `{original index → value}`.
    pub iterable_items_removed_at_indexes: BTreeMap<String, BTreeMap<usize, Value>>,
    /// Parent path to the items to add/remove by content.
    pub set_item_added: BTreeMap<String, Vec<Value>>,
    pub set_item_removed: BTreeMap<String, Vec<Value>>,
    pub repetition_change: BTreeMap<String, RepetitionEntry>,
    /// Opcode spans for ordered sequences; when present for a parent they
    /// replace its indexed operations.
    pub opcodes: BTreeMap<String, Vec<Opcode>>,
}

/// Split `root[...][i]` into the parent path and the trailing index.
pub(crate) fn parent_and_index(path: &Path) -> Option<(Path, usize)> {
    let steps = path.steps();
    let (last, front) = steps.split_last()?;
    let PathStep::Key(Value::Int(i)) = last else {
        return None;
    };
    if *i < 0 {
        return None;
    }
    let mut parent = Path::root();
    for step in front {
        parent.push(step.clone());
    }
    Some((parent, *i as usize))
}

pub(crate) fn strip_last(path: &Path) -> Path {
    let steps = path.steps();
    let mut parent = Path::root();
    if let Some((_, front)) = steps.split_last() {
        for step in front {
            parent.push(step.clone());
        }
    }
    parent
}

impl Delta {
    /// Project a report into an applyable document.
    ///
    /// Records missing the value they need (which only happens when a
    /// caller assembled them by hand) are skipped with a warning.
    pub fn from_report(report: &DiffReport) -> Self {
        // An opcode parent's spans carry the full new subtrees, so records
        // and opcode entries strictly below it would double-apply.
        let replayed = |rendered: &str| {
            report
                .opcodes
                .keys()
                .any(|p| rendered.len() > p.len() && path_is_within(rendered, p))
        };
        let mut delta = Delta {
            opcodes: report
                .opcodes
                .iter()
                .filter(|(p, _)| !replayed(p))
                .map(|(p, ops)| (p.clone(), ops.clone()))
                .collect(),
            ..Delta::default()
        };
        for record in report.records() {
            let rendered = record.path.to_string();
            if replayed(&rendered) {
                continue;
            }
            match record.kind {
                ChangeKind::TypeChanges => {
                    let (Some(old), Some(new)) = (&record.old, &record.new) else {
                        warn!(path = %rendered, "type change without both values, skipped");
                        continue;
                    };
                    delta.type_changes.insert(
                        rendered,
                        TypeChange {
                            old_type: old.type_tag().to_string(),
                            new_type: new.type_tag().to_string(),
                            old: old.clone(),
                            new: new.clone(),
                        },
                    );
                }
                ChangeKind::ValuesChanged => {
                    let (Some(old), Some(new)) = (&record.old, &record.new) else {
                        warn!(path = %rendered, "value change without both values, skipped");
                        continue;
                    };
                    delta.values_changed.insert(
                        rendered,
                        ValueChange {
                            old: old.clone(),
                            new: new.clone(),
                        },
                    );
                }
                ChangeKind::DictionaryItemAdded | ChangeKind::AttributeAdded => {
                    let Some(new) = &record.new else {
                        warn!(path = %rendered, "addition without a value, skipped");
                        continue;
                    };
                    let section = if record.kind == ChangeKind::DictionaryItemAdded {
                        &mut delta.dictionary_item_added
                    } else {
                        &mut delta.attribute_added
                    };
                    section.insert(rendered, new.clone());
                }
                ChangeKind::DictionaryItemRemoved | ChangeKind::AttributeRemoved => {
                    let Some(old) = &record.old else {
                        warn!(path = %rendered, "removal without a value, skipped");
                        continue;
                    };
                    let section = if record.kind == ChangeKind::DictionaryItemRemoved {
                        &mut delta.dictionary_item_removed
                    } else {
                        &mut delta.attribute_removed
                    };
                    section.insert(rendered, old.clone());
                }
                ChangeKind::IterableItemAdded | ChangeKind::IterableItemRemoved => {
                    let Some((parent, index)) = parent_and_index(&record.path) else {
                        warn!(path = %rendered, "iterable record without an index, skipped");
                        continue;
                    };
                    let parent_rendered = parent.to_string();
                    if record.kind == ChangeKind::IterableItemAdded {
                        let Some(new) = &record.new else {
                            continue;
                        };
                        delta
                            .iterable_items_added_at_indexes
                            .entry(parent_rendered)
                            .or_default()
                            .insert(index, new.clone());
                    } else {
                        let Some(old) = &record.old else {
                            continue;
                        };
                        delta
                            .iterable_items_removed_at_indexes
                            .entry(parent_rendered)
                            .or_default()
                            .insert(index, old.clone());
                    }
                }
                ChangeKind::SetItemAdded | ChangeKind::SetItemRemoved => {
                    let parent = strip_last(&record.path).to_string();
                    if record.kind == ChangeKind::SetItemAdded {
                        if let Some(new) = &record.new {
                            delta.set_item_added.entry(parent).or_default().push(new.clone());
                        }
                    } else if let Some(old) = &record.old {
                        delta
                            .set_item_removed
                            .entry(parent)
                            .or_default()
                            .push(old.clone());
                    }
                }
                ChangeKind::RepetitionChange => {
                    let (Some(rep), Some(value)) = (&record.repetition, &record.old) else {
                        warn!(path = %rendered, "repetition record without detail, skipped");
                        continue;
                    };
                    delta.repetition_change.insert(
                        rendered,
                        RepetitionEntry {
                            value: value.clone(),
                            old_indexes: rep.old_indexes.clone(),
                            new_indexes: rep.new_indexes.clone(),
                            old_repeat: rep.old_repeat,
                            new_repeat: rep.new_repeat,
                        },
                    );
                }
            }
        }
        delta
    }

    /// True when applying this delta would change nothing.
    pub fn is_empty(&self) -> bool {
        self.type_changes.is_empty()
            && self.values_changed.is_empty()
            && self.dictionary_item_added.is_empty()
            && self.dictionary_item_removed.is_empty()
            && self.attribute_added.is_empty()
            && self.attribute_removed.is_empty()
            && self.iterable_items_added_at_indexes.is_empty()
            && self.iterable_items_removed_at_indexes.is_empty()
            && self.set_item_added.is_empty()
            && self.set_item_removed.is_empty()
            && self.repetition_change.is_empty()
            && self.opcodes.values().flatten().all(|op| op.tag == OpTag::Equal)
    }

    // --- wire form ---

    /// Serialize as header + JSON payload.
    pub fn to_wire(&self) -> DeltaResult<String> {
        let mut doc = JsonMap::new();
        if !self.type_changes.is_empty() {
            let section: JsonMap<String, Json> = self
                .type_changes
                .iter()
                .map(|(p, c)| {
                    (
                        p.clone(),
                        json!({
                            "old_type": c.old_type,
                            "new_type": c.new_type,
                            "old": encode_atom(&c.old),
                            "new": encode_atom(&c.new),
                        }),
                    )
                })
                .collect();
            doc.insert("type_changes".to_string(), Json::Object(section));
        }
        if !self.values_changed.is_empty() {
            let section: JsonMap<String, Json> = self
                .values_changed
                .iter()
                .map(|(p, c)| {
                    (
                        p.clone(),
                        json!({"old": encode_atom(&c.old), "new": encode_atom(&c.new)}),
                    )
                })
                .collect();
            doc.insert("values_changed".to_string(), Json::Object(section));
        }
        for (name, section) in [
            ("dictionary_item_added", &self.dictionary_item_added),
            ("dictionary_item_removed", &self.dictionary_item_removed),
            ("attribute_added", &self.attribute_added),
            ("attribute_removed", &self.attribute_removed),
        ] {
            if !section.is_empty() {
                let rendered: JsonMap<String, Json> = section
                    .iter()
                    .map(|(p, v)| (p.clone(), encode_atom(v)))
                    .collect();
                doc.insert(name.to_string(), Json::Object(rendered));
            }
        }
        for (name, section) in [
            (
                "iterable_items_added_at_indexes",
                &self.iterable_items_added_at_indexes,
            ),
            (
                "iterable_items_removed_at_indexes",
                &self.iterable_items_removed_at_indexes,
            ),
        ] {
            if !section.is_empty() {
                let rendered: JsonMap<String, Json> = section
                    .iter()
                    .map(|(p, indexed)| {
                        let entries: JsonMap<String, Json> = indexed
                            .iter()
                            .map(|(i, v)| (i.to_string(), encode_atom(v)))
                            .collect();
                        (p.clone(), Json::Object(entries))
                    })
                    .collect();
                doc.insert(name.to_string(), Json::Object(rendered));
            }
        }
        for (name, section) in [
            ("set_item_added", &self.set_item_added),
            ("set_item_removed", &self.set_item_removed),
        ] {
            if !section.is_empty() {
                let rendered: JsonMap<String, Json> = section
                    .iter()
                    .map(|(p, items)| {
                        (
                            p.clone(),
                            Json::Array(items.iter().map(encode_atom).collect()),
                        )
                    })
                    .collect();
                doc.insert(name.to_string(), Json::Object(rendered));
            }
        }
        if !self.repetition_change.is_empty() {
            let section: JsonMap<String, Json> = self
                .repetition_change
                .iter()
                .map(|(p, r)| {
                    (
                        p.clone(),
                        json!({
                            "value": encode_atom(&r.value),
                            "old_indexes": r.old_indexes,
                            "new_indexes": r.new_indexes,
                            "old_repeat": r.old_repeat,
                            "new_repeat": r.new_repeat,
                        }),
                    )
                })
                .collect();
            doc.insert("repetition_change".to_string(), Json::Object(section));
        }
        if !self.opcodes.is_empty() {
            let section: JsonMap<String, Json> = self
                .opcodes
                .iter()
                .map(|(p, ops)| {
                    let rendered: Vec<Json> = ops
                        .iter()
                        .map(|op| {
                            json!({
                                "tag": op_tag_str(op.tag),
                                "old": [op.old_range.0, op.old_range.1],
                                "new": [op.new_range.0, op.new_range.1],
                                "old_values": op.old_values.iter().map(encode_atom).collect::<Vec<_>>(),
                                "new_values": op.new_values.iter().map(encode_atom).collect::<Vec<_>>(),
                            })
                        })
                        .collect();
                    (p.clone(), Json::Array(rendered))
                })
                .collect();
            doc.insert("opcodes".to_string(), Json::Object(section));
        }
        Ok(format!(
            "{WIRE_HEADER}\n{}",
            serde_json::to_string(&Json::Object(doc))?
        ))
    }

    /// Parse the wire form under the given atom policy.
    pub fn from_wire(text: &str, policy: &AtomPolicy) -> DeltaResult<Self> {
        let (header, payload) = text
            .split_once('\n')
            .ok_or_else(|| DeltaError::malformed("missing header line"))?;
        if header.trim_end() != WIRE_HEADER {
            return Err(DeltaError::malformed(format!(
                "unsupported header {header:?}"
            )));
        }
        let doc: Json = serde_json::from_str(payload)?;
        let doc = doc
            .as_object()
            .ok_or_else(|| DeltaError::malformed("payload is not an object"))?;
        let mut delta = Delta::default();

        if let Some(section) = section_obj(doc, "type_changes")? {
            for (path, entry) in section {
                let m = entry
                    .as_object()
                    .ok_or_else(|| DeltaError::malformed("type_changes entry"))?;
                delta.type_changes.insert(
                    path.clone(),
                    TypeChange {
                        old_type: req_str(m, "old_type")?,
                        new_type: req_str(m, "new_type")?,
                        old: decode_atom(req(m, "old")?, policy)?,
                        new: decode_atom(req(m, "new")?, policy)?,
                    },
                );
            }
        }
        if let Some(section) = section_obj(doc, "values_changed")? {
            for (path, entry) in section {
                let m = entry
                    .as_object()
                    .ok_or_else(|| DeltaError::malformed("values_changed entry"))?;
                delta.values_changed.insert(
                    path.clone(),
                    ValueChange {
                        old: decode_atom(req(m, "old")?, policy)?,
                        new: decode_atom(req(m, "new")?, policy)?,
                    },
                );
            }
        }
        for (name, target) in [
            ("dictionary_item_added", &mut delta.dictionary_item_added),
            ("dictionary_item_removed", &mut delta.dictionary_item_removed),
            ("attribute_added", &mut delta.attribute_added),
            ("attribute_removed", &mut delta.attribute_removed),
        ] {
            if let Some(section) = section_obj(doc, name)? {
                for (path, entry) in section {
                    target.insert(path.clone(), decode_atom(entry, policy)?);
                }
            }
        }
        for (name, target) in [
            (
                "iterable_items_added_at_indexes",
                &mut delta.iterable_items_added_at_indexes,
            ),
            (
                "iterable_items_removed_at_indexes",
                &mut delta.iterable_items_removed_at_indexes,
            ),
        ] {
            if let Some(section) = section_obj(doc, name)? {
                for (path, entry) in section {
                    let m = entry
                        .as_object()
                        .ok_or_else(|| DeltaError::malformed("indexed section entry"))?;
                    let mut indexed = BTreeMap::new();
                    for (raw_index, atom) in m {
                        let index: usize = raw_index
                            .parse()
                            .map_err(|_| DeltaError::malformed("bad index key"))?;
                        indexed.insert(index, decode_atom(atom, policy)?);
                    }
                    target.insert(path.clone(), indexed);
                }
            }
        }
        for (name, target) in [
            ("set_item_added", &mut delta.set_item_added),
            ("set_item_removed", &mut delta.set_item_removed),
        ] {
            if let Some(section) = section_obj(doc, name)? {
                for (path, entry) in section {
                    let arr = entry
                        .as_array()
                        .ok_or_else(|| DeltaError::malformed("set section entry"))?;
                    let mut items = Vec::with_capacity(arr.len());
                    for atom in arr {
                        items.push(decode_atom(atom, policy)?);
                    }
                    target.insert(path.clone(), items);
                }
            }
        }
        if let Some(section) = section_obj(doc, "repetition_change")? {
            for (path, entry) in section {
                let m = entry
                    .as_object()
                    .ok_or_else(|| DeltaError::malformed("repetition entry"))?;
                delta.repetition_change.insert(
                    path.clone(),
                    RepetitionEntry {
                        value: decode_atom(req(m, "value")?, policy)?,
                        old_indexes: req_indexes(m, "old_indexes")?,
                        new_indexes: req_indexes(m, "new_indexes")?,
                        old_repeat: req_usize(m, "old_repeat")?,
                        new_repeat: req_usize(m, "new_repeat")?,
                    },
                );
            }
        }
        if let Some(section) = section_obj(doc, "opcodes")? {
            for (path, entry) in section {
                let arr = entry
                    .as_array()
                    .ok_or_else(|| DeltaError::malformed("opcodes entry"))?;
                let mut ops = Vec::with_capacity(arr.len());
                for raw in arr {
                    let m = raw
                        .as_object()
                        .ok_or_else(|| DeltaError::malformed("opcode"))?;
                    let old = req_indexes(m, "old")?;
                    let new = req_indexes(m, "new")?;
                    if old.len() != 2 || new.len() != 2 {
                        return Err(DeltaError::malformed("opcode range"));
                    }
                    let mut old_values = Vec::new();
                    for atom in req(m, "old_values")?
                        .as_array()
                        .ok_or_else(|| DeltaError::malformed("opcode old_values"))?
                    {
                        old_values.push(decode_atom(atom, policy)?);
                    }
                    let mut new_values = Vec::new();
                    for atom in req(m, "new_values")?
                        .as_array()
                        .ok_or_else(|| DeltaError::malformed("opcode new_values"))?
                    {
                        new_values.push(decode_atom(atom, policy)?);
                    }
                    ops.push(Opcode {
                        tag: op_tag_parse(req_str(m, "tag")?.as_str())?,
                        old_range: (old[0], old[1]),
                        new_range: (new[0], new[1]),
                        old_values,
                        new_values,
                    });
                }
                delta.opcodes.insert(path.clone(), ops);
            }
        }
        Ok(delta)
    }
}

fn op_tag_str(tag: OpTag) -> &'static str {
    match tag {
        OpTag::Equal => "equal",
        OpTag::Replace => "replace",
        OpTag::Delete => "delete",
        OpTag::Insert => "insert",
    }
}

fn op_tag_parse(s: &str) -> DeltaResult<OpTag> {
    Ok(match s {
        "equal" => OpTag::Equal,
        "replace" => OpTag::Replace,
        "delete" => OpTag::Delete,
        "insert" => OpTag::Insert,
        other => return Err(DeltaError::malformed(format!("unknown opcode tag {other:?}"))),
    })
}

fn section_obj<'a>(
    doc: &'a JsonMap<String, Json>,
    name: &str,
) -> DeltaResult<Option<&'a JsonMap<String, Json>>> {
    match doc.get(name) {
        None => Ok(None),
        Some(raw) => raw
            .as_object()
            .map(Some)
            .ok_or_else(|| DeltaError::malformed(format!("section {name:?} is not an object"))),
    }
}

fn req<'a>(m: &'a JsonMap<String, Json>, name: &str) -> DeltaResult<&'a Json> {
    m.get(name)
        .ok_or_else(|| DeltaError::malformed(format!("missing field {name:?}")))
}

fn req_str(m: &JsonMap<String, Json>, name: &str) -> DeltaResult<String> {
    Ok(req(m, name)?
        .as_str()
        .ok_or_else(|| DeltaError::malformed(format!("field {name:?} is not a string")))?
        .to_string())
}

fn req_usize(m: &JsonMap<String, Json>, name: &str) -> DeltaResult<usize> {
    Ok(req(m, name)?
        .as_u64()
        .ok_or_else(|| DeltaError::malformed(format!("field {name:?} is not an integer")))?
        as usize)
}

fn req_indexes(m: &JsonMap<String, Json>, name: &str) -> DeltaResult<Vec<usize>> {
    let arr = req(m, name)?
        .as_array()
        .ok_or_else(|| DeltaError::malformed(format!("field {name:?} is not an array")))?;
    arr.iter()
        .map(|j| {
            j.as_u64()
                .map(|i| i as usize)
                .ok_or_else(|| DeltaError::malformed(format!("field {name:?} holds a non-index")))
        })
        .collect()
}
