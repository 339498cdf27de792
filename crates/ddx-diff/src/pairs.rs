//! Order-insensitive sequence pairing.
//!
//! Elements are grouped by fingerprint; groups present on only one side
//! are paired by a rough distance measure and the surviving pairs are
//! recursed into as fresh passes. Multiplicity changes between common
//! groups surface as repetition records when requested.

use std::collections::HashMap;

use ddx_types::{Path, PathStep, Value};

use crate::distance::{container_distance, intersection_fraction, scalar_distance};
use crate::differ::Walker;
use crate::error::DiffResult;
use crate::operators::Level;
use crate::options::CannotCompare;
use crate::report::{ChangeKind, ChangeRecord, Repetition};

/// One fingerprint group: every index on one side holding equal content.
struct Group {
    fp: String,
    count: usize,
    indexes: Vec<usize>,
}

fn group_by_fp(hashes: &[Option<(String, usize)>]) -> Vec<Group> {
    let mut order: Vec<Group> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();
    for (i, entry) in hashes.iter().enumerate() {
        let Some((fp, count)) = entry else { continue };
        match seen.get(fp.as_str()) {
            Some(&pos) => order[pos].indexes.push(i),
            None => {
                seen.insert(fp.clone(), order.len());
                order.push(Group {
                    fp: fp.clone(),
                    count: *count,
                    indexes: vec![i],
                });
            }
        }
    }
    order
}

impl Walker<'_> {
    pub(crate) fn diff_unordered(
        &mut self,
        s1: &[Value],
        s2: &[Value],
        path: &Path,
    ) -> DiffResult<()> {
        let hashes1 = self.element_hashes(s1, path)?;
        let hashes2 = self.element_hashes(s2, path)?;
        let groups1 = group_by_fp(&hashes1);
        let groups2 = group_by_fp(&hashes2);
        let pos2: HashMap<&str, usize> = groups2
            .iter()
            .enumerate()
            .map(|(i, g)| (g.fp.as_str(), i))
            .collect();
        let pos1: HashMap<&str, usize> = groups1
            .iter()
            .enumerate()
            .map(|(i, g)| (g.fp.as_str(), i))
            .collect();

        if self.opts.report_repetition {
            for g in &groups1 {
                let Some(&j) = pos2.get(g.fp.as_str()) else {
                    continue;
                };
                let h = &groups2[j];
                if g.indexes.len() != h.indexes.len() {
                    let rep = s1[g.indexes[0]].clone();
                    let mut record = ChangeRecord::new(
                        ChangeKind::RepetitionChange,
                        path.child(PathStep::index(g.indexes[0])),
                    )
                    .with_old(rep);
                    record.repetition = Some(Repetition {
                        old_repeat: g.indexes.len(),
                        new_repeat: h.indexes.len(),
                        old_indexes: g.indexes.clone(),
                        new_indexes: h.indexes.clone(),
                    });
                    self.emit(record);
                }
            }
        }

        let removed: Vec<&Group> = groups1
            .iter()
            .filter(|g| !pos2.contains_key(g.fp.as_str()))
            .collect();
        let added: Vec<&Group> = groups2
            .iter()
            .filter(|g| !pos1.contains_key(g.fp.as_str()))
            .collect();

        // removed-group index -> added-group index
        let mut matched_r: Vec<Option<usize>> = vec![None; removed.len()];
        let mut matched_a: Vec<bool> = vec![false; added.len()];

        if let Some(func) = self.opts.iterable_compare_func.clone() {
            for (ri, rg) in removed.iter().enumerate() {
                let r = &s1[rg.indexes[0]];
                for (ai, ag) in added.iter().enumerate() {
                    if matched_a[ai] {
                        continue;
                    }
                    let a = &s2[ag.indexes[0]];
                    let level = Level { path, t1: r, t2: a };
                    match func(r, a, &level) {
                        Ok(true) => {
                            matched_r[ri] = Some(ai);
                            matched_a[ai] = true;
                            break;
                        }
                        Ok(false) => continue,
                        // Fall back to distance-based pairing for this item.
                        Err(CannotCompare) => break,
                    }
                }
            }
        }

        // Rough-distance pairing for whatever the compare function left.
        let mut edges: Vec<(f64, usize, usize, usize)> = Vec::new();
        let mut order = 0usize;
        for (ri, rg) in removed.iter().enumerate() {
            if matched_r[ri].is_some() {
                continue;
            }
            let r = &s1[rg.indexes[0]];
            for (ai, ag) in added.iter().enumerate() {
                if matched_a[ai] {
                    continue;
                }
                let a = &s2[ag.indexes[0]];
                let d = self.pair_distance(r, &rg.fp, rg.count, a, &ag.fp, ag.count)?;
                if d <= self.opts.cutoff_distance_for_pairs {
                    edges.push((d, order, ri, ai));
                    order += 1;
                }
            }
        }
        edges.sort_by(|x, y| {
            x.0.partial_cmp(&y.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(x.1.cmp(&y.1))
        });
        for (_, _, ri, ai) in edges {
            if matched_r[ri].is_some() || matched_a[ai] {
                continue;
            }
            matched_r[ri] = Some(ai);
            matched_a[ai] = true;
        }

        for (ri, rg) in removed.iter().enumerate() {
            match matched_r[ri] {
                Some(ai) => {
                    let ag = added[ai];
                    let shared = rg.indexes.len().min(ag.indexes.len());
                    for k in 0..shared {
                        let (oi, ni) = (rg.indexes[k], ag.indexes[k]);
                        if !self.begin_pass() {
                            return Ok(());
                        }
                        let moved = if oi != ni {
                            Some(path.child(PathStep::index(ni)))
                        } else {
                            None
                        };
                        self.diff_level(
                            &s1[oi],
                            &s2[ni],
                            path.child(PathStep::index(oi)),
                            moved,
                        )?;
                    }
                    for &oi in &rg.indexes[shared..] {
                        self.emit_unordered_removed(s1, oi, path);
                    }
                    for &ni in &ag.indexes[shared..] {
                        self.emit_unordered_added(s2, ni, path);
                    }
                }
                None => {
                    for &oi in &rg.indexes {
                        self.emit_unordered_removed(s1, oi, path);
                    }
                }
            }
        }
        for (ai, ag) in added.iter().enumerate() {
            if !matched_a[ai] {
                for &ni in &ag.indexes {
                    self.emit_unordered_added(s2, ni, path);
                }
            }
        }

        if self.opts.cache_purge_level >= 1 {
            self.distance_cache.clear();
        }
        if self.opts.cache_purge_level >= 2 {
            self.fingerprint_cache.clear();
            self.parts_cache.clear();
        }
        Ok(())
    }

    fn emit_unordered_removed(&mut self, s1: &[Value], i: usize, path: &Path) {
        self.emit(
            ChangeRecord::new(ChangeKind::IterableItemRemoved, path.child(PathStep::index(i)))
                .with_old(s1[i].clone()),
        );
    }

    fn emit_unordered_added(&mut self, s2: &[Value], i: usize, path: &Path) {
        self.emit(
            ChangeRecord::new(ChangeKind::IterableItemAdded, path.child(PathStep::index(i)))
                .with_new(s2[i].clone()),
        );
    }

    /// Per-element fingerprints with subtree counts. `None` marks elements
    /// skipped by exclusion rules; they take no part in pairing.
    fn element_hashes(
        &mut self,
        items: &[Value],
        path: &Path,
    ) -> DiffResult<Vec<Option<(String, usize)>>> {
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
            out.push(match &normalized {
                Some(target) => self.hasher.fingerprint_at(target, &child)?,
                None => self.cached_fingerprint(item, &child)?,
            });
        }
        Ok(out)
    }

    /// Rough distance between two unmatched elements, cached by fingerprint
    /// pair. Containers with too small a subtree overlap are forced apart.
    fn pair_distance(
        &mut self,
        r: &Value,
        rfp: &str,
        rcount: usize,
        a: &Value,
        afp: &str,
        acount: usize,
    ) -> DiffResult<f64> {
        let key = (rfp.to_string(), afp.to_string());
        if let Some(d) = self.distance_cache.get(&key) {
            return Ok(d);
        }
        let d = if r.kind().is_container() || a.kind().is_container() {
            let parts_r = self.subtree_parts(r, rfp)?;
            let parts_a = self.subtree_parts(a, afp)?;
            if intersection_fraction(&parts_r, &parts_a)
                < self.opts.cutoff_intersection_for_pairs
            {
                1.0
            } else {
                container_distance(rcount, acount, self.opts.kinds_grouped(r.kind(), a.kind()))
            }
        } else {
            scalar_distance(r, a)
        };
        self.distance_cache.insert(key, d);
        Ok(d)
    }

    fn subtree_parts(&mut self, v: &Value, fp: &str) -> DiffResult<Vec<String>> {
        if let Some(parts) = self.parts_cache.get(fp) {
            return Ok(parts.clone());
        }
        let (_, _, parts) = self.hasher.hash_with_parts(v)?;
        self.parts_cache.insert(fp.to_string(), parts.clone());
        Ok(parts)
    }
}
