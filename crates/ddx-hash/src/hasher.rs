//! The recursive content hasher.
//!
//! Walks a [`Value`] and produces a `(fingerprint, subtree_count)` pair per
//! node. Values that compare equal under the configured normalizations
//! produce equal fingerprints; key order never affects a mapping's
//! fingerprint. Composition works on canonical strings: a scalar hashes
//! `tag:canonical-form`, a container hashes a wrap of its children's
//! fingerprints, and the fingerprint is the digest of that string.

use std::collections::{BTreeMap, HashMap};

use ddx_types::{
    duration_total_seconds, normalize_datetime, number_to_string, Path, PathStep, Value, ValueKind,
};
use tracing::warn;

use crate::error::HashResult;
use crate::options::HashOptions;

/// The result of hashing one root value.
#[derive(Clone, Debug)]
pub struct HashOutcome {
    /// Hex fingerprint of the root.
    pub fingerprint: String,
    /// Number of nodes in the subtree, the root included.
    pub count: usize,
    /// Paths of subvalues that could not be hashed and were replaced by a
    /// sentinel.
    pub unprocessed: Vec<String>,
}

/// Deterministic content hasher over the value model.
#[derive(Clone, Debug, Default)]
pub struct DeepHasher {
    opts: HashOptions,
}

/// Sentinel fingerprint for subvalues that could not be processed.
const UNPROCESSED_SENTINEL: &str = "unprocessed";

impl DeepHasher {
    /// Create a hasher with the given options.
    pub fn new(opts: HashOptions) -> Self {
        Self { opts }
    }

    /// The active options.
    pub fn options(&self) -> &HashOptions {
        &self.opts
    }

    /// Hash a value, returning the full outcome.
    pub fn hash(&self, v: &Value) -> HashResult<HashOutcome> {
        let mut walk = Walk::new(&self.opts, false);
        let (fingerprint, count) = walk
            .node(v, &Path::root())?
            .unwrap_or_else(|| (UNPROCESSED_SENTINEL.to_string(), 0));
        Ok(HashOutcome {
            fingerprint,
            count,
            unprocessed: walk.unprocessed,
        })
    }

    /// Hash a value rooted at `path`, for exclusion-aware child hashing.
    ///
    /// Returns `None` when the value itself is excluded.
    pub fn fingerprint_at(&self, v: &Value, path: &Path) -> HashResult<Option<(String, usize)>> {
        let mut walk = Walk::new(&self.opts, false);
        walk.node(v, path)
    }

    /// Like `fingerprint_at`, but also hands back the per-node identity
    /// memo accumulated during the walk, so a caller can keep every
    /// subtree fingerprint in a cross-walk cache. The memo is empty when
    /// exclusion rules make identity memoization unsound.
    pub fn fingerprint_with_memo(
        &self,
        v: &Value,
        path: &Path,
    ) -> HashResult<(Option<(String, usize)>, HashMap<usize, (String, usize)>)> {
        let mut walk = Walk::new(&self.opts, false);
        let root = walk.node(v, path)?;
        Ok((root, walk.memo))
    }

    /// Hash a value and also collect the fingerprints of every node in its
    /// subtree, for intersection-based pairing cutoffs.
    pub fn hash_with_parts(&self, v: &Value) -> HashResult<(String, usize, Vec<String>)> {
        let mut walk = Walk::new(&self.opts, true);
        let (fingerprint, count) = walk
            .node(v, &Path::root())?
            .unwrap_or_else(|| (UNPROCESSED_SENTINEL.to_string(), 0));
        Ok((fingerprint, count, walk.parts))
    }
}

struct Walk<'o> {
    opts: &'o HashOptions,
    memoizable: bool,
    memo: HashMap<usize, (String, usize)>,
    ancestors: Vec<usize>,
    unprocessed: Vec<String>,
    collect_parts: bool,
    parts: Vec<String>,
}

impl<'o> Walk<'o> {
    fn new(opts: &'o HashOptions, collect_parts: bool) -> Self {
        Self {
            opts,
            // Exclusion rules are path-dependent, so identity memoization
            // would conflate a node reachable from two paths.
            memoizable: !opts.has_exclusions(),
            memo: HashMap::new(),
            ancestors: Vec::new(),
            unprocessed: Vec::new(),
            collect_parts,
            parts: Vec::new(),
        }
    }

    fn excluded(&self, kind: ValueKind, path: &str) -> bool {
        if self.opts.exclude_types.contains(&kind) {
            return true;
        }
        if self
            .opts
            .exclude_paths
            .iter()
            .any(|ex| ddx_types::path_is_within(path, ex))
        {
            return true;
        }
        self.opts.exclude_regex_paths.iter().any(|re| re.is_match(path))
    }

    /// Hash one node. `None` means the node was excluded or is an ancestor
    /// of itself (cycle guard) and contributes nothing to its parent.
    fn node(&mut self, v: &Value, path: &Path) -> HashResult<Option<(String, usize)>> {
        let kind = v.kind();
        if self.opts.has_exclusions() && self.excluded(kind, &path.to_string()) {
            return Ok(None);
        }
        let ptr = v as *const Value as usize;
        if self.memoizable {
            if let Some(hit) = self.memo.get(&ptr) {
                return Ok(Some(hit.clone()));
            }
        }
        if self.ancestors.contains(&ptr) {
            return Ok(None);
        }

        let composed = if kind.is_container() {
            self.ancestors.push(ptr);
            let out = self.compose_container(v, path);
            self.ancestors.pop();
            out?
        } else {
            self.compose_scalar(v, path)?
        };

        let result = match composed {
            Some((canonical, count)) => {
                let fp = self.opts.backend.digest(canonical.as_bytes());
                (fp, count)
            }
            None => return Ok(None),
        };
        if self.collect_parts {
            self.parts.push(result.0.clone());
        }
        if self.memoizable {
            self.memo.insert(ptr, result.clone());
        }
        Ok(Some(result))
    }

    fn compose_scalar(&mut self, v: &Value, path: &Path) -> HashResult<Option<(String, usize)>> {
        let kind = v.kind();
        let tag = self.opts.collapsed_tag(kind);
        let canon = match v {
            Value::Null => "none".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(_) | Value::Float(_) | Value::Decimal(_) | Value::Complex { .. } => {
                number_to_string(
                    v,
                    self.opts.significant_digits,
                    self.opts.number_format_notation,
                )
                .unwrap_or_default()
            }
            Value::Text(s) => self.canonical_text(s),
            Value::Bytes(b) => {
                if self.opts.bytes_as_text() {
                    let decoded = self.opts.decode_bytes(b, &path.to_string())?;
                    self.fold(&decoded)
                } else {
                    hex::encode(b)
                }
            }
            Value::DateTime(dt) => {
                normalize_datetime(dt, self.opts.truncate_datetime).to_rfc3339()
            }
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            Value::Time(t) => t.format("%H:%M:%S%.f").to_string(),
            Value::Duration(d) => duration_total_seconds(d).to_string(),
            Value::Uuid(u) => u.to_string(),
            Value::IpRange(ip) => ip.to_string(),
            Value::Regex(r) => format!("{}/{}/{}", r.pattern, r.flags, r.groups),
            Value::Enum(e) => {
                let child = self.node(&e.value, &path.child(PathStep::attr("value")))?;
                match child {
                    Some((fp, _)) => format!("{}:{}", e.name, fp),
                    None => {
                        warn!(path = %path, "enum value could not be hashed");
                        self.unprocessed.push(path.to_string());
                        format!("{}:{}", e.name, UNPROCESSED_SENTINEL)
                    }
                }
            }
            // Containers are handled by compose_container.
            _ => unreachable!("scalar composition on container"),
        };
        let tag = self.scalar_tag(v, tag);
        Ok(Some((format!("{tag}:{canon}"), 1)))
    }

    fn scalar_tag(&self, v: &Value, default: String) -> String {
        // A UUID hashes under the string tag when uuid/string equivalence
        // is on, so it can pair with its textual form.
        if self.opts.ignore_uuid_types && matches!(v, Value::Uuid(_)) {
            return "str".to_string();
        }
        default
    }

    fn canonical_text(&self, s: &str) -> String {
        if self.opts.ignore_uuid_types {
            if let Ok(u) = s.parse::<uuid::Uuid>() {
                return u.to_string();
            }
        }
        self.fold(s)
    }

    fn fold(&self, s: &str) -> String {
        if self.opts.ignore_string_case {
            s.to_lowercase()
        } else {
            s.to_string()
        }
    }

    fn compose_container(&mut self, v: &Value, path: &Path) -> HashResult<Option<(String, usize)>> {
        match v {
            Value::Map(pairs) => {
                let entries = self.mapping_entries(
                    pairs.iter().map(|(k, val)| (k.clone(), k, val)),
                    path,
                )?;
                let tag = self.opts.collapsed_tag(ValueKind::Map);
                Ok(Some(wrap(&tag, "{", "}", entries)))
            }
            Value::Record(r) => {
                let entries = self.named_entries(r.fields.iter(), path)?;
                Ok(Some(wrap("nt", "{", "}", entries)))
            }
            Value::Object(o) => {
                let entries =
                    self.named_entries(o.attrs_filtered(self.opts.ignore_private_variables), path)?;
                Ok(Some(wrap("obj", "{", "}", entries)))
            }
            Value::Seq(s) => {
                let mut hashes = Vec::new();
                let mut count = 1usize;
                for (i, item) in s.items.iter().enumerate() {
                    if let Some((fp, c)) = self.node(item, &path.child(PathStep::index(i)))? {
                        hashes.push(fp);
                        count += c;
                    }
                }
                if self.opts.ignore_iterable_order {
                    hashes = combine_unordered(hashes, !self.opts.ignore_repetition);
                }
                let tag = self.opts.collapsed_tag(v.kind());
                Ok(Some((format!("{}:[{}]", tag, hashes.join(";")), count)))
            }
            Value::Set(items) => {
                let mut hashes = Vec::new();
                let mut count = 1usize;
                for item in items {
                    let elem_path = path.child(PathStep::key(item.clone()));
                    if let Some((fp, c)) = self.node(item, &elem_path)? {
                        hashes.push(fp);
                        count += c;
                    }
                }
                hashes.sort_unstable();
                hashes.dedup();
                let tag = self.opts.collapsed_tag(ValueKind::Set);
                Ok(Some((format!("{}:{{{}}}", tag, hashes.join(";")), count)))
            }
            _ => unreachable!("container composition on scalar"),
        }
    }

    /// Hash mapping-shaped children into sorted `keyhash:valuehash` entries.
    fn mapping_entries<'v>(
        &mut self,
        pairs: impl Iterator<Item = (Value, &'v Value, &'v Value)>,
        path: &Path,
    ) -> HashResult<(Vec<String>, usize)> {
        let mut entries = Vec::new();
        let mut count = 1usize;
        for (key_for_path, key, val) in pairs {
            let pair_path = path.child(PathStep::key(key_for_path));
            let key_fp = match self.node(key, &pair_path)? {
                Some((fp, _)) => fp,
                None => continue,
            };
            let val_fp = match self.node(val, &pair_path)? {
                Some((fp, c)) => {
                    count += c;
                    fp
                }
                None => continue,
            };
            entries.push(format!("{key_fp}:{val_fp}"));
        }
        entries.sort_unstable();
        Ok((entries, count))
    }

    fn named_entries<'v>(
        &mut self,
        fields: impl Iterator<Item = &'v (String, Value)>,
        path: &Path,
    ) -> HashResult<(Vec<String>, usize)> {
        let mut entries = Vec::new();
        let mut count = 1usize;
        for (name, val) in fields {
            let attr_path = path.child(PathStep::attr(name.clone()));
            let name_fp = self.opts.backend.digest(format!("str:{name}").as_bytes());
            if let Some((val_fp, c)) = self.node(val, &attr_path)? {
                count += c;
                entries.push(format!("{name_fp}:{val_fp}"));
            }
        }
        entries.sort_unstable();
        Ok((entries, count))
    }
}

/// Combine unordered element hashes: distinct, sorted, with `|count`
/// repetition suffixes unless repetition is ignored.
fn combine_unordered(hashes: Vec<String>, with_counts: bool) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for h in hashes {
        *counts.entry(h).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .map(|(h, n)| {
            if with_counts {
                format!("{h}|{n}")
            } else {
                h
            }
        })
        .collect()
}

fn wrap(tag: &str, open: &str, close: &str, (entries, count): (Vec<String>, usize)) -> (String, usize) {
    (format!("{tag}:{open}{}{close}", entries.join(";")), count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use ddx_types::Notation;
    use proptest::prelude::*;

    fn fp(v: &Value, opts: HashOptions) -> String {
        DeepHasher::new(opts).hash(v).unwrap().fingerprint
    }

    fn map(pairs: Vec<(Value, Value)>) -> Value {
        Value::Map(pairs)
    }

    #[test]
    fn mapping_hash_ignores_key_order() {
        let a = map(vec![
            (Value::text("a"), Value::Int(1)),
            (Value::text("b"), Value::Int(2)),
        ]);
        let b = map(vec![
            (Value::text("b"), Value::Int(2)),
            (Value::text("a"), Value::Int(1)),
        ]);
        assert_eq!(fp(&a, HashOptions::default()), fp(&b, HashOptions::default()));
    }

    #[test]
    fn list_and_tuple_hash_differently_without_a_group() {
        let l = Value::list(vec![Value::Int(1)]);
        let t = Value::tuple(vec![Value::Int(1)]);
        assert_ne!(fp(&l, HashOptions::default()), fp(&t, HashOptions::default()));

        let grouped = HashOptions {
            ignore_type_in_groups: vec![vec![ValueKind::List, ValueKind::Tuple]],
            ..Default::default()
        };
        assert_eq!(fp(&l, grouped.clone()), fp(&t, grouped));
    }

    #[test]
    fn order_insensitive_sequences() {
        let opts = HashOptions {
            ignore_iterable_order: true,
            ..Default::default()
        };
        let a = Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        let b = Value::list(vec![Value::Int(3), Value::Int(1), Value::Int(2)]);
        assert_eq!(fp(&a, opts.clone()), fp(&b, opts.clone()));

        // Repetition still counts unless explicitly ignored.
        let twice = Value::list(vec![Value::Int(1), Value::Int(1)]);
        let once = Value::list(vec![Value::Int(1)]);
        assert_ne!(fp(&twice, opts.clone()), fp(&once, opts));

        let loose = HashOptions {
            ignore_iterable_order: true,
            ignore_repetition: true,
            ..Default::default()
        };
        assert_eq!(fp(&twice, loose.clone()), fp(&once, loose));
    }

    #[test]
    fn numeric_type_elision_with_digits() {
        let opts = HashOptions {
            ignore_numeric_type_changes: true,
            significant_digits: Some(2),
            number_format_notation: Notation::Fixed,
            ..Default::default()
        };
        assert_eq!(fp(&Value::Int(10), opts.clone()), fp(&Value::Float(10.0), opts.clone()));
        assert_eq!(
            fp(&Value::Float(10.001), opts.clone()),
            fp(&Value::Int(10), opts)
        );
    }

    #[test]
    fn string_type_elision_decodes_bytes() {
        let opts = HashOptions {
            ignore_string_type_changes: true,
            ..Default::default()
        };
        assert_eq!(
            fp(&Value::Bytes(b"hello".to_vec()), opts.clone()),
            fp(&Value::text("hello"), opts)
        );
    }

    #[test]
    fn opaque_bytes_hash_raw() {
        let opts = HashOptions::default();
        let blob = Value::Bytes(vec![0xff, 0xfe]);
        assert_eq!(fp(&blob, opts.clone()), fp(&blob, opts.clone()));
        assert_ne!(fp(&Value::Bytes(vec![0xff]), opts.clone()), fp(&blob, opts.clone()));
        assert_ne!(
            fp(&Value::Bytes(b"abc".to_vec()), opts.clone()),
            fp(&Value::text("abc"), opts)
        );
    }

    #[test]
    fn undecodable_bytes_only_fail_under_text_policies() {
        let blob = Value::Bytes(vec![0xff, 0xfe]);
        assert!(DeepHasher::new(HashOptions::default()).hash(&blob).is_ok());
        let elided = HashOptions {
            ignore_string_type_changes: true,
            ..Default::default()
        };
        assert!(DeepHasher::new(elided).hash(&blob).is_err());
    }

    #[test]
    fn case_folding() {
        let opts = HashOptions {
            ignore_string_case: true,
            ..Default::default()
        };
        assert_eq!(fp(&Value::text("HeLLo"), opts.clone()), fp(&Value::text("hello"), opts));
    }

    #[test]
    fn uuid_matches_its_string_form_when_enabled() {
        let u = uuid::Uuid::parse_str("a8098c1a-f86e-11da-bd1a-00112444be1e").unwrap();
        let opts = HashOptions {
            ignore_uuid_types: true,
            ..Default::default()
        };
        assert_eq!(
            fp(&Value::Uuid(u), opts.clone()),
            fp(&Value::text("a8098c1a-f86e-11da-bd1a-00112444be1e"), opts.clone())
        );
        // Case-insensitive via canonical form.
        assert_eq!(
            fp(&Value::Uuid(u), opts.clone()),
            fp(&Value::text("A8098C1A-F86E-11DA-BD1A-00112444BE1E"), opts)
        );
    }

    #[test]
    fn datetime_zones_fold_to_equal_fingerprints() {
        let a = Value::DateTime(DateTime::parse_from_rfc3339("2023-06-01T10:00:00+00:00").unwrap());
        let b = Value::DateTime(DateTime::parse_from_rfc3339("2023-06-01T12:00:00+02:00").unwrap());
        assert_eq!(fp(&a, HashOptions::default()), fp(&b, HashOptions::default()));
    }

    #[test]
    fn excluded_paths_do_not_contribute() {
        let a = map(vec![
            (Value::text("keep"), Value::Int(1)),
            (Value::text("drop"), Value::Int(2)),
        ]);
        let b = map(vec![
            (Value::text("keep"), Value::Int(1)),
            (Value::text("drop"), Value::Int(999)),
        ]);
        let opts = HashOptions {
            exclude_paths: ["root['drop']".to_string()].into_iter().collect(),
            ..Default::default()
        };
        assert_eq!(fp(&a, opts.clone()), fp(&b, opts));
    }

    #[test]
    fn subtree_counts() {
        let v = Value::list(vec![
            Value::Int(1),
            Value::list(vec![Value::Int(2), Value::Int(3)]),
        ]);
        let outcome = DeepHasher::default().hash(&v).unwrap();
        assert_eq!(outcome.count, 5);
    }

    #[test]
    fn parts_cover_the_subtree() {
        let v = Value::list(vec![Value::Int(1), Value::text("x")]);
        let (root_fp, count, parts) = DeepHasher::default().hash_with_parts(&v).unwrap();
        assert_eq!(count, 3);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts.last(), Some(&root_fp));
    }

    proptest! {
        #[test]
        fn permuted_mappings_hash_equal(keys in proptest::collection::vec("[a-z]{1,6}", 1..8)) {
            let mut uniq = keys.clone();
            uniq.sort();
            uniq.dedup();
            let pairs: Vec<(Value, Value)> = uniq
                .iter()
                .enumerate()
                .map(|(i, k)| (Value::text(k.clone()), Value::Int(i as i64)))
                .collect();
            let mut reversed = pairs.clone();
            reversed.reverse();
            prop_assert_eq!(
                fp(&Value::Map(pairs), HashOptions::default()),
                fp(&Value::Map(reversed), HashOptions::default())
            );
        }
    }
}
