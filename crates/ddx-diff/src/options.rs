//! Differ configuration.
//!
//! Every comparison policy lives here. `validate` rejects impossible
//! combinations synchronously, so a constructed [`DeepDiff`](crate::DeepDiff)
//! can never fail on configuration mid-walk.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ddx_hash::{HashBackend, HashOptions};
use ddx_types::{Notation, TruncateLevel, Value, ValueKind};
use regex::Regex;

use crate::error::{DiffError, DiffResult};
use crate::operators::{DiffOperator, Level};
use crate::report::DiffStats;

/// Output projection selector. Tree is the internal form; the colored
/// variants are rendered by front-end collaborators, not by the core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum View {
    Text,
    #[default]
    Tree,
    Delta,
    Colored,
    ColoredCompact,
}

impl FromStr for View {
    type Err = DiffError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "tree" => Ok(Self::Tree),
            "delta" => Ok(Self::Delta),
            "colored" => Ok(Self::Colored),
            "colored_compact" => Ok(Self::ColoredCompact),
            other => Err(DiffError::invalid_option("view", format!("unknown view {other:?}"))),
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "text",
            Self::Tree => "tree",
            Self::Delta => "delta",
            Self::Colored => "colored",
            Self::ColoredCompact => "colored_compact",
        })
    }
}

/// Pre-transform: convert a sequence of mappings into a mapping keyed by
/// one or two fields, so items are compared by identity rather than by
/// position.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupBy {
    /// One or two key field names (primary, optional secondary).
    pub keys: Vec<String>,
    /// When set, duplicate groups collect into a list sorted by this field.
    pub sort_key: Option<String>,
}

impl GroupBy {
    pub fn single(key: impl Into<String>) -> Self {
        Self {
            keys: vec![key.into()],
            sort_key: None,
        }
    }
}

/// Cooperative cancellation observed at pass boundaries.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the in-flight report is finalized with the
    /// `cancelled` flag set.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Pairing predicate returned failure: fall back to fingerprint pairing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CannotCompare;

/// Pairing predicate that overrides hashing for unordered sequences.
pub type IterableCompareFn =
    Arc<dyn Fn(&Value, &Value, &Level<'_>) -> Result<bool, CannotCompare> + Send + Sync>;

/// Value filter callback over `(value, rendered_path)`.
pub type ObjCallback = Arc<dyn Fn(&Value, &str) -> bool + Send + Sync>;

/// Progress callback invoked at pass boundaries.
pub type ProgressFn = Arc<dyn Fn(&DiffStats) + Send + Sync>;

/// The full option set of the differ. Defaults mirror the reference
/// behavior: ordered comparison, verbosity 1, threshold 0.33, pair cutoffs
/// 0.3/0.7.
#[derive(Clone)]
pub struct DiffOptions {
    pub ignore_order: bool,
    pub report_repetition: bool,
    pub ignore_string_type_changes: bool,
    pub ignore_numeric_type_changes: bool,
    pub ignore_type_in_groups: Vec<Vec<ValueKind>>,
    pub ignore_type_subclasses: bool,
    pub ignore_string_case: bool,
    pub ignore_nan_inequality: bool,
    pub ignore_private_variables: bool,
    pub ignore_uuid_types: bool,
    pub ignore_encoding_errors: bool,
    pub encodings: Vec<String>,
    pub significant_digits: Option<u32>,
    pub number_format_notation: Notation,
    pub math_epsilon: Option<f64>,
    pub use_log_scale: bool,
    pub log_scale_similarity_threshold: f64,
    pub truncate_datetime: Option<TruncateLevel>,
    pub exclude_paths: BTreeSet<String>,
    pub include_paths: BTreeSet<String>,
    pub exclude_regex_paths: Vec<Regex>,
    pub exclude_types: BTreeSet<ValueKind>,
    pub exclude_obj_callback: Option<ObjCallback>,
    pub exclude_obj_callback_strict: Option<ObjCallback>,
    pub include_obj_callback: Option<ObjCallback>,
    pub include_obj_callback_strict: Option<ObjCallback>,
    pub custom_operators: Vec<Arc<dyn DiffOperator>>,
    pub iterable_compare_func: Option<IterableCompareFn>,
    pub zip_ordered_iterables: bool,
    pub threshold_to_diff_deeper: f64,
    pub cutoff_distance_for_pairs: f64,
    pub cutoff_intersection_for_pairs: f64,
    pub group_by: Option<GroupBy>,
    pub max_passes: u64,
    pub max_diffs: Option<u64>,
    pub cache_size: usize,
    pub cache_tuning_sample_size: usize,
    pub cache_purge_level: u8,
    pub verbose_level: u8,
    pub view: View,
    pub hash_backend: HashBackend,
    pub progress_callback: Option<ProgressFn>,
    pub cancellation: Option<CancelToken>,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            ignore_order: false,
            report_repetition: false,
            ignore_string_type_changes: false,
            ignore_numeric_type_changes: false,
            ignore_type_in_groups: Vec::new(),
            ignore_type_subclasses: false,
            ignore_string_case: false,
            ignore_nan_inequality: false,
            ignore_private_variables: true,
            ignore_uuid_types: false,
            ignore_encoding_errors: false,
            encodings: Vec::new(),
            significant_digits: None,
            number_format_notation: Notation::Fixed,
            math_epsilon: None,
            use_log_scale: false,
            log_scale_similarity_threshold: 0.1,
            truncate_datetime: None,
            exclude_paths: BTreeSet::new(),
            include_paths: BTreeSet::new(),
            exclude_regex_paths: Vec::new(),
            exclude_types: BTreeSet::new(),
            exclude_obj_callback: None,
            exclude_obj_callback_strict: None,
            include_obj_callback: None,
            include_obj_callback_strict: None,
            custom_operators: Vec::new(),
            iterable_compare_func: None,
            zip_ordered_iterables: false,
            threshold_to_diff_deeper: 0.33,
            cutoff_distance_for_pairs: 0.3,
            cutoff_intersection_for_pairs: 0.7,
            group_by: None,
            max_passes: 10_000_000,
            max_diffs: None,
            cache_size: 0,
            cache_tuning_sample_size: 0,
            cache_purge_level: 1,
            verbose_level: 1,
            view: View::Tree,
            hash_backend: HashBackend::default(),
            progress_callback: None,
            cancellation: None,
        }
    }
}

impl fmt::Debug for DiffOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiffOptions")
            .field("ignore_order", &self.ignore_order)
            .field("report_repetition", &self.report_repetition)
            .field("significant_digits", &self.significant_digits)
            .field("math_epsilon", &self.math_epsilon)
            .field("threshold_to_diff_deeper", &self.threshold_to_diff_deeper)
            .field("custom_operators", &self.custom_operators.len())
            .field("view", &self.view)
            .finish_non_exhaustive()
    }
}

impl DiffOptions {
    /// Reject impossible configurations before any comparison runs.
    pub fn validate(&self) -> DiffResult<()> {
        for (name, v) in [
            ("threshold_to_diff_deeper", self.threshold_to_diff_deeper),
            ("cutoff_distance_for_pairs", self.cutoff_distance_for_pairs),
            (
                "cutoff_intersection_for_pairs",
                self.cutoff_intersection_for_pairs,
            ),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(DiffError::invalid_option(name, "must be within [0, 1]"));
            }
        }
        if let Some(eps) = self.math_epsilon {
            if eps < 0.0 {
                return Err(DiffError::invalid_option("math_epsilon", "must be non-negative"));
            }
            if self.significant_digits.is_some() {
                return Err(DiffError::invalid_option(
                    "math_epsilon",
                    "cannot be combined with significant_digits",
                ));
            }
        }
        if self.use_log_scale && self.log_scale_similarity_threshold <= 0.0 {
            return Err(DiffError::invalid_option(
                "log_scale_similarity_threshold",
                "must be positive",
            ));
        }
        if self.iterable_compare_func.is_some() && !self.ignore_order {
            return Err(DiffError::invalid_option(
                "iterable_compare_func",
                "requires ignore_order",
            ));
        }
        if self.cache_purge_level > 2 {
            return Err(DiffError::invalid_option("cache_purge_level", "must be 0, 1 or 2"));
        }
        if self.verbose_level > 2 {
            return Err(DiffError::invalid_option("verbose_level", "must be 0, 1 or 2"));
        }
        if let Some(gb) = &self.group_by {
            if gb.keys.is_empty() || gb.keys.len() > 2 {
                return Err(DiffError::invalid_option(
                    "group_by",
                    "takes one primary and at most one secondary key",
                ));
            }
        }
        if self.ignore_order {
            for op in &self.custom_operators {
                if !op.has_hash_normalizer() {
                    return Err(DiffError::OperatorNeedsNormalizer {
                        name: op.name().to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// The hashing options this comparison's fingerprints must use, so hash
    /// equality always agrees with compare equality.
    pub fn hash_options(&self) -> HashOptions {
        HashOptions {
            ignore_string_type_changes: self.ignore_string_type_changes,
            ignore_numeric_type_changes: self.ignore_numeric_type_changes,
            ignore_string_case: self.ignore_string_case,
            ignore_uuid_types: self.ignore_uuid_types,
            ignore_iterable_order: self.ignore_order,
            ignore_repetition: !self.report_repetition,
            ignore_private_variables: self.ignore_private_variables,
            ignore_type_in_groups: self.ignore_type_in_groups.clone(),
            significant_digits: self.significant_digits,
            number_format_notation: self.number_format_notation,
            truncate_datetime: self.truncate_datetime,
            exclude_paths: self.exclude_paths.clone(),
            exclude_regex_paths: self.exclude_regex_paths.clone(),
            exclude_types: self.exclude_types.clone(),
            encodings: self.encodings.clone(),
            ignore_encoding_errors: self.ignore_encoding_errors,
            backend: self.hash_backend,
        }
    }

    /// True when the two kinds are equated by a configured type group.
    pub fn kinds_grouped(&self, a: ValueKind, b: ValueKind) -> bool {
        if a == b {
            return true;
        }
        if self.ignore_numeric_type_changes && a.is_numeric() && b.is_numeric() {
            return true;
        }
        if self.ignore_string_type_changes && a.is_string_like() && b.is_string_like() {
            return true;
        }
        self.ignore_type_in_groups
            .iter()
            .any(|g| g.contains(&a) && g.contains(&b))
    }
}
