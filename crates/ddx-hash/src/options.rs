//! Hashing options: the normalizations under which fingerprints are stable.
//!
//! The differ builds a `HashOptions` from its own option set so that hash
//! equality always agrees with comparison equality.

use std::collections::BTreeSet;

use ddx_types::{Notation, TruncateLevel, ValueKind};
use regex::Regex;

use crate::digest::HashBackend;
use crate::error::{HashError, HashResult};

/// Configuration for [`DeepHasher`](crate::DeepHasher).
#[derive(Clone, Debug, Default)]
pub struct HashOptions {
    /// Collapse bytes and str to one string tag and hash decoded contents.
    pub ignore_string_type_changes: bool,
    /// Collapse all numeric kinds to one `number` tag and hash the
    /// normalized decimal form.
    pub ignore_numeric_type_changes: bool,
    /// Lowercase-fold strings before hashing.
    pub ignore_string_case: bool,
    /// Hash a UUID and its canonical string representation identically.
    pub ignore_uuid_types: bool,
    /// Sort element hashes of ordered sequences before combining.
    pub ignore_iterable_order: bool,
    /// Drop repetition counts from unordered sequence hashes.
    pub ignore_repetition: bool,
    /// Exclude object attributes whose names start with `__`.
    pub ignore_private_variables: bool,
    /// Extra kind groups hashed under one collapsed tag.
    pub ignore_type_in_groups: Vec<Vec<ValueKind>>,
    /// Fractional digits for numeric normalization.
    pub significant_digits: Option<u32>,
    /// Notation for numeric normalization.
    pub number_format_notation: Notation,
    /// Datetime truncation granularity.
    pub truncate_datetime: Option<TruncateLevel>,
    /// Rendered paths excluded from hashing (subtree-wide).
    pub exclude_paths: BTreeSet<String>,
    /// Regexes over rendered paths excluded from hashing.
    pub exclude_regex_paths: Vec<Regex>,
    /// Kinds excluded from hashing.
    pub exclude_types: BTreeSet<ValueKind>,
    /// Encodings tried, in order, when decoding bytes.
    pub encodings: Vec<String>,
    /// Substitute replacement characters instead of failing on undecodable
    /// bytes.
    pub ignore_encoding_errors: bool,
    /// Digest backend for fingerprints.
    pub backend: HashBackend,
}

impl HashOptions {
    /// True when any exclusion rule is configured. Exclusions are
    /// path-dependent, which disables identity memoization.
    pub fn has_exclusions(&self) -> bool {
        !self.exclude_paths.is_empty()
            || !self.exclude_regex_paths.is_empty()
            || !self.exclude_types.is_empty()
    }

    /// True when byte strings take part through their decoded text form:
    /// string-type elision, case folding, or explicit encodings. Otherwise
    /// bytes are opaque and hash by raw content, so undecodable bytes
    /// never fail.
    pub fn bytes_as_text(&self) -> bool {
        self.ignore_string_type_changes
            || self.ignore_string_case
            || !self.encodings.is_empty()
    }

    /// The collapsed hash tag for a kind under the type-group policy.
    pub fn collapsed_tag(&self, kind: ValueKind) -> String {
        if self.ignore_numeric_type_changes && kind.is_numeric() {
            return "number".to_string();
        }
        if self.ignore_string_type_changes && kind.is_string_like() {
            return "str".to_string();
        }
        for group in &self.ignore_type_in_groups {
            if group.contains(&kind) {
                let mut tags: Vec<&str> = group.iter().map(|k| k.tag()).collect();
                tags.sort_unstable();
                tags.dedup();
                return tags.join("|");
            }
        }
        kind.tag().to_string()
    }

    /// Decode bytes with the configured encodings, in order.
    ///
    /// With no encodings configured, UTF-8 is tried. Failures either raise
    /// or substitute replacement characters per `ignore_encoding_errors`.
    pub fn decode_bytes(&self, bytes: &[u8], path: &str) -> HashResult<String> {
        let defaults = ["utf-8".to_string()];
        let encodings: &[String] = if self.encodings.is_empty() {
            &defaults
        } else {
            &self.encodings
        };
        for name in encodings {
            match decode_with(name, bytes)? {
                Some(s) => return Ok(s),
                None => continue,
            }
        }
        if self.ignore_encoding_errors {
            return Ok(String::from_utf8_lossy(bytes).into_owned());
        }
        Err(HashError::EncodingFailed {
            path: path.to_string(),
            encodings: encodings.to_vec(),
        })
    }
}

fn decode_with(name: &str, bytes: &[u8]) -> HashResult<Option<String>> {
    match name.to_ascii_lowercase().as_str() {
        "utf-8" | "utf8" => Ok(std::str::from_utf8(bytes).ok().map(str::to_string)),
        "ascii" => {
            if bytes.is_ascii() {
                Ok(Some(
                    std::str::from_utf8(bytes).unwrap_or_default().to_string(),
                ))
            } else {
                Ok(None)
            }
        }
        // Latin-1 maps every byte to the code point of the same value.
        "latin-1" | "latin1" | "iso-8859-1" => {
            Ok(Some(bytes.iter().map(|&b| b as char).collect()))
        }
        other => Err(HashError::UnknownEncoding(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_collapse_wins_over_kind_tag() {
        let opts = HashOptions {
            ignore_numeric_type_changes: true,
            ..Default::default()
        };
        assert_eq!(opts.collapsed_tag(ValueKind::Int), "number");
        assert_eq!(opts.collapsed_tag(ValueKind::Decimal), "number");
        assert_eq!(opts.collapsed_tag(ValueKind::Text), "str");
    }

    #[test]
    fn custom_groups_collapse_to_a_joined_tag() {
        let opts = HashOptions {
            ignore_type_in_groups: vec![vec![ValueKind::List, ValueKind::Tuple]],
            ..Default::default()
        };
        assert_eq!(opts.collapsed_tag(ValueKind::List), "list|tuple");
        assert_eq!(opts.collapsed_tag(ValueKind::Tuple), "list|tuple");
        assert_eq!(opts.collapsed_tag(ValueKind::Set), "set");
    }

    #[test]
    fn decode_falls_through_encodings_in_order() {
        let opts = HashOptions {
            encodings: vec!["ascii".into(), "latin-1".into()],
            ..Default::default()
        };
        assert_eq!(opts.decode_bytes(b"plain", "root").unwrap(), "plain");
        assert_eq!(opts.decode_bytes(&[0xe9], "root").unwrap(), "é");
    }

    #[test]
    fn undecodable_bytes_raise_unless_ignored() {
        let strict = HashOptions::default();
        let err = strict.decode_bytes(&[0xff, 0xfe], "root[0]").unwrap_err();
        assert!(matches!(err, HashError::EncodingFailed { ref path, .. } if path == "root[0]"));

        let lenient = HashOptions {
            ignore_encoding_errors: true,
            ..Default::default()
        };
        assert!(lenient.decode_bytes(&[0xff, 0xfe], "root[0]").is_ok());
    }

    #[test]
    fn unknown_encoding_is_an_error() {
        let opts = HashOptions {
            encodings: vec!["utf-99".into()],
            ..Default::default()
        };
        assert_eq!(
            opts.decode_bytes(b"x", "root").unwrap_err(),
            HashError::UnknownEncoding("utf-99".into())
        );
    }
}
