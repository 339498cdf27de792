//! Foundation types for the DDX deep-difference engine.
//!
//! This crate provides the closed value model, path addressing, and the
//! normalization helpers (numeric, temporal) shared by the hasher, the
//! differ, and the delta applier. Every other DDX crate depends on
//! `ddx-types`.
//!
//! # Key Types
//!
//! - [`Value`] / [`ValueKind`] — The tagged union of everything DDX can compare
//! - [`Path`] / [`PathStep`] — Dotted/bracketed locations inside a value tree
//! - [`Decimal`] — Exact base-10 numbers
//! - [`Notation`] / [`TruncateLevel`] — Numeric and temporal normalization knobs
//! - [`TypeError`] — Errors from value and path operations

pub mod decimal;
pub mod error;
pub mod json;
pub mod numbers;
pub mod path;
pub mod temporal;
pub mod value;

pub use decimal::Decimal;
pub use error::TypeError;
pub use json::to_json_lossy;
pub use numbers::{as_f64, format_float, number_to_string, Notation};
pub use path::{parse_literal, path_is_within, render_literal, Path, PathStep};
pub use temporal::{duration_total_seconds, normalize_datetime, seconds_of_day, TruncateLevel};
pub use value::{
    EnumValue, IpRange, IpRole, ObjectValue, Record, RegexSpec, SeqKind, Sequence, Value, ValueKind,
};
