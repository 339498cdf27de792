//! Applyable change documents for DDX.
//!
//! A [`Delta`] projects a diff report into path-keyed sections that can be
//! replayed against the original value to reconstruct the compared one.
//! The wire form pairs a version header with a JSON payload of tagged
//! atoms; decoding only admits tags on the [`AtomPolicy`] allow-list and
//! apply refuses to traverse dunder attribute segments.
//!
//! ```
//! use ddx_delta::{ApplyOptions, Delta};
//! use ddx_diff::{DeepDiff, DiffOptions};
//! use ddx_types::Value;
//!
//! let t1 = Value::Map(vec![(Value::text("a"), Value::Int(1))]);
//! let t2 = Value::Map(vec![(Value::text("a"), Value::Int(2))]);
//! let report = DeepDiff::new(DiffOptions::default())?.compare(&t1, &t2)?;
//! let delta = Delta::from_report(&report);
//! let mut patched = t1.clone();
//! delta.apply(&mut patched, &ApplyOptions::default())?;
//! assert_eq!(patched, t2);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod apply;
mod atom;
mod delta;
mod error;

pub use apply::ApplyOptions;
pub use atom::{decode_atom, encode_atom, AtomPolicy, BUILTIN_TAGS};
pub use delta::{Delta, RepetitionEntry, TypeChange, ValueChange, WIRE_HEADER};
pub use error::{DeltaError, DeltaResult};
