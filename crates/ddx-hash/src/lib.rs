//! Content hashing for the DDX diff engine.
//!
//! Produces deterministic fingerprints of arbitrary nested values under the
//! same normalizations the differ compares with, plus a subtree node count
//! used for distance weighting. The order-insensitive matcher relies on
//! these fingerprints to pair similar items across two multisets.
//!
//! # Key Types
//!
//! - [`DeepHasher`] — The recursive hasher
//! - [`HashOptions`] — Normalizations under which fingerprints are stable
//! - [`HashBackend`] — Digest selection (SHA-256 default, BLAKE3 alternate)
//! - [`HashOutcome`] — Fingerprint, subtree count, and unprocessed paths

pub mod digest;
pub mod error;
pub mod hasher;
pub mod options;

pub use digest::HashBackend;
pub use error::{HashError, HashResult};
pub use hasher::{DeepHasher, HashOutcome};
pub use options::HashOptions;
