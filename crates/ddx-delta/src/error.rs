//! Error types for delta construction, serialization, and apply.

use ddx_types::TypeError;
use thiserror::Error;

/// Errors raised while building, encoding, or applying a delta.
#[derive(Debug, Error)]
pub enum DeltaError {
    /// The target value does not match what the delta recorded.
    #[error("cannot apply at {path}: expected {expected}, found {found}")]
    ApplyFailed {
        path: String,
        expected: String,
        found: String,
    },

    /// A delta path does not resolve inside the target value.
    #[error("path {path} does not resolve in the target value")]
    MissingPath { path: String },

    /// Apply refuses to traverse attribute segments containing `__`.
    #[error("refusing to traverse dunder segment in {path}")]
    ForbiddenPath { path: String },

    /// The wire document used an atom tag outside the allow-list.
    #[error("atom tag {tag:?} is not in the allow-list")]
    ForbiddenAtom { tag: String },

    /// The wire document is structurally invalid.
    #[error("malformed delta document: {reason}")]
    Malformed { reason: String },

    #[error(transparent)]
    Type(#[from] TypeError),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DeltaError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed {
            reason: reason.into(),
        }
    }
}

pub type DeltaResult<T> = Result<T, DeltaError>;
