use ddx_hash::HashError;
use ddx_types::TypeError;
use thiserror::Error;

/// Errors produced by the differ.
#[derive(Debug, Error)]
pub enum DiffError {
    /// Configuration rejected at construction; never reaches comparison.
    #[error("invalid option {option}: {reason}")]
    InvalidOption { option: String, reason: String },

    /// A custom operator is in effect under unordered comparison but does
    /// not define a hash normalizer, so fingerprints could disagree with
    /// the operator's notion of equality.
    #[error("operator {name:?} is used with ignore_order but defines no hash normalizer")]
    OperatorNeedsNormalizer { name: String },

    #[error(transparent)]
    Hash(#[from] HashError),

    #[error(transparent)]
    Type(#[from] TypeError),
}

impl DiffError {
    pub(crate) fn invalid_option(option: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.to_string(),
            reason: reason.into(),
        }
    }
}

/// Convenience alias for diff results.
pub type DiffResult<T> = Result<T, DiffError>;
