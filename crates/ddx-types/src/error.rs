use thiserror::Error;

/// Errors produced by value and path operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid literal {0:?}")]
    InvalidLiteral(String),

    #[error("invalid decimal {0:?}")]
    InvalidDecimal(String),

    #[error("duplicate mapping key at {0}")]
    DuplicateKey(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
