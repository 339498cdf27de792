use thiserror::Error;

/// Errors from hashing operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("could not decode bytes at {path} with encodings {encodings:?}")]
    EncodingFailed { path: String, encodings: Vec<String> },

    #[error("unknown encoding {0:?}")]
    UnknownEncoding(String),
}

/// Convenience alias for hash results.
pub type HashResult<T> = Result<T, HashError>;
