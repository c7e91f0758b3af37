use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("key kind must not be empty")]
    EmptyKind,

    #[error("key name must not be empty")]
    EmptyName,

    #[error("value of type {actual} cannot be used as a key identifier")]
    InvalidKeyId { actual: String },

    #[error("integer {0} does not fit in a 64-bit key identifier")]
    IdOutOfRange(String),
}
