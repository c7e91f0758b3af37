use dsr_types::{Key, TypeError};

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A key could not be built or is malformed.
    #[error("invalid key: {0}")]
    InvalidKey(#[from] TypeError),

    /// An entity was written without a complete key.
    #[error("entity {key} rejected: {reason}")]
    InvalidEntity { key: Key, reason: String },

    /// A single call carried more entities or keys than the store accepts.
    #[error("batch of {actual} exceeds the per-call limit of {max}")]
    BatchTooLarge { max: usize, actual: usize },

    /// The query cannot be executed by this backend.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The store could not be reached or refused the call.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Configuration could not be parsed or failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error while reading configuration or talking to a backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
