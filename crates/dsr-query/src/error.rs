//! Error types for query-method parsing.

use thiserror::Error;

/// Errors raised while compiling a query-method name into a predicate tree.
///
/// All of these are configuration errors: they surface when a query method is
/// declared, never when it is invoked.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueryError {
    /// The method does not start with a recognised query prefix.
    #[error("{method}: unsupported query prefix (expected find, read, get, query, search or stream)")]
    UnsupportedPrefix { method: String },

    /// `_by_` was given with nothing after it.
    #[error("{method}: empty predicate after `by`")]
    EmptyPredicate { method: String },

    /// A clause uses a keyword outside equality, range and null/boolean checks.
    #[error("{method}: unsupported keyword `{keyword}` in clause `{clause}`")]
    UnsupportedKeyword {
        method: String,
        clause: String,
        keyword: String,
    },

    /// The store has no disjunction; `_or_` cannot be translated.
    #[error("{method}: `or` predicates are not supported")]
    UnsupportedOr { method: String },

    /// A clause or sort names a property the domain type does not declare.
    #[error("{method}: unknown property `{property}`")]
    UnknownProperty { method: String, property: String },

    /// The identity field is encoded in the key, not stored as a property.
    #[error("{method}: identity field `{property}` cannot be used in a query predicate")]
    IdentityPredicate { method: String, property: String },

    /// The `order_by` clause is malformed.
    #[error("{method}: invalid sort clause: {reason}")]
    InvalidSort { method: String, reason: String },

    /// A `first`/`top` subject carries an unusable limit.
    #[error("{method}: invalid result limit `{subject}`")]
    InvalidLimit { method: String, subject: String },

    /// The subject contains a word with query semantics this store lacks.
    #[error("{method}: unsupported subject `{word}`")]
    UnsupportedSubject { method: String, word: String },
}

/// Convenience type alias for query parsing.
pub type Result<T> = std::result::Result<T, QueryError>;
