use dsr_query::QueryError;
use dsr_store::StoreError;
use dsr_types::{Key, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The domain type declares no field named by its identity marker.
    #[error("{type_name}: identity field `{id_field}` not found among declared fields {fields:?}")]
    MissingIdentity {
        type_name: &'static str,
        id_field: &'static str,
        fields: Vec<&'static str>,
    },

    /// The domain type's fields could not be discovered.
    #[error("{type_name}: cannot discover fields: {reason}")]
    NotAStruct {
        type_name: &'static str,
        reason: String,
    },

    /// A property type was declared for a name that is not a stored property.
    #[error("{type_name}: property type declared for `{field}`, which is not a stored property")]
    UnknownProperty {
        type_name: &'static str,
        field: &'static str,
    },

    /// A query method could not be compiled.
    #[error("query method error: {0}")]
    Query(#[from] QueryError),

    /// A record could not be converted to or from its entity form.
    #[error("cannot marshal {kind}{}: {reason}", location(.field, .key))]
    Marshalling {
        kind: String,
        field: Option<String>,
        key: Option<Key>,
        reason: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// Invocation arguments do not fit the compiled query method.
    #[error("{method}: argument mismatch: {reason}")]
    ArgumentMismatch { method: String, reason: String },

    /// A multi-get found no entity for a requested key.
    #[error("entity not found: {key}")]
    EntityNotFound { key: Key },

    /// A single-result query matched more than one entity.
    #[error("{method}: expected at most one result, found more")]
    NonUniqueResult { method: String },

    /// One or more batched writes or deletes failed; later batches were
    /// still attempted.
    #[error("{failed} of {batches} batches failed: {source}")]
    Batch {
        failed: usize,
        batches: usize,
        #[source]
        source: StoreError,
    },

    /// Ancestor scopes were exited out of order.
    #[error("unbalanced ancestor context: expected depth {expected}, found {actual}")]
    UnbalancedContext { expected: usize, actual: usize },

    #[error("invalid key: {0}")]
    Key(#[from] TypeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

fn location(field: &Option<String>, key: &Option<Key>) -> String {
    let mut out = String::new();
    if let Some(field) = field {
        out.push_str(&format!(" field `{field}`"));
    }
    if let Some(key) = key {
        out.push_str(&format!(" at {key}"));
    }
    out
}

impl RepositoryError {
    pub(crate) fn marshalling(kind: &str, field: Option<String>, reason: impl Into<String>) -> Self {
        RepositoryError::Marshalling {
            kind: kind.to_string(),
            field,
            key: None,
            reason: reason.into(),
            source: None,
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use dsr_types::KeyFactory;

    #[test]
    fn marshalling_message_names_field_and_key() {
        let key = KeyFactory::new("p").set_kind("Person").new_key(1).unwrap();
        let err = RepositoryError::Marshalling {
            kind: "Person".into(),
            field: Some("age".into()),
            key: Some(key),
            reason: "out of range".into(),
            source: None,
        };
        assert_eq!(
            err.to_string(),
            "cannot marshal Person field `age` at Person(1): out of range"
        );
    }

    #[test]
    fn marshalling_message_without_location() {
        let err = RepositoryError::marshalling("Person", None, "not an object");
        assert_eq!(err.to_string(), "cannot marshal Person: not an object");
    }
}
