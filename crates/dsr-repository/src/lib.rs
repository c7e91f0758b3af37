//! Typed repositories over a hierarchical key-value store.
//!
//! This is the main entry point for applications. A [`Repository`] stores
//! records of one domain type as entities of one kind, keyed by the record's
//! identity field. An ancestor [`Context`] scopes keys and queries beneath a
//! parent path for the current thread, and derived query methods compile a
//! method name such as `find_by_age_between_order_by_name` into a store
//! query once, then run it with fresh arguments on every call.

pub mod codec;
pub mod context;
pub mod error;
pub mod factory;
pub mod metadata;
pub mod query;
pub mod repository;

pub use context::Context;
pub use error::{RepositoryError, RepositoryResult};
pub use factory::RepositoryFactory;
pub use metadata::{EntityInformation, EntityMetadata, Record};
pub use query::{CollectionQuery, EntityQuery, QueryCreator, QueryOutput, RepositoryQuery, StreamQuery};
pub use repository::{Records, Repository, BATCH_SIZE};

// Re-export key types
pub use dsr_query::{PredicateTree, ResultShape};
pub use dsr_store::{Datastore, DatastoreOptions, Filter, InMemoryDatastore, OrderBy, StructuredQuery};
pub use dsr_types::{Entity, Key, KeyFactory, KeyId, PathElement, Value, ValueType};
