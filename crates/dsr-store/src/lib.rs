//! Hierarchical key-value store boundary for datastore repositories.
//!
//! This crate defines the five store primitives the repository layer depends
//! on (`get`, `put`, `delete`, `run`, `new_key_factory`) as the [`Datastore`]
//! trait, the [`StructuredQuery`] language they accept, and an in-memory
//! backend.
//!
//! # Storage Backends
//!
//! All backends implement the [`Datastore`] trait:
//!
//! - [`InMemoryDatastore`] -- `BTreeMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. A missing entity is `Ok(None)`, not an error.
//! 2. Query results are lazy and may be paged in as they are consumed.
//! 3. The store handle is immutable configuration; it is shared freely.
//! 4. All I/O and transport errors are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod options;
pub mod query;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryDatastore, MAX_ENTITIES_PER_CALL};
pub use options::DatastoreOptions;
pub use query::{Direction, Filter, Operator, OrderBy, QueryResults, StructuredQuery};
pub use traits::Datastore;
