//! Derived query methods.
//!
//! A method name is parsed once, when the method is resolved, into a
//! [`PredicateTree`](dsr_query::PredicateTree). Each invocation binds its
//! arguments, builds a fresh store query under the ancestors active at that
//! moment, and shapes the results as the method declared.

mod creator;
mod method;

pub use creator::{ancestor_filter, QueryCreator};
pub use method::{CollectionQuery, EntityQuery, QueryOutput, RepositoryQuery, StreamQuery};
