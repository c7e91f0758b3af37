use dsr_types::{Entity, Key, KeyFactory};

use crate::error::StoreResult;
use crate::options::DatastoreOptions;
use crate::query::{QueryResults, StructuredQuery};

/// The store service boundary.
///
/// All implementations must satisfy these invariants:
/// - `get` of a missing key is `Ok(None)`, never an error.
/// - `put` is an upsert keyed by the entity's complete key.
/// - `delete` of a missing key is a no-op.
/// - `run` returns a lazy sequence; entity bodies may be fetched page by page
///   as the caller advances it.
/// - Transport failures are returned to the caller, never retried or
///   swallowed.
///
/// The handle is shared read-only; no method takes `&mut self`.
pub trait Datastore: Send + Sync {
    /// The options this store was configured with.
    fn options(&self) -> &DatastoreOptions;

    /// Look up one entity by key.
    fn get(&self, key: &Key) -> StoreResult<Option<Entity>>;

    /// Look up many entities, one slot per requested key, in request order.
    ///
    /// Default implementation calls `get()` for each key. Backends with a
    /// native multi-get should override it to save round trips.
    fn get_many(&self, keys: &[Key]) -> StoreResult<Vec<Option<Entity>>> {
        keys.iter().map(|key| self.get(key)).collect()
    }

    /// Write entities in a single call.
    fn put(&self, entities: &[Entity]) -> StoreResult<()>;

    /// Delete entities by key in a single call.
    fn delete(&self, keys: &[Key]) -> StoreResult<()>;

    /// Run a query and return its lazy result sequence.
    fn run(&self, query: &StructuredQuery) -> StoreResult<QueryResults>;

    /// A key factory qualified with this store's project and namespace.
    fn new_key_factory(&self) -> KeyFactory {
        self.options().key_factory()
    }
}
