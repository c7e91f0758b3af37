use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, RwLock};

use dsr_types::{Entity, Key};

use crate::error::{StoreError, StoreResult};
use crate::options::DatastoreOptions;
use crate::query::{QueryResults, StructuredQuery};
use crate::traits::Datastore;

/// Largest number of entities or keys accepted by one `put`/`delete` call.
pub const MAX_ENTITIES_PER_CALL: usize = 500;

type EntityMap = BTreeMap<Key, Entity>;

/// In-memory, `BTreeMap`-based datastore.
///
/// Intended for tests and embedding. Entities are held behind a `RwLock` and
/// cloned on read/write. Queries snapshot the matching keys when they are run
/// and load entity bodies lazily, one page at a time, as the result sequence
/// is advanced; entities deleted in between are skipped.
pub struct InMemoryDatastore {
    options: DatastoreOptions,
    entities: Arc<RwLock<EntityMap>>,
}

impl InMemoryDatastore {
    /// Create an empty store with default options.
    pub fn new() -> Self {
        Self::with_options(DatastoreOptions::default())
    }

    /// Create an empty store with the given options.
    pub fn with_options(options: DatastoreOptions) -> Self {
        Self {
            options,
            entities: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Number of entities currently stored.
    pub fn len(&self) -> usize {
        self.entities.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.read().expect("lock poisoned").is_empty()
    }

    /// Remove all entities from the store.
    pub fn clear(&self) {
        self.entities.write().expect("lock poisoned").clear();
    }

    /// All stored keys in key order.
    pub fn keys(&self) -> Vec<Key> {
        self.entities
            .read()
            .expect("lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    fn check_batch(&self, actual: usize) -> StoreResult<()> {
        if actual > MAX_ENTITIES_PER_CALL {
            return Err(StoreError::BatchTooLarge {
                max: MAX_ENTITIES_PER_CALL,
                actual,
            });
        }
        Ok(())
    }

    fn check_key(&self, key: &Key) -> StoreResult<()> {
        if key.project_id() != self.options.project_id
            || key.namespace() != self.options.namespace.as_deref()
        {
            return Err(StoreError::InvalidEntity {
                key: key.clone(),
                reason: "key belongs to a different project or namespace".into(),
            });
        }
        Ok(())
    }
}

impl Default for InMemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl Datastore for InMemoryDatastore {
    fn options(&self) -> &DatastoreOptions {
        &self.options
    }

    fn get(&self, key: &Key) -> StoreResult<Option<Entity>> {
        let map = self.entities.read().expect("lock poisoned");
        Ok(map.get(key).cloned())
    }

    fn get_many(&self, keys: &[Key]) -> StoreResult<Vec<Option<Entity>>> {
        let map = self.entities.read().expect("lock poisoned");
        Ok(keys.iter().map(|key| map.get(key).cloned()).collect())
    }

    fn put(&self, entities: &[Entity]) -> StoreResult<()> {
        self.check_batch(entities.len())?;
        for entity in entities {
            self.check_key(entity.key())?;
        }
        let mut map = self.entities.write().expect("lock poisoned");
        for entity in entities {
            map.insert(entity.key().clone(), entity.clone());
        }
        Ok(())
    }

    fn delete(&self, keys: &[Key]) -> StoreResult<()> {
        self.check_batch(keys.len())?;
        for key in keys {
            self.check_key(key)?;
        }
        let mut map = self.entities.write().expect("lock poisoned");
        for key in keys {
            map.remove(key);
        }
        Ok(())
    }

    fn run(&self, query: &StructuredQuery) -> StoreResult<QueryResults> {
        if query.kind().is_empty() {
            return Err(StoreError::InvalidQuery("query kind must not be empty".into()));
        }

        let keys: Vec<Key> = {
            let map = self.entities.read().expect("lock poisoned");
            let mut matched: Vec<&Entity> = map.values().filter(|e| query.matches(e)).collect();
            matched.sort_by(|a, b| query.compare(a, b));
            let limit = query.limit_value().unwrap_or(usize::MAX);
            matched
                .into_iter()
                .take(limit)
                .map(|e| e.key().clone())
                .collect()
        };

        tracing::debug!(%query, matched = keys.len(), "in-memory query");

        Ok(QueryResults::new(PagedResults {
            entities: Arc::clone(&self.entities),
            keys: keys.into_iter(),
            page: VecDeque::new(),
            page_size: self.options.query_page_size.max(1),
            keys_only: query.is_keys_only(),
        }))
    }
}

impl std::fmt::Debug for InMemoryDatastore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryDatastore")
            .field("project_id", &self.options.project_id)
            .field("entity_count", &self.len())
            .finish()
    }
}

/// Lazily pages entity bodies in for a snapshot of matching keys.
struct PagedResults {
    entities: Arc<RwLock<EntityMap>>,
    keys: std::vec::IntoIter<Key>,
    page: VecDeque<Entity>,
    page_size: usize,
    keys_only: bool,
}

impl Iterator for PagedResults {
    type Item = StoreResult<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.keys_only {
            return self.keys.next().map(|key| Ok(Entity::new(key)));
        }
        loop {
            if let Some(entity) = self.page.pop_front() {
                return Some(Ok(entity));
            }
            let batch: Vec<Key> = self.keys.by_ref().take(self.page_size).collect();
            if batch.is_empty() {
                return None;
            }
            let map = self.entities.read().expect("lock poisoned");
            self.page
                .extend(batch.iter().filter_map(|key| map.get(key).cloned()));
        }
    }
}
