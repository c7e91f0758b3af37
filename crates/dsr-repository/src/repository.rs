use std::fmt;
use std::sync::Arc;

use dsr_store::{Datastore, QueryResults, StoreResult, StructuredQuery};
use dsr_types::{derive_key, Entity, Key, KeyId, PathElement};
use tracing::{debug, warn};

use crate::codec;
use crate::context::Context;
use crate::error::{RepositoryError, RepositoryResult};
use crate::metadata::{EntityInformation, Record};
use crate::query::ancestor_filter;

/// Largest number of entities or keys sent to the store in one write or
/// delete call.
pub const BATCH_SIZE: usize = 50;

/// Typed CRUD access to the entities of one domain type.
///
/// Every operation reads the ancestor [`Context`] once when it starts: keys
/// are derived beneath the active ancestors and listing, counting, and bulk
/// deletion are restricted to descendants of the innermost one.
///
/// Bulk writes and deletes are sent in batches of [`BATCH_SIZE`]. A failed
/// batch does not stop later batches; the call reports the failure once all
/// batches have been attempted.
pub struct Repository<T> {
    datastore: Arc<dyn Datastore>,
    info: EntityInformation<T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            datastore: Arc::clone(&self.datastore),
            info: self.info.clone(),
        }
    }
}

impl<T> fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

impl<T: Record> Repository<T> {
    pub fn new(datastore: Arc<dyn Datastore>) -> RepositoryResult<Self> {
        Ok(Self {
            datastore,
            info: EntityInformation::new()?,
        })
    }

    pub fn kind(&self) -> &'static str {
        self.info.kind()
    }

    pub fn information(&self) -> &EntityInformation<T> {
        &self.info
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    /// Key of the entity identified by `id` under the active ancestors.
    pub fn key_for(&self, id: impl Into<KeyId>) -> RepositoryResult<Key> {
        Context::with_ancestors(|ancestors| self.derive(id.into(), ancestors))
    }

    fn derive(&self, id: KeyId, ancestors: &[PathElement]) -> RepositoryResult<Key> {
        Ok(derive_key(
            self.datastore.new_key_factory(),
            self.kind(),
            id,
            ancestors,
        )?)
    }

    /// Unfiltered query over this kind, restricted to the active ancestors.
    fn scoped(&self, query: StructuredQuery) -> RepositoryResult<StructuredQuery> {
        let ancestors = Context::ancestors();
        Ok(
            match ancestor_filter(&ancestors, self.datastore.new_key_factory())? {
                Some(filter) => query.filter(filter),
                None => query,
            },
        )
    }

    // ---------------------------------------------------------------------
    // Reads
    // ---------------------------------------------------------------------

    /// Number of entities of this kind in scope.
    pub fn count(&self) -> RepositoryResult<u64> {
        let query = self.scoped(StructuredQuery::keys(self.kind()))?;
        let mut count = 0u64;
        for item in self.datastore.run(&query)? {
            item?;
            count += 1;
        }
        Ok(count)
    }

    pub fn find_by_id(&self, id: impl Into<KeyId>) -> RepositoryResult<Option<T>> {
        let key = self.key_for(id)?;
        match self.datastore.get(&key)? {
            Some(entity) => codec::to_record(&entity, &self.info).map(Some),
            None => Ok(None),
        }
    }

    pub fn exists_by_id(&self, id: impl Into<KeyId>) -> RepositoryResult<bool> {
        let key = self.key_for(id)?;
        Ok(self.datastore.get(&key)?.is_some())
    }

    /// Records for every id, in request order.
    ///
    /// Fails with [`RepositoryError::EntityNotFound`] on the first id with no
    /// stored entity.
    pub fn find_all_by_id<I, K>(&self, ids: I) -> RepositoryResult<Vec<T>>
    where
        I: IntoIterator<Item = K>,
        K: Into<KeyId>,
    {
        let ancestors = Context::ancestors();
        let keys = ids
            .into_iter()
            .map(|id| self.derive(id.into(), &ancestors))
            .collect::<RepositoryResult<Vec<Key>>>()?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let found = self.datastore.get_many(&keys)?;
        keys.into_iter()
            .zip(found)
            .map(|(key, entity)| match entity {
                Some(entity) => codec::to_record(&entity, &self.info),
                None => Err(RepositoryError::EntityNotFound { key }),
            })
            .collect()
    }

    /// Every record of this kind in scope, produced lazily.
    pub fn find_all(&self) -> RepositoryResult<Records<T>> {
        let query = self.scoped(StructuredQuery::entities(self.kind()))?;
        self.query(&query)
    }

    /// Run a caller-built query and unmarshal its results as `T`.
    ///
    /// The query is run as given; no ancestor restriction is added.
    pub fn query(&self, query: &StructuredQuery) -> RepositoryResult<Records<T>> {
        let results = self.datastore.run(query)?;
        Ok(Records::new(results, self.info.clone()))
    }

    // ---------------------------------------------------------------------
    // Writes
    // ---------------------------------------------------------------------

    /// Upsert one record and return its key.
    pub fn save(&self, record: &T) -> RepositoryResult<Key> {
        let mut keys = self.save_all(std::iter::once(record))?;
        keys.pop().ok_or_else(|| {
            RepositoryError::marshalling(self.kind(), None, "record produced no entity")
        })
    }

    /// Upsert records in batches and return their keys in input order.
    ///
    /// A record that fails to marshal stops the call before its batch is
    /// sent; batches already sent stay written.
    pub fn save_all<'a, I>(&self, records: I) -> RepositoryResult<Vec<Key>>
    where
        I: IntoIterator<Item = &'a T>,
    {
        let ancestors = Context::ancestors();
        let mut keys = Vec::new();
        let entities = records.into_iter().map(|record| -> RepositoryResult<Entity> {
            let (id, properties) = codec::to_properties(record, &self.info)?;
            let key = self.derive(id, &ancestors)?;
            keys.push(key.clone());
            Ok(Entity::with_properties(key, properties))
        });
        write_batches(self.kind(), "put", entities, |batch| self.datastore.put(batch))?;
        Ok(keys)
    }

    pub fn delete_by_id(&self, id: impl Into<KeyId>) -> RepositoryResult<()> {
        let key = self.key_for(id)?;
        self.datastore.delete(std::slice::from_ref(&key))?;
        debug!(%key, "deleted entity");
        Ok(())
    }

    pub fn delete(&self, record: &T) -> RepositoryResult<()> {
        self.delete_all_records(std::iter::once(record))
    }

    /// Delete the entities of `records` in batches.
    pub fn delete_all_records<'a, I>(&self, records: I) -> RepositoryResult<()>
    where
        I: IntoIterator<Item = &'a T>,
    {
        let ancestors = Context::ancestors();
        let keys = records.into_iter().map(|record| -> RepositoryResult<Key> {
            let id = self.info.id_of(record)?;
            self.derive(id, &ancestors)
        });
        write_batches(self.kind(), "delete", keys, |batch| self.datastore.delete(batch))
    }

    /// Delete every entity of this kind in scope, in batches.
    pub fn delete_all(&self) -> RepositoryResult<()> {
        let query = self.scoped(StructuredQuery::keys(self.kind()))?;
        let keys = self
            .datastore
            .run(&query)?
            .keys()
            .map(|key| key.map_err(RepositoryError::from));
        write_batches(self.kind(), "delete", keys, |batch| self.datastore.delete(batch))
    }
}

/// Send `items` to `write` in chunks of [`BATCH_SIZE`].
///
/// An item error aborts immediately. A write error is logged and counted;
/// the remaining batches are still sent and the first write error is
/// returned at the end.
fn write_batches<B, I, W>(
    kind: &str,
    op: &'static str,
    items: I,
    mut write: W,
) -> RepositoryResult<()>
where
    I: IntoIterator<Item = RepositoryResult<B>>,
    W: FnMut(&[B]) -> StoreResult<()>,
{
    let mut buffer = Vec::with_capacity(BATCH_SIZE);
    let mut batches = 0usize;
    let mut failed = 0usize;
    let mut first_error = None;

    let mut flush = |buffer: &mut Vec<B>| {
        if buffer.is_empty() {
            return;
        }
        batches += 1;
        match write(buffer.as_slice()) {
            Ok(()) => debug!(
                kind = kind,
                op = op,
                batch = batches,
                size = buffer.len(),
                "batch written"
            ),
            Err(err) => {
                warn!(
                    kind = kind,
                    op = op,
                    batch = batches,
                    size = buffer.len(),
                    error = %err,
                    "batch failed"
                );
                failed += 1;
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        buffer.clear();
    };

    for item in items {
        buffer.push(item?);
        if buffer.len() == BATCH_SIZE {
            flush(&mut buffer);
        }
    }
    flush(&mut buffer);

    match first_error {
        None => Ok(()),
        Some(source) => Err(RepositoryError::Batch {
            failed,
            batches,
            source,
        }),
    }
}

/// Lazy sequence of records unmarshalled from query results.
///
/// Each item is unmarshalled as it is produced. A record that fails to
/// unmarshal yields an error item; iteration may continue past it.
pub struct Records<T> {
    results: QueryResults,
    info: EntityInformation<T>,
}

impl<T: Record> Records<T> {
    pub(crate) fn new(results: QueryResults, info: EntityInformation<T>) -> Self {
        Self { results, info }
    }
}

impl<T: Record> Iterator for Records<T> {
    type Item = RepositoryResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.results.next()?;
        Some(
            item.map_err(RepositoryError::from)
                .and_then(|entity| codec::to_record(&entity, &self.info)),
        )
    }
}

impl<T> fmt::Debug for Records<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Records")
            .field("kind", &self.info.kind())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use dsr_store::{DatastoreOptions, Filter, InMemoryDatastore, StoreError};
    use dsr_types::Value;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        id: i64,
        name: String,
        age: u32,
    }

    impl Record for Person {
        const ID_FIELD: &'static str = "id";
    }

    fn person(id: i64) -> Person {
        Person {
            id,
            name: format!("person-{id}"),
            age: 20 + (id % 50) as u32,
        }
    }

    /// Wraps the in-memory store, recording call sizes and failing chosen
    /// write calls.
    #[derive(Default)]
    struct Recording {
        inner: InMemoryDatastore,
        puts: Mutex<Vec<usize>>,
        deletes: Mutex<Vec<usize>>,
        fail_calls: Vec<usize>,
    }

    impl Recording {
        fn failing(fail_calls: Vec<usize>) -> Self {
            Self {
                fail_calls,
                ..Self::default()
            }
        }

        fn record(&self, log: &Mutex<Vec<usize>>, size: usize) -> StoreResult<()> {
            let mut log = log.lock().expect("lock poisoned");
            log.push(size);
            if self.fail_calls.contains(&log.len()) {
                return Err(StoreError::Unavailable(format!("call {} rejected", log.len())));
            }
            Ok(())
        }

        fn puts(&self) -> Vec<usize> {
            self.puts.lock().expect("lock poisoned").clone()
        }

        fn deletes(&self) -> Vec<usize> {
            self.deletes.lock().expect("lock poisoned").clone()
        }
    }

    impl Datastore for Recording {
        fn options(&self) -> &DatastoreOptions {
            self.inner.options()
        }

        fn get(&self, key: &Key) -> StoreResult<Option<Entity>> {
            self.inner.get(key)
        }

        fn put(&self, entities: &[Entity]) -> StoreResult<()> {
            self.record(&self.puts, entities.len())?;
            self.inner.put(entities)
        }

        fn delete(&self, keys: &[Key]) -> StoreResult<()> {
            self.record(&self.deletes, keys.len())?;
            self.inner.delete(keys)
        }

        fn run(&self, query: &StructuredQuery) -> StoreResult<QueryResults> {
            self.inner.run(query)
        }
    }

    fn repo() -> (Arc<Recording>, Repository<Person>) {
        let store = Arc::new(Recording::default());
        let repo = Repository::new(store.clone()).unwrap();
        (store, repo)
    }

    fn people(n: i64) -> Vec<Person> {
        (1..=n).map(person).collect()
    }

    #[test]
    fn save_then_find() {
        let (_, repo) = repo();
        let key = repo.save(&person(1)).unwrap();
        assert_eq!(key.to_string(), "Person(1)");
        assert_eq!(repo.find_by_id(1).unwrap(), Some(person(1)));
        assert!(repo.exists_by_id(1).unwrap());
        assert_eq!(repo.find_by_id(2).unwrap(), None);
    }

    #[test]
    fn save_overwrites_existing() {
        let (_, repo) = repo();
        repo.save(&person(1)).unwrap();
        let renamed = Person {
            name: "renamed".into(),
            ..person(1)
        };
        repo.save(&renamed).unwrap();
        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(repo.find_by_id(1).unwrap(), Some(renamed));
    }

    #[test]
    fn delete_then_find_is_absent() {
        let (_, repo) = repo();
        repo.save_all(&people(3)).unwrap();
        repo.delete_by_id(2).unwrap();
        repo.delete(&person(3)).unwrap();
        assert_eq!(repo.find_by_id(2).unwrap(), None);
        assert_eq!(repo.find_by_id(3).unwrap(), None);
        assert_eq!(repo.count().unwrap(), 1);
        // Deleting a missing entity is not an error.
        repo.delete_by_id(2).unwrap();
    }

    #[test]
    fn save_all_batches_by_fifty() {
        for (n, expected) in [(0, vec![]), (50, vec![50]), (51, vec![50, 1]), (120, vec![50, 50, 20])] {
            let (store, repo) = repo();
            let keys = repo.save_all(&people(n)).unwrap();
            assert_eq!(keys.len(), n as usize);
            assert_eq!(store.puts(), expected, "{n} records");
        }
    }

    #[test]
    fn delete_all_batches_by_fifty() {
        let (store, repo) = repo();
        repo.save_all(&people(101)).unwrap();
        repo.delete_all().unwrap();
        assert_eq!(store.deletes(), vec![50, 50, 1]);
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn delete_all_records_batches_by_fifty() {
        let (store, repo) = repo();
        let all = people(60);
        repo.save_all(&all).unwrap();
        repo.delete_all_records(&all[..55]).unwrap();
        assert_eq!(store.deletes(), vec![50, 5]);
        assert_eq!(repo.count().unwrap(), 5);
    }

    #[test]
    fn failed_batch_does_not_stop_later_batches() {
        let store = Arc::new(Recording::failing(vec![1]));
        let repo = Repository::<Person>::new(store.clone()).unwrap();
        let err = repo.save_all(&people(120)).unwrap_err();
        match err {
            RepositoryError::Batch {
                failed, batches, ..
            } => {
                assert_eq!(failed, 1);
                assert_eq!(batches, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.puts(), vec![50, 50, 20]);
        // The first batch was rejected; the other two landed.
        assert_eq!(repo.count().unwrap(), 70);
        assert_eq!(repo.find_by_id(1).unwrap(), None);
        assert!(repo.find_by_id(51).unwrap().is_some());
    }

    #[test]
    fn find_all_by_id_preserves_order() {
        let (_, repo) = repo();
        repo.save_all(&people(5)).unwrap();
        let found = repo.find_all_by_id([4, 1, 3]).unwrap();
        let ids: Vec<i64> = found.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![4, 1, 3]);
        assert!(repo.find_all_by_id(Vec::<i64>::new()).unwrap().is_empty());
    }

    #[test]
    fn find_all_by_id_fails_on_missing() {
        let (_, repo) = repo();
        repo.save_all(&people(2)).unwrap();
        let err = repo.find_all_by_id([1, 9, 2]).unwrap_err();
        match err {
            RepositoryError::EntityNotFound { key } => assert_eq!(key.to_string(), "Person(9)"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn find_all_streams_every_record() {
        let (_, repo) = repo();
        repo.save_all(&people(7)).unwrap();
        let all = repo.find_all().unwrap().collect::<RepositoryResult<Vec<_>>>().unwrap();
        assert_eq!(all, people(7));
    }

    #[test]
    fn ancestor_scopes_isolate_records() {
        let (_, repo) = repo();
        {
            let _a = Context::with(PathElement::new("Org", "a"));
            repo.save_all(&people(3)).unwrap();
        }
        {
            let _b = Context::with(PathElement::new("Org", "b"));
            repo.save(&person(1)).unwrap();
            assert_eq!(repo.count().unwrap(), 1);
            assert_eq!(repo.find_by_id(2).unwrap(), None);
        }
        {
            let _a = Context::with(PathElement::new("Org", "a"));
            assert_eq!(repo.count().unwrap(), 3);
            assert_eq!(repo.key_for(1).unwrap().to_string(), r#"Org("a")/Person(1)"#);
            repo.delete_all().unwrap();
            assert_eq!(repo.count().unwrap(), 0);
        }
        // Outside any scope every Person is visible; scope b survived.
        assert_eq!(repo.count().unwrap(), 1);
    }

    #[test]
    fn nested_scope_keys_carry_full_path() {
        let (_, repo) = repo();
        let _ctx = Context::with_all([PathElement::new("Org", "acme"), PathElement::new("Team", 4)]);
        let key = repo.save(&person(1)).unwrap();
        assert_eq!(key.to_string(), r#"Org("acme")/Team(4)/Person(1)"#);
        assert_eq!(repo.find_all().unwrap().count(), 1);
    }

    #[test]
    fn query_runs_as_given() {
        let (_, repo) = repo();
        repo.save_all(&people(10)).unwrap();
        let query = StructuredQuery::entities("Person")
            .filter(Filter::ge("age", 25))
            .order_by(dsr_store::OrderBy::desc("age"))
            .limit(2);
        let found = repo.query(&query).unwrap().collect::<RepositoryResult<Vec<_>>>().unwrap();
        let ages: Vec<u32> = found.iter().map(|p| p.age).collect();
        assert_eq!(ages, vec![30, 29]);
    }

    #[test]
    fn unreadable_record_yields_error_item() {
        let (store, repo) = repo();
        repo.save_all(&people(3)).unwrap();
        let key = repo.key_for(2).unwrap();
        let mut broken = Entity::new(key);
        broken.set("name", 5);
        store.inner.put(&[broken]).unwrap();

        let items: Vec<_> = repo.find_all().unwrap().collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(RepositoryError::Marshalling { .. })));
        assert!(items[2].is_ok());
    }

    #[test]
    fn marshalling_failure_aborts_before_its_batch() {
        #[derive(Serialize, Deserialize)]
        struct Counter {
            id: String,
            hits: u64,
        }
        impl Record for Counter {
            const ID_FIELD: &'static str = "id";
        }

        let store = Arc::new(Recording::default());
        let repo = Repository::<Counter>::new(store.clone()).unwrap();
        let counters = [
            Counter {
                id: "ok".into(),
                hits: 1,
            },
            Counter {
                id: "big".into(),
                hits: u64::MAX,
            },
        ];
        let err = repo.save_all(&counters).unwrap_err();
        assert!(matches!(err, RepositoryError::Marshalling { .. }));
        assert!(store.puts().is_empty());
    }

    #[test]
    fn flattened_records_round_trip() {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Audit {
            id: String,
            created_by: String,
        }
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        struct Note {
            #[serde(flatten)]
            audit: Audit,
            body: String,
        }
        impl Record for Note {
            const ID_FIELD: &'static str = "id";
            const FIELDS: &'static [&'static str] = &["id", "created_by", "body"];
        }

        let store = Arc::new(InMemoryDatastore::new());
        let repo = Repository::<Note>::new(store.clone()).unwrap();
        let note = Note {
            audit: Audit {
                id: "n1".into(),
                created_by: "ada".into(),
            },
            body: "hello".into(),
        };
        let key = repo.save(&note).unwrap();
        assert_eq!(key.id(), &KeyId::Name("n1".into()));
        let stored = store.get(&key).unwrap().unwrap();
        assert_eq!(stored.get("created_by"), Some(&Value::from("ada")));
        assert!(!stored.contains("id"));
        assert_eq!(repo.find_by_id("n1").unwrap(), Some(note));
    }

    #[test]
    fn namespace_qualifies_keys() {
        let store = Arc::new(InMemoryDatastore::with_options(
            DatastoreOptions::new("proj").with_namespace("tenant"),
        ));
        let repo = Repository::<Person>::new(store).unwrap();
        let key = repo.save(&person(1)).unwrap();
        assert_eq!(key.project_id(), "proj");
        assert_eq!(key.namespace(), Some("tenant"));
        assert_eq!(repo.find_by_id(1).unwrap(), Some(person(1)));
    }
}
