use std::fmt;
use std::sync::Arc;

use dsr_query::{PredicateTree, ResultShape};
use dsr_store::{Datastore, StructuredQuery};
use dsr_types::Value;
use tracing::debug;

use crate::context::Context;
use crate::error::{RepositoryError, RepositoryResult};
use crate::metadata::{EntityInformation, Record};
use crate::query::creator::QueryCreator;
use crate::repository::Records;

/// State shared by every result shape: the parsed method and where to run it.
struct DerivedQuery<T> {
    tree: PredicateTree,
    info: EntityInformation<T>,
    datastore: Arc<dyn Datastore>,
}

impl<T: Record> DerivedQuery<T> {
    fn new(
        method: &str,
        shape: ResultShape,
        info: EntityInformation<T>,
        datastore: Arc<dyn Datastore>,
    ) -> RepositoryResult<Self> {
        let tree = PredicateTree::parse(method, shape, info.id_field(), info.properties())?;
        Ok(Self {
            tree,
            info,
            datastore,
        })
    }

    fn build(&self, args: &[Value]) -> RepositoryResult<StructuredQuery> {
        let ancestors = Context::ancestors();
        QueryCreator::new(&self.tree, self.info.kind())
            .with_property_types(self.info.property_types())
            .create(args, &ancestors, self.datastore.new_key_factory())
    }

    fn run(&self, query: &StructuredQuery) -> RepositoryResult<Records<T>> {
        let results = self.datastore.run(query)?;
        Ok(Records::new(results, self.info.clone()))
    }
}

impl<T> fmt::Debug for DerivedQuery<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedQuery")
            .field("method", &self.tree.method())
            .field("kind", &self.info.kind())
            .finish_non_exhaustive()
    }
}

/// A query method returning every match, materialised.
#[derive(Debug)]
pub struct CollectionQuery<T> {
    inner: DerivedQuery<T>,
}

impl<T: Record> CollectionQuery<T> {
    pub fn new(
        method: &str,
        info: EntityInformation<T>,
        datastore: Arc<dyn Datastore>,
    ) -> RepositoryResult<Self> {
        let inner = DerivedQuery::new(method, ResultShape::Collection, info, datastore)?;
        Ok(Self { inner })
    }

    pub fn tree(&self) -> &PredicateTree {
        &self.inner.tree
    }

    /// Run the query and collect every record. The first record that fails
    /// to unmarshal fails the call.
    pub fn execute(&self, args: &[Value]) -> RepositoryResult<Vec<T>> {
        let query = self.inner.build(args)?;
        let records = self.inner.run(&query)?.collect::<RepositoryResult<Vec<T>>>()?;
        debug!(method = self.inner.tree.method(), count = records.len(), "collection query finished");
        Ok(records)
    }
}

/// A query method producing matches lazily.
#[derive(Debug)]
pub struct StreamQuery<T> {
    inner: DerivedQuery<T>,
}

impl<T: Record> StreamQuery<T> {
    pub fn new(
        method: &str,
        info: EntityInformation<T>,
        datastore: Arc<dyn Datastore>,
    ) -> RepositoryResult<Self> {
        let inner = DerivedQuery::new(method, ResultShape::Stream, info, datastore)?;
        Ok(Self { inner })
    }

    pub fn tree(&self) -> &PredicateTree {
        &self.inner.tree
    }

    /// Run the query. Records are fetched and unmarshalled as the returned
    /// sequence is advanced; a record that fails to unmarshal yields an error
    /// item without ending the sequence.
    pub fn execute(&self, args: &[Value]) -> RepositoryResult<Records<T>> {
        let query = self.inner.build(args)?;
        self.inner.run(&query)
    }
}

/// A query method returning at most one match.
///
/// More than one match is an error rather than an arbitrary pick. Methods
/// with a `first`/`top` subject are exempt: the store's order (or the
/// declared sort) decides which match is returned.
#[derive(Debug)]
pub struct EntityQuery<T> {
    inner: DerivedQuery<T>,
}

impl<T: Record> EntityQuery<T> {
    pub fn new(
        method: &str,
        info: EntityInformation<T>,
        datastore: Arc<dyn Datastore>,
    ) -> RepositoryResult<Self> {
        let inner = DerivedQuery::new(method, ResultShape::Single, info, datastore)?;
        Ok(Self { inner })
    }

    pub fn tree(&self) -> &PredicateTree {
        &self.inner.tree
    }

    pub fn execute(&self, args: &[Value]) -> RepositoryResult<Option<T>> {
        let limited = self.inner.tree.limit().is_some();
        let mut query = self.inner.build(args)?;
        if !limited {
            // Two results are enough to detect ambiguity.
            query = query.limit(2);
        }
        let mut records = self.inner.run(&query)?;
        let first = records.next().transpose()?;
        if !limited && first.is_some() && records.next().is_some() {
            return Err(RepositoryError::NonUniqueResult {
                method: self.inner.tree.method().to_string(),
            });
        }
        Ok(first)
    }
}

/// A resolved query method of any result shape.
#[derive(Debug)]
pub enum RepositoryQuery<T> {
    Collection(CollectionQuery<T>),
    Stream(StreamQuery<T>),
    Single(EntityQuery<T>),
}

impl<T: Record> RepositoryQuery<T> {
    /// Parse `method` and pick the executor for `shape`.
    pub fn resolve(
        method: &str,
        shape: ResultShape,
        info: EntityInformation<T>,
        datastore: Arc<dyn Datastore>,
    ) -> RepositoryResult<Self> {
        Ok(match shape {
            ResultShape::Collection => {
                RepositoryQuery::Collection(CollectionQuery::new(method, info, datastore)?)
            }
            ResultShape::Stream => RepositoryQuery::Stream(StreamQuery::new(method, info, datastore)?),
            ResultShape::Single => RepositoryQuery::Single(EntityQuery::new(method, info, datastore)?),
        })
    }

    pub fn shape(&self) -> ResultShape {
        match self {
            RepositoryQuery::Collection(_) => ResultShape::Collection,
            RepositoryQuery::Stream(_) => ResultShape::Stream,
            RepositoryQuery::Single(_) => ResultShape::Single,
        }
    }

    pub fn tree(&self) -> &PredicateTree {
        match self {
            RepositoryQuery::Collection(q) => q.tree(),
            RepositoryQuery::Stream(q) => q.tree(),
            RepositoryQuery::Single(q) => q.tree(),
        }
    }

    pub fn execute(&self, args: &[Value]) -> RepositoryResult<QueryOutput<T>> {
        Ok(match self {
            RepositoryQuery::Collection(q) => QueryOutput::Collection(q.execute(args)?),
            RepositoryQuery::Stream(q) => QueryOutput::Stream(q.execute(args)?),
            RepositoryQuery::Single(q) => QueryOutput::Single(q.execute(args)?),
        })
    }
}

/// Result of [`RepositoryQuery::execute`], shaped as the method declared.
pub enum QueryOutput<T> {
    Collection(Vec<T>),
    Stream(Records<T>),
    Single(Option<T>),
}

impl<T: Record> QueryOutput<T> {
    /// Flatten into a vector, draining a stream.
    pub fn into_vec(self) -> RepositoryResult<Vec<T>> {
        match self {
            QueryOutput::Collection(records) => Ok(records),
            QueryOutput::Stream(records) => records.collect(),
            QueryOutput::Single(record) => Ok(record.into_iter().collect()),
        }
    }
}

impl<T> fmt::Debug for QueryOutput<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOutput::Collection(records) => write!(f, "Collection({} records)", records.len()),
            QueryOutput::Stream(_) => f.write_str("Stream(..)"),
            QueryOutput::Single(record) => write!(f, "Single({})", if record.is_some() { "found" } else { "none" }),
        }
    }
}
