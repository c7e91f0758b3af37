use std::sync::Arc;

use dsr_query::ResultShape;
use dsr_store::{Datastore, DatastoreOptions, InMemoryDatastore};
use tracing::info;

use crate::error::RepositoryResult;
use crate::metadata::{EntityInformation, Record};
use crate::query::RepositoryQuery;
use crate::repository::Repository;

/// Creates repositories and query methods that share one store handle.
#[derive(Clone)]
pub struct RepositoryFactory {
    datastore: Arc<dyn Datastore>,
}

impl RepositoryFactory {
    pub fn new(datastore: Arc<dyn Datastore>) -> Self {
        Self { datastore }
    }

    /// Factory over a fresh in-memory store configured by `options`.
    pub fn in_memory(options: DatastoreOptions) -> RepositoryResult<Self> {
        options.validate()?;
        info!(
            project_id = %options.project_id,
            namespace = options.namespace.as_deref().unwrap_or(""),
            "opening in-memory datastore"
        );
        Ok(Self::new(Arc::new(InMemoryDatastore::with_options(options))))
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    pub fn entity_information<T: Record>(&self) -> RepositoryResult<EntityInformation<T>> {
        EntityInformation::new()
    }

    pub fn repository<T: Record>(&self) -> RepositoryResult<Repository<T>> {
        Repository::new(Arc::clone(&self.datastore))
    }

    /// Parse `method` against `T`'s properties and return its executor.
    ///
    /// Malformed names fail here, not on first invocation.
    pub fn resolve_query<T: Record>(
        &self,
        method: &str,
        shape: ResultShape,
    ) -> RepositoryResult<RepositoryQuery<T>> {
        RepositoryQuery::resolve(
            method,
            shape,
            EntityInformation::new()?,
            Arc::clone(&self.datastore),
        )
    }
}

impl std::fmt::Debug for RepositoryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryFactory")
            .field("project_id", &self.datastore.options().project_id)
            .finish_non_exhaustive()
    }
}
