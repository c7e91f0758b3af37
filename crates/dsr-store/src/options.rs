//! Connection-free store configuration.

use std::path::Path;

use dsr_types::KeyFactory;
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// Options shared read-only by every component that talks to a store.
///
/// Loadable from TOML:
///
/// ```toml
/// project_id = "my-project"
/// namespace = "tenant-a"
/// query_page_size = 200
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatastoreOptions {
    /// Project every key is qualified with.
    pub project_id: String,
    /// Optional namespace partition.
    pub namespace: Option<String>,
    /// Number of entities fetched per page while a query result is iterated.
    pub query_page_size: usize,
}

impl Default for DatastoreOptions {
    fn default() -> Self {
        Self {
            project_id: "local".into(),
            namespace: None,
            query_page_size: 100,
        }
    }
}

impl DatastoreOptions {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            ..Default::default()
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_query_page_size(mut self, size: usize) -> Self {
        self.query_page_size = size;
        self
    }

    /// Parse and validate options from TOML text.
    pub fn from_toml_str(text: &str) -> StoreResult<Self> {
        let options: Self =
            toml::from_str(text).map_err(|e| StoreError::InvalidConfig(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Read, parse and validate options from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let options = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), project = %options.project_id, "loaded datastore options");
        Ok(options)
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.project_id.trim().is_empty() {
            return Err(StoreError::InvalidConfig("project_id must not be empty".into()));
        }
        if self.namespace.as_deref().is_some_and(str::is_empty) {
            return Err(StoreError::InvalidConfig(
                "namespace must be omitted rather than empty".into(),
            ));
        }
        if self.query_page_size == 0 {
            return Err(StoreError::InvalidConfig(
                "query_page_size must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// A key factory qualified with this project and namespace.
    pub fn key_factory(&self) -> KeyFactory {
        KeyFactory::new(self.project_id.clone()).set_namespace(self.namespace.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_options() {
        let o = DatastoreOptions::default();
        assert_eq!(o.project_id, "local");
        assert!(o.namespace.is_none());
        assert_eq!(o.query_page_size, 100);
        assert!(o.validate().is_ok());
    }

    #[test]
    fn parse_full_toml() {
        let o = DatastoreOptions::from_toml_str(
            "project_id = \"demo\"\nnamespace = \"tenant-a\"\nquery_page_size = 10\n",
        )
        .unwrap();
        assert_eq!(o, DatastoreOptions::new("demo").with_namespace("tenant-a").with_query_page_size(10));
    }

    #[test]
    fn missing_fields_take_defaults() {
        let o = DatastoreOptions::from_toml_str("project_id = \"demo\"").unwrap();
        assert_eq!(o.query_page_size, 100);
        assert!(o.namespace.is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = DatastoreOptions::from_toml_str("project = \"demo\"").unwrap_err();
        assert!(matches!(err, StoreError::InvalidConfig(_)));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(DatastoreOptions::from_toml_str("project_id = \"\"").is_err());
        assert!(DatastoreOptions::from_toml_str("query_page_size = 0").is_err());
        assert!(DatastoreOptions::from_toml_str("namespace = \"\"").is_err());
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "project_id = \"from-file\"").unwrap();
        let o = DatastoreOptions::load(file.path()).unwrap();
        assert_eq!(o.project_id, "from-file");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = DatastoreOptions::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn key_factory_is_qualified() {
        let key = DatastoreOptions::new("p")
            .with_namespace("ns")
            .key_factory()
            .set_kind("K")
            .new_key(1)
            .unwrap();
        assert_eq!(key.project_id(), "p");
        assert_eq!(key.namespace(), Some("ns"));
    }
}
