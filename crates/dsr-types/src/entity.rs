use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::key::Key;
use crate::value::{PropertyMap, Value};

/// The store's semi-structured representation of a record: a key plus a bag
/// of named property values.
///
/// Entities returned by keys-only queries carry an empty property bag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    key: Key,
    properties: PropertyMap,
}

impl Entity {
    /// Create an entity with no properties.
    pub fn new(key: Key) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_properties(key: Key, properties: PropertyMap) -> Self {
        Self { key, properties }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Set a property, returning the previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.properties.insert(name.into(), value.into())
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.properties.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn properties(&self) -> &PropertyMap {
        &self.properties
    }

    /// Split into key and property bag.
    pub fn into_parts(self) -> (Key, PropertyMap) {
        (self.key, self.properties)
    }

    /// A copy of this entity carrying only its key.
    pub fn key_only(&self) -> Self {
        Self::new(self.key.clone())
    }
}
