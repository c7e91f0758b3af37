//! Foundation types for datastore repositories.
//!
//! This crate provides the key, value and entity types shared by the store
//! boundary and the repository layer.
//!
//! # Key Types
//!
//! - [`PathElement`] -- One `(kind, identifier)` segment of a hierarchical key
//! - [`KeyId`] -- Integer-id or string-name identifier
//! - [`Key`] -- Fully-qualified key: ancestor path plus terminal segment
//! - [`KeyFactory`] -- Builds keys for a project/namespace
//! - [`Value`] -- Typed property value
//! - [`Entity`] -- Key plus property bag

pub mod entity;
pub mod error;
pub mod key;
pub mod value;

pub use entity::Entity;
pub use error::TypeError;
pub use key::{derive_key, Key, KeyFactory, KeyId, PathElement};
pub use value::{PropertyMap, Value, ValueType};
