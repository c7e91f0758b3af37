//! Query-method name grammar for datastore repositories.
//!
//! A repository declares derived queries by name, e.g.
//! `find_by_last_name_and_age_between_order_by_age_desc`. This crate parses
//! such names into a [`PredicateTree`]: an ordered conjunction of property
//! clauses, sort keys, an optional result limit and a [`ResultShape`].
//!
//! # Modules
//!
//! - [`error`] -- Error types for method-name parsing
//! - [`types`] -- [`PredicateTree`], [`Part`], [`PartType`], [`Sort`], [`ResultShape`]
//! - [`parser`] -- The method-name grammar
//!
//! Parsing validates every property against the domain type's declared
//! properties, so malformed or unsupported methods fail when they are
//! declared rather than when they are called.

pub mod error;
pub mod parser;
pub mod types;

pub use error::{QueryError, Result};
pub use types::{Part, PartType, PredicateTree, ResultShape, Sort, SortDirection};
