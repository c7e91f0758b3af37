//! Parsed query-method structures.
//!
//! A [`PredicateTree`] is built once per declared query method and reused for
//! every invocation. It holds no argument values; those are bound at
//! invocation time in declaration order.

use std::fmt;

/// The comparison a single clause performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PartType {
    /// `property`, `property_is`, `property_equals`.
    SimpleProperty,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    /// Strictly before; same comparison as `LessThan`.
    Before,
    /// Strictly after; same comparison as `GreaterThan`.
    After,
    /// Inclusive range over two bound arguments.
    Between,
    /// Equality with null; takes no argument.
    IsNull,
    /// Equality with `true`; takes no argument.
    True,
    /// Equality with `false`; takes no argument.
    False,
}

impl PartType {
    /// Number of bound arguments a clause of this type consumes.
    pub const fn arity(self) -> usize {
        match self {
            PartType::IsNull | PartType::True | PartType::False => 0,
            PartType::Between => 2,
            _ => 1,
        }
    }

    /// Whether the bound arguments take part in an ordering comparison.
    pub const fn is_range(self) -> bool {
        matches!(
            self,
            PartType::GreaterThan
                | PartType::GreaterThanEqual
                | PartType::LessThan
                | PartType::LessThanEqual
                | PartType::Before
                | PartType::After
                | PartType::Between
        )
    }

    /// Method-name keyword for this clause type (empty for plain equality).
    pub const fn keyword(self) -> &'static str {
        match self {
            PartType::SimpleProperty => "",
            PartType::GreaterThan => "greater_than",
            PartType::GreaterThanEqual => "greater_than_equal",
            PartType::LessThan => "less_than",
            PartType::LessThanEqual => "less_than_equal",
            PartType::Before => "before",
            PartType::After => "after",
            PartType::Between => "between",
            PartType::IsNull => "is_null",
            PartType::True => "is_true",
            PartType::False => "is_false",
        }
    }
}

/// One property predicate.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    pub property: String,
    pub part_type: PartType,
}

impl Part {
    pub fn new(property: impl Into<String>, part_type: PartType) -> Self {
        Self {
            property: property.into(),
            part_type,
        }
    }
}

impl fmt::Display for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.part_type {
            PartType::SimpleProperty => write!(f, "{}", self.property),
            other => write!(f, "{}_{}", self.property, other.keyword()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// One `order_by` key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sort {
    pub property: String,
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Result cardinality of a query method, fixed when it is declared.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResultShape {
    /// All results, materialised.
    Collection,
    /// All results, produced lazily as they are consumed.
    Stream,
    /// At most one result.
    Single,
}

/// Parsed form of a query-method name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PredicateTree {
    pub(crate) method: String,
    pub(crate) parts: Vec<Part>,
    pub(crate) sort: Vec<Sort>,
    pub(crate) limit: Option<usize>,
    pub(crate) shape: ResultShape,
}

impl PredicateTree {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Clauses in declaration order; they form a conjunction.
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    pub fn sort(&self) -> &[Sort] {
        &self.sort
    }

    /// Result limit from a `first`/`top` subject.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    pub fn shape(&self) -> ResultShape {
        self.shape
    }

    /// Total number of arguments an invocation must bind.
    pub fn parameter_count(&self) -> usize {
        self.parts.iter().map(|p| p.part_type.arity()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_by_type() {
        assert_eq!(PartType::SimpleProperty.arity(), 1);
        assert_eq!(PartType::Between.arity(), 2);
        assert_eq!(PartType::IsNull.arity(), 0);
        assert_eq!(PartType::True.arity(), 0);
        assert_eq!(PartType::After.arity(), 1);
    }

    #[test]
    fn range_types() {
        assert!(PartType::Between.is_range());
        assert!(PartType::Before.is_range());
        assert!(!PartType::SimpleProperty.is_range());
        assert!(!PartType::IsNull.is_range());
    }

    #[test]
    fn part_display_reconstructs_clause() {
        assert_eq!(Part::new("age", PartType::Between).to_string(), "age_between");
        assert_eq!(Part::new("name", PartType::SimpleProperty).to_string(), "name");
    }

    #[test]
    fn parameter_count_sums_arities() {
        let tree = PredicateTree {
            method: "find_by_a_and_b_between_and_c_is_null".into(),
            parts: vec![
                Part::new("a", PartType::SimpleProperty),
                Part::new("b", PartType::Between),
                Part::new("c", PartType::IsNull),
            ],
            sort: Vec::new(),
            limit: None,
            shape: ResultShape::Collection,
        };
        assert_eq!(tree.parameter_count(), 3);
    }
}
