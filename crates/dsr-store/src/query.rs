//! Structured queries: kind, conjunctive filters, ordering and limits.

use std::cmp::Ordering;
use std::fmt;

use dsr_types::{Entity, Key, Value};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Comparison operator of a property filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Equal,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
}

impl Operator {
    fn accepts(self, ord: Ordering) -> bool {
        match self {
            Operator::Equal => ord == Ordering::Equal,
            Operator::LessThan => ord == Ordering::Less,
            Operator::LessThanOrEqual => ord != Ordering::Greater,
            Operator::GreaterThan => ord == Ordering::Greater,
            Operator::GreaterThanOrEqual => ord != Ordering::Less,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Equal => "=",
            Operator::LessThan => "<",
            Operator::LessThanOrEqual => "<=",
            Operator::GreaterThan => ">",
            Operator::GreaterThanOrEqual => ">=",
        }
    }
}

/// A query filter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    /// Compare a named property against a value.
    Property {
        property: String,
        op: Operator,
        value: Value,
    },
    /// Restrict results to descendants of a key (the key itself included).
    HasAncestor(Key),
    /// Conjunction of filters.
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::property(property, Operator::Equal, value)
    }

    pub fn lt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::property(property, Operator::LessThan, value)
    }

    pub fn le(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::property(property, Operator::LessThanOrEqual, value)
    }

    pub fn gt(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::property(property, Operator::GreaterThan, value)
    }

    pub fn ge(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::property(property, Operator::GreaterThanOrEqual, value)
    }

    pub fn property(property: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        Filter::Property {
            property: property.into(),
            op,
            value: value.into(),
        }
    }

    pub fn has_ancestor(key: Key) -> Self {
        Filter::HasAncestor(key)
    }

    /// Combine filters into one conjunction. A single filter is returned as is.
    pub fn and(mut filters: Vec<Filter>) -> Option<Self> {
        match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Filter::And(filters)),
        }
    }

    /// The ancestor key this filter constrains, if any.
    pub fn ancestor(&self) -> Option<&Key> {
        match self {
            Filter::HasAncestor(key) => Some(key),
            Filter::And(filters) => filters.iter().find_map(Filter::ancestor),
            Filter::Property { .. } => None,
        }
    }

    /// Evaluate this filter against an entity.
    ///
    /// A property filter never matches an entity that lacks the property.
    /// Array properties match when any element satisfies the comparison.
    pub fn matches(&self, entity: &Entity) -> bool {
        match self {
            Filter::Property {
                property,
                op,
                value,
            } => match entity.get(property) {
                None => false,
                Some(Value::Array(items)) => items.iter().any(|item| op.accepts(item.compare(value))),
                Some(actual) => op.accepts(actual.compare(value)),
            },
            Filter::HasAncestor(ancestor) => entity.key().is_descendant_of(ancestor),
            Filter::And(filters) => filters.iter().all(|f| f.matches(entity)),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Property {
                property,
                op,
                value,
            } => write!(f, "{property} {} {value}", op.symbol()),
            Filter::HasAncestor(key) => write!(f, "HAS ANCESTOR {key}"),
            Filter::And(filters) => {
                for (i, filter) in filters.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    write!(f, "{filter}")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Ascending,
    Descending,
}

/// One sort key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub property: String,
    pub direction: Direction,
}

impl OrderBy {
    pub fn asc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Descending,
        }
    }
}

/// A query against one kind.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StructuredQuery {
    kind: String,
    filter: Option<Filter>,
    order_by: Vec<OrderBy>,
    limit: Option<usize>,
    keys_only: bool,
}

impl StructuredQuery {
    /// A query returning full entities of `kind`.
    pub fn entities(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filter: None,
            order_by: Vec::new(),
            limit: None,
            keys_only: false,
        }
    }

    /// A query returning only the keys of `kind` entities.
    pub fn keys(kind: impl Into<String>) -> Self {
        Self {
            keys_only: true,
            ..Self::entities(kind)
        }
    }

    /// Add a filter. Repeated calls are combined into a conjunction.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = match self.filter.take() {
            None => Some(filter),
            Some(Filter::And(mut existing)) => {
                existing.push(filter);
                Some(Filter::And(existing))
            }
            Some(existing) => Some(Filter::And(vec![existing, filter])),
        };
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn filter_ref(&self) -> Option<&Filter> {
        self.filter.as_ref()
    }

    pub fn orders(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    /// Whether `entity` belongs in this query's result set, ignoring limits.
    pub fn matches(&self, entity: &Entity) -> bool {
        if entity.key().kind() != self.kind {
            return false;
        }
        if let Some(filter) = &self.filter {
            if !filter.matches(entity) {
                return false;
            }
        }
        // Sorting on a property excludes entities that do not have it.
        self.order_by.iter().all(|o| entity.contains(&o.property))
    }

    /// Order two matching entities by this query's sort keys, then by key.
    pub fn compare(&self, a: &Entity, b: &Entity) -> Ordering {
        for order in &self.order_by {
            let (Some(left), Some(right)) = (a.get(&order.property), b.get(&order.property)) else {
                continue;
            };
            let ord = match order.direction {
                Direction::Ascending => left.compare(right),
                Direction::Descending => right.compare(left),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.key().cmp(b.key())
    }
}

impl fmt::Display for StructuredQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let select = if self.keys_only { "__key__" } else { "*" };
        write!(f, "SELECT {select} FROM {}", self.kind)?;
        if let Some(filter) = &self.filter {
            write!(f, " WHERE {filter}")?;
        }
        for (i, order) in self.order_by.iter().enumerate() {
            let sep = if i == 0 { " ORDER BY " } else { ", " };
            let dir = match order.direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            write!(f, "{sep}{} {dir}", order.property)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}

/// Lazy result sequence of a query.
///
/// Items are produced on demand; a backend may fetch them in pages. For
/// keys-only queries each entity carries an empty property bag.
pub struct QueryResults {
    inner: Box<dyn Iterator<Item = StoreResult<Entity>> + Send>,
}

impl QueryResults {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = StoreResult<Entity>> + Send + 'static,
    {
        Self {
            inner: Box::new(iter),
        }
    }

    /// Results with no items.
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Project every item onto its key.
    pub fn keys(self) -> impl Iterator<Item = StoreResult<Key>> {
        self.map(|item| item.map(|entity| entity.into_parts().0))
    }
}

impl Iterator for QueryResults {
    type Item = StoreResult<Entity>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl fmt::Debug for QueryResults {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResults").finish_non_exhaustive()
    }
}
