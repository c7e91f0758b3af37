//! Translation of a parsed query method plus its arguments into a store query.

use dsr_query::{PartType, PredicateTree, SortDirection};
use dsr_store::{Filter, OrderBy, StructuredQuery};
use dsr_types::{KeyFactory, PathElement, Value, ValueType};
use tracing::debug;

use crate::error::{RepositoryError, RepositoryResult};

/// Builds [`StructuredQuery`] values for one query method.
///
/// Clauses become property filters joined by conjunction, sort keys become
/// orderings, and a `first`/`top` subject becomes the result limit. When an
/// ancestor scope is active the query is additionally restricted to
/// descendants of the innermost ancestor.
#[derive(Debug, Clone, Copy)]
pub struct QueryCreator<'a> {
    tree: &'a PredicateTree,
    kind: &'a str,
    property_types: &'a [(&'static str, ValueType)],
}

impl<'a> QueryCreator<'a> {
    pub fn new(tree: &'a PredicateTree, kind: &'a str) -> Self {
        Self {
            tree,
            kind,
            property_types: &[],
        }
    }

    /// Declared stored types that bound arguments must agree with.
    pub fn with_property_types(mut self, property_types: &'a [(&'static str, ValueType)]) -> Self {
        self.property_types = property_types;
        self
    }

    /// Bind `args` positionally and build the query.
    ///
    /// Arguments are validated before anything is built: the count must
    /// match the method's parameters, range bounds must be orderable, both
    /// bounds of a `between` clause must share a type, and an argument for a
    /// property with a declared type must share that type's rank.
    pub fn create(
        &self,
        args: &[Value],
        ancestors: &[PathElement],
        factory: KeyFactory,
    ) -> RepositoryResult<StructuredQuery> {
        let expected = self.tree.parameter_count();
        if args.len() != expected {
            return Err(self.mismatch(format!(
                "expected {expected} argument(s), got {}",
                args.len()
            )));
        }

        let mut query = StructuredQuery::entities(self.kind);
        let mut next = 0;
        for part in self.tree.parts() {
            let bound = &args[next..next + part.part_type.arity()];
            next += bound.len();
            let property = part.property.as_str();
            for value in bound {
                self.check_declared(property, value)?;
            }
            for filter in self.filters_for(property, part.part_type, bound)? {
                query = query.filter(filter);
            }
        }

        if let Some(filter) = ancestor_filter(ancestors, factory)? {
            query = query.filter(filter);
        }
        for sort in self.tree.sort() {
            query = query.order_by(match sort.direction {
                SortDirection::Asc => OrderBy::asc(&sort.property),
                SortDirection::Desc => OrderBy::desc(&sort.property),
            });
        }
        if let Some(limit) = self.tree.limit() {
            query = query.limit(limit);
        }

        debug!(method = self.tree.method(), query = %query, "built query");
        Ok(query)
    }

    fn filters_for(
        &self,
        property: &str,
        part_type: PartType,
        bound: &[Value],
    ) -> RepositoryResult<Vec<Filter>> {
        let filters = match (part_type, bound) {
            (PartType::SimpleProperty, [value]) => {
                if matches!(value.value_type(), ValueType::Array | ValueType::Entity) {
                    return Err(self.mismatch(format!(
                        "`{property}` cannot be compared for equality with {}",
                        value.value_type()
                    )));
                }
                vec![Filter::eq(property, value.clone())]
            }
            (PartType::GreaterThan | PartType::After, [value]) => {
                self.check_orderable(property, value)?;
                vec![Filter::gt(property, value.clone())]
            }
            (PartType::GreaterThanEqual, [value]) => {
                self.check_orderable(property, value)?;
                vec![Filter::ge(property, value.clone())]
            }
            (PartType::LessThan | PartType::Before, [value]) => {
                self.check_orderable(property, value)?;
                vec![Filter::lt(property, value.clone())]
            }
            (PartType::LessThanEqual, [value]) => {
                self.check_orderable(property, value)?;
                vec![Filter::le(property, value.clone())]
            }
            (PartType::Between, [lower, upper]) => {
                self.check_orderable(property, lower)?;
                self.check_orderable(property, upper)?;
                if lower.value_type().rank() != upper.value_type().rank() {
                    return Err(self.mismatch(format!(
                        "`{property}` bounds differ in type: {} and {}",
                        lower.value_type(),
                        upper.value_type()
                    )));
                }
                vec![
                    Filter::ge(property, lower.clone()),
                    Filter::le(property, upper.clone()),
                ]
            }
            (PartType::IsNull, []) => vec![Filter::eq(property, Value::Null)],
            (PartType::True, []) => vec![Filter::eq(property, true)],
            (PartType::False, []) => vec![Filter::eq(property, false)],
            // Arity is fixed per part type and checked against the total above.
            _ => return Err(self.mismatch(format!("`{property}` bound to the wrong number of arguments"))),
        };
        Ok(filters)
    }

    fn check_orderable(&self, property: &str, value: &Value) -> RepositoryResult<()> {
        if value.value_type().is_orderable() {
            Ok(())
        } else {
            Err(self.mismatch(format!(
                "`{property}` range bound must be orderable, got {}",
                value.value_type()
            )))
        }
    }

    fn check_declared(&self, property: &str, value: &Value) -> RepositoryResult<()> {
        let Some(declared) = self
            .property_types
            .iter()
            .find(|(name, _)| *name == property)
            .map(|(_, value_type)| *value_type)
        else {
            return Ok(());
        };
        let actual = value.value_type();
        if declared == ValueType::Array
            || actual == ValueType::Null
            || actual.rank() == declared.rank()
        {
            return Ok(());
        }
        Err(self.mismatch(format!("`{property}` is declared as {declared}, got {actual}")))
    }

    fn mismatch(&self, reason: String) -> RepositoryError {
        RepositoryError::ArgumentMismatch {
            method: self.tree.method().to_string(),
            reason,
        }
    }
}

/// Restriction to descendants of the innermost of `ancestors`.
///
/// The innermost segment becomes the ancestor key and the earlier segments
/// its parent path. Returns `None` when no ancestors are active.
pub fn ancestor_filter(
    ancestors: &[PathElement],
    factory: KeyFactory,
) -> RepositoryResult<Option<Filter>> {
    let Some((innermost, parents)) = ancestors.split_last() else {
        return Ok(None);
    };
    let key = factory
        .set_kind(innermost.kind())
        .add_ancestors(parents.iter().cloned())
        .new_key(innermost.id().clone())?;
    Ok(Some(Filter::has_ancestor(key)))
}
