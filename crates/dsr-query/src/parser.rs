//! Query-method name grammar.
//!
//! Method names are snake_case and follow the shape
//!
//! ```text
//! <prefix>[_<subject>]_by_<clause>[_and_<clause>...][_order_by_<sort>]
//! <prefix>[_<subject>][_order_by_<sort>]
//! ```
//!
//! - prefix: `find`, `read`, `get`, `query`, `search`, `stream`
//! - subject: free words, plus `first`/`top` with an optional count
//!   (`first`, `first3`, `top_10`) limiting the result size
//! - clause: `<property>[_<keyword>]`, keyword one of `is`, `equals`,
//!   `greater_than`, `greater_than_equal`, `less_than`, `less_than_equal`,
//!   `before`, `after`, `between`, `is_null`, `is_true`, `is_false`
//! - sort: `<property>[_asc|_desc]`, repeated, optionally joined by `_and_`
//!
//! Properties are resolved against the domain type's declared properties, so
//! a property whose name ends in a keyword-like word still parses as long as
//! the whole clause names a declared property.

use crate::error::{QueryError, Result};
use crate::types::{Part, PartType, PredicateTree, ResultShape, Sort, SortDirection};

const PREFIXES: &[&str] = &["find", "read", "get", "query", "search", "stream"];

/// Supported clause keywords, longest first so that `greater_than_equal`
/// wins over `greater_than`.
const KEYWORDS: &[(&str, PartType)] = &[
    ("greater_than_equal", PartType::GreaterThanEqual),
    ("less_than_equal", PartType::LessThanEqual),
    ("greater_than", PartType::GreaterThan),
    ("less_than", PartType::LessThan),
    ("is_false", PartType::False),
    ("is_true", PartType::True),
    ("is_null", PartType::IsNull),
    ("between", PartType::Between),
    ("equals", PartType::SimpleProperty),
    ("before", PartType::Before),
    ("after", PartType::After),
    ("is", PartType::SimpleProperty),
];

/// Keywords of the wider method-name grammar that this store cannot express.
const UNSUPPORTED_KEYWORDS: &[&str] = &[
    "is_not_empty",
    "starting_with",
    "is_not_null",
    "ending_with",
    "ignore_case",
    "containing",
    "not_null",
    "is_empty",
    "not_like",
    "not_in",
    "is_not",
    "exists",
    "within",
    "regex",
    "like",
    "near",
    "not",
    "in",
];

/// Subject words that change query semantics in ways the store cannot honour.
const UNSUPPORTED_SUBJECTS: &[&str] = &["distinct", "count", "exists", "delete", "remove"];

impl PredicateTree {
    /// Parse a query-method name against the declared properties of a type.
    ///
    /// `properties` are the non-identity property names; `id_field` is the
    /// identity field, which is rejected in predicates and sorts because it
    /// lives in the key rather than the property bag.
    ///
    /// # Examples
    ///
    /// ```
    /// use dsr_query::{PartType, PredicateTree, ResultShape};
    ///
    /// let props = ["last_name".to_string(), "age".to_string()];
    /// let tree = PredicateTree::parse(
    ///     "find_by_last_name_and_age_between_order_by_age_desc",
    ///     ResultShape::Collection,
    ///     "id",
    ///     &props,
    /// )
    /// .unwrap();
    /// assert_eq!(tree.parts().len(), 2);
    /// assert_eq!(tree.parts()[1].part_type, PartType::Between);
    /// assert_eq!(tree.parameter_count(), 3);
    /// ```
    pub fn parse(
        method: &str,
        shape: ResultShape,
        id_field: &str,
        properties: &[String],
    ) -> Result<Self> {
        let parser = Parser {
            method,
            id_field,
            properties,
        };
        let tree = parser.parse(shape)?;
        tracing::debug!(
            method,
            parts = tree.parts.len(),
            sorts = tree.sort.len(),
            limit = ?tree.limit,
            shape = ?tree.shape,
            "parsed query method"
        );
        Ok(tree)
    }
}

struct Parser<'a> {
    method: &'a str,
    id_field: &'a str,
    properties: &'a [String],
}

impl Parser<'_> {
    fn parse(&self, shape: ResultShape) -> Result<PredicateTree> {
        let rest = self.strip_prefix()?;

        let (head, sort_clause) = match find_word(rest, "order_by") {
            Some(idx) => {
                let sort = &rest[idx + "order_by".len()..];
                let sort = sort.strip_prefix('_').unwrap_or(sort);
                (rest[..idx].trim_end_matches('_'), Some(sort))
            }
            None => (rest, None),
        };

        let (subject, predicate) = if let Some(body) = head.strip_prefix("by_") {
            ("", Some(body))
        } else if let Some(idx) = head.find("_by_") {
            (&head[..idx], Some(&head[idx + "_by_".len()..]))
        } else {
            (head, None)
        };
        // A trailing `by` only counts as a predicate marker when no
        // predicate body was found; `created_by` may be a property.
        let dangling_by = predicate.is_none() && (head == "by" || head.ends_with("_by"));
        if dangling_by || predicate.is_some_and(str::is_empty) {
            return Err(QueryError::EmptyPredicate {
                method: self.method.to_string(),
            });
        }

        let limit = self.parse_subject(subject)?;
        let parts = match predicate {
            Some(body) => self.parse_predicate(body)?,
            None => Vec::new(),
        };
        let sort = match sort_clause {
            Some(clause) => self.parse_sort(clause)?,
            None => Vec::new(),
        };

        Ok(PredicateTree {
            method: self.method.to_string(),
            parts,
            sort,
            limit,
            shape,
        })
    }

    fn strip_prefix(&self) -> Result<&str> {
        for prefix in PREFIXES {
            if self.method == *prefix {
                return Ok("");
            }
            if let Some(rest) = self
                .method
                .strip_prefix(prefix)
                .and_then(|r| r.strip_prefix('_'))
            {
                return Ok(rest);
            }
        }
        Err(QueryError::UnsupportedPrefix {
            method: self.method.to_string(),
        })
    }

    fn parse_subject(&self, subject: &str) -> Result<Option<usize>> {
        let mut limit = None;
        let mut words = subject.split('_').filter(|w| !w.is_empty()).peekable();
        while let Some(word) = words.next() {
            if UNSUPPORTED_SUBJECTS.contains(&word) {
                return Err(QueryError::UnsupportedSubject {
                    method: self.method.to_string(),
                    word: word.to_string(),
                });
            }
            let digits = word
                .strip_prefix("first")
                .or_else(|| word.strip_prefix("top"));
            let Some(digits) = digits else {
                continue;
            };
            if !digits.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let count = if !digits.is_empty() {
                digits
            } else if let Some(next) = words.next_if(|w| w.chars().all(|c| c.is_ascii_digit())) {
                next
            } else {
                "1"
            };
            match count.parse::<usize>() {
                Ok(n) if n > 0 => limit = Some(n),
                _ => {
                    return Err(QueryError::InvalidLimit {
                        method: self.method.to_string(),
                        subject: subject.to_string(),
                    })
                }
            }
        }
        Ok(limit)
    }

    fn parse_predicate(&self, body: &str) -> Result<Vec<Part>> {
        if body.is_empty() {
            return Err(QueryError::EmptyPredicate {
                method: self.method.to_string(),
            });
        }
        if !self.is_property(body) && split_word(body, "or").len() > 1 {
            return Err(QueryError::UnsupportedOr {
                method: self.method.to_string(),
            });
        }
        self.split_clauses(body)
            .into_iter()
            .map(|clause| self.parse_clause(clause))
            .collect()
    }

    /// Split on `_and_`, keeping `and` inside a clause when the joined text
    /// names a declared property (e.g. `terms_and_conditions`).
    fn split_clauses<'b>(&self, body: &'b str) -> Vec<&'b str> {
        let pieces = split_word(body, "and");
        let mut clauses = Vec::new();
        let mut start = 0;
        let mut i = 0;
        while i < pieces.len() {
            let end = pieces[i].1;
            let candidate = &body[start..end];
            let extends = i + 1 < pieces.len() && {
                let joined = &body[start..pieces[i + 1].1];
                self.clause_resolves(joined) && !self.clause_resolves(candidate)
            };
            if !extends {
                clauses.push(candidate);
                start = end + "_and_".len();
            }
            i += 1;
        }
        clauses
    }

    fn clause_resolves(&self, clause: &str) -> bool {
        self.is_property(clause)
            || KEYWORDS
                .iter()
                .map(|(kw, _)| *kw)
                .chain(UNSUPPORTED_KEYWORDS.iter().copied())
                .any(|kw| strip_keyword(clause, kw).is_some_and(|p| self.is_known(p)))
    }

    fn parse_clause(&self, clause: &str) -> Result<Part> {
        if self.is_known(clause) {
            return self.part(clause, PartType::SimpleProperty);
        }

        // Try every keyword, longest first, and keep the first whose
        // remainder is a declared property.
        let mut candidates: Vec<(&str, Option<PartType>)> = KEYWORDS
            .iter()
            .map(|(kw, t)| (*kw, Some(*t)))
            .chain(UNSUPPORTED_KEYWORDS.iter().map(|kw| (*kw, None)))
            .collect();
        candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        for (keyword, part_type) in &candidates {
            let Some(property) = strip_keyword(clause, keyword) else {
                continue;
            };
            if !self.is_known(property) {
                continue;
            }
            return match part_type {
                Some(part_type) => self.part(property, *part_type),
                None => Err(QueryError::UnsupportedKeyword {
                    method: self.method.to_string(),
                    clause: clause.to_string(),
                    keyword: (*keyword).to_string(),
                }),
            };
        }

        // Nothing resolved: report an unsupported keyword if the clause ends
        // in one, otherwise an unknown property.
        if let Some(keyword) = UNSUPPORTED_KEYWORDS
            .iter()
            .find(|kw| strip_keyword(clause, kw).is_some())
        {
            return Err(QueryError::UnsupportedKeyword {
                method: self.method.to_string(),
                clause: clause.to_string(),
                keyword: (*keyword).to_string(),
            });
        }
        let property = KEYWORDS
            .iter()
            .find_map(|(kw, _)| strip_keyword(clause, kw))
            .unwrap_or(clause);
        Err(QueryError::UnknownProperty {
            method: self.method.to_string(),
            property: property.to_string(),
        })
    }

    fn parse_sort(&self, clause: &str) -> Result<Vec<Sort>> {
        if clause.is_empty() {
            return Err(QueryError::InvalidSort {
                method: self.method.to_string(),
                reason: "no sort property after `order_by`".into(),
            });
        }

        let mut sorts = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        for word in clause.split('_') {
            let direction = match word {
                "asc" => Some(SortDirection::Asc),
                "desc" => Some(SortDirection::Desc),
                "and" if !pending.is_empty() && self.is_known(&pending.join("_")) => {
                    sorts.push(self.sort_key(&pending.join("_"), SortDirection::Asc)?);
                    pending.clear();
                    continue;
                }
                _ => None,
            };
            match direction {
                Some(direction) if !pending.is_empty() => {
                    sorts.push(self.sort_key(&pending.join("_"), direction)?);
                    pending.clear();
                }
                Some(_) => {
                    return Err(QueryError::InvalidSort {
                        method: self.method.to_string(),
                        reason: format!("direction `{word}` without a property"),
                    })
                }
                None => pending.push(word),
            }
        }
        if !pending.is_empty() {
            sorts.push(self.sort_key(&pending.join("_"), SortDirection::Asc)?);
        }
        Ok(sorts)
    }

    fn sort_key(&self, property: &str, direction: SortDirection) -> Result<Sort> {
        self.check_property(property)?;
        Ok(Sort {
            property: property.to_string(),
            direction,
        })
    }

    fn part(&self, property: &str, part_type: PartType) -> Result<Part> {
        self.check_property(property)?;
        Ok(Part::new(property, part_type))
    }

    fn check_property(&self, property: &str) -> Result<()> {
        if property == self.id_field {
            return Err(QueryError::IdentityPredicate {
                method: self.method.to_string(),
                property: property.to_string(),
            });
        }
        if !self.is_property(property) {
            return Err(QueryError::UnknownProperty {
                method: self.method.to_string(),
                property: property.to_string(),
            });
        }
        Ok(())
    }

    /// Declared non-identity property.
    fn is_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p == name)
    }

    /// Declared property or the identity field (the latter is rejected later
    /// with a dedicated error).
    fn is_known(&self, name: &str) -> bool {
        name == self.id_field || self.is_property(name)
    }
}

/// Position of `word` in `text` where it forms whole `_`-separated words.
fn find_word(text: &str, word: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(pos) = text[from..].find(word) {
        let idx = from + pos;
        let end = idx + word.len();
        let starts = idx == 0 || text.as_bytes()[idx - 1] == b'_';
        let ends = end == text.len() || text.as_bytes()[end] == b'_';
        if starts && ends {
            return Some(idx);
        }
        from = idx + 1;
    }
    None
}

/// Split `text` on `_<word>_`, returning `(start, end)` byte ranges of the
/// pieces between separators.
fn split_word(text: &str, word: &str) -> Vec<(usize, usize)> {
    let separator = format!("_{word}_");
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut from = 0;
    while let Some(pos) = text[from..].find(&separator) {
        let idx = from + pos;
        pieces.push((start, idx));
        start = idx + separator.len();
        from = start;
    }
    pieces.push((start, text.len()));
    pieces
}

/// `clause` without a trailing `_<keyword>`, if it has one.
fn strip_keyword<'c>(clause: &'c str, keyword: &str) -> Option<&'c str> {
    clause
        .strip_suffix(keyword)
        .and_then(|rest| rest.strip_suffix('_'))
        .filter(|rest| !rest.is_empty())
}
