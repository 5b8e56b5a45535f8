//! Search queries and their translation to the engine's native form.
//!
//! Callers search with either free text or a [`StructuredQuery`]:
//!
//! ```
//! use helios_index_sync::query::{NativeQuery, QueryTranslator, SearchQuery, StructuredQuery};
//!
//! // Free text is forwarded verbatim as query-string syntax
//! let native = QueryTranslator::translate(SearchQuery::from("name:bar AND city:Oslo"));
//! assert_eq!(native, NativeQuery::QueryString("name:bar AND city:Oslo".to_string()));
//!
//! // Structured queries pass straight through
//! let query = StructuredQuery::term("status", "active")
//!     .and(StructuredQuery::prefix("name", "jo"));
//! let native = QueryTranslator::translate(SearchQuery::from(query.clone()));
//! assert_eq!(native, NativeQuery::Structured(query));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pre-built structured query.
///
/// Semantics follow the usual boolean query model: every `must` clause has
/// to match, no `must_not` clause may match, and when there are no `must`
/// clauses at least one `should` clause has to match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuredQuery {
    /// Matches every document.
    MatchAll,

    /// Matches documents by identifier.
    Ids {
        /// Identifiers to match.
        values: Vec<String>,
    },

    /// Exact value match.
    ///
    /// On Elasticsearch, string values longer than `KEYWORD_IGNORE_ABOVE`
    /// (8191) characters are not kept for exact matching and never match.
    Term {
        /// Field name (dotted paths reach nested objects).
        field: String,
        /// Value to compare against.
        value: Value,
    },

    /// Analyzed full-text match; any query word may match.
    Match {
        /// Field name.
        field: String,
        /// Query text.
        text: String,
    },

    /// Word prefix match.
    Prefix {
        /// Field name.
        field: String,
        /// Prefix to look for.
        prefix: String,
    },

    /// Numeric range, bounds inclusive.
    Range {
        /// Field name.
        field: String,
        /// Lower bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<f64>,
        /// Upper bound.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<f64>,
    },

    /// Boolean combination.
    Bool {
        /// Clauses that must all match.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        must: Vec<StructuredQuery>,
        /// Optional clauses; required when `must` is empty.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        should: Vec<StructuredQuery>,
        /// Clauses that must not match.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        must_not: Vec<StructuredQuery>,
    },
}

impl StructuredQuery {
    /// Matches a single identifier.
    pub fn id(id: impl Into<String>) -> Self {
        StructuredQuery::Ids {
            values: vec![id.into()],
        }
    }

    /// Exact match on a field.
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        StructuredQuery::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Full-text match on a field.
    pub fn match_text(field: impl Into<String>, text: impl Into<String>) -> Self {
        StructuredQuery::Match {
            field: field.into(),
            text: text.into(),
        }
    }

    /// Word prefix match on a field.
    pub fn prefix(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        StructuredQuery::Prefix {
            field: field.into(),
            prefix: prefix.into(),
        }
    }

    /// Inclusive numeric range on a field.
    pub fn range(field: impl Into<String>, gte: Option<f64>, lte: Option<f64>) -> Self {
        StructuredQuery::Range {
            field: field.into(),
            gte,
            lte,
        }
    }

    /// Both `self` and `other` must match.
    pub fn and(self, other: StructuredQuery) -> Self {
        match self {
            StructuredQuery::Bool {
                mut must,
                should,
                must_not,
            } if should.is_empty() => {
                must.push(other);
                StructuredQuery::Bool {
                    must,
                    should,
                    must_not,
                }
            }
            this => StructuredQuery::Bool {
                must: vec![this, other],
                should: Vec::new(),
                must_not: Vec::new(),
            },
        }
    }

    /// Either `self` or `other` must match.
    pub fn or(self, other: StructuredQuery) -> Self {
        match self {
            StructuredQuery::Bool {
                must,
                mut should,
                must_not,
            } if must.is_empty() && must_not.is_empty() => {
                should.push(other);
                StructuredQuery::Bool {
                    must,
                    should,
                    must_not,
                }
            }
            this => StructuredQuery::Bool {
                must: Vec::new(),
                should: vec![this, other],
                must_not: Vec::new(),
            },
        }
    }

    /// Matches documents that `self` does not match.
    pub fn negate(self) -> Self {
        StructuredQuery::Bool {
            must: vec![StructuredQuery::MatchAll],
            should: Vec::new(),
            must_not: vec![self],
        }
    }
}

/// A search request as received from a caller.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQuery {
    /// Free text in the engine's query-string syntax.
    Text(String),
    /// A pre-built structured query.
    Structured(StructuredQuery),
}

impl From<&str> for SearchQuery {
    fn from(text: &str) -> Self {
        SearchQuery::Text(text.to_string())
    }
}

impl From<String> for SearchQuery {
    fn from(text: String) -> Self {
        SearchQuery::Text(text)
    }
}

impl From<StructuredQuery> for SearchQuery {
    fn from(query: StructuredQuery) -> Self {
        SearchQuery::Structured(query)
    }
}

/// A query in the form index clients execute.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeQuery {
    /// The engine's generic query-string syntax.
    QueryString(String),
    /// A structured query.
    Structured(StructuredQuery),
}

/// Turns caller queries into native queries.
///
/// Text is wrapped unmodified; no escaping is applied, so operator syntax in
/// the input is interpreted by the engine. Structured queries pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryTranslator;

impl QueryTranslator {
    /// Translates a caller query.
    pub fn translate(query: SearchQuery) -> NativeQuery {
        match query {
            SearchQuery::Text(text) => NativeQuery::QueryString(text),
            SearchQuery::Structured(query) => NativeQuery::Structured(query),
        }
    }
}
