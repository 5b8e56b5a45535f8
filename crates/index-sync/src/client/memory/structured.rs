//! Builds Tantivy queries from [`StructuredQuery`] trees.

use std::ops::Bound;

use serde_json::Value;
use tantivy::Term;
use tantivy::query::{
    AllQuery, BooleanQuery, EmptyQuery, Occur, Query, RangeQuery, RegexQuery, TermQuery,
};
use tantivy::schema::IndexRecordOption;

use crate::query::StructuredQuery;
use crate::types::Document;

use super::schema::{CollectionSchema, PATH_SEPARATOR, tokens};

/// Translates `query` against the collection schema.
pub(crate) fn to_tantivy(schema: &CollectionSchema, query: &StructuredQuery) -> Box<dyn Query> {
    match query {
        StructuredQuery::MatchAll => Box::new(AllQuery),
        StructuredQuery::Ids { values } => any_of(values.iter().map(|id| id_term(schema, id))),
        StructuredQuery::Term { field, value } if field == Document::ID_FIELD => match value {
            Value::String(id) => id_term(schema, id),
            _ => Box::new(EmptyQuery),
        },
        StructuredQuery::Term { field, value } => {
            let mut term = Term::from_field_json_path(schema.exact, field, false);
            match value {
                Value::String(s) => term.append_type_and_str(s),
                Value::Bool(b) => term.append_type_and_fast_value(*b),
                Value::Number(n) => {
                    if let Some(i) = n.as_i64() {
                        term.append_type_and_fast_value(i);
                    } else if let Some(u) = n.as_u64() {
                        term.append_type_and_fast_value(u);
                    } else if let Some(f) = n.as_f64() {
                        term.append_type_and_fast_value(f);
                    }
                }
                _ => return Box::new(EmptyQuery),
            }
            Box::new(TermQuery::new(term, IndexRecordOption::Basic))
        }
        StructuredQuery::Match { field, text } if field == Document::ID_FIELD => {
            id_term(schema, text)
        }
        StructuredQuery::Match { field, text } => any_of(tokens(text).into_iter().map(|token| {
            let mut term = Term::from_field_json_path(schema.body, field, false);
            term.append_type_and_str(&token);
            Box::new(TermQuery::new(term, IndexRecordOption::Basic)) as Box<dyn Query>
        })),
        StructuredQuery::Prefix { field, prefix } => {
            let (pattern, target) = if field == Document::ID_FIELD {
                (format!("{}.*", regex::escape(prefix)), schema.id)
            } else {
                let wanted = format!("{field}{PATH_SEPARATOR}{}", prefix.to_lowercase());
                (format!("{}.*", regex::escape(&wanted)), schema.prefix)
            };
            match RegexQuery::from_pattern(&pattern, target) {
                Ok(query) => Box::new(query),
                Err(e) => {
                    tracing::debug!(field = %field, error = %e, "Unusable prefix pattern");
                    Box::new(EmptyQuery)
                }
            }
        }
        StructuredQuery::Range { field, gte, lte } => {
            let bound = |value: f64| {
                let mut term = Term::from_field_json_path(schema.body, field, false);
                term.append_type_and_fast_value(value);
                Bound::Included(term)
            };
            Box::new(RangeQuery::new(
                bound(gte.unwrap_or(f64::MIN)),
                bound(lte.unwrap_or(f64::MAX)),
            ))
        }
        StructuredQuery::Bool {
            must,
            should,
            must_not,
        } => {
            let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();
            clauses.extend(must.iter().map(|q| (Occur::Must, to_tantivy(schema, q))));
            clauses.extend(should.iter().map(|q| (Occur::Should, to_tantivy(schema, q))));
            clauses.extend(
                must_not
                    .iter()
                    .map(|q| (Occur::MustNot, to_tantivy(schema, q))),
            );
            // Pure negations and empty bools start from every document
            if must.is_empty() && should.is_empty() {
                clauses.push((Occur::Must, Box::new(AllQuery)));
            }
            Box::new(BooleanQuery::new(clauses))
        }
    }
}

fn id_term(schema: &CollectionSchema, id: &str) -> Box<dyn Query> {
    Box::new(TermQuery::new(
        Term::from_field_text(schema.id, id),
        IndexRecordOption::Basic,
    ))
}

fn any_of(queries: impl Iterator<Item = Box<dyn Query>>) -> Box<dyn Query> {
    let clauses: Vec<(Occur, Box<dyn Query>)> = queries.map(|q| (Occur::Should, q)).collect();
    if clauses.is_empty() {
        return Box::new(EmptyQuery);
    }
    Box::new(BooleanQuery::new(clauses))
}
