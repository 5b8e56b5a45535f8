//! Conversion of native queries to the Elasticsearch query DSL.

use serde_json::{Map, Value, json};

use crate::query::{NativeQuery, StructuredQuery};
use crate::types::Document;

/// Builds the `query` element of a search request.
pub(super) fn to_query_dsl(query: &NativeQuery) -> Value {
    match query {
        NativeQuery::QueryString(text) if text.trim().is_empty() => match_none(),
        NativeQuery::QueryString(text) => json!({
            "query_string": {
                "query": text,
                "default_operator": "OR"
            }
        }),
        NativeQuery::Structured(query) => structured(query),
    }
}

fn match_none() -> Value {
    json!({ "match_none": {} })
}

fn structured(query: &StructuredQuery) -> Value {
    match query {
        StructuredQuery::MatchAll => json!({ "match_all": {} }),
        StructuredQuery::Ids { values } => json!({ "ids": { "values": values } }),
        StructuredQuery::Term { field, value } => {
            // Strings are analyzed; exact matches go to the keyword subfield,
            // which drops values longer than KEYWORD_IGNORE_ABOVE
            let target = match value {
                Value::String(_) if field != Document::ID_FIELD => format!("{}.keyword", field),
                _ => field.clone(),
            };
            single("term", target, value.clone())
        }
        StructuredQuery::Match { field, text } => single("match", field.clone(), json!(text)),
        StructuredQuery::Prefix { field, prefix } if prefix.is_empty() => {
            json!({ "exists": { "field": field } })
        }
        StructuredQuery::Prefix { field, prefix } => {
            // Analyzed terms are lowercased, the identifier is not
            let value = if field == Document::ID_FIELD {
                prefix.clone()
            } else {
                prefix.to_lowercase()
            };
            single("prefix", field.clone(), json!({ "value": value }))
        }
        StructuredQuery::Range { field, gte, lte } => {
            let mut bounds = Map::new();
            if let Some(gte) = gte {
                bounds.insert("gte".to_string(), json!(gte));
            }
            if let Some(lte) = lte {
                bounds.insert("lte".to_string(), json!(lte));
            }
            single("range", field.clone(), Value::Object(bounds))
        }
        StructuredQuery::Bool {
            must,
            should,
            must_not,
        } => {
            let mut clauses = Map::new();
            if !must.is_empty() {
                clauses.insert("must".to_string(), list(must));
            }
            if !should.is_empty() {
                clauses.insert("should".to_string(), list(should));
                if must.is_empty() {
                    clauses.insert("minimum_should_match".to_string(), json!(1));
                }
            }
            if !must_not.is_empty() {
                clauses.insert("must_not".to_string(), list(must_not));
                // A pure exclusion still has to select from everything
                if must.is_empty() && should.is_empty() {
                    clauses.insert("must".to_string(), json!([{ "match_all": {} }]));
                }
            }
            if clauses.is_empty() {
                return json!({ "match_all": {} });
            }
            json!({ "bool": clauses })
        }
    }
}

fn single(kind: &str, field: String, body: Value) -> Value {
    let mut inner = Map::new();
    inner.insert(field, body);
    let mut outer = Map::new();
    outer.insert(kind.to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn list(queries: &[StructuredQuery]) -> Value {
    Value::Array(queries.iter().map(structured).collect())
}
