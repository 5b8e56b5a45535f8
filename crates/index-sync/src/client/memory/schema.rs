//! Tantivy schema shared by every in-memory collection.
//!
//! Each collection is its own RAM index built from this schema, so field
//! handles are interchangeable between collections.
//!
//! # Fields
//!
//! - `id`: document identifier (STRING | STORED)
//! - `_source`: the whole document as JSON text (STORED only)
//! - `_body`: document fields, analyzed, with positions and fast columns
//! - `_exact`: document fields, untokenized, for exact term lookups
//! - `_all`: every scalar value, analyzed; answers unqualified words
//! - `_prefix`: `path \u{1f} token` entries for prefix lookups

use serde_json::{Map, Value};
use tantivy::schema::{
    Field, IndexRecordOption, JsonObjectOptions, STORED, STRING, Schema, SchemaBuilder,
    TextFieldIndexing, TextOptions,
};
use tantivy::tokenizer::{LowerCaser, SimpleTokenizer, TextAnalyzer, TokenStream, TokenizerManager};
use tantivy::{Index, TantivyDocument};

use crate::types::Document;

/// Name the analyzer is registered under.
pub(crate) const TOKENIZER_NAME: &str = "index_sync";

/// Separates the field path from the value in `_prefix` entries.
pub(crate) const PATH_SEPARATOR: char = '\u{1f}';

const SOURCE_FIELD: &str = "_source";
const BODY_FIELD: &str = "_body";
const EXACT_FIELD: &str = "_exact";
const ALL_FIELD: &str = "_all";
const PREFIX_FIELD: &str = "_prefix";

/// Field handles plus the Tantivy schema.
#[derive(Clone)]
pub(crate) struct CollectionSchema {
    schema: Schema,
    pub id: Field,
    pub source: Field,
    pub body: Field,
    pub exact: Field,
    pub all: Field,
    pub prefix: Field,
}

impl CollectionSchema {
    pub fn build() -> Self {
        let mut builder = SchemaBuilder::new();

        let analyzed = TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER_NAME)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);

        let id = builder.add_text_field(Document::ID_FIELD, STRING | STORED);
        let source = builder.add_text_field(SOURCE_FIELD, STORED);
        let body = builder.add_json_field(
            BODY_FIELD,
            JsonObjectOptions::default()
                .set_indexing_options(analyzed.clone())
                .set_fast(None),
        );
        let exact = builder.add_json_field(
            EXACT_FIELD,
            JsonObjectOptions::default().set_indexing_options(
                TextFieldIndexing::default()
                    .set_tokenizer("raw")
                    .set_index_option(IndexRecordOption::Basic),
            ),
        );
        let all = builder.add_text_field(
            ALL_FIELD,
            TextOptions::default().set_indexing_options(analyzed),
        );
        let prefix = builder.add_text_field(PREFIX_FIELD, STRING);

        Self {
            schema: builder.build(),
            id,
            source,
            body,
            exact,
            all,
            prefix,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Creates an empty RAM index with the analyzer registered.
    pub fn create_index(&self) -> Index {
        let index = Index::create_in_ram(self.schema.clone());
        index.tokenizers().register(TOKENIZER_NAME, build_tokenizer());
        index
    }

    /// Tokenizers for parsing query strings outside any one index.
    pub fn tokenizer_manager() -> TokenizerManager {
        let manager = TokenizerManager::default();
        manager.register(TOKENIZER_NAME, build_tokenizer());
        manager
    }

    /// Converts a document into its Tantivy form.
    pub fn to_tantivy(&self, document: &Document) -> tantivy::Result<TantivyDocument> {
        let mut all = Vec::new();
        let mut prefixes = Vec::new();
        for (name, value) in document.fields() {
            collect_leaves(name, value, &mut |path, text| {
                for token in tokens(text) {
                    prefixes.push(format!("{path}{PATH_SEPARATOR}{token}"));
                }
                prefixes.push(format!("{path}{PATH_SEPARATOR}{}", text.to_lowercase()));
                all.push(text.to_string());
            });
        }

        let fields = Value::Object(document.fields().clone());
        let mut json = Map::new();
        json.insert(
            Document::ID_FIELD.to_string(),
            Value::String(document.id().to_string()),
        );
        json.insert(
            SOURCE_FIELD.to_string(),
            Value::String(document.to_source().to_string()),
        );
        json.insert(BODY_FIELD.to_string(), fields.clone());
        json.insert(EXACT_FIELD.to_string(), fields);
        json.insert(ALL_FIELD.to_string(), all.into());
        json.insert(PREFIX_FIELD.to_string(), prefixes.into());

        TantivyDocument::parse_json(&self.schema, &Value::Object(json).to_string())
            .map_err(|e| tantivy::TantivyError::InvalidArgument(e.to_string()))
    }
}

impl std::fmt::Debug for CollectionSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionSchema").finish_non_exhaustive()
    }
}

/// Lowercases and splits on anything that is not alphanumeric.
fn build_tokenizer() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(LowerCaser)
        .build()
}

/// Runs `text` through the analyzer used for `_body` and `_all`.
pub(crate) fn tokens(text: &str) -> Vec<String> {
    let mut analyzer = build_tokenizer();
    let mut stream = analyzer.token_stream(text);
    let mut out = Vec::new();
    while stream.advance() {
        out.push(stream.token().text.clone());
    }
    out
}

/// Visits every scalar under `value` with its dotted path and text form.
fn collect_leaves(path: &str, value: &Value, visit: &mut impl FnMut(&str, &str)) {
    match value {
        Value::Null => {}
        Value::String(s) => visit(path, s),
        Value::Number(n) => visit(path, &n.to_string()),
        Value::Bool(b) => visit(path, if *b { "true" } else { "false" }),
        Value::Array(items) => items.iter().for_each(|v| collect_leaves(path, v, visit)),
        Value::Object(map) => {
            for (key, child) in map {
                collect_leaves(&format!("{path}.{key}"), child, visit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tokens_split_and_lowercase() {
        assert_eq!(tokens("12 Harbour-Road"), vec!["12", "harbour", "road"]);
        assert!(tokens(" ,; ").is_empty());
    }

    #[test]
    fn test_leaves_carry_dotted_paths() {
        let mut seen = Vec::new();
        collect_leaves(
            "geo",
            &json!({"region": "Vestland", "tags": ["coast", null], "alt": 12}),
            &mut |path, text| seen.push(format!("{path}={text}")),
        );
        seen.sort();
        assert_eq!(seen, vec!["geo.alt=12", "geo.region=Vestland", "geo.tags=coast"]);
    }

    #[test]
    fn test_to_tantivy_accepts_nested_fields() {
        let schema = CollectionSchema::build();
        let doc = Document::new("a1")
            .with_field("street", "12 Harbour Road")
            .with_field("geo", json!({"region": "Vestland"}));
        assert!(schema.to_tantivy(&doc).is_ok());
    }
}
