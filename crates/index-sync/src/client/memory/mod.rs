//! In-memory index client.
//!
//! [`MemoryIndex`] keeps one Tantivy RAM index per collection. It implements
//! the same contract as the search engine adapters (full-replace upserts,
//! idempotent deletes, query-string and structured queries) and is what the
//! test suite runs against.
//!
//! Query strings use Tantivy's query-parser syntax. Unqualified field names
//! address document fields, dotted names address nested objects, and bare
//! words search every field. Values are lowercased and split on anything that
//! is not alphanumeric; `id` is matched exactly. Results are returned in
//! identifier order.

mod schema;
mod structured;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tantivy::collector::DocSetCollector;
use tantivy::query::{Query, QueryParser, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};

use crate::error::{IndexError, IndexResult};
use crate::query::NativeQuery;
use crate::types::Document;

use self::schema::CollectionSchema;
use super::{DocumentStream, IndexClient};

/// Writer heap per collection; Tantivy's minimum for one indexing thread.
const WRITER_HEAP_BYTES: usize = 15_000_000;

struct Collection {
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
}

impl Collection {
    fn create(schema: &CollectionSchema) -> tantivy::Result<Self> {
        let index = schema.create_index();
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer_with_num_threads(1, WRITER_HEAP_BYTES)?;
        Ok(Self {
            reader,
            writer: Mutex::new(writer),
        })
    }

    /// Applies staged changes and makes them visible to the next search.
    fn commit(&self, writer: &mut IndexWriter) -> tantivy::Result<()> {
        writer.commit()?;
        self.reader.reload()
    }

    fn search(&self, query: &dyn Query) -> tantivy::Result<Vec<TantivyDocument>> {
        let searcher = self.reader.searcher();
        let hits = searcher.search(query, &DocSetCollector)?;
        hits.into_iter()
            .map(|address| searcher.doc::<TantivyDocument>(address))
            .collect()
    }
}

/// An in-process search index.
pub struct MemoryIndex {
    schema: CollectionSchema,
    parser: QueryParser,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl MemoryIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        let schema = CollectionSchema::build();
        let parser = QueryParser::new(
            schema.schema().clone(),
            vec![schema.id, schema.all, schema.body],
            CollectionSchema::tokenizer_manager(),
        );
        Self {
            schema,
            parser,
            collections: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the number of documents in a collection.
    pub fn len(&self, collection: &str) -> usize {
        self.collection(collection)
            .map(|c| c.reader.searcher().num_docs() as usize)
            .unwrap_or(0)
    }

    /// Returns true if the collection holds no documents.
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    /// Returns a copy of a stored document.
    pub fn get(&self, collection: &str, id: &str) -> Option<Document> {
        let query = TermQuery::new(
            Term::from_field_text(self.schema.id, id),
            IndexRecordOption::Basic,
        );
        let docs = self.collection(collection)?.search(&query).ok()?;
        docs.iter()
            .find_map(|doc| self.decode(collection, doc).ok())
    }

    /// Returns the names of all collections that have been written to.
    pub fn collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Removes every document from every collection.
    pub fn clear(&self) {
        self.collections.write().clear();
    }

    fn collection(&self, name: &str) -> Option<Arc<Collection>> {
        self.collections.read().get(name).cloned()
    }

    fn collection_or_create(&self, name: &str) -> IndexResult<Arc<Collection>> {
        if let Some(existing) = self.collection(name) {
            return Ok(existing);
        }
        let mut collections = self.collections.write();
        if let Some(existing) = collections.get(name) {
            return Ok(existing.clone());
        }
        let created = Arc::new(
            Collection::create(&self.schema)
                .map_err(|e| IndexError::unavailable(name, e.to_string()))?,
        );
        collections.insert(name.to_string(), created.clone());
        Ok(created)
    }

    fn decode(&self, collection: &str, doc: &TantivyDocument) -> IndexResult<Document> {
        let source = doc
            .get_first(self.schema.source)
            .and_then(|v| v.as_str())
            .ok_or_else(|| IndexError::Serialization {
                message: format!("document in '{collection}' has no stored source"),
            })?;
        let value = serde_json::from_str(source).map_err(|e| IndexError::Serialization {
            message: e.to_string(),
        })?;
        Document::from_source(value).map_err(|e| IndexError::Serialization {
            message: e.to_string(),
        })
    }

    fn parse(&self, collection: &str, text: &str) -> IndexResult<Option<Box<dyn Query>>> {
        if text.trim().is_empty() {
            return Ok(None);
        }
        self.parser
            .parse_query(text)
            .map(Some)
            .map_err(|e| IndexError::query_failed(collection, e.to_string()))
    }
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryIndex")
            .field("collections", &self.collections())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IndexClient for MemoryIndex {
    fn engine_name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, collection: &str, document: Document) -> IndexResult<()> {
        if document.id().is_empty() {
            return Err(IndexError::Rejected {
                collection: collection.to_string(),
                id: None,
                message: "document identifier is empty".to_string(),
            });
        }
        let converted = self
            .schema
            .to_tantivy(&document)
            .map_err(|e| IndexError::Rejected {
                collection: collection.to_string(),
                id: Some(document.id().to_string()),
                message: e.to_string(),
            })?;

        let target = self.collection_or_create(collection)?;
        let mut writer = target.writer.lock();
        writer.delete_term(Term::from_field_text(self.schema.id, document.id()));
        writer
            .add_document(converted)
            .and_then(|_| target.commit(&mut writer))
            .map_err(|e| IndexError::unavailable(collection, e.to_string()))
    }

    async fn delete(&self, collection: &str, id: &str) -> IndexResult<()> {
        let Some(target) = self.collection(collection) else {
            return Ok(());
        };
        let mut writer = target.writer.lock();
        writer.delete_term(Term::from_field_text(self.schema.id, id));
        target
            .commit(&mut writer)
            .map_err(|e| IndexError::unavailable(collection, e.to_string()))
    }

    async fn query(&self, collection: &str, query: NativeQuery) -> IndexResult<DocumentStream> {
        let query = match query {
            NativeQuery::QueryString(text) => self.parse(collection, &text)?,
            NativeQuery::Structured(query) => Some(structured::to_tantivy(&self.schema, &query)),
        };
        let (Some(query), Some(target)) = (query, self.collection(collection)) else {
            return Ok(futures::stream::empty().boxed());
        };

        let docs = target
            .search(query.as_ref())
            .map_err(|e| IndexError::query_failed(collection, e.to_string()))?;
        let mut hits: Vec<IndexResult<Document>> =
            docs.iter().map(|doc| self.decode(collection, doc)).collect();
        hits.sort_by(|a, b| match (a, b) {
            (Ok(a), Ok(b)) => a.id().cmp(b.id()),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => std::cmp::Ordering::Equal,
        });

        Ok(futures::stream::iter(hits).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::StructuredQuery;
    use futures::TryStreamExt;
    use serde_json::json;

    async fn ids(index: &MemoryIndex, collection: &str, query: NativeQuery) -> Vec<String> {
        index
            .query(collection, query)
            .await
            .unwrap()
            .map_ok(|doc| doc.id().to_string())
            .try_collect()
            .await
            .unwrap()
    }

    fn text(q: &str) -> NativeQuery {
        NativeQuery::QueryString(q.to_string())
    }

    async fn seeded() -> MemoryIndex {
        let index = MemoryIndex::new();
        index
            .put(
                "address",
                Document::new("a1")
                    .with_field("street", "12 Harbour Road")
                    .with_field("city", "Oslo")
                    .with_field("zip", json!(150)),
            )
            .await
            .unwrap();
        index
            .put(
                "address",
                Document::new("a2")
                    .with_field("street", "4 Mill Lane")
                    .with_field("city", "Bergen")
                    .with_field("zip", json!(5003))
                    .with_field("geo", json!({"region": "Vestland", "tags": ["coast"]})),
            )
            .await
            .unwrap();
        index
    }

    #[tokio::test]
    async fn test_put_replaces_whole_document() {
        let index = MemoryIndex::new();
        index
            .put("task", Document::new("t1").with_field("title", "a").with_field("done", false))
            .await
            .unwrap();
        index
            .put("task", Document::new("t1").with_field("title", "b"))
            .await
            .unwrap();

        let doc = index.get("task", "t1").unwrap();
        assert_eq!(doc.field("title"), Some(&json!("b")));
        assert!(doc.field("done").is_none());
        assert_eq!(index.len("task"), 1);
        assert!(
            ids(&index, "task", text("title:a")).await.is_empty(),
            "replaced values must not stay searchable"
        );
    }

    #[tokio::test]
    async fn test_put_rejects_empty_identifier() {
        let index = MemoryIndex::new();
        let err = index.put("task", Document::new("")).await.unwrap_err();
        assert!(matches!(err, IndexError::Rejected { .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let index = seeded().await;
        index.delete("address", "a1").await.unwrap();
        index.delete("address", "a1").await.unwrap();
        index.delete("address", "missing-id").await.unwrap();
        index.delete("no-such-collection", "x").await.unwrap();
        assert_eq!(index.len("address"), 1);
        assert!(index.get("address", "a1").is_none());
        assert_eq!(index.collections(), vec!["address"]);
    }

    #[tokio::test]
    async fn test_query_string() {
        let index = seeded().await;

        assert_eq!(ids(&index, "address", text("city:oslo")).await, vec!["a1"]);
        assert_eq!(ids(&index, "address", text("id:a2")).await, vec!["a2"]);
        assert_eq!(ids(&index, "address", text("harbour")).await, vec!["a1"]);
        assert_eq!(ids(&index, "address", text("street:\"mill lane\"")).await, vec!["a2"]);
        assert_eq!(ids(&index, "address", text("oslo bergen")).await, vec!["a1", "a2"]);
        assert_eq!(ids(&index, "address", text("* -city:oslo")).await, vec!["a2"]);
        assert_eq!(ids(&index, "address", text("geo.region:vestland")).await, vec!["a2"]);
        assert_eq!(ids(&index, "address", text("zip:150")).await, vec!["a1"]);
        assert!(ids(&index, "address", text("city:oslo AND zip:5003")).await.is_empty());
        assert!(ids(&index, "address", text("")).await.is_empty());
        assert!(ids(&index, "address", text("   ")).await.is_empty());
    }

    #[tokio::test]
    async fn test_query_string_syntax_error() {
        let index = seeded().await;
        let err = match index.query("address", text("city:(oslo")).await {
            Err(e) => e,
            Ok(_) => panic!("expected query failure"),
        };
        assert!(matches!(err, IndexError::QueryFailed { .. }));

        // Malformed queries fail even where no collection exists yet
        assert!(index.query("unknown", text("city:(oslo")).await.is_err());
    }

    #[tokio::test]
    async fn test_structured_queries() {
        let index = seeded().await;
        let q = |s: StructuredQuery| NativeQuery::Structured(s);

        assert_eq!(
            ids(&index, "address", q(StructuredQuery::term("city", "Oslo"))).await,
            vec!["a1"]
        );
        // term is exact, not analyzed
        assert!(
            ids(&index, "address", q(StructuredQuery::term("city", "oslo")))
                .await
                .is_empty()
        );
        assert_eq!(
            ids(&index, "address", q(StructuredQuery::term("zip", json!(5003)))).await,
            vec!["a2"]
        );
        assert_eq!(
            ids(&index, "address", q(StructuredQuery::match_text("street", "lane road"))).await,
            vec!["a1", "a2"]
        );
        assert_eq!(
            ids(&index, "address", q(StructuredQuery::range("zip", Some(1000.0), None))).await,
            vec!["a2"]
        );
        assert_eq!(
            ids(&index, "address", q(StructuredQuery::id("a1"))).await,
            vec!["a1"]
        );
        assert_eq!(
            ids(
                &index,
                "address",
                q(StructuredQuery::term("geo.tags", "coast").negate())
            )
            .await,
            vec!["a1"]
        );
        assert!(
            ids(&index, "unknown", q(StructuredQuery::MatchAll))
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_structured_prefix() {
        let index = seeded().await;
        let q = |s: StructuredQuery| NativeQuery::Structured(s);

        assert_eq!(
            ids(&index, "address", q(StructuredQuery::prefix("street", "har"))).await,
            vec!["a1"]
        );
        assert_eq!(
            ids(&index, "address", q(StructuredQuery::prefix("street", "4 mill"))).await,
            vec!["a2"]
        );
        assert_eq!(
            ids(&index, "address", q(StructuredQuery::prefix("id", "a"))).await,
            vec!["a1", "a2"]
        );
        assert!(
            ids(&index, "address", q(StructuredQuery::prefix("city", "har")))
                .await
                .is_empty()
        );
    }
}
