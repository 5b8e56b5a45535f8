//! Elasticsearch index client.
//!
//! Each collection maps to one index named `{prefix}_{collection}`
//! (e.g. `helios_pay-option`). Indices are created on first write with the
//! mapping from [`schema`]; the identifier is stored as the `id` keyword
//! field and doubles as the engine's `_id`.
//!
//! # Error mapping
//!
//! | Condition | Error |
//! |-----------|-------|
//! | transport failure, 429, 5xx | `IndexError::Unavailable` |
//! | other 4xx on write | `IndexError::Rejected` |
//! | other 4xx on query | `IndexError::QueryFailed` |
//! | 404 on delete | success |
//! | missing index on query | empty result |
//!
//! # Example
//!
//! ```ignore
//! use helios_index_sync::client::{ElasticsearchConfig, ElasticsearchIndex};
//!
//! let config = ElasticsearchConfig {
//!     nodes: vec!["http://localhost:9200".to_string()],
//!     ..Default::default()
//! };
//! let index = ElasticsearchIndex::new(config)?;
//! index.health_check().await?;
//! ```

mod dsl;
pub mod schema;

use std::collections::HashSet;
use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use elasticsearch::auth::Credentials;
use elasticsearch::cert::CertificateValidation;
use elasticsearch::http::StatusCode;
use elasticsearch::http::response::Response;
use elasticsearch::http::transport::{SingleNodeConnectionPool, TransportBuilder};
use elasticsearch::params::Refresh;
use elasticsearch::{DeleteParts, Elasticsearch, IndexParts, SearchParts};
use futures::{StreamExt, TryStreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{IndexError, IndexResult};
use crate::query::NativeQuery;
use crate::types::Document;

use super::{DocumentStream, IndexClient};

/// Authentication configuration for Elasticsearch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ElasticsearchAuth {
    /// Basic username/password authentication.
    Basic {
        /// The username for basic auth.
        username: String,
        /// The password for basic auth.
        password: String,
    },
    /// Bearer token authentication.
    Bearer {
        /// The bearer token.
        token: String,
    },
}

/// Configuration for the Elasticsearch index client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElasticsearchConfig {
    /// Elasticsearch node URLs (e.g., `["http://localhost:9200"]`).
    /// Currently uses the first node (single-node connection pool).
    pub nodes: Vec<String>,

    /// Index name prefix (default: `"helios"`).
    #[serde(default = "default_index_prefix")]
    pub index_prefix: String,

    /// Number of primary shards per index (default: 1).
    #[serde(default = "default_shards")]
    pub number_of_shards: u32,

    /// Number of replica shards per index (default: 1).
    #[serde(default = "default_replicas")]
    pub number_of_replicas: u32,

    /// Refresh interval (default: "1s").
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: String,

    /// Request timeout in milliseconds (default: 30000).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Hits fetched per page while streaming query results (default: 100).
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Wait for a refresh after every write so it is immediately searchable.
    /// Only use for testing.
    #[serde(default)]
    pub refresh_on_write: bool,

    /// Optional authentication.
    #[serde(default)]
    pub auth: Option<ElasticsearchAuth>,

    /// Whether to disable certificate validation (default: false).
    /// Only use for development/testing.
    #[serde(default)]
    pub disable_certificate_validation: bool,
}

fn default_index_prefix() -> String {
    "helios".to_string()
}

fn default_shards() -> u32 {
    1
}

fn default_replicas() -> u32 {
    1
}

fn default_refresh_interval() -> String {
    "1s".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30000
}

fn default_page_size() -> u32 {
    100
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            nodes: vec!["http://localhost:9200".to_string()],
            index_prefix: default_index_prefix(),
            number_of_shards: default_shards(),
            number_of_replicas: default_replicas(),
            refresh_interval: default_refresh_interval(),
            request_timeout_ms: default_request_timeout_ms(),
            page_size: default_page_size(),
            refresh_on_write: false,
            auth: None,
            disable_certificate_validation: false,
        }
    }
}

/// Index client backed by an Elasticsearch cluster.
///
/// The underlying HTTP transport is pooled and safe to share; wrap the
/// client in an `Arc` and hand it to every facade.
pub struct ElasticsearchIndex {
    client: Elasticsearch,
    config: ElasticsearchConfig,
    known_indices: RwLock<HashSet<String>>,
}

impl Debug for ElasticsearchIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElasticsearchIndex")
            .field("config", &self.config)
            .field("known_indices", &self.known_indices.read().len())
            .finish_non_exhaustive()
    }
}

impl ElasticsearchIndex {
    /// Creates a new client. No connection is made until the first request.
    pub fn new(config: ElasticsearchConfig) -> IndexResult<Self> {
        let client = Self::build_client(&config)?;
        Ok(Self {
            client,
            config,
            known_indices: RwLock::new(HashSet::new()),
        })
    }

    fn build_client(config: &ElasticsearchConfig) -> IndexResult<Elasticsearch> {
        let url = config
            .nodes
            .first()
            .cloned()
            .unwrap_or_else(|| "http://localhost:9200".to_string());

        let parsed_url: elasticsearch::http::Url = url
            .parse()
            .map_err(|e| IndexError::unavailable("*", format!("Invalid URL {}: {}", url, e)))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);

        let mut builder = TransportBuilder::new(conn_pool)
            .timeout(Duration::from_millis(config.request_timeout_ms));

        if config.disable_certificate_validation {
            builder = builder.cert_validation(CertificateValidation::None);
        }

        if let Some(ref auth) = config.auth {
            builder = match auth {
                ElasticsearchAuth::Basic { username, password } => {
                    builder.auth(Credentials::Basic(username.clone(), password.clone()))
                }
                ElasticsearchAuth::Bearer { token } => {
                    builder.auth(Credentials::Bearer(token.clone()))
                }
            };
        }

        let transport = builder.build().map_err(|e| {
            IndexError::unavailable("*", format!("Failed to build transport: {}", e))
        })?;

        Ok(Elasticsearch::new(transport))
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ElasticsearchConfig {
        &self.config
    }

    pub(crate) fn client(&self) -> &Elasticsearch {
        &self.client
    }

    /// Returns the index name for a collection.
    pub fn index_name(&self, collection: &str) -> String {
        format!(
            "{}_{}",
            self.config.index_prefix,
            collection.to_lowercase()
        )
    }

    /// Ensures the index for `collection` exists, creating it if necessary.
    pub async fn ensure_collection(&self, collection: &str) -> IndexResult<()> {
        let index = self.index_name(collection);
        if self.known_indices.read().contains(&index) {
            return Ok(());
        }

        schema::ensure_index(self, collection, &index).await?;
        self.known_indices.write().insert(index);
        Ok(())
    }

    pub(crate) fn forget_index(&self, index: &str) {
        self.known_indices.write().remove(index);
    }

    /// Refreshes a collection's index so recent writes become searchable.
    ///
    /// Only needed for testing; in production ES refreshes automatically.
    pub async fn refresh(&self, collection: &str) -> IndexResult<()> {
        let index = self.index_name(collection);
        let response = self
            .client
            .indices()
            .refresh(elasticsearch::indices::IndicesRefreshParts::Index(&[
                index.as_str(),
            ]))
            .send()
            .await
            .map_err(|e| IndexError::unavailable(collection, format!("Refresh failed: {}", e)))?;

        let status = response.status_code();
        if !status.is_success() && status != StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(IndexError::unavailable(
                collection,
                format!("Refresh of {} returned status {}: {}", index, status, body),
            ));
        }
        Ok(())
    }

    fn refresh_param(&self) -> Refresh {
        if self.config.refresh_on_write {
            Refresh::WaitFor
        } else {
            Refresh::False
        }
    }
}

/// Returns true for statuses worth retrying.
fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

/// Reads an unsuccessful write response into the matching error.
async fn write_failure(collection: &str, id: &str, response: Response) -> IndexError {
    let status = response.status_code();
    let body = response.text().await.unwrap_or_default();
    if is_transient_status(status) {
        IndexError::unavailable(collection, format!("status {}: {}", status, body))
    } else {
        IndexError::Rejected {
            collection: collection.to_string(),
            id: Some(id.to_string()),
            message: format!("status {}: {}", status, body),
        }
    }
}

#[async_trait]
impl IndexClient for ElasticsearchIndex {
    fn engine_name(&self) -> &'static str {
        "elasticsearch"
    }

    async fn put(&self, collection: &str, document: Document) -> IndexResult<()> {
        self.ensure_collection(collection).await?;

        let index = self.index_name(collection);
        let response = self
            .client
            .index(IndexParts::IndexId(&index, document.id()))
            .refresh(self.refresh_param())
            .body(document.to_source())
            .send()
            .await
            .map_err(|e| {
                IndexError::unavailable(collection, format!("Failed to index document: {}", e))
            })?;

        if !response.status_code().is_success() {
            return Err(write_failure(collection, document.id(), response).await);
        }

        tracing::trace!(index = %index, id = %document.id(), "Indexed document");
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> IndexResult<()> {
        let index = self.index_name(collection);
        let response = self
            .client
            .delete(DeleteParts::IndexId(&index, id))
            .refresh(self.refresh_param())
            .send()
            .await
            .map_err(|e| {
                IndexError::unavailable(collection, format!("Failed to delete document: {}", e))
            })?;

        let status = response.status_code();
        // Missing document or missing index: nothing to remove
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }

        Err(write_failure(collection, id, response).await)
    }

    async fn query(&self, collection: &str, query: NativeQuery) -> IndexResult<DocumentStream> {
        let cursor = PageCursor {
            client: self.client.clone(),
            collection: collection.to_string(),
            index: self.index_name(collection),
            query: dsl::to_query_dsl(&query),
            page_size: self.config.page_size.max(1),
            search_after: None,
        };

        // The first page is fetched eagerly so query errors surface to the caller
        let Some((first, next)) = cursor.fetch().await? else {
            return Ok(futures::stream::empty().boxed());
        };

        let rest = futures::stream::try_unfold(next, |cursor| async move {
            match cursor {
                Some(cursor) => cursor.fetch().await,
                None => Ok(None),
            }
        })
        .map_ok(|page| futures::stream::iter(page.into_iter().map(Ok::<_, IndexError>)))
        .try_flatten();

        Ok(futures::stream::iter(first.into_iter().map(Ok))
            .chain(rest)
            .boxed())
    }

    async fn health_check(&self) -> IndexResult<()> {
        let response = self
            .client
            .cluster()
            .health(elasticsearch::cluster::ClusterHealthParts::None)
            .send()
            .await
            .map_err(|e| IndexError::unavailable("*", format!("Health check failed: {}", e)))?;

        let status = response.status_code();
        if !status.is_success() {
            return Err(IndexError::unavailable(
                "*",
                format!("Cluster health returned status {}", status),
            ));
        }

        let body = response.json::<Value>().await.map_err(|e| {
            IndexError::unavailable("*", format!("Failed to parse health response: {}", e))
        })?;

        let cluster_status = body
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("unknown");

        if cluster_status == "red" {
            return Err(IndexError::unavailable(
                "*",
                format!("Cluster status is red: {:?}", body),
            ));
        }

        Ok(())
    }
}

/// Position within a paged query, advanced with `search_after`.
struct PageCursor {
    client: Elasticsearch,
    collection: String,
    index: String,
    query: Value,
    page_size: u32,
    search_after: Option<Value>,
}

impl PageCursor {
    /// Fetches one page. Returns the hits and the cursor for the following
    /// page, or `None` once the result set is exhausted.
    async fn fetch(self) -> IndexResult<Option<(Vec<Document>, Option<PageCursor>)>> {
        let mut body = json!({
            "query": &self.query,
            "size": self.page_size,
            "sort": [
                { "_score": { "order": "desc" } },
                { (Document::ID_FIELD): { "order": "asc" } }
            ]
        });
        if let Some(ref after) = self.search_after {
            body["search_after"] = after.clone();
        }

        let response = self
            .client
            .search(SearchParts::Index(&[self.index.as_str()]))
            .body(body)
            .send()
            .await
            .map_err(|e| {
                IndexError::unavailable(&self.collection, format!("Search failed: {}", e))
            })?;

        let status = response.status_code();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            // Nothing has been indexed into this collection yet
            if text.contains("index_not_found_exception") {
                return Ok(None);
            }
            return Err(if is_transient_status(status) {
                IndexError::unavailable(&self.collection, format!("status {}: {}", status, text))
            } else {
                IndexError::query_failed(&self.collection, format!("status {}: {}", status, text))
            });
        }

        let body: Value = response.json().await.map_err(|e| {
            IndexError::query_failed(
                &self.collection,
                format!("Failed to parse search response: {}", e),
            )
        })?;

        let hits = body
            .get("hits")
            .and_then(|h| h.get("hits"))
            .and_then(|h| h.as_array())
            .cloned()
            .unwrap_or_default();

        if hits.is_empty() {
            return Ok(None);
        }

        let mut documents = Vec::with_capacity(hits.len());
        let mut last_sort = None;
        for hit in hits.iter() {
            let Some(source) = hit.get("_source") else {
                continue;
            };
            let document = Document::from_source(source.clone()).map_err(|e| {
                IndexError::Serialization {
                    message: format!("Invalid document in {}: {}", self.index, e),
                }
            })?;
            documents.push(document);
            last_sort = hit.get("sort").cloned();
        }

        let next = match last_sort {
            Some(sort) if hits.len() >= self.page_size as usize => Some(PageCursor {
                search_after: Some(sort),
                ..self
            }),
            _ => None,
        };

        Ok(Some((documents, next)))
    }
}
