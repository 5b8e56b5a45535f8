//! Elasticsearch index client integration tests.
//!
//! Tests in `es_integration` start a real Elasticsearch node with
//! testcontainers and need Docker.
//!
//! Run with: `cargo test -p helios-index-sync --features elasticsearch -- es_integration`
//!
//! Skip if no Docker:
//!   `cargo test -p helios-index-sync --features elasticsearch -- --skip es_integration`

#![cfg(feature = "elasticsearch")]

use helios_index_sync::client::elasticsearch::schema::create_index_mapping;
use helios_index_sync::{ElasticsearchConfig, ElasticsearchIndex, IndexClient};

// ============================================================================
// Client Configuration Tests (no ES instance required)
// ============================================================================

#[test]
fn test_client_creation_does_not_connect() {
    let index = ElasticsearchIndex::new(ElasticsearchConfig {
        nodes: vec!["http://unreachable.invalid:9200".to_string()],
        ..Default::default()
    })
    .unwrap();
    assert_eq!(index.engine_name(), "elasticsearch");
}

#[test]
fn test_index_names_per_collection() {
    let index = ElasticsearchIndex::new(ElasticsearchConfig {
        index_prefix: "care".to_string(),
        ..Default::default()
    })
    .unwrap();

    assert_eq!(index.index_name("team"), "care_team");
    assert_eq!(index.index_name("pay-option"), "care_pay-option");
}

#[test]
fn test_mapping_uses_configured_shards() {
    let config = ElasticsearchConfig {
        number_of_shards: 3,
        number_of_replicas: 0,
        ..Default::default()
    };
    let mapping = create_index_mapping(&config);
    assert_eq!(mapping["settings"]["number_of_shards"], 3);
    assert_eq!(mapping["settings"]["number_of_replicas"], 0);
    assert_eq!(mapping["mappings"]["properties"]["id"]["type"], "keyword");
}

#[cfg(test)]
mod es_integration {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::TryStreamExt;

    use helios_index_sync::client::elasticsearch::schema;
    use helios_index_sync::{
        Document, ElasticsearchConfig, ElasticsearchIndex, EntityKind, EntityRecord,
        IndexClient, IndexError, MemoryRecordStore, NativeQuery, RecordSource, SearchServices,
        StructuredQuery, SyncError, SyncOutcome,
    };

    use testcontainers::ImageExt;
    use testcontainers::runners::AsyncRunner;
    use testcontainers_modules::elastic_search::ElasticSearch;
    use tokio::sync::OnceCell;

    /// Shared Elasticsearch container reused across all tests in this module.
    struct SharedEs {
        host: String,
        port: u16,
        /// Kept alive for the duration of the test binary.
        _container: testcontainers::ContainerAsync<ElasticSearch>,
    }

    static SHARED_ES: OnceCell<SharedEs> = OnceCell::const_new();

    async fn shared_es() -> &'static SharedEs {
        SHARED_ES
            .get_or_init(|| async {
                let run_id = std::env::var("GITHUB_RUN_ID").unwrap_or_default();
                let container = ElasticSearch::default()
                    .with_env_var("ES_JAVA_OPTS", "-Xms256m -Xmx256m")
                    .with_label("github.run_id", &run_id)
                    .with_startup_timeout(Duration::from_secs(120))
                    .start()
                    .await
                    .expect("Failed to start Elasticsearch container");

                let port = container
                    .get_host_port_ipv4(9200)
                    .await
                    .expect("Failed to get host port");

                let host = container
                    .get_host()
                    .await
                    .expect("Failed to get host")
                    .to_string();

                SharedEs {
                    host,
                    port,
                    _container: container,
                }
            })
            .await
    }

    /// Creates a client against the shared container.
    ///
    /// Each call uses a unique index prefix so tests do not see each other's
    /// documents. Writes refresh immediately so searches see them.
    async fn create_index() -> Arc<ElasticsearchIndex> {
        let es = shared_es().await;
        let config = ElasticsearchConfig {
            nodes: vec![format!("http://{}:{}", es.host, es.port)],
            index_prefix: format!("sync_{}", uuid::Uuid::new_v4().simple()),
            number_of_replicas: 0,
            refresh_on_write: true,
            page_size: 2,
            ..Default::default()
        };
        let index = ElasticsearchIndex::new(config).expect("Failed to create client");
        index.health_check().await.expect("Cluster is not healthy");
        Arc::new(index)
    }

    async fn collect(index: &ElasticsearchIndex, query: NativeQuery) -> Vec<Document> {
        index
            .query("team", query)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap()
    }

    fn text(query: &str) -> NativeQuery {
        NativeQuery::QueryString(query.to_string())
    }

    #[tokio::test]
    async fn es_integration_put_replaces_document() {
        let index = create_index().await;
        index
            .put(
                "team",
                Document::new("t1")
                    .with_field("name", "alpha")
                    .with_field("city", "Oslo"),
            )
            .await
            .unwrap();
        index
            .put("team", Document::new("t1").with_field("name", "beta"))
            .await
            .unwrap();

        let docs = collect(&index, NativeQuery::Structured(StructuredQuery::id("t1"))).await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].field("name").unwrap(), "beta");
        assert!(docs[0].field("city").is_none());
    }

    #[tokio::test]
    async fn es_integration_delete_is_idempotent() {
        let index = create_index().await;
        index
            .put("team", Document::new("t1").with_field("name", "alpha"))
            .await
            .unwrap();

        index.delete("team", "t1").await.unwrap();
        index.delete("team", "t1").await.unwrap();
        index.delete("team", "missing-id").await.unwrap();
        index.delete("never-created", "missing-id").await.unwrap();

        assert!(collect(&index, text("alpha")).await.is_empty());
    }

    #[tokio::test]
    async fn es_integration_query_string_and_structured() {
        let index = create_index().await;
        let teams = [
            ("t1", "night shift", 4),
            ("t2", "day shift", 9),
            ("t3", "on call", 2),
        ];
        for (id, name, size) in teams {
            index
                .put(
                    "team",
                    Document::new(id).with_field("name", name).with_field("size", size),
                )
                .await
                .unwrap();
        }

        let shifts = collect(&index, text("name:shift")).await;
        assert_eq!(shifts.len(), 2);

        let night = collect(&index, text("name:night AND size:[1 TO 5]")).await;
        assert_eq!(night.len(), 1);
        assert_eq!(night[0].id(), "t1");

        let structured = StructuredQuery::range("size", Some(3.0), None)
            .and(StructuredQuery::prefix("name", "Da"));
        let day = collect(&index, NativeQuery::Structured(structured)).await;
        assert_eq!(day.len(), 1);
        assert_eq!(day[0].id(), "t2");

        let not_call = StructuredQuery::match_text("name", "call").negate();
        assert_eq!(collect(&index, NativeQuery::Structured(not_call)).await.len(), 2);
    }

    #[tokio::test]
    async fn es_integration_results_page_through_everything() {
        let index = create_index().await;
        for i in 0..7 {
            index
                .put("team", Document::new(format!("t{}", i)).with_field("kind", "rota"))
                .await
                .unwrap();
        }

        // page_size is 2, so this spans four pages
        let docs = collect(&index, text("kind:rota")).await;
        let mut ids: Vec<_> = docs.iter().map(|d| d.id().to_string()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 7);
    }

    #[tokio::test]
    async fn es_integration_missing_index_is_empty_not_error() {
        let index = create_index().await;
        assert!(collect(&index, text("*")).await.is_empty());
    }

    #[tokio::test]
    async fn es_integration_malformed_query_fails() {
        let index = create_index().await;
        index
            .put("team", Document::new("t1").with_field("name", "alpha"))
            .await
            .unwrap();

        let result = index.query("team", text("name:(alpha")).await;
        assert!(matches!(result, Err(IndexError::QueryFailed { .. })));
    }

    #[tokio::test]
    async fn es_integration_init_and_drop() {
        let index = create_index().await;
        schema::create_index_template(&index).await.unwrap();
        for kind in EntityKind::ALL {
            index.ensure_collection(kind.collection()).await.unwrap();
        }

        schema::delete_index(&index, "team").await.unwrap();
        schema::delete_index(&index, "team").await.unwrap();
        assert!(collect(&index, text("*")).await.is_empty());
    }

    #[tokio::test]
    async fn es_integration_facade_round_trip() {
        let index = create_index().await;
        let store = Arc::new(MemoryRecordStore::<EntityRecord>::new());
        let services = SearchServices::builder(index.clone())
            .source(
                EntityKind::PayOption,
                store.clone() as Arc<dyn RecordSource<EntityRecord>>,
            )
            .build();
        let pay = services.facade(EntityKind::PayOption).unwrap();

        let record = EntityRecord::new("p1")
            .with_field("label", "Visa ending 4242")
            .with_field("default", true);
        store.upsert(record.clone());
        assert_eq!(pay.index(&record).unwrap().wait().await, SyncOutcome::Indexed);

        let found: Vec<EntityRecord> = pay
            .search("label:visa")
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(found, vec![record]);

        assert_eq!(pay.remove_from_index("p1").unwrap().wait().await, SyncOutcome::Removed);
        let failed = pay.search("label:(visa").await;
        assert!(matches!(failed, Err(SyncError::Index(_))));
    }
}
