//! Index settings and mappings.
//!
//! Documents are schemaless, so every index uses dynamic mapping with one
//! template: string fields are analyzed `text` for full-text matching, with a
//! `keyword` subfield for exact terms. The identifier is always a keyword.

use elasticsearch::indices::{
    IndicesCreateParts, IndicesDeleteParts, IndicesExistsParts, IndicesPutTemplateParts,
};
use serde_json::{Value, json};

use crate::error::{IndexError, IndexResult};
use crate::types::Document;

use super::{ElasticsearchConfig, ElasticsearchIndex};

/// Longest string, in characters, kept in the `keyword` subfield.
///
/// Exact [`StructuredQuery::Term`](crate::StructuredQuery::Term) lookups on
/// strings run against that subfield, so longer values never match a term
/// query. 8191 four-byte characters stay under Lucene's 32766-byte term limit.
pub const KEYWORD_IGNORE_ABOVE: u32 = 8191;

/// Builds the settings and mappings for a collection index.
pub fn create_index_mapping(config: &ElasticsearchConfig) -> Value {
    json!({
        "settings": {
            "number_of_shards": config.number_of_shards,
            "number_of_replicas": config.number_of_replicas,
            "refresh_interval": config.refresh_interval
        },
        "mappings": {
            "dynamic": true,
            "dynamic_templates": [
                {
                    "strings": {
                        "match_mapping_type": "string",
                        "mapping": {
                            "type": "text",
                            "analyzer": "standard",
                            "fields": {
                                "keyword": { "type": "keyword", "ignore_above": KEYWORD_IGNORE_ABOVE }
                            }
                        }
                    }
                }
            ],
            "properties": {
                (Document::ID_FIELD): { "type": "keyword" }
            }
        }
    })
}

/// Installs an index template so indices created outside this client get the
/// same mapping.
pub async fn create_index_template(index: &ElasticsearchIndex) -> IndexResult<()> {
    let template_name = format!("{}_template", index.config().index_prefix);
    let pattern = format!("{}_*", index.config().index_prefix);
    let mapping = create_index_mapping(index.config());

    let template_body = json!({
        "index_patterns": [pattern],
        "settings": mapping["settings"],
        "mappings": mapping["mappings"]
    });

    let response = index
        .client()
        .indices()
        .put_template(IndicesPutTemplateParts::Name(&template_name))
        .body(template_body)
        .send()
        .await
        .map_err(|e| {
            IndexError::unavailable("*", format!("Failed to create index template: {}", e))
        })?;

    let status = response.status_code();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(IndexError::Rejected {
            collection: "*".to_string(),
            id: None,
            message: format!(
                "Failed to create index template (status {}): {}",
                status, body
            ),
        });
    }

    tracing::info!(
        template = %template_name,
        pattern = %pattern,
        "Created Elasticsearch index template"
    );

    Ok(())
}

/// Creates the index for a collection unless it already exists.
pub(super) async fn ensure_index(
    backend: &ElasticsearchIndex,
    collection: &str,
    index: &str,
) -> IndexResult<()> {
    let exists_response = backend
        .client()
        .indices()
        .exists(IndicesExistsParts::Index(&[index]))
        .send()
        .await
        .map_err(|e| {
            IndexError::unavailable(collection, format!("Failed to check index existence: {}", e))
        })?;

    if exists_response.status_code().is_success() {
        return Ok(());
    }

    let response = backend
        .client()
        .indices()
        .create(IndicesCreateParts::Index(index))
        .body(create_index_mapping(backend.config()))
        .send()
        .await
        .map_err(|e| {
            IndexError::unavailable(collection, format!("Failed to create index {}: {}", index, e))
        })?;

    let status = response.status_code();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        // Lost a creation race with another writer
        if body.contains("resource_already_exists_exception") {
            return Ok(());
        }
        return Err(IndexError::unavailable(
            collection,
            format!("Failed to create index {} (status {}): {}", index, status, body),
        ));
    }

    tracing::debug!(index = %index, "Created Elasticsearch index");
    Ok(())
}

/// Deletes the index for a collection. A missing index is not an error.
pub async fn delete_index(backend: &ElasticsearchIndex, collection: &str) -> IndexResult<()> {
    let index = backend.index_name(collection);

    let response = backend
        .client()
        .indices()
        .delete(IndicesDeleteParts::Index(&[index.as_str()]))
        .send()
        .await
        .map_err(|e| {
            IndexError::unavailable(collection, format!("Failed to delete index {}: {}", index, e))
        })?;

    let status = response.status_code();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        if !body.contains("index_not_found_exception") {
            return Err(IndexError::unavailable(
                collection,
                format!("Failed to delete index {}: {}", index, body),
            ));
        }
    }

    backend.forget_index(&index);
    tracing::debug!(index = %index, "Deleted Elasticsearch index");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_index_mapping_structure() {
        let config = ElasticsearchConfig {
            number_of_replicas: 0,
            ..Default::default()
        };
        let mapping = create_index_mapping(&config);

        assert_eq!(mapping["settings"]["number_of_shards"], 1);
        assert_eq!(mapping["settings"]["number_of_replicas"], 0);
        assert_eq!(mapping["settings"]["refresh_interval"], "1s");

        let props = &mapping["mappings"]["properties"];
        assert_eq!(props["id"]["type"], "keyword");

        let strings = &mapping["mappings"]["dynamic_templates"][0]["strings"];
        assert_eq!(strings["match_mapping_type"], "string");
        assert_eq!(strings["mapping"]["type"], "text");
        assert_eq!(strings["mapping"]["fields"]["keyword"]["type"], "keyword");
    }

    #[test]
    fn test_keyword_subfield_keeps_long_values() {
        let mapping = create_index_mapping(&ElasticsearchConfig::default());
        let keyword = &mapping["mappings"]["dynamic_templates"][0]["strings"]["mapping"]["fields"]
            ["keyword"];

        assert_eq!(keyword["ignore_above"], KEYWORD_IGNORE_ABOVE);
        // Worst-case UTF-8 width must fit in one Lucene term
        assert!(KEYWORD_IGNORE_ABOVE as usize * 4 <= 32766);
    }
}
