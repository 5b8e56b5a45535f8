//! Index Admin
//!
//! Operator commands for the Elasticsearch indices behind the entity search
//! facades.

use clap::{Parser, Subcommand};
use futures::TryStreamExt;
use tracing::info;

use helios_index_sync::client::ElasticsearchAuth;
use helios_index_sync::client::elasticsearch::schema;
use helios_index_sync::{
    ElasticsearchConfig, ElasticsearchIndex, EntityKind, IndexClient, IndexSyncConfig,
    QueryTranslator, SearchQuery,
};

/// Command line configuration.
#[derive(Debug, Parser)]
#[command(name = "index-admin")]
#[command(about = "Maintain the entity search indices")]
#[command(version)]
struct AdminConfig {
    /// Elasticsearch node URLs (comma-separated).
    #[arg(long, env = "INDEX_SYNC_NODES", default_value = "http://localhost:9200")]
    nodes: String,

    /// Prefix for index names.
    #[arg(long, env = "INDEX_SYNC_INDEX_PREFIX", default_value = "helios")]
    index_prefix: String,

    /// Elasticsearch username.
    #[arg(long, env = "INDEX_SYNC_USERNAME")]
    username: Option<String>,

    /// Elasticsearch password.
    #[arg(long, env = "INDEX_SYNC_PASSWORD")]
    password: Option<String>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "INDEX_SYNC_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check cluster health.
    Health,

    /// Install the index template and create every collection's index.
    Init,

    /// Run a query-string search and print matching documents as JSON lines.
    Search {
        /// Entity kind, e.g. `team` or `pay-option`.
        entity: EntityKind,

        /// Query in query-string syntax.
        query: String,
    },

    /// Delete a collection's index.
    Drop {
        /// Entity kind whose index is deleted.
        entity: EntityKind,
    },
}

impl AdminConfig {
    fn index_sync(&self) -> IndexSyncConfig {
        IndexSyncConfig {
            elasticsearch: self.elasticsearch(),
            ..Default::default()
        }
    }

    fn elasticsearch(&self) -> ElasticsearchConfig {
        let nodes = self
            .nodes
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let auth = match (&self.username, &self.password) {
            (Some(username), Some(password)) => Some(ElasticsearchAuth::Basic {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        ElasticsearchConfig {
            nodes,
            index_prefix: self.index_prefix.clone(),
            auth,
            ..Default::default()
        }
    }
}

fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("helios_index_sync={},index_admin={}", level, level))
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AdminConfig::parse();
    init_logging(&config.log_level);

    let sync_config = config.index_sync();
    if let Err(errors) = sync_config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    let es_config = sync_config.elasticsearch;
    info!(
        nodes = ?es_config.nodes,
        index_prefix = %es_config.index_prefix,
        "Connecting to Elasticsearch"
    );
    let index = ElasticsearchIndex::new(es_config)?;

    match config.command {
        Command::Health => {
            index.health_check().await?;
            println!("ok");
        }
        Command::Init => {
            schema::create_index_template(&index).await?;
            for kind in EntityKind::ALL {
                index.ensure_collection(kind.collection()).await?;
                info!(
                    collection = %kind,
                    index = %index.index_name(kind.collection()),
                    "Index ready"
                );
            }
        }
        Command::Search { entity, query } => {
            let native = QueryTranslator::translate(SearchQuery::Text(query));
            let mut documents = index.query(entity.collection(), native).await?;
            let mut count = 0usize;
            while let Some(document) = documents.try_next().await? {
                println!("{}", serde_json::to_string(&document.to_source())?);
                count += 1;
            }
            info!(collection = %entity, count, "Search complete");
        }
        Command::Drop { entity } => {
            schema::delete_index(&index, entity.collection()).await?;
            info!(collection = %entity, "Index deleted");
        }
    }

    Ok(())
}
