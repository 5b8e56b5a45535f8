//! Entity types and their registrations.
//!
//! Every entity type is synchronized by the same generic engine. A
//! [`Registration`] supplies what differs between them, namely the
//! collection name and the codec. [`SearchServices`] wires one facade per
//! registered kind over a shared index client and dispatcher.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::client::IndexClient;
use crate::codec::{DocumentCodec, JsonCodec};
use crate::config::{RetryConfig, SyncConfig};
use crate::facade::SearchFacade;
use crate::store::RecordSource;
use crate::sync::{SyncDispatcher, SyncReporter, Synchronizer, TracingReporter};
use crate::types::Record;

/// The entity types kept in the search index.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityKind {
    Address,
    Condition,
    Credential,
    PayOption,
    Medication,
    Membership,
    Metadata,
    Profile,
    Report,
    Stat,
    Task,
    Team,
}

impl EntityKind {
    /// Every entity kind.
    pub const ALL: [EntityKind; 12] = [
        EntityKind::Address,
        EntityKind::Condition,
        EntityKind::Credential,
        EntityKind::PayOption,
        EntityKind::Medication,
        EntityKind::Membership,
        EntityKind::Metadata,
        EntityKind::Profile,
        EntityKind::Report,
        EntityKind::Stat,
        EntityKind::Task,
        EntityKind::Team,
    ];

    /// Returns the collection name used in the index.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityKind::Address => "address",
            EntityKind::Condition => "condition",
            EntityKind::Credential => "credential",
            EntityKind::PayOption => "pay-option",
            EntityKind::Medication => "medication",
            EntityKind::Membership => "membership",
            EntityKind::Metadata => "metadata",
            EntityKind::Profile => "profile",
            EntityKind::Report => "report",
            EntityKind::Stat => "stat",
            EntityKind::Task => "task",
            EntityKind::Team => "team",
        }
    }

    /// Returns the registration for this kind.
    pub fn registration(&self) -> Registration<JsonCodec<EntityRecord>> {
        Registration::new(self.collection(), JsonCodec::new())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.collection())
    }
}

/// Returned when parsing an unknown entity kind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown entity kind: {0}")]
pub struct UnknownEntityKind(pub String);

impl FromStr for EntityKind {
    type Err = UnknownEntityKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.collection() == normalized)
            .ok_or_else(|| UnknownEntityKind(s.to_string()))
    }
}

/// A schemaless entity record: an identifier plus arbitrary JSON fields.
///
/// Field schemas belong to the primary store; the index layer carries them
/// through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// The record identifier.
    pub id: String,

    /// Every other field.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl EntityRecord {
    /// Creates a record with no fields.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Adds a field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a field value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

impl Record for EntityRecord {
    fn id(&self) -> &str {
        &self.id
    }
}

/// What the generic engine needs to know about one entity type.
#[derive(Debug, Clone)]
pub struct Registration<C> {
    /// Collection name in the index.
    pub collection: String,
    /// Codec for the entity's records.
    pub codec: Arc<C>,
}

impl<C: DocumentCodec> Registration<C> {
    /// Creates a registration.
    pub fn new(collection: impl Into<String>, codec: C) -> Self {
        Self {
            collection: collection.into(),
            codec: Arc::new(codec),
        }
    }

    /// Builds the facade for this entity type.
    pub fn facade(
        &self,
        source: Arc<dyn RecordSource<C::Record>>,
        client: Arc<dyn IndexClient>,
        dispatcher: SyncDispatcher,
        reporter: Arc<dyn SyncReporter>,
    ) -> SearchFacade<C> {
        let retry: RetryConfig = dispatcher.config().retry.clone();
        let synchronizer = Synchronizer::new(
            self.collection.clone(),
            self.codec.clone(),
            source,
            client.clone(),
        )
        .with_retry(retry)
        .with_reporter(reporter);

        SearchFacade::new(
            Arc::new(synchronizer),
            self.codec.clone(),
            client,
            dispatcher,
        )
    }
}

/// One search facade per entity kind, sharing a client and a dispatcher.
pub struct SearchServices {
    client: Arc<dyn IndexClient>,
    dispatcher: SyncDispatcher,
    facades: HashMap<EntityKind, SearchFacade<JsonCodec<EntityRecord>>>,
}

impl SearchServices {
    /// Starts building services over `client`.
    pub fn builder(client: Arc<dyn IndexClient>) -> SearchServicesBuilder {
        SearchServicesBuilder {
            client,
            config: SyncConfig::default(),
            reporter: Arc::new(TracingReporter),
            sources: HashMap::new(),
        }
    }

    /// Returns the facade for a kind, if a source was registered for it.
    pub fn facade(&self, kind: EntityKind) -> Option<&SearchFacade<JsonCodec<EntityRecord>>> {
        self.facades.get(&kind)
    }

    /// Returns the registered kinds in declaration order.
    pub fn kinds(&self) -> Vec<EntityKind> {
        let mut kinds: Vec<_> = self.facades.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Returns the shared index client.
    pub fn client(&self) -> &Arc<dyn IndexClient> {
        &self.client
    }

    /// Returns the shared dispatcher.
    pub fn dispatcher(&self) -> &SyncDispatcher {
        &self.dispatcher
    }
}

impl fmt::Debug for SearchServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchServices")
            .field("engine", &self.client.engine_name())
            .field("kinds", &self.kinds())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

/// Builder for [`SearchServices`].
pub struct SearchServicesBuilder {
    client: Arc<dyn IndexClient>,
    config: SyncConfig,
    reporter: Arc<dyn SyncReporter>,
    sources: HashMap<EntityKind, Arc<dyn RecordSource<EntityRecord>>>,
}

impl SearchServicesBuilder {
    /// Sets the dispatcher configuration.
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the failure reporter shared by every entity kind.
    pub fn reporter(mut self, reporter: Arc<dyn SyncReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Registers the primary-store source for one kind.
    pub fn source(
        mut self,
        kind: EntityKind,
        source: Arc<dyn RecordSource<EntityRecord>>,
    ) -> Self {
        self.sources.insert(kind, source);
        self
    }

    /// Registers a source for every kind.
    pub fn sources<F>(mut self, mut source_for: F) -> Self
    where
        F: FnMut(EntityKind) -> Arc<dyn RecordSource<EntityRecord>>,
    {
        for kind in EntityKind::ALL {
            self.sources.insert(kind, source_for(kind));
        }
        self
    }

    /// Builds the services.
    pub fn build(self) -> SearchServices {
        let dispatcher = SyncDispatcher::new(self.config);
        let facades = self
            .sources
            .into_iter()
            .map(|(kind, source)| {
                let facade = kind.registration().facade(
                    source,
                    self.client.clone(),
                    dispatcher.clone(),
                    self.reporter.clone(),
                );
                (kind, facade)
            })
            .collect();

        SearchServices {
            client: self.client,
            dispatcher,
            facades,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::client::MemoryIndex;
    use crate::store::MemoryRecordStore;

    #[test]
    fn test_collection_names_are_unique() {
        let mut names: Vec<_> = EntityKind::ALL.iter().map(|k| k.collection()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 12);
    }

    #[test]
    fn test_parse_entity_kind() {
        assert_eq!("pay-option".parse::<EntityKind>(), Ok(EntityKind::PayOption));
        assert_eq!("PAY_OPTION".parse::<EntityKind>(), Ok(EntityKind::PayOption));
        assert_eq!("team".parse::<EntityKind>(), Ok(EntityKind::Team));
        assert!("patient".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_kind_serializes_as_collection() {
        assert_eq!(
            serde_json::to_value(EntityKind::PayOption).unwrap(),
            json!("pay-option")
        );
        for kind in EntityKind::ALL {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.collection()));
        }
    }

    #[test]
    fn test_entity_record_flattens_fields() {
        let record = EntityRecord::new("m1")
            .with_field("name", "ibuprofen")
            .with_field("dose_mg", 200);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({"id": "m1", "name": "ibuprofen", "dose_mg": 200}));

        let back: EntityRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[tokio::test]
    async fn test_services_share_one_dispatcher() {
        let services = SearchServices::builder(Arc::new(MemoryIndex::new()))
            .sources(|_| -> Arc<dyn RecordSource<EntityRecord>> {
                Arc::new(MemoryRecordStore::<EntityRecord>::new())
            })
            .build();

        assert_eq!(services.kinds(), EntityKind::ALL.to_vec());
        let address = services.facade(EntityKind::Address).unwrap();
        let team = services.facade(EntityKind::Team).unwrap();
        assert_eq!(address.collection(), "address");
        assert_eq!(team.collection(), "team");

        address.remove_from_index("a1").unwrap();
        team.remove_from_index("t1").unwrap();
        let idle = services
            .dispatcher()
            .wait_for_idle(std::time::Duration::from_secs(5))
            .await;
        assert!(idle);
        assert_eq!(services.dispatcher().all_stats().len(), 2);
    }
}
