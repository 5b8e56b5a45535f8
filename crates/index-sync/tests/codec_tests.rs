//! Property tests for the document codecs.

use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use helios_index_sync::{Document, DocumentCodec, EntityRecord, JsonCodec, Record};

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,24}".prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
    ]
}

fn field_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        3 => scalar(),
        1 => prop::collection::vec(scalar(), 0..4).prop_map(Value::from),
        1 => prop::collection::btree_map("[a-z]{1,6}", scalar(), 0..3)
            .prop_map(|m| Value::Object(m.into_iter().collect())),
    ]
}

prop_compose! {
    fn entity_record()(
        id in "[a-z0-9][a-z0-9-]{0,15}",
        fields in prop::collection::btree_map("[a-z_]{1,10}", field_value(), 0..6),
    ) -> EntityRecord {
        let fields: Map<String, Value> = fields
            .into_iter()
            .filter(|(name, _)| name != Document::ID_FIELD)
            .collect();
        EntityRecord { id, fields }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Credential {
    id: String,
    #[serde(default)]
    issuer: String,
    #[serde(default)]
    expires_in_days: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    note: Option<String>,
}

impl Record for Credential {
    fn id(&self) -> &str {
        &self.id
    }
}

prop_compose! {
    fn credential()(
        id in "[a-z0-9]{1,12}",
        issuer in "[a-zA-Z ]{0,20}",
        expires_in_days in any::<u32>(),
        note in prop::option::of("[a-z ]{0,20}"),
    ) -> Credential {
        Credential { id, issuer, expires_in_days, note }
    }
}

proptest! {
    #[test]
    fn entity_records_survive_the_index(record in entity_record()) {
        let codec = JsonCodec::<EntityRecord>::new();
        let document = codec.encode(&record);
        prop_assert_eq!(document.id(), record.id.as_str());

        let back = codec.decode(document).unwrap();
        prop_assert_eq!(back, record);
    }

    #[test]
    fn typed_records_survive_the_index(record in credential()) {
        let codec = JsonCodec::<Credential>::new();
        let back = codec.decode(codec.encode(&record)).unwrap();
        prop_assert_eq!(back, record);
    }

    #[test]
    fn engine_source_preserves_documents(record in entity_record()) {
        let codec = JsonCodec::<EntityRecord>::new();
        let document = codec.encode(&record);
        let from_engine = Document::from_source(document.to_source()).unwrap();
        prop_assert_eq!(codec.decode(from_engine).unwrap(), record);
    }
}

#[test]
fn null_fields_are_dropped() {
    let codec = JsonCodec::<EntityRecord>::new();
    let record = EntityRecord::new("p1")
        .with_field("nickname", Value::Null)
        .with_field("name", "Kim");

    let document = codec.encode(&record);
    assert!(document.field("nickname").is_none());

    let back = codec.decode(document).unwrap();
    assert_eq!(back.field("name"), Some(&Value::from("Kim")));
    assert!(back.field("nickname").is_none());
}
