//! Document codecs.
//!
//! A [`DocumentCodec`] converts records to documents and back. The
//! synchronization engine is generic over this capability and never over
//! concrete entity types, so adding an entity type means adding a codec (or
//! reusing [`JsonCodec`]) and a registration.

use std::fmt;
use std::marker::PhantomData;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CodecError;
use crate::types::{Document, Record};

/// Converts records of one entity type to and from index documents.
pub trait DocumentCodec: Send + Sync + 'static {
    /// The record type handled by this codec.
    type Record: Record;

    /// Encodes a record as a document.
    ///
    /// Encoding is total: fields the codec cannot represent, or that are
    /// null, are left out of the document instead of producing an error.
    fn encode(&self, record: &Self::Record) -> Document;

    /// Decodes a document back into a record.
    ///
    /// Fields missing from the document take the record's default value.
    fn decode(&self, document: Document) -> Result<Self::Record, CodecError>;
}

/// A codec for any serde-serializable record.
///
/// The record is serialized to a JSON object whose top-level entries become
/// the document fields. Null entries are dropped. Decoding re-inserts the
/// identifier and deserializes the object, so record types should use
/// `#[serde(default)]` for fields that may be absent from older documents.
pub struct JsonCodec<R> {
    _record: PhantomData<fn() -> R>,
}

impl<R> JsonCodec<R> {
    /// Creates a new codec.
    pub fn new() -> Self {
        Self {
            _record: PhantomData,
        }
    }
}

impl<R> Default for JsonCodec<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Clone for JsonCodec<R> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for JsonCodec<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("record", &std::any::type_name::<R>())
            .finish()
    }
}

impl<R> DocumentCodec for JsonCodec<R>
where
    R: Record + Serialize + DeserializeOwned,
{
    type Record = R;

    fn encode(&self, record: &R) -> Document {
        let mut document = Document::new(record.id());

        match serde_json::to_value(record) {
            Ok(Value::Object(map)) => {
                for (name, value) in map {
                    document.set_field(name, value);
                }
            }
            Ok(other) => {
                tracing::warn!(
                    id = %record.id(),
                    kind = json_kind(&other),
                    "Record did not serialize to an object, indexing identifier only"
                );
            }
            Err(e) => {
                tracing::warn!(
                    id = %record.id(),
                    error = %e,
                    "Record failed to serialize, indexing identifier only"
                );
            }
        }

        document
    }

    fn decode(&self, document: Document) -> Result<R, CodecError> {
        let (id, mut fields) = document.into_parts();
        if id.is_empty() {
            return Err(CodecError::MissingIdentifier);
        }
        fields.insert(Document::ID_FIELD.to_string(), Value::String(id.clone()));

        serde_json::from_value(Value::Object(fields)).map_err(|e| CodecError::InvalidDocument {
            id,
            message: e.to_string(),
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
