//! Core data model: records read from the primary store and the documents
//! derived from them for the search index.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CodecError;

/// An entity instance owned by the primary store.
///
/// The synchronization layer never mutates records; it only needs the
/// identifier, which must be unique within a collection and immutable once
/// assigned.
pub trait Record: Send + Sync + 'static {
    /// Returns the record's identifier.
    fn id(&self) -> &str;
}

/// The indexed representation of a [`Record`].
///
/// A document is keyed by the record identifier and carries a flat set of
/// JSON fields. Documents are derived and disposable: every index mutation
/// replaces a whole document, never a subset of its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    id: String,
    fields: Map<String, Value>,
}

impl Document {
    /// Name of the source field carrying the identifier inside the engine.
    pub const ID_FIELD: &'static str = "id";

    /// Creates an empty document for the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Creates a document from an identifier and a field map.
    ///
    /// A stray `id` entry in `fields` is dropped; the identifier is always
    /// taken from `id`.
    pub fn from_fields(id: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        fields.remove(Self::ID_FIELD);
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Adds a field, skipping nulls.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_field(name, value);
        self
    }

    /// Sets a field in place. Null values remove the field instead.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        if name == Self::ID_FIELD {
            return;
        }
        match value.into() {
            Value::Null => {
                self.fields.remove(&name);
            }
            value => {
                self.fields.insert(name, value);
            }
        }
    }

    /// Returns the document identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns all non-identifier fields.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns a single field, if present.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Splits the document into its identifier and fields.
    pub fn into_parts(self) -> (String, Map<String, Value>) {
        (self.id, self.fields)
    }

    /// Renders the document as an engine source object, with the identifier
    /// stored under [`Document::ID_FIELD`].
    pub fn to_source(&self) -> Value {
        let mut source = self.fields.clone();
        source.insert(Self::ID_FIELD.to_string(), Value::String(self.id.clone()));
        Value::Object(source)
    }

    /// Rebuilds a document from an engine source object.
    pub fn from_source(source: Value) -> Result<Self, CodecError> {
        let Value::Object(mut fields) = source else {
            return Err(CodecError::MissingIdentifier);
        };
        let id = match fields.remove(Self::ID_FIELD) {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => return Err(CodecError::MissingIdentifier),
        };
        Ok(Self { id, fields })
    }
}
