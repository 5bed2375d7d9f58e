//! Records stored under a schema

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Field name carrying the record id in document form
pub const RECORD_ID_FIELD: &str = "_id";

/// Free-form record payload
pub type Payload = Map<String, Value>;

/// Equality constraints on top-level payload fields
pub type RecordFilter = Map<String, Value>;

/// Opaque, store-assigned identifier of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A record persisted in a schema's collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub record_id: RecordId,
    pub schema_keyname: String,
    pub payload: Payload,
}

impl StoredRecord {
    pub fn new(record_id: RecordId, schema_keyname: impl Into<String>, mut payload: Payload) -> Self {
        strip_record_id(&mut payload);
        Self {
            record_id,
            schema_keyname: schema_keyname.into(),
            payload,
        }
    }

    /// True if every constraint in `filter` equals the record's field.
    /// `_id` is matched against the record id.
    pub fn matches(&self, filter: &RecordFilter) -> bool {
        filter.iter().all(|(key, expected)| {
            if key == RECORD_ID_FIELD {
                expected.as_str() == Some(self.record_id.as_str())
            } else {
                self.payload.get(key) == Some(expected)
            }
        })
    }

    /// Shallow-merge `partial` into the payload; `_id` in `partial` is ignored
    pub fn merge(&mut self, mut partial: Payload) {
        strip_record_id(&mut partial);
        self.payload.extend(partial);
    }

    /// The payload with `_id` set, as handed back to callers
    pub fn to_document(&self) -> Value {
        let mut doc = self.payload.clone();
        doc.insert(RECORD_ID_FIELD.to_string(), Value::String(self.record_id.as_str().to_string()));
        Value::Object(doc)
    }
}

/// Remove a caller-supplied `_id` field
pub fn strip_record_id(payload: &mut Payload) -> Option<Value> {
    payload.remove(RECORD_ID_FIELD)
}
