//! Data Access
//!
//! Reads and writes records in a schema's collection. Inserts are validated
//! against the schema's active definition at the time of the call; updates are
//! not validated at all, which is why [`DataAccess::audit_records`] exists.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::definition::{DefinitionValidator, InstanceError};
use crate::error::{EntityKind, Result, SchemaError};
use crate::record::{strip_record_id, Payload, RecordFilter, RecordId, StoredRecord};
use crate::schema::SchemaMetadata;
use crate::store::Stores;

/// Result of [`DataAccess::insert_data`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InsertOutcome {
    Inserted { record_id: RecordId },
    /// The payload did not conform; nothing was written
    Rejected { errors: Vec<InstanceError> },
}

impl InsertOutcome {
    pub fn is_inserted(&self) -> bool {
        matches!(self, InsertOutcome::Inserted { .. })
    }

    pub fn record_id(&self) -> Option<&RecordId> {
        match self {
            InsertOutcome::Inserted { record_id } => Some(record_id),
            InsertOutcome::Rejected { .. } => None,
        }
    }

    pub fn errors(&self) -> &[InstanceError] {
        match self {
            InsertOutcome::Inserted { .. } => &[],
            InsertOutcome::Rejected { errors } => errors,
        }
    }
}

/// A stored record that no longer conforms to the active definition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NonConformingRecord {
    pub record_id: RecordId,
    pub errors: Vec<InstanceError>,
}

/// Record operations on schema collections
#[derive(Clone)]
pub struct DataAccess {
    stores: Stores,
    validator: Arc<dyn DefinitionValidator>,
}

impl DataAccess {
    pub fn new(stores: Stores, validator: Arc<dyn DefinitionValidator>) -> Self {
        Self { stores, validator }
    }

    /// Validate `payload` against the active definition and store it.
    ///
    /// A non-conforming payload is not an error: the validation errors are
    /// returned as [`InsertOutcome::Rejected`].
    pub fn insert_data(&self, keyname: &str, mut payload: Value) -> Result<InsertOutcome> {
        let schema = self.active_schema(keyname)?;

        // `_id` belongs to the store, never to the definition
        if let Value::Object(map) = &mut payload {
            strip_record_id(map);
        }

        let errors = self.validator.validate_instance(&schema.active_definition, &payload)?;
        if !errors.is_empty() {
            debug!(keyname, errors = errors.len(), "payload rejected");
            return Ok(InsertOutcome::Rejected { errors });
        }

        let payload = match payload {
            Value::Object(map) => map,
            other => {
                return Err(SchemaError::Validation(format!(
                    "record payload must be a JSON object, got {}",
                    other
                )))
            }
        };

        let record_id = self.stores.data.insert(keyname, payload)?;
        debug!(keyname, record_id = record_id.as_str(), "record inserted");
        Ok(InsertOutcome::Inserted { record_id })
    }

    /// Records of `keyname` matching every constraint in `filter`.
    ///
    /// Works for deleted schemas too, as long as the collection exists.
    pub fn get_data(&self, keyname: &str, filter: &RecordFilter) -> Result<Vec<StoredRecord>> {
        Ok(self.stores.data.query(keyname, filter)?)
    }

    pub fn get_record(&self, keyname: &str, record_id: &RecordId) -> Result<Option<StoredRecord>> {
        Ok(self.stores.data.get_one(keyname, record_id)?)
    }

    /// Shallow-merge `partial` into a record. The result is not validated.
    pub fn update_data(
        &self,
        keyname: &str,
        record_id: &RecordId,
        mut partial: Payload,
    ) -> Result<Option<RecordId>> {
        strip_record_id(&mut partial);
        let updated = self.stores.data.update(keyname, partial, record_id)?;
        match &updated {
            Some(id) => debug!(keyname, record_id = id.as_str(), "record updated"),
            None => debug!(keyname, record_id = record_id.as_str(), "no record to update"),
        }
        Ok(updated)
    }

    pub fn delete_data(&self, keyname: &str, record_id: &RecordId) -> Result<RecordId> {
        let deleted = self
            .stores
            .data
            .delete(keyname, record_id)?
            .ok_or_else(|| SchemaError::not_found(EntityKind::Record, record_id.as_str()))?;
        debug!(keyname, record_id = deleted.as_str(), "record deleted");
        Ok(deleted)
    }

    /// Re-validate every stored record against the current active definition
    pub fn audit_records(&self, keyname: &str) -> Result<Vec<NonConformingRecord>> {
        let schema = self.active_schema(keyname)?;
        let records = self.stores.data.query(keyname, &RecordFilter::new())?;
        let total = records.len();

        let mut failing = Vec::new();
        for record in records {
            let errors = self
                .validator
                .validate_instance(&schema.active_definition, &Value::Object(record.payload))?;
            if !errors.is_empty() {
                failing.push(NonConformingRecord {
                    record_id: record.record_id,
                    errors,
                });
            }
        }

        if failing.is_empty() {
            info!(keyname, total, "all records conform");
        } else {
            warn!(keyname, total, failing = failing.len(), "non-conforming records found");
        }
        Ok(failing)
    }

    fn active_schema(&self, keyname: &str) -> Result<SchemaMetadata> {
        self.stores
            .metadata
            .get(keyname)?
            .ok_or_else(|| SchemaError::not_found(EntityKind::Schema, keyname))
    }
}
