//! Schema metadata types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::validate::{validate_description, validate_keyname, validate_name};
use crate::version::VersionId;

/// Opaque, store-assigned identifier of a schema record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchemaId(String);

impl SchemaId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SchemaId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Lifecycle state of a schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SchemaState {
    #[default]
    Active,
    /// Retired by `delete_schema`; kept as a tombstone until purged
    Deleted,
    /// Claimed by `purge_schema`; the keyname cannot be re-created until the purge finishes
    Purging,
}

/// Caller-supplied fields for a new schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSchema {
    pub schema_keyname: String,
    pub schema_name: String,
    pub schema_description: String,
}

impl NewSchema {
    pub fn new(
        schema_keyname: impl Into<String>,
        schema_name: impl Into<String>,
        schema_description: impl Into<String>,
    ) -> Self {
        Self {
            schema_keyname: schema_keyname.into(),
            schema_name: schema_name.into(),
            schema_description: schema_description.into(),
        }
    }

    /// Check keyname grammar and field lengths
    pub fn validate(&self) -> Result<()> {
        validate_keyname(&self.schema_keyname)?;
        validate_name(&self.schema_name)?;
        validate_description(&self.schema_description)
    }
}

/// Replacement name and description for an existing schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataUpdate {
    pub schema_keyname: String,
    pub schema_name: String,
    pub schema_description: String,
}

impl MetadataUpdate {
    pub fn validate(&self) -> Result<()> {
        validate_keyname(&self.schema_keyname)?;
        validate_name(&self.schema_name)?;
        validate_description(&self.schema_description)
    }
}

/// A registered schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaMetadata {
    /// Assigned by the metadata store on creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_id: Option<SchemaId>,
    pub schema_keyname: String,
    pub schema_name: String,
    pub schema_description: String,
    /// The version enforced on writes
    pub active_version_id: VersionId,
    /// Copy of the active version's definition
    pub active_definition: Value,
    #[serde(default)]
    pub state: SchemaState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SchemaMetadata {
    /// Build unsaved metadata pointing at its first version
    pub fn new(fields: NewSchema, active_version_id: VersionId, active_definition: Value) -> Self {
        let now = Utc::now();
        Self {
            schema_id: None,
            schema_keyname: fields.schema_keyname,
            schema_name: fields.schema_name,
            schema_description: fields.schema_description,
            active_version_id,
            active_definition,
            state: SchemaState::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SchemaState::Active
    }

    /// Apply a name/description update
    pub fn apply_update(&mut self, update: &MetadataUpdate) {
        self.schema_name = update.schema_name.clone();
        self.schema_description = update.schema_description.clone();
        self.updated_at = Utc::now();
    }

    /// Point at a different version
    pub fn set_active_version(&mut self, version_id: VersionId, definition: Value) {
        self.active_version_id = version_id;
        self.active_definition = definition;
        self.updated_at = Utc::now();
    }
}

/// Filter for listing schemas
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFilter {
    /// Restrict to one lifecycle state (`None` = any)
    #[serde(default)]
    pub state: Option<SchemaState>,
    /// Restrict to one keyname
    #[serde(default)]
    pub schema_keyname: Option<String>,
}

impl MetadataFilter {
    pub fn active() -> Self {
        Self {
            state: Some(SchemaState::Active),
            schema_keyname: None,
        }
    }

    pub fn deleted(keyname: impl Into<String>) -> Self {
        Self::in_state(SchemaState::Deleted, keyname)
    }

    /// The record of `keyname`, if it is in `state`
    pub fn in_state(state: SchemaState, keyname: impl Into<String>) -> Self {
        Self {
            state: Some(state),
            schema_keyname: Some(keyname.into()),
        }
    }

    pub fn matches(&self, metadata: &SchemaMetadata) -> bool {
        self.state.map_or(true, |s| s == metadata.state)
            && self
                .schema_keyname
                .as_deref()
                .map_or(true, |k| k == metadata.schema_keyname)
    }
}
