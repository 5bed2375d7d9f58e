//! Schema definition versions
//!
//! A version is an immutable snapshot of a schema definition. Changing a
//! schema's definition always appends a new version; the schema metadata
//! points at the one currently enforced.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::checksum::Checksum;

/// Opaque, store-assigned identifier of a definition version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(String);

impl VersionId {
    /// Allocate a fresh identifier
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for VersionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VersionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A stored schema definition version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDefinitionVersion {
    /// Store-assigned identifier
    pub version_id: VersionId,
    /// Keyname of the owning schema
    pub schema_keyname: String,
    /// The JSON Schema document
    pub schema_definition: Value,
    /// SHA256 of the canonical definition
    pub checksum: Checksum,
    /// When this version was created
    pub created_at: DateTime<Utc>,
}

impl SchemaDefinitionVersion {
    /// Create a new version stamped with the current time
    pub fn new(version_id: VersionId, schema_keyname: impl Into<String>, schema_definition: Value) -> Self {
        Self::created_at(version_id, schema_keyname, schema_definition, Utc::now())
    }

    /// Create a version with an explicit creation time
    pub fn created_at(
        version_id: VersionId,
        schema_keyname: impl Into<String>,
        schema_definition: Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        let checksum = Checksum::from_json(&schema_definition);
        Self {
            version_id,
            schema_keyname: schema_keyname.into(),
            schema_definition,
            checksum,
            created_at,
        }
    }

    /// Verify the checksum matches the definition
    pub fn verify_checksum(&self) -> bool {
        self.checksum.verify_json(&self.schema_definition)
    }

    /// Whether this version may be pruned at `cutoff` while `keep` is active
    pub fn is_prunable(&self, keep: &VersionId, cutoff: DateTime<Utc>) -> bool {
        self.version_id != *keep && self.created_at < cutoff
    }
}
