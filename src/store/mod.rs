//! Storage ports
//!
//! The orchestrators talk to three independently failing stores through the
//! traits in this module:
//!
//! - [`SchemaMetadataStore`]: one record per schema keyname
//! - [`SchemaVersionStore`]: the append-only history of definitions
//! - [`DataStore`]: one collection of records per schema keyname
//!
//! Two backends implement every port: [`memory`] (hash maps behind locks) and
//! [`document`] (a directory of JSON documents). [`Stores`] bundles one of each
//! so the orchestrators never name a concrete backend.

pub mod document;
pub mod memory;

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};
use crate::record::{Payload, RecordFilter, RecordId, StoredRecord};
use crate::schema::{MetadataFilter, MetadataUpdate, SchemaId, SchemaMetadata, SchemaState};
use crate::version::{SchemaDefinitionVersion, VersionId};

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Infrastructure failures raised by a storage backend
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Data collection does not exist: {0}")]
    MissingCollection(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Corrupted document {id}: {reason}")]
    Corrupted { id: String, reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Outcome of [`SchemaMetadataStore::create`]
#[derive(Debug, Clone)]
pub struct CreatedSchema {
    pub schema_id: SchemaId,
    /// The tombstone the new record replaced, kept so a rollback can restore it
    pub replaced: Option<SchemaMetadata>,
}

/// Fail with [`StoreError::Conflict`] unless a new schema may take the keyname
pub(crate) fn check_creatable(existing: Option<&SchemaMetadata>, keyname: &str) -> StoreResult<()> {
    match existing.map(|m| m.state) {
        Some(SchemaState::Active) => Err(StoreError::Conflict(format!(
            "schema '{}' already exists",
            keyname
        ))),
        Some(SchemaState::Purging) => Err(StoreError::Conflict(format!(
            "schema '{}' is being purged",
            keyname
        ))),
        Some(SchemaState::Deleted) | None => Ok(()),
    }
}

/// Persistence for schema metadata, keyed by `schema_keyname`
pub trait SchemaMetadataStore: Send + Sync {
    /// Fetch the active schema with this keyname
    fn get(&self, keyname: &str) -> StoreResult<Option<SchemaMetadata>>;

    /// List schemas matching `filter`, ordered by keyname
    fn list(&self, filter: &MetadataFilter) -> StoreResult<Vec<SchemaMetadata>>;

    /// Persist a new schema and assign its id.
    /// Fails with [`StoreError::Conflict`] if an active or purging schema holds
    /// the keyname; a deleted tombstone is replaced and returned.
    fn create(&self, metadata: &SchemaMetadata) -> StoreResult<CreatedSchema>;

    /// Undo [`Self::create`]: if the record still carries `created`, put
    /// `previous` back (or remove the record when there was none).
    /// Returns `false` when the record belongs to someone else.
    fn rollback_create(
        &self,
        keyname: &str,
        created: &SchemaId,
        previous: Option<&SchemaMetadata>,
    ) -> StoreResult<bool>;

    /// Retire an active schema, leaving a tombstone
    fn delete(&self, keyname: &str) -> StoreResult<Option<SchemaId>>;

    /// Move a deleted (or already purging) schema to the purging state.
    /// An active or missing schema is left alone and yields `None`.
    fn begin_purge(&self, keyname: &str) -> StoreResult<Option<SchemaId>>;

    /// Physically remove the record, only while it is not active and still
    /// carries `expected`
    fn purge_deleted(&self, keyname: &str, expected: &SchemaId) -> StoreResult<Option<SchemaId>>;

    /// Replace name and description of an active schema
    fn update(&self, update: &MetadataUpdate) -> StoreResult<Option<SchemaId>>;

    /// Point an active schema at another version
    fn update_active_version(
        &self,
        keyname: &str,
        version_id: &VersionId,
        definition: &Value,
    ) -> StoreResult<Option<SchemaId>>;
}

/// Persistence for schema definition versions
pub trait SchemaVersionStore: Send + Sync {
    /// Append a new version and assign its id
    fn create(&self, keyname: &str, definition: &Value) -> StoreResult<VersionId>;

    fn get(&self, id: &VersionId) -> StoreResult<Option<SchemaDefinitionVersion>>;

    /// All versions of a schema, oldest first
    fn list_by_keyname(&self, keyname: &str) -> StoreResult<Vec<SchemaDefinitionVersion>>;

    fn delete(&self, id: &VersionId) -> StoreResult<Option<VersionId>>;

    /// Delete versions of `keyname` created strictly before `cutoff`, except `keep`
    fn delete_older_than(
        &self,
        keyname: &str,
        keep: &VersionId,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<VersionId>>;
}

/// Per-schema record collections
pub trait DataStore: Send + Sync {
    /// Provision the collection for `keyname`; `false` if it already existed
    fn create_collection(&self, keyname: &str) -> StoreResult<bool>;

    /// Let the backend react to a changed active definition
    fn alter_collection(&self, keyname: &str) -> StoreResult<bool>;

    /// Remove the collection and every record in it; `false` if absent
    fn drop_collection(&self, keyname: &str) -> StoreResult<bool>;

    fn get_one(&self, keyname: &str, id: &RecordId) -> StoreResult<Option<StoredRecord>>;

    /// Records matching every constraint in `filter`.
    /// Fails with [`StoreError::MissingCollection`] if the collection does not exist.
    fn query(&self, keyname: &str, filter: &RecordFilter) -> StoreResult<Vec<StoredRecord>>;

    fn insert(&self, keyname: &str, payload: Payload) -> StoreResult<RecordId>;

    /// Shallow-merge `payload` into an existing record
    fn update(&self, keyname: &str, payload: Payload, id: &RecordId) -> StoreResult<Option<RecordId>>;

    fn delete(&self, keyname: &str, id: &RecordId) -> StoreResult<Option<RecordId>>;
}

/// One backend instance per port
#[derive(Clone)]
pub struct Stores {
    pub metadata: Arc<dyn SchemaMetadataStore>,
    pub versions: Arc<dyn SchemaVersionStore>,
    pub data: Arc<dyn DataStore>,
}

impl Stores {
    /// Fresh, empty in-memory stores
    pub fn in_memory() -> Self {
        Self {
            metadata: Arc::new(memory::MemoryMetadataStore::new()),
            versions: Arc::new(memory::MemoryVersionStore::new()),
            data: Arc::new(memory::MemoryDataStore::new()),
        }
    }

    /// Stores backed by a document database rooted at `root`
    pub fn document(root: impl AsRef<Path>) -> StoreResult<Self> {
        let db = Arc::new(document::DocumentDatabase::open(root)?);
        Ok(Self {
            metadata: Arc::new(document::DocumentMetadataStore::new(Arc::clone(&db))),
            versions: Arc::new(document::DocumentVersionStore::new(Arc::clone(&db))),
            data: Arc::new(document::DocumentDataStore::new(db)),
        })
    }

    /// Build the backend selected in configuration
    pub fn from_config(config: &StorageConfig) -> StoreResult<Self> {
        match config.backend {
            StorageBackend::Memory => Ok(Self::in_memory()),
            StorageBackend::Document => Self::document(&config.path),
        }
    }
}
