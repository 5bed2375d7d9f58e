//! In-memory store backends
//!
//! Non-persistent implementations of the storage ports, suitable for tests and
//! single-process use.

use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{
    check_creatable, CreatedSchema, DataStore, SchemaMetadataStore, SchemaVersionStore, StoreError,
    StoreResult,
};
use crate::record::{Payload, RecordFilter, RecordId, StoredRecord};
use crate::schema::{MetadataFilter, MetadataUpdate, SchemaId, SchemaMetadata, SchemaState};
use crate::version::{SchemaDefinitionVersion, VersionId};

fn read<T>(lock: &RwLock<T>) -> StoreResult<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| StoreError::LockPoisoned)
}

fn write<T>(lock: &RwLock<T>) -> StoreResult<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| StoreError::LockPoisoned)
}

/// Schema metadata held in a map keyed by keyname
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    schemas: RwLock<BTreeMap<String, SchemaMetadata>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SchemaMetadataStore for MemoryMetadataStore {
    fn get(&self, keyname: &str) -> StoreResult<Option<SchemaMetadata>> {
        let schemas = read(&self.schemas)?;
        Ok(schemas.get(keyname).filter(|m| m.is_active()).cloned())
    }

    fn list(&self, filter: &MetadataFilter) -> StoreResult<Vec<SchemaMetadata>> {
        let schemas = read(&self.schemas)?;
        Ok(schemas.values().filter(|m| filter.matches(m)).cloned().collect())
    }

    fn create(&self, metadata: &SchemaMetadata) -> StoreResult<CreatedSchema> {
        let mut schemas = write(&self.schemas)?;
        check_creatable(schemas.get(&metadata.schema_keyname), &metadata.schema_keyname)?;

        let id = SchemaId::generate();
        let mut stored = metadata.clone();
        stored.schema_id = Some(id.clone());
        let replaced = schemas.insert(stored.schema_keyname.clone(), stored);
        Ok(CreatedSchema {
            schema_id: id,
            replaced,
        })
    }

    fn rollback_create(
        &self,
        keyname: &str,
        created: &SchemaId,
        previous: Option<&SchemaMetadata>,
    ) -> StoreResult<bool> {
        let mut schemas = write(&self.schemas)?;
        if schemas.get(keyname).and_then(|m| m.schema_id.as_ref()) != Some(created) {
            return Ok(false);
        }
        match previous {
            Some(previous) => schemas.insert(keyname.to_string(), previous.clone()),
            None => schemas.remove(keyname),
        };
        Ok(true)
    }

    fn delete(&self, keyname: &str) -> StoreResult<Option<SchemaId>> {
        let mut schemas = write(&self.schemas)?;
        match schemas.get_mut(keyname) {
            Some(meta) if meta.is_active() => {
                meta.state = SchemaState::Deleted;
                meta.updated_at = Utc::now();
                Ok(meta.schema_id.clone())
            }
            _ => Ok(None),
        }
    }

    fn begin_purge(&self, keyname: &str) -> StoreResult<Option<SchemaId>> {
        let mut schemas = write(&self.schemas)?;
        match schemas.get_mut(keyname) {
            Some(meta) if !meta.is_active() => {
                meta.state = SchemaState::Purging;
                meta.updated_at = Utc::now();
                Ok(meta.schema_id.clone())
            }
            _ => Ok(None),
        }
    }

    fn purge_deleted(&self, keyname: &str, expected: &SchemaId) -> StoreResult<Option<SchemaId>> {
        let mut schemas = write(&self.schemas)?;
        let removable = schemas
            .get(keyname)
            .is_some_and(|m| !m.is_active() && m.schema_id.as_ref() == Some(expected));
        if !removable {
            return Ok(None);
        }
        Ok(schemas.remove(keyname).and_then(|m| m.schema_id))
    }

    fn update(&self, update: &MetadataUpdate) -> StoreResult<Option<SchemaId>> {
        let mut schemas = write(&self.schemas)?;
        match schemas.get_mut(&update.schema_keyname) {
            Some(meta) if meta.is_active() => {
                meta.apply_update(update);
                Ok(meta.schema_id.clone())
            }
            _ => Ok(None),
        }
    }

    fn update_active_version(
        &self,
        keyname: &str,
        version_id: &VersionId,
        definition: &Value,
    ) -> StoreResult<Option<SchemaId>> {
        let mut schemas = write(&self.schemas)?;
        match schemas.get_mut(keyname) {
            Some(meta) if meta.is_active() => {
                meta.set_active_version(version_id.clone(), definition.clone());
                Ok(meta.schema_id.clone())
            }
            _ => Ok(None),
        }
    }
}

/// Definition versions held in a map keyed by version id
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    versions: RwLock<HashMap<VersionId, SchemaDefinitionVersion>>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a fully built version, keeping its id and timestamp
    pub fn insert_version(&self, version: SchemaDefinitionVersion) -> StoreResult<()> {
        let mut versions = write(&self.versions)?;
        versions.insert(version.version_id.clone(), version);
        Ok(())
    }
}

impl SchemaVersionStore for MemoryVersionStore {
    fn create(&self, keyname: &str, definition: &Value) -> StoreResult<VersionId> {
        let version = SchemaDefinitionVersion::new(VersionId::generate(), keyname, definition.clone());
        let id = version.version_id.clone();
        self.insert_version(version)?;
        Ok(id)
    }

    fn get(&self, id: &VersionId) -> StoreResult<Option<SchemaDefinitionVersion>> {
        let versions = read(&self.versions)?;
        Ok(versions.get(id).cloned())
    }

    fn list_by_keyname(&self, keyname: &str) -> StoreResult<Vec<SchemaDefinitionVersion>> {
        let versions = read(&self.versions)?;
        let mut found: Vec<_> = versions
            .values()
            .filter(|v| v.schema_keyname == keyname)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.version_id.cmp(&b.version_id)));
        Ok(found)
    }

    fn delete(&self, id: &VersionId) -> StoreResult<Option<VersionId>> {
        let mut versions = write(&self.versions)?;
        Ok(versions.remove(id).map(|v| v.version_id))
    }

    fn delete_older_than(
        &self,
        keyname: &str,
        keep: &VersionId,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<VersionId>> {
        let mut versions = write(&self.versions)?;
        let mut doomed: Vec<VersionId> = versions
            .values()
            .filter(|v| v.schema_keyname == keyname && v.is_prunable(keep, cutoff))
            .map(|v| v.version_id.clone())
            .collect();
        doomed.sort();
        for id in &doomed {
            versions.remove(id);
        }
        Ok(doomed)
    }
}

/// One map of records per schema keyname
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    collections: RwLock<HashMap<String, BTreeMap<RecordId, StoredRecord>>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DataStore for MemoryDataStore {
    fn create_collection(&self, keyname: &str) -> StoreResult<bool> {
        let mut collections = write(&self.collections)?;
        if collections.contains_key(keyname) {
            return Ok(false);
        }
        collections.insert(keyname.to_string(), BTreeMap::new());
        Ok(true)
    }

    fn alter_collection(&self, keyname: &str) -> StoreResult<bool> {
        // Records are schemaless here; only report whether the collection exists
        let collections = read(&self.collections)?;
        Ok(collections.contains_key(keyname))
    }

    fn drop_collection(&self, keyname: &str) -> StoreResult<bool> {
        let mut collections = write(&self.collections)?;
        Ok(collections.remove(keyname).is_some())
    }

    fn get_one(&self, keyname: &str, id: &RecordId) -> StoreResult<Option<StoredRecord>> {
        let collections = read(&self.collections)?;
        Ok(collections.get(keyname).and_then(|c| c.get(id)).cloned())
    }

    fn query(&self, keyname: &str, filter: &RecordFilter) -> StoreResult<Vec<StoredRecord>> {
        let collections = read(&self.collections)?;
        let collection = collections
            .get(keyname)
            .ok_or_else(|| StoreError::MissingCollection(keyname.to_string()))?;
        Ok(collection.values().filter(|r| r.matches(filter)).cloned().collect())
    }

    fn insert(&self, keyname: &str, payload: Payload) -> StoreResult<RecordId> {
        let mut collections = write(&self.collections)?;
        let collection = collections
            .get_mut(keyname)
            .ok_or_else(|| StoreError::MissingCollection(keyname.to_string()))?;
        let id = RecordId::generate();
        collection.insert(id.clone(), StoredRecord::new(id.clone(), keyname, payload));
        Ok(id)
    }

    fn update(&self, keyname: &str, payload: Payload, id: &RecordId) -> StoreResult<Option<RecordId>> {
        let mut collections = write(&self.collections)?;
        match collections.get_mut(keyname).and_then(|c| c.get_mut(id)) {
            Some(record) => {
                record.merge(payload);
                Ok(Some(id.clone()))
            }
            None => Ok(None),
        }
    }

    fn delete(&self, keyname: &str, id: &RecordId) -> StoreResult<Option<RecordId>> {
        let mut collections = write(&self.collections)?;
        Ok(collections
            .get_mut(keyname)
            .and_then(|c| c.remove(id))
            .map(|r| r.record_id))
    }
}
