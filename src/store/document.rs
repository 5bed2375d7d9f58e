//! Document database backend
//!
//! Stores every entity as a JSON document on disk:
//!
//! ```text
//! {root}/
//! ├── schemas/{keyname}.json
//! ├── schema_versions/{version_id}.json
//! └── data/
//!     └── {keyname}/
//!         ├── .collection
//!         └── {record_id}.json
//! ```
//!
//! Documents are written to a temporary file and renamed into place. A single
//! database-wide lock serializes writers; the three port adapters share it
//! through an `Arc<DocumentDatabase>`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    check_creatable, CreatedSchema, DataStore, SchemaMetadataStore, SchemaVersionStore, StoreError,
    StoreResult,
};
use crate::record::{Payload, RecordFilter, RecordId, StoredRecord};
use crate::schema::{MetadataFilter, MetadataUpdate, SchemaId, SchemaMetadata, SchemaState};
use crate::version::{SchemaDefinitionVersion, VersionId};

const SCHEMAS_DIR: &str = "schemas";
const VERSIONS_DIR: &str = "schema_versions";
const DATA_DIR: &str = "data";
const COLLECTION_DESCRIPTOR: &str = ".collection";

/// Descriptor written into every data collection directory
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CollectionDescriptor {
    schema_keyname: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    altered_at: Option<DateTime<Utc>>,
}

/// Document ids become file names; anything that could escape the directory
/// or collide with the hidden collection descriptor is treated as nonexistent.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// A directory of JSON document collections
#[derive(Debug)]
pub struct DocumentDatabase {
    root: PathBuf,
    lock: RwLock<()>,
}

impl DocumentDatabase {
    /// Open a database rooted at `root`, creating its layout if needed
    pub fn open(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        for dir in [SCHEMAS_DIR, VERSIONS_DIR, DATA_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }
        Ok(Self {
            root,
            lock: RwLock::new(()),
        })
    }

    /// Get the root path of the database
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_lock(&self) -> StoreResult<RwLockReadGuard<'_, ()>> {
        self.lock.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write_lock(&self) -> StoreResult<RwLockWriteGuard<'_, ()>> {
        self.lock.write().map_err(|_| StoreError::LockPoisoned)
    }

    fn schemas_dir(&self) -> PathBuf {
        self.root.join(SCHEMAS_DIR)
    }

    fn versions_dir(&self) -> PathBuf {
        self.root.join(VERSIONS_DIR)
    }

    fn collection_dir(&self, keyname: &str) -> Option<PathBuf> {
        is_safe_id(keyname).then(|| self.root.join(DATA_DIR).join(keyname))
    }

    fn doc_path(dir: &Path, id: &str) -> Option<PathBuf> {
        is_safe_id(id).then(|| dir.join(format!("{}.json", id)))
    }

    fn read_doc<T: DeserializeOwned>(dir: &Path, id: &str) -> StoreResult<Option<T>> {
        let Some(path) = Self::doc_path(dir, id) else {
            return Ok(None);
        };
        Self::read_path(&path, id)
    }

    fn read_path<T: DeserializeOwned>(path: &Path, id: &str) -> StoreResult<Option<T>> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| StoreError::Corrupted {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    fn write_path<T: Serialize>(path: &Path, doc: &T) -> StoreResult<()> {
        let content = serde_json::to_string_pretty(doc)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn write_doc<T: Serialize>(dir: &Path, id: &str, doc: &T) -> StoreResult<()> {
        let path = Self::doc_path(dir, id)
            .ok_or_else(|| StoreError::Backend(format!("invalid document id: {:?}", id)))?;
        Self::write_path(&path, doc)
    }

    fn remove_doc(dir: &Path, id: &str) -> StoreResult<bool> {
        let Some(path) = Self::doc_path(dir, id) else {
            return Ok(false);
        };
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Load every document in `dir`, skipping the collection descriptor and temp files
    fn list_docs<T: DeserializeOwned>(dir: &Path) -> StoreResult<Vec<T>> {
        let mut docs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) != Some("json") || !is_safe_id(stem) {
                continue;
            }
            if let Some(doc) = Self::read_path(&path, stem)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}

/// [`SchemaMetadataStore`] over the `schemas` collection
#[derive(Debug, Clone)]
pub struct DocumentMetadataStore {
    db: Arc<DocumentDatabase>,
}

impl DocumentMetadataStore {
    pub fn new(db: Arc<DocumentDatabase>) -> Self {
        Self { db }
    }

    fn load(&self, keyname: &str) -> StoreResult<Option<SchemaMetadata>> {
        DocumentDatabase::read_doc(&self.db.schemas_dir(), keyname)
    }

    fn save(&self, metadata: &SchemaMetadata) -> StoreResult<()> {
        DocumentDatabase::write_doc(&self.db.schemas_dir(), &metadata.schema_keyname, metadata)
    }

    /// Apply `change` to an active schema and write it back
    fn modify_active(
        &self,
        keyname: &str,
        change: impl FnOnce(&mut SchemaMetadata),
    ) -> StoreResult<Option<SchemaId>> {
        let _guard = self.db.write_lock()?;
        match self.load(keyname)? {
            Some(mut meta) if meta.is_active() => {
                change(&mut meta);
                self.save(&meta)?;
                Ok(meta.schema_id)
            }
            _ => Ok(None),
        }
    }
}

impl SchemaMetadataStore for DocumentMetadataStore {
    fn get(&self, keyname: &str) -> StoreResult<Option<SchemaMetadata>> {
        let _guard = self.db.read_lock()?;
        Ok(self.load(keyname)?.filter(|m| m.is_active()))
    }

    fn list(&self, filter: &MetadataFilter) -> StoreResult<Vec<SchemaMetadata>> {
        let _guard = self.db.read_lock()?;
        let mut found: Vec<SchemaMetadata> = DocumentDatabase::list_docs::<SchemaMetadata>(&self.db.schemas_dir())?
            .into_iter()
            .filter(|m| filter.matches(m))
            .collect();
        found.sort_by(|a, b| a.schema_keyname.cmp(&b.schema_keyname));
        Ok(found)
    }

    fn create(&self, metadata: &SchemaMetadata) -> StoreResult<CreatedSchema> {
        let _guard = self.db.write_lock()?;
        let replaced = self.load(&metadata.schema_keyname)?;
        check_creatable(replaced.as_ref(), &metadata.schema_keyname)?;

        let id = SchemaId::generate();
        let mut stored = metadata.clone();
        stored.schema_id = Some(id.clone());
        self.save(&stored)?;
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
        let _guard = self.db.write_lock()?;
        let current = self.load(keyname)?;
        if current.as_ref().and_then(|m| m.schema_id.as_ref()) != Some(created) {
            return Ok(false);
        }
        match previous {
            Some(previous) => self.save(previous)?,
            None => {
                DocumentDatabase::remove_doc(&self.db.schemas_dir(), keyname)?;
            }
        }
        Ok(true)
    }

    fn delete(&self, keyname: &str) -> StoreResult<Option<SchemaId>> {
        self.modify_active(keyname, |meta| {
            meta.state = SchemaState::Deleted;
            meta.updated_at = Utc::now();
        })
    }

    fn begin_purge(&self, keyname: &str) -> StoreResult<Option<SchemaId>> {
        let _guard = self.db.write_lock()?;
        match self.load(keyname)? {
            Some(mut meta) if !meta.is_active() => {
                meta.state = SchemaState::Purging;
                meta.updated_at = Utc::now();
                self.save(&meta)?;
                Ok(meta.schema_id)
            }
            _ => Ok(None),
        }
    }

    fn purge_deleted(&self, keyname: &str, expected: &SchemaId) -> StoreResult<Option<SchemaId>> {
        let _guard = self.db.write_lock()?;
        match self.load(keyname)? {
            Some(meta) if !meta.is_active() && meta.schema_id.as_ref() == Some(expected) => {
                DocumentDatabase::remove_doc(&self.db.schemas_dir(), keyname)?;
                Ok(meta.schema_id)
            }
            _ => Ok(None),
        }
    }

    fn update(&self, update: &MetadataUpdate) -> StoreResult<Option<SchemaId>> {
        self.modify_active(&update.schema_keyname, |meta| meta.apply_update(update))
    }

    fn update_active_version(
        &self,
        keyname: &str,
        version_id: &VersionId,
        definition: &Value,
    ) -> StoreResult<Option<SchemaId>> {
        self.modify_active(keyname, |meta| {
            meta.set_active_version(version_id.clone(), definition.clone())
        })
    }
}

/// [`SchemaVersionStore`] over the `schema_versions` collection.
///
/// Checksums are verified on every read.
#[derive(Debug, Clone)]
pub struct DocumentVersionStore {
    db: Arc<DocumentDatabase>,
}

impl DocumentVersionStore {
    pub fn new(db: Arc<DocumentDatabase>) -> Self {
        Self { db }
    }

    fn verified(version: SchemaDefinitionVersion) -> StoreResult<SchemaDefinitionVersion> {
        if !version.verify_checksum() {
            return Err(StoreError::Corrupted {
                id: version.version_id.as_str().to_string(),
                reason: format!("definition does not match checksum {}", version.checksum),
            });
        }
        Ok(version)
    }

    fn load_all(&self, keyname: &str) -> StoreResult<Vec<SchemaDefinitionVersion>> {
        let mut found = DocumentDatabase::list_docs::<SchemaDefinitionVersion>(&self.db.versions_dir())?
            .into_iter()
            .filter(|v| v.schema_keyname == keyname)
            .map(Self::verified)
            .collect::<StoreResult<Vec<_>>>()?;
        found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.version_id.cmp(&b.version_id)));
        Ok(found)
    }
}

impl SchemaVersionStore for DocumentVersionStore {
    fn create(&self, keyname: &str, definition: &Value) -> StoreResult<VersionId> {
        let _guard = self.db.write_lock()?;
        let version = SchemaDefinitionVersion::new(VersionId::generate(), keyname, definition.clone());
        DocumentDatabase::write_doc(&self.db.versions_dir(), version.version_id.as_str(), &version)?;
        Ok(version.version_id)
    }

    fn get(&self, id: &VersionId) -> StoreResult<Option<SchemaDefinitionVersion>> {
        let _guard = self.db.read_lock()?;
        DocumentDatabase::read_doc::<SchemaDefinitionVersion>(&self.db.versions_dir(), id.as_str())?
            .map(Self::verified)
            .transpose()
    }

    fn list_by_keyname(&self, keyname: &str) -> StoreResult<Vec<SchemaDefinitionVersion>> {
        let _guard = self.db.read_lock()?;
        self.load_all(keyname)
    }

    fn delete(&self, id: &VersionId) -> StoreResult<Option<VersionId>> {
        let _guard = self.db.write_lock()?;
        let removed = DocumentDatabase::remove_doc(&self.db.versions_dir(), id.as_str())?;
        Ok(removed.then(|| id.clone()))
    }

    fn delete_older_than(
        &self,
        keyname: &str,
        keep: &VersionId,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<VersionId>> {
        let _guard = self.db.write_lock()?;
        let mut deleted = Vec::new();
        for version in self.load_all(keyname)? {
            if version.is_prunable(keep, cutoff)
                && DocumentDatabase::remove_doc(&self.db.versions_dir(), version.version_id.as_str())?
            {
                deleted.push(version.version_id);
            }
        }
        deleted.sort();
        Ok(deleted)
    }
}

/// [`DataStore`] with one directory per schema keyname
#[derive(Debug, Clone)]
pub struct DocumentDataStore {
    db: Arc<DocumentDatabase>,
}

impl DocumentDataStore {
    pub fn new(db: Arc<DocumentDatabase>) -> Self {
        Self { db }
    }

    /// The collection directory, if the collection exists
    fn existing_collection(&self, keyname: &str) -> Option<PathBuf> {
        self.db.collection_dir(keyname).filter(|dir| dir.is_dir())
    }

    fn require_collection(&self, keyname: &str) -> StoreResult<PathBuf> {
        self.existing_collection(keyname)
            .ok_or_else(|| StoreError::MissingCollection(keyname.to_string()))
    }

    fn descriptor_path(dir: &Path) -> PathBuf {
        dir.join(COLLECTION_DESCRIPTOR)
    }
}

impl DataStore for DocumentDataStore {
    fn create_collection(&self, keyname: &str) -> StoreResult<bool> {
        let _guard = self.db.write_lock()?;
        let dir = self
            .db
            .collection_dir(keyname)
            .ok_or_else(|| StoreError::Backend(format!("invalid collection name: {:?}", keyname)))?;
        if dir.is_dir() {
            return Ok(false);
        }

        fs::create_dir_all(&dir)?;
        let descriptor = CollectionDescriptor {
            schema_keyname: keyname.to_string(),
            created_at: Utc::now(),
            altered_at: None,
        };
        DocumentDatabase::write_path(&Self::descriptor_path(&dir), &descriptor)?;
        Ok(true)
    }

    fn alter_collection(&self, keyname: &str) -> StoreResult<bool> {
        let _guard = self.db.write_lock()?;
        let Some(dir) = self.existing_collection(keyname) else {
            return Ok(false);
        };
        let path = Self::descriptor_path(&dir);
        let mut descriptor = DocumentDatabase::read_path::<CollectionDescriptor>(&path, COLLECTION_DESCRIPTOR)?
            .unwrap_or_else(|| CollectionDescriptor {
                schema_keyname: keyname.to_string(),
                created_at: Utc::now(),
                altered_at: None,
            });
        descriptor.altered_at = Some(Utc::now());
        DocumentDatabase::write_path(&path, &descriptor)?;
        Ok(true)
    }

    fn drop_collection(&self, keyname: &str) -> StoreResult<bool> {
        let _guard = self.db.write_lock()?;
        let Some(dir) = self.existing_collection(keyname) else {
            return Ok(false);
        };
        fs::remove_dir_all(dir)?;
        Ok(true)
    }

    fn get_one(&self, keyname: &str, id: &RecordId) -> StoreResult<Option<StoredRecord>> {
        let _guard = self.db.read_lock()?;
        match self.existing_collection(keyname) {
            Some(dir) => DocumentDatabase::read_doc(&dir, id.as_str()),
            None => Ok(None),
        }
    }

    fn query(&self, keyname: &str, filter: &RecordFilter) -> StoreResult<Vec<StoredRecord>> {
        let _guard = self.db.read_lock()?;
        let dir = self.require_collection(keyname)?;
        let mut records: Vec<StoredRecord> = DocumentDatabase::list_docs::<StoredRecord>(&dir)?
            .into_iter()
            .filter(|r| r.matches(filter))
            .collect();
        records.sort_by(|a, b| a.record_id.cmp(&b.record_id));
        Ok(records)
    }

    fn insert(&self, keyname: &str, payload: Payload) -> StoreResult<RecordId> {
        let _guard = self.db.write_lock()?;
        let dir = self.require_collection(keyname)?;
        let record = StoredRecord::new(RecordId::generate(), keyname, payload);
        DocumentDatabase::write_doc(&dir, record.record_id.as_str(), &record)?;
        Ok(record.record_id)
    }

    fn update(&self, keyname: &str, payload: Payload, id: &RecordId) -> StoreResult<Option<RecordId>> {
        let _guard = self.db.write_lock()?;
        let Some(dir) = self.existing_collection(keyname) else {
            return Ok(None);
        };
        let Some(mut record) = DocumentDatabase::read_doc::<StoredRecord>(&dir, id.as_str())? else {
            return Ok(None);
        };
        record.merge(payload);
        DocumentDatabase::write_doc(&dir, id.as_str(), &record)?;
        Ok(Some(id.clone()))
    }

    fn delete(&self, keyname: &str, id: &RecordId) -> StoreResult<Option<RecordId>> {
        let _guard = self.db.write_lock()?;
        let Some(dir) = self.existing_collection(keyname) else {
            return Ok(None);
        };
        let removed = DocumentDatabase::remove_doc(&dir, id.as_str())?;
        Ok(removed.then(|| id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::NewSchema;
    use serde_json::json;
    use tempfile::tempdir;

    fn stores(root: &Path) -> (DocumentMetadataStore, DocumentVersionStore, DocumentDataStore) {
        let db = Arc::new(DocumentDatabase::open(root).unwrap());
        (
            DocumentMetadataStore::new(Arc::clone(&db)),
            DocumentVersionStore::new(Arc::clone(&db)),
            DocumentDataStore::new(db),
        )
    }

    #[test]
    fn test_open_creates_layout() {
        let dir = tempdir().unwrap();
        let db = DocumentDatabase::open(dir.path()).unwrap();
        assert!(db.root().join("schemas").is_dir());
        assert!(db.root().join("schema_versions").is_dir());
        assert!(db.root().join("data").is_dir());
    }

    #[test]
    fn test_unsafe_ids_are_treated_as_missing() {
        assert!(!is_safe_id("../escape"));
        assert!(!is_safe_id(".collection"));
        assert!(is_safe_id("_private"));
        assert!(!is_safe_id(""));
        assert!(is_safe_id("3f2a-11"));

        let dir = tempdir().unwrap();
        let (_, versions, data) = stores(dir.path());
        assert!(versions.get(&VersionId::from("../../etc/passwd")).unwrap().is_none());
        assert!(data.get_one("../x", &RecordId::from("y")).unwrap().is_none());
    }

    #[test]
    fn test_metadata_survives_reopen() {
        let dir = tempdir().unwrap();
        let fields = NewSchema::new("language", "Language", "Languages spoken by customers");
        {
            let (metadata, _, _) = stores(dir.path());
            let meta = SchemaMetadata::new(fields, VersionId::from("v1"), json!({"type": "object"}));
            metadata.create(&meta).unwrap();
        }

        let (metadata, _, _) = stores(dir.path());
        let loaded = metadata.get("language").unwrap().unwrap();
        assert_eq!(loaded.schema_name, "Language");
        assert!(loaded.schema_id.is_some());
    }

    #[test]
    fn test_tampered_version_is_reported_corrupted() {
        let dir = tempdir().unwrap();
        let (_, versions, _) = stores(dir.path());
        let id = versions.create("language", &json!({"type": "object"})).unwrap();

        let path = dir.path().join("schema_versions").join(format!("{}.json", id.as_str()));
        let mut doc: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        doc["schema_definition"] = json!({"type": "array"});
        fs::write(&path, serde_json::to_string(&doc).unwrap()).unwrap();

        assert!(matches!(versions.get(&id), Err(StoreError::Corrupted { .. })));
    }

    #[test]
    fn test_collection_descriptor_is_not_a_record() {
        let dir = tempdir().unwrap();
        let (_, _, data) = stores(dir.path());
        assert!(data.create_collection("language").unwrap());
        assert!(data.alter_collection("language").unwrap());

        let payload = json!({"code": "es"}).as_object().cloned().unwrap();
        let id = data.insert("language", payload).unwrap();

        let all = data.query("language", &RecordFilter::new()).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].record_id, id);

        assert!(data.drop_collection("language").unwrap());
        assert!(matches!(
            data.query("language", &RecordFilter::new()),
            Err(StoreError::MissingCollection(_))
        ));
    }

    #[test]
    fn test_tombstone_lifecycle_on_disk() {
        let dir = tempdir().unwrap();
        let (metadata, _, _) = stores(dir.path());
        let meta = |name: &str| {
            SchemaMetadata::new(
                NewSchema::new("language", name, "Languages spoken by customers"),
                VersionId::from("v1"),
                json!({"type": "object"}),
            )
        };

        let first = metadata.create(&meta("Language")).unwrap().schema_id;
        assert!(metadata.begin_purge("language").unwrap().is_none());
        metadata.delete("language").unwrap();

        let created = metadata.create(&meta("Language again")).unwrap();
        assert!(metadata
            .rollback_create("language", &created.schema_id, created.replaced.as_ref())
            .unwrap());
        let tombstones = metadata.list(&MetadataFilter::deleted("language")).unwrap();
        assert_eq!(tombstones.len(), 1);
        assert_eq!(tombstones[0].schema_id, Some(first.clone()));
        assert_eq!(tombstones[0].schema_name, "Language");

        assert_eq!(metadata.begin_purge("language").unwrap(), Some(first.clone()));
        assert!(matches!(metadata.create(&meta("Blocked")), Err(StoreError::Conflict(_))));
        assert!(metadata
            .purge_deleted("language", &SchemaId::from("stale".to_string()))
            .unwrap()
            .is_none());
        assert_eq!(metadata.purge_deleted("language", &first).unwrap(), Some(first));
        assert!(!dir.path().join("schemas/language.json").exists());
    }
}
