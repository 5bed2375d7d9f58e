//! Shared helpers for integration tests: in-memory stores with switchable faults

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use schemagate::store::memory::{MemoryDataStore, MemoryMetadataStore, MemoryVersionStore};
use schemagate::schema::MetadataUpdate;
use schemagate::store::{
    CreatedSchema, DataStore, SchemaMetadataStore, SchemaVersionStore, StoreResult,
};
use schemagate::{
    DataAccess, DefinitionValidator, JsonSchemaValidator, MetadataFilter, NewSchema, Payload,
    RecordFilter, RecordId, SchemaDefinitionVersion, SchemaId, SchemaMetadata, SchemaRegistry,
    StoreError, StoredRecord, Stores, VersionId,
};
use serde_json::{json, Value};

/// The language schema used throughout the end-to-end scenarios
pub fn language_schema() -> Value {
    serde_json::from_str(include_str!("../fixtures/language.schema.json")).unwrap()
}

pub fn language_fields() -> NewSchema {
    NewSchema::new("language", "Language", "Languages spoken by our customers")
}

pub fn spanish() -> Value {
    json!({
        "code": "es",
        "name": "español",
        "emoji": "🇪🇸",
        "translations": {"en": "Spanish", "fr": "Espagnol", "de": "Spanisch"}
    })
}

pub fn english() -> Value {
    json!({
        "code": "en",
        "name": "english",
        "emoji": "🇬🇧",
        "translations": {"es": "inglés", "fr": "anglais", "de": "Englisch"}
    })
}

pub fn simple_definition() -> Value {
    json!({
        "type": "object",
        "properties": {"name": {"type": "string"}},
        "required": ["name"]
    })
}

pub fn fields(keyname: &str) -> NewSchema {
    NewSchema::new(keyname, "Test Schema", "A schema used in integration tests")
}

fn injected(operation: &str) -> StoreError {
    StoreError::Backend(format!("injected failure in {}", operation))
}

/// Ordered log of compensating calls observed by the wrappers
pub type Events = Arc<Mutex<Vec<String>>>;

fn record(events: &Events, event: &str) {
    events.lock().unwrap().push(event.to_string());
}

pub struct FaultyMetadataStore {
    pub inner: MemoryMetadataStore,
    pub fail_create: AtomicBool,
    pub fail_rollback: AtomicBool,
    pub fail_purge: AtomicBool,
    /// Pretend the schema vanished right before the active version swap
    pub vanish_on_swap: AtomicBool,
    events: Events,
}

impl SchemaMetadataStore for FaultyMetadataStore {
    fn get(&self, keyname: &str) -> StoreResult<Option<SchemaMetadata>> {
        self.inner.get(keyname)
    }

    fn list(&self, filter: &MetadataFilter) -> StoreResult<Vec<SchemaMetadata>> {
        self.inner.list(filter)
    }

    fn create(&self, metadata: &SchemaMetadata) -> StoreResult<CreatedSchema> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(injected("metadata.create"));
        }
        self.inner.create(metadata)
    }

    fn rollback_create(
        &self,
        keyname: &str,
        created: &SchemaId,
        previous: Option<&SchemaMetadata>,
    ) -> StoreResult<bool> {
        record(&self.events, "metadata.rollback_create");
        if self.fail_rollback.load(Ordering::SeqCst) {
            return Err(injected("metadata.rollback_create"));
        }
        self.inner.rollback_create(keyname, created, previous)
    }

    fn delete(&self, keyname: &str) -> StoreResult<Option<SchemaId>> {
        self.inner.delete(keyname)
    }

    fn begin_purge(&self, keyname: &str) -> StoreResult<Option<SchemaId>> {
        self.inner.begin_purge(keyname)
    }

    fn purge_deleted(&self, keyname: &str, expected: &SchemaId) -> StoreResult<Option<SchemaId>> {
        record(&self.events, "metadata.purge_deleted");
        if self.fail_purge.load(Ordering::SeqCst) {
            return Err(injected("metadata.purge_deleted"));
        }
        self.inner.purge_deleted(keyname, expected)
    }

    fn update(&self, update: &MetadataUpdate) -> StoreResult<Option<SchemaId>> {
        self.inner.update(update)
    }

    fn update_active_version(
        &self,
        keyname: &str,
        version_id: &VersionId,
        definition: &Value,
    ) -> StoreResult<Option<SchemaId>> {
        if self.vanish_on_swap.load(Ordering::SeqCst) {
            return Ok(None);
        }
        self.inner.update_active_version(keyname, version_id, definition)
    }
}

pub struct FaultyVersionStore {
    pub inner: MemoryVersionStore,
    pub fail_create: AtomicBool,
    pub fail_delete: AtomicBool,
    /// Keyname whose pruning fails
    pub fail_prune_for: Mutex<Option<String>>,
    events: Events,
}

impl SchemaVersionStore for FaultyVersionStore {
    fn create(&self, keyname: &str, definition: &Value) -> StoreResult<VersionId> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(injected("versions.create"));
        }
        self.inner.create(keyname, definition)
    }

    fn get(&self, id: &VersionId) -> StoreResult<Option<SchemaDefinitionVersion>> {
        self.inner.get(id)
    }

    fn list_by_keyname(&self, keyname: &str) -> StoreResult<Vec<SchemaDefinitionVersion>> {
        self.inner.list_by_keyname(keyname)
    }

    fn delete(&self, id: &VersionId) -> StoreResult<Option<VersionId>> {
        record(&self.events, "versions.delete");
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(injected("versions.delete"));
        }
        self.inner.delete(id)
    }

    fn delete_older_than(
        &self,
        keyname: &str,
        keep: &VersionId,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<VersionId>> {
        if self.fail_prune_for.lock().unwrap().as_deref() == Some(keyname) {
            return Err(injected("versions.delete_older_than"));
        }
        self.inner.delete_older_than(keyname, keep, cutoff)
    }
}

pub struct FaultyDataStore {
    pub inner: MemoryDataStore,
    pub fail_create_collection: AtomicBool,
    pub fail_alter_collection: AtomicBool,
    events: Events,
}

impl DataStore for FaultyDataStore {
    fn create_collection(&self, keyname: &str) -> StoreResult<bool> {
        if self.fail_create_collection.load(Ordering::SeqCst) {
            return Err(injected("data.create_collection"));
        }
        self.inner.create_collection(keyname)
    }

    fn alter_collection(&self, keyname: &str) -> StoreResult<bool> {
        record(&self.events, "data.alter_collection");
        if self.fail_alter_collection.load(Ordering::SeqCst) {
            return Err(injected("data.alter_collection"));
        }
        self.inner.alter_collection(keyname)
    }

    fn drop_collection(&self, keyname: &str) -> StoreResult<bool> {
        self.inner.drop_collection(keyname)
    }

    fn get_one(&self, keyname: &str, id: &RecordId) -> StoreResult<Option<StoredRecord>> {
        self.inner.get_one(keyname, id)
    }

    fn query(&self, keyname: &str, filter: &RecordFilter) -> StoreResult<Vec<StoredRecord>> {
        self.inner.query(keyname, filter)
    }

    fn insert(&self, keyname: &str, payload: Payload) -> StoreResult<RecordId> {
        self.inner.insert(keyname, payload)
    }

    fn update(&self, keyname: &str, payload: Payload, id: &RecordId) -> StoreResult<Option<RecordId>> {
        self.inner.update(keyname, payload, id)
    }

    fn delete(&self, keyname: &str, id: &RecordId) -> StoreResult<Option<RecordId>> {
        self.inner.delete(keyname, id)
    }
}

/// In-memory stores whose faults can be switched on per test
pub struct Harness {
    pub metadata: Arc<FaultyMetadataStore>,
    pub versions: Arc<FaultyVersionStore>,
    pub data: Arc<FaultyDataStore>,
    pub events: Events,
    validator: Arc<dyn DefinitionValidator>,
}

impl Harness {
    pub fn new() -> Self {
        let events: Events = Arc::new(Mutex::new(Vec::new()));
        Self {
            metadata: Arc::new(FaultyMetadataStore {
                inner: MemoryMetadataStore::new(),
                fail_create: AtomicBool::new(false),
                fail_rollback: AtomicBool::new(false),
                fail_purge: AtomicBool::new(false),
                vanish_on_swap: AtomicBool::new(false),
                events: Arc::clone(&events),
            }),
            versions: Arc::new(FaultyVersionStore {
                inner: MemoryVersionStore::new(),
                fail_create: AtomicBool::new(false),
                fail_delete: AtomicBool::new(false),
                fail_prune_for: Mutex::new(None),
                events: Arc::clone(&events),
            }),
            data: Arc::new(FaultyDataStore {
                inner: MemoryDataStore::new(),
                fail_create_collection: AtomicBool::new(false),
                fail_alter_collection: AtomicBool::new(false),
                events: Arc::clone(&events),
            }),
            events,
            validator: Arc::new(JsonSchemaValidator::default()),
        }
    }

    pub fn stores(&self) -> Stores {
        Stores {
            metadata: self.metadata.clone(),
            versions: self.versions.clone(),
            data: self.data.clone(),
        }
    }

    pub fn registry(&self) -> SchemaRegistry {
        SchemaRegistry::new(self.stores(), Arc::clone(&self.validator))
    }

    pub fn data_access(&self) -> DataAccess {
        DataAccess::new(self.stores(), Arc::clone(&self.validator))
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().unwrap().clear();
    }
}

pub fn set(flag: &AtomicBool, value: bool) {
    flag.store(value, Ordering::SeqCst);
}
