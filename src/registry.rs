//! Schema Registry
//!
//! Manages the lifecycle of schemas across the metadata, version and data
//! stores. Multi-store writes are sagas: each step that succeeds registers a
//! compensation, and a failing step rolls back the earlier ones before the
//! error is returned. Nothing is shared transactionally between the stores.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::definition::DefinitionValidator;
use crate::error::{EntityKind, Result, SchemaError};
use crate::saga::{Saga, SagaFailure};
use crate::schema::{
    MetadataFilter, MetadataUpdate, NewSchema, SchemaId, SchemaMetadata, SchemaState,
};
use crate::store::Stores;
use crate::version::{SchemaDefinitionVersion, VersionId};

/// Outcome of [`SchemaRegistry::prune_inactive_versions`]
#[derive(Debug, Clone, Default, Serialize)]
pub struct PruneReport {
    /// Versions created before this instant were eligible
    pub cutoff: Option<DateTime<Utc>>,
    /// Pruned version ids per schema keyname
    pub pruned: BTreeMap<String, Vec<VersionId>>,
    /// Schemas whose pruning failed, with the error message
    pub failures: BTreeMap<String, String>,
}

impl PruneReport {
    pub fn total_pruned(&self) -> usize {
        self.pruned.values().map(Vec::len).sum()
    }
}

/// Outcome of [`SchemaRegistry::purge_schema`]
#[derive(Debug, Clone, Serialize)]
pub struct PurgeReport {
    pub schema_keyname: String,
    pub schema_id: Option<SchemaId>,
    pub dropped_collection: bool,
    pub versions_removed: Vec<VersionId>,
}

/// The schema lifecycle orchestrator
#[derive(Clone)]
pub struct SchemaRegistry {
    stores: Stores,
    validator: Arc<dyn DefinitionValidator>,
}

impl SchemaRegistry {
    pub fn new(stores: Stores, validator: Arc<dyn DefinitionValidator>) -> Self {
        Self { stores, validator }
    }

    /// Get the stores this registry writes to
    pub fn stores(&self) -> &Stores {
        &self.stores
    }

    /// Register a new schema with its first definition version.
    ///
    /// Steps: persist the version, persist the metadata, provision the data
    /// collection. A failing step undoes the earlier ones in reverse order and
    /// the failure is returned as [`SchemaError::CreationFailed`].
    pub fn create_schema(&self, fields: NewSchema, definition: Value) -> Result<SchemaMetadata> {
        fields.validate()?;
        self.validator.validate_definition(&definition)?;

        let keyname = fields.schema_keyname.clone();
        if self.stores.metadata.get(&keyname)?.is_some() {
            return Err(SchemaError::AlreadyExists(keyname));
        }
        let purging = MetadataFilter::in_state(SchemaState::Purging, keyname.as_str());
        if !self.stores.metadata.list(&purging)?.is_empty() {
            return Err(SchemaError::Validation(format!(
                "schema '{}' is being purged",
                keyname
            )));
        }

        let versions = self.stores.versions.as_ref();
        let metadata_store = self.stores.metadata.as_ref();
        let data = self.stores.data.as_ref();

        let failed = |f: SagaFailure| SchemaError::CreationFailed {
            keyname: keyname.clone(),
            step: f.step,
            source: f.source,
        };

        let mut saga = Saga::new("create_schema");

        let version_id = saga
            .step(
                "persist definition version",
                || versions.create(&keyname, &definition),
                |id| {
                    let id = id.clone();
                    move || versions.delete(&id).map(|_| ())
                },
            )
            .map_err(failed)?;
        debug!(keyname = %keyname, version_id = version_id.as_str(), "definition version persisted");

        let mut metadata = SchemaMetadata::new(fields, version_id.clone(), definition.clone());
        let persisted = saga
            .step(
                "persist schema metadata",
                || metadata_store.create(&metadata),
                |created| {
                    let keyname = keyname.clone();
                    let schema_id = created.schema_id.clone();
                    let previous = created.replaced.clone();
                    move || {
                        metadata_store
                            .rollback_create(&keyname, &schema_id, previous.as_ref())
                            .map(|_| ())
                    }
                },
            )
            .map_err(failed)?;
        if let Some(tombstone) = &persisted.replaced {
            debug!(keyname = %keyname, replaced = ?tombstone.schema_id, "replaced deleted schema");
        }

        let created = saga
            .final_step("provision data collection", || data.create_collection(&keyname))
            .map_err(failed)?;
        if !created {
            info!(keyname = %keyname, "adopted existing data collection");
        }
        saga.commit();

        metadata.schema_id = Some(persisted.schema_id);
        info!(keyname = %keyname, version_id = version_id.as_str(), "schema created");
        Ok(metadata)
    }

    /// Get an active schema by keyname
    pub fn get_schema(&self, keyname: &str) -> Result<Option<SchemaMetadata>> {
        Ok(self.stores.metadata.get(keyname)?)
    }

    /// List schemas matching `filter`
    pub fn list_schemas(&self, filter: &MetadataFilter) -> Result<Vec<SchemaMetadata>> {
        Ok(self.stores.metadata.list(filter)?)
    }

    /// Replace the name and description of a schema
    pub fn update_schema_metadata(
        &self,
        keyname: &str,
        schema_name: impl Into<String>,
        schema_description: impl Into<String>,
    ) -> Result<SchemaId> {
        let update = MetadataUpdate {
            schema_keyname: keyname.to_string(),
            schema_name: schema_name.into(),
            schema_description: schema_description.into(),
        };
        update.validate()?;

        let id = self
            .stores
            .metadata
            .update(&update)?
            .ok_or_else(|| SchemaError::not_found(EntityKind::Schema, keyname))?;
        info!(keyname, "schema metadata updated");
        Ok(id)
    }

    /// Append a new definition version and make it active.
    ///
    /// If the schema disappears between the lookup and the pointer swap the
    /// new version is left in place for [`Self::prune_inactive_versions`].
    pub fn update_schema_definition(&self, keyname: &str, definition: Value) -> Result<VersionId> {
        self.validator.validate_definition(&definition)?;

        if self.stores.metadata.get(keyname)?.is_none() {
            return Err(SchemaError::not_found(EntityKind::Schema, keyname));
        }

        let version_id = self.stores.versions.create(keyname, &definition)?;

        let swapped = self
            .stores
            .metadata
            .update_active_version(keyname, &version_id, &definition)?;
        if swapped.is_none() {
            warn!(
                keyname,
                version_id = version_id.as_str(),
                "schema vanished before activation; version orphaned"
            );
            return Err(SchemaError::not_found(EntityKind::Schema, keyname));
        }

        self.alter_collection(keyname);
        info!(keyname, version_id = version_id.as_str(), "schema definition updated");
        Ok(version_id)
    }

    /// Make an existing version of the schema the active one.
    ///
    /// Records already stored are not re-validated.
    pub fn change_active_version(&self, keyname: &str, version_id: &VersionId) -> Result<(String, VersionId)> {
        let version = self
            .stores
            .versions
            .get(version_id)?
            .filter(|v| v.schema_keyname == keyname)
            .ok_or_else(|| SchemaError::not_found(EntityKind::Version, version_id.as_str()))?;

        self.stores
            .metadata
            .update_active_version(keyname, &version.version_id, &version.schema_definition)?
            .ok_or_else(|| SchemaError::not_found(EntityKind::Schema, keyname))?;

        self.alter_collection(keyname);
        info!(keyname, version_id = version_id.as_str(), "active version changed");
        Ok((keyname.to_string(), version.version_id))
    }

    /// Get a definition version by id
    pub fn get_version(&self, version_id: &VersionId) -> Result<Option<SchemaDefinitionVersion>> {
        Ok(self.stores.versions.get(version_id)?)
    }

    /// All versions of a schema, oldest first
    pub fn list_versions(&self, keyname: &str) -> Result<Vec<SchemaDefinitionVersion>> {
        Ok(self.stores.versions.list_by_keyname(keyname)?)
    }

    /// Retire a schema.
    ///
    /// Only the metadata is affected: its records and versions stay where they
    /// are until [`Self::purge_schema`] is called.
    pub fn delete_schema(&self, keyname: &str) -> Result<SchemaId> {
        match self.stores.metadata.delete(keyname)? {
            Some(id) => {
                info!(keyname, "schema deleted; data and versions retained");
                Ok(id)
            }
            None => {
                error!(keyname, "schema to delete was not found");
                Err(SchemaError::not_found(EntityKind::Schema, keyname))
            }
        }
    }

    /// Delete one definition version. The active version of a schema cannot be deleted.
    pub fn delete_schema_version(&self, version_id: &VersionId) -> Result<VersionId> {
        let version = self
            .stores
            .versions
            .get(version_id)?
            .ok_or_else(|| SchemaError::not_found(EntityKind::Version, version_id.as_str()))?;

        if let Some(owner) = self.stores.metadata.get(&version.schema_keyname)? {
            if owner.active_version_id == *version_id {
                return Err(SchemaError::Validation(format!(
                    "version {} is the active version of schema '{}'",
                    version_id.as_str(),
                    owner.schema_keyname
                )));
            }
        }

        let deleted = self
            .stores
            .versions
            .delete(version_id)?
            .ok_or_else(|| SchemaError::not_found(EntityKind::Version, version_id.as_str()))?;
        info!(keyname = %version.schema_keyname, version_id = version_id.as_str(), "schema version deleted");
        Ok(deleted)
    }

    /// Delete versions older than `retention_days` that are not active
    pub fn prune_inactive_versions(&self, retention_days: u32) -> Result<PruneReport> {
        let cutoff = Utc::now() - Duration::days(i64::from(retention_days));
        self.prune_inactive_versions_before(cutoff)
    }

    /// Delete versions created before `cutoff` that are not active.
    ///
    /// Every active schema is processed; a failure on one schema is recorded
    /// in the report and does not stop the others.
    pub fn prune_inactive_versions_before(&self, cutoff: DateTime<Utc>) -> Result<PruneReport> {
        let schemas = self.stores.metadata.list(&MetadataFilter::active())?;
        let mut report = PruneReport {
            cutoff: Some(cutoff),
            ..PruneReport::default()
        };

        for schema in schemas {
            let keyname = schema.schema_keyname;
            match self
                .stores
                .versions
                .delete_older_than(&keyname, &schema.active_version_id, cutoff)
            {
                Ok(pruned) => {
                    if !pruned.is_empty() {
                        info!(keyname = %keyname, count = pruned.len(), "pruned inactive versions");
                    }
                    report.pruned.insert(keyname, pruned);
                }
                Err(e) => {
                    error!(keyname = %keyname, error = %e, "pruning failed");
                    report.failures.insert(keyname, e.to_string());
                }
            }
        }

        Ok(report)
    }

    /// Remove everything left behind by [`Self::delete_schema`]: the data
    /// collection, every version, and finally the tombstone itself.
    ///
    /// The tombstone is first marked PURGING, which blocks re-creation of the
    /// keyname. If a later step fails the error is returned and the record stays
    /// PURGING with whatever was not yet removed; calling `purge_schema` again
    /// resumes from there.
    pub fn purge_schema(&self, keyname: &str) -> Result<PurgeReport> {
        let Some(schema_id) = self.stores.metadata.begin_purge(keyname)? else {
            if self.stores.metadata.get(keyname)?.is_some() {
                return Err(SchemaError::Validation(format!(
                    "schema '{}' is active; delete it before purging",
                    keyname
                )));
            }
            return Err(SchemaError::not_found(EntityKind::Schema, keyname));
        };

        let dropped_collection = self.stores.data.drop_collection(keyname)?;

        let mut versions_removed = Vec::new();
        for version in self.stores.versions.list_by_keyname(keyname)? {
            if let Some(id) = self.stores.versions.delete(&version.version_id)? {
                versions_removed.push(id);
            }
        }

        if self.stores.metadata.purge_deleted(keyname, &schema_id)?.is_none() {
            warn!(keyname, schema_id = schema_id.as_str(), "purged record was already gone");
        }
        info!(
            keyname,
            dropped_collection,
            versions = versions_removed.len(),
            "schema purged"
        );

        Ok(PurgeReport {
            schema_keyname: keyname.to_string(),
            schema_id: Some(schema_id),
            dropped_collection,
            versions_removed,
        })
    }

    /// Notify the data store of a new active definition; failures are only logged
    fn alter_collection(&self, keyname: &str) {
        match self.stores.data.alter_collection(keyname) {
            Ok(true) => debug!(keyname, "data collection altered"),
            Ok(false) => warn!(keyname, "no data collection to alter"),
            Err(e) => warn!(keyname, error = %e, "altering data collection failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::JsonSchemaValidator;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::new(Stores::in_memory(), Arc::new(JsonSchemaValidator::default()))
    }

    fn fields(keyname: &str) -> NewSchema {
        NewSchema::new(keyname, "Test Schema", "A schema used in unit tests")
    }

    fn definition() -> Value {
        json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        })
    }

    #[test]
    fn test_create_schema() {
        let registry = registry();
        let meta = registry.create_schema(fields("test_schema"), definition()).unwrap();

        assert!(meta.schema_id.is_some());
        let version = registry.get_version(&meta.active_version_id).unwrap().unwrap();
        assert_eq!(version.schema_definition, definition());
        assert_eq!(version.schema_keyname, "test_schema");
    }

    #[test]
    fn test_duplicate_keyname_rejected_without_side_effects() {
        let registry = registry();
        registry.create_schema(fields("test_schema"), definition()).unwrap();

        let err = registry.create_schema(fields("test_schema"), definition()).unwrap_err();
        assert!(matches!(err, SchemaError::AlreadyExists(_)));
        assert_eq!(registry.list_versions("test_schema").unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_input_has_no_side_effects() {
        let registry = registry();

        let err = registry.create_schema(fields("1bad"), definition()).unwrap_err();
        assert!(err.is_validation());

        let err = registry
            .create_schema(fields("test_schema"), json!({"type": "nonexistent_type"}))
            .unwrap_err();
        assert!(err.is_validation());

        assert!(registry.list_schemas(&MetadataFilter::default()).unwrap().is_empty());
        assert!(registry.list_versions("test_schema").unwrap().is_empty());
    }

    #[test]
    fn test_update_metadata() {
        let registry = registry();
        let meta = registry.create_schema(fields("test_schema"), definition()).unwrap();

        let id = registry
            .update_schema_metadata("test_schema", "Renamed", "A renamed schema description")
            .unwrap();
        assert_eq!(Some(id), meta.schema_id);

        let loaded = registry.get_schema("test_schema").unwrap().unwrap();
        assert_eq!(loaded.schema_name, "Renamed");
        assert_eq!(loaded.active_version_id, meta.active_version_id);

        assert!(registry.update_schema_metadata("test_schema", "ok name", "short").unwrap_err().is_validation());
        assert!(registry
            .update_schema_metadata("missing_schema", "Renamed", "A renamed schema description")
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_change_active_version_rejects_foreign_version() {
        let registry = registry();
        registry.create_schema(fields("first_schema"), definition()).unwrap();
        let other = registry.create_schema(fields("second_schema"), definition()).unwrap();

        let err = registry
            .change_active_version("first_schema", &other.active_version_id)
            .unwrap_err();
        assert!(matches!(err, SchemaError::NotFound { kind: EntityKind::Version, .. }));
    }
}
