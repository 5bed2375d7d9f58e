//! Schema definition validation
//!
//! The registry never interprets definitions itself. It asks a
//! [`DefinitionValidator`] whether a document is a well-formed schema and which
//! errors a payload produces against it. [`JsonSchemaValidator`] is the
//! `jsonschema`-backed implementation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use jsonschema::{Draft, JSONSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checksum::Checksum;
use crate::error::{Result, SchemaError};

/// Compiled definitions kept before the cache is cleared
const COMPILED_CACHE_LIMIT: usize = 256;

/// A single instance validation failure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceError {
    /// JSON pointer into the payload ("" for the root)
    pub path: String,
    pub message: String,
}

impl InstanceError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Validation capability used by the orchestrators
pub trait DefinitionValidator: Send + Sync {
    /// Fail unless `definition` is a non-empty, well-formed schema document
    fn validate_definition(&self, definition: &Value) -> Result<()>;

    /// Collect every error `payload` produces against `definition`
    fn validate_instance(&self, definition: &Value, payload: &Value) -> Result<Vec<InstanceError>>;
}

/// JSON Schema draft used for meta-schema and instance validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaDraft {
    Draft4,
    Draft6,
    #[default]
    Draft7,
}

impl SchemaDraft {
    fn to_jsonschema(self) -> Draft {
        match self {
            SchemaDraft::Draft4 => Draft::Draft4,
            SchemaDraft::Draft6 => Draft::Draft6,
            SchemaDraft::Draft7 => Draft::Draft7,
        }
    }
}

/// [`DefinitionValidator`] backed by the `jsonschema` crate
pub struct JsonSchemaValidator {
    draft: SchemaDraft,
    compiled: RwLock<HashMap<Checksum, Arc<JSONSchema>>>,
}

impl Default for JsonSchemaValidator {
    fn default() -> Self {
        Self::new(SchemaDraft::default())
    }
}

impl JsonSchemaValidator {
    pub fn new(draft: SchemaDraft) -> Self {
        Self {
            draft,
            compiled: RwLock::new(HashMap::new()),
        }
    }

    pub fn draft(&self) -> SchemaDraft {
        self.draft
    }

    fn compile(&self, definition: &Value) -> Result<JSONSchema> {
        // Compilation also checks the document against the draft's meta-schema
        JSONSchema::options()
            .with_draft(self.draft.to_jsonschema())
            .compile(definition)
            .map_err(|e| SchemaError::InvalidDefinition(format!("{} at '{}'", e, e.instance_path)))
    }

    fn compiled(&self, definition: &Value) -> Result<Arc<JSONSchema>> {
        let key = Checksum::from_json(definition);
        if let Ok(cache) = self.compiled.read() {
            if let Some(schema) = cache.get(&key) {
                return Ok(Arc::clone(schema));
            }
        }

        let schema = Arc::new(self.compile(definition)?);
        if let Ok(mut cache) = self.compiled.write() {
            if cache.len() >= COMPILED_CACHE_LIMIT {
                cache.clear();
            }
            cache.insert(key, Arc::clone(&schema));
        }
        Ok(schema)
    }
}

impl DefinitionValidator for JsonSchemaValidator {
    fn validate_definition(&self, definition: &Value) -> Result<()> {
        match definition.as_object() {
            None => {
                return Err(SchemaError::InvalidDefinition(
                    "schema definition must be a JSON object".to_string(),
                ))
            }
            Some(map) if map.is_empty() => {
                return Err(SchemaError::InvalidDefinition(
                    "schema definition must not be empty".to_string(),
                ))
            }
            Some(_) => {}
        }
        self.compiled(definition).map(|_| ())
    }

    fn validate_instance(&self, definition: &Value, payload: &Value) -> Result<Vec<InstanceError>> {
        let schema = self.compiled(definition)?;
        let errors = match schema.validate(payload) {
            Ok(()) => Vec::new(),
            Err(errors) => errors
                .map(|e| InstanceError::new(e.instance_path.to_string(), e.to_string()))
                .collect(),
        };
        Ok(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person() -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "age": {"type": "integer"}
            },
            "required": ["name"]
        })
    }

    #[test]
    fn test_accepts_well_formed_definition() {
        let validator = JsonSchemaValidator::default();
        assert!(validator.validate_definition(&person()).is_ok());
    }

    #[test]
    fn test_rejects_non_object_and_empty_definitions() {
        let validator = JsonSchemaValidator::default();
        for doc in [json!("not_a_dict"), json!([]), json!({})] {
            let err = validator.validate_definition(&doc).unwrap_err();
            assert!(err.is_validation());
        }
    }

    #[test]
    fn test_rejects_definition_failing_meta_schema() {
        let validator = JsonSchemaValidator::default();
        let invalid = json!({
            "type": "object",
            "properties": {"field": {"type": "nonexistent_type"}}
        });
        assert!(matches!(
            validator.validate_definition(&invalid),
            Err(SchemaError::InvalidDefinition(_))
        ));
    }

    #[test]
    fn test_instance_errors_carry_paths() {
        let validator = JsonSchemaValidator::default();

        let ok = validator.validate_instance(&person(), &json!({"name": "Ada", "age": 36})).unwrap();
        assert!(ok.is_empty());

        let errors = validator.validate_instance(&person(), &json!({"age": "old"})).unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.path.is_empty() && e.message.contains("name")));
        assert!(errors.iter().any(|e| e.path == "/age"));
    }

    #[test]
    fn test_compiled_definitions_are_cached() {
        let validator = JsonSchemaValidator::new(SchemaDraft::Draft7);
        validator.validate_instance(&person(), &json!({"name": "Ada"})).unwrap();
        validator.validate_instance(&person(), &json!({"name": "Grace"})).unwrap();
        assert_eq!(validator.compiled.read().unwrap().len(), 1);
    }
}
