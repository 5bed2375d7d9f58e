//! Error types for the schema registry

use std::fmt;

use thiserror::Error;

use crate::store::StoreError;

/// Result type for registry and data operations
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Kind of entity a lookup failed to find
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Schema,
    Version,
    Record,
    Collection,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Schema => "schema",
            EntityKind::Version => "schema version",
            EntityKind::Record => "record",
            EntityKind::Collection => "data collection",
        };
        f.write_str(name)
    }
}

/// Schema registry errors
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid schema definition: {0}")]
    InvalidDefinition(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: String },

    #[error("Schema already exists: {0}")]
    AlreadyExists(String),

    #[error("Creation of schema '{keyname}' failed at step '{step}': {source}")]
    CreationFailed {
        keyname: String,
        step: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("Store error: {0}")]
    ExternalStore(#[source] StoreError),
}

impl SchemaError {
    pub fn not_found(kind: EntityKind, id: impl Into<String>) -> Self {
        SchemaError::NotFound { kind, id: id.into() }
    }

    /// True for errors raised before any write was attempted
    pub fn is_validation(&self) -> bool {
        matches!(self, SchemaError::Validation(_) | SchemaError::InvalidDefinition(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SchemaError::NotFound { .. })
    }
}

impl From<StoreError> for SchemaError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingCollection(keyname) => {
                SchemaError::not_found(EntityKind::Collection, keyname)
            }
            other => SchemaError::ExternalStore(other),
        }
    }
}
