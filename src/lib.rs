//! schemagate
//!
//! A schema registry that gates writes to per-schema record collections.
//! Every schema owns an append-only history of JSON Schema definitions, one of
//! which is active; records are validated against the active definition
//! before they are stored.
//!
//! ## Features
//!
//! - **Versioned Definitions**: Updates append a new version, never mutate one
//! - **Checksum Validation**: SHA256 checksums detect tampered versions
//! - **Compensated Creation**: Multi-store writes roll back in reverse order
//! - **Pluggable Storage**: In-memory or on-disk JSON document backends
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────┐   ┌──────────────┐
//!   callers ────▶ │  SchemaRegistry  │   │  DataAccess  │
//!                 └────────┬─────────┘   └──────┬───────┘
//!                          │   DefinitionValidator (jsonschema)
//!          ┌───────────────┼──────────────────────┤
//!          ▼               ▼                      ▼
//!   SchemaMetadataStore  SchemaVersionStore    DataStore
//!          └──────── memory | document ───────────┘
//! ```

pub mod checksum;
pub mod config;
pub mod data;
pub mod definition;
pub mod error;
pub mod record;
pub mod registry;
pub mod saga;
pub mod schema;
pub mod store;
pub mod validate;
pub mod version;

pub use checksum::Checksum;
pub use config::SchemagateConfig;
pub use data::{DataAccess, InsertOutcome, NonConformingRecord};
pub use definition::{DefinitionValidator, InstanceError, JsonSchemaValidator, SchemaDraft};
pub use error::{EntityKind, Result, SchemaError};
pub use record::{Payload, RecordFilter, RecordId, StoredRecord};
pub use registry::{PruneReport, PurgeReport, SchemaRegistry};
pub use schema::{MetadataFilter, NewSchema, SchemaId, SchemaMetadata, SchemaState};
pub use store::{StoreError, Stores};
pub use version::{SchemaDefinitionVersion, VersionId};
