//! Configuration management for schemagate
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (schemagate.toml)
//! - Environment variables (SCHEMAGATE__*)
//!
//! ## Example config file (schemagate.toml):
//! ```toml
//! [storage]
//! backend = "document"
//! path = "./schemagate-data"
//!
//! [retention]
//! inactive_version_days = 60
//!
//! [validation]
//! draft = "draft7"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::definition::SchemaDraft;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemagateConfig {
    /// Storage backend settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Version retention settings
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Definition validation settings
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Which backend implements the storage ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process-local maps; nothing survives exit
    Memory,
    /// JSON documents under `storage.path`
    #[default]
    Document,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory of the document backend
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Inactive versions older than this many days are pruned
    #[serde(default = "default_inactive_version_days")]
    pub inactive_version_days: u32,
}

/// Validation configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// JSON Schema draft for definitions and payloads
    #[serde(default)]
    pub draft: SchemaDraft,
}

// Default value functions
fn default_storage_path() -> PathBuf {
    PathBuf::from("schemagate-data")
}

fn default_inactive_version_days() -> u32 {
    60
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_storage_path(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            inactive_version_days: default_inactive_version_days(),
        }
    }
}

impl SchemagateConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration from a specific file
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        // Load from default locations
        let config_locations = ["schemagate.toml", ".schemagate.toml", "config/schemagate.toml"];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // Load from XDG config directory
        if let Some(xdg_config) = Self::user_config_path() {
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        // Load from specified path
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // Load from environment variables (SCHEMAGATE__STORAGE__PATH, ...)
        builder = builder.add_source(
            Environment::with_prefix("SCHEMAGATE")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Per-user config file location
    pub fn user_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("dev", "schemagate", "schemagate")
            .map(|dirs| dirs.config_dir().join("schemagate.toml"))
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get the storage path (resolves relative paths)
    pub fn storage_path(&self) -> PathBuf {
        if self.storage.path.is_absolute() {
            self.storage.path.clone()
        } else {
            std::env::current_dir()
                .unwrap_or_default()
                .join(&self.storage.path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SchemagateConfig::default();
        assert_eq!(config.storage.backend, StorageBackend::Document);
        assert_eq!(config.retention.inactive_version_days, 60);
        assert_eq!(config.validation.draft, SchemaDraft::Draft7);
    }

    #[test]
    fn test_serialize_config() {
        let config = SchemagateConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[storage]"));
        assert!(toml_str.contains("[retention]"));
        assert!(toml_str.contains("draft = \"draft7\""));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            "[storage]\nbackend = \"memory\"\n\n[retention]\ninactive_version_days = 7\n",
        )
        .unwrap();

        let config = SchemagateConfig::load_from(path.to_str()).unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.retention.inactive_version_days, 7);
        assert_eq!(config.validation.draft, SchemaDraft::Draft7);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");

        let mut config = SchemagateConfig::default();
        config.validation.draft = SchemaDraft::Draft4;
        config.save(path.to_str().unwrap()).unwrap();

        let loaded = SchemagateConfig::load_from(path.to_str()).unwrap();
        assert_eq!(loaded.validation.draft, SchemaDraft::Draft4);
    }

    #[test]
    fn test_relative_storage_path_is_resolved() {
        let config = SchemagateConfig::default();
        assert!(config.storage_path().is_absolute());
    }
}
