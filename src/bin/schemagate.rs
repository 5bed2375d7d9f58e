//! schemagate CLI
//!
//! Manage schemas and the records stored under them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use schemagate::{
    DataAccess, DefinitionValidator, InsertOutcome, JsonSchemaValidator, MetadataFilter, NewSchema,
    Payload, RecordFilter, RecordId, SchemaRegistry, SchemaState, SchemagateConfig, Stores,
    VersionId,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "schemagate")]
#[command(about = "Versioned JSON Schema registry with validated record storage")]
struct Cli {
    /// Config file (defaults to schemagate.toml and the user config dir)
    #[arg(short, long)]
    config: Option<String>,

    /// Override the document store directory
    #[arg(long)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new schema
    Create {
        keyname: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        description: String,
        /// JSON Schema definition file
        #[arg(long)]
        definition: PathBuf,
    },

    /// List schemas
    List {
        /// Include deleted schemas
        #[arg(long)]
        all: bool,
    },

    /// Show a schema and its active definition
    Show { keyname: String },

    /// Change a schema's name and description
    UpdateMeta {
        keyname: String,
        #[arg(short, long)]
        name: String,
        #[arg(short, long)]
        description: String,
    },

    /// Add a new definition version and activate it
    UpdateDefinition {
        keyname: String,
        #[arg(long)]
        definition: PathBuf,
    },

    /// List the definition versions of a schema
    Versions { keyname: String },

    /// Activate an existing version
    Activate { keyname: String, version_id: String },

    /// Retire a schema (records and versions are kept)
    Delete { keyname: String },

    /// Delete a single inactive version
    DeleteVersion { version_id: String },

    /// Remove a deleted schema's records, versions and tombstone
    Purge { keyname: String },

    /// Delete inactive versions older than the retention period
    Prune {
        /// Overrides retention.inactive_version_days
        #[arg(long)]
        days: Option<u32>,
    },

    /// Validate and store a record (inline JSON or @file)
    Insert { keyname: String, payload: String },

    /// Query records with key=value equality constraints
    Query {
        keyname: String,
        #[arg(short = 'w', long = "where")]
        filters: Vec<String>,
    },

    /// Show one record
    Get { keyname: String, record_id: String },

    /// Merge fields into a record (not validated)
    UpdateRecord {
        keyname: String,
        record_id: String,
        payload: String,
    },

    /// Delete one record
    DeleteRecord { keyname: String, record_id: String },

    /// Report records that do not conform to the active definition
    Audit { keyname: String },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Write a default config file
    Init {
        #[arg(default_value = "schemagate.toml")]
        path: String,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("❌ Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = SchemagateConfig::load_from(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(path) = cli.store {
        config.storage.path = path;
    }

    if let Commands::Config { command } = cli.command {
        return run_config(&config, command);
    }

    let mut storage = config.storage.clone();
    storage.path = config.storage_path();
    let stores = Stores::from_config(&storage).context("failed to open stores")?;
    let validator: Arc<dyn DefinitionValidator> =
        Arc::new(JsonSchemaValidator::new(config.validation.draft));
    let registry = SchemaRegistry::new(stores.clone(), Arc::clone(&validator));
    let data = DataAccess::new(stores, validator);

    match cli.command {
        Commands::Create {
            keyname,
            name,
            description,
            definition,
        } => {
            let definition = read_json_file(&definition)?;
            let meta = registry.create_schema(NewSchema::new(keyname, name, description), definition)?;
            println!("✅ Created schema '{}'", meta.schema_keyname);
            println!("   version: {}", meta.active_version_id.as_str());
        }

        Commands::List { all } => {
            let filter = if all {
                MetadataFilter::default()
            } else {
                MetadataFilter::active()
            };
            let schemas = registry.list_schemas(&filter)?;
            if schemas.is_empty() {
                println!("No schemas registered");
            }
            for meta in schemas {
                let marker = match meta.state {
                    SchemaState::Active => "📗",
                    SchemaState::Deleted => "📕",
                    SchemaState::Purging => "🧹",
                };
                println!(
                    "{} {:<30} {} ({})",
                    marker,
                    meta.schema_keyname,
                    meta.schema_name,
                    meta.active_version_id.as_str()
                );
            }
        }

        Commands::Show { keyname } => {
            let meta = registry
                .get_schema(&keyname)?
                .with_context(|| format!("schema '{}' not found", keyname))?;
            println!("{}", serde_json::to_string_pretty(&meta)?);
        }

        Commands::UpdateMeta {
            keyname,
            name,
            description,
        } => {
            registry.update_schema_metadata(&keyname, name, description)?;
            println!("✅ Updated metadata of '{}'", keyname);
        }

        Commands::UpdateDefinition { keyname, definition } => {
            let definition = read_json_file(&definition)?;
            let version_id = registry.update_schema_definition(&keyname, definition)?;
            println!("✅ '{}' now at version {}", keyname, version_id.as_str());
        }

        Commands::Versions { keyname } => {
            let active = registry.get_schema(&keyname)?.map(|m| m.active_version_id);
            for version in registry.list_versions(&keyname)? {
                let marker = if active.as_ref() == Some(&version.version_id) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{} {}  {}  {}",
                    marker,
                    version.version_id.as_str(),
                    version.created_at.to_rfc3339(),
                    version.checksum
                );
            }
        }

        Commands::Activate { keyname, version_id } => {
            let (keyname, version_id) =
                registry.change_active_version(&keyname, &VersionId::from(version_id))?;
            println!("✅ '{}' now at version {}", keyname, version_id.as_str());
        }

        Commands::Delete { keyname } => {
            registry.delete_schema(&keyname)?;
            println!("✅ Deleted schema '{}'", keyname);
            println!("   records and versions are kept; run `purge` to remove them");
        }

        Commands::DeleteVersion { version_id } => {
            let deleted = registry.delete_schema_version(&VersionId::from(version_id))?;
            println!("✅ Deleted version {}", deleted.as_str());
        }

        Commands::Purge { keyname } => {
            let report = registry.purge_schema(&keyname)?;
            println!("✅ Purged schema '{}'", report.schema_keyname);
            println!("   collection dropped: {}", report.dropped_collection);
            println!("   versions removed: {}", report.versions_removed.len());
        }

        Commands::Prune { days } => {
            let days = days.unwrap_or(config.retention.inactive_version_days);
            println!("🔍 Pruning versions inactive for more than {} days...", days);
            let report = registry.prune_inactive_versions(days)?;
            for (keyname, pruned) in &report.pruned {
                if !pruned.is_empty() {
                    println!("  ✅ {} - {} pruned", keyname, pruned.len());
                }
            }
            for (keyname, error) in &report.failures {
                println!("  ❌ {} - {}", keyname, error);
            }
            println!("\n{} versions pruned", report.total_pruned());
            if !report.failures.is_empty() {
                std::process::exit(1);
            }
        }

        Commands::Insert { keyname, payload } => {
            match data.insert_data(&keyname, read_json_arg(&payload)?)? {
                InsertOutcome::Inserted { record_id } => {
                    println!("✅ Inserted record {}", record_id.as_str());
                }
                InsertOutcome::Rejected { errors } => {
                    println!("❌ Payload rejected ({} errors)", errors.len());
                    for error in errors {
                        let path = if error.path.is_empty() { "/" } else { error.path.as_str() };
                        println!("   └─ {}: {}", path, error.message);
                    }
                    std::process::exit(1);
                }
            }
        }

        Commands::Query { keyname, filters } => {
            let filter = parse_filters(&filters)?;
            let records = data.get_data(&keyname, &filter)?;
            let documents: Vec<Value> = records.iter().map(|r| r.to_document()).collect();
            println!("{}", serde_json::to_string_pretty(&documents)?);
        }

        Commands::Get { keyname, record_id } => {
            let record = data
                .get_record(&keyname, &RecordId::from(record_id.as_str()))?
                .with_context(|| format!("record {} not found", record_id))?;
            println!("{}", serde_json::to_string_pretty(&record.to_document())?);
        }

        Commands::UpdateRecord {
            keyname,
            record_id,
            payload,
        } => {
            let partial: Payload = match read_json_arg(&payload)? {
                Value::Object(map) => map,
                _ => bail!("update payload must be a JSON object"),
            };
            match data.update_data(&keyname, &RecordId::from(record_id.as_str()), partial)? {
                Some(id) => println!("✅ Updated record {}", id.as_str()),
                None => bail!("record {} not found", record_id),
            }
        }

        Commands::DeleteRecord { keyname, record_id } => {
            let deleted = data.delete_data(&keyname, &RecordId::from(record_id))?;
            println!("✅ Deleted record {}", deleted.as_str());
        }

        Commands::Audit { keyname } => {
            println!("🔍 Auditing records of '{}'...", keyname);
            let failing = data.audit_records(&keyname)?;
            if failing.is_empty() {
                println!("✅ All records conform to the active definition");
            } else {
                for record in &failing {
                    println!("❌ {}", record.record_id.as_str());
                    for error in &record.errors {
                        println!("   └─ {}: {}", error.path, error.message);
                    }
                }
                std::process::exit(1);
            }
        }

        Commands::Config { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn run_config(config: &SchemagateConfig, command: ConfigCommands) -> anyhow::Result<()> {
    match command {
        ConfigCommands::Show => {
            println!("{}", toml::to_string_pretty(config)?);
        }
        ConfigCommands::Init { path, force } => {
            if Path::new(&path).exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path);
            }
            SchemagateConfig::default().save(&path)?;
            println!("✅ Wrote {}", path);
        }
    }
    Ok(())
}

fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("{} is not valid JSON", path.display()))
}

/// Inline JSON, or `@path` to read it from a file
fn read_json_arg(arg: &str) -> anyhow::Result<Value> {
    match arg.strip_prefix('@') {
        Some(path) => read_json_file(Path::new(path)),
        None => serde_json::from_str(arg).context("payload is not valid JSON"),
    }
}

/// `key=value` pairs; values are parsed as JSON and fall back to strings
fn parse_filters(filters: &[String]) -> anyhow::Result<RecordFilter> {
    let mut filter = RecordFilter::new();
    for pair in filters {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("filter '{}' is not of the form key=value", pair);
        };
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        filter.insert(key.to_string(), value);
    }
    Ok(filter)
}
