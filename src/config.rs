//! Configuration management for the catalog service.
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Default configuration (embedded in binary)
//! 2. System-wide configuration file (`/etc/catalogd/config.toml`)
//! 3. User-specified configuration file
//! 4. Environment variables (prefixed with `CATALOGD_`, nested keys separated by `__`)
//! 5. Command-line arguments
//!
//! # Environment Variables
//!
//! - `CATALOGD_STORE__PATH` - metadata database file
//! - `CATALOGD_CATALOG__DIR` - root of the local catalog mirror
//! - `CATALOGD_FACTS__PATH` - database holding the legacy fact tables

use crate::error::Result;
use clap::Args;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global command-line arguments shared by every subcommand
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Configuration file path
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Metadata database path
    #[arg(long, global = true, env = "CATALOGD_DB", value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Catalog mirror directory
    #[arg(long, global = true, value_name = "DIR")]
    pub catalog_dir: Option<PathBuf>,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub store: StoreConfig,
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub facts: FactsConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// DuckDB file holding datasets, tables and variables
    pub path: PathBuf,
    /// DuckDB `memory_limit` setting
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    /// Number of serving workers, each owning one connection; 0 means one per CPU
    #[serde(default)]
    pub workers: usize,
    /// Open the store read-only when serving
    #[serde(default = "default_true")]
    pub read_only: bool,
}

impl StoreConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers == 0 {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

/// Catalog mirror configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Root directory of the catalog mirror
    pub dir: PathBuf,
    /// Manifest file name, relative to `dir`
    #[serde(default = "default_manifest")]
    pub manifest: String,
    /// Channels that are synced
    #[serde(default = "default_channels")]
    pub channels: Vec<String>,
    /// Path substrings that are never synced
    #[serde(default)]
    pub exclude: Vec<String>,
}

/// Legacy fact-table configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FactsConfig {
    /// Database with `data_values` and `entities`; when unset they are read
    /// from the metadata store itself
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Rebuild the full-text index after every pass
    #[serde(default = "default_true")]
    pub full_text_search: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            full_text_search: true,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Prefix all API routes are mounted under, used for derived URLs too
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
    #[serde(default)]
    pub cors: CorsConfig,
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Allowed origins (`["*"]` allows any)
    #[serde(default = "default_cors_origins")]
    pub allowed_origins: Vec<String>,
    /// Max age for preflight cache (in seconds)
    #[serde(default = "default_cors_max_age")]
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_origins: default_cors_origins(),
            max_age: default_cors_max_age(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Write logs to a daily-rotated file in this directory besides stderr
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Settings {
    /// Load configuration from all sources
    pub fn load(args: &GlobalArgs) -> Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            .add_source(config::File::with_name("/etc/catalogd/config.toml").required(false));

        if let Some(path) = &args.config {
            builder = builder.add_source(config::File::from(path.as_path()));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CATALOGD")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("catalog.channels")
                .with_list_parse_key("catalog.exclude")
                .with_list_parse_key("server.cors.allowed_origins")
                .try_parsing(true),
        );

        let mut settings: Settings = builder.build()?.try_deserialize()?;

        if let Some(db) = &args.db {
            settings.store.path = db.clone();
        }
        if let Some(dir) = &args.catalog_dir {
            settings.catalog.dir = dir.clone();
        }

        Ok(settings)
    }

    /// Absolute path of the manifest file
    pub fn manifest_path(&self) -> PathBuf {
        self.catalog.dir.join(&self.catalog.manifest)
    }
}

fn default_true() -> bool {
    true
}

fn default_memory_limit() -> String {
    "2GB".to_string()
}

fn default_manifest() -> String {
    "catalog.json".to_string()
}

fn default_channels() -> Vec<String> {
    vec!["backport".to_string(), "garden".to_string()]
}

fn default_request_timeout() -> u64 {
    60
}

fn default_url_prefix() -> String {
    "/v1".to_string()
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_cors_max_age() -> u64 {
    3600
}
