//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::chunker::ChunkerSpec;
use crate::storage::error::StoreResult;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Backing store selection and connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// `sqlite` or `memory`
    #[serde(default = "default_backend")]
    pub backend: String,

    #[serde(default = "default_db_path")]
    pub path: String,

    /// Library used when a command does not name one
    #[serde(default = "default_library")]
    pub library: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

fn default_db_path() -> String {
    dirs::data_local_dir()
        .map(|p| p.join("strata").join("strata.db").to_string_lossy().to_string())
        .unwrap_or_else(|| "./strata.db".to_string())
}

fn default_library() -> String {
    "default".to_string()
}

fn default_connect_timeout() -> u64 {
    5000 // 5 seconds
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_db_path(),
            library: default_library(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Database path with a leading `~/` expanded
    pub fn db_path(&self) -> PathBuf {
        match (self.path.strip_prefix("~/"), dirs::home_dir()) {
            (Some(rest), Some(home)) => home.join(rest),
            _ => PathBuf::from(&self.path),
        }
    }
}

/// Version store tuning
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Byte budget per array chunk
    #[serde(default = "default_max_chunk_bytes")]
    pub max_chunk_bytes: usize,

    /// Row limit per table chunk
    #[serde(default = "default_max_chunk_rows")]
    pub max_chunk_rows: usize,

    /// Chunker for tables written without one, e.g. `passthru` or `date:M`
    #[serde(default = "default_chunker")]
    pub default_chunker: String,

    /// Opaque values up to this size stay inside the version document
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold_bytes: usize,

    /// Superseded versions younger than this survive pruning
    #[serde(default = "default_prune_keep_mins")]
    pub prune_keep_mins: u64,

    /// fsck leaves chunks of in-flight writes younger than this alone
    #[serde(default = "default_orphan_grace")]
    pub orphan_grace_secs: u64,
}

fn default_max_chunk_bytes() -> usize {
    2 * 1024 * 1024 // 2 MiB
}

fn default_max_chunk_rows() -> usize {
    100_000
}

fn default_chunker() -> String {
    "passthru".to_string()
}

fn default_inline_threshold() -> usize {
    4 * 1024 // 4 KiB
}

fn default_prune_keep_mins() -> u64 {
    120
}

fn default_orphan_grace() -> u64 {
    86_400 // 1 day
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_chunk_bytes: default_max_chunk_bytes(),
            max_chunk_rows: default_max_chunk_rows(),
            default_chunker: default_chunker(),
            inline_threshold_bytes: default_inline_threshold(),
            prune_keep_mins: default_prune_keep_mins(),
            orphan_grace_secs: default_orphan_grace(),
        }
    }
}

impl EngineConfig {
    pub fn default_chunker_spec(&self) -> StoreResult<ChunkerSpec> {
        self.default_chunker.parse()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,

    pub file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        // Try default config locations
        let config_paths = [
            dirs::config_dir().map(|p| p.join("strata").join("config.toml")),
            Some(PathBuf::from("/etc/strata/config.toml")),
            Some(PathBuf::from("./config.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        // Fall back to environment-only config
        tracing::debug!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        // Store overrides
        if let Ok(path) = std::env::var("STRATA_DB_PATH") {
            self.store.path = path;
        }
        if let Ok(backend) = std::env::var("STRATA_BACKEND") {
            self.store.backend = backend;
        }
        if let Ok(library) = std::env::var("STRATA_LIBRARY") {
            self.store.library = library;
        }
        if let Ok(timeout) = std::env::var("STRATA_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.store.connect_timeout_ms = ms;
            }
        }

        // Logging overrides
        if let Ok(level) = std::env::var("STRATA_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("STRATA_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Strata Configuration
#
# Environment variables override these settings:
# - STRATA_DB_PATH
# - STRATA_BACKEND
# - STRATA_LIBRARY
# - STRATA_CONNECT_TIMEOUT_MS
# - STRATA_LOG_LEVEL
# - STRATA_LOG_FORMAT

[store]
# Backing store: sqlite or memory
backend = "sqlite"

# SQLite database file, shared by every process using the store
path = "~/.local/share/strata/strata.db"

# Library used when none is given on the command line
library = "default"

# How long to wait for a busy or unreachable store (ms)
connect_timeout_ms = 5000

[engine]
# Byte budget per array chunk
max_chunk_bytes = 2097152

# Row limit per table chunk
max_chunk_rows = 100000

# Chunker for tables: passthru, date:D, date:M or date:Y (optionally date:M:column)
default_chunker = "passthru"

# Opaque values up to this many bytes are kept inside the version document
inline_threshold_bytes = 4096

# Superseded versions younger than this survive pruning (minutes)
prune_keep_mins = 120

# fsck ignores orphaned chunks of writes younger than this (seconds)
orphan_grace_secs = 86400

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

# Optional log file path
# file = "/var/log/strata/strata.log"
"#
    .to_string()
}
