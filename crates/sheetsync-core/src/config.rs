//! Configuration structures for sheetsync.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Remote table store configuration
    pub store: StoreConfig,

    /// Table layout configuration
    #[serde(default)]
    pub table: TableConfig,

    /// Read throttle, batching and retry configuration
    #[serde(default)]
    pub sync: SyncConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Remote table store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Store backend
    #[serde(default)]
    pub backend: StoreBackend,

    /// Identifier of the table document
    pub table_id: String,

    /// Name of the table (sheet) inside the document
    pub table_name: String,

    /// Path to a credentials file handed to the backend
    #[serde(default)]
    pub credentials: Option<PathBuf>,

    /// Root directory for the file backend
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Initial rows of the memory backend, header row included
    #[serde(default)]
    pub seed_rows: Vec<Vec<String>>,
}

impl StoreConfig {
    /// Create a store configuration for the given table.
    pub fn new(
        backend: StoreBackend,
        table_id: impl Into<String>,
        table_name: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            table_id: table_id.into(),
            table_name: table_name.into(),
            credentials: None,
            data_dir: default_data_dir(),
            seed_rows: Vec::new(),
        }
    }
}

/// Store backend selection.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// JSON document on the local filesystem (default)
    #[default]
    File,
    /// In-process grid, lost on exit
    Memory,
}

/// Table layout configuration.
///
/// The only part of the configuration that may change while running,
/// through [`TableSync::configure`](crate::engine::TableSync::configure).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TableConfig {
    /// Key column: a header name or a column letter such as `B`
    #[serde(default)]
    pub key_spec: Option<String>,

    /// 1-based row holding the headers
    #[serde(default = "default_header_row")]
    pub header_row: u32,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            key_spec: None,
            header_row: default_header_row(),
        }
    }
}

impl TableConfig {
    /// Validate the table layout.
    pub fn validate(&self) -> crate::Result<()> {
        if self.header_row < 1 {
            return Err(crate::Error::InvalidConfig(format!(
                "header_row must be >= 1, got {}",
                self.header_row
            )));
        }
        Ok(())
    }
}

/// Read throttle, batching and retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    /// Minimum interval between table reads in milliseconds
    #[serde(default = "default_read_interval_ms")]
    pub read_interval_ms: u64,

    /// Batch window in milliseconds
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// Maximum attempts for each remote call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Backoff after the first failed attempt in milliseconds
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Upper bound for a single backoff in milliseconds
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            read_interval_ms: default_read_interval_ms(),
            batch_interval_ms: default_batch_interval_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

impl SyncConfig {
    /// Read throttle interval.
    pub fn read_interval(&self) -> Duration {
        Duration::from_millis(self.read_interval_ms)
    }

    /// Batch window.
    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Health and metrics HTTP port, 0 disables the endpoint
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_directive(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_header_row() -> u32 {
    1
}
fn default_read_interval_ms() -> u64 {
    1000
}
fn default_batch_interval_ms() -> u64 {
    3000
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    30000
}
fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Create a configuration with defaults for everything but the store.
    pub fn new(store: StoreConfig) -> Self {
        Self {
            store,
            table: TableConfig::default(),
            sync: SyncConfig::default(),
            monitoring: MonitoringConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.store.table_id.is_empty() {
            return Err(crate::Error::InvalidConfig("table_id is required".into()));
        }

        if self.store.table_name.is_empty() {
            return Err(crate::Error::InvalidConfig("table_name is required".into()));
        }

        self.table.validate()?;

        if self.sync.max_retries == 0 {
            return Err(crate::Error::InvalidConfig(
                "max_retries must be at least 1".into(),
            ));
        }

        if self.sync.retry_base_delay_ms > self.sync.retry_max_delay_ms {
            return Err(crate::Error::InvalidConfig(format!(
                "retry_base_delay_ms ({}) exceeds retry_max_delay_ms ({})",
                self.sync.retry_base_delay_ms, self.sync.retry_max_delay_ms
            )));
        }

        if self.sync.batch_interval_ms == 0 {
            tracing::warn!("batch_interval_ms is 0, every write flushes on its own");
        }

        Ok(())
    }
}
