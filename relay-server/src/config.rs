use anyhow::{bail, Context, Result};
use copier_status_file::Platform;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    /// Status file locations, grouped by the API key that owns them
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    /// Disable CORS restrictions (allows all origins) - use only in development!
    #[serde(default)]
    pub disable: bool,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable file logging
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,
    /// Directory for log files (relative to working directory or absolute path)
    #[serde(default = "default_log_directory")]
    pub directory: String,
    /// Prefix for log file names
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
    /// Rotation strategy: "daily", "hourly", or "never"
    #[serde(default = "default_log_rotation")]
    pub rotation: String,
    /// Maximum number of log files to keep (0 = unlimited)
    #[serde(default = "default_max_files")]
    pub max_files: u32,
    /// Maximum age of log files in days (0 = unlimited)
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u32,
    /// Write file output as JSON lines instead of plain text
    #[serde(default)]
    pub json: bool,
}

fn default_logging_enabled() -> bool {
    true
}
fn default_log_directory() -> String {
    "logs".to_string()
}
fn default_log_file_prefix() -> String {
    "copier-status-relay".to_string()
}
fn default_log_rotation() -> String {
    "daily".to_string()
}
fn default_max_files() -> u32 {
    30
}
fn default_max_age_days() -> u32 {
    90
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            directory: default_log_directory(),
            file_prefix: default_log_file_prefix(),
            rotation: default_log_rotation(),
            max_files: default_max_files(),
            max_age_days: default_max_age_days(),
            json: false,
        }
    }
}

/// Poll loop and staleness settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Interval between two full re-scans of all status files
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// A status timestamp older than this marks the account OFFLINE.
    /// Deployments have used anything from 5 to 500 seconds.
    #[serde(default = "default_activity_timeout_secs")]
    pub activity_timeout_secs: i64,
    /// Upper bound for a single file read; a timed-out read counts as missing
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_activity_timeout_secs() -> i64 {
    30
}
fn default_read_timeout_ms() -> u64 {
    1000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            activity_timeout_secs: default_activity_timeout_secs(),
            read_timeout_ms: default_read_timeout_ms(),
        }
    }
}

impl MonitorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Directory holding one JSON document per API key
    #[serde(default = "default_registry_directory")]
    pub directory: String,
}

fn default_registry_directory() -> String {
    "registry".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            directory: default_registry_directory(),
        }
    }
}

/// One group of status files owned by an API key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub api_key: String,
    /// Platform hint for decoding ("MT4", "MT5", ...). BOM detection wins.
    #[serde(default)]
    pub platform: Option<String>,
    /// Explicit status file paths
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    /// Directories scanned every cycle for status files
    #[serde(default)]
    pub directories: Vec<PathBuf>,
    /// File extensions picked up from `directories`
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["csv".to_string(), "txt".to_string()]
}

impl SourceConfig {
    pub fn platform_hint(&self) -> Option<Platform> {
        self.platform
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .map(Platform::from_token)
    }
}

impl Config {
    /// Load config from layered TOML files
    ///
    /// Loads configuration files in the following order (later files override earlier):
    /// 1. {base_name}.toml (required, e.g., config.toml)
    /// 2. {base_name}.{ENV}.toml (optional, only if CONFIG_ENV is set)
    /// 3. {base_name}.local.toml (optional, for personal overrides, git-ignored)
    pub fn from_file<P: AsRef<Path>>(base_name: P) -> Result<Self> {
        let base_path = base_name.as_ref();
        let base_str = base_path.to_str().context("Invalid base path")?;

        let mut builder = config::Config::builder()
            // 1. Load base config (required)
            .add_source(config::File::with_name(base_str));

        // 2. Load environment-specific config (optional)
        if let Ok(env) = std::env::var("CONFIG_ENV") {
            let env_config = format!("{}.{}", base_str, env);
            builder = builder.add_source(config::File::with_name(&env_config).required(false));
        }

        // 3. Load local config (optional, for personal overrides)
        let local_config = format!("{}.local", base_str);
        builder = builder.add_source(config::File::with_name(&local_config).required(false));

        let config: Config = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.monitor.activity_timeout_secs <= 0 {
            bail!(
                "monitor.activity_timeout_secs must be positive, got {}",
                self.monitor.activity_timeout_secs
            );
        }
        if self.monitor.poll_interval_ms == 0 {
            bail!("monitor.poll_interval_ms must be positive");
        }
        if self.monitor.read_timeout_ms == 0 {
            bail!("monitor.read_timeout_ms must be positive");
        }
        if let Some(source) = self.sources.iter().find(|s| s.api_key.trim().is_empty()) {
            bail!(
                "source with paths {:?} / directories {:?} has an empty api_key",
                source.paths,
                source.directories
            );
        }
        Ok(())
    }

    /// Get server bind address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
